//! Document predicates used to select migration targets.

use serde::{Deserialize, Serialize};

use crate::value::{Document, Value};

/// A predicate over a single top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "field", rename_all = "snake_case")]
pub enum Filter {
    /// Every document.
    All,
    /// The field is present (null included).
    Exists(String),
    /// The field is absent.
    Missing(String),
    /// The field is present and null.
    IsNull(String),
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Exists(field) => doc.contains_key(field),
            Filter::Missing(field) => !doc.contains_key(field),
            Filter::IsNull(field) => matches!(doc.get(field), Some(Value::Null)),
        }
    }
}
