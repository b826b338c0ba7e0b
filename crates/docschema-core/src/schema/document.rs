//! Schema documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::FieldDescriptor;

/// Inferred or declared structure of a collection.
///
/// Keys are field paths; `.` separates object nesting and `[]` marks
/// array-of-object nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub properties: BTreeMap<String, FieldDescriptor>,
    #[serde(default)]
    pub required: BTreeSet<String>,
}

impl SchemaDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, registering it as required when its descriptor says so.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        let name = name.into();
        if field.required {
            self.required.insert(name.clone());
        }
        self.properties.insert(name, field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Required when listed in `required` or flagged on the descriptor.
    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name) || self.get(name).is_some_and(|f| f.required)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
