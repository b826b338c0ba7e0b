//! Single-field document updates.

use serde::{Deserialize, Serialize};

use crate::migration::convert::Conversion;
use crate::value::{Document, Value, ID_FIELD};

/// An update applied to every document of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpdateSpec {
    /// Set the field to a constant.
    Set { field: String, value: Value },
    /// Remove the field.
    Unset { field: String },
    /// Move the field to a new name, replacing any existing value there.
    Rename { from: String, to: String },
    /// Rewrite the field from its own current value.
    Convert { field: String, conversion: Conversion },
}

/// What applying an update did to one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub modified: bool,
    pub conversion_failed: bool,
}

impl UpdateSpec {
    /// The field this update targets.
    pub fn field(&self) -> &str {
        match self {
            UpdateSpec::Set { field, .. }
            | UpdateSpec::Unset { field }
            | UpdateSpec::Convert { field, .. } => field,
            UpdateSpec::Rename { from, .. } => from,
        }
    }

    /// Whether the update would write to `_id`, which must keep matching
    /// the storage key.
    pub fn touches_id(&self) -> bool {
        match self {
            UpdateSpec::Rename { from, to } => from == ID_FIELD || to == ID_FIELD,
            other => other.field() == ID_FIELD,
        }
    }

    /// Apply to a document in place. Updates that touch `_id` do nothing.
    pub fn apply(&self, doc: &mut Document) -> ApplyOutcome {
        if self.touches_id() {
            return ApplyOutcome::default();
        }
        match self {
            UpdateSpec::Set { field, value } => {
                if doc.get(field) == Some(value) {
                    return ApplyOutcome::default();
                }
                doc.insert(field.clone(), value.clone());
                modified()
            }
            UpdateSpec::Unset { field } => ApplyOutcome {
                modified: doc.remove(field).is_some(),
                conversion_failed: false,
            },
            UpdateSpec::Rename { from, to } => {
                if from == to {
                    return ApplyOutcome::default();
                }
                match doc.remove(from) {
                    Some(value) => {
                        doc.insert(to.clone(), value);
                        modified()
                    }
                    None => ApplyOutcome::default(),
                }
            }
            UpdateSpec::Convert { field, conversion } => {
                let Some(current) = doc.get(field) else {
                    return ApplyOutcome::default();
                };
                let outcome = conversion.apply(current);
                let modified = match outcome.replacement {
                    Some(value) => {
                        doc.insert(field.clone(), value);
                        true
                    }
                    None => false,
                };
                ApplyOutcome {
                    modified,
                    conversion_failed: outcome.fell_back,
                }
            }
        }
    }
}

fn modified() -> ApplyOutcome {
    ApplyOutcome {
        modified: true,
        conversion_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::TypeTag;

    #[test]
    fn test_set_is_idempotent() {
        let mut doc = Document::new();
        let update = UpdateSpec::Set {
            field: "x".into(),
            value: Value::Int32(0),
        };

        assert!(update.apply(&mut doc).modified);
        assert!(!update.apply(&mut doc).modified);
        assert_eq!(doc.get("x"), Some(&Value::Int32(0)));
    }

    #[test]
    fn test_unset_and_rename() {
        let mut doc = Document::new().with("a", 1);
        let rename = UpdateSpec::Rename {
            from: "a".into(),
            to: "b".into(),
        };
        assert!(rename.apply(&mut doc).modified);
        assert!(!rename.apply(&mut doc).modified);
        assert_eq!(doc.get("b"), Some(&Value::Int32(1)));

        let unset = UpdateSpec::Unset { field: "b".into() };
        assert!(unset.apply(&mut doc).modified);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_id_is_never_rewritten() {
        let mut doc = Document::new().with(ID_FIELD, 7).with("x", "hello");
        let updates = [
            UpdateSpec::Unset {
                field: ID_FIELD.into(),
            },
            UpdateSpec::Rename {
                from: "x".into(),
                to: ID_FIELD.into(),
            },
            UpdateSpec::Set {
                field: ID_FIELD.into(),
                value: Value::Null,
            },
        ];
        for update in &updates {
            assert!(update.touches_id());
            assert_eq!(update.apply(&mut doc), ApplyOutcome::default());
        }
        assert_eq!(doc.get(ID_FIELD), Some(&Value::Int32(7)));
        assert_eq!(doc.get("x"), Some(&Value::from("hello")));
    }

    #[test]
    fn test_convert_missing_field_untouched() {
        let mut doc = Document::new();
        let update = UpdateSpec::Convert {
            field: "age".into(),
            conversion: Conversion::ToType {
                target: TypeTag::String,
            },
        };
        assert_eq!(update.apply(&mut doc), ApplyOutcome::default());
        assert!(!doc.contains_key("age"));
    }

    #[test]
    fn test_convert_reports_fallback() {
        let mut doc = Document::new().with("age", "old");
        let update = UpdateSpec::Convert {
            field: "age".into(),
            conversion: Conversion::ToType {
                target: TypeTag::Int,
            },
        };
        let outcome = update.apply(&mut doc);
        assert!(!outcome.modified);
        assert!(outcome.conversion_failed);
        assert_eq!(doc.get("age"), Some(&Value::from("old")));
    }
}
