//! Schema diffing algorithm.
//!
//! Compares the first-level properties of two [`SchemaDocument`]s. A field is
//! changed iff both sides have it and their signatures (type tag set,
//! nullability, presence) differ.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schema::{FieldDescriptor, SchemaDocument};

/// A field present on both sides with a different signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: FieldDescriptor,
    pub to: FieldDescriptor,
}

impl FieldChange {
    /// True when the type tag sets differ.
    pub fn type_changed(&self) -> bool {
        self.from.field_type != self.to.field_type
    }

    /// True when the type differs and nothing else in the signature does.
    pub fn only_type_changed(&self) -> bool {
        self.type_changed()
            && self.from.nullable == self.to.nullable
            && self.from.presence == self.to.presence
    }

    /// Absolute presence change, unknown presence counting as zero.
    pub fn presence_delta(&self) -> f64 {
        (self.to.presence_or_zero() - self.from.presence_or_zero()).abs()
    }

    /// True when a nullable field becomes non-nullable.
    pub fn nullability_tightened(&self) -> bool {
        self.from.nullable && !self.to.nullable
    }
}

/// Counts per change category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

/// Structural diff between two schema snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Fields only in the target, sorted.
    pub added: Vec<String>,
    /// Fields only in the source, sorted.
    pub removed: Vec<String>,
    /// Fields on both sides whose signature differs, sorted by field.
    pub changed: Vec<FieldChange>,
    pub summary: DiffSummary,
}

impl SchemaDiff {
    /// Compute the diff from `from` to `to`.
    pub fn compute(from: &SchemaDocument, to: &SchemaDocument) -> Self {
        let from_fields: BTreeSet<&str> = from.field_names().collect();
        let to_fields: BTreeSet<&str> = to.field_names().collect();

        let added: Vec<String> = to_fields
            .difference(&from_fields)
            .map(|f| f.to_string())
            .collect();
        let removed: Vec<String> = from_fields
            .difference(&to_fields)
            .map(|f| f.to_string())
            .collect();

        let changed: Vec<FieldChange> = from_fields
            .intersection(&to_fields)
            .filter_map(|name| {
                let old = from.get(name)?;
                let new = to.get(name)?;
                (old.signature() != new.signature()).then(|| FieldChange {
                    field: name.to_string(),
                    from: old.clone(),
                    to: new.clone(),
                })
            })
            .collect();

        let summary = DiffSummary {
            added: added.len(),
            removed: removed.len(),
            changed: changed.len(),
        };

        SchemaDiff {
            added,
            removed,
            changed,
            summary,
        }
    }

    /// Check if there are any changes.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Look up the change for a field.
    pub fn change_for(&self, field: &str) -> Option<&FieldChange> {
        self.changed.iter().find(|c| c.field == field)
    }
}
