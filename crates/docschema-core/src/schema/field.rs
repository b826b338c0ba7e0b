//! Field descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lattice::{TypeSpec, TypeTag};

/// Description of one field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Declared type. `bsonType` is accepted on read.
    #[serde(rename = "type", alias = "bsonType")]
    pub field_type: TypeSpec,
    /// Fraction of sampled documents containing the field. `None` when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<f64>,
    /// True iff any sampled occurrence was null.
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub required: bool,
    /// Value used to backfill missing or null occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Element descriptor for array fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldDescriptor>>,
    /// Nested descriptors for object fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldDescriptor>>,
}

/// The attributes two descriptors are compared on when diffing.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSignature {
    pub field_type: TypeSpec,
    pub nullable: bool,
    pub presence: Option<f64>,
}

impl FieldDescriptor {
    /// Create a descriptor with unknown presence.
    pub fn new(field_type: impl Into<TypeSpec>) -> Self {
        Self {
            field_type: field_type.into(),
            presence: None,
            nullable: false,
            required: false,
            default: None,
            items: None,
            properties: None,
        }
    }

    pub fn with_presence(mut self, presence: f64) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_items(mut self, items: FieldDescriptor) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, FieldDescriptor>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Diff signature: type tag set, nullability and presence.
    pub fn signature(&self) -> FieldSignature {
        FieldSignature {
            field_type: self.field_type.clone(),
            nullable: self.nullable,
            presence: self.presence,
        }
    }

    /// Presence with unknown treated as zero.
    pub fn presence_or_zero(&self) -> f64 {
        self.presence.unwrap_or(0.0)
    }

    /// Single scalar item type of an array field.
    pub fn item_type(&self) -> Option<TypeTag> {
        self.items.as_ref().and_then(|i| i.field_type.single_scalar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bson_type_alias() {
        let d: FieldDescriptor =
            serde_json::from_value(json!({ "bsonType": "string", "presence": 0.5 })).unwrap();
        assert_eq!(d.field_type, TypeSpec::Scalar(TypeTag::String));
        assert_eq!(d.presence, Some(0.5));
        assert!(!d.nullable);
    }

    #[test]
    fn test_missing_presence_is_unknown() {
        let d: FieldDescriptor = serde_json::from_value(json!({ "type": "int" })).unwrap();
        let measured = FieldDescriptor::new(TypeTag::Int).with_presence(0.0);

        assert_eq!(d.presence, None);
        assert_eq!(d.presence_or_zero(), 0.0);
        assert_ne!(d.signature(), measured.signature());
    }

    #[test]
    fn test_serialize_skips_empty_optionals() {
        let d = FieldDescriptor::new(TypeTag::Int).with_presence(1.0);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(
            v,
            json!({ "type": "int", "presence": 1.0, "nullable": false, "required": false })
        );
    }

    #[test]
    fn test_item_type() {
        let d = FieldDescriptor::new(TypeTag::Array).with_items(FieldDescriptor::new(TypeTag::Int));
        assert_eq!(d.item_type(), Some(TypeTag::Int));
        assert_eq!(FieldDescriptor::new(TypeTag::Array).item_type(), None);
    }
}
