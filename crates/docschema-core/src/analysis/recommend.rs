//! Rule-based recommendations derived from an analysis.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Anomaly, AnomalyKind};
use crate::schema::SchemaDocument;

/// Field conventionally used to version document shapes.
pub const SCHEMA_VERSION_FIELD: &str = "_schemaVersion";

/// Fields at or above this presence are index candidates.
pub const INDEX_PRESENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationKind {
    BestPractice,
    DataQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub title: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecommendation {
    pub field: String,
    pub reason: String,
    pub suggested_index: serde_json::Value,
}

/// Version-field and type-standardization recommendations.
pub fn basic(schema: &SchemaDocument, anomalies: &[Anomaly]) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if !schema.contains(SCHEMA_VERSION_FIELD) {
        recommendations.push(Recommendation {
            kind: RecommendationKind::BestPractice,
            title: format!("Add {SCHEMA_VERSION_FIELD} field"),
            details: json!({
                "field": SCHEMA_VERSION_FIELD,
                "bsonType": "int",
                "default": 1,
            }),
        });
    }

    for anomaly in anomalies {
        if anomaly.kind == AnomalyKind::MultipleTypes {
            recommendations.push(Recommendation {
                kind: RecommendationKind::DataQuality,
                title: format!("Standardize type for {}", anomaly.field),
                details: serde_json::to_value(&anomaly.details).unwrap_or_default(),
            });
        }
    }

    recommendations
}

/// Suggest single-field indexes for frequently present, unindexed fields.
pub fn indexes(schema: &SchemaDocument, indexed: &[String]) -> Vec<IndexRecommendation> {
    let existing: BTreeSet<&str> = indexed.iter().map(String::as_str).collect();

    schema
        .properties
        .iter()
        .filter(|(field, desc)| {
            desc.presence_or_zero() >= INDEX_PRESENCE_THRESHOLD
                && !existing.contains(field.as_str())
        })
        .map(|(field, _)| IndexRecommendation {
            field: field.clone(),
            reason: "High presence; consider indexing".to_string(),
            suggested_index: json!({ "fields": { field.as_str(): 1 } }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnomalyDetails;
    use crate::lattice::TypeTag;
    use crate::schema::FieldDescriptor;

    #[test]
    fn test_schema_version_suggested_when_absent() {
        let recs = basic(&SchemaDocument::new(), &[]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, RecommendationKind::BestPractice);

        let versioned = SchemaDocument::new()
            .with_field(SCHEMA_VERSION_FIELD, FieldDescriptor::new(TypeTag::Int));
        assert!(basic(&versioned, &[]).is_empty());
    }

    #[test]
    fn test_standardize_type() {
        let anomaly = Anomaly {
            kind: AnomalyKind::MultipleTypes,
            field: "price".into(),
            details: AnomalyDetails::TypeCounts(
                [(TypeTag::Int, 3), (TypeTag::String, 1)].into_iter().collect(),
            ),
        };
        let recs = basic(&SchemaDocument::new(), &[anomaly]);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].title, "Standardize type for price");
        assert_eq!(recs[1].details, json!({ "int": 3, "string": 1 }));
    }

    #[test]
    fn test_index_recommendations() {
        let schema = SchemaDocument::new()
            .with_field("email", FieldDescriptor::new(TypeTag::String).with_presence(0.95))
            .with_field("nick", FieldDescriptor::new(TypeTag::String).with_presence(0.3))
            .with_field("name", FieldDescriptor::new(TypeTag::String).with_presence(0.8))
            .with_field("tags", FieldDescriptor::new(TypeTag::Array));

        let recs = indexes(&schema, &["name".to_string()]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].field, "email");
        assert_eq!(recs[0].suggested_index, json!({ "fields": { "email": 1 } }));
    }
}
