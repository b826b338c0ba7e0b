//! Analysis report envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Anomaly, FieldStats, Recommendation};
use crate::lattice::TypeTag;
use crate::schema::SchemaDocument;

/// Serialized form of [`FieldStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub count: u64,
    pub null_count: u64,
    pub types: BTreeMap<TypeTag, u64>,
    pub sample_values: Vec<String>,
}

impl From<&FieldStats> for FieldSummary {
    fn from(stats: &FieldStats) -> Self {
        Self {
            count: stats.count,
            null_count: stats.null_count,
            types: stats.type_counts().iter().copied().collect(),
            sample_values: stats.sample_values.clone(),
        }
    }
}

/// Everything one analysis run produced. Written to schema files as is;
/// readers only consume the `schema` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub collection: String,
    pub total_documents: u64,
    pub sampled_documents: u64,
    pub sample_size: usize,
    pub schema: SchemaDocument,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<Recommendation>,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
    #[serde(default)]
    pub field_stats: BTreeMap<String, FieldSummary>,
}
