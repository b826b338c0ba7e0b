//! Schema synthesis from sampled documents.
//!
//! The [`Synthesizer`] draws a bounded sample from a [`DocumentStore`],
//! accumulates per-path statistics with an explicit worklist, and turns them
//! into a [`SchemaDocument`] plus anomalies, a confidence score and
//! recommendations.
//!
//! [`DocumentStore`]: crate::store::DocumentStore
//! [`SchemaDocument`]: crate::schema::SchemaDocument

mod accumulator;
mod anomaly;
pub mod recommend;
mod report;
mod synthesizer;

pub use accumulator::{FieldStats, StatsAccumulator};
pub use anomaly::{detect_anomalies, Anomaly, AnomalyDetails, AnomalyKind};
pub use recommend::{IndexRecommendation, Recommendation, RecommendationKind};
pub use report::{AnalysisReport, FieldSummary};
pub use synthesizer::{Synthesis, Synthesizer};

/// Limits for sampling and traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerConfig {
    /// Maximum number of documents to sample.
    pub sample_size: usize,
    /// Objects at this depth or deeper are not expanded.
    pub max_depth: usize,
    /// Leading array elements inspected per array.
    pub max_array_items: usize,
    /// Distinct sample values kept per path.
    pub max_sample_values: usize,
    /// Characters kept per rendered sample value.
    pub max_sample_len: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            sample_size: 10_000,
            max_depth: 8,
            max_array_items: 5,
            max_sample_values: 5,
            max_sample_len: 120,
        }
    }
}

impl SynthesizerConfig {
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_array_items(mut self, items: usize) -> Self {
        self.max_array_items = items;
        self
    }

    pub fn with_max_sample_values(mut self, values: usize) -> Self {
        self.max_sample_values = values;
        self
    }

    pub fn with_max_sample_len(mut self, len: usize) -> Self {
        self.max_sample_len = len;
        self
    }
}

/// Round to a fixed number of decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// True for paths that address nested fields.
pub(crate) fn is_nested_path(path: &str) -> bool {
    path.contains('.') || path.contains("[]")
}
