//! Schema synthesizer.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{
    detect_anomalies, is_nested_path, recommend, round_to, AnalysisReport, Anomaly, FieldStats,
    FieldSummary, StatsAccumulator, SynthesizerConfig,
};
use crate::error::Error;
use crate::lattice::TypeTag;
use crate::schema::{FieldDescriptor, SchemaDocument};
use crate::store::{sample_documents, DocumentStore};
use crate::value::Document;

/// Pure result of synthesizing a set of documents.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub schema: SchemaDocument,
    pub anomalies: Vec<Anomaly>,
    pub confidence: f64,
    pub documents: u64,
    pub field_stats: BTreeMap<String, FieldStats>,
}

/// Infers a [`SchemaDocument`] from sampled documents.
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(config: SynthesizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Sample a collection and produce a full analysis report.
    ///
    /// The sample is uniform-random when the collection is larger than the
    /// configured sample size, and exhaustive in id order otherwise.
    #[instrument(skip(self, store), fields(collection = store.name()))]
    pub async fn analyze<S>(&self, store: &S) -> Result<AnalysisReport, Error>
    where
        S: DocumentStore + ?Sized,
    {
        let (total, docs) = sample_documents(store, self.config.sample_size).await?;
        debug!(total, sampled = docs.len(), "Sampled documents");

        let synthesis = self.synthesize(&docs);
        let recommendations = recommend::basic(&synthesis.schema, &synthesis.anomalies);

        info!(
            fields = synthesis.schema.len(),
            anomalies = synthesis.anomalies.len(),
            confidence = synthesis.confidence,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            collection: store.name().to_string(),
            total_documents: total,
            sampled_documents: synthesis.documents,
            sample_size: self.config.sample_size,
            field_stats: synthesis
                .field_stats
                .iter()
                .map(|(path, stats)| (path.clone(), FieldSummary::from(stats)))
                .collect(),
            schema: synthesis.schema,
            anomalies: synthesis.anomalies,
            recommendations,
            confidence: synthesis.confidence,
            analyzed_at: Utc::now(),
        })
    }

    /// Synthesize a schema from documents already in hand.
    pub fn synthesize(&self, docs: &[Document]) -> Synthesis {
        let mut acc = StatsAccumulator::new(self.config.clone());
        for doc in docs {
            acc.add_document(doc);
        }
        let documents = acc.documents();
        let fields = acc.into_fields();

        let schema = build_schema(&fields, documents);
        let anomalies = detect_anomalies(&fields, documents);
        let confidence = confidence_score(&fields, documents);

        Synthesis {
            schema,
            anomalies,
            confidence,
            documents,
            field_stats: fields,
        }
    }
}

fn build_schema(fields: &BTreeMap<String, FieldStats>, documents: u64) -> SchemaDocument {
    let mut schema = SchemaDocument::new();
    if documents == 0 {
        return schema;
    }
    for (path, stats) in fields {
        if is_nested_path(path) {
            continue;
        }
        if let Some(desc) = describe(path, stats, documents, fields) {
            schema = schema.with_field(path.clone(), desc);
        }
    }
    schema
}

/// Descriptor for one path, relative to `denominator` parent occurrences.
/// `None` when the path never held a non-null value.
fn describe(
    path: &str,
    stats: &FieldStats,
    denominator: u64,
    fields: &BTreeMap<String, FieldStats>,
) -> Option<FieldDescriptor> {
    let primary = stats.primary_type()?;
    let presence = if denominator == 0 {
        0.0
    } else {
        round_to(stats.count as f64 / denominator as f64, 4)
    };

    let mut desc = FieldDescriptor::new(primary).with_presence(presence);
    desc.nullable = stats.null_count > 0;
    desc.required = presence > 0.9 && stats.null_rate() < 0.1;

    match primary {
        TypeTag::Object => {
            let children = describe_children(&format!("{path}."), stats.object_count, fields);
            if !children.is_empty() {
                desc.properties = Some(children);
            }
        }
        TypeTag::Array => {
            if let Some(item_type) = stats.primary_item_type() {
                let mut items = FieldDescriptor::new(item_type);
                items.nullable = stats.item_nulls > 0;
                if item_type == TypeTag::Object {
                    let children =
                        describe_children(&format!("{path}[]."), stats.object_items, fields);
                    if !children.is_empty() {
                        items.properties = Some(children);
                    }
                }
                desc.items = Some(Box::new(items));
            }
        }
        _ => {}
    }

    Some(desc)
}

fn describe_children(
    prefix: &str,
    denominator: u64,
    fields: &BTreeMap<String, FieldStats>,
) -> BTreeMap<String, FieldDescriptor> {
    fields
        .range(prefix.to_string()..)
        .take_while(|(path, _)| path.starts_with(prefix))
        .filter_map(|(path, stats)| {
            let name = &path[prefix.len()..];
            if is_nested_path(name) {
                return None;
            }
            describe(path, stats, denominator, fields).map(|d| (name.to_string(), d))
        })
        .collect()
}

/// Mean of per-path type consistency and presence clarity, 3 decimals.
fn confidence_score(fields: &BTreeMap<String, FieldStats>, documents: u64) -> f64 {
    if fields.is_empty() || documents == 0 {
        return 0.0;
    }

    let mut scores = Vec::with_capacity(fields.len() * 2);
    for stats in fields.values() {
        if !stats.type_counts().is_empty() {
            scores.push(stats.dominant_count() as f64 / stats.count as f64);
        }
        let presence = stats.count as f64 / documents as f64;
        scores.push(if !(0.05..=0.95).contains(&presence) {
            1.0
        } else {
            presence.min(1.0 - presence) * 2.0
        });
    }

    round_to(scores.iter().sum::<f64>() / scores.len() as f64, 3)
}
