//! Per-path statistics.

use std::collections::BTreeMap;

use crate::lattice::{classify, TypeTag};
use crate::value::{Document, Value, ID_FIELD};

use super::SynthesizerConfig;

/// Observations for one field path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStats {
    /// Occurrences, nulls included.
    pub count: u64,
    pub null_count: u64,
    /// Non-null type histogram in first-seen order.
    type_counts: Vec<(TypeTag, u64)>,
    /// Distinct rendered values.
    pub sample_values: Vec<String>,
    /// Occurrences that were embedded documents.
    pub object_count: u64,
    /// Inspected array elements that were embedded documents.
    pub object_items: u64,
    /// Inspected array elements that were null.
    pub item_nulls: u64,
    item_type_counts: Vec<(TypeTag, u64)>,
}

fn bump(counts: &mut Vec<(TypeTag, u64)>, tag: TypeTag) {
    match counts.iter_mut().find(|(t, _)| *t == tag) {
        Some((_, n)) => *n += 1,
        None => counts.push((tag, 1)),
    }
}

/// Arg-max with the first-seen entry winning ties.
fn arg_max(counts: &[(TypeTag, u64)]) -> Option<(TypeTag, u64)> {
    let mut best: Option<(TypeTag, u64)> = None;
    for &(tag, n) in counts {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((tag, n));
        }
    }
    best
}

impl FieldStats {
    pub fn type_counts(&self) -> &[(TypeTag, u64)] {
        &self.type_counts
    }

    pub fn item_type_counts(&self) -> &[(TypeTag, u64)] {
        &self.item_type_counts
    }

    pub fn type_count(&self, tag: TypeTag) -> u64 {
        self.type_counts
            .iter()
            .find(|(t, _)| *t == tag)
            .map_or(0, |(_, n)| *n)
    }

    /// Most frequent non-null type.
    pub fn primary_type(&self) -> Option<TypeTag> {
        arg_max(&self.type_counts).map(|(tag, _)| tag)
    }

    /// Occurrences of the most frequent type.
    pub fn dominant_count(&self) -> u64 {
        arg_max(&self.type_counts).map_or(0, |(_, n)| n)
    }

    /// Most frequent non-null type among inspected array elements.
    pub fn primary_item_type(&self) -> Option<TypeTag> {
        arg_max(&self.item_type_counts).map(|(tag, _)| tag)
    }

    pub fn null_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.null_count as f64 / self.count as f64
        }
    }

    fn record_sample(&mut self, value: &Value, config: &SynthesizerConfig) {
        if self.sample_values.len() >= config.max_sample_values {
            return;
        }
        let mut rendered = value.to_string();
        if rendered.chars().count() > config.max_sample_len {
            rendered = rendered.chars().take(config.max_sample_len).collect();
            rendered.push_str("...");
        }
        if !self.sample_values.contains(&rendered) {
            self.sample_values.push(rendered);
        }
    }

    fn record_item(&mut self, item: &Value) {
        match item {
            Value::Null => self.item_nulls += 1,
            Value::Object(_) => {
                self.object_items += 1;
                bump(&mut self.item_type_counts, classify(item));
            }
            other => bump(&mut self.item_type_counts, classify(other)),
        }
    }
}

/// Accumulates [`FieldStats`] across the documents of one analysis run.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    config: SynthesizerConfig,
    fields: BTreeMap<String, FieldStats>,
    documents: u64,
}

impl StatsAccumulator {
    pub fn new(config: SynthesizerConfig) -> Self {
        Self {
            config,
            fields: BTreeMap::new(),
            documents: 0,
        }
    }

    /// Walk one document. The top-level `_id` is skipped.
    pub fn add_document(&mut self, doc: &Document) {
        self.documents += 1;

        let mut work: Vec<(&Document, String, usize)> = vec![(doc, String::new(), 0)];
        while let Some((object, prefix, depth)) = work.pop() {
            if depth >= self.config.max_depth {
                continue;
            }
            for (key, value) in object {
                if depth == 0 && key == ID_FIELD {
                    continue;
                }
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };

                let stats = self.fields.entry(path.clone()).or_default();
                stats.count += 1;
                if value.is_null() {
                    stats.null_count += 1;
                    continue;
                }
                bump(&mut stats.type_counts, classify(value));
                stats.record_sample(value, &self.config);

                match value {
                    Value::Object(inner) => {
                        stats.object_count += 1;
                        work.push((inner, path, depth + 1));
                    }
                    Value::Array(items) => {
                        let item_prefix = format!("{path}[]");
                        for item in items.iter().take(self.config.max_array_items) {
                            stats.record_item(item);
                            if let Value::Object(inner) = item {
                                work.push((inner, item_prefix.clone(), depth + 1));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Documents seen so far.
    pub fn documents(&self) -> u64 {
        self.documents
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldStats> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldStats> {
        self.fields
    }
}
