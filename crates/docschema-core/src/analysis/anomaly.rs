//! Data-shape anomalies.
//!
//! Anomalies are records attached to an analysis, never errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{round_to, FieldStats};
use crate::lattice::TypeTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    /// More than one non-null type observed.
    MultipleTypes,
    /// Present in fewer than 5% of documents.
    LowPresence,
    /// Usually present but null more than 30% of the time.
    HighNullRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnomalyDetails {
    TypeCounts(BTreeMap<TypeTag, u64>),
    Presence { presence: f64 },
    NullRate { null_rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub field: String,
    pub details: AnomalyDetails,
}

/// Scan accumulated statistics for anomalies, in path order.
pub fn detect_anomalies(fields: &BTreeMap<String, FieldStats>, documents: u64) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (field, stats) in fields {
        if stats.type_counts().len() > 1 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MultipleTypes,
                field: field.clone(),
                details: AnomalyDetails::TypeCounts(stats.type_counts().iter().copied().collect()),
            });
        }

        let presence = if documents == 0 {
            0.0
        } else {
            stats.count as f64 / documents as f64
        };
        if presence > 0.0 && presence < 0.05 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::LowPresence,
                field: field.clone(),
                details: AnomalyDetails::Presence {
                    presence: round_to(presence, 4),
                },
            });
        }

        if stats.count > 0 {
            let null_rate = stats.null_rate();
            if null_rate > 0.3 && presence > 0.5 {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::HighNullRate,
                    field: field.clone(),
                    details: AnomalyDetails::NullRate {
                        null_rate: round_to(null_rate, 4),
                    },
                });
            }
        }
    }

    anomalies
}
