//! Drift classification and scoring.
//!
//! Drift compares an expected schema against one re-derived from live data.
//! Every diff entry becomes a finding with a level, and the diff as a whole
//! gets a score:
//!
//! | Change | Level | Score |
//! |--------|-------|-------|
//! | field added | info | 0.05 |
//! | field removed | warning | 0.15 |
//! | type narrowed (observed ⊆ expected, nothing else changed) | info | 0.10 |
//! | other type change | critical | 0.25 |
//! | other change, presence moved > 0.2 | warning | 0.10 |
//! | other change | info | 0.10 |

use serde::{Deserialize, Serialize};

use super::diff::{FieldChange, SchemaDiff};
use crate::analysis::round_to;
use crate::lattice::TypeSpec;
use crate::schema::SchemaDocument;

const ADDED_WEIGHT: f64 = 0.05;
const REMOVED_WEIGHT: f64 = 0.15;
const TYPE_CHANGE_WEIGHT: f64 = 0.25;
const OTHER_CHANGE_WEIGHT: f64 = 0.10;
const PRESENCE_WARNING_DELTA: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for DriftLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftLevel::Info => write!(f, "info"),
            DriftLevel::Warning => write!(f, "warning"),
            DriftLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    FieldAdded,
    FieldRemoved,
    TypeNarrowed,
    TypeChanged,
    FieldChanged,
}

/// One classified drift item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftFinding {
    pub level: DriftLevel,
    #[serde(rename = "type")]
    pub kind: DriftKind,
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_type: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_type: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_delta: Option<f64>,
}

/// A diff plus severity findings and an aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    #[serde(flatten)]
    pub diff: SchemaDiff,
    pub severity: Vec<DriftFinding>,
    pub drift_score: f64,
    pub has_drift: bool,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

impl DriftReport {
    pub fn count(&self, level: DriftLevel) -> usize {
        self.severity.iter().filter(|f| f.level == level).count()
    }

    /// Highest level among the findings.
    pub fn max_level(&self) -> Option<DriftLevel> {
        self.severity.iter().map(|f| f.level).max()
    }
}

/// Classifies drift between an expected and an observed schema.
pub struct DriftClassifier;

impl DriftClassifier {
    /// Diff, classify and score.
    pub fn classify(expected: &SchemaDocument, observed: &SchemaDocument) -> DriftReport {
        let diff = SchemaDiff::compute(expected, observed);
        let severity = Self::findings(&diff);
        let drift_score = Self::score(&diff);

        let mut report = DriftReport {
            diff,
            severity,
            drift_score,
            has_drift: drift_score > 0.0,
            critical_count: 0,
            warning_count: 0,
            info_count: 0,
        };
        report.critical_count = report.count(DriftLevel::Critical);
        report.warning_count = report.count(DriftLevel::Warning);
        report.info_count = report.count(DriftLevel::Info);
        report
    }

    /// A type-only change where every observed tag was already expected.
    pub fn is_compatible_narrowing(change: &FieldChange) -> bool {
        change.only_type_changed() && change.to.field_type.is_subset_of(&change.from.field_type)
    }

    fn is_incompatible_type_change(change: &FieldChange) -> bool {
        change.type_changed() && !Self::is_compatible_narrowing(change)
    }

    /// Weighted drift score, 2 decimals, not clamped.
    pub fn score(diff: &SchemaDiff) -> f64 {
        let changed: f64 = diff
            .changed
            .iter()
            .map(|c| {
                if Self::is_incompatible_type_change(c) {
                    TYPE_CHANGE_WEIGHT
                } else {
                    OTHER_CHANGE_WEIGHT
                }
            })
            .sum();

        round_to(
            diff.added.len() as f64 * ADDED_WEIGHT
                + diff.removed.len() as f64 * REMOVED_WEIGHT
                + changed,
            2,
        )
    }

    fn findings(diff: &SchemaDiff) -> Vec<DriftFinding> {
        let mut items =
            Vec::with_capacity(diff.added.len() + diff.removed.len() + diff.changed.len());

        for field in &diff.added {
            items.push(DriftFinding {
                level: DriftLevel::Info,
                kind: DriftKind::FieldAdded,
                field: field.clone(),
                message: format!("New field '{field}' detected in live data"),
                from_type: None,
                to_type: None,
                presence_delta: None,
            });
        }

        for field in &diff.removed {
            items.push(DriftFinding {
                level: DriftLevel::Warning,
                kind: DriftKind::FieldRemoved,
                field: field.clone(),
                message: format!("Field '{field}' missing from live data"),
                from_type: None,
                to_type: None,
                presence_delta: None,
            });
        }

        for change in &diff.changed {
            let field = &change.field;
            let (from, to) = (&change.from.field_type, &change.to.field_type);

            let finding = if Self::is_compatible_narrowing(change) {
                DriftFinding {
                    level: DriftLevel::Info,
                    kind: DriftKind::TypeNarrowed,
                    field: field.clone(),
                    message: format!("Type narrowed for '{field}': {from} -> {to}"),
                    from_type: Some(from.clone()),
                    to_type: Some(to.clone()),
                    presence_delta: None,
                }
            } else if change.type_changed() {
                DriftFinding {
                    level: DriftLevel::Critical,
                    kind: DriftKind::TypeChanged,
                    field: field.clone(),
                    message: format!("Type changed for '{field}': {from} -> {to}"),
                    from_type: Some(from.clone()),
                    to_type: Some(to.clone()),
                    presence_delta: None,
                }
            } else {
                let delta = change.presence_delta();
                DriftFinding {
                    level: if delta > PRESENCE_WARNING_DELTA {
                        DriftLevel::Warning
                    } else {
                        DriftLevel::Info
                    },
                    kind: DriftKind::FieldChanged,
                    field: field.clone(),
                    message: format!("Field '{field}' definition changed"),
                    from_type: None,
                    to_type: None,
                    presence_delta: Some(round_to(delta, 4)),
                }
            };
            items.push(finding);
        }

        items
    }
}
