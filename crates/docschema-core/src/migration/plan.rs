//! Migration plan synthesis.
//!
//! A plan is a pure function of a source and a target schema. Steps are
//! ordered: added fields, removed fields, type actions for changed fields,
//! backfills for newly required fields, then backfills for fields that
//! stopped being nullable.
//!
//! Type actions follow a fixed precedence, first match wins:
//!
//! 1. target is exactly `array`, source has no `array`: `wrap_in_array`
//! 2. source is exactly `array`, target has no `array`: `unwrap_array`
//! 3. target strictly contains source: `expand_type`
//! 4. source strictly contains target, target a single scalar: `convert_type`
//! 5. both exactly `array` with a different item type: `convert_array_items`
//! 6. target a single scalar: `convert_type`
//! 7. anything else: `review_type_change`

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::diff::{DiffSummary, FieldChange, SchemaDiff};
use super::error::MigrationError;
use crate::lattice::TypeTag;
use crate::schema::{FieldDescriptor, SchemaDocument};

/// How a plan is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Rewrite matching documents now.
    #[default]
    Eager,
    /// Leave documents alone; readers adapt on access.
    Lazy,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Eager => write!(f, "eager"),
            Strategy::Lazy => write!(f, "lazy"),
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    AddField,
    RemoveField,
    RenameField,
    ConvertType,
    WrapInArray,
    UnwrapArray,
    ConvertArrayItems,
    ExpandType,
    FillMissing,
    FillNulls,
    ReviewTypeChange,
    ReviewRequired,
    ReviewNulls,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::AddField => "add_field",
            StepAction::RemoveField => "remove_field",
            StepAction::RenameField => "rename_field",
            StepAction::ConvertType => "convert_type",
            StepAction::WrapInArray => "wrap_in_array",
            StepAction::UnwrapArray => "unwrap_array",
            StepAction::ConvertArrayItems => "convert_array_items",
            StepAction::ExpandType => "expand_type",
            StepAction::FillMissing => "fill_missing",
            StepAction::FillNulls => "fill_nulls",
            StepAction::ReviewTypeChange => "review_type_change",
            StepAction::ReviewRequired => "review_required",
            StepAction::ReviewNulls => "review_nulls",
        }
    }

    /// Steps that only flag something for a human.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            StepAction::ReviewTypeChange | StepAction::ReviewRequired | StepAction::ReviewNulls
        )
    }

    /// Steps that discard data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, StepAction::RemoveField)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a step. Every entry is optional; which ones matter depends
/// on the action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStepDetails")]
pub struct StepDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<FieldDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<FieldDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<TypeTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Hand-written plans may give a rename target as `to: "<name>"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Name(String),
    Field(FieldDescriptor),
}

#[derive(Deserialize)]
struct RawStepDetails {
    #[serde(default)]
    from: Option<FieldDescriptor>,
    #[serde(default)]
    to: Option<RawTarget>,
    #[serde(default)]
    rename_to: Option<String>,
    #[serde(default)]
    default: Option<serde_json::Value>,
    #[serde(default)]
    item_type: Option<TypeTag>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<RawStepDetails> for StepDetails {
    fn from(raw: RawStepDetails) -> Self {
        let (to, named) = match raw.to {
            Some(RawTarget::Field(desc)) => (Some(desc), None),
            Some(RawTarget::Name(name)) => (None, Some(name)),
            None => (None, None),
        };
        Self {
            from: raw.from,
            to,
            rename_to: raw.rename_to.or(named),
            default: raw.default,
            item_type: raw.item_type,
            reason: raw.reason,
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub action: StepAction,
    pub field: String,
    #[serde(default)]
    pub details: StepDetails,
}

impl MigrationStep {
    pub fn new(action: StepAction, field: impl Into<String>) -> Self {
        Self {
            action,
            field: field.into(),
            details: StepDetails::default(),
        }
    }

    pub fn with_details(mut self, details: StepDetails) -> Self {
        self.details = details;
        self
    }

    /// Rename step.
    pub fn rename(field: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(StepAction::RenameField, field).with_details(StepDetails {
            rename_to: Some(to.into()),
            ..Default::default()
        })
    }
}

/// An ordered list of steps plus execution parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub steps: Vec<MigrationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiffSummary>,
}

fn default_batch_size() -> usize {
    MigrationPlan::DEFAULT_BATCH_SIZE
}

impl MigrationPlan {
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// Plan the migration from `from` to `to`.
    pub fn generate(from: &SchemaDocument, to: &SchemaDocument) -> Self {
        let diff = SchemaDiff::compute(from, to);
        Self::from_diff(&diff, from, to)
    }

    /// Plan that reverts `generate(from, to)`.
    pub fn rollback(from: &SchemaDocument, to: &SchemaDocument) -> Self {
        Self::generate(to, from)
    }

    /// Plan from an already computed diff.
    pub fn from_diff(diff: &SchemaDiff, from: &SchemaDocument, to: &SchemaDocument) -> Self {
        let mut steps = Vec::new();

        for field in &diff.added {
            let target = to.get(field);
            steps.push(
                MigrationStep::new(StepAction::AddField, field.as_str()).with_details(StepDetails {
                    to: target.cloned(),
                    default: target.and_then(|d| d.default.clone()),
                    ..Default::default()
                }),
            );
        }

        for field in &diff.removed {
            steps.push(
                MigrationStep::new(StepAction::RemoveField, field.as_str()).with_details(
                    StepDetails {
                        from: from.get(field).cloned(),
                        ..Default::default()
                    },
                ),
            );
        }

        steps.extend(diff.changed.iter().filter_map(type_step));

        for field in from.field_names() {
            let Some(target) = to.get(field) else {
                continue;
            };
            if to.is_required(field) && !from.is_required(field) {
                steps.push(backfill_step(
                    field,
                    target,
                    StepAction::FillMissing,
                    StepAction::ReviewRequired,
                    "field became required and the target has no default",
                ));
            }
        }

        for change in diff.changed.iter().filter(|c| c.nullability_tightened()) {
            steps.push(backfill_step(
                &change.field,
                &change.to,
                StepAction::FillNulls,
                StepAction::ReviewNulls,
                "field is no longer nullable and the target has no default",
            ));
        }

        Self {
            strategy: Strategy::Eager,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            steps,
            summary: Some(diff.summary),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the plan can be executed.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.batch_size == 0 {
            return Err(MigrationError::InvalidPlan(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable content hash used to key checkpoints.
    pub fn fingerprint(&self) -> Result<String, MigrationError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| MigrationError::Serialization(e.to_string()))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(self).map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, MigrationError> {
        let plan: Self =
            serde_json::from_str(text).map_err(|e| MigrationError::Deserialization(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }
}

fn item_tags(desc: &FieldDescriptor) -> Option<BTreeSet<TypeTag>> {
    desc.items.as_ref().map(|items| items.field_type.tags())
}

/// Type action for one changed field, if its type or item type moved.
fn type_step(change: &FieldChange) -> Option<MigrationStep> {
    let source = &change.from.field_type;
    let target = &change.to.field_type;

    let action = if target.is_only(TypeTag::Array) && !source.contains(TypeTag::Array) {
        StepAction::WrapInArray
    } else if source.is_only(TypeTag::Array) && !target.contains(TypeTag::Array) {
        StepAction::UnwrapArray
    } else if target.is_strict_superset_of(source) {
        StepAction::ExpandType
    } else if source.is_strict_superset_of(target) && target.single_scalar().is_some() {
        StepAction::ConvertType
    } else if source == target {
        let items_changed =
            change.to.items.is_some() && item_tags(&change.from) != item_tags(&change.to);
        if !(target.is_only(TypeTag::Array) && items_changed) {
            return None;
        }
        match change.to.item_type() {
            Some(_) => StepAction::ConvertArrayItems,
            None => StepAction::ReviewTypeChange,
        }
    } else if target.single_scalar().is_some() {
        StepAction::ConvertType
    } else {
        StepAction::ReviewTypeChange
    };

    let mut details = StepDetails {
        from: Some(change.from.clone()),
        to: Some(change.to.clone()),
        ..Default::default()
    };
    match action {
        StepAction::ConvertArrayItems => details.item_type = change.to.item_type(),
        StepAction::ExpandType => {
            details.reason = Some("existing values already satisfy the target type".to_string())
        }
        StepAction::ReviewTypeChange => {
            details.reason = Some(format!(
                "no automatic conversion from {source} to {}",
                describe_target(&change.to)
            ))
        }
        _ => {}
    }

    Some(MigrationStep::new(action, change.field.as_str()).with_details(details))
}

fn describe_target(desc: &FieldDescriptor) -> String {
    match &desc.items {
        Some(items) if desc.field_type.is_only(TypeTag::Array) => {
            format!("{}<{}>", desc.field_type, items.field_type)
        }
        _ => desc.field_type.to_string(),
    }
}

fn backfill_step(
    field: &str,
    target: &FieldDescriptor,
    fill: StepAction,
    review: StepAction,
    reason: &str,
) -> MigrationStep {
    match &target.default {
        Some(default) => MigrationStep::new(fill, field).with_details(StepDetails {
            default: Some(default.clone()),
            ..Default::default()
        }),
        None => MigrationStep::new(review, field).with_details(StepDetails {
            reason: Some(reason.to_string()),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::TypeSpec;
    use serde_json::json;

    fn union(tags: &[TypeTag]) -> TypeSpec {
        TypeSpec::from_tags(tags.iter().copied())
    }

    fn field(tag: TypeTag) -> FieldDescriptor {
        FieldDescriptor::new(tag)
    }

    fn one(name: &str, desc: FieldDescriptor) -> SchemaDocument {
        SchemaDocument::new().with_field(name, desc)
    }

    fn actions(plan: &MigrationPlan) -> Vec<(StepAction, &str)> {
        plan.steps
            .iter()
            .map(|s| (s.action, s.field.as_str()))
            .collect()
    }

    #[test]
    fn test_add_then_convert() {
        let from = one("age", field(TypeTag::Int));
        let to = SchemaDocument::new()
            .with_field("age", field(TypeTag::String))
            .with_field("name", field(TypeTag::String));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(
            actions(&plan),
            vec![
                (StepAction::AddField, "name"),
                (StepAction::ConvertType, "age")
            ]
        );
        assert_eq!(plan.strategy, Strategy::Eager);
        assert_eq!(plan.batch_size, 1000);
    }

    #[test]
    fn test_identical_schemas_plan_nothing() {
        let s = one("a", field(TypeTag::Int).with_presence(1.0));
        assert!(MigrationPlan::generate(&s, &s).is_empty());
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let scalar = one("tags", field(TypeTag::String));
        let array = one("tags", field(TypeTag::Array));

        let plan = MigrationPlan::generate(&scalar, &array);
        assert_eq!(actions(&plan), vec![(StepAction::WrapInArray, "tags")]);

        let plan = MigrationPlan::generate(&array, &scalar);
        assert_eq!(actions(&plan), vec![(StepAction::UnwrapArray, "tags")]);
    }

    #[test]
    fn test_expand_type() {
        let from = one("v", field(TypeTag::Int));
        let to = one("v", FieldDescriptor::new(union(&[TypeTag::Int, TypeTag::String])));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(actions(&plan), vec![(StepAction::ExpandType, "v")]);
        assert!(plan.steps[0].details.reason.is_some());
    }

    #[test]
    fn test_narrow_to_scalar_converts() {
        let from = one("v", FieldDescriptor::new(union(&[TypeTag::Int, TypeTag::String])));
        let to = one("v", field(TypeTag::String));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(actions(&plan), vec![(StepAction::ConvertType, "v")]);
    }

    #[test]
    fn test_narrow_to_union_needs_review() {
        let from = one(
            "v",
            FieldDescriptor::new(union(&[TypeTag::Int, TypeTag::String, TypeTag::Bool])),
        );
        let to = one("v", FieldDescriptor::new(union(&[TypeTag::Int, TypeTag::Bool])));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(actions(&plan), vec![(StepAction::ReviewTypeChange, "v")]);
    }

    #[test]
    fn test_array_item_change() {
        let from = one("ids", field(TypeTag::Array).with_items(field(TypeTag::Int)));
        let to = one("ids", field(TypeTag::Array).with_items(field(TypeTag::String)));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(actions(&plan), vec![(StepAction::ConvertArrayItems, "ids")]);
        assert_eq!(plan.steps[0].details.item_type, Some(TypeTag::String));
    }

    #[test]
    fn test_array_items_equal_no_type_step() {
        let from = one(
            "ids",
            field(TypeTag::Array)
                .with_items(field(TypeTag::Int))
                .with_presence(0.5),
        );
        let to = one(
            "ids",
            field(TypeTag::Array)
                .with_items(field(TypeTag::Int))
                .with_presence(0.9),
        );
        assert!(MigrationPlan::generate(&from, &to).is_empty());
    }

    #[test]
    fn test_to_container_needs_review() {
        let from = one("meta", field(TypeTag::String));
        let to = one("meta", field(TypeTag::Object));
        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(actions(&plan), vec![(StepAction::ReviewTypeChange, "meta")]);
    }

    #[test]
    fn test_newly_required_fields() {
        let from = SchemaDocument::new()
            .with_field("a", field(TypeTag::Int))
            .with_field("b", field(TypeTag::Int));
        let to = SchemaDocument::new()
            .with_field("a", field(TypeTag::Int).required().with_default(json!(0)))
            .with_field("b", field(TypeTag::Int).required());

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(
            actions(&plan),
            vec![
                (StepAction::FillMissing, "a"),
                (StepAction::ReviewRequired, "b")
            ]
        );
        assert_eq!(plan.steps[0].details.default, Some(json!(0)));
    }

    #[test]
    fn test_nullability_tightening() {
        let from = SchemaDocument::new()
            .with_field("a", field(TypeTag::Int).nullable())
            .with_field("b", field(TypeTag::Int).nullable());
        let to = SchemaDocument::new()
            .with_field("a", field(TypeTag::Int).with_default(json!(-1)))
            .with_field("b", field(TypeTag::Int));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(
            actions(&plan),
            vec![(StepAction::FillNulls, "a"), (StepAction::ReviewNulls, "b")]
        );
    }

    #[test]
    fn test_step_ordering() {
        let from = SchemaDocument::new()
            .with_field("gone", field(TypeTag::Int))
            .with_field("n", field(TypeTag::Int).nullable())
            .with_field("t", field(TypeTag::Int));
        let to = SchemaDocument::new()
            .with_field("new", field(TypeTag::Int))
            .with_field("n", field(TypeTag::Int).required().with_default(json!(1)))
            .with_field("t", field(TypeTag::String));

        let plan = MigrationPlan::generate(&from, &to);
        assert_eq!(
            actions(&plan),
            vec![
                (StepAction::AddField, "new"),
                (StepAction::RemoveField, "gone"),
                (StepAction::ConvertType, "t"),
                (StepAction::FillMissing, "n"),
                (StepAction::FillNulls, "n"),
            ]
        );
        assert_eq!(
            plan.summary,
            Some(DiffSummary {
                added: 1,
                removed: 1,
                changed: 2
            })
        );
    }

    #[test]
    fn test_rollback_reverses() {
        let from = one("a", field(TypeTag::Int));
        let to = SchemaDocument::new()
            .with_field("a", field(TypeTag::Int))
            .with_field("b", field(TypeTag::String));

        let rollback = MigrationPlan::rollback(&from, &to);
        assert_eq!(actions(&rollback), vec![(StepAction::RemoveField, "b")]);
    }

    #[test]
    fn test_plan_json_shape() {
        let plan = MigrationPlan::generate(&SchemaDocument::new(), &one("x", field(TypeTag::Int)));
        let v: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();

        assert_eq!(v["strategy"], "eager");
        assert_eq!(v["batch_size"], 1000);
        assert_eq!(v["steps"][0]["action"], "add_field");
        assert_eq!(v["steps"][0]["details"]["to"]["type"], "int");
    }

    #[test]
    fn test_legacy_rename_target() {
        let plan = MigrationPlan::from_json(
            r#"{"strategy": "eager", "batch_size": 10,
                "steps": [{"action": "rename_field", "field": "a", "details": {"to": "b"}}]}"#,
        )
        .unwrap();
        assert_eq!(plan.steps[0].details.rename_to.as_deref(), Some("b"));
        assert!(plan.steps[0].details.to.is_none());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = MigrationPlan::from_json(r#"{"batch_size": 0, "steps": []}"#).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = MigrationPlan::generate(&SchemaDocument::new(), &one("x", field(TypeTag::Int)));
        let b = a.clone().with_batch_size(10);
        assert_eq!(a.fingerprint().unwrap(), a.clone().fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
