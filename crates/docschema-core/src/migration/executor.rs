//! Plan execution against a live collection.
//!
//! Each step becomes a filter plus a single-field update. Matching ids are
//! streamed in ascending order, grouped into batches of `batch_size` and
//! written with one bulk call per batch. After every committed batch the
//! executor records the last id so a failed or interrupted run can continue
//! where it stopped.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::convert::Conversion;
use super::error::MigrationError;
use super::plan::{MigrationPlan, MigrationStep, StepAction, Strategy};
use super::state::{CheckpointStore, ExecutionCheckpoint};
use crate::lattice::TypeTag;
use crate::schema::{FieldDescriptor, SchemaDocument};
use crate::store::{BulkWriteResult, DocumentStore, Filter, UpdateSpec};
use crate::value::{Document, ObjectId, Value, ID_FIELD};

/// Runtime switches for one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Execute `remove_field` steps.
    pub allow_remove: bool,
    /// Count matching documents without writing.
    pub dry_run: bool,
    /// Pause after every full batch.
    pub rate_limit_ms: u64,
    /// Steps before this index are reported as already completed.
    pub start_step: usize,
    /// Resume `start_step` after this id.
    pub resume_from: Option<ObjectId>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_remove(mut self, allow: bool) -> Self {
        self.allow_remove = allow;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_rate_limit_ms(mut self, ms: u64) -> Self {
        self.rate_limit_ms = ms;
        self
    }

    /// Continue from step `start_step`, after `resume_from`.
    pub fn with_resume(mut self, start_step: usize, resume_from: Option<ObjectId>) -> Self {
        self.start_step = start_step;
        self.resume_from = resume_from;
        self
    }
}

/// Why a step did not write anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Step precedes the resume point.
    AlreadyCompleted,
    /// `remove_field` without `allow_remove`.
    DestructiveNotAllowed,
    /// No default could be resolved for a backfill.
    NoDefault,
    /// `rename_field` without a destination name.
    MissingRenameTarget,
    /// No single target type for a conversion.
    UnresolvedTargetType,
    /// The target type already accepts every existing value.
    NoDataChange,
    /// Step is a note for a human.
    ManualReview,
    /// Step names no field.
    InvalidStep,
    /// Step would rewrite or replace `_id`.
    ProtectedField,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied {
        updated: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_id: Option<ObjectId>,
        #[serde(default)]
        conversion_failures: u64,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Per-step entry of an [`ExecutionReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub action: StepAction,
    pub field: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Totals over all steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub strategy: Strategy,
    pub dry_run: bool,
    pub summary: ExecutionSummary,
    pub steps: Vec<StepReport>,
}

impl ExecutionReport {
    fn new(strategy: Strategy, dry_run: bool) -> Self {
        Self {
            strategy,
            dry_run,
            summary: ExecutionSummary::default(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, index: usize, step: &MigrationStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Applied {
                updated,
                conversion_failures,
                ..
            } => {
                self.summary.updated += updated;
                self.summary.errors += conversion_failures;
            }
            StepOutcome::Skipped { .. } => self.summary.skipped += 1,
        }
        self.steps.push(StepReport {
            index,
            action: step.action,
            field: step.field.clone(),
            outcome,
        });
    }

    /// Outcome of the step at `index`.
    pub fn outcome(&self, index: usize) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.index == index)
            .map(|s| &s.outcome)
    }
}

/// A step resolved into a concrete write.
enum PreparedStep {
    Skip(SkipReason),
    Write { filter: Filter, update: UpdateSpec },
}

/// Applies migration plans to a [`DocumentStore`].
pub struct MigrationExecutor {
    store: Arc<dyn DocumentStore>,
    checkpoints: Option<CheckpointStore>,
}

impl MigrationExecutor {
    /// Create an executor without checkpointing.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            checkpoints: None,
        }
    }

    /// Persist progress in `checkpoints`.
    pub fn with_checkpoints(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Options that continue the last recorded run of `plan`.
    ///
    /// Without a checkpoint the options are returned unchanged.
    pub fn resume_options(
        &self,
        plan: &MigrationPlan,
        options: ExecuteOptions,
    ) -> Result<ExecuteOptions, MigrationError> {
        let Some(checkpoints) = &self.checkpoints else {
            return Ok(options);
        };
        match checkpoints.load(&plan.fingerprint()?)? {
            Some(checkpoint) => {
                let (start_step, resume_from) = checkpoint.resume_point();
                info!(
                    start_step,
                    resume_from = ?resume_from,
                    status = %checkpoint.status,
                    "Resuming from checkpoint"
                );
                Ok(options.with_resume(start_step, resume_from))
            }
            None => Ok(options),
        }
    }

    /// Execute `plan`, resolving defaults and types against `target`.
    #[instrument(skip_all, fields(collection = self.store.name(), steps = plan.steps.len()))]
    pub async fn execute(
        &self,
        plan: &MigrationPlan,
        target: &SchemaDocument,
        options: &ExecuteOptions,
    ) -> Result<ExecutionReport, MigrationError> {
        plan.validate()?;
        let mut report = ExecutionReport::new(plan.strategy, options.dry_run);

        if plan.strategy == Strategy::Lazy {
            info!("Lazy strategy, no documents rewritten");
            return Ok(report);
        }

        let plan_id = match (&self.checkpoints, options.dry_run) {
            (Some(_), false) => Some(plan.fingerprint()?),
            _ => None,
        };

        for (index, step) in plan.steps.iter().enumerate() {
            let outcome = if index < options.start_step {
                StepOutcome::Skipped {
                    reason: SkipReason::AlreadyCompleted,
                }
            } else {
                let resume = if index == options.start_step {
                    options.resume_from
                } else {
                    None
                };
                match prepare_step(step, target, options) {
                    PreparedStep::Skip(reason) => {
                        if step.action.is_review() {
                            warn!(
                                action = %step.action,
                                field = %step.field,
                                "Step needs manual review"
                            );
                        } else {
                            debug!(
                                action = %step.action,
                                field = %step.field,
                                ?reason,
                                "Step skipped"
                            );
                        }
                        StepOutcome::Skipped { reason }
                    }
                    PreparedStep::Write { filter, update } => {
                        self.run_step(
                            index,
                            step,
                            &filter,
                            &update,
                            plan.batch_size,
                            resume,
                            options,
                            plan_id.as_deref(),
                        )
                        .await?
                    }
                }
            };

            if index >= options.start_step {
                if let (Some(checkpoints), Some(plan_id)) = (&self.checkpoints, &plan_id) {
                    let updated = match &outcome {
                        StepOutcome::Applied { updated, .. } => *updated,
                        StepOutcome::Skipped { .. } => 0,
                    };
                    checkpoints.save(&ExecutionCheckpoint::step_complete(
                        plan_id.as_str(),
                        index,
                        updated,
                    ))?;
                }
            }
            report.record(index, step, outcome);
        }

        if let (Some(checkpoints), Some(plan_id)) = (&self.checkpoints, &plan_id) {
            checkpoints.save(&ExecutionCheckpoint::complete(
                plan_id.as_str(),
                plan.steps.len(),
            ))?;
            checkpoints.flush()?;
        }

        info!(
            updated = report.summary.updated,
            skipped = report.summary.skipped,
            errors = report.summary.errors,
            dry_run = options.dry_run,
            "Migration plan executed"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        index: usize,
        step: &MigrationStep,
        filter: &Filter,
        update: &UpdateSpec,
        batch_size: usize,
        resume: Option<ObjectId>,
        options: &ExecuteOptions,
        plan_id: Option<&str>,
    ) -> Result<StepOutcome, MigrationError> {
        let failed = |last_id: Option<ObjectId>, source: crate::error::Error| {
            MigrationError::StepFailed {
                step_index: index,
                action: step.action,
                field: step.field.clone(),
                last_id,
                source,
            }
        };

        let mut ids = self.store.find_ids(filter, resume);
        let mut batch: Vec<ObjectId> = Vec::with_capacity(batch_size.min(4096));
        let mut totals = BulkWriteResult::default();
        let mut committed = resume;

        loop {
            let next = ids.try_next().await.map_err(|e| failed(committed, e))?;
            let flush = match next {
                Some(id) => {
                    batch.push(id);
                    batch.len() >= batch_size
                }
                None => !batch.is_empty(),
            };

            if flush {
                let result = if options.dry_run {
                    let n = batch.len() as u64;
                    BulkWriteResult {
                        matched: n,
                        modified: n,
                        conversion_failures: 0,
                    }
                } else {
                    self.store
                        .bulk_update(&batch, update)
                        .await
                        .map_err(|e| failed(committed, e))?
                };
                totals.merge(result);
                committed = batch.last().copied();
                debug!(
                    step = index,
                    batch = batch.len(),
                    modified = result.modified,
                    last_id = ?committed,
                    "Batch committed"
                );

                if let (Some(checkpoints), Some(plan_id)) = (&self.checkpoints, plan_id) {
                    checkpoints.save(&ExecutionCheckpoint::in_progress(
                        plan_id,
                        index,
                        committed,
                        totals.modified,
                    ))?;
                }
                batch.clear();

                if next.is_some() && options.rate_limit_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(options.rate_limit_ms)).await;
                }
            }

            if next.is_none() {
                break;
            }
        }

        if totals.conversion_failures > 0 {
            warn!(
                action = %step.action,
                field = %step.field,
                failures = totals.conversion_failures,
                "Values kept unchanged after failed conversion"
            );
        }
        info!(
            action = %step.action,
            field = %step.field,
            matched = totals.matched,
            updated = totals.modified,
            "Step applied"
        );

        Ok(StepOutcome::Applied {
            updated: totals.modified,
            last_id: committed,
            conversion_failures: totals.conversion_failures,
        })
    }
}

/// Resolve a step into the write it performs.
fn prepare_step(
    step: &MigrationStep,
    target: &SchemaDocument,
    options: &ExecuteOptions,
) -> PreparedStep {
    if step.field.is_empty() {
        return PreparedStep::Skip(SkipReason::InvalidStep);
    }
    if step.field == ID_FIELD || step.details.rename_to.as_deref() == Some(ID_FIELD) {
        return PreparedStep::Skip(SkipReason::ProtectedField);
    }
    let field = step.field.clone();
    let convert = |conversion: Conversion| PreparedStep::Write {
        filter: Filter::Exists(field.clone()),
        update: UpdateSpec::Convert {
            field: field.clone(),
            conversion,
        },
    };

    match step.action {
        StepAction::AddField | StepAction::FillMissing => match resolve_default(step, target) {
            Some(value) => PreparedStep::Write {
                filter: Filter::Missing(field.clone()),
                update: UpdateSpec::Set {
                    field: field.clone(),
                    value,
                },
            },
            None => PreparedStep::Skip(SkipReason::NoDefault),
        },
        StepAction::FillNulls => match resolve_default(step, target) {
            Some(value) => PreparedStep::Write {
                filter: Filter::IsNull(field.clone()),
                update: UpdateSpec::Set {
                    field: field.clone(),
                    value,
                },
            },
            None => PreparedStep::Skip(SkipReason::NoDefault),
        },
        StepAction::RemoveField if !options.allow_remove => {
            PreparedStep::Skip(SkipReason::DestructiveNotAllowed)
        }
        StepAction::RemoveField => PreparedStep::Write {
            filter: Filter::Exists(field.clone()),
            update: UpdateSpec::Unset {
                field: field.clone(),
            },
        },
        StepAction::RenameField => match step.details.rename_to.as_deref() {
            Some(to) if !to.is_empty() => PreparedStep::Write {
                filter: Filter::Exists(field.clone()),
                update: UpdateSpec::Rename {
                    from: field.clone(),
                    to: to.to_string(),
                },
            },
            _ => PreparedStep::Skip(SkipReason::MissingRenameTarget),
        },
        StepAction::ConvertType => match resolve_target_type(step, target) {
            Some(target) => convert(Conversion::ToType { target }),
            None => PreparedStep::Skip(SkipReason::UnresolvedTargetType),
        },
        StepAction::ConvertArrayItems => match resolve_item_type(step, target) {
            Some(target) => convert(Conversion::ArrayItems { target }),
            None => PreparedStep::Skip(SkipReason::UnresolvedTargetType),
        },
        StepAction::WrapInArray => convert(Conversion::WrapInArray),
        StepAction::UnwrapArray => convert(Conversion::UnwrapArray),
        StepAction::ExpandType => PreparedStep::Skip(SkipReason::NoDataChange),
        StepAction::ReviewTypeChange | StepAction::ReviewRequired | StepAction::ReviewNulls => {
            PreparedStep::Skip(SkipReason::ManualReview)
        }
    }
}

/// The descriptor a step migrates towards.
fn target_descriptor<'a>(
    step: &'a MigrationStep,
    target: &'a SchemaDocument,
) -> Option<&'a FieldDescriptor> {
    step.details.to.as_ref().or_else(|| target.get(&step.field))
}

/// Default to write: the step's own, then the target's, then one derived
/// from the target type.
fn resolve_default(step: &MigrationStep, target: &SchemaDocument) -> Option<Value> {
    if let Some(default) = &step.details.default {
        return Some(Value::from_json(default.clone()));
    }
    let schema_field = target.get(&step.field);
    if let Some(default) = schema_field.and_then(|d| d.default.as_ref()) {
        return Some(Value::from_json(default.clone()));
    }
    let desc = schema_field.or(step.details.to.as_ref())?;
    desc.field_type.single().and_then(builtin_default)
}

/// Zero value of a type.
pub fn builtin_default(tag: TypeTag) -> Option<Value> {
    let value = match tag {
        TypeTag::String => Value::String(String::new()),
        TypeTag::Int => Value::Int32(0),
        TypeTag::Long => Value::Int64(0),
        TypeTag::Double => Value::Double(0.0),
        TypeTag::Decimal => Value::Decimal("0".to_string()),
        TypeTag::Bool => Value::Bool(false),
        TypeTag::Array => Value::Array(Vec::new()),
        TypeTag::Object => Value::Object(Document::new()),
        TypeTag::Date => Value::now(),
        TypeTag::Null => Value::Null,
        _ => return None,
    };
    Some(value)
}

fn resolve_target_type(step: &MigrationStep, target: &SchemaDocument) -> Option<TypeTag> {
    target_descriptor(step, target).and_then(|d| d.field_type.single_scalar())
}

fn resolve_item_type(step: &MigrationStep, target: &SchemaDocument) -> Option<TypeTag> {
    step.details
        .item_type
        .filter(|t| t.is_scalar())
        .or_else(|| target_descriptor(step, target).and_then(|d| d.item_type()))
}
