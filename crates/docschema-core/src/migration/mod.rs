//! Schema evolution for document collections.
//!
//! This module provides:
//! - Schema diffing between two snapshots
//! - Drift classification and scoring against an expected schema
//! - Migration plan synthesis with a fixed step order
//! - Batched, rate-limited plan execution
//! - Crash recovery via persisted checkpoints
//!
//! # Step actions
//!
//! | Action | Writes | Filter |
//! |--------|--------|--------|
//! | `add_field`, `fill_missing` | default value | field missing |
//! | `fill_nulls` | default value | field is null |
//! | `remove_field` | unset (needs `allow_remove`) | field exists |
//! | `rename_field` | rename | field exists |
//! | `convert_type`, `convert_array_items` | converted value | field exists |
//! | `wrap_in_array`, `unwrap_array` | converted value | field exists |
//! | `expand_type`, `review_*` | nothing | - |
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::migration::{ExecuteOptions, MigrationExecutor, MigrationPlan};
//!
//! let plan = MigrationPlan::generate(&current, &target);
//! let executor = MigrationExecutor::new(store).with_checkpoints(checkpoints);
//! let options = executor.resume_options(&plan, ExecuteOptions::new())?;
//! let report = executor.execute(&plan, &target, &options).await?;
//! println!("updated {}", report.summary.updated);
//! ```

pub mod convert;
pub mod diff;
pub mod drift;
pub mod error;
pub mod executor;
pub mod plan;
pub mod state;

// Diff types
pub use diff::{DiffSummary, FieldChange, SchemaDiff};

// Drift types
pub use drift::{DriftClassifier, DriftFinding, DriftKind, DriftLevel, DriftReport};

// Error types
pub use error::MigrationError;

// Plan types
pub use plan::{MigrationPlan, MigrationStep, StepAction, StepDetails, Strategy};

// Executor types
pub use convert::Conversion;
pub use executor::{
    ExecuteOptions, ExecutionReport, ExecutionSummary, MigrationExecutor, SkipReason, StepOutcome,
    StepReport,
};

// State types
pub use state::{CheckpointStatus, CheckpointStore, ExecutionCheckpoint};
