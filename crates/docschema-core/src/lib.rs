//! docschema core - schema inference, diffing, drift scoring and migrations.
//!
//! This crate infers the implicit structure of schemaless document
//! collections and evolves it:
//!
//! 1. [`analysis`] samples a collection and synthesizes a [`SchemaDocument`].
//! 2. [`migration::diff`] compares two schema snapshots.
//! 3. [`migration::drift`] classifies and scores drift against an expected schema.
//! 4. [`migration::plan`] turns a pair of schemas into a [`MigrationPlan`], and
//!    [`migration::executor`] applies it to a live [`store::DocumentStore`] in
//!    batches that can be resumed.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod analysis;
pub mod error;
pub mod lattice;
pub mod migration;
pub mod monitor;
pub mod schema;
pub mod store;
pub mod validate;
pub mod value;

pub use analysis::{AnalysisReport, Anomaly, AnomalyKind, Synthesizer, SynthesizerConfig};
pub use error::Error;
pub use lattice::{classify, TypeSpec, TypeTag};
pub use migration::{
    CheckpointStore, DriftClassifier, DriftReport, ExecuteOptions, ExecutionReport,
    MigrationError, MigrationExecutor, MigrationPlan, MigrationStep, SchemaDiff, StepAction,
    Strategy,
};
pub use monitor::{DriftMonitor, MonitorConfig, WebhookNotifier};
pub use schema::{FieldDescriptor, SchemaDocument};
pub use store::{
    BulkWriteResult, Collection, DocumentStore, Filter, SledStore, StoreConfig, UpdateSpec,
};
pub use validate::{
    SchemaValidator, ValidationAction, ValidationLevel, ValidationReport, ValidationRule,
};
pub use value::{Document, ObjectId, Value};
