//! Migration-specific error types.

use thiserror::Error;

use super::plan::StepAction;
use crate::value::ObjectId;

fn checkpoint(last_id: &Option<ObjectId>) -> String {
    match last_id {
        Some(id) => id.to_hex(),
        None => "none".to_string(),
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A store call failed while a step was running.
    #[error(
        "step {step_index} ({action} {field}) failed after checkpoint {}: {source}",
        checkpoint(.last_id)
    )]
    StepFailed {
        /// The index of the failed step.
        step_index: usize,
        /// The action of the failed step.
        action: StepAction,
        /// The field the step targets.
        field: String,
        /// Last id of the last fully written batch; resume from here.
        last_id: Option<ObjectId>,
        /// The underlying store error.
        #[source]
        source: crate::error::Error,
    },

    /// The plan cannot be executed as written.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Storage error outside of a step.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl MigrationError {
    /// Resume point carried by a step failure.
    pub fn resume_point(&self) -> Option<(usize, Option<ObjectId>)> {
        match self {
            MigrationError::StepFailed {
                step_index,
                last_id,
                ..
            } => Some((*step_index, *last_id)),
            _ => None,
        }
    }
}
