//! Execution checkpoints.
//!
//! The executor records where it is after every committed batch so an
//! interrupted run can continue from the last written id instead of from
//! the start of the step.

use rkyv::{Archive, Deserialize, Serialize};

use super::error::MigrationError;
use crate::value::ObjectId;

/// Microseconds since the Unix epoch.
fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

fn storage_error(e: sled::Error) -> MigrationError {
    MigrationError::Storage(crate::error::Error::Storage(e))
}

/// Where a plan's execution stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum CheckpointStatus {
    /// A step is partway through its batches.
    InProgress,
    /// The step at `step_index` finished.
    StepComplete,
    /// Every step finished.
    Complete,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointStatus::InProgress => write!(f, "in_progress"),
            CheckpointStatus::StepComplete => write!(f, "step_complete"),
            CheckpointStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Persisted progress of one plan.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    /// Fingerprint of the plan being executed.
    pub plan_id: String,
    /// The step this checkpoint refers to.
    pub step_index: usize,
    pub status: CheckpointStatus,
    /// Last id of the last committed batch of `step_index`.
    pub last_id: Option<[u8; 12]>,
    /// Documents modified so far within `step_index`.
    pub updated: u64,
    /// When the checkpoint was written (microseconds since epoch).
    pub updated_at: u64,
}

impl ExecutionCheckpoint {
    /// A batch of `step_index` was committed.
    pub fn in_progress(
        plan_id: impl Into<String>,
        step_index: usize,
        last_id: Option<ObjectId>,
        updated: u64,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_index,
            status: CheckpointStatus::InProgress,
            last_id: last_id.map(|id| id.bytes()),
            updated,
            updated_at: current_timestamp(),
        }
    }

    /// `step_index` finished.
    pub fn step_complete(plan_id: impl Into<String>, step_index: usize, updated: u64) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_index,
            status: CheckpointStatus::StepComplete,
            last_id: None,
            updated,
            updated_at: current_timestamp(),
        }
    }

    /// All `step_count` steps finished.
    pub fn complete(plan_id: impl Into<String>, step_count: usize) -> Self {
        Self {
            plan_id: plan_id.into(),
            step_index: step_count,
            status: CheckpointStatus::Complete,
            last_id: None,
            updated: 0,
            updated_at: current_timestamp(),
        }
    }

    pub fn last_object_id(&self) -> Option<ObjectId> {
        self.last_id.map(ObjectId::from_bytes)
    }

    /// First step to run and the id to resume it after.
    pub fn resume_point(&self) -> (usize, Option<ObjectId>) {
        match self.status {
            CheckpointStatus::InProgress => (self.step_index, self.last_object_id()),
            CheckpointStatus::StepComplete => (self.step_index + 1, None),
            CheckpointStatus::Complete => (self.step_index, None),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Complete
    }

    /// Serialize the checkpoint to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize a checkpoint from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

/// Checkpoint persistence, one entry per plan fingerprint.
#[derive(Clone)]
pub struct CheckpointStore {
    tree: sled::Tree,
}

impl CheckpointStore {
    /// Tree name for checkpoints.
    pub const TREE_NAME: &'static str = "migration:checkpoint";

    /// Open or create the checkpoint store.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME).map_err(storage_error)?;
        Ok(Self { tree })
    }

    /// Save a checkpoint, replacing any earlier one for the same plan.
    pub fn save(&self, checkpoint: &ExecutionCheckpoint) -> Result<(), MigrationError> {
        let value = checkpoint.to_bytes()?;
        self.tree
            .insert(Self::plan_key(&checkpoint.plan_id), value)
            .map_err(storage_error)?;
        Ok(())
    }

    /// Load the checkpoint of a plan.
    pub fn load(&self, plan_id: &str) -> Result<Option<ExecutionCheckpoint>, MigrationError> {
        match self.tree.get(Self::plan_key(plan_id)).map_err(storage_error)? {
            Some(bytes) => Ok(Some(ExecutionCheckpoint::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete the checkpoint of a plan.
    pub fn delete(&self, plan_id: &str) -> Result<(), MigrationError> {
        self.tree
            .remove(Self::plan_key(plan_id))
            .map_err(storage_error)?;
        Ok(())
    }

    /// List all checkpoints.
    pub fn list(&self) -> Result<Vec<ExecutionCheckpoint>, MigrationError> {
        let mut checkpoints = Vec::new();
        for result in self.tree.scan_prefix(b"plan:") {
            let (_, value) = result.map_err(storage_error)?;
            checkpoints.push(ExecutionCheckpoint::from_bytes(&value)?);
        }
        Ok(checkpoints)
    }

    /// Flush checkpoints to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.tree.flush().map_err(storage_error)?;
        Ok(())
    }

    fn plan_key(plan_id: &str) -> Vec<u8> {
        let mut key = b"plan:".to_vec();
        key.extend_from_slice(plan_id.as_bytes());
        key
    }
}
