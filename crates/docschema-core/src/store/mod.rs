//! Document storage.
//!
//! [`DocumentStore`] is the narrow interface the analysis, validation and
//! migration layers use to reach a live collection. [`SledStore`] provides
//! it on top of sled, one tree per collection.

mod config;
mod filter;
mod sled_store;
mod update;

pub use config::StoreConfig;
pub use filter::Filter;
pub use sled_store::{Collection, SledStore};
pub use update::{ApplyOutcome, UpdateSpec};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::{Document, ObjectId, ID_FIELD};

/// Counters returned by a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteResult {
    /// Documents found for the given ids.
    pub matched: u64,
    /// Documents whose stored content changed.
    pub modified: u64,
    /// Documents where a conversion kept the original value.
    pub conversion_failures: u64,
}

impl BulkWriteResult {
    pub fn merge(&mut self, other: BulkWriteResult) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.conversion_failures += other.conversion_failures;
    }
}

/// Count the collection, then draw up to `size` documents from it.
///
/// The draw is uniform-random when the collection is larger than `size`
/// and exhaustive in id order otherwise.
pub async fn sample_documents<S>(store: &S, size: usize) -> Result<(u64, Vec<Document>), Error>
where
    S: DocumentStore + ?Sized,
{
    let total = store.count(&Filter::All).await?;
    let target = usize::try_from(total).unwrap_or(usize::MAX).min(size);

    let docs = if target == 0 {
        Vec::new()
    } else if target as u64 >= total {
        store.find(&Filter::All, None).await?
    } else {
        store.sample(target).await?
    };
    Ok((total, docs))
}

/// A collection of documents addressed by ordered [`ObjectId`]s.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Count documents matching the filter.
    async fn count(&self, filter: &Filter) -> Result<u64, Error>;

    /// Uniform random sample of up to `size` documents.
    async fn sample(&self, size: usize) -> Result<Vec<Document>, Error>;

    /// Documents matching the filter, in id order.
    async fn find(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>, Error>;

    /// Ids of matching documents strictly greater than `after`, ascending.
    fn find_ids<'a>(
        &'a self,
        filter: &'a Filter,
        after: Option<ObjectId>,
    ) -> BoxStream<'a, Result<ObjectId, Error>>;

    /// Apply one update to every listed document.
    async fn bulk_update(
        &self,
        ids: &[ObjectId],
        update: &UpdateSpec,
    ) -> Result<BulkWriteResult, Error>;

    /// Insert documents, assigning an `_id` to those without one.
    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<ObjectId>, Error>;

    /// Fields covered by an index.
    async fn indexed_fields(&self) -> Result<Vec<String>, Error> {
        Ok(vec![ID_FIELD.to_string()])
    }
}
