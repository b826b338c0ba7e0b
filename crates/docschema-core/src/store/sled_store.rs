//! sled-backed document store.

use std::ops::Bound;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sled::{Db, IVec, Tree};
use tracing::{debug, instrument, warn};

use super::{BulkWriteResult, DocumentStore, Filter, StoreConfig, UpdateSpec};
use crate::error::Error;
use crate::validate::{ValidationAction, ValidationRule};
use crate::value::{Document, ObjectId, Value, ID_FIELD};

/// Tree name prefix for collections.
const COLLECTION_PREFIX: &str = "collection:";

/// Tree holding one validation rule per collection name.
const VALIDATION_TREE: &str = "meta:validation";

/// A sled database holding any number of collections.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: &StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        Ok(Self { db })
    }

    /// Open (creating if needed) a collection.
    pub fn collection(&self, name: &str) -> Result<Collection, Error> {
        let tree = self.db.open_tree(format!("{COLLECTION_PREFIX}{name}"))?;
        Ok(Collection {
            name: name.to_string(),
            tree,
            rules: self.rules()?,
        })
    }

    /// Attach a validation rule to a collection, replacing any previous one.
    /// Later inserts and updates through any handle are checked against it.
    pub fn apply_validation(&self, collection: &str, rule: &ValidationRule) -> Result<(), Error> {
        self.collection(collection)?;
        let bytes = serde_json::to_vec(rule).map_err(|e| Error::Serialization(e.to_string()))?;
        self.rules()?.insert(collection.as_bytes(), bytes)?;
        debug!(collection, level = %rule.level, action = %rule.action, "Validation applied");
        Ok(())
    }

    /// The rule attached to a collection, if any.
    pub fn validation_rule(&self, collection: &str) -> Result<Option<ValidationRule>, Error> {
        load_rule(&self.rules()?, collection)
    }

    /// Detach a collection's rule. Returns whether one was present.
    pub fn remove_validation(&self, collection: &str) -> Result<bool, Error> {
        Ok(self.rules()?.remove(collection.as_bytes())?.is_some())
    }

    fn rules(&self) -> Result<Tree, Error> {
        Ok(self.db.open_tree(VALIDATION_TREE)?)
    }

    /// Names of collections created so far.
    pub fn collection_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .iter()
            .filter_map(|raw| {
                std::str::from_utf8(raw)
                    .ok()
                    .and_then(|n| n.strip_prefix(COLLECTION_PREFIX))
                    .map(str::to_string)
            })
            .collect()
    }

    /// The underlying database, for sibling trees such as checkpoints.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

/// One collection: ObjectId keys in big-endian byte order, JSON documents.
#[derive(Clone)]
pub struct Collection {
    name: String,
    tree: Tree,
    rules: Tree,
}

impl Collection {
    /// Fetch one document.
    pub fn get(&self, id: ObjectId) -> Result<Option<Document>, Error> {
        match self.tree.get(id.bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// The validation rule currently attached, if any.
    pub fn validation_rule(&self) -> Result<Option<ValidationRule>, Error> {
        load_rule(&self.rules, &self.name)
    }

    /// Reject or log a write according to the rule's action.
    fn enforce(
        &self,
        rule: &ValidationRule,
        id: ObjectId,
        issues: Vec<String>,
    ) -> Result<(), Error> {
        if issues.is_empty() {
            return Ok(());
        }
        match rule.action {
            ValidationAction::Error => Err(Error::DocumentValidation {
                id: id.to_hex(),
                issues,
            }),
            ValidationAction::Warn => {
                warn!(collection = %self.name, %id, ?issues, "Document failed validation");
                Ok(())
            }
        }
    }

    fn documents(&self) -> impl Iterator<Item = Result<(ObjectId, Document), Error>> + '_ {
        self.tree.iter().map(|entry| -> Result<(ObjectId, Document), Error> {
            let (key, bytes) = entry?;
            Ok((ObjectId::from_slice(&key)?, decode(&bytes)?))
        })
    }
}

fn load_rule(rules: &Tree, collection: &str) -> Result<Option<ValidationRule>, Error> {
    match rules.get(collection.as_bytes())? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Deserialization(e.to_string())),
        None => Ok(None),
    }
}

fn decode(bytes: &IVec) -> Result<Document, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

fn encode(doc: &Document) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(doc).map_err(|e| Error::Serialization(e.to_string()))
}

/// Reservoir sampling (algorithm R) over a fallible iterator.
fn reservoir_sample<T, I>(iter: I, size: usize, rng: &mut impl Rng) -> Result<Vec<T>, Error>
where
    I: Iterator<Item = Result<T, Error>>,
{
    let mut reservoir = Vec::with_capacity(size);
    if size == 0 {
        return Ok(reservoir);
    }
    for (seen, item) in iter.enumerate() {
        let item = item?;
        if reservoir.len() < size {
            reservoir.push(item);
        } else {
            let slot = rng.gen_range(0..=seen);
            if slot < size {
                reservoir[slot] = item;
            }
        }
    }
    Ok(reservoir)
}

#[async_trait]
impl DocumentStore for Collection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, filter: &Filter) -> Result<u64, Error> {
        if *filter == Filter::All {
            return Ok(self.tree.len() as u64);
        }
        let mut count = 0u64;
        for entry in self.documents() {
            let (_, doc) = entry?;
            if filter.matches(&doc) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn sample(&self, size: usize) -> Result<Vec<Document>, Error> {
        let mut rng = StdRng::from_entropy();
        let docs = self.documents().map(|entry| entry.map(|(_, doc)| doc));
        reservoir_sample(docs, size, &mut rng)
    }

    async fn find(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>, Error> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();
        for entry in self.documents() {
            if found.len() >= limit {
                break;
            }
            let (_, doc) = entry?;
            if filter.matches(&doc) {
                found.push(doc);
            }
        }
        Ok(found)
    }

    fn find_ids<'a>(
        &'a self,
        filter: &'a Filter,
        after: Option<ObjectId>,
    ) -> BoxStream<'a, Result<ObjectId, Error>> {
        let iter = match after {
            Some(id) => self.tree.range::<Vec<u8>, _>((
                Bound::Excluded(id.bytes().to_vec()),
                Bound::Unbounded,
            )),
            None => self.tree.iter(),
        };
        let ids = iter.filter_map(move |entry| {
            let (key, bytes) = match entry {
                Ok(kv) => kv,
                Err(e) => return Some(Err(Error::from(e))),
            };
            match decode(&bytes) {
                Ok(doc) if filter.matches(&doc) => Some(ObjectId::from_slice(&key)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        });
        stream::iter(ids).boxed()
    }

    #[instrument(skip(self, ids, update), fields(collection = %self.name, batch = ids.len()))]
    async fn bulk_update(
        &self,
        ids: &[ObjectId],
        update: &UpdateSpec,
    ) -> Result<BulkWriteResult, Error> {
        let mut result = BulkWriteResult::default();
        let mut batch = sled::Batch::default();
        let rule = self.validation_rule()?;

        for id in ids {
            let Some(bytes) = self.tree.get(id.bytes())? else {
                continue;
            };
            result.matched += 1;

            let mut doc = decode(&bytes)?;
            let before = rule.as_ref().map(|_| doc.clone());
            let outcome = update.apply(&mut doc);
            if outcome.conversion_failed {
                result.conversion_failures += 1;
            }
            if outcome.modified {
                if let (Some(rule), Some(before)) = (&rule, &before) {
                    self.enforce(rule, *id, rule.check_update(before, &doc))?;
                }
                batch.insert(&id.bytes()[..], encode(&doc)?);
                result.modified += 1;
            }
        }

        self.tree.apply_batch(batch)?;
        debug!(
            matched = result.matched,
            modified = result.modified,
            "Applied bulk update"
        );
        Ok(result)
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<ObjectId>, Error> {
        let mut batch = sled::Batch::default();
        let mut ids = Vec::with_capacity(docs.len());
        let rule = self.validation_rule()?;

        for mut doc in docs {
            let id = match doc.get(ID_FIELD) {
                Some(Value::ObjectId(id)) => *id,
                Some(other) => {
                    return Err(Error::InvalidData(format!(
                        "unsupported _id value: {other}"
                    )))
                }
                None => {
                    let id = ObjectId::new();
                    doc.insert(ID_FIELD, Value::ObjectId(id));
                    id
                }
            };
            if let Some(rule) = &rule {
                self.enforce(rule, id, rule.check_insert(&doc))?;
            }
            batch.insert(&id.bytes()[..], encode(&doc)?);
            ids.push(id);
        }

        self.tree.apply_batch(batch)?;
        debug!(collection = %self.name, inserted = ids.len(), "Inserted documents");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn test_collection() -> Collection {
        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        store.collection("people").unwrap()
    }

    fn person(name: &str, age: Option<i32>) -> Document {
        let doc = Document::new().with("name", name);
        match age {
            Some(age) => doc.with("age", age),
            None => doc,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ordered_ids() {
        let coll = test_collection();
        let ids = coll
            .insert_many(vec![person("a", Some(1)), person("b", None)])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
        let stored = coll.get(ids[0]).unwrap().unwrap();
        assert_eq!(stored.id(), Some(ids[0]));
        assert_eq!(coll.count(&Filter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_foreign_id() {
        let coll = test_collection();
        let doc = Document::new().with(ID_FIELD, "custom");
        assert!(coll.insert_many(vec![doc]).await.is_err());
    }

    #[tokio::test]
    async fn test_find_ids_after_and_filter() {
        let coll = test_collection();
        let ids = coll
            .insert_many(vec![
                person("a", None),
                person("b", Some(2)),
                person("c", None),
                person("d", None),
            ])
            .await
            .unwrap();

        let missing = Filter::Missing("age".into());
        let all: Vec<ObjectId> = coll.find_ids(&missing, None).try_collect().await.unwrap();
        assert_eq!(all, vec![ids[0], ids[2], ids[3]]);

        let rest: Vec<ObjectId> = coll
            .find_ids(&missing, Some(ids[2]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rest, vec![ids[3]]);
        assert_eq!(coll.count(&missing).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bulk_update_counts_modified() {
        let coll = test_collection();
        let ids = coll
            .insert_many(vec![person("a", Some(0)), person("b", Some(5))])
            .await
            .unwrap();

        let update = UpdateSpec::Set {
            field: "age".into(),
            value: Value::Int32(0),
        };
        let result = coll.bulk_update(&ids, &update).await.unwrap();
        assert_eq!(result.matched, 2);
        assert_eq!(result.modified, 1);

        let again = coll.bulk_update(&ids, &update).await.unwrap();
        assert_eq!(again.modified, 0);
    }

    #[tokio::test]
    async fn test_sample_bounds() {
        let coll = test_collection();
        let docs = (0..20).map(|i| person("x", Some(i))).collect();
        coll.insert_many(docs).await.unwrap();

        assert_eq!(coll.sample(5).await.unwrap().len(), 5);
        assert_eq!(coll.sample(50).await.unwrap().len(), 20);
        assert!(coll.sample(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_with_limit() {
        let coll = test_collection();
        let docs = (0..10).map(|i| person("x", Some(i))).collect();
        coll.insert_many(docs).await.unwrap();

        let found = coll.find(&Filter::All, Some(3)).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].get("age"), Some(&Value::Int32(0)));
    }

    fn people_rule() -> ValidationRule {
        use crate::lattice::TypeTag;
        use crate::schema::{FieldDescriptor, SchemaDocument};

        ValidationRule::new(
            SchemaDocument::new()
                .with_field("name", FieldDescriptor::new(TypeTag::String).required())
                .with_field("age", FieldDescriptor::new(TypeTag::Int)),
        )
    }

    #[tokio::test]
    async fn test_validation_rejects_invalid_insert() {
        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        let coll = store.collection("people").unwrap();
        store.apply_validation("people", &people_rule()).unwrap();

        let err = coll
            .insert_many(vec![person("a", Some(1)), Document::new().with("age", 2)])
            .await
            .unwrap_err();
        match err {
            Error::DocumentValidation { issues, .. } => {
                assert_eq!(issues, vec!["Missing required field: name".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(coll.count(&Filter::All).await.unwrap(), 0);

        coll.insert_many(vec![person("a", Some(1))]).await.unwrap();
        assert_eq!(coll.count(&Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validation_warn_and_remove() {
        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        let coll = store.collection("people").unwrap();
        let rule = people_rule().with_action(ValidationAction::Warn);
        store.apply_validation("people", &rule).unwrap();
        assert_eq!(store.validation_rule("people").unwrap(), Some(rule));

        coll.insert_many(vec![Document::new().with("age", "x")]).await.unwrap();
        assert_eq!(coll.count(&Filter::All).await.unwrap(), 1);

        assert!(store.remove_validation("people").unwrap());
        assert!(!store.remove_validation("people").unwrap());
        assert_eq!(coll.validation_rule().unwrap(), None);
    }

    #[tokio::test]
    async fn test_moderate_skips_already_invalid_documents() {
        use crate::validate::ValidationLevel;

        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        let coll = store.collection("people").unwrap();
        let ids = coll
            .insert_many(vec![person("a", Some(1)), Document::new().with("age", 2)])
            .await
            .unwrap();
        store.apply_validation("people", &people_rule()).unwrap();

        let bad_age = UpdateSpec::Set {
            field: "age".into(),
            value: Value::from("old"),
        };
        // The second document already lacks a name, so moderate lets it through.
        let result = coll.bulk_update(&ids[1..], &bad_age).await.unwrap();
        assert_eq!(result.modified, 1);
        assert!(coll.bulk_update(&ids[..1], &bad_age).await.is_err());
        assert_eq!(coll.get(ids[0]).unwrap().unwrap().get("age"), Some(&Value::Int32(1)));

        let strict = people_rule().with_level(ValidationLevel::Strict);
        store.apply_validation("people", &strict).unwrap();
        let fix_age = UpdateSpec::Set {
            field: "age".into(),
            value: Value::Int32(3),
        };
        assert!(coll.bulk_update(&ids[1..], &fix_age).await.is_err());
    }

    #[test]
    fn test_collection_names() {
        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        store.collection("a").unwrap();
        store.collection("b").unwrap();
        let mut names = store.collection_names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
