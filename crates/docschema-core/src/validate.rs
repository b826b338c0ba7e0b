//! Document validation against a schema.
//!
//! [`SchemaValidator`] checks sampled documents after the fact. A
//! [`ValidationRule`] attached to a collection with
//! [`SledStore::apply_validation`](crate::store::SledStore::apply_validation)
//! checks documents as they are written instead.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use crate::error::Error;
use crate::lattice::{classify, TypeSpec, TypeTag};
use crate::schema::SchemaDocument;
use crate::store::{sample_documents, DocumentStore};
use crate::value::{Document, ID_FIELD};

/// Issues found in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIssues {
    #[serde(rename = "_id")]
    pub id: String,
    pub issues: Vec<String>,
}

/// Outcome of validating a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub collection: String,
    pub total_documents: u64,
    pub sampled_documents: u64,
    pub valid: u64,
    pub invalid: u64,
    /// At most `max_errors` entries; `invalid` counts all of them.
    pub errors: Vec<DocumentIssues>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.invalid == 0
    }
}

/// Checks documents against a [`SchemaDocument`].
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: SchemaDocument,
    max_errors: usize,
}

impl SchemaValidator {
    pub const DEFAULT_MAX_ERRORS: usize = 100;

    pub fn new(schema: SchemaDocument) -> Self {
        Self {
            schema,
            max_errors: Self::DEFAULT_MAX_ERRORS,
        }
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }

    /// Issues in one document; empty when it conforms.
    pub fn check(&self, doc: &Document) -> Vec<String> {
        check_document(&self.schema, doc)
    }

    /// Validate documents already in hand.
    pub fn validate_documents(
        &self,
        collection: &str,
        total: u64,
        docs: &[Document],
    ) -> ValidationReport {
        let mut valid = 0u64;
        let mut errors = Vec::new();

        for doc in docs {
            let issues = self.check(doc);
            if issues.is_empty() {
                valid += 1;
            } else if errors.len() < self.max_errors {
                errors.push(DocumentIssues {
                    id: doc
                        .get(ID_FIELD)
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    issues,
                });
            }
        }

        ValidationReport {
            collection: collection.to_string(),
            total_documents: total,
            sampled_documents: docs.len() as u64,
            valid,
            invalid: docs.len() as u64 - valid,
            errors,
            validated_at: Utc::now(),
        }
    }

    /// Sample up to `sample_size` documents from `store` and validate them.
    #[instrument(skip(self, store), fields(collection = store.name()))]
    pub async fn validate_collection<S>(
        &self,
        store: &S,
        sample_size: usize,
    ) -> Result<ValidationReport, Error>
    where
        S: DocumentStore + ?Sized,
    {
        let (total, docs) = sample_documents(store, sample_size).await?;
        let report = self.validate_documents(store.name(), total, &docs);
        info!(
            sampled = report.sampled_documents,
            valid = report.valid,
            invalid = report.invalid,
            "Validation complete"
        );
        Ok(report)
    }

    /// Equivalent `$jsonSchema` collection validator.
    pub fn validator_document(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .schema
            .properties
            .iter()
            .map(|(field, desc)| {
                let rule = json!({ "bsonType": bson_type(&desc.field_type) });
                (field.clone(), rule)
            })
            .collect();

        json!({
            "$jsonSchema": {
                "bsonType": "object",
                "required": self.schema.required,
                "properties": properties,
            }
        })
    }
}

/// Which writes a stored [`ValidationRule`] checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// No checks.
    Off,
    /// Inserts, and updates of documents that were valid before the update.
    #[default]
    Moderate,
    /// Every insert and update.
    Strict,
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Moderate => "moderate",
            ValidationLevel::Strict => "strict",
        })
    }
}

/// What happens to a write that fails a stored [`ValidationRule`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    /// Reject the whole write.
    #[default]
    Error,
    /// Log the issues and write anyway.
    Warn,
}

impl fmt::Display for ValidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationAction::Error => "error",
            ValidationAction::Warn => "warn",
        })
    }
}

/// A schema enforced on a collection's writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub schema: SchemaDocument,
    #[serde(default)]
    pub level: ValidationLevel,
    #[serde(default)]
    pub action: ValidationAction,
}

impl ValidationRule {
    pub fn new(schema: SchemaDocument) -> Self {
        Self {
            schema,
            level: ValidationLevel::default(),
            action: ValidationAction::default(),
        }
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_action(mut self, action: ValidationAction) -> Self {
        self.action = action;
        self
    }

    /// Issues for a document being inserted.
    pub fn check_insert(&self, doc: &Document) -> Vec<String> {
        match self.level {
            ValidationLevel::Off => Vec::new(),
            _ => check_document(&self.schema, doc),
        }
    }

    /// Issues for an update that turns `before` into `after`.
    pub fn check_update(&self, before: &Document, after: &Document) -> Vec<String> {
        match self.level {
            ValidationLevel::Off => Vec::new(),
            ValidationLevel::Moderate if !check_document(&self.schema, before).is_empty() => {
                Vec::new()
            }
            _ => check_document(&self.schema, after),
        }
    }

    /// The validator with its level and action, shaped like a `collMod`
    /// command body.
    pub fn command_document(&self) -> serde_json::Value {
        let validator = SchemaValidator::new(self.schema.clone()).validator_document();
        json!({
            "validator": validator,
            "validationLevel": self.level.to_string(),
            "validationAction": self.action.to_string(),
        })
    }
}

fn check_document(schema: &SchemaDocument, doc: &Document) -> Vec<String> {
    let mut issues = Vec::new();

    for field in &schema.required {
        if doc.get(field).map_or(true, |v| v.is_null()) {
            issues.push(format!("Missing required field: {field}"));
        }
    }

    for (field, desc) in &schema.properties {
        let Some(value) = doc.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        if !accepts(&desc.field_type, classify(value)) {
            issues.push(format!(
                "Type mismatch for {field}: expected {}",
                desc.field_type
            ));
        }
    }

    issues
}

/// Whether a value of type `found` satisfies `expected`. Numeric widening
/// is allowed: `double` accepts `int` and `long`, `long` accepts `int`.
fn accepts(expected: &TypeSpec, found: TypeTag) -> bool {
    if expected.contains(found) {
        return true;
    }
    match found {
        TypeTag::Int => expected.contains(TypeTag::Long) || expected.contains(TypeTag::Double),
        TypeTag::Long => expected.contains(TypeTag::Double),
        _ => false,
    }
}

fn bson_type(spec: &TypeSpec) -> serde_json::Value {
    match spec.single() {
        Some(tag) => json!(tag.as_str()),
        None => json!(spec.tags().iter().map(|t| t.as_str()).collect::<Vec<_>>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use crate::store::{SledStore, StoreConfig};

    fn people() -> SchemaDocument {
        SchemaDocument::new()
            .with_field("name", FieldDescriptor::new(TypeTag::String).required())
            .with_field("age", FieldDescriptor::new(TypeTag::Int))
    }

    #[test]
    fn test_valid_document() {
        let validator = SchemaValidator::new(people());
        let doc = Document::new().with("name", "John").with("age", 30);
        assert!(validator.check(&doc).is_empty());
    }

    #[test]
    fn test_missing_and_null_required() {
        let validator = SchemaValidator::new(people());

        let issues = validator.check(&Document::new().with("age", 30));
        assert_eq!(issues, vec!["Missing required field: name".to_string()]);

        let issues = validator.check(&Document::new().with("name", crate::value::Value::Null));
        assert_eq!(issues, vec!["Missing required field: name".to_string()]);
    }

    #[test]
    fn test_type_mismatch() {
        let validator = SchemaValidator::new(people());
        let issues = validator.check(&Document::new().with("name", "John").with("age", "thirty"));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("Type mismatch for age"));
    }

    #[test]
    fn test_optional_field_missing_is_ok() {
        let schema = people().with_field("nickname", FieldDescriptor::new(TypeTag::String));
        let validator = SchemaValidator::new(schema);
        assert!(validator.check(&Document::new().with("name", "John")).is_empty());
    }

    #[test]
    fn test_double_accepts_int_and_long() {
        let schema =
            SchemaDocument::new().with_field("value", FieldDescriptor::new(TypeTag::Double));
        let validator = SchemaValidator::new(schema);

        assert!(validator.check(&Document::new().with("value", 42)).is_empty());
        assert!(validator.check(&Document::new().with("value", 42i64)).is_empty());
        assert!(validator.check(&Document::new().with("value", 42.5)).is_empty());
        assert_eq!(validator.check(&Document::new().with("value", "42")).len(), 1);
    }

    #[test]
    fn test_error_list_is_capped() {
        let validator = SchemaValidator::new(people()).with_max_errors(2);
        let docs: Vec<Document> = (0..5).map(|i| Document::new().with("age", i)).collect();

        let report = validator.validate_documents("people", 5, &docs);
        assert_eq!(report.invalid, 5);
        assert_eq!(report.valid, 0);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_validator_document() {
        let schema = people().with_field(
            "score",
            FieldDescriptor::new(TypeSpec::from_tags([TypeTag::Int, TypeTag::Double])),
        );
        let v = SchemaValidator::new(schema).validator_document();

        assert_eq!(v["$jsonSchema"]["bsonType"], "object");
        assert_eq!(v["$jsonSchema"]["required"], json!(["name"]));
        assert_eq!(v["$jsonSchema"]["properties"]["name"], json!({"bsonType": "string"}));
        assert_eq!(
            v["$jsonSchema"]["properties"]["score"],
            json!({"bsonType": ["int", "double"]})
        );
    }

    #[test]
    fn test_empty_schema_validator() {
        let v = SchemaValidator::new(SchemaDocument::new()).validator_document();
        assert_eq!(v["$jsonSchema"]["required"], json!([]));
        assert_eq!(v["$jsonSchema"]["properties"], json!({}));
    }

    #[test]
    fn test_rule_levels() {
        let valid = Document::new().with("name", "a");
        let invalid = Document::new().with("age", 1);

        let off = ValidationRule::new(people()).with_level(ValidationLevel::Off);
        assert!(off.check_insert(&invalid).is_empty());

        let moderate = ValidationRule::new(people());
        assert_eq!(moderate.level, ValidationLevel::Moderate);
        assert_eq!(moderate.check_insert(&invalid).len(), 1);
        assert_eq!(moderate.check_update(&valid, &invalid).len(), 1);
        assert!(moderate.check_update(&invalid, &invalid).is_empty());

        let strict = ValidationRule::new(people()).with_level(ValidationLevel::Strict);
        assert_eq!(strict.check_update(&invalid, &invalid).len(), 1);
    }

    #[test]
    fn test_rule_command_document() {
        let rule = ValidationRule::new(people()).with_action(ValidationAction::Warn);
        let cmd = rule.command_document();

        assert_eq!(cmd["validationLevel"], "moderate");
        assert_eq!(cmd["validationAction"], "warn");
        assert_eq!(cmd["validator"]["$jsonSchema"]["required"], json!(["name"]));
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: ValidationRule =
            serde_json::from_value(json!({ "schema": { "properties": {} } })).unwrap();
        assert_eq!(rule.level, ValidationLevel::Moderate);
        assert_eq!(rule.action, ValidationAction::Error);
    }

    #[tokio::test]
    async fn test_validate_collection() {
        let db = SledStore::open(&StoreConfig::temporary()).unwrap();
        let people_coll = db.collection("people").unwrap();
        people_coll
            .insert_many(vec![
                Document::new().with("name", "a").with("age", 1),
                Document::new().with("age", 2),
            ])
            .await
            .unwrap();

        let report = SchemaValidator::new(people())
            .validate_collection(&people_coll, 100)
            .await
            .unwrap();

        assert_eq!(report.total_documents, 2);
        assert_eq!(report.sampled_documents, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.errors[0].issues, vec!["Missing required field: name".to_string()]);
    }
}
