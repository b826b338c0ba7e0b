//! End-to-end tests: analyze, persist, diff, drift, plan.

use docschema_core::migration::DriftLevel;
use docschema_core::schema::{load_schema, save_report};
use docschema_core::store::DocumentStore;
use docschema_core::{
    AnomalyKind, Document, DriftClassifier, FieldDescriptor, MigrationPlan, SchemaDiff,
    SchemaDocument, SledStore, StepAction, StoreConfig, Synthesizer, SynthesizerConfig, TypeSpec,
    TypeTag, Value,
};

fn users(count: i32) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let doc = Document::new()
                .with("name", format!("user{i}"))
                .with("age", if i % 4 == 0 { Value::from(format!("{i}")) } else { Value::from(i) })
                .with(
                    "address",
                    Document::new().with("city", "Oslo").with("zip", i),
                );
            if i % 2 == 0 {
                doc.with("email", format!("u{i}@example.com"))
            } else {
                doc
            }
        })
        .collect()
}

#[tokio::test]
async fn test_analyze_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledStore::open(&StoreConfig::new(dir.path().join("data"))).unwrap();
    let coll = store.collection("users").unwrap();
    coll.insert_many(users(40)).await.unwrap();

    let report = Synthesizer::new(SynthesizerConfig::default())
        .analyze(&coll)
        .await
        .unwrap();

    assert_eq!(report.total_documents, 40);
    assert_eq!(report.sampled_documents, 40);
    let schema = &report.schema;
    assert_eq!(
        schema.get("age").map(|d| d.field_type.clone()),
        Some(TypeSpec::Scalar(TypeTag::Int))
    );
    assert_eq!(schema.get("email").and_then(|d| d.presence), Some(0.5));
    assert!(schema.is_required("name"));
    assert!(!schema.is_required("email"));
    assert!(report
        .anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::MultipleTypes && a.field == "age"));
    assert!(report.confidence > 0.0 && report.confidence <= 1.0);

    let address = schema.get("address").unwrap();
    let nested = address.properties.as_ref().unwrap();
    assert!(nested.contains_key("city"));

    for name in ["schema.yml", "schema.json"] {
        let path = dir.path().join(name);
        save_report(&path, &report).unwrap();
        let reloaded = load_schema(&path).unwrap();
        assert_eq!(&reloaded, schema);
        assert!(SchemaDiff::compute(schema, &reloaded).is_empty());
    }
}

#[test]
fn test_diff_identity_and_symmetry() {
    let a = SchemaDocument::new()
        .with_field("x", FieldDescriptor::new(TypeTag::Int).with_presence(1.0))
        .with_field("y", FieldDescriptor::new(TypeTag::String));
    let b = SchemaDocument::new()
        .with_field("x", FieldDescriptor::new(TypeTag::Long).with_presence(1.0))
        .with_field("z", FieldDescriptor::new(TypeTag::Bool));

    assert!(SchemaDiff::compute(&a, &a).is_empty());

    let forward = SchemaDiff::compute(&a, &b);
    let backward = SchemaDiff::compute(&b, &a);
    assert_eq!(forward.added, backward.removed);
    assert_eq!(forward.removed, backward.added);
    assert_eq!(forward.summary.changed, backward.summary.changed);
}

#[test]
fn test_drift_literals() {
    let base = SchemaDocument::new().with_field("a", FieldDescriptor::new(TypeTag::Int));

    assert_eq!(DriftClassifier::classify(&base, &base).drift_score, 0.0);

    let added = base
        .clone()
        .with_field("b", FieldDescriptor::new(TypeTag::String));
    assert_eq!(DriftClassifier::classify(&base, &added).drift_score, 0.05);
    assert_eq!(DriftClassifier::classify(&added, &base).drift_score, 0.15);

    let retyped = SchemaDocument::new().with_field("a", FieldDescriptor::new(TypeTag::String));
    let report = DriftClassifier::classify(&base, &retyped);
    assert_eq!(report.drift_score, 0.25);
    assert_eq!(report.critical_count, 1);
    assert_eq!(report.max_level(), Some(DriftLevel::Critical));
}

#[test]
fn test_compatible_narrowing_is_not_critical() {
    let expected = SchemaDocument::new().with_field(
        "v",
        FieldDescriptor::new(TypeSpec::from_tags([TypeTag::Int, TypeTag::String])),
    );
    let observed = SchemaDocument::new().with_field("v", FieldDescriptor::new(TypeTag::Int));

    let report = DriftClassifier::classify(&expected, &observed);
    assert_eq!(report.critical_count, 0);
    assert_eq!(report.info_count, 1);
    assert_eq!(report.drift_score, 0.1);
}

#[test]
fn test_drift_score_grows_with_changes() {
    let expected = SchemaDocument::new()
        .with_field("a", FieldDescriptor::new(TypeTag::Int))
        .with_field("b", FieldDescriptor::new(TypeTag::Int));

    let one = expected
        .clone()
        .with_field("c", FieldDescriptor::new(TypeTag::Int));
    let two = one.clone().with_field("d", FieldDescriptor::new(TypeTag::Int));
    let three = SchemaDocument::new()
        .with_field("a", FieldDescriptor::new(TypeTag::String))
        .with_field("c", FieldDescriptor::new(TypeTag::Int))
        .with_field("d", FieldDescriptor::new(TypeTag::Int));

    let s1 = DriftClassifier::classify(&expected, &one).drift_score;
    let s2 = DriftClassifier::classify(&expected, &two).drift_score;
    let s3 = DriftClassifier::classify(&expected, &three).drift_score;
    assert!(s1 < s2 && s2 < s3);
}

#[test]
fn test_plan_from_literal_schemas() {
    let from: SchemaDocument =
        serde_json::from_str(r#"{"properties": {"age": {"bsonType": "int"}}}"#).unwrap();
    let to: SchemaDocument = serde_json::from_str(
        r#"{"properties": {"age": {"type": "string"}, "name": {"type": "string"}}}"#,
    )
    .unwrap();

    let plan = MigrationPlan::generate(&from, &to);
    let steps: Vec<_> = plan
        .steps
        .iter()
        .map(|s| (s.action, s.field.as_str()))
        .collect();
    assert_eq!(
        steps,
        vec![(StepAction::AddField, "name"), (StepAction::ConvertType, "age")]
    );

    let rollback = MigrationPlan::rollback(&from, &to);
    let steps: Vec<_> = rollback
        .steps
        .iter()
        .map(|s| (s.action, s.field.as_str()))
        .collect();
    assert_eq!(
        steps,
        vec![(StepAction::RemoveField, "name"), (StepAction::ConvertType, "age")]
    );
}
