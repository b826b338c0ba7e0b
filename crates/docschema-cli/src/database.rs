//! Database-wide commands: one operation over every collection.
//!
//! Schema directories hold one file per collection, named after it
//! (`users.yml`, `orders.json`, ...).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use docschema_core::migration::{DiffSummary, DriftLevel, SchemaDiff};
use docschema_core::schema::{load_schema, save_report, FileFormat};
use docschema_core::{
    AnalysisReport, DriftClassifier, DriftReport, MigrationPlan, SchemaValidator, SledStore,
    Strategy, Synthesizer, ValidationReport,
};

type DbResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Default, Serialize)]
pub struct AnalyzeSummary {
    pub total: usize,
    pub with_anomalies: usize,
}

#[derive(Debug, Serialize)]
pub struct DatabaseAnalysis {
    pub database: String,
    pub collections: BTreeMap<String, AnalysisReport>,
    pub summary: AnalyzeSummary,
}

#[derive(Debug, Default, Serialize)]
pub struct DriftSummary {
    pub total: usize,
    pub with_drift: usize,
    pub critical: usize,
    /// Schema files with no matching collection.
    pub missing: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseDrift {
    pub database: String,
    pub collections: BTreeMap<String, DriftReport>,
    pub summary: DriftSummary,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidateSummary {
    pub total_collections: usize,
    pub valid_collections: usize,
    pub invalid_collections: usize,
    pub total_invalid_docs: u64,
    pub missing: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseValidation {
    pub database: String,
    pub collections: BTreeMap<String, ValidationReport>,
    pub summary: ValidateSummary,
}

#[derive(Debug, Serialize)]
pub struct PlannedCollection {
    pub collection: String,
    pub path: PathBuf,
    pub steps: usize,
    pub summary: DiffSummary,
}

#[derive(Debug, Default, Serialize)]
pub struct PlanCounts {
    pub generated: usize,
    pub skipped: usize,
}

/// Plans written for every collection whose schema changed.
#[derive(Debug, Default, Serialize)]
pub struct DatabasePlans {
    pub plans: Vec<PlannedCollection>,
    /// Collections present on both sides with identical schemas.
    pub skipped: Vec<String>,
    pub counts: PlanCounts,
}

/// Collection names in sorted order.
fn sorted_collections(store: &SledStore) -> Vec<String> {
    let mut names = store.collection_names();
    names.sort();
    names
}

/// Schema files in `dir`, keyed by collection name. The first file per
/// name in path order wins.
pub fn schema_files(dir: &Path) -> DbResult<BTreeMap<String, PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();

    let mut files = BTreeMap::new();
    for path in paths {
        let is_schema = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml" | "yaml" | "json")
        );
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_schema && path.is_file() {
            files.entry(stem.to_string()).or_insert(path);
        }
    }
    Ok(files)
}

/// Analyze every collection.
pub async fn analyze_all(
    store: &SledStore,
    database: &str,
    synthesizer: &Synthesizer,
) -> DbResult<DatabaseAnalysis> {
    let mut result = DatabaseAnalysis {
        database: database.to_string(),
        collections: BTreeMap::new(),
        summary: AnalyzeSummary::default(),
    };

    for name in sorted_collections(store) {
        info!(collection = %name, "Analyzing collection");
        let report = synthesizer.analyze(&store.collection(&name)?).await?;
        result.summary.total += 1;
        if !report.anomalies.is_empty() {
            result.summary.with_anomalies += 1;
        }
        result.collections.insert(name, report);
    }
    Ok(result)
}

/// Analyze every collection and save one schema file per collection.
pub async fn export_all(
    store: &SledStore,
    synthesizer: &Synthesizer,
    out_dir: &Path,
    format: FileFormat,
) -> DbResult<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let extension = match format {
        FileFormat::Json => "json",
        FileFormat::Yaml => "yml",
    };

    let mut exported = Vec::new();
    for name in sorted_collections(store) {
        let report = synthesizer.analyze(&store.collection(&name)?).await?;
        let path = out_dir.join(format!("{name}.{extension}"));
        save_report(&path, &report)?;
        info!(collection = %name, path = %path.display(), "Schema exported");
        exported.push(path);
    }
    Ok(exported)
}

/// Compare every collection that has an expected schema in `schema_dir`.
pub async fn drift_all(
    store: &SledStore,
    database: &str,
    synthesizer: &Synthesizer,
    schema_dir: &Path,
) -> DbResult<DatabaseDrift> {
    let existing = store.collection_names();
    let mut result = DatabaseDrift {
        database: database.to_string(),
        collections: BTreeMap::new(),
        summary: DriftSummary::default(),
    };

    for (name, path) in schema_files(schema_dir)? {
        if !existing.contains(&name) {
            warn!(collection = %name, "No collection for schema file");
            result.summary.missing.push(name);
            continue;
        }
        let expected = load_schema(&path)?;
        let observed = synthesizer.analyze(&store.collection(&name)?).await?;
        let report = DriftClassifier::classify(&expected, &observed.schema);

        result.summary.total += 1;
        if report.has_drift {
            result.summary.with_drift += 1;
        }
        if report.max_level() == Some(DriftLevel::Critical) {
            result.summary.critical += 1;
        }
        result.collections.insert(name, report);
    }
    Ok(result)
}

/// Validate a sample of every collection that has a schema in `schema_dir`.
pub async fn validate_all(
    store: &SledStore,
    database: &str,
    schema_dir: &Path,
    sample: usize,
    max_errors: usize,
) -> DbResult<DatabaseValidation> {
    let existing = store.collection_names();
    let mut result = DatabaseValidation {
        database: database.to_string(),
        collections: BTreeMap::new(),
        summary: ValidateSummary::default(),
    };

    for (name, path) in schema_files(schema_dir)? {
        if !existing.contains(&name) {
            warn!(collection = %name, "No collection for schema file");
            result.summary.missing.push(name);
            continue;
        }
        let validator = SchemaValidator::new(load_schema(&path)?).with_max_errors(max_errors);
        let report = validator
            .validate_collection(&store.collection(&name)?, sample)
            .await?;

        result.summary.total_collections += 1;
        if report.is_valid() {
            result.summary.valid_collections += 1;
        } else {
            result.summary.invalid_collections += 1;
            result.summary.total_invalid_docs += report.invalid;
        }
        result.collections.insert(name, report);
    }
    Ok(result)
}

/// Write a plan for every collection present in both directories whose
/// schema changed.
pub fn plan_all(
    from_dir: &Path,
    to_dir: &Path,
    out_dir: &Path,
    strategy: Strategy,
    batch_size: usize,
) -> DbResult<DatabasePlans> {
    let sources = schema_files(from_dir)?;
    let targets = schema_files(to_dir)?;
    fs::create_dir_all(out_dir)?;

    let mut result = DatabasePlans::default();
    for (name, source_path) in &sources {
        let Some(target_path) = targets.get(name) else {
            continue;
        };
        let source = load_schema(source_path)?;
        let target = load_schema(target_path)?;
        let diff = SchemaDiff::compute(&source, &target);
        if diff.is_empty() {
            result.skipped.push(name.clone());
            continue;
        }

        let plan = MigrationPlan::from_diff(&diff, &source, &target)
            .with_strategy(strategy)
            .with_batch_size(batch_size);
        plan.validate()?;

        let path = out_dir.join(format!("{name}.plan.json"));
        fs::write(&path, plan.to_json()?)?;
        info!(collection = %name, steps = plan.steps.len(), "Plan written");
        result.plans.push(PlannedCollection {
            collection: name.clone(),
            path,
            steps: plan.steps.len(),
            summary: diff.summary,
        });
    }

    result.counts = PlanCounts {
        generated: result.plans.len(),
        skipped: result.skipped.len(),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docschema_core::{
        Document, DocumentStore, FieldDescriptor, SchemaDocument, StoreConfig, SynthesizerConfig,
        TypeTag,
    };

    async fn seeded() -> SledStore {
        let store = SledStore::open(&StoreConfig::temporary()).unwrap();
        store
            .collection("users")
            .unwrap()
            .insert_many(vec![
                Document::new().with("name", "a"),
                Document::new().with("name", "b"),
            ])
            .await
            .unwrap();
        store
            .collection("orders")
            .unwrap()
            .insert_many(vec![Document::new().with("total", 3)])
            .await
            .unwrap();
        store
    }

    fn write_schema(dir: &Path, file: &str, schema: &SchemaDocument) {
        save_report(dir.join(file), &serde_json::json!({ "schema": schema })).unwrap();
    }

    fn users_schema() -> SchemaDocument {
        SchemaDocument::new().with_field(
            "name",
            FieldDescriptor::new(TypeTag::String).with_presence(1.0).required(),
        )
    }

    #[tokio::test]
    async fn test_analyze_all_covers_every_collection() {
        let store = seeded().await;
        let synthesizer = Synthesizer::new(SynthesizerConfig::default());

        let result = analyze_all(&store, "db", &synthesizer).await.unwrap();

        assert_eq!(result.summary.total, 2);
        let names: Vec<&String> = result.collections.keys().collect();
        assert_eq!(names, vec!["orders", "users"]);
        assert_eq!(result.collections["users"].total_documents, 2);
    }

    #[tokio::test]
    async fn test_export_all_writes_loadable_schemas() {
        let store = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let synthesizer = Synthesizer::new(SynthesizerConfig::default());

        let files = export_all(&store, &synthesizer, dir.path(), FileFormat::Yaml)
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        let users = load_schema(dir.path().join("users.yml")).unwrap();
        assert!(users.contains("name"));
    }

    #[tokio::test]
    async fn test_drift_all_flags_changed_collections() {
        let store = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "users.yml", &users_schema());
        write_schema(dir.path(), "orders.yml", &SchemaDocument::new());
        write_schema(dir.path(), "ghosts.yml", &SchemaDocument::new());
        let synthesizer = Synthesizer::new(SynthesizerConfig::default());

        let result = drift_all(&store, "db", &synthesizer, dir.path()).await.unwrap();

        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.with_drift, 1);
        assert!(result.collections["orders"].has_drift);
        assert!(!result.collections["users"].has_drift);
        assert_eq!(result.summary.missing, vec!["ghosts".to_string()]);
        assert!(!store.collection_names().contains(&"ghosts".to_string()));
    }

    #[tokio::test]
    async fn test_validate_all_counts_invalid_documents() {
        let store = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "users.json", &users_schema());
        let orders = SchemaDocument::new()
            .with_field("total", FieldDescriptor::new(TypeTag::String).required());
        write_schema(dir.path(), "orders.yml", &orders);

        let result = validate_all(&store, "db", dir.path(), 100, 10).await.unwrap();

        assert_eq!(result.summary.total_collections, 2);
        assert_eq!(result.summary.valid_collections, 1);
        assert_eq!(result.summary.invalid_collections, 1);
        assert_eq!(result.summary.total_invalid_docs, 1);
    }

    #[test]
    fn test_plan_all_skips_unchanged() {
        let from = tempfile::tempdir().unwrap();
        let to = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write_schema(from.path(), "users.yml", &users_schema());
        write_schema(to.path(), "users.yml", &users_schema());
        let age = FieldDescriptor::new(TypeTag::Int);
        write_schema(from.path(), "people.yml", &SchemaDocument::new().with_field("age", age));
        let people = SchemaDocument::new()
            .with_field("age", FieldDescriptor::new(TypeTag::String))
            .with_field("name", FieldDescriptor::new(TypeTag::String));
        write_schema(to.path(), "people.yml", &people);
        write_schema(to.path(), "only_target.yml", &users_schema());

        let result = plan_all(from.path(), to.path(), out.path(), Strategy::Eager, 500).unwrap();

        assert_eq!(result.skipped, vec!["users".to_string()]);
        assert_eq!(result.counts.generated, 1);
        let planned = &result.plans[0];
        assert_eq!(planned.collection, "people");
        assert_eq!(planned.steps, 2);

        let plan = MigrationPlan::from_json(&fs::read_to_string(&planned.path).unwrap()).unwrap();
        assert_eq!(plan.batch_size, 500);
    }
}
