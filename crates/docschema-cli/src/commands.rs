//! Command handlers.

use std::error::Error;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use docschema_core::analysis::recommend;
use docschema_core::migration::SchemaDiff;
use docschema_core::schema::{load_schema, save_report, FileFormat};
use docschema_core::store::{Collection, DocumentStore};
use docschema_core::{
    CheckpointStore, Document, DriftClassifier, DriftMonitor, ExecuteOptions, MigrationExecutor,
    MigrationPlan, MonitorConfig, ObjectId, SchemaValidator, SledStore, StoreConfig, Strategy,
    Synthesizer, SynthesizerConfig, ValidationAction, ValidationLevel, ValidationRule, Value,
};

use crate::config::{self, RuntimeConfig};
use crate::database;
use crate::{
    ActionArg, Args, Command, DbCommand, DriftCommand, LevelArg, SamplingArgs, StrategyArg,
    ValidateCommand,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Run a command and return the process exit code.
pub async fn run(args: Args) -> CliResult<i32> {
    let overrides = args.overrides();
    let config_dir = args.config_dir.clone();
    let runtime = || RuntimeConfig::load(&config_dir, overrides.clone());
    let open_database = || -> CliResult<(SledStore, String)> {
        let data_path = config::load_data_path(&config_dir, overrides.clone())?;
        info!(data_path = %data_path.display(), "Opening database");
        let db = SledStore::open(&StoreConfig::new(&data_path))?;
        Ok((db, data_path.display().to_string()))
    };

    match args.command {
        Command::Init { path } => {
            let path = path.unwrap_or_else(|| config_dir.join(config::CONFIG_FILE));
            let created = config::write_default_config(&path)?;
            let status = if created { "created" } else { "exists" };
            print_json(&json!({ "status": status, "path": path.display().to_string() }))?;
        }

        Command::Import { file, batch_size } => {
            let (_db, collection) = open_collection(&runtime()?)?;
            let imported = import_jsonl(&collection, &file, batch_size.max(1)).await?;
            print_json(&json!({ "status": "imported", "documents": imported }))?;
        }

        Command::Analyze { sampling, save } => {
            let (_db, collection) = open_collection(&runtime()?)?;
            let report = synthesizer(&sampling).analyze(&collection).await?;
            if let Some(path) = save {
                save_report(&path, &report)?;
                info!(path = %path.display(), "Schema saved");
            }
            print_json(&report)?;
        }

        Command::Diff { source, target } => {
            let diff = SchemaDiff::compute(&load_schema(&source)?, &load_schema(&target)?);
            print_json(&diff)?;
        }

        Command::Drift(DriftCommand::Detect { schema, sampling }) => {
            let expected = load_schema(&schema)?;
            let (_db, collection) = open_collection(&runtime()?)?;
            let monitor = DriftMonitor::new(
                expected,
                MonitorConfig::default().with_synthesizer(synthesizer_config(&sampling)),
            );
            let report = monitor.check(&collection).await?;
            print_json(&report)?;
            if report.has_drift {
                return Ok(1);
            }
        }

        Command::Drift(DriftCommand::Compare { source, target }) => {
            let report = DriftClassifier::classify(&load_schema(&source)?, &load_schema(&target)?);
            print_json(&report)?;
        }

        Command::Drift(DriftCommand::Monitor {
            schema,
            sampling,
            interval,
            runs,
            webhook,
        }) => {
            let expected = load_schema(&schema)?;
            let (_db, collection) = open_collection(&runtime()?)?;
            let mut config = MonitorConfig::default()
                .with_interval(Duration::from_secs(interval.max(1)))
                .with_synthesizer(synthesizer_config(&sampling));
            if let Some(runs) = runs {
                config = config.with_max_runs(runs);
            }
            if let Some(url) = webhook {
                config = config.with_webhook(url);
            }

            let monitor = DriftMonitor::new(expected, config);
            monitor
                .run(&collection, |report| {
                    if let Err(e) = print_json(report) {
                        warn!(error = %e, "Failed to write drift report");
                    }
                })
                .await?;
        }

        Command::Indexes { schema } => {
            let schema = load_schema(&schema)?;
            let (_db, collection) = open_collection(&runtime()?)?;
            let indexed = collection.indexed_fields().await?;
            let recommendations = recommend::indexes(&schema, &indexed);
            print_json(&json!({ "indexes": indexed, "recommendations": recommendations }))?;
        }

        Command::Plan {
            source,
            target,
            rollback,
            strategy,
            batch_size,
            out,
        } => {
            let source = load_schema(&source)?;
            let target = load_schema(&target)?;
            let plan = if rollback {
                MigrationPlan::rollback(&source, &target)
            } else {
                MigrationPlan::generate(&source, &target)
            };
            let plan = plan
                .with_strategy(to_strategy(strategy))
                .with_batch_size(batch_size);
            plan.validate()?;

            match out {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, plan.to_json()?)?;
                    print_json(&json!({
                        "status": "saved",
                        "path": path.display().to_string(),
                        "steps": plan.steps.len(),
                        "summary": plan.summary.unwrap_or_default(),
                    }))?;
                }
                None => print_json(&plan)?,
            }
        }

        Command::Migrate {
            plan,
            target,
            allow_remove,
            dry_run,
            rate_limit_ms,
            resume,
            resume_from,
            start_step,
        } => {
            let plan = MigrationPlan::from_json(&std::fs::read_to_string(&plan)?)?;
            let target = load_schema(&target)?;
            let resume_from = resume_from
                .map(|hex| hex.parse::<ObjectId>())
                .transpose()?;

            let (db, collection) = open_collection(&runtime()?)?;
            let checkpoints = CheckpointStore::open(db.db())?;
            let store: Arc<dyn DocumentStore> = Arc::new(collection);
            let executor = MigrationExecutor::new(store).with_checkpoints(checkpoints);

            let options = ExecuteOptions::new()
                .with_allow_remove(allow_remove)
                .with_dry_run(dry_run)
                .with_rate_limit_ms(rate_limit_ms)
                .with_resume(start_step, resume_from);
            let options = if resume {
                executor.resume_options(&plan, options)?
            } else {
                options
            };

            let report = executor.execute(&plan, &target, &options).await?;
            db.flush()?;
            print_json(&report)?;
        }

        Command::Validate(ValidateCommand::Test {
            schema,
            sample,
            max_errors,
        }) => {
            let validator = SchemaValidator::new(load_schema(&schema)?).with_max_errors(max_errors);
            let (_db, collection) = open_collection(&runtime()?)?;
            let report = validator.validate_collection(&collection, sample).await?;
            print_json(&report)?;
        }

        Command::Validate(ValidateCommand::Export { schema }) => {
            let validator = SchemaValidator::new(load_schema(&schema)?);
            print_json(&validator.validator_document())?;
        }

        Command::Validate(ValidateCommand::Apply {
            schema,
            level,
            action,
        }) => {
            let rule = ValidationRule::new(load_schema(&schema)?)
                .with_level(to_level(level))
                .with_action(to_action(action));
            let runtime = runtime()?;
            let (db, _collection) = open_collection(&runtime)?;
            db.apply_validation(&runtime.collection, &rule)?;
            db.flush()?;
            print_json(&json!({
                "status": "applied",
                "collection": runtime.collection,
                "result": rule.command_document(),
            }))?;
        }

        Command::Validate(ValidateCommand::Remove) => {
            let runtime = runtime()?;
            let (db, _collection) = open_collection(&runtime)?;
            let removed = db.remove_validation(&runtime.collection)?;
            db.flush()?;
            let status = if removed { "removed" } else { "absent" };
            print_json(&json!({ "status": status, "collection": runtime.collection }))?;
        }

        Command::Db(DbCommand::Analyze { sampling, out }) => {
            let (db, name) = open_database()?;
            let result = database::analyze_all(&db, &name, &synthesizer(&sampling)).await?;
            match out {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    save_report(&path, &result)?;
                    print_json(&json!({
                        "status": "saved",
                        "path": path.display().to_string(),
                        "summary": result.summary,
                    }))?;
                }
                None => print_json(&result)?,
            }
        }

        Command::Db(DbCommand::Export {
            sampling,
            out_dir,
            json,
        }) => {
            let (db, _name) = open_database()?;
            let format = if json { FileFormat::Json } else { FileFormat::Yaml };
            let files = database::export_all(&db, &synthesizer(&sampling), &out_dir, format).await?;
            print_json(&json!({ "status": "exported", "count": files.len(), "files": files }))?;
        }

        Command::Db(DbCommand::Drift {
            schema_dir,
            sampling,
        }) => {
            let (db, name) = open_database()?;
            let result =
                database::drift_all(&db, &name, &synthesizer(&sampling), &schema_dir).await?;
            print_json(&result)?;
            if result.summary.with_drift > 0 {
                return Ok(1);
            }
        }

        Command::Db(DbCommand::Validate {
            schema_dir,
            sample,
            max_errors,
        }) => {
            let (db, name) = open_database()?;
            let result =
                database::validate_all(&db, &name, &schema_dir, sample, max_errors).await?;
            print_json(&result)?;
            if result.summary.total_invalid_docs > 0 {
                return Ok(1);
            }
        }

        Command::Db(DbCommand::Migrate {
            from_dir,
            to_dir,
            out_dir,
            strategy,
            batch_size,
        }) => {
            let result = database::plan_all(
                &from_dir,
                &to_dir,
                &out_dir,
                to_strategy(strategy),
                batch_size,
            )?;
            print_json(&json!({
                "status": "generated",
                "migrations": result.plans,
                "skipped": result.skipped,
                "counts": result.counts,
            }))?;
        }
    }

    Ok(0)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn to_strategy(arg: StrategyArg) -> Strategy {
    match arg {
        StrategyArg::Eager => Strategy::Eager,
        StrategyArg::Lazy => Strategy::Lazy,
    }
}

fn to_level(arg: LevelArg) -> ValidationLevel {
    match arg {
        LevelArg::Off => ValidationLevel::Off,
        LevelArg::Moderate => ValidationLevel::Moderate,
        LevelArg::Strict => ValidationLevel::Strict,
    }
}

fn to_action(arg: ActionArg) -> ValidationAction {
    match arg {
        ActionArg::Error => ValidationAction::Error,
        ActionArg::Warn => ValidationAction::Warn,
    }
}

fn synthesizer_config(sampling: &SamplingArgs) -> SynthesizerConfig {
    SynthesizerConfig::default()
        .with_sample_size(sampling.sample)
        .with_max_depth(sampling.max_depth)
        .with_max_array_items(sampling.max_array_items)
}

fn synthesizer(sampling: &SamplingArgs) -> Synthesizer {
    Synthesizer::new(synthesizer_config(sampling))
}

/// Open the configured database and collection.
fn open_collection(config: &RuntimeConfig) -> CliResult<(SledStore, Collection)> {
    info!(
        data_path = %config.data_path.display(),
        collection = %config.collection,
        "Opening collection"
    );
    let db = SledStore::open(&StoreConfig::new(&config.data_path))?;
    let collection = db.collection(&config.collection)?;
    Ok((db, collection))
}

/// Insert every line of a JSON Lines file. Blank lines are ignored.
async fn import_jsonl(collection: &Collection, path: &Path, batch_size: usize) -> CliResult<usize> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut batch = Vec::with_capacity(batch_size);
    let mut imported = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: {}", index + 1, e))?;
        let doc: Document = match Value::from_json(json) {
            Value::Object(doc) => doc,
            _ => return Err(format!("line {}: expected a JSON object", index + 1).into()),
        };
        batch.push(doc);

        if batch.len() >= batch_size {
            imported += collection.insert_many(std::mem::take(&mut batch)).await?.len();
        }
    }
    if !batch.is_empty() {
        imported += collection.insert_many(batch).await?.len();
    }

    info!(imported, file = %path.display(), "Import complete");
    Ok(imported)
}
