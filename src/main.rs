use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deeptest::{
    CancelToken, Config, HistogramEqualizer, ModelSelection, Pipeline, PipelineOutcome,
    PipelineRecord, PipelineRequest, RecordDb, RecordRepository, RecordUpdate, RtenModelLoader,
    TestType,
};

#[derive(Parser)]
#[command(name = "deeptest")]
#[command(about = "Diagnose test-strip photos and manage stored results")]
struct Cli {
    /// Path to the results database
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Directory holding yolo.rten, efficientnet.rten and shufflenet.rten
    #[arg(long, global = true, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the diagnosis pipeline on one image
    Run {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// 1 = model 1, 2 = model 2, 3 = ensemble
        #[arg(short, long, value_parser = parse_selection, default_value = "3")]
        model: ModelSelection,

        /// Name stored with the result
        #[arg(short, long, default_value = "")]
        name: String,

        /// scrape (1) or swab (2)
        #[arg(short, long, default_value = "scrape")]
        test_type: TestType,

        /// Save intermediate images to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored results
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one stored result
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Change the name or test type of a stored result
    Rename {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        test_type: Option<TestType>,
    },
    /// Delete stored results
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

fn parse_selection(s: &str) -> Result<ModelSelection, String> {
    let value: i64 = s.trim().parse().map_err(|_| format!("expected 1, 2 or 3, got {s:?}"))?;
    ModelSelection::try_from(value).map_err(|e| e.to_string())
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.log_level
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deeptest={}", level.as_str().to_lowercase())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(db) = args.db.clone() {
        config.storage.database_path = db;
    }
    if let Some(dir) = args.models_dir.clone() {
        config.models.models_dir = dir;
    }
    config.validate()?;
    init_tracing(&config, args.verbose);

    let db = RecordDb::open(&config.storage.database_path).await?;
    let result = dispatch(args.command, &config, &db).await;
    db.close().await;
    result
}

async fn dispatch(command: Command, config: &Config, db: &RecordDb) -> anyhow::Result<()> {
    match command {
        Command::Run {
            image_path,
            model,
            name,
            test_type,
            debug_out,
            json,
        } => {
            config.validate_models_dir()?;
            let loader = Arc::new(RtenModelLoader::new(config.models.clone()));
            let mut pipeline = Pipeline::new(loader, db.clone(), HistogramEqualizer::new())
                .with_thresholds(config.thresholds)
                .with_work_dir(&config.storage.work_dir);
            if let Some(debug_dir) = debug_out {
                pipeline = pipeline.with_debug(debug_dir)?;
            }

            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; cancelling after the current step");
                    on_signal.cancel();
                }
            });

            let request = PipelineRequest {
                image_path,
                name,
                test_type,
                model_selection: model,
            };
            let mut progress = |label: &str, fraction: f32| {
                eprintln!("[{:>3.0}%] {}", fraction * 100.0, label);
            };
            let outcome = pipeline.run(request, &mut progress, &cancel).await?;
            print_outcome(&outcome, json)?;
        }
        Command::List { json } => {
            let records = db.get_all().await?;
            if json {
                let values = records
                    .iter()
                    .map(|r| record_json(r, config))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else if records.is_empty() {
                println!("No stored results.");
            } else {
                for record in &records {
                    print_record(record, config)?;
                }
            }
        }
        Command::Show { id, json } => {
            let record = db
                .get(id)
                .await?
                .with_context(|| format!("No record with id {}", id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record_json(&record, config)?)?);
            } else {
                print_record(&record, config)?;
            }
        }
        Command::Rename {
            id,
            name,
            test_type,
        } => {
            let update = RecordUpdate { name, test_type };
            if update.is_empty() {
                anyhow::bail!("Nothing to change; pass --name and/or --test-type");
            }
            let record = db.update(id, &update).await?;
            info!(id, "Record updated");
            print_record(&record, config)?;
        }
        Command::Delete { ids } => {
            for id in ids {
                db.delete(id).await?;
                println!("Deleted record {}", id);
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        let value = serde_json::json!({
            "id": outcome.record_id,
            "image": outcome.record.image_ref,
            "name": outcome.record.name,
            "test_type": outcome.record.test_type.label(),
            "model": outcome.record.model_selection.label(),
            "probability": outcome.record.probability,
            "uncertainty": outcome.record.uncertainty,
            "label": outcome.label,
            "roi": outcome.roi,
            "enhanced": outcome.enhanced,
            "model1": outcome.model1,
            "model2": outcome.model2,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("\n=== Diagnosis ===");
    println!("Record:      {}", outcome.record_id);
    println!("Region:      {}", outcome.roi);
    println!("Model:       {}", outcome.record.model_selection);
    println!(
        "Probability: {:.2}% (± {:.2})",
        outcome.record.probability, outcome.record.uncertainty
    );
    println!("Result:      {}", outcome.label);
    if !outcome.enhanced {
        println!("(contrast enhancement was skipped)");
    }
    Ok(())
}

fn print_record(record: &PipelineRecord, config: &Config) -> anyhow::Result<()> {
    println!(
        "#{:<4} {:<20} {:<6} {:<8} {:>6.2}% ± {:<5.2} {:<8} {}",
        record.id,
        record.name,
        record.test_type.label(),
        record.model_selection.label(),
        record.probability,
        record.uncertainty,
        record.label(&config.thresholds).to_string(),
        record.timestamp.format(&Rfc3339)?
    );
    Ok(())
}

fn record_json(record: &PipelineRecord, config: &Config) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "id": record.id,
        "image": record.image_ref,
        "name": record.name,
        "test_type": record.test_type.label(),
        "model": record.model_selection.label(),
        "probability": record.probability,
        "uncertainty": record.uncertainty,
        "label": record.label(&config.thresholds),
        "timestamp": record.timestamp.format(&Rfc3339)?,
    }))
}
