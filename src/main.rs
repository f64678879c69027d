// Command-line entry point: dataset generation, feature export, training, threshold
// tuning, batch scoring, rule explanations and the HTTP scorer.
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use upi_guard::config::AppConfig;
use upi_guard::csv_reader::{read_batch, read_transactions};
use upi_guard::features::{FeaturePipeline, FeatureSchema};
use upi_guard::generator;
use upi_guard::heuristic::{self, HeuristicInput};
use upi_guard::logging;
use upi_guard::model::{write_threshold, ArtifactPaths, GbdtClassifier};
use upi_guard::scoring::ScoringService;
use upi_guard::server;
use upi_guard::training::Trainer;

#[derive(Parser, Debug)]
#[command(name = "upi-guard", version)]
#[command(about = "Fraud scoring for UPI transactions")]
struct Cli {
    /// TOML configuration file; defaults to ./upi_guard.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a synthetic labelled dataset as CSV
    Generate {
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Engineer features for a CSV and write the feature table
    Features {
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Train the classifier and write the model artifact
    Train {
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Pick the cost-minimising threshold on the held-out split and write it
    OptimizeThreshold {
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Score a CSV or JSON file with a trained artifact
    Score {
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Rule-based score with the rules that fired, for one JSON record
    Explain {
        #[arg(long, short)]
        input: PathBuf,
        /// Transactions by the sender in the last hour
        #[arg(long, default_value_t = 1.0)]
        velocity: f64,
    },
    /// Serve /predict and /health
    Serve {
        #[arg(long)]
        artifacts: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    logging::init(&config.logging);

    let artifacts = |dir: Option<PathBuf>| ArtifactPaths::new(dir.unwrap_or_else(|| config.artifacts.dir.clone()));

    match cli.command {
        Command::Generate { output, rows, seed } => {
            let mut settings = config.generator.clone();
            settings.rows = rows.unwrap_or(settings.rows);
            settings.seed = seed.unwrap_or(settings.seed);
            let rows = generator::generate(&settings)?;
            generator::write_csv(&rows, &output)?;
            let frauds = rows.iter().filter(|r| r.fraud_flag == 1).count();
            println!("Generated {} transactions into {}", rows.len(), output.display());
            println!("Fraud Rate: {:.4}", frauds as f64 / rows.len().max(1) as f64);
        }
        Command::Features { input, output } => {
            let batch = read_transactions(&input)?;
            let table = FeaturePipeline::new(config.pipeline.clone()).transform(&batch)?;
            let file = File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            table.write_csv(BufWriter::new(file))?;
            println!(
                "Wrote {} rows x {} features to {}",
                table.nrows(),
                table.columns().len(),
                output.display()
            );
        }
        Command::Train { input, artifacts: dir } => {
            let paths = artifacts(dir);
            let batch = read_transactions(&input)?;
            let trainer = trainer(&config);
            let outcome = trainer.train(&batch)?;
            outcome.save(&paths)?;

            let report = &outcome.report;
            println!("Classification report (cut {:.2}):", report.cut);
            println!("{}", report.classification);
            println!("Confusion matrix [tn fp; fn tp]:");
            println!("  {:>7} {:>7}", report.confusion.tn, report.confusion.fp);
            println!("  {:>7} {:>7}", report.confusion.fn_, report.confusion.tp);
            println!("ROC-AUC: {}", format_optional(report.roc_auc));
            println!("PR-AUC: {}", format_optional(report.average_precision));
            println!("Financial loss: {:.0}", report.financial_loss);
            println!("Artifact written to {}", paths.dir.display());
        }
        Command::OptimizeThreshold { input, artifacts: dir } => {
            let paths = artifacts(dir);
            let batch = read_transactions(&input)?;
            let model = GbdtClassifier::load(&paths.model)?;
            let schema = FeatureSchema::load(&paths.schema)?;
            let result = trainer(&config).optimize_threshold(&batch, &model, &schema)?;
            write_threshold(&paths.threshold, result.choice.threshold)?;
            println!("Optimal threshold: {:.2}", result.choice.threshold);
            println!("Expected loss: {:.0}", result.choice.expected_loss);
        }
        Command::Score { input, artifacts: dir } => {
            let service = ScoringService::load(&artifacts(dir), &config)?;
            let batch = read_batch(&input)?;
            let predictions = service.score_batch(&batch)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for prediction in &predictions {
                serde_json::to_writer(&mut out, prediction)?;
                writeln!(out)?;
            }
            info!(scored = predictions.len(), "batch scored");
        }
        Command::Explain { input, velocity } => explain(&input, velocity)?,
        Command::Serve {
            artifacts: dir,
            host,
            port,
        } => {
            let service = Arc::new(ScoringService::load(&artifacts(dir), &config)?);
            let host = host.unwrap_or_else(|| config.serving.host.clone());
            let port = port.unwrap_or(config.serving.port);
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

            let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
            runtime
                .block_on(server::run(service, addr))
                .context("Server error")?;
        }
    }

    Ok(())
}

fn trainer(config: &AppConfig) -> Trainer {
    Trainer::new(
        FeaturePipeline::new(config.pipeline.clone()),
        config.training.clone(),
        config.costs,
    )
}

fn explain(input: &Path, velocity: f64) -> Result<()> {
    let batch = read_batch(input)?;
    let [record] = batch.records() else {
        bail!("{} must hold exactly one transaction", input.display());
    };
    let Some(features) = HeuristicInput::from_record(record, velocity) else {
        bail!("{} has no parseable timestamp", input.display());
    };

    let result = heuristic::score(&features);
    println!("Fraud probability: {:.2}", result.fraud_probability);
    println!("Decision: {:?}", result.decision);
    if result.contributors.is_empty() {
        println!("No rule fired");
    }
    for contributor in &result.contributors {
        println!("  {:<18} +{:.2}", contributor.rule, contributor.weight);
    }
    Ok(())
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "undefined".to_string(), |v| format!("{:.4}", v))
}
