//! Scorecast - per-student exam score forecasting
//!
//! Command-line front end: record study sessions, label them with real exam
//! scores, train a model per (user, test), and predict upcoming scores.

use anyhow::Context;
use clap::{Parser, Subcommand};
use scorecast_core::{
    EmbeddingService, EntityKey, ForecastConfig, Forecaster, LocalEmbeddingService, NewEntry,
    SqliteEntryStore, StudyAttributes,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scorecast")]
#[command(about = "Per-student exam score forecasting from study-session check-ins", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path (overrides configuration)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Model directory (overrides configuration)
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

/// Entity selector shared by most subcommands
#[derive(clap::Args)]
struct EntityArgs {
    /// User ID
    #[arg(short, long)]
    user: i64,

    /// Test ID
    #[arg(short, long)]
    test: i64,
}

impl EntityArgs {
    fn key(&self) -> EntityKey {
        EntityKey::new(self.user, self.test)
    }
}

/// Self-reported study-session attributes
#[derive(clap::Args)]
struct SessionArgs {
    #[command(flatten)]
    entity: EntityArgs,

    /// Confidence going into the exam
    #[arg(long)]
    confidence: Option<f64>,

    /// Stress level
    #[arg(long)]
    stress: Option<f64>,

    /// Hours slept the night before
    #[arg(long)]
    sleep: Option<f64>,

    /// Hours spent studying
    #[arg(long)]
    hours_studied: Option<f64>,

    /// Free-text description of how the session felt
    #[arg(long)]
    feeling: Option<String>,
}

impl SessionArgs {
    fn into_entry(self, score: Option<f64>) -> NewEntry {
        NewEntry {
            user_id: self.entity.user,
            test_id: self.entity.test,
            score,
            attributes: StudyAttributes {
                confidence: self.confidence,
                stress: self.stress,
                sleep: self.sleep,
                hours_studied: self.hours_studied,
                feeling_text: self.feeling,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a study session, optionally with its exam score
    Add {
        #[command(flatten)]
        session: SessionArgs,

        /// Exam score, if already known
        #[arg(long)]
        score: Option<f64>,
    },

    /// Set the exam score of an existing entry
    Label {
        /// Entry ID
        id: i64,

        /// Exam score
        score: f64,
    },

    /// List recent entries
    List {
        /// Restrict to one user
        #[arg(short, long, requires = "test")]
        user: Option<i64>,

        /// Restrict to one test
        #[arg(short, long, requires = "user")]
        test: Option<i64>,

        /// Maximum entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Train the model for a user and test
    Train {
        #[command(flatten)]
        entity: EntityArgs,
    },

    /// Show training readiness for a user and test
    Status {
        #[command(flatten)]
        entity: EntityArgs,
    },

    /// Predict the exam score for a study session
    Predict {
        #[command(flatten)]
        session: SessionArgs,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // fastembed's ONNX runtime is noisy below warn
    let filter = EnvFilter::new(format!(
        "scorecast={level},scorecast_core={level},ort=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Scorecast v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config =
        ForecastConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = cli.db_path {
        config.database_path = db_path;
    }
    if let Some(model_dir) = cli.model_dir {
        config.model_dir = model_dir;
    }
    debug!("Using database: {}", config.database_path.display());

    let entries = Arc::new(
        SqliteEntryStore::open(&config.database_path)
            .await
            .context("Failed to open entry store")?,
    );
    let embedder: Arc<dyn EmbeddingService> = LocalEmbeddingService::shared(&config.embedding)?;
    let forecaster = Forecaster::from_config(&config, entries, embedder);

    match cli.command {
        Commands::Add { session, score } => {
            let entry = forecaster.create_entry(session.into_entry(score)).await?;
            print_json(&entry)?;
        }
        Commands::Label { id, score } => {
            let entry = forecaster.label_entry(id, score).await?;
            print_json(&entry)?;
        }
        Commands::List { user, test, limit } => {
            let key = user.zip(test).map(|(u, t)| EntityKey::new(u, t));
            let entries = forecaster.list_entries(key, limit).await?;
            print_json(&entries)?;
        }
        Commands::Train { entity } => {
            let report = forecaster.train(entity.key()).await?;
            print_json(&report)?;
        }
        Commands::Status { entity } => {
            let status = forecaster.status(entity.key()).await?;
            print_json(&status)?;
        }
        Commands::Predict { session } => {
            let prediction = forecaster.predict(session.into_entry(None)).await?;
            print_json(&prediction)?;
        }
    }

    Ok(())
}
