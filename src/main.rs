use clap::{Parser, Subcommand};
use claims_warehouse::{
    config::Config,
    error::Result,
    ingest::SourceKind,
    load::{load_sources, SourceLoadOutcome},
    ml::ModelingService,
    warehouse::{create_warehouse, Warehouse},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "claims-warehouse")]
#[command(about = "Insurance claims loader and severity modeling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to CLAIMS_CONFIG_PATH or config/local.toml)
    #[arg(short, long, env = "CLAIMS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Truncate and reload raw tables from the source files
    Load {
        /// Single source to load (a, b or c); all when omitted
        #[arg(short, long)]
        source: Option<SourceKind>,
    },
    /// Train the severity classifiers on the analytic view
    Model,
    /// Load every source, then model
    Run,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("claims_warehouse={}", config.observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_banner(title: &str) {
    println!("{}", "=".repeat(80));
    println!("{}", title);
    println!("{}", "=".repeat(80));
}

fn print_load(outcome: &SourceLoadOutcome) {
    let schema = outcome.kind.schema();
    print_banner(&format!(
        "{} ({}) -> {}",
        outcome.kind, schema.system, schema.table
    ));
    print!("{}", outcome.verification);
    if !outcome.verification.count_matches() {
        println!("   ⚠ Post-load count does not match inserted rows");
    }
    println!();
}

async fn execute(command: &Commands, config: &Config, warehouse: Arc<dyn Warehouse>) -> Result<()> {
    if let Commands::Load { .. } | Commands::Run = command {
        let kinds = match command {
            Commands::Load { source: Some(kind) } => vec![*kind],
            _ => SourceKind::all(),
        };
        let outcomes = load_sources(&kinds, config, warehouse.as_ref()).await?;
        for outcome in &outcomes {
            print_load(outcome);
        }
        let total: usize = outcomes.iter().map(|o| o.report.rows_inserted).sum();
        println!("✓ Total records loaded: {}", total);
        println!();
    }

    if let Commands::Model | Commands::Run = command {
        let report = ModelingService::new(config.modeling.clone(), warehouse).run().await?;
        print_banner("CLAIM SEVERITY MODELING");
        print!("{}", report);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    tracing::info!("Starting claims-warehouse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(backend = ?config.warehouse.backend, "Warehouse backend");

    let warehouse = match create_warehouse(&config.warehouse).await {
        Ok(warehouse) => warehouse,
        Err(e) => {
            tracing::error!(code = e.error_code(), error = %e, "Warehouse unavailable");
            eprintln!("✗ ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = execute(&cli.command, &config, warehouse.clone()).await;

    if let Err(e) = warehouse.close().await {
        tracing::warn!(error = %e, "Failed to close warehouse connection");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), error = ?e, "Run failed");
            eprintln!("✗ ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}
