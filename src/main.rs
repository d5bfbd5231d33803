use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use bookedge::app::Config;
use bookedge::core::backtest::Backtester;
use bookedge::core::db::{create_pool, run_migrations};
use bookedge::core::engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Live,
    Backtest,
}

#[derive(Debug, Parser)]
#[command(name = "bookedge", about = "Arbitrage engine for binary prediction-market CLOBs")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured runtime mode.
    #[arg(long, value_enum)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    config.init_logging();

    let mode = args.mode.unwrap_or(match config.runtime.mode.as_str() {
        "backtest" => Mode::Backtest,
        _ => Mode::Live,
    });

    info!(mode = ?mode, "bookedge starting");
    let result = match mode {
        Mode::Live => engine::run(config, args.config.clone()).await,
        Mode::Backtest => run_backtest(config).await,
    };
    if let Err(e) = result {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
    info!("bookedge stopped");
}

async fn run_backtest(config: Config) -> bookedge::error::Result<()> {
    let pool = create_pool(&config.persistence.db_path)?;
    run_migrations(&pool)?;
    let report = Backtester::from_config(&config, pool).run().await?;
    info!(report = %report, "Backtest finished");
    println!("{report}");
    Ok(())
}
