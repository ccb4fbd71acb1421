use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::{logging, output};
use shelfscan_core::config::{self, AppConfig};
use shelfscan_core::{pipeline, report, scanner, session};
use std::process::ExitCode;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "shelfscan")]
#[command(about = "Extracts product data from shelf photos with a vision model", long_about = None)]
struct Cli {
    /// Path to a config file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress, analyze and report every image of the input directory
    Run {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and directories, then ping the model
    Check,
    /// List the images the next run would process
    List,
    /// List previous reports, newest first
    Reports,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    match cli.command {
        Commands::Run { json } => run(cfg, json).await,
        Commands::Check => check(cfg).await,
        Commands::List => {
            logging::init_console(&cfg.log_level)?;
            for path in scanner::list_images(&cfg.input_dir) {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reports => {
            logging::init_console(&cfg.log_level)?;
            for path in report::latest_reports(&cfg.output_dir)
                .with_context(|| format!("reading {}", cfg.output_dir.display()))?
            {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(cfg: AppConfig, json: bool) -> Result<ExitCode> {
    let session_id = session::session_id();
    let _guard = logging::init_run(
        &cfg.logs_dir,
        &session_id,
        &cfg.log_level,
        logging::ConsoleTarget::for_output(json),
    )?;
    let result = run_session(&cfg, &session_id, json).await;
    if let Err(e) = &result {
        // Logged while the file writer is still alive.
        error!("session {session_id} failed: {e:#}");
    }
    result
}

async fn run_session(cfg: &AppConfig, session_id: &str, json: bool) -> Result<ExitCode> {
    cfg.validate()?;
    let provider = pipeline::build_registry(cfg)?.vision(None)?;

    let outcome = tokio::select! {
        outcome = pipeline::run(cfg, provider, session_id) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("session {session_id} interrupted");
            return Ok(ExitCode::FAILURE);
        }
    };

    if json {
        let value = output::outcome_json(session_id, &outcome);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", output::outcome_text(session_id, &outcome));
    }
    Ok(ExitCode::SUCCESS)
}

async fn check(cfg: AppConfig) -> Result<ExitCode> {
    logging::init_console(&cfg.log_level)?;
    cfg.validate()?;
    let provider = pipeline::build_registry(&cfg)?.vision(None)?;
    pipeline::preflight(&cfg, provider.as_ref()).await?;
    println!(
        "ok: {} reachable, directories ready under {}",
        provider.model_name(),
        cfg.input_dir.display()
    );
    Ok(ExitCode::SUCCESS)
}
