use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use slotswap_core::Slot;

mod commands;
mod compose;

#[derive(Parser)]
#[command(
    name = "slotswap",
    about = "Blue/green deployments for docker compose applications",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = "slotswap.toml")]
    config: PathBuf,

    /// Override [app].name from the configuration file.
    #[arg(long, global = true)]
    app_name: Option<String>,

    /// Override [app].state_dir from the configuration file.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Set an option, e.g. `--set plugin.audit.AUDIT_ENABLED=false`.
    /// Repeatable. See `slotswap options`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a version to the inactive slot and move traffic onto it.
    Deploy {
        /// Version to deploy (image tag or build id).
        #[arg(id = "release", value_name = "VERSION")]
        version: String,
        /// Continue even if the new slot fails its health check.
        #[arg(long)]
        force: bool,
        /// Do not probe the new slot at all.
        #[arg(long)]
        skip_health_check: bool,
    },
    /// Move all traffic back to the previously active slot.
    Rollback {
        /// Continue even if the previous slot fails its health check.
        #[arg(long)]
        force: bool,
        /// Ask migration hooks to roll the database back (`DB_ROLLBACK`).
        #[arg(long)]
        db_rollback: bool,
        /// Stop the abandoned slot afterwards.
        #[arg(long)]
        clean: bool,
    },
    /// Set traffic weights by hand.
    ///
    /// Without weights all traffic goes to the target, which becomes active.
    Cutover {
        /// Slot to move traffic to (blue or green).
        #[arg(long)]
        target: Slot,
        #[arg(long, requires = "green_weight")]
        blue_weight: Option<u16>,
        #[arg(long, requires = "blue_weight")]
        green_weight: Option<u16>,
    },
    /// Stop the inactive slot.
    Cleanup,
    /// Show slots, weights, the lock and recent deployments.
    Status {
        /// Number of past deployments to show.
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Remove the deployment lock left behind by a crashed run.
    Unlock,
    /// List every recognized option with its resolved value.
    Options,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,slotswap=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let globals = commands::Globals {
        config: cli.config,
        app_name: cli.app_name,
        state_dir: cli.state_dir,
        overrides: cli.overrides,
    };

    let result = match cli.command {
        Commands::Deploy {
            version,
            force,
            skip_health_check,
        } => commands::deploy::deploy(&globals, &version, force, skip_health_check).await,
        Commands::Rollback {
            force,
            db_rollback,
            clean,
        } => commands::deploy::rollback(&globals, force, db_rollback, clean).await,
        Commands::Cutover {
            target,
            blue_weight,
            green_weight,
        } => {
            let weights = blue_weight.zip(green_weight);
            commands::traffic::cutover(&globals, target, weights).await
        }
        Commands::Cleanup => commands::traffic::cleanup(&globals).await,
        Commands::Status { limit, json } => commands::status::status(&globals, limit, json).await,
        Commands::Unlock => commands::status::unlock(&globals),
        Commands::Options => commands::status::options(&globals),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(err) = e.downcast_ref::<slotswap_deploy::DeployError>() {
                eprintln!("  kind: {}", err.kind());
            }
            ExitCode::FAILURE
        }
    }
}
