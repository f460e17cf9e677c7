//! validator-client: command-line access to the validator daemon.
//!
//! ## Subcommands
//!
//! - `health`: daemon status and notifier counters
//! - `validate`: submit a batch of readings from a JSON file (or stdin)
//! - `summaries`: dump the summaries tracked for the current event

mod daemon_client;

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use validator_protocol::{Method, Reading};

#[derive(Parser)]
#[command(name = "validator-client")]
#[command(about = "Demand-response validator client")]
#[command(version)]
struct Cli {
    /// Daemon socket (defaults to $VALIDATOR_SOCKET, then ~/.gridwatch/validator.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is up
    Health,

    /// Submit a batch of average-output readings
    Validate {
        /// JSON file holding an array of readings, or `-` for stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show summaries tracked for the current event
    Summaries,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let socket = match cli.socket.map_or_else(daemon_client::socket_path, Ok) {
        Ok(path) => path,
        Err(err) => {
            tracing::error!(error = %err, "Failed to resolve daemon socket");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Health => daemon_client::call(&socket, Method::GetHealth, None),
        Commands::Validate { file } => load_batch(&file).and_then(|batch| {
            let params = serde_json::json!({ "average_outputs": batch });
            daemon_client::call(&socket, Method::ValidateAverageOutputs, Some(params))
        }),
        Commands::Summaries => daemon_client::call(&socket, Method::GetSummaries, None),
    };

    match result {
        Ok(data) => match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                tracing::error!(error = %err, "Failed to format response");
                std::process::exit(1);
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "validator-client failed");
            std::process::exit(1);
        }
    }
}

/// Accepts either a bare array of readings or `{"average_outputs": [...]}`.
fn load_batch(file: &Path) -> Result<Vec<Reading>, String> {
    let content = if file.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|err| format!("Failed to read stdin: {}", err))?;
        buffer
    } else {
        fs_err::read_to_string(file).map_err(|err| format!("Failed to read batch: {}", err))?
    };

    parse_batch_file(&content)
}

fn parse_batch_file(content: &str) -> Result<Vec<Reading>, String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|err| format!("Batch is not valid JSON: {}", err))?;
    let readings = match value {
        serde_json::Value::Object(mut object) => object
            .remove("average_outputs")
            .ok_or_else(|| "Batch object has no average_outputs".to_string())?,
        other => other,
    };
    serde_json::from_value(readings).map_err(|err| format!("Batch is malformed: {}", err))
}
