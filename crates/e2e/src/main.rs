//! voice-e2e entry point
//!
//! With no arguments, runs the whole harness: dev server, verification in a
//! child process, teardown. Exits 0 on success and 1 on any failure.

use std::io::IsTerminal;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use voice_e2e::runner::{BrowserVerifier, RunnerConfig, Verifier};
use voice_e2e::TestRunner;

#[derive(Parser, Debug)]
#[command(name = "voice-e2e")]
#[command(about = "End-to-end check of the voice input step")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the browser against an already running server (used internally)
    #[command(hide = true)]
    Verify,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        // The verify child's stdout becomes the result log
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = RunnerConfig::default();
    let result = rt.block_on(async {
        match cli.command {
            None => TestRunner::with_config(config).run().await,
            Some(Commands::Verify) => BrowserVerifier::new(&config).verify().await,
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Test Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
