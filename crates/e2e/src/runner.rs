//! Main test runner that orchestrates the dev server, the browser and the
//! verification protocol

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::browser::{BrowserSession, SessionConfig};
use crate::error::{E2eError, E2eResult};
use crate::mocks::{MockConfig, MockScript};
use crate::protocol::{verify_voice_flow, ProtocolConfig, VerificationOutcome};
use crate::server::{ServerConfig, ServerHandle, Supervised};

/// Separator between the captured streams in the result log
pub const STDERR_MARKER: &str = "\nSTDERR:\n";

/// Hidden subcommand the runner re-invokes itself with
pub const VERIFY_SUBCOMMAND: &str = "verify";

/// Runs the browser-side half of a test and reports pass/fail
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self) -> E2eResult<()>;
}

/// Runs verification in a child process and records what it printed
pub struct SubprocessVerifier {
    program: PathBuf,
    args: Vec<OsString>,
    result_log: PathBuf,
}

impl SubprocessVerifier {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, result_log: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            result_log: result_log.into(),
        }
    }

    /// Re-run the current executable with the hidden `verify` subcommand
    pub fn current_exe(result_log: impl Into<PathBuf>) -> E2eResult<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe, vec![OsString::from(VERIFY_SUBCOMMAND)], result_log))
    }
}

#[async_trait]
impl Verifier for SubprocessVerifier {
    async fn verify(&self) -> E2eResult<()> {
        info!("Running voice verification...");

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await?;
        write_result_log(&self.result_log, &output)?;
        info!("Test output written to {}", self.result_log.display());

        if output.status.success() {
            Ok(())
        } else {
            Err(E2eError::VerificationFailed {
                code: output.status.code(),
            })
        }
    }
}

/// Runs verification in this process against a fresh Chromium
pub struct BrowserVerifier {
    session: SessionConfig,
    protocol: ProtocolConfig,
    mock: MockConfig,
}

impl BrowserVerifier {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            session: config.session.clone(),
            protocol: config.protocol.clone(),
            mock: config.mock.clone(),
        }
    }

    /// One full protocol run. The session is closed on every path.
    pub async fn run(&self) -> E2eResult<VerificationOutcome> {
        let mock = MockScript::resolve(&self.mock)?;
        let session = BrowserSession::launch(&self.session).await?;

        let outcome = verify_voice_flow(session.page(), &mock, &self.protocol).await;

        if let Err(e) = session.close().await {
            warn!("Browser did not shut down cleanly: {}", e);
        }
        outcome
    }
}

#[async_trait]
impl Verifier for BrowserVerifier {
    async fn verify(&self) -> E2eResult<()> {
        let path = self.run().await?.into_result()?;
        info!("Voice flow verified via {}", path);
        Ok(())
    }
}

/// Wait for the server, verify, then stop the server exactly once.
///
/// A startup failure skips verification entirely. Errors from `stop` are
/// logged and never change the result.
pub async fn run_supervised<S, V>(server: &mut S, verifier: &V) -> E2eResult<()>
where
    S: Supervised + ?Sized,
    V: Verifier + ?Sized,
{
    run_supervised_until(server, verifier, std::future::pending::<String>()).await
}

/// [`run_supervised`], abandoned when `shutdown` resolves.
///
/// `shutdown` yields the name of whatever interrupted the run. The server is
/// still stopped exactly once and the run fails with `Interrupted`.
pub async fn run_supervised_until<S, V, F>(server: &mut S, verifier: &V, shutdown: F) -> E2eResult<()>
where
    S: Supervised + ?Sized,
    V: Verifier + ?Sized,
    F: Future<Output = String>,
{
    let run = async {
        match server.await_ready().await {
            Ok(()) => verifier.verify().await,
            Err(e) => Err(e),
        }
    };

    let result = tokio::select! {
        result = run => result,
        cause = shutdown => {
            warn!("Received {}, tearing down", cause);
            Err(E2eError::Interrupted(cause))
        }
    };

    info!("Stopping server...");
    if let Err(e) = server.stop() {
        warn!("Cleanup failed (ignored): {}", e);
    }

    result
}

/// Resolves on Ctrl-C or, on unix, SIGTERM, naming the signal.
///
/// A signal whose handler can't be installed is logged and never fires.
pub async fn shutdown_signal() -> String {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT".to_string(),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM".to_string()
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<String>();

    tokio::select! {
        cause = ctrl_c => cause,
        cause = terminate => cause,
    }
}

/// Write `stdout`, the `STDERR:` marker, then `stderr`
pub fn write_result_log(path: &Path, output: &Output) -> E2eResult<()> {
    let mut contents = Vec::with_capacity(output.stdout.len() + output.stderr.len() + STDERR_MARKER.len());
    contents.extend_from_slice(&output.stdout);
    contents.extend_from_slice(STDERR_MARKER.as_bytes());
    contents.extend_from_slice(&output.stderr);
    std::fs::write(path, contents)?;
    Ok(())
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start the dev server and verify in a child process
    pub async fn run(&self) -> E2eResult<()> {
        let verifier = SubprocessVerifier::current_exe(&self.config.result_log)?;
        self.run_with(&verifier).await
    }

    /// Start the dev server and verify with `verifier`
    pub async fn run_with<V: Verifier + ?Sized>(&self, verifier: &V) -> E2eResult<()> {
        let mut server = ServerHandle::start(&self.config.server)?;
        let result = run_supervised_until(&mut server, verifier, shutdown_signal()).await;

        match &result {
            Ok(()) => info!("Tests PASSED"),
            Err(e) => error!("Tests FAILED: {}", e),
        }
        result
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
    pub mock: MockConfig,

    /// Captured output of the verification process
    pub result_log: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            protocol: ProtocolConfig::default(),
            mock: MockConfig::default(),
            result_log: PathBuf::from("e2e_test_result.log"),
        }
    }
}
