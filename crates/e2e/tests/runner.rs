//! Runner orchestration: teardown guarantees and result artifacts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use std::time::Duration;

use voice_e2e::runner::{run_supervised, run_supervised_until, Verifier};
use voice_e2e::server::Supervised;
use voice_e2e::{E2eError, E2eResult};

#[derive(Clone, Copy)]
enum Startup {
    Ready,
    Timeout,
}

struct FakeServer {
    startup: Startup,
    stop_fails: bool,
    stops: Arc<AtomicUsize>,
}

impl FakeServer {
    fn new(startup: Startup) -> Self {
        Self {
            startup,
            stop_fails: false,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Supervised for FakeServer {
    async fn await_ready(&mut self) -> E2eResult<()> {
        match self.startup {
            Startup::Ready => Ok(()),
            Startup::Timeout => Err(E2eError::StartupTimeout {
                port: 5173,
                attempts: 30,
            }),
        }
    }

    fn stop(&mut self) -> E2eResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.stop_fails {
            return Err(E2eError::CleanupFailure("taskkill exited with 128".to_string()));
        }
        Ok(())
    }
}

struct FakeVerifier {
    passes: bool,
    calls: AtomicUsize,
}

impl FakeVerifier {
    fn new(passes: bool) -> Self {
        Self {
            passes,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn verify(&self) -> E2eResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.passes {
            Ok(())
        } else {
            Err(E2eError::MicFlowFailure { buttons: vec![] })
        }
    }
}

#[tokio::test]
async fn test_success_stops_server_once() {
    let mut server = FakeServer::new(Startup::Ready);
    let verifier = FakeVerifier::new(true);

    let result = run_supervised(&mut server, &verifier).await;

    assert!(result.is_ok());
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_verification_still_stops_server_once() {
    let mut server = FakeServer::new(Startup::Ready);
    let verifier = FakeVerifier::new(false);

    let result = run_supervised(&mut server, &verifier).await;

    assert!(matches!(result, Err(E2eError::MicFlowFailure { .. })));
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_startup_timeout_skips_browser_work() {
    let mut server = FakeServer::new(Startup::Timeout);
    let verifier = FakeVerifier::new(true);

    let result = run_supervised(&mut server, &verifier).await;

    assert!(matches!(
        result,
        Err(E2eError::StartupTimeout { port: 5173, .. })
    ));
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_change_outcome() {
    let mut server = FakeServer {
        stop_fails: true,
        ..FakeServer::new(Startup::Ready)
    };
    let verifier = FakeVerifier::new(true);

    let result = run_supervised(&mut server, &verifier).await;

    assert!(result.is_ok());
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

/// Never finishes, like a browser stuck on a page
struct StuckVerifier;

#[async_trait]
impl Verifier for StuckVerifier {
    async fn verify(&self) -> E2eResult<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_shutdown_during_verification_stops_server_once() {
    let mut server = FakeServer::new(Startup::Ready);
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        "SIGTERM".to_string()
    };

    let result = run_supervised_until(&mut server, &StuckVerifier, shutdown).await;

    assert!(matches!(result, Err(E2eError::Interrupted(ref cause)) if cause == "SIGTERM"));
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unfired_shutdown_leaves_result_alone() {
    let mut server = FakeServer::new(Startup::Ready);
    let verifier = FakeVerifier::new(true);

    let result = run_supervised_until(&mut server, &verifier, std::future::pending::<String>()).await;

    assert!(result.is_ok());
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}

#[cfg(unix)]
mod subprocess {
    use std::ffi::OsString;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use voice_e2e::runner::{RunnerConfig, SubprocessVerifier, Verifier};
    use voice_e2e::server::ServerConfig;
    use voice_e2e::{E2eError, TestRunner};

    use super::FakeVerifier;

    fn sh(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[tokio::test]
    async fn test_result_log_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("e2e_test_result.log");
        let verifier = SubprocessVerifier::new("sh", sh("echo passed; echo noise >&2"), &log);

        verifier.verify().await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "passed\n\nSTDERR:\nnoise\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("e2e_test_result.log");
        let verifier = SubprocessVerifier::new("sh", sh("echo 'B0: Next'; exit 1"), &log);

        let result = verifier.verify().await;

        assert!(matches!(
            result,
            Err(E2eError::VerificationFailed { code: Some(1) })
        ));
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with("B0: Next\n"));
        assert!(contents.contains("STDERR:"));
    }

    #[tokio::test]
    async fn test_runner_against_real_process() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();

        let config = RunnerConfig {
            server: ServerConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo dev server up; exec sleep 30".to_string()],
                port,
                log_path: dir.path().join("e2e_test_output.log"),
                startup_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(50),
                ..ServerConfig::default()
            },
            result_log: dir.path().join("e2e_test_result.log"),
            ..RunnerConfig::default()
        };
        let verifier = FakeVerifier::new(true);

        TestRunner::with_config(config).run_with(&verifier).await.unwrap();

        assert_eq!(verifier.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(dir.path().join("e2e_test_output.log").exists());
    }
}
