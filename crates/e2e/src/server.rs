//! Server management - spawning the dev server, polling its port, tearing it down

use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Port the application's dev server is told to listen on
pub const DEFAULT_PORT: u16 = 5173;

/// Lifecycle of the spawned application process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Ready,
    Failed,
    Stopped,
}

/// Something the runner can wait on and must tear down exactly once
#[async_trait]
pub trait Supervised: Send {
    /// Block until the server accepts connections or the startup budget runs out
    async fn await_ready(&mut self) -> E2eResult<()>;

    /// Terminate the server and everything it spawned. Idempotent.
    fn stop(&mut self) -> E2eResult<()>;
}

/// Handle to a running dev server process
pub struct ServerHandle {
    child: Child,
    port: u16,
    state: ReadinessState,
    startup_timeout: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl ServerHandle {
    /// Spawn the dev server with stdout and stderr going to the log artifact.
    ///
    /// Returns as soon as the process is started; readiness is checked
    /// separately with [`Supervised::await_ready`].
    pub fn start(config: &ServerConfig) -> E2eResult<Self> {
        info!("Starting dev server: {} {}", config.program, config.args.join(" "));

        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let log = File::create(&config.log_path)?;

        let mut cmd = shell_command(&config.program, &config.args);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        // New process group so the whole tree can be signalled at once
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn {}: {}", config.program, e))
        })?;

        debug!(
            "Dev server pid {} logging to {}",
            child.id(),
            config.log_path.display()
        );

        Ok(Self {
            child,
            port: config.port,
            state: ReadinessState::Starting,
            startup_timeout: config.startup_timeout,
            poll_interval: config.poll_interval,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Poll `localhost:port` once per interval until a connection succeeds.
    ///
    /// This only proves the port is open, not that the application has
    /// finished its client-side initialization.
    pub async fn await_ready_on(&mut self, port: u16, timeout_duration: Duration) -> E2eResult<()> {
        info!("Waiting for server on port {}...", port);

        let max_attempts = attempt_budget(timeout_duration, self.poll_interval);
        let mut attempts = 0;

        loop {
            if port_open(port, self.poll_interval).await {
                self.state = ReadinessState::Ready;
                info!("Server is ready!");
                return Ok(());
            }

            if let Some(status) = self.child.try_wait()? {
                self.state = ReadinessState::Failed;
                warn!("Server exited during startup: {}", status);
                return Err(E2eError::StartupFailed {
                    status: status.to_string(),
                });
            }

            if attempts >= max_attempts {
                self.state = ReadinessState::Failed;
                warn!("Server failed to start in {:?}", timeout_duration);
                return Err(E2eError::StartupTimeout { port, attempts });
            }

            sleep(self.poll_interval).await;
            attempts += 1;
        }
    }
}

#[async_trait]
impl Supervised for ServerHandle {
    async fn await_ready(&mut self) -> E2eResult<()> {
        self.await_ready_on(self.port, self.startup_timeout).await
    }

    fn stop(&mut self) -> E2eResult<()> {
        if self.state == ReadinessState::Stopped {
            return Ok(());
        }
        self.state = ReadinessState::Stopped;

        let pid = self.child.id();
        info!("Stopping server (pid: {})", pid);

        let tree = terminate_tree(&mut self.child, self.shutdown_grace);

        // Reap the group leader even if signalling the tree failed
        let reaped = match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => self
                .child
                .kill()
                .and_then(|_| self.child.wait())
                .map(|_| ())
                .map_err(|e| E2eError::CleanupFailure(format!("kill pid {}: {}", pid, e))),
        };

        tree.and(reaped)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

/// Configuration for spawning the dev server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Program to run (resolved through `cmd /C` on Windows)
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Port the server is expected to open
    pub port: u16,

    /// Working directory (None = inherit)
    pub working_dir: Option<PathBuf>,

    /// Combined stdout/stderr artifact
    pub log_path: PathBuf,

    /// Total budget for the port to open
    pub startup_timeout: Duration,

    /// Delay between connection attempts
    pub poll_interval: Duration,

    /// How long the tree gets to exit after SIGTERM before SIGKILL
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: ["run", "dev", "--", "--port", "5173"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            port: DEFAULT_PORT,
            working_dir: None,
            log_path: PathBuf::from("e2e_test_output.log"),
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Number of failed polls tolerated before giving up
fn attempt_budget(total: Duration, interval: Duration) -> u32 {
    let budget = total.as_millis() / interval.as_millis().max(1);
    u32::try_from(budget).unwrap_or(u32::MAX).max(1)
}

async fn port_open(port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect(("localhost", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(unix)]
fn shell_command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

#[cfg(windows)]
fn shell_command(program: &str, args: &[String]) -> Command {
    // npm is a .cmd shim on Windows and needs the shell to resolve it
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(program).args(args);
    cmd
}

#[cfg(unix)]
fn terminate_tree(child: &mut Child, grace: Duration) -> E2eResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use std::time::Instant;

    let group = Pid::from_raw(child.id() as i32);

    match killpg(group, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(E2eError::CleanupFailure(format!(
                "SIGTERM to process group {}: {}",
                group, e
            )))
        }
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if child.try_wait()?.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Grandchildren can outlive the leader, so the group is always swept
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(E2eError::CleanupFailure(format!(
            "SIGKILL to process group {}: {}",
            group, e
        ))),
    }
}

#[cfg(windows)]
fn terminate_tree(child: &mut Child, _grace: Duration) -> E2eResult<()> {
    let output = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &child.id().to_string()])
        .output()?;

    if output.status.success() || child.try_wait()?.is_some() {
        return Ok(());
    }

    Err(E2eError::CleanupFailure(format!(
        "taskkill exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}
