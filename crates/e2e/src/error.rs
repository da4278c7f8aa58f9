//! Error types for the voice E2E harness

use chromiumoxide::error::CdpError;
use thiserror::Error;

use crate::protocol::DiscoveryPath;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server exited before becoming ready ({status})")]
    StartupFailed { status: String },

    #[error("Server did not open port {port} after {attempts} attempts")]
    StartupTimeout { port: u16, attempts: u32 },

    #[error("Voice UI state verification failed: mic button not found ({} buttons on page)", .buttons.len())]
    MicFlowFailure { buttons: Vec<Option<String>> },

    #[error("Transcript never became visible via {path}")]
    TranscriptTimeout {
        path: DiscoveryPath,
        buttons: Vec<Option<String>>,
    },

    #[error("Failed to stop server: {0}")]
    CleanupFailure(String),

    #[error("Interrupted by {0}")]
    Interrupted(String),

    #[error("Verification process exited with {code:?}")]
    VerificationFailed { code: Option<i32> },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("CDP error: {0}")]
    Cdp(#[from] CdpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl E2eError {
    /// Buttons captured for the failure dump, if this failure carries one
    pub fn button_dump(&self) -> Option<&[Option<String>]> {
        match self {
            E2eError::MicFlowFailure { buttons } | E2eError::TranscriptTimeout { buttons, .. } => {
                Some(buttons)
            }
            _ => None,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
