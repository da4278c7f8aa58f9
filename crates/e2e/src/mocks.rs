//! Speech recognition mock injection
//!
//! The mock script replaces the page's `SpeechRecognition` constructor before
//! any application code runs. Whatever instance the application constructs
//! last is published as `globalThis.lastRecognition`; that global is reset on
//! every document load, so it lives exactly as long as one page.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::E2eResult;
use crate::locator::js_string;
use crate::page::PageDriver;

/// Mock that ships with the harness, used when no project mock exists
const BUNDLED_MOCK: &str = include_str!("../assets/voice_mocks.js");

/// Page-global name under which the latest recognizer is published
pub const LATEST_RECOGNIZER_GLOBAL: &str = "lastRecognition";

/// Where the injected script came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSource {
    File(PathBuf),
    Bundled,
}

/// A speech API mock ready to be installed into a page
#[derive(Debug, Clone)]
pub struct MockScript {
    source: String,
    origin: MockSource,
}

impl MockScript {
    pub fn bundled() -> Self {
        Self {
            source: BUNDLED_MOCK.to_string(),
            origin: MockSource::Bundled,
        }
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self {
            source,
            origin: MockSource::File(path.to_path_buf()),
        })
    }

    /// The project's mock if it exists on disk, the bundled one otherwise
    pub fn resolve(config: &MockConfig) -> E2eResult<Self> {
        match &config.script_path {
            Some(path) if path.is_file() => Self::from_file(path),
            Some(path) => {
                info!("No mock at {}, using bundled speech mock", path.display());
                Ok(Self::bundled())
            }
            None => Ok(Self::bundled()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> &MockSource {
        &self.origin
    }

    /// Register the script to run ahead of page scripts on every (re)load.
    ///
    /// Must be called before the first navigation.
    pub async fn install(&self, page: &dyn PageDriver) -> E2eResult<RecognitionMock> {
        debug!("Installing speech mock ({:?})", self.origin);
        page.add_init_script(&self.source).await?;
        Ok(RecognitionMock::latest())
    }
}

/// Handle to the most recently constructed mock recognizer in the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionMock {
    global: String,
}

impl RecognitionMock {
    pub fn latest() -> Self {
        Self {
            global: LATEST_RECOGNIZER_GLOBAL.to_string(),
        }
    }

    /// Expression that delivers a result and evaluates to whether a
    /// recognizer existed to receive it
    pub fn emit_result_script(&self, text: &str, is_final: bool) -> String {
        format!(
            "(() => {{ const r = globalThis[{}]; if (!r) return false; r.emitResult({}, {}); return true; }})()",
            js_string(&self.global),
            js_string(text),
            is_final
        )
    }

    /// Synthesize a recognition event on the latest recognizer.
    ///
    /// Returns `false` when the application never constructed one.
    pub async fn emit_result(
        &self,
        page: &dyn PageDriver,
        text: &str,
        is_final: bool,
    ) -> E2eResult<bool> {
        let delivered = page.evaluate(&self.emit_result_script(text, is_final)).await?;
        Ok(delivered.as_bool().unwrap_or(false))
    }
}

/// Configuration for the mock injector
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Project mock script (None = always use the bundled mock)
    pub script_path: Option<PathBuf>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            script_path: Some(PathBuf::from("tests/e2e/mocks/voice_mocks.js")),
        }
    }
}
