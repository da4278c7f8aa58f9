//! Scripted in-memory page for exercising the protocol without a browser

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use voice_e2e::locator::Locator;
use voice_e2e::mocks::RecognitionMock;
use voice_e2e::page::PageDriver;
use voice_e2e::protocol::{button_locator, mic_locator, ProtocolConfig};
use voice_e2e::{E2eError, E2eResult};

pub const TRANSCRIPT: &str = "Hello E2E";

/// How the fake application behaves
#[derive(Debug, Clone, Default)]
pub struct AppScript {
    /// Shows a "Get Started" button until it is clicked
    pub onboarding: bool,
    /// Starts listening on its own once onboarding is done
    pub listens_after_onboarding: bool,
    /// Listening from the first paint
    pub listens_on_load: bool,
    /// Mic control present; `Some(true)` means disabled
    pub mic_disabled: Option<bool>,
    /// Renders transcripts it receives
    pub renders_transcript: bool,
    /// Text of every `<button>` on the page
    pub buttons: Vec<Option<String>>,
    /// Navigation fails with this message
    pub navigation_error: Option<String>,
    /// Button enumeration throws
    pub buttons_unreadable: bool,
}

#[derive(Debug, Default)]
struct PageState {
    loaded: bool,
    onboarded: bool,
    listening: bool,
    transcript_visible: bool,
    ops: Vec<String>,
}

pub struct FakePage {
    script: AppScript,
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new(script: AppScript) -> Self {
        Self {
            script,
            state: Mutex::new(PageState::default()),
        }
    }

    /// Every call the page received, in order
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    fn record(&self, op: impl Into<String>) {
        self.state.lock().unwrap().ops.push(op.into());
    }

    fn has_mic(&self) -> bool {
        self.script.mic_disabled.is_some()
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn add_init_script(&self, _source: &str) -> E2eResult<()> {
        self.record("init_script");
        Ok(())
    }

    async fn navigate(&self, url: &str) -> E2eResult<()> {
        self.record(format!("navigate:{}", url));
        if let Some(message) = &self.script.navigation_error {
            return Err(E2eError::Navigation(message.clone()));
        }
        let mut state = self.state.lock().unwrap();
        state.loaded = true;
        state.listening = self.script.listens_on_load;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        if expression == RecognitionMock::latest().emit_result_script(TRANSCRIPT, true) {
            self.record("emit");
            let mut state = self.state.lock().unwrap();
            if !state.listening {
                return Ok(Value::Bool(false));
            }
            if self.script.renders_transcript {
                state.transcript_visible = true;
            }
            return Ok(Value::Bool(true));
        }
        Err(E2eError::Browser(format!("unexpected script: {}", expression)))
    }

    async fn click(&self, locator: &Locator) -> E2eResult<()> {
        if locator == &mic_locator() {
            self.record("click:mic");
            self.state.lock().unwrap().listening = true;
            return Ok(());
        }
        if locator == &Locator::text("Get Started") && self.script.onboarding {
            self.record("click:get_started");
            let mut state = self.state.lock().unwrap();
            state.onboarded = true;
            if self.script.listens_after_onboarding {
                state.listening = true;
            }
            return Ok(());
        }
        Err(E2eError::Browser(format!("nothing to click for {}", locator)))
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let state = self.state.lock().unwrap();
        let present = if locator == &mic_locator() {
            self.has_mic()
        } else if locator == &Locator::text("Get Started") {
            self.script.onboarding && !state.onboarded
        } else if locator == &button_locator() {
            return Ok(self.script.buttons.len());
        } else {
            false
        };
        Ok(usize::from(present))
    }

    async fn is_visible(&self, locator: &Locator) -> E2eResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(match locator {
            Locator::Text(t) if t == "Listening" => state.listening,
            Locator::Text(t) if t == TRANSCRIPT => state.transcript_visible,
            _ => false,
        })
    }

    async fn is_disabled(&self, locator: &Locator) -> E2eResult<bool> {
        if locator == &mic_locator() {
            return Ok(self.script.mic_disabled.unwrap_or(false));
        }
        Ok(false)
    }

    async fn texts(&self, locator: &Locator) -> E2eResult<Vec<Option<String>>> {
        if locator == &button_locator() {
            if self.script.buttons_unreadable {
                return Err(E2eError::Browser("execution context destroyed".to_string()));
            }
            return Ok(self.script.buttons.clone());
        }
        Ok(Vec::new())
    }
}

/// Defaults with every wait shrunk so tests finish quickly
pub fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        settle_delay: Duration::ZERO,
        transcript_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        navigation_timeout: Duration::from_secs(1),
        ..ProtocolConfig::default()
    }
}
