//! Voice UI verification protocol
//!
//! The application may gate listening behind an explicit mic button or start
//! listening on its own, so the protocol forks after onboarding and accepts
//! either route:
//!
//! ```text
//! Start ─► Navigated ─► (Onboarded) ─► MicDiscovery ─┬─► MicFound ──────────────┐
//!                                                    └─► MicNotFound            │
//!                                                          ├─ "Listening" ──────┤
//!                                                          └─ MicFlowFailure    ▼
//!                                                                        TranscriptCheck
//!                                                                          ├─► Success
//!                                                                          └─► Timeout / ListeningFlowFailure
//! ```

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;
use crate::mocks::{MockScript, RecognitionMock};
use crate::page::PageDriver;

/// Any of these marks a microphone control
pub const MIC_SELECTORS: [&str; 4] = [
    "button:has(svg.lucide-mic)",
    r#"button[aria-label*="record" i]"#,
    r#"button[aria-label*="mic" i]"#,
    r#"button[data-testid="mic-button"]"#,
];

pub fn mic_locator() -> Locator {
    Locator::css(MIC_SELECTORS.join(", "))
}

pub fn button_locator() -> Locator {
    Locator::css("button")
}

/// How the protocol reached the transcript check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPath {
    /// A mic control was found (and clicked unless disabled)
    MicButton,
    /// No mic control, but the page already showed it was listening
    AutoListening,
}

impl fmt::Display for DiscoveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryPath::MicButton => write!(f, "mic button"),
            DiscoveryPath::AutoListening => write!(f, "auto-listening state"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    Navigated,
    Onboarded,
    MicDiscovery,
    MicFound,
    MicNotFound,
    TranscriptCheck,
    Success,
    Failure,
}

/// Result of one protocol run. Failures carry the button dump taken at the
/// moment of failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success { path: DiscoveryPath },
    /// Neither a mic control nor a listening indicator was found
    MicFlowFailure { buttons: Vec<Option<String>> },
    /// Auto-listening path taken, transcript never rendered
    ListeningFlowFailure { buttons: Vec<Option<String>> },
    /// Mic path taken, transcript never rendered
    Timeout { buttons: Vec<Option<String>> },
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationOutcome::Success { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn into_result(self) -> E2eResult<DiscoveryPath> {
        match self {
            VerificationOutcome::Success { path } => Ok(path),
            VerificationOutcome::MicFlowFailure { buttons } => {
                Err(E2eError::MicFlowFailure { buttons })
            }
            VerificationOutcome::ListeningFlowFailure { buttons } => {
                Err(E2eError::TranscriptTimeout {
                    path: DiscoveryPath::AutoListening,
                    buttons,
                })
            }
            VerificationOutcome::Timeout { buttons } => Err(E2eError::TranscriptTimeout {
                path: DiscoveryPath::MicButton,
                buttons,
            }),
        }
    }
}

/// Drives one page through the voice flow
pub struct VoiceProtocol<'a> {
    page: &'a dyn PageDriver,
    recognizer: RecognitionMock,
    config: &'a ProtocolConfig,
    trace: Vec<FlowState>,
}

impl<'a> VoiceProtocol<'a> {
    pub fn new(page: &'a dyn PageDriver, recognizer: RecognitionMock, config: &'a ProtocolConfig) -> Self {
        Self {
            page,
            recognizer,
            config,
            trace: Vec::new(),
        }
    }

    /// States visited so far, in order
    pub fn trace(&self) -> &[FlowState] {
        &self.trace
    }

    /// Run the whole protocol.
    ///
    /// Verification failures come back as an outcome; `Err` is reserved for
    /// the page itself misbehaving (CDP errors, navigation timeouts).
    pub async fn run(&mut self) -> E2eResult<VerificationOutcome> {
        self.enter(FlowState::Start);
        self.navigate().await?;
        self.onboard().await?;

        let path = if self.discover_mic().await? {
            DiscoveryPath::MicButton
        } else {
            info!("Mic button not found.");
            let listening = Locator::text(&self.config.listening_text);
            if !self.page.is_visible(&listening).await? {
                let buttons = self.fail().await;
                return Ok(VerificationOutcome::MicFlowFailure { buttons });
            }
            info!("Found '{}' state! Simulating speech...", self.config.listening_text);
            DiscoveryPath::AutoListening
        };

        self.check_transcript(path).await
    }

    async fn navigate(&mut self) -> E2eResult<()> {
        let config = self.config;
        info!("Navigating to {}...", config.url);

        timeout(config.navigation_timeout, self.page.navigate(&config.url))
            .await
            .map_err(|_| {
                E2eError::Navigation(format!(
                    "{} did not reach DOMContentLoaded within {:?}",
                    config.url, config.navigation_timeout
                ))
            })??;

        self.enter(FlowState::Navigated);
        Ok(())
    }

    /// Click through the onboarding screen when the app shows one
    async fn onboard(&mut self) -> E2eResult<()> {
        let get_started = Locator::text(&self.config.onboarding_text);
        if self.page.count(&get_started).await? == 0 {
            debug!("No onboarding element, skipping");
            return Ok(());
        }

        info!("Clicking '{}'...", self.config.onboarding_text);
        self.page.click(&get_started).await?;
        // No observable signal for the state change, so this one stays a fixed delay
        sleep(self.config.settle_delay).await;

        self.enter(FlowState::Onboarded);
        Ok(())
    }

    async fn discover_mic(&mut self) -> E2eResult<bool> {
        self.enter(FlowState::MicDiscovery);
        info!("Looking for Mic button...");

        let mic = mic_locator();
        if self.page.count(&mic).await? == 0 {
            self.enter(FlowState::MicNotFound);
            return Ok(false);
        }

        self.enter(FlowState::MicFound);
        info!("Found Mic button!");

        if self.page.is_disabled(&mic).await? {
            info!("Mic button is disabled, not clicking");
        } else {
            self.page.click(&mic).await?;
            info!("Clicked Mic button");
        }
        Ok(true)
    }

    async fn check_transcript(&mut self, path: DiscoveryPath) -> E2eResult<VerificationOutcome> {
        self.enter(FlowState::TranscriptCheck);
        info!("Simulating speech...");

        let config = self.config;
        let transcript = &config.transcript;
        let delivered = self.recognizer.emit_result(self.page, transcript, true).await?;
        if !delivered {
            warn!("Page has no recognizer instance; nothing received the result");
        }

        let rendered = wait_for_visible(
            self.page,
            &Locator::text(transcript),
            config.transcript_timeout,
            config.poll_interval,
        )
        .await?;

        if rendered {
            self.enter(FlowState::Success);
            info!("Transcript verified!");
            return Ok(VerificationOutcome::Success { path });
        }

        warn!(
            "'{}' not visible after {:?}",
            transcript, config.transcript_timeout
        );
        let buttons = self.fail().await;
        Ok(match path {
            DiscoveryPath::MicButton => VerificationOutcome::Timeout { buttons },
            DiscoveryPath::AutoListening => VerificationOutcome::ListeningFlowFailure { buttons },
        })
    }

    async fn fail(&mut self) -> Vec<Option<String>> {
        self.enter(FlowState::Failure);
        dump_buttons(self.page).await
    }

    fn enter(&mut self, state: FlowState) {
        debug!("protocol -> {:?}", state);
        self.trace.push(state);
    }
}

/// Install the mock, then run the protocol against `page`
pub async fn verify_voice_flow(
    page: &dyn PageDriver,
    mock: &MockScript,
    config: &ProtocolConfig,
) -> E2eResult<VerificationOutcome> {
    let recognizer = mock.install(page).await?;
    VoiceProtocol::new(page, recognizer, config).run().await
}

/// Poll until `locator` is visible. Checks at least once, even with a zero
/// budget.
pub async fn wait_for_visible(
    page: &dyn PageDriver,
    locator: &Locator,
    within: Duration,
    every: Duration,
) -> E2eResult<bool> {
    let deadline = Instant::now() + within;
    loop {
        if page.is_visible(locator).await? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        sleep(every.min(deadline - now)).await;
    }
}

/// Log and return the text of every button on the page.
///
/// Best effort: a failed query yields an empty dump rather than an error.
pub async fn dump_buttons(page: &dyn PageDriver) -> Vec<Option<String>> {
    let buttons = match page.texts(&button_locator()).await {
        Ok(buttons) => buttons,
        Err(e) => {
            warn!("Could not enumerate buttons: {}", e);
            return Vec::new();
        }
    };

    for (i, text) in buttons.iter().enumerate() {
        match text {
            Some(text) => info!("B{}: {}", i, text.trim()),
            None => info!("B{}: <unreadable>", i),
        }
    }
    buttons
}

/// Configuration for the verification protocol
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Route of the voice input step
    pub url: String,

    /// Budget for reaching DOMContentLoaded
    pub navigation_timeout: Duration,

    /// Text of the optional onboarding button
    pub onboarding_text: String,

    /// Pause after clicking the onboarding button
    pub settle_delay: Duration,

    /// Text that shows the app is already listening
    pub listening_text: String,

    /// Transcript emitted through the mock and expected on screen
    pub transcript: String,

    pub transcript_timeout: Duration,

    /// Interval for condition polling
    pub poll_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5173/#/steps/voice".to_string(),
            navigation_timeout: Duration::from_secs(30),
            onboarding_text: "Get Started".to_string(),
            settle_delay: Duration::from_secs(1),
            listening_text: "Listening".to_string(),
            transcript: "Hello E2E".to_string(),
            transcript_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}
