//! Voice E2E Test Harness
//!
//! Verifies the voice input step of the web application end to end:
//! - Spawns the application's dev server and waits for its port
//! - Launches Chromium with a mocked speech recognition API
//! - Walks the UI to a listening state (mic button or auto-listen)
//! - Emits a recognition result and asserts the transcript renders
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    voice-e2e (parent process)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── ServerHandle::start() -> npm run dev --port 5173     │
//! │    ├── await_ready()   poll localhost:5173, 1s x 30         │
//! │    ├── SubprocessVerifier  voice-e2e verify -> result log   │
//! │    └── stop()          kill the server's process tree       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    voice-e2e verify (child)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserVerifier                                            │
//! │    ├── BrowserSession::launch()  context + mic permission   │
//! │    ├── MockScript::install()     -> RecognitionMock         │
//! │    └── VoiceProtocol::run()      -> VerificationOutcome     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod error;
pub mod locator;
pub mod mocks;
pub mod page;
pub mod protocol;
pub mod runner;
pub mod server;

pub use error::{E2eError, E2eResult};
pub use protocol::{DiscoveryPath, VerificationOutcome, VoiceProtocol};
pub use runner::TestRunner;
