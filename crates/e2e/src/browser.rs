//! Chromium session over the DevTools protocol

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, GrantPermissionsParams, PermissionType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::locator::{Locator, TARGET_ATTRIBUTE};
use crate::page::PageDriver;

/// Chromium with one isolated context and one page, microphone pre-granted
pub struct BrowserSession {
    browser: Browser,
    context: BrowserContextId,
    page: ChromePage,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch Chromium and open a fresh page in its own browser context
    pub async fn launch(config: &SessionConfig) -> E2eResult<Self> {
        info!("Launching Chromium (headless: {})", config.headless);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.window_width, config.window_height)
            .arg("--use-fake-ui-for-media-stream")
            .arg("--use-fake-device-for-media-stream");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(dir) = &config.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        let cdp_config = builder.build().map_err(E2eError::Browser)?;

        let (browser, mut handler) = Browser::launch(cdp_config).await?;

        // CDP messages only flow while the handler is polled
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });

        let context = browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let mut grant = GrantPermissionsParams::new(vec![PermissionType::AudioCapture]);
        grant.origin = Some(config.origin.clone());
        grant.browser_context_id = Some(context.clone());
        browser.execute(grant).await?;

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context.clone());
        let page = browser.new_page(target).await?;

        Ok(Self {
            browser,
            context,
            page: ChromePage::new(page),
            handler,
        })
    }

    pub fn page(&self) -> &ChromePage {
        &self.page
    }

    /// Dispose the context and shut Chromium down
    pub async fn close(mut self) -> E2eResult<()> {
        debug!("Closing browser session");

        if let Err(e) = self.browser.dispose_browser_context(self.context.clone()).await {
            warn!("Failed to dispose browser context: {}", e);
        }
        let closed = self.browser.close().await.map(|_| ());
        let waited = self.browser.wait().await.map(|_| ());
        self.handler.abort();

        closed?;
        waited?;
        Ok(())
    }
}

/// [`PageDriver`] backed by a chromiumoxide page
pub struct ChromePage {
    page: Page,
    ready_poll: Duration,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            ready_poll: Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn add_init_script(&self, source: &str) -> E2eResult<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
            .await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> E2eResult<()> {
        let response = self.page.execute(NavigateParams::new(url)).await?;
        if let Some(error) = &response.result.error_text {
            return Err(E2eError::Navigation(format!("{}: {}", url, error)));
        }

        // readyState leaves "loading" exactly when DOMContentLoaded fires
        let probe = "document.readyState !== 'loading' && location.href !== 'about:blank'";
        loop {
            match self.evaluate(probe).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => {}
                // The old execution context can vanish mid-navigation
                Err(e) => debug!("readyState probe failed: {}", e),
            }
            sleep(self.ready_poll).await;
        }
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(E2eError::Browser)?;

        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, locator: &Locator) -> E2eResult<()> {
        let marked = self.evaluate(&locator.to_mark_first_query()).await?;
        if marked != Value::Bool(true) {
            return Err(E2eError::Browser(format!("no element matches {}", locator)));
        }

        let element = self
            .page
            .find_element(format!("[{}]", TARGET_ATTRIBUTE))
            .await?;
        element.click().await?;
        Ok(())
    }
}

/// Configuration for the browser session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,

    /// Chromium binary (None = let chromiumoxide find one)
    pub chrome_executable: Option<PathBuf>,

    /// Profile directory; two sessions sharing one can't run at once
    pub user_data_dir: Option<PathBuf>,

    pub window_width: u32,
    pub window_height: u32,

    /// Origin that gets microphone permission
    pub origin: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            user_data_dir: None,
            window_width: 1280,
            window_height: 720,
            origin: "http://localhost:5173".to_string(),
        }
    }
}
