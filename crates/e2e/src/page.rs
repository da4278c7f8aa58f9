//! The page surface the verification protocol drives

use async_trait::async_trait;
use serde_json::Value;

use crate::error::E2eResult;
use crate::locator::Locator;

/// One browser page, as seen by the mock injector and the protocol.
///
/// Implemented over CDP by [`crate::browser::ChromePage`]; tests script their
/// own pages.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Run `source` in every frame before any page script, on every load
    async fn add_init_script(&self, source: &str) -> E2eResult<()>;

    /// Load `url` and return once the DOM content has loaded
    async fn navigate(&self, url: &str) -> E2eResult<()>;

    /// Evaluate an expression in the page and return its JSON value
    async fn evaluate(&self, expression: &str) -> E2eResult<Value>;

    /// Click the first element matching `locator`
    async fn click(&self, locator: &Locator) -> E2eResult<()>;

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let value = self.evaluate(&locator.to_count_query()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Whether any match is currently rendered
    async fn is_visible(&self, locator: &Locator) -> E2eResult<bool> {
        let value = self.evaluate(&locator.to_visible_query()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_disabled(&self, locator: &Locator) -> E2eResult<bool> {
        let value = self.evaluate(&locator.to_disabled_query()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Text content of every match, `None` for elements that couldn't be read
    async fn texts(&self, locator: &Locator) -> E2eResult<Vec<Option<String>>> {
        let value = self.evaluate(&locator.to_texts_query()).await?;
        Ok(serde_json::from_value(value)?)
    }
}
