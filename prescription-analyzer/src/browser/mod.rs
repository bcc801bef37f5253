//! Browser automation seam.
//!
//! Stages talk to a [`BrowserPage`] and never to chromiumoxide directly, so the
//! search and extraction heuristics can be exercised against in-memory HTML.

pub mod chromium;
#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BrowserError;

pub use chromium::ChromiumLauncher;

/// What a stage can observe about one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Rendered text, whitespace-trimmed
    pub text: String,
    /// The element's own link target or that of its closest enclosing anchor
    pub href: Option<String>,
    pub visible: bool,
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Full HTML of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    /// Snapshot every element matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError>;

    /// Click the `index`-th element matching `selector`.
    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError>;

    /// Replace the value of the first input matching `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Type `text` into the first element matching `selector`.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), BrowserError>;

    /// Wait until `selector` matches something. `Ok(false)` when the wait ran out.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError>;

    /// Wait for in-flight navigation and network activity to settle.
    async fn wait_for_idle(&self) -> Result<(), BrowserError>;
}

/// One browser process with a single page, owned by a batch.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> Arc<dyn BrowserPage>;

    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Index and snapshot of the first visible match.
pub async fn first_visible(
    page: &dyn BrowserPage,
    selector: &str,
) -> Result<Option<(usize, ElementSnapshot)>, BrowserError> {
    Ok(page
        .query(selector)
        .await?
        .into_iter()
        .enumerate()
        .find(|(_, el)| el.visible))
}

pub async fn is_visible(page: &dyn BrowserPage, selector: &str) -> bool {
    matches!(first_visible(page, selector).await, Ok(Some(_)))
}

/// First visible match whose text contains `needle`, ignoring case.
pub async fn find_with_text(
    page: &dyn BrowserPage,
    selector: &str,
    needle: &str,
) -> Result<Option<(usize, ElementSnapshot)>, BrowserError> {
    let needle = needle.to_lowercase();
    Ok(page
        .query(selector)
        .await?
        .into_iter()
        .enumerate()
        .find(|(_, el)| el.visible && el.text.to_lowercase().contains(&needle)))
}
