use std::sync::Arc;

use tracing::{debug, warn};

use super::{SiteRegistry, title_case};
use crate::browser::{BrowserPage, first_visible};
use crate::error::BrowserError;

/// Reads the canonical medicine name off an opened product page.
#[derive(Debug, Clone)]
pub struct NameExtractor {
    registry: Arc<SiteRegistry>,
}

impl NameExtractor {
    pub fn new(registry: Arc<SiteRegistry>) -> Self {
        Self { registry }
    }

    /// Best guess at the product name shown at `url`, or `None`.
    pub async fn extract(&self, page: &dyn BrowserPage, url: &str) -> Option<String> {
        match self.try_extract(page, url).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Error extracting medicine name: {}", e);
                None
            }
        }
    }

    async fn try_extract(
        &self,
        page: &dyn BrowserPage,
        url: &str,
    ) -> Result<Option<String>, BrowserError> {
        if let Some(profile) = self.registry.profile_for(url) {
            for selector in &profile.title_selectors {
                if let Some(name) = visible_text(page, selector).await? {
                    debug!(domain = %profile.domain, selector = %selector, "Title found");
                    return Ok(Some(name));
                }
            }
            if let Some(name) = profile.slug_fallback.and_then(|fallback| fallback(url)) {
                return Ok(Some(name));
            }
        }

        if let Some(name) = visible_text(page, "h1").await? {
            return Ok(Some(name));
        }
        Ok(slug_from_path(url))
    }
}

async fn visible_text(
    page: &dyn BrowserPage,
    selector: &str,
) -> Result<Option<String>, BrowserError> {
    Ok(first_visible(page, selector)
        .await?
        .map(|(_, el)| el.text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

/// First hyphenated path segment longer than three characters, humanized.
pub fn slug_from_path(url: &str) -> Option<String> {
    let segments: Vec<String> = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default(),
        Err(_) => url.split('/').map(str::to_string).collect(),
    };
    segments
        .iter()
        .find(|part| part.chars().count() > 3 && part.contains('-') && !part.contains('?'))
        .map(|part| title_case(&part.replace('-', " ")))
        .filter(|name| !name.is_empty())
}
