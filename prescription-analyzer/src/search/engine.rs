use tracing::{debug, info, warn};

use super::selector::SiteSelector;
use crate::browser::{BrowserPage, find_with_text, first_visible};
use crate::error::BrowserError;
use crate::models::SearchOutcome;
use crate::pacing::Pacer;

/// Appended to every medicine name to steer results toward drug pages.
pub const QUERY_SUFFIX: &str = " medicine links";

/// Search box candidates, tried in order.
pub const SEARCH_INPUT_SELECTORS: &[&str] = &["textarea.gLFyf", "#APjFqb", "textarea[name=\"q\"]"];

const CONSENT_TEXT: &str = "Accept all";
const DID_YOU_MEAN_TEXT: &str = "Did you mean";
const SHOWING_RESULTS_TEXT: &str = "Showing results for";
const SUGGESTION_SELECTORS: &[&str] = &["a.gL9Hy", "i"];
const SUGGESTION_LINK_SELECTOR: &str = "a.gL9Hy, .spell_orig a";
const AUTO_CORRECTION_NOTICE: &str = ".spell_orig";
const AUTO_CORRECTION_TERM: &str = ".spell_orig a, .spell b";

pub fn query_for(name: &str) -> String {
    format!("{name}{QUERY_SUFFIX}")
}

/// Drives the search engine for one medicine name.
pub struct SearchStage {
    engine_url: String,
    pacer: Pacer,
    selector: SiteSelector,
}

impl SearchStage {
    pub fn new(engine_url: impl Into<String>, pacer: Pacer) -> Self {
        Self {
            engine_url: engine_url.into(),
            pacer,
            selector: SiteSelector::new(pacer),
        }
    }

    pub fn with_selector(mut self, selector: SiteSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Search for `name`, follow any spelling correction and open the best result.
    ///
    /// Only navigation to the engine itself is fatal; everything after that
    /// degrades to the uncorrected name or a missing URL.
    pub async fn search(
        &self,
        page: &dyn BrowserPage,
        name: &str,
    ) -> Result<SearchOutcome, BrowserError> {
        let query = query_for(name);

        page.goto(&self.engine_url).await?;
        self.pacer.delay(1.0, 2.0).await;

        self.accept_consent(page).await;

        match self.submit_query(page, &query).await {
            Ok(true) => {}
            Ok(false) => warn!("No search input found on {}", self.engine_url),
            Err(e) => warn!("Typing the query failed: {}", e),
        }
        if let Err(e) = page.wait_for_idle().await {
            debug!("Results page did not settle: {}", e);
        }

        let corrected = self.detect_correction(page, &query).await;
        let corrected_name = strip_query_suffix(&corrected, name);
        info!("Using medicine name: {}", corrected_name);

        let url = self.selector.select(page).await;
        match &url {
            Some(url) => info!("Selected URL: {}", url),
            None => warn!("Failed to select a website for {}", corrected_name),
        }

        Ok(SearchOutcome { corrected_name, url })
    }

    async fn accept_consent(&self, page: &dyn BrowserPage) {
        if let Ok(Some((index, _))) = find_with_text(page, "button", CONSENT_TEXT).await {
            match page.click("button", index).await {
                Ok(()) => self.pacer.delay(1.0, 2.0).await,
                Err(e) => debug!("Consent dialog could not be dismissed: {}", e),
            }
        }
    }

    /// Type the query into the first visible search box. `Ok(false)` if there is none.
    async fn submit_query(
        &self,
        page: &dyn BrowserPage,
        query: &str,
    ) -> Result<bool, BrowserError> {
        for selector in SEARCH_INPUT_SELECTORS {
            let Some((index, _)) = first_visible(page, selector).await? else {
                continue;
            };
            page.click(selector, index).await?;
            self.pacer.delay(0.5, 1.0).await;

            page.fill(selector, "").await?;
            self.pacer.delay(0.5, 1.0).await;

            let mut buf = [0u8; 4];
            for ch in query.chars() {
                page.type_text(selector, ch.encode_utf8(&mut buf)).await?;
                self.pacer.keystroke().await;
            }

            self.pacer.delay(0.5, 1.0).await;
            page.press_key(selector, "Enter").await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// The engine's corrected query, or `query` unchanged.
    async fn detect_correction(&self, page: &dyn BrowserPage, query: &str) -> String {
        let mut corrected = query.to_string();

        if let Ok(Some(_)) = find_with_text(page, "a", DID_YOU_MEAN_TEXT).await {
            match first_text(page, SUGGESTION_SELECTORS).await {
                Some(suggestion) => {
                    info!("Search engine suggested: {}", suggestion);
                    corrected = suggestion;
                    self.pacer.delay(1.0, 2.0).await;
                    if let Err(e) = page.click(SUGGESTION_LINK_SELECTOR, 0).await {
                        debug!("Could not follow the suggestion: {}", e);
                    } else if let Err(e) = page.wait_for_idle().await {
                        debug!("Suggested results did not settle: {}", e);
                    }
                    self.pacer.delay(1.0, 3.0).await;
                }
                None => warn!("Found 'Did you mean' but couldn't extract the text"),
            }
        }

        if has_auto_correction(page).await {
            match first_text(page, &[AUTO_CORRECTION_TERM]).await {
                Some(correction) => {
                    info!("Search engine automatically corrected to: {}", correction);
                    corrected = correction;
                }
                None => warn!("Automatic correction present but its text could not be read"),
            }
        }

        corrected
    }
}

async fn has_auto_correction(page: &dyn BrowserPage) -> bool {
    let notice = page
        .query("p")
        .await
        .map(|els| els.iter().any(|el| el.text.contains(SHOWING_RESULTS_TEXT)))
        .unwrap_or(false);
    notice || page.query(AUTO_CORRECTION_NOTICE).await.is_ok_and(|els| !els.is_empty())
}

/// Text of the first non-empty match across `selectors`, with any notice prefix removed.
async fn first_text(page: &dyn BrowserPage, selectors: &[&str]) -> Option<String> {
    for selector in selectors {
        let Ok(elements) = page.query(selector).await else {
            continue;
        };
        if let Some(text) = elements
            .iter()
            .map(|el| clean_notice(&el.text))
            .find(|text| !text.is_empty())
        {
            return Some(text);
        }
    }
    None
}

fn clean_notice(text: &str) -> String {
    let mut text = text.trim();
    for prefix in [DID_YOU_MEAN_TEXT, SHOWING_RESULTS_TEXT] {
        if text.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            text = text[prefix.len()..].trim_start_matches([':', ' ']);
        }
    }
    text.trim().to_string()
}

/// Drop the query suffix the engine echoes back; fall back to `name` if nothing is left.
pub fn strip_query_suffix(corrected: &str, name: &str) -> String {
    let trimmed = corrected.trim();
    let suffix = QUERY_SUFFIX.trim();
    let split = trimmed.len().saturating_sub(suffix.len());
    let stem = match trimmed.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(suffix) => trimmed[..split].trim(),
        _ => trimmed,
    };
    if stem.is_empty() {
        name.to_string()
    } else {
        stem.to_string()
    }
}
