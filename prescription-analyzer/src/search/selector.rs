use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{BrowserPage, ElementSnapshot};
use crate::error::BrowserError;
use crate::pacing::Pacer;

/// Trusted sources, most preferred first.
pub const PREFERRED_DOMAINS: &[&str] = &[
    "1mg.com",
    "apollopharmacy.in",
    "webmd.com",
    "mayoclinic.org",
    "drugs.com",
    "rxlist.com",
    "nih.gov",
    "medlineplus.gov",
    "pharmeasy.in",
    "netmeds.com",
];

/// Search result titles; the link target is the enclosing anchor.
pub const RESULT_TITLE_SELECTOR: &str = "h3";

const RESULTS_WAIT: Duration = Duration::from_secs(10);

/// Pick which search result to open.
///
/// Domain priority beats page order: the first result linking to the most
/// preferred domain wins. Without any preferred match the first result is
/// used; an empty list yields `None`.
pub fn choose_result<S: AsRef<str>>(results: &[ElementSnapshot], preferred: &[S]) -> Option<usize> {
    if results.is_empty() {
        return None;
    }
    preferred
        .iter()
        .find_map(|domain| {
            results.iter().position(|r| {
                r.href
                    .as_deref()
                    .is_some_and(|href| href.contains(domain.as_ref()))
            })
        })
        .or(Some(0))
}

/// Opens the best search result on the current page.
#[derive(Debug, Clone)]
pub struct SiteSelector {
    preferred: Vec<String>,
    results_wait: Duration,
    pacer: Pacer,
}

impl SiteSelector {
    pub fn new(pacer: Pacer) -> Self {
        Self {
            preferred: PREFERRED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            results_wait: RESULTS_WAIT,
            pacer,
        }
    }

    pub fn with_domains(mut self, preferred: Vec<String>) -> Self {
        self.preferred = preferred;
        self
    }

    /// URL of the opened result page, or `None` when nothing could be opened.
    pub async fn select(&self, page: &dyn BrowserPage) -> Option<String> {
        match self.open_best_result(page).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Error in selecting website: {}", e);
                None
            }
        }
    }

    async fn open_best_result(
        &self,
        page: &dyn BrowserPage,
    ) -> Result<Option<String>, BrowserError> {
        if !page.wait_for_selector(RESULT_TITLE_SELECTOR, self.results_wait).await? {
            warn!("No search results appeared");
            return Ok(None);
        }
        self.pacer.delay(1.0, 2.0).await;

        let results = page.query(RESULT_TITLE_SELECTOR).await?;
        info!("Found {} search result links", results.len());

        let Some(index) = choose_result(&results, &self.preferred) else {
            return Ok(None);
        };
        let target = &results[index];
        match self
            .preferred
            .iter()
            .find(|d| target.href.as_deref().is_some_and(|h| h.contains(d.as_str())))
        {
            Some(domain) => info!("Selected result #{} with domain {}", index + 1, domain),
            None => info!("No preferred domain found, selecting first result"),
        }

        page.click(RESULT_TITLE_SELECTOR, index).await?;
        if let Err(e) = page.wait_for_idle().await {
            debug!("Result page did not settle: {}", e);
        }
        Ok(Some(page.current_url().await?))
    }
}
