//! In-memory page backed by static HTML, for exercising stages without Chromium.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::{BrowserLauncher, BrowserPage, BrowserSession, ElementSnapshot};
use crate::error::BrowserError;

const BLANK: &str = "<html><head></head><body></body></html>";

#[derive(Default)]
struct State {
    routes: HashMap<String, String>,
    current: String,
    typed: String,
    submit_to: Option<String>,
    query_routes: HashMap<String, String>,
    submitted: Vec<String>,
    failing: HashSet<&'static str>,
    broken: HashSet<String>,
}

impl State {
    fn current_html(&self) -> String {
        self.routes.get(&self.current).cloned().unwrap_or_else(|| BLANK.to_string())
    }
}

/// A page that serves registered HTML per URL.
///
/// Clicking an element follows its closest anchor. Pressing Enter records the
/// typed text and navigates to the URL registered for that text with
/// [`FakePage::on_query`], or else to the one set with [`FakePage::on_submit`].
#[derive(Default)]
pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.lock().routes.insert(url.to_string(), html.to_string());
        self
    }

    pub fn on_submit(self, url: &str) -> Self {
        self.lock().submit_to = Some(url.to_string());
        self
    }

    /// Where Enter leads when exactly `text` was typed.
    pub fn on_query(self, text: &str, url: &str) -> Self {
        self.lock().query_routes.insert(text.to_string(), url.to_string());
        self
    }

    /// Reading the content of `url` fails; other pages are unaffected.
    pub fn broken_at(self, url: &str) -> Self {
        self.lock().broken.insert(url.to_string());
        self
    }

    /// Make one operation fail: `goto`, `content`, `query`, `click`, `type` or `idle`.
    pub fn failing(self, op: &'static str) -> Self {
        self.lock().failing.insert(op);
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: &'static str) -> Result<(), BrowserError> {
        if self.lock().failing.contains(op) {
            Err(BrowserError::Cdp(format!("{op} failed")))
        } else {
            Ok(())
        }
    }

    fn navigate(&self, url: &str) {
        let mut state = self.lock();
        state.current = url.to_string();
        state.typed.clear();
    }

    fn snapshot(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let (html, base) = {
            let state = self.lock();
            (state.current_html(), state.current.clone())
        };
        let selector = Selector::parse(selector)
            .map_err(|_| BrowserError::InvalidSelector(selector.to_string()))?;
        let document = Html::parse_document(&html);

        Ok(document
            .select(&selector)
            .map(|el| ElementSnapshot {
                text: el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" "),
                href: link_target(el).map(|href| resolve(&base, &href)),
                visible: is_rendered(el),
            })
            .collect())
    }
}

fn self_and_ancestors(el: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap))
}

fn link_target(el: ElementRef<'_>) -> Option<String> {
    self_and_ancestors(el)
        .find(|e| e.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn is_rendered(el: ElementRef<'_>) -> bool {
    !self_and_ancestors(el).any(|e| {
        let style = e
            .value()
            .attr("style")
            .unwrap_or_default()
            .replace(' ', "")
            .to_lowercase();
        e.value().attr("hidden").is_some() || style.contains("display:none")
    })
}

fn resolve(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        if self.check("goto").is_err() {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.navigate(url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.lock().current.clone())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.check("content")?;
        let state = self.lock();
        if state.broken.contains(&state.current) {
            return Err(BrowserError::Cdp(format!("{} crashed", state.current)));
        }
        Ok(state.current_html())
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError> {
        self.check("query")?;
        self.snapshot(selector)
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        self.check("click")?;
        let target = self
            .snapshot(selector)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| BrowserError::ElementNotFound(format!("{selector} [{index}]")))?;
        if let Some(href) = target.href {
            self.navigate(&href);
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.check("type")?;
        if self.snapshot(selector)?.is_empty() {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.lock().typed = value.to_string();
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.check("type")?;
        if self.snapshot(selector)?.is_empty() {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.lock().typed.push_str(text);
        Ok(())
    }

    async fn press_key(&self, _selector: &str, key: &str) -> Result<(), BrowserError> {
        if key != "Enter" {
            return Ok(());
        }
        let target = {
            let mut state = self.lock();
            let typed = state.typed.clone();
            let target = state
                .query_routes
                .get(&typed)
                .cloned()
                .or_else(|| state.submit_to.clone());
            state.submitted.push(typed);
            target
        };
        if let Some(url) = target {
            self.navigate(&url);
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, BrowserError> {
        Ok(!self.snapshot(selector)?.is_empty())
    }

    async fn wait_for_idle(&self) -> Result<(), BrowserError> {
        self.check("idle")
    }
}

/// Launches sessions around one shared [`FakePage`] and records how often they were closed.
pub struct FakeLauncher {
    page: Arc<FakePage>,
    closed: Arc<AtomicUsize>,
    fail_launch: bool,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Arc::new(page),
            closed: Arc::new(AtomicUsize::new(0)),
            fail_launch: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(FakePage::new())
        }
    }

    pub fn page(&self) -> Arc<FakePage> {
        self.page.clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if self.fail_launch {
            return Err(BrowserError::Launch("no browser available".to_string()));
        }
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
            closed: self.closed.clone(),
            is_closed: AtomicBool::new(false),
        }))
    }
}

struct FakeSession {
    page: Arc<FakePage>,
    closed: Arc<AtomicUsize>,
    is_closed: AtomicBool,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> Arc<dyn BrowserPage> {
        self.page.clone()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if !self.is_closed.swap(true, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clicks_follow_the_enclosing_anchor() {
        let page = FakePage::new().with_page(
            "https://search.test/results",
            r#"<a href="https://www.1mg.com/drugs/dolo-650"><h3>Dolo 650 Tablet</h3></a>
               <a href="/local"><h3>Local</h3></a>"#,
        );
        page.goto("https://search.test/results").await.unwrap();

        let results = page.query("h3").await.unwrap();
        assert_eq!(results[1].href.as_deref(), Some("https://search.test/local"));

        page.click("h3", 0).await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://www.1mg.com/drugs/dolo-650");
    }

    #[tokio::test]
    async fn enter_submits_the_typed_text() {
        let page = FakePage::new()
            .with_page("https://search.test/", r#"<textarea name="q"></textarea>"#)
            .on_submit("https://search.test/results");
        page.goto("https://search.test/").await.unwrap();
        page.fill("textarea", "").await.unwrap();
        page.type_text("textarea", "do").await.unwrap();
        page.type_text("textarea", "lo").await.unwrap();
        page.press_key("textarea", "Enter").await.unwrap();

        assert_eq!(page.submitted(), vec!["dolo"]);
        assert_eq!(page.current_url().await.unwrap(), "https://search.test/results");
    }

    #[tokio::test]
    async fn queries_can_lead_to_their_own_pages() {
        let page = FakePage::new()
            .with_page("https://search.test/", r#"<textarea name="q"></textarea>"#)
            .on_query("dolo", "https://search.test/dolo")
            .on_submit("https://search.test/other")
            .broken_at("https://search.test/dolo");

        page.goto("https://search.test/").await.unwrap();
        page.type_text("textarea", "dolo").await.unwrap();
        page.press_key("textarea", "Enter").await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://search.test/dolo");
        assert!(page.content().await.is_err());

        page.goto("https://search.test/").await.unwrap();
        page.type_text("textarea", "pan").await.unwrap();
        page.press_key("textarea", "Enter").await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://search.test/other");
        assert!(page.content().await.is_ok());
    }

    #[tokio::test]
    async fn invalid_selectors_are_reported() {
        let page = FakePage::new();
        assert!(matches!(page.query("h3[").await, Err(BrowserError::InvalidSelector(_))));
    }
}
