use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserPage, BrowserSession, ElementSnapshot};
use crate::config::BrowserSettings;
use crate::error::BrowserError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts a Chromium process per batch.
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let settings = &self.settings;
        let (width, height) = settings.window;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--lang=en-US")
            .window_size(width, height)
            .request_timeout(settings.page_timeout);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler drives the CDP connection and must be polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(BrowserError::Launch(format!("new page failed: {e}")));
            }
        };
        if let Err(e) = page.enable_stealth_mode_with_agent(&settings.user_agent).await {
            warn!("Could not apply user agent override: {}", e);
        }

        info!(headless = settings.headless, "Browser session started");
        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(browser),
            page: Arc::new(ChromiumPage {
                page,
                timeout: settings.page_timeout,
            }),
            handler,
        }))
    }
}

pub struct ChromiumSession {
    browser: Mutex<Browser>,
    page: Arc<ChromiumPage>,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> Arc<dyn BrowserPage> {
        self.page.clone()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if let Err(e) = self.page.page.clone().close().await {
            debug!("Page close failed: {}", e);
        }
        let result = self.browser.lock().await.close().await;
        self.handler.abort();
        result
            .map(|_| info!("Browser session closed"))
            .map_err(|e| BrowserError::Cdp(format!("browser close failed: {e}")))
    }
}

/// A chromiumoxide page with every operation bounded by the page timeout.
pub struct ChromiumPage {
    page: Page,
    timeout: Duration,
}

impl ChromiumPage {
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, BrowserError>
    where
        F: Future<Output = Result<T, CdpError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| BrowserError::Cdp(format!("{what}: {e}"))),
            Err(_) => Err(BrowserError::Timeout {
                what: what.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn element(
        &self,
        selector: &str,
        index: usize,
    ) -> Result<chromiumoxide::element::Element, BrowserError> {
        let mut elements = self
            .bounded("find elements", self.page.find_elements(selector))
            .await?;
        if index < elements.len() {
            Ok(elements.swap_remove(index))
        } else {
            Err(BrowserError::ElementNotFound(format!("{selector} [{index}]")))
        }
    }
}

/// JS that snapshots all matches of a selector, encoded as a JSON string literal.
fn snapshot_script(selector: &str) -> Result<String, BrowserError> {
    let literal = serde_json::to_string(selector)
        .map_err(|e| BrowserError::InvalidSelector(e.to_string()))?;
    Ok(format!(
        r#"
        (() => {{
            return Array.from(document.querySelectorAll({literal})).map(el => {{
                const anchor = el.closest('a');
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                const visible = style.display !== 'none'
                    && style.visibility !== 'hidden'
                    && rect.width > 0 && rect.height > 0;
                return {{
                    text: (el.innerText || el.textContent || '').trim(),
                    href: anchor && anchor.href ? anchor.href : null,
                    visible: visible,
                }};
            }});
        }})()
        "#
    ))
}

fn fill_script(selector: &str, value: &str) -> Result<String, BrowserError> {
    let selector = serde_json::to_string(selector)
        .map_err(|e| BrowserError::InvalidSelector(e.to_string()))?;
    let value = serde_json::to_string(value).map_err(|e| BrowserError::Script(e.to_string()))?;
    Ok(format!(
        r#"
        (() => {{
            const el = document.querySelector({selector});
            if (!el) return false;
            el.focus();
            el.value = {value};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()
        "#
    ))
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrowserError::Timeout {
                what: format!("navigation to {url}"),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .bounded("read url", self.page.url())
            .await?
            .unwrap_or_default())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.bounded("read content", self.page.content()).await
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let script = snapshot_script(selector)?;
        let value = self
            .bounded("evaluate", self.page.evaluate(script))
            .await?;
        value
            .into_value::<Vec<ElementSnapshot>>()
            .map_err(|e| BrowserError::Script(format!("unexpected snapshot shape: {e}")))
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        let element = self.element(selector, index).await?;
        self.bounded("click", element.click()).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let script = fill_script(selector, value)?;
        let found: bool = self
            .bounded("evaluate", self.page.evaluate(script))
            .await?
            .into_value()
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self.element(selector, 0).await?;
        self.bounded("type", element.type_str(text)).await.map(|_| ())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), BrowserError> {
        let element = self.element(selector, 0).await?;
        self.bounded("press key", element.press_key(key)).await.map(|_| ())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_idle(&self) -> Result<(), BrowserError> {
        self.bounded("network idle", self.page.wait_for_navigation())
            .await
            .map(|_| ())
    }
}
