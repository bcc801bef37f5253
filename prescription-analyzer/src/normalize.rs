use std::sync::{Arc, LazyLock};

use htmd::HtmlToMarkdown;
use htmd::options::{HeadingStyle, Options};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::sites::SiteRegistry;

/// Elements that never carry drug information.
pub const NOISE_SELECTOR: &str = "script, style, nav, footer, iframe, .cookie-banner, .popup, \
    .modal, .advertisement, .ad, .banner, aside, [role=banner], [role=complementary]";

/// Generic main-content containers, tried in order.
pub const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "#content",
    ".content",
    ".main",
    ".main-content",
    ".product-detail",
    ".drug-info",
    ".medicine-info",
    ".product-description",
    "div[role=main]",
];

/// A container needs more stripped text than this to count as main content.
pub const MIN_CONTENT_CHARS: usize = 200;

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:[ \t]*\n){3,}").unwrap());

/// Turns a fetched product page into compact Markdown for the summarizer.
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    registry: Arc<SiteRegistry>,
}

impl ContentNormalizer {
    pub fn new(registry: Arc<SiteRegistry>) -> Self {
        Self { registry }
    }

    /// Never fails; conversion problems are reported inside the returned text.
    pub fn normalize(&self, html: &str, url: &str) -> String {
        match self.convert(html, url) {
            Ok(markdown) => markdown,
            Err(e) => {
                warn!("Error converting HTML to markdown: {}", e);
                format!("Failed to convert content: {e}")
            }
        }
    }

    fn convert(&self, html: &str, url: &str) -> anyhow::Result<String> {
        let mut document = Html::parse_document(html);
        strip_noise(&mut document)?;

        let site_selectors = self.registry.content_selectors_for(url);
        let candidates = site_selectors
            .iter()
            .map(String::as_str)
            .chain(CONTENT_SELECTORS.iter().copied());
        let main = main_content(&document, candidates)?;

        let converter = HtmlToMarkdown::builder()
            .options(Options {
                heading_style: HeadingStyle::Atx,
                ..Default::default()
            })
            .build();
        let markdown = converter.convert(&main)?;
        let markdown = collapse_blank_lines(markdown.trim());

        Ok(format!("{markdown}\n\nSource URL: {url}"))
    }
}

/// Squeeze every run of blank lines down to a single blank line.
///
/// Lines holding only spaces or tabs count as blank.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUNS.replace_all(text, "\n\n").into_owned()
}

fn parse_selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector '{css}': {e}"))
}

fn strip_noise(document: &mut Html) -> anyhow::Result<()> {
    let noise = parse_selector(NOISE_SELECTOR)?;
    let ids: Vec<_> = document.select(&noise).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
    Ok(())
}

fn stripped_len(el: scraper::ElementRef<'_>) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

/// Outer HTML of the first substantial candidate, else the body, else everything.
fn main_content<'a>(
    document: &Html,
    candidates: impl Iterator<Item = &'a str>,
) -> anyhow::Result<String> {
    for css in candidates {
        let selector = parse_selector(css)?;
        let found = document
            .select(&selector)
            .find(|el| stripped_len(*el) > MIN_CONTENT_CHARS);
        if let Some(el) = found {
            debug!(selector = css, "Main content located");
            return Ok(el.html());
        }
    }
    let body = parse_selector("body")?;
    Ok(document
        .select(&body)
        .next()
        .map(|el| el.html())
        .unwrap_or_else(|| document.html()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::SiteProfile;

    fn normalizer() -> ContentNormalizer {
        ContentNormalizer::new(Arc::new(SiteRegistry::default()))
    }

    fn filler(word: &str) -> String {
        std::iter::repeat(word).take(60).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn picks_substantial_main_and_drops_noise() {
        let html = format!(
            r#"<html><body>
                <nav>Home | Shop</nav>
                <main>
                  <h2>Uses of Dolo 650</h2>
                  <p>{}</p>
                  <script>track()</script>
                  <div class="ad">Buy now</div>
                </main>
                <footer>Copyright</footer>
            </body></html>"#,
            filler("fever")
        );

        let text = normalizer().normalize(&html, "https://www.1mg.com/drugs/dolo-650");

        assert!(text.contains("## Uses of Dolo 650"));
        assert!(text.contains("fever fever"));
        assert!(!text.contains("Home | Shop"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Buy now"));
        assert!(!text.contains("Copyright"));
        assert!(text.ends_with("\n\nSource URL: https://www.1mg.com/drugs/dolo-650"));
    }

    #[test]
    fn short_candidates_fall_back_to_body() {
        let html = "<html><body><main>tiny</main><p>Take with food.</p></body></html>";
        let text = normalizer().normalize(html, "https://example.org/x");
        assert!(text.contains("tiny"));
        assert!(text.contains("Take with food."));
    }

    #[test]
    fn site_content_selectors_are_tried_first() {
        let registry = SiteRegistry::default()
            .register(SiteProfile::new("drugs.com").content(&[".drug-body"]));
        let html = format!(
            r#"<body><main><p>{}</p></main><section class="drug-body"><p>{}</p></section></body>"#,
            filler("sidebar"),
            filler("dosage")
        );

        let text = ContentNormalizer::new(Arc::new(registry))
            .normalize(&html, "https://www.drugs.com/dolo.html");
        assert!(text.contains("dosage"));
        assert!(!text.contains("sidebar"));
    }

    #[test]
    fn blank_runs_collapse_to_one_blank_line() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\nb"), "a\nb");
    }

    #[test]
    fn whitespace_only_lines_are_blank() {
        assert_eq!(collapse_blank_lines("a\n  \n\t\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a \t\n\n \n\nb\n\n\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn collapsing_twice_changes_nothing() {
        for text in [
            "a\n\n\n\n\nb",
            "a\n  \n\t\n\nb\n\n\n",
            "\n\n\n\nheading\n\n\n\n\n\nbody  \n \n \n",
            "plain",
        ] {
            let once = collapse_blank_lines(text);
            assert_eq!(collapse_blank_lines(&once), once, "input {text:?}");
        }
    }

    #[test]
    fn converted_pages_have_no_blank_runs() {
        let html = "<body><p>one</p><br><br><br><br><p>two</p></body>";
        let text = normalizer().normalize(html, "u");
        assert!(!text.contains("\n\n\n"));
        assert_eq!(collapse_blank_lines(&text), text);
    }
}
