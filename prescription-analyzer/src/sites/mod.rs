//! Per-site knowledge: where a pharmacy page keeps the product name and its
//! main content, and how to recover a name from the URL when the page fails us.

pub mod name;

use std::sync::LazyLock;

use regex::Regex;

pub use name::NameExtractor;

/// Derives a medicine name from a page URL.
pub type SlugFallback = fn(&str) -> Option<String>;

#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub domain: String,
    /// Product title selectors, most specific first
    pub title_selectors: Vec<String>,
    /// Main content containers tried before the generic candidates
    pub content_selectors: Vec<String>,
    pub slug_fallback: Option<SlugFallback>,
}

impl SiteProfile {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            title_selectors: Vec::new(),
            content_selectors: Vec::new(),
            slug_fallback: None,
        }
    }

    pub fn titles(mut self, selectors: &[&str]) -> Self {
        self.title_selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn content(mut self, selectors: &[&str]) -> Self {
        self.content_selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn slug(mut self, fallback: SlugFallback) -> Self {
        self.slug_fallback = Some(fallback);
        self
    }

    /// True when `url` is served from this domain or one of its subdomains.
    pub fn matches(&self, url: &str) -> bool {
        match url::Url::parse(url).ok().as_ref().and_then(|u| u.host_str()) {
            Some(host) => host == self.domain || host.ends_with(&format!(".{}", self.domain)),
            None => url.contains(&self.domain),
        }
    }
}

/// Ordered set of site profiles; the first matching profile wins.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    profiles: Vec<SiteProfile>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self {
            profiles: vec![
                SiteProfile::new("apollopharmacy.in")
                    .titles(&[
                        ".ProductDetailsGeneric-name",
                        ".ProductCard-title",
                        "h1.MuiTypography-root",
                    ])
                    .slug(apollo_slug),
                SiteProfile::new("1mg.com").titles(&[
                    ".DrugHeader__title-content",
                    ".style__pro-title",
                    "h1",
                ]),
                SiteProfile::new("netmeds.com")
                    .titles(&[".product-detail", ".product_title", "h1"]),
                SiteProfile::new("pharmeasy.in").titles(&[
                    ".MedicineOverviewSection_medicineName",
                    ".ProductTitle_medicineName",
                    "h1",
                ]),
            ],
        }
    }
}

impl SiteRegistry {
    pub fn empty() -> Self {
        Self { profiles: Vec::new() }
    }

    /// Add a profile, replacing any existing one for the same domain.
    pub fn register(mut self, profile: SiteProfile) -> Self {
        match self.profiles.iter_mut().find(|p| p.domain == profile.domain) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
        self
    }

    pub fn profile_for(&self, url: &str) -> Option<&SiteProfile> {
        self.profiles.iter().find(|p| p.matches(url))
    }

    pub fn content_selectors_for(&self, url: &str) -> &[String] {
        self.profile_for(url)
            .map(|p| p.content_selectors.as_slice())
            .unwrap_or_default()
    }
}

static APOLLO_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/medicine/([^?]+)").unwrap());
static PACK_SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+mg|\d+\s*s$").unwrap());

/// `/medicine/dolo-650mg-tablet-15-s` → `Dolo`
pub fn apollo_slug(url: &str) -> Option<String> {
    let slug = APOLLO_SLUG.captures(url)?.get(1)?.as_str();
    let readable = slug.replace('-', " ");
    let stripped = PACK_SIZE.replace_all(&readable, "");
    let name = title_case(&stripped.replace("tablet", ""));
    (!name.is_empty()).then_some(name)
}

/// Capitalize each whitespace-separated word and lowercase the rest of it.
pub(crate) fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
