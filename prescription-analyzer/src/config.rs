use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{AnalyzerError, Result};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-preview-04-17";
pub const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4.1-mini";
pub const DEFAULT_SEARCH_ENGINE_URL: &str = "https://www.google.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenRouter,
}

impl FromStr for LlmProvider {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            other => Err(AnalyzerError::Config(format!(
                "unknown LLM_PROVIDER '{other}' (expected 'gemini' or 'openrouter')"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Model used for summarization
    pub model: String,
    /// Model used for prescription images
    pub vision_model: String,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    /// Default timeout for any single page operation
    pub page_timeout: Duration,
    pub user_agent: String,
    pub window: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            page_timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window: (1280, 800),
        }
    }
}

/// Everything the pipeline needs from the environment, read and validated
/// once at startup and then passed down explicitly.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub llm: LlmSettings,
    pub browser: BrowserSettings,
    pub search_engine_url: String,
    /// Multiplier applied to every human-like pause; 0 disables pacing
    pub pacing_scale: f64,
    pub port: u16,
}

impl AnalyzerConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; `from_env` is this over
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider: LlmProvider = var("LLM_PROVIDER")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(LlmProvider::Gemini);

        let (key_name, default_model) = match provider {
            LlmProvider::Gemini => ("GOOGLE_API_KEY", DEFAULT_GEMINI_MODEL),
            LlmProvider::OpenRouter => ("OPENROUTER_API_KEY", DEFAULT_OPENROUTER_MODEL),
        };
        let api_key = var(key_name).ok_or_else(|| {
            AnalyzerError::Config(format!("{key_name} environment variable is required"))
        })?;
        let model = var("LLM_MODEL").unwrap_or_else(|| default_model.to_string());
        let vision_model = var("VISION_MODEL").unwrap_or_else(|| model.clone());

        let defaults = BrowserSettings::default();
        let browser = BrowserSettings {
            headless: parse_or("BROWSER_HEADLESS", var("BROWSER_HEADLESS"), defaults.headless)?,
            executable: var("CHROME_EXECUTABLE").map(PathBuf::from),
            page_timeout: Duration::from_secs(parse_or(
                "PAGE_TIMEOUT_SECS",
                var("PAGE_TIMEOUT_SECS"),
                defaults.page_timeout.as_secs(),
            )?),
            user_agent: var("BROWSER_USER_AGENT").unwrap_or(defaults.user_agent),
            window: defaults.window,
        };

        let pacing_scale: f64 = parse_or("PACING_SCALE", var("PACING_SCALE"), 1.0)?;
        if !(pacing_scale.is_finite() && pacing_scale >= 0.0) {
            return Err(AnalyzerError::Config(format!(
                "PACING_SCALE must be a non-negative number, got {pacing_scale}"
            )));
        }
        if browser.page_timeout.is_zero() {
            return Err(AnalyzerError::Config("PAGE_TIMEOUT_SECS must be positive".to_string()));
        }

        let config = Self {
            llm: LlmSettings {
                provider,
                api_key,
                model,
                vision_model,
            },
            browser,
            search_engine_url: var("SEARCH_ENGINE_URL")
                .unwrap_or_else(|| DEFAULT_SEARCH_ENGINE_URL.to_string()),
            pacing_scale,
            port: parse_or("PORT", var("PORT"), 3000)?,
        };

        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        fn preview(val: &str) -> String {
            let n = val.chars().count().min(5);
            let head: String = val.chars().take(n).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        info!("Config loaded:");
        info!("  LLM_PROVIDER: {:?}", self.llm.provider);
        info!("  API key: {}", preview(&self.llm.api_key));
        info!("  LLM_MODEL: {}", self.llm.model);
        info!("  VISION_MODEL: {}", self.llm.vision_model);
        info!("  BROWSER_HEADLESS: {}", self.browser.headless);
        info!("  PAGE_TIMEOUT_SECS: {}", self.browser.page_timeout.as_secs());
        info!("  PACING_SCALE: {}", self.pacing_scale);
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AnalyzerError::Config(format!("invalid {key} '{raw}': {e}"))),
    }
}
