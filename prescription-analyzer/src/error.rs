use thiserror::Error;

/// Failures of the browser automation backend.
///
/// Every variant except `Launch` is local to one interaction; stages catch
/// them and fall back rather than aborting the batch.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to start browser session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Browser protocol error: {0}")]
    Cdp(String),
}

/// Failures talking to a generative model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response format from LLM: {0}")]
    Format(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Request(err.to_string())
    }
}

/// The model's answer could not be turned into a JSON object, even after repair.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Response JSON is not an object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Top-level errors. Only these abort a whole batch or request.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Prescription extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Workflow(#[from] graph_flow::GraphError),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
