use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Context creation failed: {0}")]
    ContextCreationFailed(String),

    #[error("Browsing context lost: {0}")]
    ContextLost(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Stale element handle: {0}")]
    StaleElement(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chrome error: {0}")]
    ChromeError(String),
}

pub type Result<T> = std::result::Result<T, CrawlError>;

// Convert anyhow::Error (headless_chrome's error type) to CrawlError
impl From<anyhow::Error> for CrawlError {
    fn from(err: anyhow::Error) -> Self {
        CrawlError::ChromeError(err.to_string())
    }
}

impl CrawlError {
    /// True when the failure invalidates the whole item rather than a single
    /// step. The item iterator retries such items once from baseline.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            CrawlError::ContextLost(_)
                | CrawlError::StaleElement(_)
                | CrawlError::NavigationFailed(_)
                | CrawlError::JavaScriptFailed(_)
                | CrawlError::ChromeError(_)
        )
    }
}
