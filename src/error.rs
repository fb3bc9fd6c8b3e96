use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Browser context creation failed: {0}")]
    ContextCreationFailed(String),

    #[error("Browser session is not open")]
    SessionClosed,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation timeout after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Timeout {timeout:?} exceeded waiting for selector \"{selector}\"")]
    SelectorTimeout { selector: String, timeout: Duration },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Chrome error: {0}")]
    ChromeError(String),

    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// Coarse classification of a [`ScrapeError`], used for logging and for
/// deciding whether a failure belongs to one URL or to the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Navigation,
    SelectorTimeout,
    Extraction,
    Cleanup,
    Session,
    Configuration,
    Internal,
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::NavigationFailed(_)
            | ScrapeError::NavigationTimeout(_)
            | ScrapeError::PageError(_)
            | ScrapeError::ChromeError(_) => ErrorKind::Navigation,
            ScrapeError::SelectorTimeout { .. } => ErrorKind::SelectorTimeout,
            ScrapeError::ExtractionFailed(_) => ErrorKind::Extraction,
            ScrapeError::CleanupFailed(_) => ErrorKind::Cleanup,
            ScrapeError::BrowserLaunchFailed(_)
            | ScrapeError::ContextCreationFailed(_)
            | ScrapeError::SessionClosed => ErrorKind::Session,
            ScrapeError::ConfigurationError(_) => ErrorKind::Configuration,
            ScrapeError::IoError(_)
            | ScrapeError::SerializationError(_)
            | ScrapeError::RuntimeError(_) => ErrorKind::Internal,
        }
    }

    /// Fatal errors abort a whole scraping session; everything else is
    /// reported on the result of the URL it happened on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Session | ErrorKind::Configuration | ErrorKind::Internal
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScrapeError::NavigationTimeout(_) | ScrapeError::SelectorTimeout { .. }
        )
    }
}

impl From<AcquireError> for ScrapeError {
    fn from(err: AcquireError) -> Self {
        ScrapeError::RuntimeError(format!("concurrency gate closed: {err}"))
    }
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScrapeError::RuntimeError(err.to_string())
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::SerializationError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::ChromeError(err.to_string())
    }
}
