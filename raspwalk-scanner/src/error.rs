use thiserror::Error;

/// Failures raised by a page surface while driving the tab.
///
/// None of these abort a traversal on their own; the engine converts them
/// into skipped links, fallbacks or `ParseError` schedules.
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No element matches selector {0}")]
    ElementNotFound(String),

    #[error("No earlier history entry to go back to")]
    NoHistory,

    #[error("No page has been loaded yet")]
    Blank,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[cfg(feature = "browser")]
    #[error("Browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),
}

#[derive(Error, Debug)]
pub enum ScanError {
    /// The page runtime could not be started or died irrecoverably.
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Page surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// The start URL does not parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;
