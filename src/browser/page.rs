use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::crawler::event::ErrorCategory;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How to find elements in the rendered DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css:{}", selector),
            Locator::XPath(expression) => write!(f, "xpath:{}", expression),
        }
    }
}

/// Position of an element inside the most recent match set of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle(pub usize);

/// Errors raised by the page-rendering service
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to start browser session at {endpoint}")]
    Launch {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to navigate to {url}")]
    Navigation {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to query elements with {locator}")]
    Query {
        locator: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to read text of element #{index}")]
    ElementRead {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("lost the browser connection during {operation}")]
    Transport {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("element #{0} is not part of the current match set")]
    StaleHandle(usize),

    #[error("browser session is already closed")]
    Closed,

    #[error("failed to close browser session")]
    Close {
        #[source]
        source: BoxError,
    },

    #[error("{operation} did not finish within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl BrowserError {
    pub fn launch(endpoint: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrowserError::Launch { endpoint: endpoint.into(), source: source.into() }
    }

    pub fn navigation(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        BrowserError::Navigation { url: url.into(), source: source.into() }
    }

    pub fn transport(operation: &'static str, source: impl Into<BoxError>) -> Self {
        BrowserError::Transport { operation, source: source.into() }
    }

    pub fn query(locator: &Locator, source: impl Into<BoxError>) -> Self {
        BrowserError::Query { locator: locator.to_string(), source: source.into() }
    }

    pub fn element_read(handle: &ElementHandle, source: impl Into<BoxError>) -> Self {
        BrowserError::ElementRead { index: handle.0, source: source.into() }
    }

    /// Session and transport problems are driver errors; anything else is unexpected.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BrowserError::Launch { .. }
            | BrowserError::Navigation { .. }
            | BrowserError::Transport { .. }
            | BrowserError::Timeout { .. }
            | BrowserError::Closed
            | BrowserError::Close { .. } => ErrorCategory::DriverError,
            BrowserError::Query { .. }
            | BrowserError::ElementRead { .. }
            | BrowserError::StaleHandle(_) => ErrorCategory::UnknownError,
        }
    }
}

/// A loaded browser page that can be navigated and queried
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate to `url` and wait for the page to load
    async fn load(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Find all elements matching `locator`, in DOM order
    async fn query(&mut self, locator: &Locator) -> Result<Vec<ElementHandle>, BrowserError>;

    /// Read the visible text of a previously queried element
    async fn text(&mut self, element: &ElementHandle) -> Result<String, BrowserError>;

    /// Release the underlying browser session
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Acquires browser pages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, BrowserError>;
}

/// Run a browser operation with an optional upper bound on its duration
pub async fn with_timeout<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    match limit {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout { operation, after }),
        },
        None => fut.await,
    }
}

/// Page whose navigation never finishes; counts how often it was closed
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct HangingPage {
    pub closed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
#[async_trait]
impl PageDriver for HangingPage {
    async fn load(&mut self, _url: &str) -> Result<(), BrowserError> {
        std::future::pending().await
    }

    async fn query(&mut self, _locator: &Locator) -> Result<Vec<ElementHandle>, BrowserError> {
        Ok(Vec::new())
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String, BrowserError> {
        Err(BrowserError::StaleHandle(element.0))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
