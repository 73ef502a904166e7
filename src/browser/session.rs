use async_trait::async_trait;
use thirtyfour::fantoccini::error::CmdError;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use std::time::Duration;
use tracing::{debug, error};

use crate::browser::page::{BrowserError, BrowserLauncher, ElementHandle, Locator, PageDriver};
use crate::cli::config::BrowserSettings;

/// Starts Chrome sessions through a WebDriver endpoint
pub struct WebDriverLauncher {
    /// Endpoint and capability settings for every session
    config: BrowserSettings,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserSettings) -> Self {
        Self { config }
    }

    fn capabilities(&self) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg(&format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        ))?;

        if let Some(user_agent) = &self.config.user_agent {
            caps.add_chrome_arg(&format!("--user-agent={}", user_agent))?;
        }

        if self.config.headless {
            caps.set_headless()?;
        }

        Ok(caps)
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, BrowserError> {
        let endpoint = self.config.webdriver_url.as_str();

        let caps = self.capabilities()
            .map_err(|e| BrowserError::launch(endpoint, e))?;

        let driver = WebDriver::new(endpoint, caps).await
            .map_err(|e| BrowserError::launch(endpoint, e))?;

        // Owned by the page from here on, so an abandoned launch still quits the session
        let mut page = WebDriverPage::new(driver);

        let page_load_timeout = Duration::from_secs(self.config.page_load_timeout_secs);
        let configured = page.driver()?.set_page_load_timeout(page_load_timeout).await;
        if let Err(e) = configured {
            if let Err(close_err) = page.close().await {
                error!("Error closing browser session: {}", close_err);
            }
            return Err(BrowserError::launch(endpoint, e));
        }

        debug!("Browser session started at {}", endpoint);

        Ok(Box::new(page))
    }
}

/// Whether `err` means the WebDriver endpoint itself became unreachable
fn is_transport_error(err: &WebDriverError) -> bool {
    matches!(
        err,
        WebDriverError::IoError(_)
            | WebDriverError::Timeout(_)
            | WebDriverError::NewSessionError(_)
            | WebDriverError::CmdError(CmdError::Lost(_) | CmdError::Failed(_))
    )
}

/// Keep transport failures distinct from element-level ones
fn classify(
    operation: &'static str,
    err: WebDriverError,
    otherwise: impl FnOnce(WebDriverError) -> BrowserError,
) -> BrowserError {
    if is_transport_error(&err) {
        BrowserError::transport(operation, err)
    } else {
        otherwise(err)
    }
}

/// A single browser session holding the last element match set
pub struct WebDriverPage {
    /// `None` once the session has been quit
    driver: Option<WebDriver>,

    /// Elements from the most recent query, indexed by `ElementHandle`
    matches: Vec<WebElement>,
}

impl WebDriverPage {
    fn new(driver: WebDriver) -> Self {
        Self {
            driver: Some(driver),
            matches: Vec::new(),
        }
    }

    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver.as_ref()
            .ok_or(BrowserError::Closed)
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn load(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        self.driver()?
            .goto(url)
            .await
            .map_err(|e| BrowserError::navigation(url, e))
    }

    async fn query(&mut self, locator: &Locator) -> Result<Vec<ElementHandle>, BrowserError> {
        let by = match locator {
            Locator::Css(selector) => By::Css(selector.as_str()),
            Locator::XPath(expression) => By::XPath(expression.as_str()),
        };

        let elements = self.driver()?
            .find_all(by)
            .await
            .map_err(|e| classify("element query", e, |e| BrowserError::query(locator, e)))?;

        debug!("{} matched {} elements", locator, elements.len());

        let handles = (0..elements.len()).map(ElementHandle).collect();
        self.matches = elements;
        Ok(handles)
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String, BrowserError> {
        let web_element = self.matches.get(element.0)
            .ok_or(BrowserError::StaleHandle(element.0))?;

        web_element.text()
            .await
            .map_err(|e| classify("title read", e, |e| BrowserError::element_read(element, e)))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.matches.clear();

        if let Some(driver) = self.driver.take() {
            driver.quit()
                .await
                .map_err(|e| BrowserError::Close { source: e.into() })?;
            debug!("Browser session closed");
        }

        Ok(())
    }
}

impl Drop for WebDriverPage {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Only reached when close() never ran: a panicked worker or an abandoned launch
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                error!("Browser session leaked: no runtime to close it on");
                return;
            };
            runtime.spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::event::ErrorCategory;

    #[test]
    fn lost_connections_are_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "chromedriver went away");
        let err = classify("element query", WebDriverError::IoError(io), |e| {
            BrowserError::query(&Locator::css("span.title"), e)
        });

        assert!(matches!(err, BrowserError::Transport { operation: "element query", .. }));
        assert_eq!(err.category(), ErrorCategory::DriverError);
    }

    #[test]
    fn element_errors_stay_element_errors() {
        let err = classify(
            "title read",
            WebDriverError::NoSuchElement("stale element reference".to_string()),
            |e| BrowserError::element_read(&ElementHandle(2), e),
        );

        assert!(matches!(err, BrowserError::ElementRead { index: 2, .. }));
        assert_eq!(err.category(), ErrorCategory::UnknownError);
    }
}
