use anyhow::{anyhow, Result, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use tracing::{info, debug, error};
use url::Url;

use crate::crawler::admission::AdmissionWindow;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Worker limits
    #[serde(default)]
    pub crawler: CrawlerSettings,

    /// Crawl window; required so its start is never re-stamped on load
    pub admission: AdmissionSettings,

    /// WebDriver session setup
    #[serde(default)]
    pub browser: BrowserSettings,
}

/// Crawl worker settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Upper bound on the number of titles extracted per run
    pub max_titles: usize,

    /// Bounded wait for each browser operation, in seconds (0 = wait forever)
    pub operation_timeout_secs: u64,
}

/// Time window in which new crawls may start
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdmissionSettings {
    /// When the window opened; stamped once when the default file is created
    pub start: DateTime<Utc>,

    /// How long after `start` new crawls are still accepted, in seconds
    #[serde(default = "default_limit_secs")]
    pub limit_secs: u64,
}

fn default_limit_secs() -> u64 {
    30 * 24 * 60 * 60
}

/// Browser session settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    /// WebDriver endpoint, e.g. a local chromedriver
    pub webdriver_url: String,

    /// Run Chrome without a visible window
    pub headless: bool,

    /// Browser window width in pixels
    pub window_width: u32,

    /// Browser window height in pixels
    pub window_height: u32,

    /// Override the browser's user agent
    pub user_agent: Option<String>,

    /// Page load timeout applied to the session, in seconds
    pub page_load_timeout_secs: u64,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_titles: 3,
            operation_timeout_secs: 30,
        }
    }
}

impl CrawlerSettings {
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            limit_secs: default_limit_secs(),
        }
    }
}

impl AdmissionSettings {
    pub fn window(&self) -> Result<AdmissionWindow> {
        let limit = i64::try_from(self.limit_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| anyhow!("admission.limit_secs {} is out of range", self.limit_secs))?;

        AdmissionWindow::new(self.start, limit).ok_or_else(|| {
            anyhow!(
                "admission window starting {} with limit_secs {} must be positive and end before {}",
                self.start,
                self.limit_secs,
                DateTime::<Utc>::MAX_UTC
            )
        })
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            window_width: 1920,
            window_height: 1080,
            user_agent: None,
            page_load_timeout_secs: 30,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerSettings::default(),
            admission: AdmissionSettings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl AppConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "title-crawler", "title-crawler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Path of the default configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    /// Load the default configuration, creating it on first use
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // The admission window starts counting from the first load
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            if let Err(e) = config.save_to_file(&config_path) {
                error!("Failed to persist default configuration: {:#}", e);
            }
            Ok(config)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        config.validate()
            .context(format!("Invalid configuration in: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_titles == 0 {
            anyhow::bail!("crawler.max_titles must be at least 1");
        }

        self.admission.window()?;

        Url::parse(&self.browser.webdriver_url)
            .context(format!("browser.webdriver_url is not a valid URL: {}", self.browser.webdriver_url))?;

        Ok(())
    }
}
