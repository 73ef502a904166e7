use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Rejected crawl requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no URL was given")]
    EmptyUrl,

    #[error("max_titles must be at least 1")]
    ZeroTitles,
}

/// What a single crawl run should fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRequest {
    url: String,
    max_titles: usize,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>, max_titles: usize) -> Result<Self, RequestError> {
        let url = url.into().trim().to_string();

        if url.is_empty() {
            return Err(RequestError::EmptyUrl);
        }

        if max_titles == 0 {
            return Err(RequestError::ZeroTitles);
        }

        Ok(Self { url, max_titles })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_titles(&self) -> usize {
        self.max_titles
    }
}

/// Titles extracted by a run, in extraction order.
///
/// Only the crawl worker appends; everyone else gets a read-only view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlResult {
    titles: Vec<String>,
}

impl CrawlResult {
    pub(crate) fn push(&mut self, title: String) {
        self.titles.push(title);
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation() {
        assert_eq!(CrawlRequest::new("", 3), Err(RequestError::EmptyUrl));
        assert_eq!(CrawlRequest::new("   ", 3), Err(RequestError::EmptyUrl));
        assert_eq!(CrawlRequest::new("https://blog.example.com", 0), Err(RequestError::ZeroTitles));

        let request = CrawlRequest::new(" https://blog.example.com ", 3).unwrap();
        assert_eq!(request.url(), "https://blog.example.com");
        assert_eq!(request.max_titles(), 3);
    }
}
