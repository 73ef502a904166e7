use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::browser::{with_timeout, ElementHandle, Locator, PageDriver};
use crate::crawler::event::EventSender;
use crate::crawler::worker::CrawlError;

/// One title locator and the most elements it may contribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorEntry {
    pub locator: Locator,
    pub cap: Option<usize>,
}

impl SelectorEntry {
    pub fn new(locator: Locator) -> Self {
        Self { locator, cap: None }
    }

    #[cfg(test)]
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }
}

impl fmt::Display for SelectorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.locator)
    }
}

/// Title locators in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpec {
    entries: Vec<SelectorEntry>,
}

impl Default for SelectorSpec {
    /// Blog skins mark post titles either with a span or with a strong tag
    fn default() -> Self {
        Self::new(vec![
            SelectorEntry::new(Locator::css("span.title")),
            SelectorEntry::new(Locator::css("strong.title")),
        ])
    }
}

/// The winning selector entry and its matches in DOM order
#[derive(Debug)]
pub struct Resolved {
    pub entry: SelectorEntry,
    pub matches: Vec<ElementHandle>,
}

impl Resolved {
    /// How many matches should be extracted for a request of `max_titles`
    pub fn take_count(&self, max_titles: usize) -> usize {
        let capped = match self.entry.cap {
            Some(cap) => self.matches.len().min(cap),
            None => self.matches.len(),
        };
        capped.min(max_titles)
    }
}

impl SelectorSpec {
    pub fn new(entries: Vec<SelectorEntry>) -> Self {
        Self { entries }
    }

    /// Query each entry in priority order and stop at the first that matches.
    ///
    /// Every attempt after the first is narrated with a status update before
    /// the query is made. Results are never merged across entries.
    pub async fn resolve(
        &self,
        page: &mut dyn PageDriver,
        events: &EventSender,
        timeout: Option<Duration>,
    ) -> Result<Resolved, CrawlError> {
        let mut previous: Option<&SelectorEntry> = None;

        for entry in &self.entries {
            if let Some(previous) = previous {
                events.status(format!(
                    "No titles found with {}, trying {} instead...",
                    previous, entry
                ));
            }

            let matches = with_timeout(timeout, "element query", page.query(&entry.locator)).await?;

            if !matches.is_empty() {
                debug!("Resolved title selector {} with {} matches", entry, matches.len());
                return Ok(Resolved { entry: entry.clone(), matches });
            }

            debug!("Selector {} matched nothing", entry);
            previous = Some(entry);
        }

        Err(CrawlError::ElementNotFound {
            tried: self.entries.iter().map(|entry| entry.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::page::MockPageDriver;
    use crate::crawler::event::CrawlEvent;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use tokio::sync::mpsc;

    fn handles(count: usize) -> Vec<ElementHandle> {
        (0..count).map(ElementHandle).collect()
    }

    #[tokio::test]
    async fn primary_wins_without_fallback() {
        let selectors = SelectorSpec::default();
        let mut page = MockPageDriver::new();
        page.expect_query()
            .with(eq(Locator::css("span.title")))
            .times(1)
            .returning(|_| Ok(handles(4)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);

        let resolved = selectors.resolve(&mut page, &events, None).await.unwrap();
        assert_eq!(resolved.entry.locator, Locator::css("span.title"));
        assert_eq!(resolved.matches.len(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn falls_back_in_priority_order() {
        let selectors = SelectorSpec::default();
        let mut page = MockPageDriver::new();
        let mut seq = Sequence::new();
        page.expect_query()
            .with(eq(Locator::css("span.title")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Vec::new()));
        page.expect_query()
            .with(eq(Locator::css("strong.title")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(handles(2)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);

        let resolved = selectors.resolve(&mut page, &events, None).await.unwrap();
        assert_eq!(resolved.entry.locator, Locator::css("strong.title"));

        match rx.try_recv().unwrap() {
            CrawlEvent::StatusUpdate { message } => {
                assert!(message.contains("css:span.title"));
                assert!(message.contains("css:strong.title"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn exhausted_selectors_report_element_not_found() {
        let selectors = SelectorSpec::default();
        let mut page = MockPageDriver::new();
        page.expect_query().times(2).returning(|_| Ok(Vec::new()));

        let (tx, _rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);

        let err = selectors.resolve(&mut page, &events, None).await.unwrap_err();
        match err {
            CrawlError::ElementNotFound { tried } => {
                assert_eq!(tried, vec!["css:span.title", "css:strong.title"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn take_count_respects_cap_and_limit() {
        let entry = SelectorEntry::new(Locator::css("h2.post-title")).with_cap(2);
        let resolved = Resolved { entry, matches: handles(7) };
        assert_eq!(resolved.take_count(5), 2);

        let entry = SelectorEntry::new(Locator::css("h2.post-title"));
        let resolved = Resolved { entry, matches: handles(7) };
        assert_eq!(resolved.take_count(5), 5);
        assert_eq!(resolved.take_count(10), 7);
    }
}
