use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::{with_timeout, BrowserError, BrowserLauncher, PageDriver};
use crate::cli::config::CrawlerSettings;
use crate::crawler::event::{CrawlEvent, ErrorCategory, EventSender};
use crate::crawler::selector::SelectorSpec;
use crate::crawler::task::{CrawlRequest, CrawlResult};

/// Reasons a crawl run ends in failure
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no title elements matched any of: {}", .tried.join(", "))]
    ElementNotFound { tried: Vec<String> },

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CrawlError::ElementNotFound { .. } => ErrorCategory::ElementNotFound,
            CrawlError::Browser(e) => e.category(),
            CrawlError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Lifecycle of a single crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    PageLoading,
    SelectorResolution,
    Extracting,
    Completed,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::PageLoading => "loading the page",
            WorkerState::SelectorResolution => "resolving the title selector",
            WorkerState::Extracting => "extracting titles",
            WorkerState::Completed => "completed",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Single-use background crawl.
///
/// The worker owns its browser page for the whole run and talks to the
/// outside world only through the [`EventSender`] handed to [`CrawlWorker::run`].
pub struct CrawlWorker {
    /// Correlates log lines and failure traces of one run
    run_id: Uuid,
    request: CrawlRequest,

    /// Title locators, tried in priority order
    selectors: SelectorSpec,
    launcher: Arc<dyn BrowserLauncher>,

    /// Upper bound for each browser operation
    timeout: Option<Duration>,
    cancel: CancellationToken,
    state: WorkerState,
}

impl CrawlWorker {
    pub fn new(
        request: CrawlRequest,
        settings: &CrawlerSettings,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request,
            selectors: SelectorSpec::default(),
            launcher,
            timeout: settings.operation_timeout(),
            cancel: CancellationToken::new(),
            state: WorkerState::Idle,
        }
    }

    pub fn with_selectors(mut self, selectors: SelectorSpec) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn request(&self) -> &CrawlRequest {
        &self.request
    }

    /// Execute the run to its terminal event and hand back the extracted titles
    pub async fn run(self, events: EventSender) -> CrawlResult {
        let span = info_span!("crawl", run_id = %self.run_id, url = %self.request.url());
        self.execute(events).instrument(span).await
    }

    async fn execute(mut self, events: EventSender) -> CrawlResult {
        let mut results = CrawlResult::default();
        let cancel = self.cancel.clone();

        info!("Starting crawl");
        events.status(format!("Starting crawl - {}", self.request.url()));
        self.transition(WorkerState::PageLoading);

        let launched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::Cancelled),
            page = with_timeout(self.timeout, "browser launch", self.launcher.launch()) => {
                page.map_err(CrawlError::from)
            }
        };

        let outcome = match launched {
            Ok(mut page) => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(CrawlError::Cancelled),
                    outcome = self.drive(page.as_mut(), &mut results, &events) => outcome,
                };
                self.release(page).await;
                outcome
            }
            Err(e) => Err(e),
        };

        let terminal = match outcome {
            Ok(()) => {
                self.transition(WorkerState::Completed);
                info!("Crawl completed with {} titles", results.len());
                events.status(format!(
                    "Crawl complete! {} titles collected, results can now be saved.",
                    results.len()
                ));
                CrawlEvent::Completed
            }
            Err(e) => self.fail(e, &events),
        };

        events.finish(terminal, &results);
        results
    }

    async fn drive(
        &mut self,
        page: &mut dyn PageDriver,
        results: &mut CrawlResult,
        events: &EventSender,
    ) -> Result<(), CrawlError> {
        let url = self.request.url().to_string();

        with_timeout(self.timeout, "page load", page.load(&url)).await?;
        events.status("Page loaded, starting crawl...");

        self.transition(WorkerState::SelectorResolution);
        let resolved = self.selectors.resolve(page, events, self.timeout).await?;

        let count = resolved.take_count(self.request.max_titles());
        events.status(format!(
            "Found {} title elements with {}, collecting {}",
            resolved.matches.len(),
            resolved.entry,
            count
        ));

        self.transition(WorkerState::Extracting);
        for (position, handle) in resolved.matches.iter().take(count).enumerate() {
            let title = with_timeout(self.timeout, "title read", page.text(handle)).await?;
            let title = title.trim().to_string();
            let index = position + 1;

            results.push(title.clone());
            events.result(index, title);
            events.status(format!("Post {} crawled", index));
        }

        Ok(())
    }

    async fn release(&self, mut page: Box<dyn PageDriver>) {
        match with_timeout(self.timeout, "browser release", page.close()).await {
            Ok(()) => debug!("Browser session released"),
            Err(e) => warn!("Failed to release browser session cleanly: {}", e),
        }
    }

    fn fail(&mut self, err: CrawlError, events: &EventSender) -> CrawlEvent {
        let failed_while = self.state;
        self.transition(WorkerState::Failed);

        let category = err.category();
        let message = category.message(self.request.url());
        error!("Crawl failed ({}): {}", category, err);

        let report = anyhow::Error::new(err).context(format!(
            "crawl {} of {} failed while {}",
            self.run_id,
            self.request.url(),
            failed_while
        ));
        let trace = format!("{:?}", report);

        events.status("Error occurred!");
        CrawlEvent::Failure { category, message, trace }
    }

    fn transition(&mut self, next: WorkerState) {
        debug_assert!(!self.state.is_terminal(), "transition out of terminal state");
        debug!("Worker state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
