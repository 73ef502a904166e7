use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::BrowserLauncher;
use crate::cli::config::CrawlerSettings;
use crate::crawler::admission::{admit, AdmissionWindow};
use crate::crawler::event::{CrawlEvent, ErrorCategory, EventSender};
use crate::crawler::selector::SelectorSpec;
use crate::crawler::task::{CrawlRequest, CrawlResult, RequestError};
use crate::crawler::worker::CrawlWorker;
use crate::storage::{save_titles, DestinationSink, StorageError};

/// Reasons the controller refuses an action
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error("the crawl window closed at {deadline}; crawling is disabled")]
    WindowExpired { deadline: DateTime<Utc> },

    #[error("a crawl is already running")]
    AlreadyRunning,

    #[error("there are no crawl results to save")]
    NothingToSave,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Worker currently in flight
struct ActiveRun {
    run_id: Uuid,

    /// Normalized target, used when the worker dies without reporting
    url: String,

    /// Worker events in emission order
    events: UnboundedReceiver<CrawlEvent>,

    /// Result snapshot, sent just before the terminal event
    result: oneshot::Receiver<CrawlResult>,

    /// Joined only when the event stream closes early
    handle: JoinHandle<CrawlResult>,
    cancel: CancellationToken,
}

/// Outcome of the most recent finished run
#[derive(Debug, Clone)]
pub struct FinishedRun {
    pub run_id: Uuid,
    pub completed: bool,
    pub result: CrawlResult,
}

/// Starts crawl workers one at a time and relays their events.
///
/// The controller never shares mutable state with a worker: it only reads
/// the worker's event stream and, once the run has ended, takes ownership of
/// the worker's result.
pub struct CrawlerController {
    settings: CrawlerSettings,
    window: AdmissionWindow,
    selectors: SelectorSpec,
    launcher: Arc<dyn BrowserLauncher>,

    /// Latched once the admission window is found expired
    disabled: bool,
    active: Option<ActiveRun>,
    last: Option<FinishedRun>,
}

impl CrawlerController {
    pub fn new(
        settings: CrawlerSettings,
        window: AdmissionWindow,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            settings,
            window,
            selectors: SelectorSpec::default(),
            launcher,
            disabled: false,
            active: None,
            last: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// True once the admission window has been found expired
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn window(&self) -> &AdmissionWindow {
        &self.window
    }

    /// Start a crawl of `url`, spawning a background worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, url: &str, now: DateTime<Utc>) -> Result<Uuid, ControllerError> {
        if self.disabled {
            return Err(ControllerError::WindowExpired { deadline: self.window.deadline() });
        }

        if !admit(now, &self.window) {
            warn!("Crawl window closed at {}; disabling further crawls", self.window.deadline());
            self.disabled = true;
            return Err(ControllerError::WindowExpired { deadline: self.window.deadline() });
        }

        if self.active.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let request = CrawlRequest::new(url, self.settings.max_titles)?;
        let cancel = CancellationToken::new();
        let worker = CrawlWorker::new(request, &self.settings, Arc::clone(&self.launcher))
            .with_selectors(self.selectors.clone())
            .with_cancellation(cancel.clone());
        let run_id = worker.run_id();
        let url = worker.request().url().to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let events = EventSender::new(tx).with_handoff(result_tx);
        let handle = tokio::spawn(worker.run(events));

        info!("Started crawl {} of {}", run_id, url);

        self.active = Some(ActiveRun {
            run_id,
            url,
            events: rx,
            result: result_rx,
            handle,
            cancel,
        });

        Ok(run_id)
    }

    /// Ask the running worker to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(run) => {
                debug!("Cancelling crawl {}", run.run_id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Next event of the active run, in emission order.
    ///
    /// Returns `None` when no run is active. After the terminal event has
    /// been returned the run is finished and its result is available.
    /// Dropping the returned future before it completes loses no events.
    pub async fn next_event(&mut self) -> Option<CrawlEvent> {
        let active = self.active.as_mut()?;

        match active.events.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.finish(matches!(event, CrawlEvent::Completed));
                }
                Some(event)
            }
            None => self.finish_abandoned().await,
        }
    }

    fn finish(&mut self, completed: bool) {
        let Some(mut run) = self.active.take() else {
            return;
        };

        // The worker hands its result off before emitting the terminal event
        let result = run.result.try_recv().unwrap_or_else(|e| {
            error!("Crawl {} finished without handing off its result: {}", run.run_id, e);
            CrawlResult::default()
        });

        debug!("Crawl {} finished with {} titles", run.run_id, result.len());

        self.last = Some(FinishedRun {
            run_id: run.run_id,
            completed,
            result,
        });
    }

    /// The event stream closed before a terminal event; the worker task died.
    async fn finish_abandoned(&mut self) -> Option<CrawlEvent> {
        let joined = match self.active.as_mut() {
            Some(run) => (&mut run.handle).await,
            None => return None,
        };
        let run = self.active.take()?;

        let detail = match joined {
            Ok(_) => "worker exited without reporting an outcome".to_string(),
            Err(e) => format!("{:?}", e),
        };

        error!("Crawl {} ended without a terminal event: {}", run.run_id, detail);

        self.last = Some(FinishedRun {
            run_id: run.run_id,
            completed: false,
            result: CrawlResult::default(),
        });

        Some(CrawlEvent::Failure {
            category: ErrorCategory::UnknownError,
            message: ErrorCategory::UnknownError.message(&run.url),
            trace: format!(
                "crawl {} of {} was abandoned by its worker\n\nCaused by:\n    {}",
                run.run_id, run.url, detail
            ),
        })
    }

    /// Token that cancels the active run, for callers that cannot borrow the controller
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|run| run.cancel.clone())
    }

    /// The most recent finished run, if any
    pub fn last_run(&self) -> Option<&FinishedRun> {
        self.last.as_ref()
    }

    /// Titles of the most recent finished run
    pub fn results(&self) -> Option<&CrawlResult> {
        self.last.as_ref().map(|run| &run.result)
    }

    /// Results can be saved once a run has ended and produced at least one title.
    /// Titles collected before a failure stay saveable.
    pub fn can_save(&self) -> bool {
        self.active.is_none() && self.results().map_or(false, |result| !result.is_empty())
    }

    /// Write the last run's titles to `destination`
    pub fn save(&self, destination: &mut dyn DestinationSink) -> Result<usize, ControllerError> {
        if self.active.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let result = self.results()
            .filter(|result| !result.is_empty())
            .ok_or(ControllerError::NothingToSave)?;

        let written = save_titles(result.titles(), destination)?;
        info!("Saved {} titles to {}", written, destination.location());

        Ok(written)
    }
}
