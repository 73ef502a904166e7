use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::crawler::task::CrawlResult;

/// Failure classes reported to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No selector entry matched any element
    ElementNotFound,

    /// Browser session could not be established, or navigation failed
    DriverError,

    /// Anything not classified above
    UnknownError,

    /// The run was cancelled before it finished
    Cancelled,
}

impl ErrorCategory {
    /// Short user-facing message for this category
    pub fn message(&self, url: &str) -> String {
        match self {
            ErrorCategory::ElementNotFound => format!("Could not find any post titles on {}.", url),
            ErrorCategory::DriverError => format!("A web driver error occurred while crawling {}.", url),
            ErrorCategory::UnknownError => format!("An unknown error occurred while crawling {}.", url),
            ErrorCategory::Cancelled => format!("The crawl of {} was cancelled.", url),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::ElementNotFound => "ElementNotFound",
            ErrorCategory::DriverError => "DriverError",
            ErrorCategory::UnknownError => "UnknownError",
            ErrorCategory::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Progress, result and terminal notifications emitted by a crawl worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    StatusUpdate {
        message: String,
    },
    ResultAppended {
        /// 1-based position of the title in the run
        index: usize,
        title: String,
    },
    Failure {
        category: ErrorCategory,
        message: String,
        trace: String,
    },
    Completed,
}

impl CrawlEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlEvent::Failure { .. } | CrawlEvent::Completed)
    }
}

/// Sending half of a run's event stream.
///
/// Nothing is delivered after the first terminal event. A receiver that has
/// gone away is not an error for the worker; the run still finishes and
/// releases its browser session.
pub struct EventSender {
    tx: UnboundedSender<CrawlEvent>,

    /// Set once the terminal event has been emitted
    terminated: AtomicBool,

    /// Receives the final result just before the terminal event
    handoff: Option<oneshot::Sender<CrawlResult>>,
}

impl EventSender {
    pub fn new(tx: UnboundedSender<CrawlEvent>) -> Self {
        Self {
            tx,
            terminated: AtomicBool::new(false),
            handoff: None,
        }
    }

    /// Also deliver the final result on `handoff`, ahead of the terminal event
    pub fn with_handoff(mut self, handoff: oneshot::Sender<CrawlResult>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    /// Emit the run's terminal event, handing off a snapshot of the result first
    pub fn finish(mut self, event: CrawlEvent, result: &CrawlResult) {
        debug_assert!(event.is_terminal(), "finish called with {:?}", event);
        debug_assert!(!self.is_terminated(), "run already terminated");

        if let Some(handoff) = self.handoff.take() {
            if handoff.send(result.clone()).is_err() {
                debug!("Result receiver closed; snapshot discarded");
            }
        }

        self.emit(event);
    }

    pub fn emit(&self, event: CrawlEvent) {
        if self.terminated.load(Ordering::Acquire) {
            warn!("Dropping event emitted after terminal event: {:?}", event);
            return;
        }

        if event.is_terminal() {
            self.terminated.store(true, Ordering::Release);
        }

        if self.tx.send(event).is_err() {
            debug!("Event receiver closed; event discarded");
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(CrawlEvent::StatusUpdate { message: message.into() });
    }

    pub fn result(&self, index: usize, title: impl Into<String>) {
        self.emit(CrawlEvent::ResultAppended { index, title: title.into() });
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn nothing_after_terminal_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);

        events.status("working");
        events.emit(CrawlEvent::Completed);
        events.status("too late");
        events.emit(CrawlEvent::Completed);

        assert!(events.is_terminated());
        assert_eq!(
            rx.try_recv().unwrap(),
            CrawlEvent::StatusUpdate { message: "working".to_string() }
        );
        assert_eq!(rx.try_recv().unwrap(), CrawlEvent::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn result_is_handed_off_before_terminal_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handoff_tx, mut handoff_rx) = oneshot::channel();
        let events = EventSender::new(tx).with_handoff(handoff_tx);

        let mut result = CrawlResult::default();
        result.push("A".to_string());
        events.finish(CrawlEvent::Completed, &result);

        assert_eq!(rx.try_recv().unwrap(), CrawlEvent::Completed);
        assert_eq!(handoff_rx.try_recv().unwrap(), result);
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let events = EventSender::new(tx);
        events.result(1, "title");
        events.emit(CrawlEvent::Completed);
        assert!(events.is_terminated());
    }

    #[test]
    fn events_serialize_tagged() {
        let event = CrawlEvent::Failure {
            category: ErrorCategory::DriverError,
            message: "boom".to_string(),
            trace: "details".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "failure");
        assert_eq!(json["category"], "driver_error");
        assert_eq!(serde_json::to_value(CrawlEvent::Completed).unwrap()["type"], "completed");
    }
}
