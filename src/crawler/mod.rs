pub mod admission;
pub mod controller;
pub mod event;
pub mod selector;
pub mod task;
pub mod worker;

// Re-export common types
pub use admission::{admit, AdmissionWindow};
pub use controller::{ControllerError, CrawlerController};
pub use event::{CrawlEvent, ErrorCategory};
pub use task::{CrawlRequest, CrawlResult};
