pub mod export;

// Re-export common types
pub use export::{save_titles, write_titles, DestinationSink, FileDestination, StorageError};
