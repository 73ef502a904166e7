pub mod page;
pub mod session;

// Re-export common types
pub use page::{with_timeout, BrowserError, BrowserLauncher, ElementHandle, Locator, PageDriver};
pub use session::WebDriverLauncher;
