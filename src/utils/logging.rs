use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::PathBuf;
use std::fs;

fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "title_crawler=debug" } else { "title_crawler=info" };

    Ok(EnvFilter::from_default_env()
        .add_directive(level.parse()?)
        .add_directive("warn".parse()?))
}

/// Initialize the logging system.
///
/// Console logs go to stderr so stdout carries only crawl output.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);

    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;
        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file);

        tracing_subscriber::registry()
            .with(env_filter(verbose)?)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(verbose)?)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}

/// Create a default log file path
pub fn default_log_file() -> PathBuf {
    let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "title-crawler", "title-crawler") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from("./logs")
    };

    path.push("crawler.log");
    path
}
