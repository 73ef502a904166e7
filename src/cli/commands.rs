use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::browser::WebDriverLauncher;
use crate::cli::config::AppConfig;
use crate::crawler::{CrawlEvent, CrawlerController};
use crate::storage::FileDestination;

fn load_config(path: Option<PathBuf>, max_titles: Option<usize>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from_file(&path)?,
        None => AppConfig::load_default()?,
    };

    // Override configuration with command line parameters if provided
    if let Some(n) = max_titles {
        config.crawler.max_titles = n;
        config.validate()?;
    }

    Ok(config)
}

fn build_controller(config: &AppConfig) -> Result<CrawlerController> {
    let launcher = WebDriverLauncher::new(config.browser.clone());
    Ok(CrawlerController::new(
        config.crawler.clone(),
        config.admission.window()?,
        Arc::new(launcher),
    ))
}

/// Print one event for the user
fn render(event: &CrawlEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize event: {}", e),
        }
        return;
    }

    match event {
        CrawlEvent::StatusUpdate { message } => println!("[status] {}", message),
        CrawlEvent::ResultAppended { index, title } => println!("{}. {}", index, title),
        CrawlEvent::Failure { message, trace, .. } => {
            eprintln!("Error: {}\n\nDetails:\n{}", message, trace)
        }
        CrawlEvent::Completed => {}
    }
}

fn save_results(controller: &CrawlerController, path: &Path) -> Result<()> {
    let mut destination = FileDestination::new(path);
    let written = controller
        .save(&mut destination)
        .with_context(|| format!("Failed to save results to {}", path.display()))?;

    println!("Saved {} titles to {}", written, path.display());
    Ok(())
}

enum CrawlStep {
    Event(Option<CrawlEvent>),
    Interrupted,
}

/// Crawl a single page and optionally save the titles
pub async fn crawl(
    config_path: Option<PathBuf>,
    url: String,
    max_titles: Option<usize>,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, max_titles)?;
    let mut controller = build_controller(&config)?;

    let run_id = controller.start(&url, Utc::now())?;
    info!("Crawl {} started", run_id);

    let cancel = controller.cancel_token();
    let mut failure = None;

    loop {
        let step = tokio::select! {
            biased;
            event = controller.next_event() => CrawlStep::Event(event),
            _ = tokio::signal::ctrl_c() => CrawlStep::Interrupted,
        };

        match step {
            CrawlStep::Event(Some(event)) => {
                render(&event, json);
                if let CrawlEvent::Failure { category, .. } = &event {
                    failure = Some(*category);
                }
                if event.is_terminal() {
                    break;
                }
            }
            CrawlStep::Event(None) => break,
            CrawlStep::Interrupted => {
                info!("Interrupt received, cancelling crawl {}", run_id);
                if let Some(token) = &cancel {
                    token.cancel();
                }
            }
        }
    }

    if let Some(path) = output {
        if controller.can_save() {
            save_results(&controller, &path)?;
        } else {
            warn!("No titles collected; nothing written to {}", path.display());
        }
    }

    match failure {
        Some(category) => Err(anyhow!("Crawl {} failed: {}", run_id, category)),
        None => Ok(()),
    }
}

/// A line typed at the interactive prompt
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Crawl(String),
    Save(PathBuf),
    Cancel,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match (word, rest) {
            ("", _) => ReplCommand::Empty,
            ("crawl", url) => ReplCommand::Crawl(url.to_string()),
            ("save", "") => ReplCommand::Unknown("save needs a file path".to_string()),
            ("save", path) => ReplCommand::Save(PathBuf::from(path)),
            ("cancel", _) => ReplCommand::Cancel,
            ("status", _) => ReplCommand::Status,
            ("help", _) | ("?", _) => ReplCommand::Help,
            ("quit", _) | ("exit", _) => ReplCommand::Quit,
            (other, _) => ReplCommand::Unknown(format!("unknown command '{}'", other)),
        }
    }
}

const HELP: &str = "\
Commands:
  crawl <url>   start crawling post titles from <url>
  save <path>   write the last run's titles to <path>
  cancel        stop the running crawl
  status        show what the crawler is doing
  help          show this message
  quit          leave the session";

enum Input {
    Line(std::io::Result<Option<String>>),
    Event(Option<CrawlEvent>),
    Interrupted,
}

fn print_status(controller: &CrawlerController) {
    if controller.is_disabled() {
        println!("Crawling is disabled; the window closed at {}", controller.window().deadline());
    } else if controller.is_running() {
        println!("A crawl is running");
    } else {
        match controller.window().remaining(Utc::now()) {
            Some(left) => println!(
                "Idle; crawls accepted for another {}h{:02}m (window {} to {})",
                left.num_hours(),
                left.num_minutes() % 60,
                controller.window().start(),
                controller.window().deadline()
            ),
            None => println!("Idle; the crawl window closed at {}", controller.window().deadline()),
        }
    }

    if let Some(run) = controller.last_run() {
        let outcome = if run.completed { "completed" } else { "failed" };
        println!("Last run {} {} with {} titles", run.run_id, outcome, run.result.len());
    }
}

/// Line-driven session that keeps the prompt responsive while a crawl runs
pub async fn interactive(config_path: Option<PathBuf>, max_titles: Option<usize>) -> Result<()> {
    let config = load_config(config_path, max_titles)?;
    let mut controller = build_controller(&config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);

    loop {
        let running = controller.is_running();
        let input = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => Input::Interrupted,
            event = controller.next_event(), if running => Input::Event(event),
            line = lines.next_line() => Input::Line(line),
        };

        match input {
            Input::Event(Some(event)) => {
                render(&event, false);
                if event.is_terminal() && controller.can_save() {
                    println!("Use 'save <path>' to write the titles to a file");
                }
            }
            Input::Event(None) => {}
            Input::Interrupted => {
                if controller.cancel() {
                    println!("Cancelling...");
                } else {
                    break;
                }
            }
            Input::Line(line) => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };

                match ReplCommand::parse(&line) {
                    ReplCommand::Crawl(url) => match controller.start(&url, Utc::now()) {
                        Ok(run_id) => debug!("Crawl {} started", run_id),
                        Err(e) => println!("Cannot start crawl: {}", e),
                    },
                    ReplCommand::Save(path) => {
                        if let Err(e) = save_results(&controller, &path) {
                            println!("{:#}", e);
                        }
                    }
                    ReplCommand::Cancel => {
                        if !controller.cancel() {
                            println!("No crawl is running");
                        }
                    }
                    ReplCommand::Status => print_status(&controller),
                    ReplCommand::Help => println!("{}", HELP),
                    ReplCommand::Quit => break,
                    ReplCommand::Empty => {}
                    ReplCommand::Unknown(reason) => println!("{}; type 'help' for commands", reason),
                }
            }
        }
    }

    // Let a running worker release its browser before exiting
    if controller.cancel() {
        while let Some(event) = controller.next_event().await {
            if event.is_terminal() {
                break;
            }
        }
    }

    Ok(())
}

/// Show the active configuration
pub fn show_config(config_path: Option<PathBuf>, path_only: bool) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(AppConfig::default_path);

    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    if config_path.is_some() && !path.exists() {
        bail!("Configuration file {} does not exist", path.display());
    }

    let config = load_config(config_path, None)?;
    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repl_commands() {
        assert_eq!(
            ReplCommand::parse("crawl  https://blog.example.com "),
            ReplCommand::Crawl("https://blog.example.com".to_string())
        );
        assert_eq!(ReplCommand::parse("save out/titles.txt"), ReplCommand::Save(PathBuf::from("out/titles.txt")));
        assert_eq!(ReplCommand::parse("cancel"), ReplCommand::Cancel);
        assert_eq!(ReplCommand::parse("exit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
    }

    #[test]
    fn crawl_without_url_reaches_request_validation() {
        assert_eq!(ReplCommand::parse("crawl"), ReplCommand::Crawl(String::new()));
    }

    #[test]
    fn rejects_unknown_and_incomplete_commands() {
        assert!(matches!(ReplCommand::parse("save"), ReplCommand::Unknown(_)));
        assert!(matches!(ReplCommand::parse("fetch x"), ReplCommand::Unknown(_)));
    }
}
