pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the default location when no path is given)
    #[arg(long, global = true, num_args = 0..=1, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    /// Configuration file to use instead of the default one
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl post titles from a blog page
    Crawl {
        /// Blog URL to crawl
        #[arg(required = true)]
        url: String,

        /// Maximum number of titles to collect
        #[arg(short = 'n', long)]
        max_titles: Option<usize>,

        /// Save the collected titles to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run crawls from an interactive prompt
    Interactive {
        /// Maximum number of titles to collect per crawl
        #[arg(short = 'n', long)]
        max_titles: Option<usize>,
    },

    /// Show the active configuration
    Config {
        /// Only print the configuration file location
        #[arg(long)]
        path: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config_path = cli.config;

    match cli.command {
        Commands::Crawl { url, max_titles, output, json } => {
            info!("Starting crawl of {}", url);
            commands::crawl(config_path, url, max_titles, output, json).await
        },
        Commands::Interactive { max_titles } => {
            info!("Starting interactive session");
            commands::interactive(config_path, max_titles).await
        },
        Commands::Config { path } => {
            commands::show_config(config_path, path)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn parses_crawl_arguments() {
        let cli = Cli::try_parse_from([
            "title-crawler", "--verbose", "crawl", "https://blog.example.com", "-n", "5", "-o", "titles.txt",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Crawl { url, max_titles, output, json } => {
                assert_eq!(url, "https://blog.example.com");
                assert_eq!(max_titles, Some(5));
                assert_eq!(output, Some(PathBuf::from("titles.txt")));
                assert!(!json);
            }
            _ => panic!("expected crawl command"),
        }
    }

    #[test]
    fn log_file_path_is_optional() {
        let cli = Cli::try_parse_from(["title-crawler", "config", "--log-file"]).unwrap();
        assert_eq!(cli.log_file, Some(None));

        let cli = Cli::try_parse_from(["title-crawler", "--log-file", "crawl.log", "config"]).unwrap();
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("crawl.log"))));
    }
}
