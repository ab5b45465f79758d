//! Command-line argument parsing and configuration.
//!
//! Supports CLI arguments via clap, an optional TOML configuration
//! file, and merging of the two (CLI takes precedence).

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::DEFAULT_PORT;

/// peershare - P2P file sharing node.
#[derive(Parser, Deserialize, Clone, Debug)]
#[command(author, version, about = "peershare - P2P file sharing node")]
pub struct Args {
    /// Path to a config file (TOML)
    #[clap(long)]
    #[serde(default)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on.
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory whose files are shared with peers.
    #[clap(short, long, default_value = "./shared")]
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Default destination directory for downloaded files.
    #[clap(long, default_value = "./downloads")]
    #[serde(default = "default_downloads")]
    pub downloads: PathBuf,

    /// Bootstrap endpoint (ip:port); may be repeated.
    #[clap(long = "bootstrap")]
    #[serde(default)]
    pub bootstrap: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_directory() -> PathBuf {
    PathBuf::from("./shared")
}

fn default_downloads() -> PathBuf {
    PathBuf::from("./downloads")
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> Self {
        let cli_args = Args::parse();

        if let Some(config_path) = cli_args.config.clone() {
            if let Some(file_args) = Self::from_file(&config_path) {
                return Self::merge(file_args, cli_args);
            }
        }

        let default_path = PathBuf::from("config.toml");
        if let Some(file_args) = Self::from_file(&default_path) {
            return Self::merge(file_args, cli_args);
        }

        cli_args
    }

    /// Load args from a TOML file.
    fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        toml::from_str::<Args>(&content).ok()
    }

    /// Merge file args with CLI args (CLI takes precedence).
    fn merge(mut file: Args, cli: Args) -> Args {
        if cli.port != DEFAULT_PORT {
            file.port = cli.port;
        }
        if cli.directory != default_directory() {
            file.directory = cli.directory;
        }
        if cli.downloads != default_downloads() {
            file.downloads = cli.downloads;
        }
        if !cli.bootstrap.is_empty() {
            file.bootstrap = cli.bootstrap;
        }
        if cli.verbose > 0 {
            file.verbose = cli.verbose;
        }
        file.config = cli.config;
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_args_merge_under_cli_precedence() {
        let file: Args = toml::from_str(
            r#"
            port = 9000
            directory = "/srv/share"
            bootstrap = ["10.0.0.1:8888"]
            "#,
        )
        .unwrap();
        assert_eq!(file.port, 9000);

        let cli = Args {
            config: None,
            port: 9100,
            directory: default_directory(),
            downloads: default_downloads(),
            bootstrap: Vec::new(),
            verbose: 2,
        };

        let merged = Args::merge(file, cli);
        assert_eq!(merged.port, 9100);
        assert_eq!(merged.directory, PathBuf::from("/srv/share"));
        assert_eq!(merged.bootstrap, vec!["10.0.0.1:8888".to_string()]);
        assert_eq!(merged.verbose, 2);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let file: Args = toml::from_str("port = 9000\n").unwrap();
        assert_eq!(file.port, 9000);
        assert_eq!(file.directory, default_directory());
        assert!(file.bootstrap.is_empty());
    }
}
