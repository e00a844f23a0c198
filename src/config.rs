//! Configuration for the hierarchy-browser CLI
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::browser::BrowserConfig;
use crate::error::Result;
use crate::scope::QueryScope;
use crate::selection::SelectionMode;
use crate::service::HttpServiceConfig;

/// Browse a server-resident taxonomy from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "hierarchy-browser")]
#[command(about = "Incremental browser for large server-resident taxonomies")]
pub struct Args {
    /// Base URL of the taxonomy API
    #[arg(long, env = "HIERARCHY_API_ROOT", default_value = "https://datacommons.org")]
    pub api_root: String,

    /// API key sent as a bearer token (optional)
    #[arg(long, env = "HIERARCHY_API_KEY")]
    pub api_key: Option<String>,

    /// Serve the taxonomy from a JSON document instead of the API
    #[arg(long, env = "HIERARCHY_TAXONOMY_FILE")]
    pub taxonomy_file: Option<PathBuf>,

    /// Entities scoping data counts (repeat or comma-separate)
    #[arg(long = "place", env = "HIERARCHY_PLACES", value_delimiter = ',')]
    pub places: Vec<String>,

    /// Optional data source constraint
    #[arg(long, env = "HIERARCHY_DATA_SOURCE")]
    pub data_source: Option<String>,

    /// Selection discipline (single, multi)
    #[arg(long, env = "HIERARCHY_SELECTION_MODE", default_value = "single")]
    pub selection_mode: String,

    /// Show groups and leaves without data
    #[arg(long, env = "HIERARCHY_SHOW_ALL", default_value = "false")]
    pub show_all: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "HIERARCHY_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the visible rows of a tree
    Tree {
        /// Groups to open, in order
        #[arg(long = "open")]
        open: Vec<String>,

        /// Node to focus, opening its ancestors
        #[arg(long)]
        focus: Option<String>,

        /// Print rows as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Search the taxonomy
    Search {
        text: String,

        /// Request the larger result limit
        #[arg(long, default_value = "false")]
        more: bool,

        /// Pick the candidate at this index and print the focused tree
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Print the ancestor path of a node
    Path { id: String },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.taxonomy_file.is_none()
            && !(self.api_root.starts_with("http://") || self.api_root.starts_with("https://"))
        {
            return Err("HIERARCHY_API_ROOT must be an http(s) URL".to_string());
        }

        if self.request_timeout_secs == 0 {
            return Err("HIERARCHY_REQUEST_TIMEOUT_SECS must be greater than 0".to_string());
        }

        if let Err(e) = self.selection_mode.parse::<SelectionMode>() {
            return Err(e.to_string());
        }

        Ok(())
    }

    pub fn scope(&self) -> QueryScope {
        let scope = QueryScope::new(self.places.iter().cloned());
        match &self.data_source {
            Some(source) => scope.with_data_source(source.clone()),
            None => scope,
        }
    }

    /// Browser config: environment defaults overlaid with CLI arguments
    pub fn browser_config(&self) -> Result<BrowserConfig> {
        let mut config = BrowserConfig::from_env();
        config.selection_mode = self.selection_mode.parse()?;
        config.show_all_nodes_default = self.show_all;
        config.initial_scope = self.scope();
        Ok(config)
    }

    pub fn http_config(&self) -> HttpServiceConfig {
        HttpServiceConfig {
            api_root: self.api_root.clone(),
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_command() {
        let args = Args::try_parse_from([
            "hierarchy-browser",
            "--place",
            "geoId/06,geoId/05",
            "--selection-mode",
            "multi",
            "tree",
            "--open",
            "dc/g/Demographics",
        ])
        .unwrap();

        assert!(args.validate().is_ok());
        assert_eq!(args.scope().entities, vec!["geoId/06", "geoId/05"]);
        assert_eq!(
            args.browser_config().unwrap().selection_mode,
            SelectionMode::Multi
        );
        assert!(matches!(args.command, Command::Tree { ref open, .. } if open.len() == 1));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = Args::try_parse_from([
            "hierarchy-browser",
            "--api-root",
            "ftp://example.org",
            "path",
            "Count_Person",
        ])
        .unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from([
            "hierarchy-browser",
            "--selection-mode",
            "several",
            "path",
            "Count_Person",
        ])
        .unwrap();
        assert!(args.validate().is_err());
    }
}
