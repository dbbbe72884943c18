//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{RequestDigest, RequestInfo, UserInfo};

/// Fairgate - priority and fairness admission control
#[derive(Parser)]
#[command(
    name = "fg",
    about = "Classify requests and share server concurrency fairly between priority levels",
    version,
    after_help = generate_after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the configuration and show levels, limits and schemas
    Check {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show which flow schema and priority level a request maps to
    Classify(ClassifyArgs),

    /// Run the configured simulation clients through the gate
    Simulate {
        /// Override simulation.duration-secs
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Override simulation.service-ms
        #[arg(long)]
        service_ms: Option<u64>,
    },

    /// Print Prometheus metrics after applying the configuration
    Metrics,
}

/// Request description for `fg classify`
#[derive(Debug, Clone, clap::Args)]
pub struct ClassifyArgs {
    /// Requesting user name
    #[arg(short, long)]
    pub user: String,

    /// Group membership (repeatable)
    #[arg(short, long = "group")]
    pub groups: Vec<String>,

    /// Non-resource URL path such as /healthz
    #[arg(long, conflicts_with_all = ["resource", "api_group", "namespace"])]
    pub path: Option<String>,

    /// Request verb
    #[arg(long, default_value = "get")]
    pub verb: String,

    /// Resource name such as pods
    #[arg(long, required_unless_present = "path")]
    pub resource: Option<String>,

    /// API group; empty for the core group
    #[arg(long, default_value = "")]
    pub api_group: String,

    /// Namespace; omit for cluster-scoped resources
    #[arg(short, long, default_value = "")]
    pub namespace: String,
}

impl ClassifyArgs {
    /// Build the digest the classifier sees
    pub fn digest(&self) -> RequestDigest {
        debug!(user = %self.user, "ClassifyArgs::digest: called");
        let user = self
            .groups
            .iter()
            .fold(UserInfo::new(self.user.clone()), |user, group| user.with_group(group.clone()));
        let request = match (&self.path, &self.resource) {
            (Some(path), _) => RequestInfo::non_resource(self.verb.clone(), path.clone()),
            (None, resource) => RequestInfo::resource(
                self.verb.clone(),
                self.api_group.clone(),
                resource.clone().unwrap_or_default(),
                self.namespace.clone(),
            ),
        };
        RequestDigest::new(user, request)
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fairgate")
        .join("logs")
        .join("fairgate.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Config search order:\n");
    help.push_str("  --config <PATH>\n");
    help.push_str("  ./.fairgate.yml\n");
    if let Some(config_dir) = dirs::config_dir() {
        help.push_str(&format!("  {}\n", config_dir.join("fairgate").join("fairgate.yml").display()));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for check
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
