//! Fairgate configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::FlowControlConfig;

/// Main Fairgate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when none is given on the command line
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Add the exempt and catch-all objects when the file omits them
    #[serde(rename = "mandatory-objects")]
    pub mandatory_objects: bool,

    /// Seat pool, priority levels and flow schemas
    #[serde(flatten)]
    pub flow_control: FlowControlConfig,

    /// Load generator settings for `fg simulate`
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            mandatory_objects: true,
            flow_control: FlowControlConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fairgate.yml
        let local_config = PathBuf::from(".fairgate.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fairgate/fairgate.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fairgate").join("fairgate.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from the config file, read before logging is set up
    ///
    /// Any load failure yields `None`; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The flow control objects to apply, mandatory objects included when enabled
    pub fn flow_control(&self) -> FlowControlConfig {
        if self.mandatory_objects {
            self.flow_control.clone().with_mandatory_objects()
        } else {
            self.flow_control.clone()
        }
    }
}

/// Load generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// How long clients keep issuing requests
    #[serde(rename = "duration-secs")]
    pub duration_secs: u64,

    /// How long each admitted request holds its seat
    #[serde(rename = "service-ms")]
    pub service_ms: u64,

    /// Simulated clients
    pub clients: Vec<ClientSpec>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            service_ms: 50,
            clients: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn service_time(&self) -> Duration {
        Duration::from_millis(self.service_ms)
    }
}

/// One simulated client: a user issuing requests at a fixed rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub user: String,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Requests per second
    pub qps: f64,

    /// Workers issuing requests in parallel
    #[serde(default = "default_client_concurrency")]
    pub concurrency: u32,
}

fn default_client_concurrency() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CATCH_ALL, DEFAULT_SERVER_CONCURRENCY_LIMIT, EXEMPT};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert!(config.mandatory_objects);
        assert_eq!(config.flow_control.server_concurrency_limit, DEFAULT_SERVER_CONCURRENCY_LIMIT);
        assert_eq!(config.simulation.service_ms, 50);
        assert!(config.simulation.clients.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug
server-concurrency-limit: 100
flow-retention-secs: 30

priority-levels:
  - name: workload-low
    type: limited
    assured-concurrency-shares: 20
    limit-response:
      type: queue
      queues: 16
      hand-size: 4

flow-schemas:
  - name: service-accounts
    priority-level: workload-low
    matching-precedence: 9000
    distinguisher: by-user
    rules:
      - subjects:
          - kind: group
            name: system:serviceaccounts
        non-resource-rules:
          - verbs: ["*"]
            non-resource-urls: ["*"]

simulation:
  duration-secs: 5
  service-ms: 20
  clients:
    - user: alice
      groups: [system:authenticated]
      qps: 50
      concurrency: 4
    - user: bob
      qps: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.flow_control.server_concurrency_limit, 100);
        assert_eq!(config.flow_control.flow_retention(), Duration::from_secs(30));
        assert_eq!(config.flow_control.priority_levels.len(), 1);
        assert_eq!(config.flow_control.priority_levels[0].shares(), 20);
        assert_eq!(config.flow_control.flow_schemas[0].matching_precedence, 9000);
        assert_eq!(config.simulation.duration(), Duration::from_secs(5));
        assert_eq!(config.simulation.clients.len(), 2);
        assert_eq!(config.simulation.clients[0].concurrency, 4);
        assert_eq!(config.simulation.clients[1].concurrency, 1);
        assert!(config.simulation.clients[1].groups.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("server-concurrency-limit: 42\n").unwrap();

        assert_eq!(config.flow_control.server_concurrency_limit, 42);
        assert!(config.mandatory_objects);
        assert!(config.flow_control.priority_levels.is_empty());
        assert_eq!(config.simulation.duration_secs, 10);
    }

    #[test]
    fn test_flow_control_adds_mandatory_objects() {
        let config = Config::default();
        let flow_control = config.flow_control();
        assert!(flow_control.priority_levels.iter().any(|l| l.name == EXEMPT));
        assert!(flow_control.flow_schemas.iter().any(|s| s.name == CATCH_ALL));

        let config: Config = serde_yaml::from_str("mandatory-objects: false\n").unwrap();
        assert!(config.flow_control().priority_levels.is_empty());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: warn\nserver-concurrency-limit: 7").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.flow_control.server_concurrency_limit, 7);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/fairgate.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
