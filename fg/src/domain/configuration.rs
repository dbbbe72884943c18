//! A complete flow control configuration: the pool plus every object

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{FlowSchema, PriorityLevel};

/// Default total seats shared by all limited levels
pub const DEFAULT_SERVER_CONCURRENCY_LIMIT: u32 = 600;

/// Default idle time after which a flow's bookkeeping is dropped
pub const DEFAULT_FLOW_RETENTION_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FlowControlConfig {
    pub server_concurrency_limit: u32,
    pub flow_retention_secs: u64,
    pub priority_levels: Vec<PriorityLevel>,
    pub flow_schemas: Vec<FlowSchema>,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            server_concurrency_limit: DEFAULT_SERVER_CONCURRENCY_LIMIT,
            flow_retention_secs: DEFAULT_FLOW_RETENTION_SECS,
            priority_levels: Vec::new(),
            flow_schemas: Vec::new(),
        }
    }
}

impl FlowControlConfig {
    pub fn flow_retention(&self) -> Duration {
        Duration::from_secs(self.flow_retention_secs)
    }

    /// Insert the exempt and catch-all objects unless objects of those names exist
    pub fn with_mandatory_objects(mut self) -> Self {
        for level in PriorityLevel::mandatory() {
            if !self.priority_levels.iter().any(|l| l.name == level.name) {
                self.priority_levels.push(level);
            }
        }
        for schema in FlowSchema::mandatory() {
            if !self.flow_schemas.iter().any(|s| s.name == schema.name) {
                self.flow_schemas.push(schema);
            }
        }
        self
    }
}
