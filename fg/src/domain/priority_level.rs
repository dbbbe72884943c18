//! Priority levels: concurrency shares and queuing parameters

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flow_schema::{CATCH_ALL, EXEMPT};
use crate::error::{FlowControlError, FlowControlResult};
use crate::fairqueue::Dealer;

/// Default share for a limited level that does not state one
pub const DEFAULT_ASSURED_CONCURRENCY_SHARES: u32 = 30;

/// Share of the mandatory catch-all level
pub const CATCH_ALL_SHARES: u32 = 5;

/// Queuing parameters of a level that queues instead of rejecting outright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueuingConfig {
    #[serde(default = "default_queues")]
    pub queues: u32,

    #[serde(default = "default_queue_length_limit")]
    pub queue_length_limit: u32,

    #[serde(default = "default_hand_size")]
    pub hand_size: u32,
}

fn default_queues() -> u32 {
    64
}

fn default_queue_length_limit() -> u32 {
    50
}

fn default_hand_size() -> u32 {
    8
}

impl Default for QueuingConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            queue_length_limit: default_queue_length_limit(),
            hand_size: default_hand_size(),
        }
    }
}

/// What happens to a request that cannot get a seat immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LimitResponse {
    /// Reject at once
    #[default]
    Reject,
    /// Wait in a shuffle-sharded queue
    Queue(QueuingConfig),
}

impl LimitResponse {
    pub fn queuing(&self) -> Option<&QueuingConfig> {
        match self {
            Self::Reject => None,
            Self::Queue(queuing) => Some(queuing),
        }
    }
}

/// Limited level parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitedSpec {
    /// Relative weight against all other limited levels
    #[serde(default = "default_shares")]
    pub assured_concurrency_shares: u32,

    #[serde(default)]
    pub limit_response: LimitResponse,
}

fn default_shares() -> u32 {
    DEFAULT_ASSURED_CONCURRENCY_SHARES
}

/// Level type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PriorityLevelSpec {
    /// Never queued or rejected; outside the share pool
    Exempt,
    Limited(LimitedSpec),
}

/// A named priority level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PriorityLevel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    #[serde(flatten)]
    pub spec: PriorityLevelSpec,
}

impl PriorityLevel {
    pub fn exempt(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            spec: PriorityLevelSpec::Exempt,
        }
    }

    /// Limited level that rejects when no seat is free
    pub fn rejecting(name: impl Into<String>, shares: u32) -> Self {
        Self {
            name: name.into(),
            uid: None,
            spec: PriorityLevelSpec::Limited(LimitedSpec {
                assured_concurrency_shares: shares,
                limit_response: LimitResponse::Reject,
            }),
        }
    }

    /// Limited level that queues
    pub fn queuing(name: impl Into<String>, shares: u32, queuing: QueuingConfig) -> Self {
        Self {
            name: name.into(),
            uid: None,
            spec: PriorityLevelSpec::Limited(LimitedSpec {
                assured_concurrency_shares: shares,
                limit_response: LimitResponse::Queue(queuing),
            }),
        }
    }

    pub fn is_exempt(&self) -> bool {
        matches!(self.spec, PriorityLevelSpec::Exempt)
    }

    /// Share weight; zero for exempt levels
    pub fn shares(&self) -> u32 {
        match &self.spec {
            PriorityLevelSpec::Exempt => 0,
            PriorityLevelSpec::Limited(limited) => limited.assured_concurrency_shares,
        }
    }

    pub fn queuing_config(&self) -> Option<&QueuingConfig> {
        match &self.spec {
            PriorityLevelSpec::Exempt => None,
            PriorityLevelSpec::Limited(limited) => limited.limit_response.queuing(),
        }
    }

    pub fn validate(&self) -> FlowControlResult<()> {
        let object = format!("priority level {:?}", self.name);
        if self.name.trim().is_empty() {
            return Err(FlowControlError::configuration(object, "name must not be empty"));
        }
        let PriorityLevelSpec::Limited(limited) = &self.spec else {
            return Ok(());
        };
        if limited.assured_concurrency_shares == 0 {
            return Err(FlowControlError::configuration(
                object,
                "assured concurrency shares must be positive",
            ));
        }
        if let LimitResponse::Queue(queuing) = &limited.limit_response {
            if queuing.queue_length_limit == 0 {
                return Err(FlowControlError::configuration(object, "queue length limit must be positive"));
            }
            Dealer::new(queuing.queues, queuing.hand_size)
                .map_err(|message| FlowControlError::configuration(object, message))?;
        }
        Ok(())
    }

    /// The levels every configuration carries
    pub fn mandatory() -> Vec<Self> {
        vec![Self::exempt(EXEMPT), Self::rejecting(CATCH_ALL, CATCH_ALL_SHARES)]
    }
}
