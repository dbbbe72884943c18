//! Configuration object model and request descriptors

mod configuration;
mod flow_schema;
mod priority_level;
mod request;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use configuration::{DEFAULT_FLOW_RETENTION_SECS, DEFAULT_SERVER_CONCURRENCY_LIMIT, FlowControlConfig};
pub use flow_schema::{
    CATCH_ALL, DistinguisherMethod, EXEMPT, FlowSchema, MAX_MATCHING_PRECEDENCE, MIN_MATCHING_PRECEDENCE, NAME_ALL,
    NonResourcePolicyRule, PolicyRulesWithSubjects, ResourcePolicyRule, Subject,
};
pub use priority_level::{
    CATCH_ALL_SHARES, DEFAULT_ASSURED_CONCURRENCY_SHARES, LimitResponse, LimitedSpec, PriorityLevel,
    PriorityLevelSpec, QueuingConfig,
};
pub use request::{
    GROUP_ALL_AUTHENTICATED, GROUP_ALL_UNAUTHENTICATED, GROUP_MASTERS, RequestDigest, RequestInfo,
    SERVICE_ACCOUNT_PREFIX, UserInfo,
};

/// Name plus stable identifier of a configuration object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    pub uid: Uuid,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>, uid: Uuid) -> Self {
        Self { name: name.into(), uid }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.uid)
    }
}
