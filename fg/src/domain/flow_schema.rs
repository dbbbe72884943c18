//! FlowSchema: a named classification rule bound to a priority level

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::{GROUP_ALL_AUTHENTICATED, GROUP_ALL_UNAUTHENTICATED, GROUP_MASTERS};
use crate::error::{FlowControlError, FlowControlResult};

/// Wildcard accepted by every name/verb/resource list
pub const NAME_ALL: &str = "*";

/// Lowest accepted matching precedence (highest precedence)
pub const MIN_MATCHING_PRECEDENCE: u32 = 1;

/// Highest accepted matching precedence, reserved for the catch-all
pub const MAX_MATCHING_PRECEDENCE: u32 = 10_000;

/// Name of the mandatory schema that matches every request
pub const CATCH_ALL: &str = "catch-all";

/// Name of the mandatory exempt schema and priority level
pub const EXEMPT: &str = "exempt";

/// Who a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Subject {
    User { name: String },
    Group { name: String },
    ServiceAccount { namespace: String, name: String },
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User { name: name.into() }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group { name: name.into() }
    }

    /// Every authenticated principal
    pub fn all_authenticated() -> Self {
        Self::group(GROUP_ALL_AUTHENTICATED)
    }
}

/// Matches requests against API resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourcePolicyRule {
    pub verbs: Vec<String>,
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub namespaces: Vec<String>,
    pub cluster_scope: bool,
}

impl ResourcePolicyRule {
    /// Every verb on every resource, namespaced or not
    pub fn all() -> Self {
        Self {
            verbs: vec![NAME_ALL.to_string()],
            api_groups: vec![NAME_ALL.to_string()],
            resources: vec![NAME_ALL.to_string()],
            namespaces: vec![NAME_ALL.to_string()],
            cluster_scope: true,
        }
    }
}

/// Matches requests for non-resource URLs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NonResourcePolicyRule {
    pub verbs: Vec<String>,
    /// Exact paths, `*`, or prefixes ending in `/*`
    pub non_resource_urls: Vec<String>,
}

impl NonResourcePolicyRule {
    pub fn all() -> Self {
        Self {
            verbs: vec![NAME_ALL.to_string()],
            non_resource_urls: vec![NAME_ALL.to_string()],
        }
    }
}

/// Subjects plus the resource and non-resource rules they are checked against
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolicyRulesWithSubjects {
    pub subjects: Vec<Subject>,
    pub resource_rules: Vec<ResourcePolicyRule>,
    pub non_resource_rules: Vec<NonResourcePolicyRule>,
}

impl PolicyRulesWithSubjects {
    /// Everything done by the given subjects
    pub fn everything_for(subjects: Vec<Subject>) -> Self {
        Self {
            subjects,
            resource_rules: vec![ResourcePolicyRule::all()],
            non_resource_rules: vec![NonResourcePolicyRule::all()],
        }
    }
}

/// How the flow identifier is derived from a matching request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistinguisherMethod {
    /// All traffic through the schema shares one flow
    #[default]
    None,
    /// One flow per user name
    ByUser,
    /// One flow per request namespace
    ByNamespace,
}

impl std::fmt::Display for DistinguisherMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ByUser => write!(f, "by-user"),
            Self::ByNamespace => write!(f, "by-namespace"),
        }
    }
}

impl std::str::FromStr for DistinguisherMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "by-user" | "byuser" => Ok(Self::ByUser),
            "by-namespace" | "bynamespace" => Ok(Self::ByNamespace),
            _ => Err(format!("Unknown distinguisher method: {}", s)),
        }
    }
}

/// A named classification rule bound to one priority level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlowSchema {
    pub name: String,

    /// Stable identifier; assigned on first registration when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Referenced priority level name
    pub priority_level: String,

    /// Lower value wins
    pub matching_precedence: u32,

    #[serde(default)]
    pub distinguisher: DistinguisherMethod,

    #[serde(default)]
    pub rules: Vec<PolicyRulesWithSubjects>,
}

impl FlowSchema {
    pub fn new(name: impl Into<String>, priority_level: impl Into<String>, matching_precedence: u32) -> Self {
        Self {
            name: name.into(),
            uid: None,
            priority_level: priority_level.into(),
            matching_precedence,
            distinguisher: DistinguisherMethod::None,
            rules: Vec::new(),
        }
    }

    pub fn with_distinguisher(mut self, distinguisher: DistinguisherMethod) -> Self {
        self.distinguisher = distinguisher;
        self
    }

    pub fn with_rule(mut self, rule: PolicyRulesWithSubjects) -> Self {
        self.rules.push(rule);
        self
    }

    /// Check the schema in isolation (references are checked by the snapshot)
    pub fn validate(&self) -> FlowControlResult<()> {
        let object = format!("flow schema {:?}", self.name);
        if self.name.trim().is_empty() {
            return Err(FlowControlError::configuration(object, "name must not be empty"));
        }
        if self.priority_level.trim().is_empty() {
            return Err(FlowControlError::configuration(object, "priority level reference must not be empty"));
        }
        if !(MIN_MATCHING_PRECEDENCE..=MAX_MATCHING_PRECEDENCE).contains(&self.matching_precedence) {
            return Err(FlowControlError::configuration(
                object,
                format!(
                    "matching precedence {} outside {}..={}",
                    self.matching_precedence, MIN_MATCHING_PRECEDENCE, MAX_MATCHING_PRECEDENCE
                ),
            ));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.subjects.is_empty() {
                return Err(FlowControlError::configuration(object, format!("rule {} has no subjects", i)));
            }
            if rule.resource_rules.is_empty() && rule.non_resource_rules.is_empty() {
                return Err(FlowControlError::configuration(
                    object,
                    format!("rule {} has neither resource nor non-resource rules", i),
                ));
            }
            for url in rule.non_resource_rules.iter().flat_map(|r| r.non_resource_urls.iter()) {
                if url != NAME_ALL && !url.starts_with('/') {
                    return Err(FlowControlError::configuration(
                        object,
                        format!("non-resource URL {:?} must start with '/'", url),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The schemas every configuration carries
    pub fn mandatory() -> Vec<Self> {
        vec![
            Self::new(EXEMPT, EXEMPT, MIN_MATCHING_PRECEDENCE)
                .with_rule(PolicyRulesWithSubjects::everything_for(vec![Subject::group(GROUP_MASTERS)])),
            Self::new(CATCH_ALL, CATCH_ALL, MAX_MATCHING_PRECEDENCE)
                .with_distinguisher(DistinguisherMethod::ByUser)
                .with_rule(PolicyRulesWithSubjects::everything_for(vec![
                    Subject::group(GROUP_ALL_AUTHENTICATED),
                    Subject::group(GROUP_ALL_UNAUTHENTICATED),
                ])),
        ]
    }
}
