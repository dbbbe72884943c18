//! Request descriptors handed to the classifier

use serde::{Deserialize, Serialize};

/// Group every authenticated principal belongs to
pub const GROUP_ALL_AUTHENTICATED: &str = "system:authenticated";

/// Group assigned to anonymous principals
pub const GROUP_ALL_UNAUTHENTICATED: &str = "system:unauthenticated";

/// Superuser group served by the exempt priority level
pub const GROUP_MASTERS: &str = "system:masters";

/// Prefix of service account user names (`system:serviceaccount:<ns>:<name>`)
pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// The resolved principal making a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Add a group membership (builder style)
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// An authenticated user, member of `system:authenticated`
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self::new(name).with_group(GROUP_ALL_AUTHENTICATED)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Split a service account user name into (namespace, name)
    pub fn service_account(&self) -> Option<(&str, &str)> {
        self.name.strip_prefix(SERVICE_ACCOUNT_PREFIX)?.split_once(':')
    }
}

/// What the request does: a resource request or a plain URL path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestInfo {
    pub verb: String,
    pub is_resource_request: bool,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub resource: String,
    /// Empty for cluster-scoped resources and non-resource requests
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub path: String,
}

impl RequestInfo {
    /// A request against an API resource
    pub fn resource(
        verb: impl Into<String>,
        api_group: impl Into<String>,
        resource: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            verb: verb.into(),
            is_resource_request: true,
            api_group: api_group.into(),
            resource: resource.into(),
            namespace: namespace.into(),
            path: String::new(),
        }
    }

    /// A request for a non-resource URL such as `/version` or `/healthz`
    pub fn non_resource(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            is_resource_request: false,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

/// Everything the classifier looks at for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDigest {
    pub user: UserInfo,
    pub request: RequestInfo,
}

impl RequestDigest {
    pub fn new(user: UserInfo, request: RequestInfo) -> Self {
        Self { user, request }
    }
}
