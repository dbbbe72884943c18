//! Rule matching against a request digest

use crate::domain::{
    FlowSchema, NAME_ALL, NonResourcePolicyRule, PolicyRulesWithSubjects, RequestDigest, RequestInfo,
    ResourcePolicyRule, Subject, UserInfo,
};

fn matches_name(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| p == NAME_ALL || p == value)
}

pub fn matches_subject(subject: &Subject, user: &UserInfo) -> bool {
    match subject {
        Subject::User { name } => name == NAME_ALL || *name == user.name,
        Subject::Group { name } => name == NAME_ALL || user.in_group(name),
        Subject::ServiceAccount { namespace, name } => match user.service_account() {
            Some((sa_namespace, sa_name)) => sa_namespace == namespace && (name == NAME_ALL || name == sa_name),
            None => false,
        },
    }
}

pub fn matches_resource_rule(rule: &ResourcePolicyRule, request: &RequestInfo) -> bool {
    if !request.is_resource_request {
        return false;
    }
    if !matches_name(&rule.verbs, &request.verb)
        || !matches_name(&rule.api_groups, &request.api_group)
        || !matches_name(&rule.resources, &request.resource)
    {
        return false;
    }
    if request.is_cluster_scoped() {
        rule.cluster_scope
    } else {
        matches_name(&rule.namespaces, &request.namespace)
    }
}

/// `*` matches any path, `/prefix/*` matches anything under `/prefix/`
fn matches_url(pattern: &str, path: &str) -> bool {
    if pattern == NAME_ALL || pattern == path {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => false,
    }
}

pub fn matches_non_resource_rule(rule: &NonResourcePolicyRule, request: &RequestInfo) -> bool {
    !request.is_resource_request
        && matches_name(&rule.verbs, &request.verb)
        && rule.non_resource_urls.iter().any(|url| matches_url(url, &request.path))
}

/// A subject must match, and so must one resource or non-resource rule
pub fn matches_policy(policy: &PolicyRulesWithSubjects, digest: &RequestDigest) -> bool {
    policy.subjects.iter().any(|s| matches_subject(s, &digest.user))
        && (policy
            .resource_rules
            .iter()
            .any(|r| matches_resource_rule(r, &digest.request))
            || policy
                .non_resource_rules
                .iter()
                .any(|r| matches_non_resource_rule(r, &digest.request)))
}

pub fn matches_schema(schema: &FlowSchema, digest: &RequestDigest) -> bool {
    schema.rules.iter().any(|policy| matches_policy(policy, digest))
}
