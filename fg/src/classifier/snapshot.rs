//! Immutable rule set used for classification

use std::collections::HashMap;

use uuid::Uuid;

use super::Classification;
use super::matcher::matches_schema;
use crate::domain::{CATCH_ALL, DistinguisherMethod, FlowSchema, ObjectRef, RequestDigest};
use crate::fairqueue::FlowKey;

/// A schema admitted into a snapshot, with its resolved level
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub schema: FlowSchema,
    pub uid: Uuid,
    pub priority_level: ObjectRef,
}

impl SchemaEntry {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.schema.name.clone(), self.uid)
    }
}

/// A schema left out because its priority level does not exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingSchema {
    pub name: String,
    pub priority_level: String,
}

/// Schemas in evaluation order: ascending precedence, then name
#[derive(Debug, Clone, Default)]
pub struct ClassifierSnapshot {
    version: u64,
    schemas: Vec<SchemaEntry>,
    dangling: Vec<DanglingSchema>,
}

impl ClassifierSnapshot {
    /// Resolve schemas against the known levels
    ///
    /// Schemas naming a level absent from `levels` are set aside as dangling.
    pub fn build(version: u64, schemas: Vec<FlowSchema>, levels: &HashMap<String, ObjectRef>) -> Self {
        let mut entries = Vec::with_capacity(schemas.len());
        let mut dangling = Vec::new();
        for schema in schemas {
            match levels.get(&schema.priority_level) {
                Some(level) => entries.push(SchemaEntry {
                    uid: schema.uid.unwrap_or_else(Uuid::now_v7),
                    priority_level: level.clone(),
                    schema,
                }),
                None => dangling.push(DanglingSchema {
                    name: schema.name,
                    priority_level: schema.priority_level,
                }),
            }
        }
        entries.sort_by(|a, b| {
            (a.schema.matching_precedence, &a.schema.name).cmp(&(b.schema.matching_precedence, &b.schema.name))
        });
        Self {
            version,
            schemas: entries,
            dangling,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn schemas(&self) -> &[SchemaEntry] {
        &self.schemas
    }

    pub fn dangling(&self) -> &[DanglingSchema] {
        &self.dangling
    }

    pub fn find(&self, name: &str) -> Option<&SchemaEntry> {
        self.schemas.iter().find(|entry| entry.schema.name == name)
    }

    /// The first matching schema in evaluation order, else the catch-all
    pub fn select(&self, digest: &RequestDigest) -> Option<&SchemaEntry> {
        self.schemas
            .iter()
            .find(|entry| matches_schema(&entry.schema, digest))
            .or_else(|| self.find(CATCH_ALL))
    }

    pub fn classify(&self, digest: &RequestDigest) -> Option<Classification> {
        let entry = self.select(digest)?;
        let distinguisher = match entry.schema.distinguisher {
            DistinguisherMethod::None => "",
            DistinguisherMethod::ByUser => digest.user.name.as_str(),
            DistinguisherMethod::ByNamespace => digest.request.namespace.as_str(),
        };
        Some(Classification {
            flow_schema: entry.object_ref(),
            priority_level: entry.priority_level.clone(),
            distinguisher: entry.schema.distinguisher,
            flow: FlowKey::new(entry.schema.name.clone(), distinguisher),
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        NonResourcePolicyRule, PolicyRulesWithSubjects, RequestInfo, ResourcePolicyRule, Subject, UserInfo,
    };
    use proptest::prelude::*;

    fn levels(names: &[&str]) -> HashMap<String, ObjectRef> {
        names
            .iter()
            .map(|n| (n.to_string(), ObjectRef::new(*n, Uuid::now_v7())))
            .collect()
    }

    fn everyone(name: &str, level: &str, precedence: u32) -> FlowSchema {
        FlowSchema::new(name, level, precedence).with_rule(PolicyRulesWithSubjects::everything_for(vec![
            Subject::group("*"),
        ]))
    }

    fn get(user: &str, path: &str) -> RequestDigest {
        RequestDigest::new(UserInfo::authenticated(user), RequestInfo::non_resource("get", path))
    }

    #[test]
    fn test_lower_precedence_wins() {
        let snapshot = ClassifierSnapshot::build(
            1,
            vec![everyone("broad", "low", 9000), everyone("narrow", "high", 500)],
            &levels(&["low", "high"]),
        );
        let c = snapshot.classify(&get("alice", "/version")).unwrap();
        assert_eq!(c.flow_schema.name, "narrow");
        assert_eq!(c.priority_level.name, "high");
    }

    #[test]
    fn test_tie_broken_by_name() {
        let snapshot = ClassifierSnapshot::build(
            1,
            vec![everyone("zeta", "a", 100), everyone("alpha", "b", 100)],
            &levels(&["a", "b"]),
        );
        assert_eq!(snapshot.classify(&get("bob", "/")).unwrap().flow_schema.name, "alpha");
    }

    #[test]
    fn test_distinguishers() {
        let by_user = everyone("per-user", "lvl", 10).with_distinguisher(DistinguisherMethod::ByUser);
        let snapshot = ClassifierSnapshot::build(1, vec![by_user], &levels(&["lvl"]));
        assert_eq!(snapshot.classify(&get("noxu", "/")).unwrap().flow.to_string(), "per-user/noxu");

        let by_ns = FlowSchema::new("per-ns", "lvl", 10)
            .with_distinguisher(DistinguisherMethod::ByNamespace)
            .with_rule(PolicyRulesWithSubjects {
                subjects: vec![Subject::group("*")],
                resource_rules: vec![ResourcePolicyRule::all()],
                non_resource_rules: vec![],
            });
        let snapshot = ClassifierSnapshot::build(1, vec![by_ns], &levels(&["lvl"]));
        let digest = RequestDigest::new(
            UserInfo::authenticated("noxu"),
            RequestInfo::resource("list", "", "configmaps", "kube-system"),
        );
        let c = snapshot.classify(&digest).unwrap();
        assert_eq!(c.flow, FlowKey::new("per-ns", "kube-system"));
        assert_eq!(c.distinguisher, DistinguisherMethod::ByNamespace);
    }

    #[test]
    fn test_catch_all_fallback_and_dangling() {
        let narrow = FlowSchema::new("only-version", "lvl", 10).with_rule(PolicyRulesWithSubjects {
            subjects: vec![Subject::group("*")],
            resource_rules: vec![],
            non_resource_rules: vec![NonResourcePolicyRule {
                verbs: vec!["*".to_string()],
                non_resource_urls: vec!["/version".to_string()],
            }],
        });
        let orphan = everyone("orphan", "missing", 1);
        let catch_all = FlowSchema::new(CATCH_ALL, CATCH_ALL, 10_000);

        let snapshot = ClassifierSnapshot::build(
            2,
            vec![narrow.clone(), orphan.clone(), catch_all],
            &levels(&["lvl", CATCH_ALL]),
        );
        assert_eq!(snapshot.dangling().len(), 1);
        assert_eq!(snapshot.dangling()[0].name, "orphan");
        // Dangling schemas never match
        assert_eq!(snapshot.classify(&get("a", "/version")).unwrap().flow_schema.name, "only-version");
        // Catch-all without matching rules is still the default
        assert_eq!(snapshot.classify(&get("a", "/metrics")).unwrap().flow_schema.name, CATCH_ALL);
        assert_eq!(snapshot.classify(&get("a", "/metrics")).unwrap().version, 2);

        let snapshot = ClassifierSnapshot::build(3, vec![narrow, orphan], &levels(&["lvl"]));
        assert!(snapshot.classify(&get("a", "/metrics")).is_none());
    }

    proptest! {
        #[test]
        fn prop_classification_is_min_precedence_then_name(
            specs in prop::collection::vec((1u32..20, "[a-e]{1,3}"), 1..12),
            rotate in 0usize..12,
        ) {
            let schemas: Vec<FlowSchema> = specs
                .iter()
                .map(|(precedence, name)| everyone(name, "lvl", *precedence))
                .collect();
            let mut rotated = schemas.clone();
            let len = rotated.len();
            rotated.rotate_left(rotate % len);

            let known = levels(&["lvl"]);
            let a = ClassifierSnapshot::build(1, schemas, &known);
            let b = ClassifierSnapshot::build(1, rotated, &known);
            let digest = get("someone", "/apis");

            let expected = specs.iter().map(|(p, n)| (*p, n.clone())).min().unwrap();
            let got = a.classify(&digest).unwrap();
            prop_assert_eq!(got.flow_schema.name.clone(), expected.1);
            // Input order does not matter, and repeated calls agree
            prop_assert_eq!(b.classify(&digest).unwrap().flow_schema.name, got.flow_schema.name.clone());
            prop_assert_eq!(a.classify(&digest).unwrap().flow_schema.name, got.flow_schema.name);
        }
    }
}
