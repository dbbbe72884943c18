//! Flow Classifier
//!
//! Classification is a pure function of a [`ClassifierSnapshot`] and the
//! request. Snapshots are immutable and published through an atomic swap,
//! so readers never lock and always see one whole rule set.

mod matcher;
mod snapshot;

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, error};

use crate::domain::{DistinguisherMethod, ObjectRef, RequestDigest};
use crate::error::{FlowControlError, FlowControlResult};
use crate::events::{EventBus, FlowControlEvent};
use crate::fairqueue::FlowKey;

pub use matcher::{matches_non_resource_rule, matches_policy, matches_resource_rule, matches_schema, matches_subject};
pub use snapshot::{ClassifierSnapshot, DanglingSchema, SchemaEntry};

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub flow_schema: ObjectRef,
    pub priority_level: ObjectRef,
    pub distinguisher: DistinguisherMethod,
    pub flow: FlowKey,
    /// Version of the snapshot that produced this classification
    pub version: u64,
}

/// Holds the current snapshot
#[derive(Debug)]
pub struct Classifier {
    current: ArcSwap<ClassifierSnapshot>,
    events: Arc<EventBus>,
}

impl Classifier {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            current: ArcSwap::from_pointee(ClassifierSnapshot::default()),
            events,
        }
    }

    pub fn snapshot(&self) -> Arc<ClassifierSnapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: ClassifierSnapshot) {
        debug!(
            version = snapshot.version(),
            schemas = snapshot.schemas().len(),
            "Classifier::publish: called"
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Classify against the current snapshot
    ///
    /// Failing to match with no catch-all configured is an operator problem;
    /// it is reported on the event bus as well as returned.
    pub fn classify(&self, digest: &RequestDigest) -> FlowControlResult<Classification> {
        let snapshot = self.current.load();
        match snapshot.classify(digest) {
            Some(classification) => {
                debug!(
                    user = %digest.user.name,
                    flow_schema = %classification.flow_schema.name,
                    priority_level = %classification.priority_level.name,
                    flow = %classification.flow,
                    "Classifier::classify: matched"
                );
                Ok(classification)
            }
            None => {
                error!(user = %digest.user.name, path = %digest.request.path, "No flow schema matched and no catch-all exists");
                self.events.emit(FlowControlEvent::NoMatchingFlowSchema {
                    user: digest.user.name.clone(),
                    path: digest.request.path.clone(),
                });
                Err(FlowControlError::NoMatchingFlowSchema)
            }
        }
    }
}
