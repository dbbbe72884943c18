//! Admission Gate implementation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::SeatHandle;
use super::result::{AdmissionResult, Decision};
use crate::classifier::{Classification, Classifier, ClassifierSnapshot};
use crate::domain::{FlowControlConfig, ObjectRef, RequestDigest};
use crate::error::{FlowControlError, FlowControlResult};
use crate::events::{EventBus, FlowControlEvent, create_event_bus};
use crate::fairqueue::{Arrival, RejectReason, RequestId};
use crate::metrics::FlowControlMetrics;
use crate::registry::{LevelState, LevelStats, PriorityRegistry, RegistrySnapshot};

/// An object left out of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedObject {
    pub object: String,
    pub message: String,
}

impl RejectedObject {
    fn from_error(object: String, error: FlowControlError) -> Self {
        match error {
            FlowControlError::Configuration { object, message } => Self { object, message },
            other => Self {
                object,
                message: other.to_string(),
            },
        }
    }
}

/// What [`AdmissionGate::apply`] did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub version: u64,
    pub priority_levels: usize,
    pub flow_schemas: usize,
    /// Invalid or dangling objects that were skipped
    pub rejected: Vec<RejectedObject>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Withdraws a queued request unless disarmed
///
/// Covers the paths where the waiting future is cancelled, times out, or is
/// simply dropped by its caller.
struct QueuedRequest<'a> {
    state: &'a LevelState,
    id: RequestId,
    armed: bool,
}

impl QueuedRequest<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for QueuedRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.cancel(self.id, Instant::now());
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Classify, then admit, queue or reject
///
/// Classification reads an immutable snapshot without locking. Seat
/// accounting takes one lock per priority level, never across an await.
#[derive(Debug)]
pub struct AdmissionGate {
    classifier: Classifier,
    registry: PriorityRegistry,
    metrics: FlowControlMetrics,
    events: Arc<EventBus>,
    apply_lock: Mutex<()>,
}

impl AdmissionGate {
    /// A gate with no configuration; every request fails classification until [`AdmissionGate::apply`]
    pub fn new(events: Arc<EventBus>) -> FlowControlResult<Self> {
        debug!("AdmissionGate::new: called");
        let metrics = FlowControlMetrics::new()?;
        Ok(Self {
            classifier: Classifier::new(events.clone()),
            registry: PriorityRegistry::new(metrics.clone(), events.clone()),
            metrics,
            events,
            apply_lock: Mutex::new(()),
        })
    }

    /// A gate with its own event bus, configured from `config`
    pub fn with_config(config: &FlowControlConfig) -> FlowControlResult<Self> {
        let gate = Self::new(create_event_bus())?;
        gate.apply(config)?;
        Ok(gate)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn metrics(&self) -> &FlowControlMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &PriorityRegistry {
        &self.registry
    }

    pub fn classifier_snapshot(&self) -> Arc<ClassifierSnapshot> {
        self.classifier.snapshot()
    }

    pub fn registry_snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    /// Publish a new configuration
    ///
    /// Each object is validated on its own; invalid ones are reported and
    /// skipped while the rest take effect. Schemas pointing at a level that
    /// did not make it in are dangling and never match. Only a broken pool
    /// size fails the whole call.
    pub fn apply(&self, config: &FlowControlConfig) -> FlowControlResult<ApplyReport> {
        debug!(
            levels = config.priority_levels.len(),
            schemas = config.flow_schemas.len(),
            "AdmissionGate::apply: called"
        );
        let _serial = self.apply_lock.lock();

        if config.server_concurrency_limit == 0 {
            let err = FlowControlError::configuration("server", "server concurrency limit must be at least 1");
            self.events.emit(FlowControlEvent::ConfigurationError {
                object: "server".to_string(),
                message: err.to_string(),
            });
            return Err(err);
        }

        let previous_levels = self.registry.snapshot();
        let previous_schemas = self.classifier.snapshot();
        let mut rejected = Vec::new();

        let mut seen = HashSet::new();
        let mut levels = Vec::with_capacity(config.priority_levels.len());
        for level in &config.priority_levels {
            let object = format!("priority level {:?}", level.name);
            if !seen.insert(level.name.as_str()) {
                rejected.push(RejectedObject {
                    object,
                    message: "duplicate name".to_string(),
                });
                continue;
            }
            if let Err(e) = level.validate() {
                rejected.push(RejectedObject::from_error(object, e));
                continue;
            }
            let mut level = level.clone();
            level.uid = level
                .uid
                .or_else(|| previous_levels.entry(&level.name).map(|entry| entry.uid));
            levels.push(level);
        }

        let registry = self
            .registry
            .apply(levels, config.server_concurrency_limit, config.flow_retention())?;
        let level_refs: HashMap<String, ObjectRef> = registry
            .entries()
            .map(|entry| (entry.level.name.clone(), entry.object_ref()))
            .collect();

        let mut seen = HashSet::new();
        let mut schemas = Vec::with_capacity(config.flow_schemas.len());
        for schema in &config.flow_schemas {
            let object = format!("flow schema {:?}", schema.name);
            if !seen.insert(schema.name.as_str()) {
                rejected.push(RejectedObject {
                    object,
                    message: "duplicate name".to_string(),
                });
                continue;
            }
            if let Err(e) = schema.validate() {
                rejected.push(RejectedObject::from_error(object, e));
                continue;
            }
            let mut schema = schema.clone();
            schema.uid = schema
                .uid
                .or_else(|| previous_schemas.find(&schema.name).map(|entry| entry.uid));
            schemas.push(schema);
        }

        let snapshot = ClassifierSnapshot::build(registry.version, schemas, &level_refs);
        for dangling in snapshot.dangling() {
            rejected.push(RejectedObject {
                object: format!("flow schema {:?}", dangling.name),
                message: format!("priority level {:?} does not exist", dangling.priority_level),
            });
        }
        let report = ApplyReport {
            version: registry.version,
            priority_levels: registry.len(),
            flow_schemas: snapshot.schemas().len(),
            rejected,
        };
        self.classifier.publish(snapshot);

        for object in &report.rejected {
            warn!(object = %object.object, message = %object.message, "Configuration object skipped");
            self.events.emit(FlowControlEvent::ConfigurationError {
                object: object.object.clone(),
                message: object.message.clone(),
            });
        }
        self.events.emit(FlowControlEvent::ConfigApplied {
            version: report.version,
            priority_levels: report.priority_levels,
            flow_schemas: report.flow_schemas,
            rejected_objects: report.rejected.len(),
        });
        info!(
            version = report.version,
            priority_levels = report.priority_levels,
            flow_schemas = report.flow_schemas,
            rejected = report.rejected.len(),
            "Configuration applied"
        );
        Ok(report)
    }

    pub fn classify(&self, digest: &RequestDigest) -> FlowControlResult<Classification> {
        self.classifier.classify(digest)
    }

    /// Classify and wait for a seat until granted, rejected, or `cancel` fires
    pub async fn admit(&self, digest: &RequestDigest, cancel: &CancellationToken) -> FlowControlResult<AdmissionResult> {
        let classification = self.classify(digest)?;
        self.wait_for_seat(classification, Some(cancel), None).await
    }

    /// Classify and wait at most `timeout` for a seat
    pub async fn admit_with_timeout(&self, digest: &RequestDigest, timeout: Duration) -> FlowControlResult<AdmissionResult> {
        let classification = self.classify(digest)?;
        self.wait_for_seat(classification, None, Some(timeout)).await
    }

    /// Wait for a seat for an already classified request
    pub async fn admit_classified(
        &self,
        classification: Classification,
        cancel: &CancellationToken,
    ) -> FlowControlResult<AdmissionResult> {
        self.wait_for_seat(classification, Some(cancel), None).await
    }

    async fn wait_for_seat(
        &self,
        classification: Classification,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> FlowControlResult<AdmissionResult> {
        let level_name = classification.priority_level.name.clone();
        debug!(priority_level = %level_name, flow = %classification.flow, "AdmissionGate::wait_for_seat: called");

        let registry = self.registry.snapshot();
        let Some(entry) = registry.entry(&level_name) else {
            if classification.version < registry.version {
                // Classified against a configuration that has since dropped the level
                debug!(priority_level = %level_name, "AdmissionGate::wait_for_seat: level gone since classification");
                self.metrics.rejected(
                    &level_name,
                    &classification.flow_schema.name,
                    RejectReason::PriorityLevelRemoved,
                );
                return Ok(self.result(classification, Decision::Rejected(RejectReason::PriorityLevelRemoved), Duration::ZERO));
            }
            return Err(FlowControlError::UnknownPriorityLevel { name: level_name });
        };
        let state = entry.state.clone();
        drop(registry);

        let started = tokio::time::Instant::now();
        let (tx, rx) = oneshot::channel();
        let decision = match state.arrive(&classification.flow, tx, Instant::now()) {
            Arrival::Immediate { id } => Decision::Admitted(SeatHandle::new(state, id, classification.flow.clone())),
            Arrival::Rejected { reason } => {
                debug!(priority_level = %level_name, %reason, "AdmissionGate::wait_for_seat: rejected on arrival");
                Decision::Rejected(reason)
            }
            Arrival::Queued { id, queue } => {
                debug!(priority_level = %level_name, id, queue, "AdmissionGate::wait_for_seat: queued, waiting");
                let mut queued = QueuedRequest {
                    state: &state,
                    id,
                    armed: true,
                };
                let outcome = tokio::select! {
                    biased;
                    granted = rx => granted.map_err(|_| RejectReason::PriorityLevelRemoved),
                    _ = cancelled(cancel) => Err(RejectReason::Cancelled),
                    _ = expired(timeout) => Err(RejectReason::TimedOut),
                };
                match outcome {
                    Ok(()) => {
                        queued.disarm();
                        drop(queued);
                        Decision::Admitted(SeatHandle::new(state.clone(), id, classification.flow.clone()))
                    }
                    Err(reason) => {
                        // Withdraws the waiter, or returns a seat granted in the meantime
                        drop(queued);
                        debug!(priority_level = %level_name, id, %reason, "AdmissionGate::wait_for_seat: gave up waiting");
                        self.metrics
                            .rejected(&level_name, &classification.flow_schema.name, reason);
                        Decision::Rejected(reason)
                    }
                }
            }
        };
        Ok(self.result(classification, decision, started.elapsed()))
    }

    fn result(&self, classification: Classification, decision: Decision, waited: Duration) -> AdmissionResult {
        AdmissionResult {
            decision,
            flow_schema: classification.flow_schema,
            priority_level: classification.priority_level,
            flow: classification.flow,
            waited,
        }
    }

    /// Give a seat back
    pub fn release(&self, seat: SeatHandle) -> FlowControlResult<()> {
        seat.release()
    }

    /// Current limit of a level; `None` for exempt or unknown levels
    pub fn concurrency_limit(&self, priority_level: &str) -> Option<u32> {
        self.registry.limit_for(priority_level)
    }

    /// Seats held at a level
    pub fn in_flight(&self, priority_level: &str) -> Option<usize> {
        self.registry
            .snapshot()
            .entry(priority_level)
            .map(|entry| entry.state.executing())
    }

    /// Requests waiting at a level
    pub fn queued(&self, priority_level: &str) -> Option<usize> {
        self.registry
            .snapshot()
            .entry(priority_level)
            .map(|entry| entry.state.waiting())
    }

    /// Stats of every configured level, then of removed levels still draining
    pub fn level_stats(&self) -> Vec<LevelStats> {
        let snapshot = self.registry.snapshot();
        snapshot
            .entries()
            .map(|entry| entry.state.stats())
            .chain(self.registry.draining().iter().map(|state| state.stats()))
            .collect()
    }
}
