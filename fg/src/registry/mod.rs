//! Priority Registry
//!
//! Holds the priority levels of the current configuration, their computed
//! concurrency limits and their runtime seat state. The whole view is one
//! immutable [`RegistrySnapshot`] swapped atomically, so `limit_for` sees
//! either the old or the new configuration, never a mix.
//!
//! Limits: each limited level gets
//! `floor(server_concurrency_limit * shares / sum_of_shares)` seats, at least
//! one. Exempt levels are outside the pool and have no limit.

mod level;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::{ObjectRef, PriorityLevel};
use crate::error::FlowControlResult;
use crate::events::EventBus;
use crate::metrics::FlowControlMetrics;

pub use level::{LevelState, LevelStats, Wakeup};

/// Seats for a level holding `shares` out of `total_shares`
pub fn concurrency_limit(server_concurrency_limit: u32, shares: u32, total_shares: u64) -> u32 {
    if total_shares == 0 {
        return 1;
    }
    let limit = u64::from(server_concurrency_limit) * u64::from(shares) / total_shares;
    u32::try_from(limit).unwrap_or(u32::MAX).max(1)
}

/// One registered level
#[derive(Debug, Clone)]
pub struct LevelEntry {
    pub level: PriorityLevel,
    pub uid: Uuid,
    /// `None` for exempt levels
    pub concurrency_limit: Option<u32>,
    pub state: Arc<LevelState>,
}

impl LevelEntry {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.level.name.clone(), self.uid)
    }
}

/// Levels and limits of one configuration version
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub server_concurrency_limit: u32,
    pub total_shares: u64,
    levels: BTreeMap<String, LevelEntry>,
}

impl RegistrySnapshot {
    pub fn limit_for(&self, name: &str) -> Option<u32> {
        self.levels.get(name)?.concurrency_limit
    }

    pub fn lookup(&self, name: &str) -> Option<&PriorityLevel> {
        self.levels.get(name).map(|entry| &entry.level)
    }

    pub fn entry(&self, name: &str) -> Option<&LevelEntry> {
        self.levels.get(name)
    }

    /// Levels in name order
    pub fn entries(&self) -> impl Iterator<Item = &LevelEntry> {
        self.levels.values()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Publishes registry snapshots and keeps removed levels until they drain
#[derive(Debug)]
pub struct PriorityRegistry {
    current: ArcSwap<RegistrySnapshot>,
    draining: Mutex<Vec<Arc<LevelState>>>,
    metrics: FlowControlMetrics,
    events: Arc<EventBus>,
}

impl PriorityRegistry {
    pub fn new(metrics: FlowControlMetrics, events: Arc<EventBus>) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            draining: Mutex::new(Vec::new()),
            metrics,
            events,
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn limit_for(&self, name: &str) -> Option<u32> {
        self.current.load().limit_for(name)
    }

    pub fn lookup(&self, name: &str) -> Option<PriorityLevel> {
        self.current.load().lookup(name).cloned()
    }

    pub fn uid_of(&self, name: &str) -> Option<Uuid> {
        self.current.load().entry(name).map(|entry| entry.uid)
    }

    /// Removed levels that still hold or queue requests
    pub fn draining(&self) -> Vec<Arc<LevelState>> {
        let mut draining = self.draining.lock();
        draining.retain(|state| !state.is_drained());
        draining.clone()
    }

    /// Replace the level set
    ///
    /// `levels` must be validated with unique names. Levels that keep their
    /// name and kind keep their state; anything else that disappears is
    /// retired and drains in the background.
    pub fn apply(
        &self,
        levels: Vec<PriorityLevel>,
        server_concurrency_limit: u32,
        flow_retention: Duration,
    ) -> FlowControlResult<Arc<RegistrySnapshot>> {
        debug!(levels = levels.len(), server_concurrency_limit, "PriorityRegistry::apply: called");
        let old = self.current.load_full();
        let total_shares: u64 = levels.iter().map(|l| u64::from(l.shares())).sum();

        let mut entries = BTreeMap::new();
        let mut reconfigure = Vec::new();
        let mut retire = Vec::new();
        for level in levels {
            let uid = level.uid.unwrap_or_else(Uuid::now_v7);
            let limit =
                (!level.is_exempt()).then(|| concurrency_limit(server_concurrency_limit, level.shares(), total_shares));
            let state = match old.levels.get(&level.name) {
                Some(prev) if prev.level.is_exempt() == level.is_exempt() => {
                    reconfigure.push((prev.state.clone(), level.clone(), limit));
                    prev.state.clone()
                }
                prev => {
                    if let Some(prev) = prev {
                        retire.push(prev.state.clone());
                    }
                    Arc::new(LevelState::new(
                        &level,
                        uid,
                        limit,
                        flow_retention,
                        self.metrics.clone(),
                        self.events.clone(),
                    )?)
                }
            };
            entries.insert(
                level.name.clone(),
                LevelEntry {
                    level,
                    uid,
                    concurrency_limit: limit,
                    state,
                },
            );
        }
        for (name, prev) in &old.levels {
            if !entries.contains_key(name) {
                retire.push(prev.state.clone());
            }
        }

        let snapshot = Arc::new(RegistrySnapshot {
            version: old.version + 1,
            server_concurrency_limit,
            total_shares,
            levels: entries,
        });
        self.current.store(snapshot.clone());

        for (state, level, limit) in reconfigure {
            if let Err(e) = state.reconfigure(&level, limit, flow_retention) {
                error!(name = %level.name, error = %e, "Failed to reconfigure priority level");
            }
        }

        // Gauges are keyed by name, so older states that share a name with a
        // current level must stop writing them before they are retired
        {
            let mut draining = self.draining.lock();
            for state in draining.iter().chain(retire.iter()) {
                if snapshot.levels.contains_key(state.name()) {
                    state.disown_metrics();
                }
            }
            for state in retire {
                if !state.mark_removed() {
                    draining.push(state);
                }
            }
        }
        for entry in snapshot.entries() {
            if let Some(limit) = entry.concurrency_limit {
                self.metrics.set_concurrency_limit(&entry.level.name, limit);
            }
            entry.state.publish_metrics();
        }

        info!(
            version = snapshot.version,
            levels = snapshot.len(),
            total_shares,
            "Priority levels applied"
        );
        Ok(snapshot)
    }
}
