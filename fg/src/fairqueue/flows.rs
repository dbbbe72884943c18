//! Flow identity and per-flow virtual-time bookkeeping

use std::collections::HashMap;
use std::hash::Hasher;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dealer::FlowHasher;

/// Identifies a flow: the matched schema plus the distinguisher value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub flow_schema: String,
    /// Empty when the schema does not distinguish flows
    pub distinguisher: String,
}

impl FlowKey {
    pub fn new(flow_schema: impl Into<String>, distinguisher: impl Into<String>) -> Self {
        Self {
            flow_schema: flow_schema.into(),
            distinguisher: distinguisher.into(),
        }
    }

    /// Stable hash used to deal the flow's hand
    pub fn hash_value(&self) -> u64 {
        let mut hasher = FlowHasher::new();
        hasher.write(self.flow_schema.as_bytes());
        hasher.write(&[0]);
        hasher.write(self.distinguisher.as_bytes());
        hasher.finish()
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.distinguisher.is_empty() {
            write!(f, "{}", self.flow_schema)
        } else {
            write!(f, "{}/{}", self.flow_schema, self.distinguisher)
        }
    }
}

/// Runtime state of one flow within a queue set
#[derive(Debug, Clone, Default)]
pub(crate) struct FlowState {
    /// Finish tag of the flow's most recently queued request
    pub last_finish: u64,
    pub waiting: u32,
    pub executing: u32,
    /// Set when the flow last became idle
    pub idle_since: Option<Instant>,
}

impl FlowState {
    pub fn is_idle(&self) -> bool {
        self.waiting == 0 && self.executing == 0
    }

    pub fn mark_idle_if_done(&mut self, now: Instant) {
        if self.is_idle() && self.idle_since.is_none() {
            self.idle_since = Some(now);
        }
    }
}

/// Flows observed by one queue set, reclaimed after a retention window of idleness
#[derive(Debug)]
pub(crate) struct FlowTable {
    flows: HashMap<FlowKey, FlowState>,
    retention: Duration,
    last_sweep: Option<Instant>,
}

impl FlowTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            flows: HashMap::new(),
            retention,
            last_sweep: None,
        }
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    /// Fetch or create the state for a flow; the flow is busy from here on
    pub fn activate(&mut self, key: &FlowKey) -> &mut FlowState {
        let state = self.flows.entry(key.clone()).or_default();
        state.idle_since = None;
        state
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState> {
        self.flows.get_mut(key)
    }

    #[cfg(test)]
    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FlowState> {
        self.flows.values_mut()
    }

    /// Sweep if a full retention window has passed since the last sweep
    pub fn maybe_sweep(&mut self, now: Instant) -> usize {
        let due = match self.last_sweep {
            Some(last) => now.saturating_duration_since(last) >= self.retention,
            None => true,
        };
        if due { self.sweep(now) } else { 0 }
    }

    /// Drop every flow idle for at least the retention window
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.last_sweep = Some(now);
        let retention = self.retention;
        let before = self.flows.len();
        self.flows.retain(|_, state| match state.idle_since {
            Some(since) if state.is_idle() => now.saturating_duration_since(since) < retention,
            _ => true,
        });
        let removed = before - self.flows.len();
        if removed > 0 {
            debug!(removed, remaining = self.flows.len(), "FlowTable::sweep: reclaimed idle flows");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_key_display_and_hash() {
        let by_user = FlowKey::new("e2e-testing-flowschema", "noxu");
        let shared = FlowKey::new("e2e-testing-flowschema", "");
        assert_eq!(by_user.to_string(), "e2e-testing-flowschema/noxu");
        assert_eq!(shared.to_string(), "e2e-testing-flowschema");
        assert_eq!(by_user.hash_value(), FlowKey::new("e2e-testing-flowschema", "noxu").hash_value());
        assert_ne!(by_user.hash_value(), shared.hash_value());
        // The separator keeps ("ab", "c") and ("a", "bc") apart
        assert_ne!(FlowKey::new("ab", "c").hash_value(), FlowKey::new("a", "bc").hash_value());
    }

    #[test]
    fn test_sweep_only_reclaims_idle_flows_past_retention() {
        let start = Instant::now();
        let mut table = FlowTable::new(Duration::from_secs(60));
        let idle = FlowKey::new("schema", "idle");
        let busy = FlowKey::new("schema", "busy");

        table.activate(&idle).mark_idle_if_done(start);
        table.activate(&busy).executing = 1;

        assert_eq!(table.sweep(start + Duration::from_secs(30)), 0);
        assert_eq!(table.sweep(start + Duration::from_secs(61)), 1);
        assert!(table.get(&idle).is_none());
        assert!(table.get(&busy).is_some());
    }

    #[test]
    fn test_reactivation_clears_idle_mark() {
        let start = Instant::now();
        let mut table = FlowTable::new(Duration::from_secs(10));
        let key = FlowKey::new("schema", "");
        table.activate(&key).mark_idle_if_done(start);
        table.activate(&key).waiting = 1;
        assert_eq!(table.sweep(start + Duration::from_secs(20)), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_maybe_sweep_waits_for_window() {
        let start = Instant::now();
        let mut table = FlowTable::new(Duration::from_secs(10));
        let key = FlowKey::new("schema", "x");
        table.maybe_sweep(start);
        table.activate(&key).mark_idle_if_done(start);
        assert_eq!(table.maybe_sweep(start + Duration::from_secs(5)), 0);
        assert_eq!(table.maybe_sweep(start + Duration::from_secs(11)), 1);
    }
}
