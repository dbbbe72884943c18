//! Prometheus metrics for priority levels

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::error::FlowControlResult;
use crate::fairqueue::RejectReason;

const NAMESPACE: &str = "apiserver";
const SUBSYSTEM: &str = "flowcontrol";

pub const LABEL_PRIORITY_LEVEL: &str = "priority_level";
pub const LABEL_FLOW_SCHEMA: &str = "flow_schema";
pub const LABEL_REASON: &str = "reason";
pub const LABEL_KIND: &str = "kind";

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

/// Flow control metrics, registered in their own registry
#[derive(Clone)]
pub struct FlowControlMetrics {
    registry: Registry,
    concurrency_limit: IntGaugeVec,
    executing: IntGaugeVec,
    in_queue: IntGaugeVec,
    dispatched: IntCounterVec,
    rejected: IntCounterVec,
    invariant_violations: IntCounterVec,
}

impl std::fmt::Debug for FlowControlMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControlMetrics").finish_non_exhaustive()
    }
}

impl FlowControlMetrics {
    pub fn new() -> FlowControlResult<Self> {
        debug!("FlowControlMetrics::new: called");
        let registry = Registry::new();

        let concurrency_limit = IntGaugeVec::new(
            opts("request_concurrency_limit", "Seats available to each priority level"),
            &[LABEL_PRIORITY_LEVEL],
        )?;
        let executing = IntGaugeVec::new(
            opts("current_executing_requests", "Requests currently holding a seat"),
            &[LABEL_PRIORITY_LEVEL],
        )?;
        let in_queue = IntGaugeVec::new(
            opts("current_inqueue_requests", "Requests currently waiting in a queue"),
            &[LABEL_PRIORITY_LEVEL],
        )?;
        let dispatched = IntCounterVec::new(
            opts("dispatched_requests_total", "Requests given a seat"),
            &[LABEL_PRIORITY_LEVEL, LABEL_FLOW_SCHEMA],
        )?;
        let rejected = IntCounterVec::new(
            opts("rejected_requests_total", "Requests turned away without a seat"),
            &[LABEL_PRIORITY_LEVEL, LABEL_FLOW_SCHEMA, LABEL_REASON],
        )?;
        let invariant_violations = IntCounterVec::new(
            opts("invariant_violations_total", "Seat accounting violations detected"),
            &[LABEL_PRIORITY_LEVEL, LABEL_KIND],
        )?;

        registry.register(Box::new(concurrency_limit.clone()))?;
        registry.register(Box::new(executing.clone()))?;
        registry.register(Box::new(in_queue.clone()))?;
        registry.register(Box::new(dispatched.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(invariant_violations.clone()))?;

        Ok(Self {
            registry,
            concurrency_limit,
            executing,
            in_queue,
            dispatched,
            rejected,
            invariant_violations,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_concurrency_limit(&self, priority_level: &str, limit: u32) {
        self.concurrency_limit
            .with_label_values(&[priority_level])
            .set(i64::from(limit));
    }

    /// Record the executing and waiting counts of a level
    pub fn observe_occupancy(&self, priority_level: &str, executing: usize, waiting: usize) {
        self.executing
            .with_label_values(&[priority_level])
            .set(executing as i64);
        self.in_queue.with_label_values(&[priority_level]).set(waiting as i64);
    }

    pub fn dispatched(&self, priority_level: &str, flow_schema: &str) {
        self.dispatched
            .with_label_values(&[priority_level, flow_schema])
            .inc();
    }

    pub fn rejected(&self, priority_level: &str, flow_schema: &str, reason: RejectReason) {
        self.rejected
            .with_label_values(&[priority_level, flow_schema, reason.as_str()])
            .inc();
    }

    pub fn invariant_violation(&self, priority_level: &str, kind: &str) {
        self.invariant_violations
            .with_label_values(&[priority_level, kind])
            .inc();
    }

    /// Drop the gauge series of a level that no longer exists
    pub fn forget_priority_level(&self, priority_level: &str) {
        debug!(%priority_level, "FlowControlMetrics::forget_priority_level: called");
        // Absent series are fine
        let _ = self.concurrency_limit.remove_label_values(&[priority_level]);
        let _ = self.executing.remove_label_values(&[priority_level]);
        let _ = self.in_queue.remove_label_values(&[priority_level]);
    }

    /// Current value of the concurrency limit gauge, if the level has one
    pub fn concurrency_limit(&self, priority_level: &str) -> Option<i64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == format!("{}_{}_request_concurrency_limit", NAMESPACE, SUBSYSTEM))
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == LABEL_PRIORITY_LEVEL && label.get_value() == priority_level)
            })
            .map(|metric| metric.get_gauge().get_value() as i64)
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> FlowControlResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_limit_gauge() {
        let metrics = FlowControlMetrics::new().unwrap();
        metrics.set_concurrency_limit("workload-low", 98);
        assert_eq!(metrics.concurrency_limit("workload-low"), Some(98));
        assert_eq!(metrics.concurrency_limit("missing"), None);

        let text = metrics.render().unwrap();
        assert!(text.contains("apiserver_flowcontrol_request_concurrency_limit{priority_level=\"workload-low\"} 98"));
    }

    #[test]
    fn test_rejections_labelled_by_reason() {
        let metrics = FlowControlMetrics::new().unwrap();
        metrics.rejected("catch-all", "catch-all", RejectReason::ConcurrencyLimit);
        metrics.rejected("catch-all", "catch-all", RejectReason::ConcurrencyLimit);
        metrics.dispatched("global-default", "service-accounts");

        let text = metrics.render().unwrap();
        assert!(text.contains("reason=\"concurrency-limit\"} 2"));
        assert!(text.contains("apiserver_flowcontrol_dispatched_requests_total"));
    }

    #[test]
    fn test_forget_priority_level() {
        let metrics = FlowControlMetrics::new().unwrap();
        metrics.set_concurrency_limit("doomed", 5);
        metrics.observe_occupancy("doomed", 1, 2);
        metrics.forget_priority_level("doomed");
        metrics.forget_priority_level("never-seen");

        assert_eq!(metrics.concurrency_limit("doomed"), None);
        assert!(!metrics.render().unwrap().contains("doomed"));
    }
}
