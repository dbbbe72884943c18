//! Fair queuing with shuffle sharding
//!
//! Each limited priority level owns one [`QueueSet`]. Requests are grouped
//! into flows; a flow is dealt a small hand of queues and joins the least
//! loaded one, and waiters are released in virtual finish-tag order so that
//! flows share a level's seats evenly.

mod dealer;
mod flows;
mod queue;
mod queueset;

use serde::{Deserialize, Serialize};

pub use dealer::{Dealer, FlowHasher, MAX_HASH_BITS, required_entropy_bits};
pub use flows::FlowKey;
pub use queueset::{
    Arrival, Dispatched, QueueSet, QueueSetConfig, QueueSetStats, REANCHOR_THRESHOLD, VIRTUAL_UNIT,
};

/// Identifies one request within a queue set
pub type RequestId = u64;

/// Why a request was not given a seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Every queue in the flow's hand was at its length limit
    QueueFull,
    /// No free seat and the level does not queue
    ConcurrencyLimit,
    /// The caller gave up while waiting
    Cancelled,
    /// The wait deadline passed
    TimedOut,
    /// The level was removed from configuration while the request waited
    PriorityLevelRemoved,
}

impl RejectReason {
    /// Label value used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue-full",
            Self::ConcurrencyLimit => "concurrency-limit",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "time-out",
            Self::PriorityLevelRemoved => "priority-level-removed",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_labels() {
        assert_eq!(RejectReason::QueueFull.to_string(), "queue-full");
        assert_eq!(RejectReason::TimedOut.as_str(), "time-out");
        let json = serde_json::to_string(&RejectReason::ConcurrencyLimit).unwrap();
        assert_eq!(json, "\"concurrency-limit\"");
    }
}
