//! Event types for flow control activity
//!
//! These are the conditions an operator needs to see without reading logs:
//! - Configuration lifecycle (applied, rejected objects)
//! - Classification gaps
//! - Accounting invariant violations
//! - Priority level teardown

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator-visible flow control events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowControlEvent {
    /// A configuration snapshot was published
    ConfigApplied {
        version: u64,
        priority_levels: usize,
        flow_schemas: usize,
        /// Objects skipped because they failed validation
        rejected_objects: usize,
    },
    /// An object failed validation and was skipped
    ConfigurationError { object: String, message: String },
    /// No flow schema matched and there is no catch-all
    NoMatchingFlowSchema { user: String, path: String },
    /// A seat was released twice
    DoubleRelease { priority_level: String, request_id: u64 },
    /// A removed level still has requests and keeps serving them
    PriorityLevelDraining {
        priority_level: String,
        executing: usize,
        waiting: usize,
    },
    /// A removed level finished its last request and was torn down
    PriorityLevelDrained { priority_level: String },
}

impl FlowControlEvent {
    /// The priority level this event concerns, if any
    pub fn priority_level(&self) -> Option<&str> {
        match self {
            FlowControlEvent::DoubleRelease { priority_level, .. }
            | FlowControlEvent::PriorityLevelDraining { priority_level, .. }
            | FlowControlEvent::PriorityLevelDrained { priority_level } => Some(priority_level),
            FlowControlEvent::ConfigApplied { .. }
            | FlowControlEvent::ConfigurationError { .. }
            | FlowControlEvent::NoMatchingFlowSchema { .. } => None,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            FlowControlEvent::ConfigApplied { .. } => "ConfigApplied",
            FlowControlEvent::ConfigurationError { .. } => "ConfigurationError",
            FlowControlEvent::NoMatchingFlowSchema { .. } => "NoMatchingFlowSchema",
            FlowControlEvent::DoubleRelease { .. } => "DoubleRelease",
            FlowControlEvent::PriorityLevelDraining { .. } => "PriorityLevelDraining",
            FlowControlEvent::PriorityLevelDrained { .. } => "PriorityLevelDrained",
        }
    }

    /// Whether the event reports something an operator must fix
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            FlowControlEvent::ConfigurationError { .. }
                | FlowControlEvent::NoMatchingFlowSchema { .. }
                | FlowControlEvent::DoubleRelease { .. }
        )
    }
}

/// A timestamped event as delivered to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: FlowControlEvent,
}

impl EventRecord {
    pub fn new(event: FlowControlEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_priority_level() {
        let event = FlowControlEvent::PriorityLevelDrained {
            priority_level: "workload-low".to_string(),
        };
        assert_eq!(event.priority_level(), Some("workload-low"));
        assert_eq!(event.event_type(), "PriorityLevelDrained");

        let event = FlowControlEvent::NoMatchingFlowSchema {
            user: "alice".to_string(),
            path: "/healthz".to_string(),
        };
        assert_eq!(event.priority_level(), None);
        assert!(event.is_problem());
    }

    #[test]
    fn test_event_serialization() {
        let event = FlowControlEvent::DoubleRelease {
            priority_level: "global-default".to_string(),
            request_id: 7,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"DoubleRelease\""));

        let parsed: FlowControlEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_record() {
        let record = EventRecord::new(FlowControlEvent::ConfigApplied {
            version: 3,
            priority_levels: 4,
            flow_schemas: 6,
            rejected_objects: 0,
        });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("ConfigApplied"));
    }
}
