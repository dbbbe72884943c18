//! Outcome of an admission attempt

use std::time::Duration;

use super::handle::SeatHandle;
use crate::domain::ObjectRef;
use crate::error::{FlowControlError, FlowControlResult};
use crate::fairqueue::{FlowKey, RejectReason};

/// Response header carrying the matched flow schema's UID
pub const HEADER_FLOW_SCHEMA_UID: &str = "X-Kubernetes-PF-FlowSchema-UID";

/// Response header carrying the matched priority level's UID
pub const HEADER_PRIORITY_LEVEL_UID: &str = "X-Kubernetes-PF-PriorityLevel-UID";

#[derive(Debug)]
pub enum Decision {
    Admitted(SeatHandle),
    Rejected(RejectReason),
}

/// The decision plus the policy that produced it
#[derive(Debug)]
pub struct AdmissionResult {
    pub decision: Decision,
    pub flow_schema: ObjectRef,
    pub priority_level: ObjectRef,
    pub flow: FlowKey,
    /// Time spent queued; zero when admitted or rejected on arrival
    pub waited: Duration,
}

impl AdmissionResult {
    pub fn admitted(&self) -> bool {
        matches!(self.decision, Decision::Admitted(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self.decision {
            Decision::Rejected(reason) => Some(reason),
            Decision::Admitted(_) => None,
        }
    }

    /// Take the seat, if one was granted
    pub fn into_seat(self) -> Option<SeatHandle> {
        match self.decision {
            Decision::Admitted(seat) => Some(seat),
            Decision::Rejected(_) => None,
        }
    }

    /// The seat, or the rejection as an error for callers that propagate with `?`
    pub fn into_seat_or_err(self) -> FlowControlResult<SeatHandle> {
        match self.decision {
            Decision::Admitted(seat) => Ok(seat),
            Decision::Rejected(RejectReason::QueueFull) => Err(FlowControlError::QueueFull {
                priority_level: self.priority_level.name,
            }),
            Decision::Rejected(RejectReason::Cancelled | RejectReason::TimedOut) => Err(FlowControlError::Cancelled),
            Decision::Rejected(reason) => Err(FlowControlError::Rejected {
                priority_level: self.priority_level.name,
                reason,
            }),
        }
    }

    /// Headers identifying the governing policy, for the outward response
    pub fn response_headers(&self) -> [(&'static str, String); 2] {
        [
            (HEADER_FLOW_SCHEMA_UID, self.flow_schema.uid.to_string()),
            (HEADER_PRIORITY_LEVEL_UID, self.priority_level.uid.to_string()),
        ]
    }
}
