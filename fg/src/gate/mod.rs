//! Admission Gate
//!
//! The entry point for callers: classify a request, look up its priority
//! level, then admit it, queue it until a seat frees, or reject it. Every
//! admitted request holds a [`SeatHandle`] that gives the seat back exactly
//! once.

mod core;
mod feed;
mod handle;
mod result;

pub use core::{AdmissionGate, ApplyReport, RejectedObject};
pub use feed::ConfigFeed;
pub use handle::SeatHandle;
pub use result::{AdmissionResult, Decision, HEADER_FLOW_SCHEMA_UID, HEADER_PRIORITY_LEVEL_UID};
