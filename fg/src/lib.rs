//! Fairgate - Priority and Fairness Admission Control
//!
//! Fairgate decides, for every incoming request, whether it runs now, waits,
//! or is rejected, so that one noisy client cannot starve the rest of a
//! shared server.
//!
//! # Core Concepts
//!
//! - **Flow schemas** classify requests by user, group, verb and resource
//!   into a priority level and a flow
//! - **Priority levels** split the server's concurrency limit by shares;
//!   exempt levels bypass limits entirely
//! - **Fair queuing** deals each flow a shuffle-sharded hand of queues and
//!   serves waiters in virtual finish-time order
//! - **Seat handles** give a seat back when released or dropped
//!
//! # Modules
//!
//! - [`domain`] - Configuration objects and request descriptors
//! - [`classifier`] - Flow schema matching over immutable snapshots
//! - [`registry`] - Priority levels and their concurrency limits
//! - [`fairqueue`] - Shuffle-sharded fair queuing
//! - [`gate`] - The admission API
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod classifier;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod fairqueue;
pub mod gate;
pub mod loadgen;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use classifier::{Classification, Classifier, ClassifierSnapshot};
pub use config::{ClientSpec, Config, SimulationConfig};
pub use domain::{
    DistinguisherMethod, FlowControlConfig, FlowSchema, ObjectRef, PolicyRulesWithSubjects, PriorityLevel,
    QueuingConfig, RequestDigest, RequestInfo, Subject, UserInfo,
};
pub use error::{FlowControlError, FlowControlResult};
pub use events::{EventBus, EventRecord, FlowControlEvent, create_event_bus};
pub use fairqueue::{FlowKey, RejectReason};
pub use gate::{AdmissionGate, AdmissionResult, ApplyReport, ConfigFeed, Decision, SeatHandle};
pub use loadgen::{ClientReport, SimulationReport};
pub use metrics::FlowControlMetrics;
pub use registry::{LevelStats, PriorityRegistry, RegistrySnapshot};
