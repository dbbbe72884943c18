//! Operator-visible event channel
//!
//! Configuration and invariant problems are reported here rather than
//! returned to the request that happened to trip over them, so unrelated
//! priority levels keep admitting while an operator is told.
//!
//! ```rust,ignore
//! let bus = create_event_bus();
//! let mut rx = bus.subscribe();
//! while let Ok(record) = rx.recv().await {
//!     println!("{}: {:?}", record.timestamp, record.event);
//! }
//! ```

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use types::{EventRecord, FlowControlEvent};
