//! Seat ownership

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::FlowControlResult;
use crate::fairqueue::{FlowKey, RequestId};
use crate::registry::LevelState;

/// One occupied seat
///
/// Released exactly once: either explicitly with [`SeatHandle::release`] or,
/// on every other path, when the handle is dropped.
#[derive(Debug)]
pub struct SeatHandle {
    state: Arc<LevelState>,
    id: RequestId,
    flow: FlowKey,
    released: bool,
}

impl SeatHandle {
    pub(crate) fn new(state: Arc<LevelState>, id: RequestId, flow: FlowKey) -> Self {
        Self {
            state,
            id,
            flow,
            released: false,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.id
    }

    pub fn priority_level(&self) -> &str {
        self.state.name()
    }

    pub fn flow(&self) -> &FlowKey {
        &self.flow
    }

    /// Give the seat back
    pub fn release(mut self) -> FlowControlResult<()> {
        debug!(priority_level = %self.state.name(), id = self.id, "SeatHandle::release: called");
        self.released = true;
        self.state.finish(self.id, Instant::now())
    }
}

impl Drop for SeatHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!(priority_level = %self.state.name(), id = self.id, "SeatHandle::drop: releasing unreleased seat");
        if let Err(e) = self.state.finish(self.id, Instant::now()) {
            warn!(error = %e, "SeatHandle::drop: release failed");
        }
    }
}
