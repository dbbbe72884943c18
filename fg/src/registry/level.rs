//! Runtime seat state of one priority level

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::PriorityLevel;
use crate::error::{FlowControlError, FlowControlResult};
use crate::events::{EventBus, FlowControlEvent};
use crate::fairqueue::{Arrival, FlowKey, QueueSet, QueueSetConfig, RejectReason, RequestId};
use crate::metrics::FlowControlMetrics;

/// Signals a queued request that it holds a seat
pub type Wakeup = oneshot::Sender<()>;

/// Seat tracking for exempt levels: counted, never limited
#[derive(Debug, Default)]
struct ExemptSeats {
    executing: HashSet<RequestId>,
    next_id: RequestId,
    dispatched: u64,
    double_releases: u64,
}

impl ExemptSeats {
    fn admit(&mut self) -> RequestId {
        self.next_id += 1;
        self.executing.insert(self.next_id);
        self.dispatched += 1;
        self.next_id
    }
}

#[derive(Debug)]
enum Seats {
    Exempt(ExemptSeats),
    Limited(QueueSet<Wakeup>),
}

impl Seats {
    fn executing(&self) -> usize {
        match self {
            Seats::Exempt(exempt) => exempt.executing.len(),
            Seats::Limited(set) => set.executing(),
        }
    }

    fn waiting(&self) -> usize {
        match self {
            Seats::Exempt(_) => 0,
            Seats::Limited(set) => set.waiting(),
        }
    }

    fn is_idle(&self) -> bool {
        self.executing() == 0 && self.waiting() == 0
    }
}

/// Point-in-time view of a level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub name: String,
    pub uid: Uuid,
    pub exempt: bool,
    /// `None` for exempt levels
    pub concurrency_limit: Option<u32>,
    pub executing: usize,
    pub waiting: usize,
    pub queues: usize,
    pub flows: usize,
    pub dispatched: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub double_releases: u64,
    /// Removed from configuration, still serving what it holds
    pub removed: bool,
}

fn queue_set_config(level: &PriorityLevel, limit: Option<u32>, retention: Duration) -> QueueSetConfig {
    QueueSetConfig {
        concurrency_limit: limit.unwrap_or(1).max(1),
        queuing: level.queuing_config().copied(),
        flow_retention: retention,
    }
}

/// Seats, queues and flows of one level behind a single lock
///
/// No method holds the lock across an await; queued callers are woken
/// through their [`Wakeup`] once the lock has assigned them a seat.
#[derive(Debug)]
pub struct LevelState {
    name: String,
    uid: Uuid,
    seats: Mutex<Seats>,
    removed: AtomicBool,
    drained: AtomicBool,
    /// Owns the gauge series for `name`; cleared once a newer level takes the name
    publishes: AtomicBool,
    metrics: FlowControlMetrics,
    events: Arc<EventBus>,
}

impl LevelState {
    pub(crate) fn new(
        level: &PriorityLevel,
        uid: Uuid,
        limit: Option<u32>,
        retention: Duration,
        metrics: FlowControlMetrics,
        events: Arc<EventBus>,
    ) -> FlowControlResult<Self> {
        debug!(name = %level.name, ?limit, "LevelState::new: called");
        let seats = if level.is_exempt() {
            Seats::Exempt(ExemptSeats::default())
        } else {
            Seats::Limited(QueueSet::new(level.name.clone(), &queue_set_config(level, limit, retention))?)
        };
        Ok(Self {
            name: level.name.clone(),
            uid,
            seats: Mutex::new(seats),
            removed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            publishes: AtomicBool::new(true),
            metrics,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn is_exempt(&self) -> bool {
        matches!(*self.seats.lock(), Seats::Exempt(_))
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    pub fn executing(&self) -> usize {
        self.seats.lock().executing()
    }

    pub fn waiting(&self) -> usize {
        self.seats.lock().waiting()
    }

    /// Take a seat, queue, or reject
    pub(crate) fn arrive(&self, flow: &FlowKey, wakeup: Wakeup, now: Instant) -> Arrival {
        let mut seats = self.seats.lock();
        // Checked under the lock so a level cannot drain between check and admit
        if self.is_removed() {
            drop(seats);
            debug!(name = %self.name, %flow, "LevelState::arrive: level removed, rejecting");
            self.metrics
                .rejected(&self.name, &flow.flow_schema, RejectReason::PriorityLevelRemoved);
            return Arrival::Rejected {
                reason: RejectReason::PriorityLevelRemoved,
            };
        }

        let arrival = match &mut *seats {
            Seats::Exempt(exempt) => Arrival::Immediate { id: exempt.admit() },
            Seats::Limited(set) => {
                let arrival = set.arrive(flow, wakeup, now);
                self.pump(set, now);
                arrival
            }
        };
        match arrival {
            Arrival::Immediate { .. } => self.metrics.dispatched(&self.name, &flow.flow_schema),
            Arrival::Rejected { reason } => self.metrics.rejected(&self.name, &flow.flow_schema, reason),
            Arrival::Queued { .. } => {}
        }
        self.observe(&seats);
        arrival
    }

    /// Dispatch until no seat is free or nobody waits
    ///
    /// A waiter whose caller has gone away gives its seat straight back.
    fn pump(&self, set: &mut QueueSet<Wakeup>, now: Instant) {
        loop {
            let batch = set.dispatch(now);
            if batch.is_empty() {
                break;
            }
            for dispatched in batch {
                if dispatched.payload.send(()).is_err() {
                    debug!(name = %self.name, id = dispatched.id, "LevelState::pump: waiter gone, returning seat");
                    let _ = set.finish(dispatched.id, now);
                } else {
                    self.metrics.dispatched(&self.name, &dispatched.flow.flow_schema);
                }
            }
        }
    }

    /// Make sure `id` holds no seat and waits nowhere
    ///
    /// Returns true when the request was still queued. A request that was
    /// handed a seat in the meantime gives it back.
    pub(crate) fn cancel(&self, id: RequestId, now: Instant) -> bool {
        let mut seats = self.seats.lock();
        let Seats::Limited(set) = &mut *seats else {
            return false;
        };
        let withdrawn = if set.cancel(id, now).is_some() {
            debug!(name = %self.name, id, "LevelState::cancel: withdrawn from queue");
            true
        } else {
            if set.is_executing(id) {
                debug!(name = %self.name, id, "LevelState::cancel: seat granted concurrently, releasing");
                let _ = set.finish(id, now);
                self.pump(set, now);
            }
            false
        };
        self.observe(&seats);
        let idle = seats.is_idle();
        drop(seats);
        self.check_drained(idle);
        withdrawn
    }

    /// Release the seat held by `id`
    pub(crate) fn finish(&self, id: RequestId, now: Instant) -> FlowControlResult<()> {
        let mut seats = self.seats.lock();
        let result = match &mut *seats {
            Seats::Exempt(exempt) => {
                if exempt.executing.remove(&id) {
                    Ok(())
                } else {
                    exempt.double_releases += 1;
                    Err(FlowControlError::DoubleRelease {
                        priority_level: self.name.clone(),
                        request_id: id,
                    })
                }
            }
            Seats::Limited(set) => {
                let result = set.finish(id, now);
                self.pump(set, now);
                result
            }
        };
        self.observe(&seats);
        let idle = seats.is_idle();
        drop(seats);

        if let Err(e) = &result {
            error!(name = %self.name, id, error = %e, "Seat released twice");
            self.metrics.invariant_violation(&self.name, "double-release");
            self.events.emit(FlowControlEvent::DoubleRelease {
                priority_level: self.name.clone(),
                request_id: id,
            });
        }
        self.check_drained(idle);
        result
    }

    /// Apply a new limit and queue shape
    pub(crate) fn reconfigure(&self, level: &PriorityLevel, limit: Option<u32>, retention: Duration) -> FlowControlResult<()> {
        debug!(name = %self.name, ?limit, "LevelState::reconfigure: called");
        let mut seats = self.seats.lock();
        if let Seats::Limited(set) = &mut *seats {
            set.set_config(&queue_set_config(level, limit, retention))?;
            self.pump(set, Instant::now());
        }
        self.observe(&seats);
        Ok(())
    }

    /// Take the level out of service; returns true if it was already idle
    pub(crate) fn mark_removed(&self) -> bool {
        let seats = self.seats.lock();
        self.removed.store(true, Ordering::Release);
        let (executing, waiting) = (seats.executing(), seats.waiting());
        drop(seats);

        if executing == 0 && waiting == 0 {
            self.check_drained(true);
            return true;
        }
        info!(name = %self.name, executing, waiting, "Priority level removed, draining");
        self.events.emit(FlowControlEvent::PriorityLevelDraining {
            priority_level: self.name.clone(),
            executing,
            waiting,
        });
        false
    }

    /// Hand the gauge series for this name over to a newer level
    pub(crate) fn disown_metrics(&self) {
        if self.publishes.swap(false, Ordering::AcqRel) {
            debug!(name = %self.name, "LevelState::disown_metrics: superseded");
        }
    }

    /// Write the current occupancy gauges
    pub(crate) fn publish_metrics(&self) {
        let seats = self.seats.lock();
        self.observe(&seats);
    }

    fn publishes_metrics(&self) -> bool {
        self.publishes.load(Ordering::Acquire)
    }

    fn observe(&self, seats: &Seats) {
        if !self.is_drained() && self.publishes_metrics() {
            self.metrics
                .observe_occupancy(&self.name, seats.executing(), seats.waiting());
        }
    }

    fn check_drained(&self, idle: bool) {
        if idle && self.is_removed() && !self.drained.swap(true, Ordering::AcqRel) {
            info!(name = %self.name, "Priority level drained");
            if self.publishes_metrics() {
                self.metrics.forget_priority_level(&self.name);
            }
            self.events.emit(FlowControlEvent::PriorityLevelDrained {
                priority_level: self.name.clone(),
            });
        }
    }

    pub fn stats(&self) -> LevelStats {
        let seats = self.seats.lock();
        let (exempt, concurrency_limit, queues, flows, dispatched, rejected, cancelled, double_releases) = match &*seats {
            Seats::Exempt(exempt) => (true, None, 0, 0, exempt.dispatched, 0, 0, exempt.double_releases),
            Seats::Limited(set) => {
                let stats = set.stats();
                (
                    false,
                    Some(stats.concurrency_limit),
                    stats.queues,
                    stats.flows,
                    stats.admitted_immediately + stats.dispatched,
                    stats.rejected,
                    stats.cancelled,
                    stats.double_releases,
                )
            }
        };
        LevelStats {
            name: self.name.clone(),
            uid: self.uid,
            exempt,
            concurrency_limit,
            executing: seats.executing(),
            waiting: seats.waiting(),
            queues,
            flows,
            dispatched,
            rejected,
            cancelled,
            double_releases,
            removed: self.is_removed(),
        }
    }
}
