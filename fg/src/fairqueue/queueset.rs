//! Per-priority-level queue set
//!
//! Start-time fair queuing over a fixed arena of shuffle-sharded queues:
//!
//! - A request that finds a free seat and nobody waiting is admitted at once
//!   and charged nothing.
//! - Otherwise it joins the least backlogged non-full queue of its flow's
//!   hand, tagged `start = max(V, flow.last_finish)`,
//!   `finish = start + VIRTUAL_UNIT / limit`.
//! - Whenever a seat is free, the waiter with the globally smallest finish
//!   tag is dispatched and `V` advances to its start tag.
//!
//! A flow that keeps many requests waiting pushes its own tags ahead of `V`,
//! so a lighter flow arriving later is served first.
//!
//! The structure is not synchronised; the gate wraps one per level in a lock.
//! Time is passed in so tests control it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::dealer::Dealer;
use super::flows::{FlowKey, FlowTable};
use super::queue::{Queue, WaitKey, Waiter};
use super::{RejectReason, RequestId};
use crate::domain::QueuingConfig;
use crate::error::{FlowControlError, FlowControlResult};

/// Virtual work of one seat-holding request at concurrency limit 1
pub const VIRTUAL_UNIT: u64 = 1 << 20;

/// Global virtual time past which all tags are shifted back toward zero
pub const REANCHOR_THRESHOLD: u64 = 1 << 48;

/// Shape of a queue set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSetConfig {
    pub concurrency_limit: u32,
    /// `None` rejects instead of queuing
    pub queuing: Option<QueuingConfig>,
    pub flow_retention: Duration,
}

/// What happened to an arriving request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Took a free seat without waiting
    Immediate { id: RequestId },
    /// Waiting in `queue`
    Queued { id: RequestId, queue: usize },
    Rejected { reason: RejectReason },
}

/// A waiter that has just been given a seat
#[derive(Debug)]
pub struct Dispatched<T> {
    pub id: RequestId,
    pub flow: FlowKey,
    pub queue: usize,
    pub waited: Duration,
    pub payload: T,
}

#[derive(Debug)]
struct Executing {
    flow: FlowKey,
    /// `None` for requests admitted on the fast path
    queue: Option<usize>,
}

/// Counters and gauges of a queue set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSetStats {
    pub concurrency_limit: u32,
    pub executing: usize,
    pub waiting: usize,
    pub queues: usize,
    pub flows: usize,
    pub virtual_time: u64,
    pub admitted_immediately: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub double_releases: u64,
}

/// Fair queuing state of one priority level
#[derive(Debug)]
pub struct QueueSet<T> {
    name: String,
    concurrency_limit: u32,
    dealer: Option<Dealer>,
    queue_length_limit: usize,
    /// Queues beyond `desired_queues` are retired once idle
    desired_queues: usize,
    queues: Vec<Queue<T>>,
    flows: FlowTable,
    waiting: HashMap<RequestId, (usize, WaitKey)>,
    executing: HashMap<RequestId, Executing>,
    virtual_time: u64,
    reanchor_threshold: u64,
    next_id: RequestId,
    stats: QueueSetStats,
}

impl<T> QueueSet<T> {
    pub fn new(name: impl Into<String>, config: &QueueSetConfig) -> FlowControlResult<Self> {
        let name = name.into();
        debug!(%name, ?config, "QueueSet::new: called");
        let mut set = Self {
            name,
            concurrency_limit: 1,
            dealer: None,
            queue_length_limit: 0,
            desired_queues: 0,
            queues: Vec::new(),
            flows: FlowTable::new(config.flow_retention),
            waiting: HashMap::new(),
            executing: HashMap::new(),
            virtual_time: 0,
            reanchor_threshold: REANCHOR_THRESHOLD,
            next_id: 1,
            stats: QueueSetStats::default(),
        };
        set.set_config(config)?;
        Ok(set)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a new limit and queue shape; existing waiters keep their place
    pub fn set_config(&mut self, config: &QueueSetConfig) -> FlowControlResult<()> {
        debug!(name = %self.name, ?config, "QueueSet::set_config: called");
        let object = format!("priority level {:?}", self.name);
        if config.concurrency_limit == 0 {
            return Err(FlowControlError::configuration(object, "concurrency limit must be at least 1"));
        }
        let dealer = match &config.queuing {
            Some(queuing) => {
                if queuing.queue_length_limit == 0 {
                    return Err(FlowControlError::configuration(object, "queue length limit must be positive"));
                }
                Some(
                    Dealer::new(queuing.queues, queuing.hand_size)
                        .map_err(|message| FlowControlError::configuration(object.clone(), message))?,
                )
            }
            None => None,
        };

        self.concurrency_limit = config.concurrency_limit;
        self.dealer = dealer;
        self.queue_length_limit = config.queuing.map_or(0, |q| q.queue_length_limit as usize);
        self.desired_queues = config.queuing.map_or(0, |q| q.queues as usize);
        while self.queues.len() < self.desired_queues {
            self.queues.push(Queue::new());
        }
        self.flows.set_retention(config.flow_retention);
        self.retire_queues();
        Ok(())
    }

    pub fn concurrency_limit(&self) -> u32 {
        self.concurrency_limit
    }

    /// Seats currently held
    pub fn executing(&self) -> usize {
        self.executing.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_idle(&self) -> bool {
        self.executing.is_empty() && self.waiting.is_empty()
    }

    pub fn virtual_time(&self) -> u64 {
        self.virtual_time
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn queue_lengths(&self) -> Vec<usize> {
        self.queues.iter().map(Queue::len).collect()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// The hand a flow is dealt, if this set queues
    pub fn hand_for(&self, flow: &FlowKey) -> Option<Vec<usize>> {
        self.dealer.map(|dealer| dealer.deal(flow.hash_value()))
    }

    pub fn stats(&self) -> QueueSetStats {
        QueueSetStats {
            concurrency_limit: self.concurrency_limit,
            executing: self.executing.len(),
            waiting: self.waiting.len(),
            queues: self.queues.len(),
            flows: self.flows.len(),
            virtual_time: self.virtual_time,
            ..self.stats.clone()
        }
    }

    /// Virtual work charged to one queued request
    fn charge(&self) -> u64 {
        (VIRTUAL_UNIT / u64::from(self.concurrency_limit)).max(1)
    }

    fn seat_free(&self) -> bool {
        self.executing.len() < self.concurrency_limit as usize
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Admit, queue, or reject an arriving request
    ///
    /// A queued request may become dispatchable immediately; call
    /// [`QueueSet::dispatch`] afterwards.
    pub fn arrive(&mut self, flow: &FlowKey, payload: T, now: Instant) -> Arrival {
        self.flows.maybe_sweep(now);

        if self.seat_free() && self.waiting.is_empty() {
            let id = self.allocate_id();
            self.flows.activate(flow).executing += 1;
            self.executing.insert(
                id,
                Executing {
                    flow: flow.clone(),
                    queue: None,
                },
            );
            self.stats.admitted_immediately += 1;
            debug!(name = %self.name, %flow, id, "QueueSet::arrive: seat free, admitted immediately");
            return Arrival::Immediate { id };
        }

        let Some(dealer) = self.dealer else {
            self.stats.rejected += 1;
            debug!(name = %self.name, %flow, "QueueSet::arrive: no seat and no queues, rejecting");
            return Arrival::Rejected {
                reason: RejectReason::ConcurrencyLimit,
            };
        };

        let limit = self.queue_length_limit;
        let chosen = dealer
            .deal(flow.hash_value())
            .into_iter()
            .filter(|&q| self.queues[q].len() < limit)
            .min_by_key(|&q| (self.queues[q].backlog(), q));

        let Some(queue) = chosen else {
            self.stats.rejected += 1;
            debug!(name = %self.name, %flow, "QueueSet::arrive: every queue in hand is full, rejecting");
            return Arrival::Rejected {
                reason: RejectReason::QueueFull,
            };
        };

        let id = self.allocate_id();
        let charge = self.charge();
        let virtual_time = self.virtual_time;
        let state = self.flows.activate(flow);
        let start = virtual_time.max(state.last_finish);
        let finish = start.saturating_add(charge);
        state.last_finish = finish;
        state.waiting += 1;

        let waiter = Waiter {
            id,
            flow: flow.clone(),
            start,
            finish,
            enqueued_at: now,
            payload,
        };
        self.waiting.insert(id, (queue, waiter.key()));
        self.queues[queue].push(waiter);
        debug!(name = %self.name, %flow, id, queue, start, finish, "QueueSet::arrive: queued");
        Arrival::Queued { id, queue }
    }

    /// Hand free seats to the waiters with the smallest finish tags
    pub fn dispatch(&mut self, now: Instant) -> Vec<Dispatched<T>> {
        let mut dispatched = Vec::new();
        while self.seat_free() && !self.waiting.is_empty() {
            let next = self
                .queues
                .iter()
                .enumerate()
                .filter_map(|(i, queue)| queue.head_key().map(|key| (key, i)))
                .min();
            let Some((_, queue)) = next else {
                break;
            };
            let Some(waiter) = self.queues[queue].pop_head() else {
                break;
            };

            self.waiting.remove(&waiter.id);
            self.virtual_time = self.virtual_time.max(waiter.start);
            self.queues[queue].executing += 1;
            if let Some(state) = self.flows.get_mut(&waiter.flow) {
                state.waiting = state.waiting.saturating_sub(1);
                state.executing += 1;
            }
            self.executing.insert(
                waiter.id,
                Executing {
                    flow: waiter.flow.clone(),
                    queue: Some(queue),
                },
            );
            self.stats.dispatched += 1;
            debug!(name = %self.name, flow = %waiter.flow, id = waiter.id, queue, "QueueSet::dispatch: seat granted");

            dispatched.push(Dispatched {
                id: waiter.id,
                flow: waiter.flow,
                queue,
                waited: now.saturating_duration_since(waiter.enqueued_at),
                payload: waiter.payload,
            });
        }
        self.reanchor();
        self.retire_queues();
        dispatched
    }

    /// Give back the seat held by `id`
    ///
    /// Releasing a request that does not hold a seat is an accounting
    /// violation; it is counted and reported, and seat accounting is left
    /// untouched.
    pub fn finish(&mut self, id: RequestId, now: Instant) -> FlowControlResult<()> {
        let Some(executing) = self.executing.remove(&id) else {
            self.stats.double_releases += 1;
            warn!(name = %self.name, id, "QueueSet::finish: release of a request that holds no seat");
            return Err(FlowControlError::DoubleRelease {
                priority_level: self.name.clone(),
                request_id: id,
            });
        };

        if let Some(queue) = executing.queue
            && let Some(queue) = self.queues.get_mut(queue)
        {
            queue.executing = queue.executing.saturating_sub(1);
        }
        if let Some(state) = self.flows.get_mut(&executing.flow) {
            state.executing = state.executing.saturating_sub(1);
            state.mark_idle_if_done(now);
        }
        debug!(name = %self.name, flow = %executing.flow, id, "QueueSet::finish: seat released");
        self.retire_queues();
        Ok(())
    }

    /// Withdraw a waiting request; `None` if it is no longer waiting
    ///
    /// The withdrawn request's charge is refunded when it was the flow's most
    /// recent one.
    pub fn cancel(&mut self, id: RequestId, now: Instant) -> Option<T> {
        let (queue, key) = self.waiting.remove(&id)?;
        let waiter = self.queues.get_mut(queue)?.remove(&key)?;

        if let Some(state) = self.flows.get_mut(&waiter.flow) {
            state.waiting = state.waiting.saturating_sub(1);
            if state.last_finish == waiter.finish {
                state.last_finish = waiter.start;
            }
            state.mark_idle_if_done(now);
        }
        self.stats.cancelled += 1;
        debug!(name = %self.name, flow = %waiter.flow, id, "QueueSet::cancel: removed from queue");
        self.reanchor();
        self.retire_queues();
        Some(waiter.payload)
    }

    /// Whether `id` is still waiting
    pub fn is_waiting(&self, id: RequestId) -> bool {
        self.waiting.contains_key(&id)
    }

    /// Whether `id` currently holds a seat
    pub fn is_executing(&self, id: RequestId) -> bool {
        self.executing.contains_key(&id)
    }

    /// Reclaim flows idle past the retention window
    pub fn sweep_idle_flows(&mut self, now: Instant) -> usize {
        self.flows.sweep(now)
    }

    /// Keep virtual times bounded
    ///
    /// With nobody waiting, every tag is relative to `V` alone, so the set is
    /// shifted until `V` is zero. Under sustained load the shift happens once
    /// `V` crosses the threshold, by the smallest live tag.
    fn reanchor(&mut self) {
        let floor = if self.waiting.is_empty() {
            self.virtual_time
        } else if self.virtual_time >= self.reanchor_threshold {
            self.queues
                .iter()
                .filter_map(Queue::min_start)
                .min()
                .map_or(self.virtual_time, |min| min.min(self.virtual_time))
        } else {
            0
        };
        if floor == 0 {
            return;
        }

        for queue in &mut self.queues {
            queue.rebase(floor);
        }
        for (_, key) in self.waiting.values_mut() {
            key.0 = key.0.saturating_sub(floor);
        }
        for state in self.flows.iter_mut() {
            state.last_finish = state.last_finish.saturating_sub(floor);
        }
        self.virtual_time -= floor;
        debug!(name = %self.name, floor, virtual_time = self.virtual_time, "QueueSet::reanchor: shifted virtual time");
    }

    /// Drop trailing queues beyond the configured count once they are idle
    fn retire_queues(&mut self) {
        while self.queues.len() > self.desired_queues && self.queues.last().is_some_and(Queue::is_idle) {
            self.queues.pop();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_reanchor_threshold(&mut self, threshold: u64) {
        self.reanchor_threshold = threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queuing(queues: u32, queue_length_limit: u32, hand_size: u32) -> Option<QueuingConfig> {
        Some(QueuingConfig {
            queues,
            queue_length_limit,
            hand_size,
        })
    }

    fn config(limit: u32, queuing: Option<QueuingConfig>) -> QueueSetConfig {
        QueueSetConfig {
            concurrency_limit: limit,
            queuing,
            flow_retention: Duration::from_secs(60),
        }
    }

    fn flow(user: &str) -> FlowKey {
        FlowKey::new("e2e-testing-flowschema", user)
    }

    fn queued_id(arrival: Arrival) -> RequestId {
        match arrival {
            Arrival::Queued { id, .. } => id,
            other => panic!("expected queued, got {:?}", other),
        }
    }

    fn immediate_id(arrival: Arrival) -> RequestId {
        match arrival {
            Arrival::Immediate { id } => id,
            other => panic!("expected immediate, got {:?}", other),
        }
    }

    #[test]
    fn test_fast_path_until_limit() {
        let now = Instant::now();
        let mut set = QueueSet::new("workload", &config(2, queuing(4, 10, 2))).unwrap();

        immediate_id(set.arrive(&flow("a"), "a1", now));
        immediate_id(set.arrive(&flow("a"), "a2", now));
        queued_id(set.arrive(&flow("a"), "a3", now));

        assert_eq!(set.executing(), 2);
        assert_eq!(set.waiting(), 1);
        assert!(set.dispatch(now).is_empty());
        // Fast-path admissions charge no virtual time
        assert_eq!(set.virtual_time(), 0);
    }

    #[test]
    fn test_two_flows_alternate_on_single_queue() {
        let now = Instant::now();
        let mut set = QueueSet::new("single", &config(1, queuing(1, 32, 1))).unwrap();
        let mut owner = HashMap::new();

        let first = immediate_id(set.arrive(&flow("a"), "a", now));
        owner.insert(first, "a");
        for _ in 0..9 {
            owner.insert(queued_id(set.arrive(&flow("a"), "a", now)), "a");
        }
        for _ in 0..10 {
            owner.insert(queued_id(set.arrive(&flow("b"), "b", now)), "b");
        }

        let mut order = vec![owner[&first]];
        let mut current = first;
        loop {
            set.finish(current, now).unwrap();
            let mut next = set.dispatch(now);
            if next.is_empty() {
                break;
            }
            assert_eq!(next.len(), 1);
            let dispatched = next.remove(0);
            order.push(dispatched.payload);
            current = dispatched.id;
        }

        assert_eq!(order.len(), 20);
        // b is served second, and the flows alternate from then on
        assert_eq!(&order[..4], &["a", "a", "b", "a"]);
        let first_b = order.iter().position(|f| *f == "b").unwrap();
        let last_a = order.iter().rposition(|f| *f == "a").unwrap();
        assert!(first_b < 3);
        assert!(last_a > 15);
        for pair in order[1..19].chunks(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_flow_fifo_across_queues() {
        let now = Instant::now();
        let mut set = QueueSet::new("fifo", &config(1, queuing(8, 4, 3))).unwrap();
        let busy = immediate_id(set.arrive(&flow("other"), 0, now));

        let ids: Vec<_> = (1..=9).map(|n| queued_id(set.arrive(&flow("a"), n, now))).collect();
        assert_eq!(ids.len(), 9);

        let mut served = Vec::new();
        let mut current = busy;
        loop {
            set.finish(current, now).unwrap();
            let Some(next) = set.dispatch(now).pop() else { break };
            served.push(next.payload);
            current = next.id;
        }
        assert_eq!(served, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_queue_full_rejects() {
        let now = Instant::now();
        let mut set = QueueSet::new("tight", &config(1, queuing(1, 2, 1))).unwrap();
        immediate_id(set.arrive(&flow("a"), (), now));
        queued_id(set.arrive(&flow("a"), (), now));
        queued_id(set.arrive(&flow("b"), (), now));

        assert_eq!(
            set.arrive(&flow("c"), (), now),
            Arrival::Rejected {
                reason: RejectReason::QueueFull
            }
        );
        assert_eq!(set.waiting(), 2);
        assert_eq!(set.stats().rejected, 1);
    }

    #[test]
    fn test_reject_without_queues() {
        let now = Instant::now();
        let mut set = QueueSet::new("reject", &config(1, None)).unwrap();
        let id = immediate_id(set.arrive(&flow("a"), (), now));
        assert_eq!(
            set.arrive(&flow("b"), (), now),
            Arrival::Rejected {
                reason: RejectReason::ConcurrencyLimit
            }
        );
        set.finish(id, now).unwrap();
        immediate_id(set.arrive(&flow("b"), (), now));
    }

    #[test]
    fn test_hand_isolates_heavy_flow() {
        let now = Instant::now();
        let mut set = QueueSet::new("isolated", &config(1, queuing(8, 2, 2))).unwrap();
        immediate_id(set.arrive(&flow("holder"), (), now));

        let heavy = flow("heavy");
        let heavy_hand = set.hand_for(&heavy).unwrap();
        let light = (0..1000)
            .map(|n| flow(&format!("light-{}", n)))
            .find(|candidate| {
                let hand = set.hand_for(candidate).unwrap();
                hand.iter().all(|q| !heavy_hand.contains(q))
            })
            .unwrap();

        // Heavy fills both queues of its hand, then gets turned away
        for _ in 0..4 {
            queued_id(set.arrive(&heavy, (), now));
        }
        assert!(matches!(set.arrive(&heavy, (), now), Arrival::Rejected { .. }));

        // A flow with a disjoint hand still gets in
        queued_id(set.arrive(&light, (), now));
    }

    #[test]
    fn test_cancelled_waiter_is_never_dispatched() {
        let now = Instant::now();
        let mut set = QueueSet::new("cancel", &config(1, queuing(2, 10, 1))).unwrap();
        let holder = immediate_id(set.arrive(&flow("a"), "holder", now));
        let doomed = queued_id(set.arrive(&flow("b"), "doomed", now));
        let survivor = queued_id(set.arrive(&flow("c"), "survivor", now));

        assert_eq!(set.cancel(doomed, now), Some("doomed"));
        assert_eq!(set.cancel(doomed, now), None);
        assert!(!set.is_waiting(doomed));
        assert_eq!(set.executing(), 1);

        set.finish(holder, now).unwrap();
        let dispatched = set.dispatch(now);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].id, survivor);
        assert!(!set.is_executing(doomed));
        assert_eq!(set.stats().cancelled, 1);
    }

    #[test]
    fn test_cancel_refunds_tail_charge() {
        let now = Instant::now();
        let mut set = QueueSet::new("refund", &config(1, queuing(1, 10, 1))).unwrap();
        immediate_id(set.arrive(&flow("holder"), (), now));
        queued_id(set.arrive(&flow("a"), (), now));
        let tail = queued_id(set.arrive(&flow("a"), (), now));
        set.cancel(tail, now).unwrap();

        // A third request takes the cancelled one's tag, not a later one
        let again = queued_id(set.arrive(&flow("a"), (), now));
        let (_, key) = set.waiting[&again];
        assert_eq!(key.0, 2 * set.charge());
    }

    #[test]
    fn test_double_release_detected() {
        let now = Instant::now();
        let mut set = QueueSet::new("double", &config(2, None)).unwrap();
        let id = immediate_id(set.arrive(&flow("a"), (), now));
        set.finish(id, now).unwrap();

        let err = set.finish(id, now).unwrap_err();
        assert!(matches!(err, FlowControlError::DoubleRelease { request_id, .. } if request_id == id));
        assert_eq!(set.stats().double_releases, 1);
        assert_eq!(set.executing(), 0);
    }

    #[test]
    fn test_virtual_time_resets_when_idle() {
        let now = Instant::now();
        let mut set = QueueSet::new("idle", &config(1, queuing(1, 10, 1))).unwrap();
        let holder = immediate_id(set.arrive(&flow("a"), (), now));
        queued_id(set.arrive(&flow("a"), (), now));
        queued_id(set.arrive(&flow("a"), (), now));

        set.finish(holder, now).unwrap();
        let first = set.dispatch(now).remove(0);
        set.finish(first.id, now).unwrap();
        let second = set.dispatch(now).remove(0);
        // Nobody waits any more, so V was shifted back to zero
        assert_eq!(set.virtual_time(), 0);
        set.finish(second.id, now).unwrap();
        assert!(set.is_idle());
    }

    #[test]
    fn test_reanchor_under_sustained_load() {
        let now = Instant::now();
        let mut set = QueueSet::new("sustained", &config(1, queuing(1, 100, 1))).unwrap();
        set.set_reanchor_threshold(4 * VIRTUAL_UNIT);

        let mut current = immediate_id(set.arrive(&flow("a"), (), now));
        for _ in 0..3 {
            queued_id(set.arrive(&flow("a"), (), now));
            queued_id(set.arrive(&flow("b"), (), now));
        }
        let mut max_seen = 0;
        for round in 0..200 {
            // Keep two flows backlogged forever
            queued_id(set.arrive(&flow(if round % 2 == 0 { "a" } else { "b" }), (), now));
            set.finish(current, now).unwrap();
            current = set.dispatch(now).remove(0).id;
            max_seen = max_seen.max(set.virtual_time());
        }
        assert!(set.waiting() > 0);
        assert!(max_seen <= 5 * VIRTUAL_UNIT, "virtual time grew to {}", max_seen);
    }

    #[test]
    fn test_raising_limit_dispatches_waiters() {
        let now = Instant::now();
        let mut set = QueueSet::new("grow", &config(1, queuing(4, 10, 2))).unwrap();
        immediate_id(set.arrive(&flow("a"), (), now));
        queued_id(set.arrive(&flow("b"), (), now));
        queued_id(set.arrive(&flow("c"), (), now));

        set.set_config(&config(3, queuing(4, 10, 2))).unwrap();
        assert_eq!(set.dispatch(now).len(), 2);
        assert_eq!(set.executing(), 3);
    }

    #[test]
    fn test_shrinking_queues_drains_before_retiring() {
        let now = Instant::now();
        let mut set = QueueSet::new("shrink", &config(1, queuing(8, 10, 8))).unwrap();
        let holder = immediate_id(set.arrive(&flow("a"), (), now));
        for n in 0..16 {
            queued_id(set.arrive(&flow(&format!("f{}", n)), (), now));
        }

        set.set_config(&config(1, queuing(2, 10, 1))).unwrap();
        // Queues holding waiters stay until they drain
        assert!(set.queue_count() > 2);

        set.finish(holder, now).unwrap();
        let mut current = set.dispatch(now).remove(0).id;
        while set.waiting() > 0 {
            set.finish(current, now).unwrap();
            current = set.dispatch(now).remove(0).id;
        }
        set.finish(current, now).unwrap();
        assert_eq!(set.queue_count(), 2);
    }

    #[test]
    fn test_idle_flows_reclaimed_on_arrival() {
        let now = Instant::now();
        let mut set = QueueSet::new("gc", &config(4, queuing(4, 10, 2))).unwrap();
        for n in 0..3 {
            let id = immediate_id(set.arrive(&flow(&format!("f{}", n)), (), now));
            set.finish(id, now).unwrap();
        }
        assert_eq!(set.flow_count(), 3);

        let later = now + Duration::from_secs(61);
        immediate_id(set.arrive(&flow("fresh"), (), later));
        assert_eq!(set.flow_count(), 1);
    }

    #[test]
    fn test_invalid_config() {
        assert!(QueueSet::<()>::new("zero", &config(0, None)).is_err());
        assert!(QueueSet::<()>::new("hand", &config(1, queuing(2, 10, 3))).is_err());
        assert!(QueueSet::<()>::new("length", &config(1, queuing(2, 0, 1))).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Arrive(u8),
        Finish(usize),
        Cancel(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Arrive),
            (0usize..64).prop_map(Op::Finish),
            (0usize..64).prop_map(Op::Cancel),
        ]
    }

    proptest! {
        #[test]
        fn prop_seats_never_exceed_limit(limit in 1u32..5, ops in prop::collection::vec(op(), 1..200)) {
            let now = Instant::now();
            let mut set = QueueSet::new("prop", &config(limit, queuing(4, 3, 2))).unwrap();
            let mut holding: Vec<RequestId> = Vec::new();
            let mut queued: Vec<RequestId> = Vec::new();

            for op in ops {
                match op {
                    Op::Arrive(f) => match set.arrive(&flow(&f.to_string()), (), now) {
                        Arrival::Immediate { id } => holding.push(id),
                        Arrival::Queued { id, .. } => queued.push(id),
                        Arrival::Rejected { .. } => {}
                    },
                    Op::Finish(i) if !holding.is_empty() => {
                        let id = holding.remove(i % holding.len());
                        set.finish(id, now).unwrap();
                    }
                    Op::Cancel(i) if !queued.is_empty() => {
                        let id = queued.remove(i % queued.len());
                        prop_assert!(set.cancel(id, now).is_some());
                    }
                    _ => {}
                }
                for d in set.dispatch(now) {
                    queued.retain(|&id| id != d.id);
                    holding.push(d.id);
                }
                prop_assert!(set.executing() <= limit as usize);
                prop_assert_eq!(set.executing(), holding.len());
                prop_assert_eq!(set.waiting(), queued.len());
                // Never a free seat while someone waits
                prop_assert!(set.waiting() == 0 || set.executing() == limit as usize);
            }
        }
    }
}
