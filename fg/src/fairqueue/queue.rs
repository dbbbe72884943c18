//! A single virtual-time queue

use std::collections::BTreeMap;
use std::time::Instant;

use super::flows::FlowKey;
use super::RequestId;

/// Orders waiters: smallest finish tag first, arrival order on ties
pub(crate) type WaitKey = (u64, RequestId);

/// A request waiting for a seat
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    pub id: RequestId,
    pub flow: FlowKey,
    pub start: u64,
    pub finish: u64,
    pub enqueued_at: Instant,
    pub payload: T,
}

impl<T> Waiter<T> {
    pub fn key(&self) -> WaitKey {
        (self.finish, self.id)
    }
}

/// One queue of a queue set
///
/// Waiters are kept in finish-tag order. A flow's tags strictly increase, so
/// each flow still leaves in FIFO order.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    waiters: BTreeMap<WaitKey, Waiter<T>>,
    /// Requests dispatched from this queue and still holding a seat
    pub executing: u32,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            waiters: BTreeMap::new(),
            executing: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_idle(&self) -> bool {
        self.waiters.is_empty() && self.executing == 0
    }

    /// Waiting plus executing, the hand-member selection cost
    pub fn backlog(&self) -> usize {
        self.waiters.len() + self.executing as usize
    }

    pub fn push(&mut self, waiter: Waiter<T>) {
        self.waiters.insert(waiter.key(), waiter);
    }

    pub fn head_key(&self) -> Option<WaitKey> {
        self.waiters.first_key_value().map(|(key, _)| *key)
    }

    pub fn pop_head(&mut self) -> Option<Waiter<T>> {
        self.waiters.pop_first().map(|(_, waiter)| waiter)
    }

    pub fn remove(&mut self, key: &WaitKey) -> Option<Waiter<T>> {
        self.waiters.remove(key)
    }

    pub fn min_start(&self) -> Option<u64> {
        self.waiters.values().map(|w| w.start).min()
    }

    /// Shift every tag down by `floor`
    pub fn rebase(&mut self, floor: u64) {
        let waiters = std::mem::take(&mut self.waiters);
        self.waiters = waiters
            .into_values()
            .map(|mut w| {
                w.start = w.start.saturating_sub(floor);
                w.finish = w.finish.saturating_sub(floor);
                (w.key(), w)
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(id: RequestId, flow: &str, start: u64, finish: u64) -> Waiter<&'static str> {
        Waiter {
            id,
            flow: FlowKey::new("schema", flow),
            start,
            finish,
            enqueued_at: Instant::now(),
            payload: "req",
        }
    }

    #[test]
    fn test_orders_by_finish_then_arrival() {
        let mut queue = Queue::new();
        queue.push(waiter(1, "a", 0, 10));
        queue.push(waiter(2, "a", 10, 20));
        queue.push(waiter(3, "b", 0, 10));

        assert_eq!(queue.head_key(), Some((10, 1)));
        assert_eq!(queue.pop_head().unwrap().id, 1);
        assert_eq!(queue.pop_head().unwrap().id, 3);
        assert_eq!(queue.pop_head().unwrap().id, 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_virtual_bounds_and_backlog() {
        let mut queue = Queue::new();
        assert_eq!(queue.min_start(), None);
        queue.push(waiter(1, "a", 5, 15));
        queue.push(waiter(2, "a", 15, 25));
        queue.executing = 2;

        assert_eq!(queue.min_start(), Some(5));
        assert_eq!(queue.head_key(), Some((15, 1)));
        assert_eq!(queue.backlog(), 4);
        assert!(!queue.is_idle());
    }

    #[test]
    fn test_rebase_preserves_order() {
        let mut queue = Queue::new();
        queue.push(waiter(1, "a", 100, 110));
        queue.push(waiter(2, "b", 105, 115));
        queue.rebase(100);

        assert_eq!(queue.min_start(), Some(0));
        assert_eq!(queue.head_key(), Some((10, 1)));
        assert!(queue.remove(&(15, 2)).is_some());
    }
}
