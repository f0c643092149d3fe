//! One-shot timers advanced by the simulation tick
//!
//! Time only moves when [`Scheduler::advance`] is called, so delayed work is
//! deterministic under test.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    deadlines: BinaryHeap<Reverse<(Duration, TimerId)>>,
    pending: HashMap<TimerId, T>,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            deadlines: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule_after(&mut self, delay: Duration, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.deadlines.push(Reverse((self.now + delay, id)));
        self.pending.insert(id, payload);
        id
    }

    /// Cancel a timer, returning its payload if it had not fired yet
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        // The heap entry stays behind and is skipped when it comes due
        self.pending.remove(&id)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move time forward by `dt` and return every timer now due, earliest first
    pub fn advance(&mut self, dt: Duration) -> Vec<(TimerId, T)> {
        self.now += dt;
        let mut due = Vec::new();
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > self.now {
                break;
            }
            self.deadlines.pop();
            if let Some(payload) = self.pending.remove(&id) {
                due.push((id, payload));
            }
        }
        due
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    #[test]
    fn fires_once_when_due() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(Duration::from_millis(120), "spawn");
        assert!(scheduler.advance(TICK).is_empty());
        assert!(scheduler.advance(TICK).is_empty());
        let due = scheduler.advance(TICK);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, "spawn");
        assert!(scheduler.advance(TICK).is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn due_timers_come_out_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(Duration::from_millis(30), 2);
        scheduler.schedule_after(Duration::from_millis(10), 1);
        scheduler.schedule_after(Duration::from_millis(30), 3);
        let order: Vec<_> = scheduler.advance(TICK).into_iter().map(|(_, p)| p).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.schedule_after(Duration::from_millis(10), ());
        assert!(scheduler.is_pending(id));
        assert_eq!(scheduler.cancel(id), Some(()));
        assert_eq!(scheduler.cancel(id), None);
        assert!(scheduler.advance(TICK).is_empty());
    }
}
