//! Virtual-clock timer scheduler
//!
//! Time only moves when the host calls `advance_time`. Timers due at the
//! same instant fire in scheduling order.

use crate::tasks::Frame;
use botrt_script::{PromiseId, Value};
use std::collections::BTreeMap;

/// What happens when a timer fires
#[derive(Debug, Clone)]
pub enum TimerCallback {
    /// Call a script function with no arguments
    Function(Value),
    /// Fulfil a promise (`os.sleep`)
    Resolve(PromiseId),
}

#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub id: u64,
    pub callback: TimerCallback,
    /// Repeat period for `setInterval`
    pub interval: Option<u64>,
    pub context: Frame,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: u64,
    seq: u64,
    next_id: u64,
    timers: BTreeMap<(u64, u64), TimerEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule a callback `delay` ms from now and return its timer id
    pub fn schedule(
        &mut self,
        delay: u64,
        callback: TimerCallback,
        interval: Option<u64>,
        context: Frame,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.insert(
            self.now.saturating_add(delay),
            TimerEntry {
                id,
                callback,
                interval: interval.map(|i| i.max(1)),
                context,
            },
        );
        tracing::debug!(timer = id, delay, "timer scheduled");
        id
    }

    fn insert(&mut self, due: u64, entry: TimerEntry) {
        self.seq += 1;
        self.timers.insert((due, self.seq), entry);
    }

    pub fn cancel(&mut self, id: u64) -> bool {
        let slot = self
            .timers
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(slot, _)| *slot);
        match slot {
            Some(slot) => self.timers.remove(&slot).is_some(),
            None => false,
        }
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its due time. Intervals are rescheduled before being returned.
    pub fn pop_due(&mut self, until: u64) -> Option<TimerEntry> {
        let (&(due, seq), _) = self.timers.iter().next()?;
        if due > until {
            return None;
        }
        let entry = self.timers.remove(&(due, seq))?;
        self.now = self.now.max(due);
        // An interval whose next firing would pass the end of time stops
        if let Some(next) = entry.interval.and_then(|period| due.checked_add(period)) {
            self.insert(next, entry.clone());
        }
        Some(entry)
    }

    /// Move the clock forward without firing anything
    pub fn set_now(&mut self, now: u64) {
        self.now = self.now.max(now);
    }

    pub fn next_due(&self) -> Option<u64> {
        self.timers.keys().next().map(|(due, _)| *due)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(id: PromiseId) -> TimerCallback {
        TimerCallback::Resolve(id)
    }

    #[test]
    fn test_fires_in_due_then_schedule_order() {
        let mut scheduler = Scheduler::new();
        let late = scheduler.schedule(20, resolve(1), None, Frame::default());
        let a = scheduler.schedule(10, resolve(2), None, Frame::default());
        let b = scheduler.schedule(10, resolve(3), None, Frame::default());

        assert_eq!(scheduler.next_due(), Some(10));
        assert_eq!(scheduler.pop_due(15).map(|t| t.id), Some(a));
        assert_eq!(scheduler.pop_due(15).map(|t| t.id), Some(b));
        assert!(scheduler.pop_due(15).is_none());
        assert_eq!(scheduler.now(), 10);
        assert_eq!(scheduler.pop_due(20).map(|t| t.id), Some(late));
    }

    #[test]
    fn test_interval_reschedules() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.schedule(5, resolve(1), Some(5), Frame::default());

        let fired: Vec<u64> = std::iter::from_fn(|| scheduler.pop_due(16).map(|t| t.id)).collect();
        assert_eq!(fired, vec![id, id, id]);
        assert_eq!(scheduler.next_due(), Some(20));

        assert!(scheduler.cancel(id));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, resolve(1), Some(0), Frame::default());
        scheduler.pop_due(0);
        assert_eq!(scheduler.next_due(), Some(1));
    }

    #[test]
    fn test_far_future_delays_saturate() {
        let mut scheduler = Scheduler::new();
        scheduler.set_now(5);
        scheduler.schedule(u64::MAX, resolve(1), None, Frame::default());
        assert_eq!(scheduler.next_due(), Some(u64::MAX));
        assert!(scheduler.pop_due(1_000).is_none());

        scheduler.clear();
        let id = scheduler.schedule(u64::MAX, resolve(2), Some(u64::MAX), Frame::default());
        assert_eq!(scheduler.pop_due(u64::MAX).map(|t| t.id), Some(id));
        assert!(scheduler.is_empty());
    }
}
