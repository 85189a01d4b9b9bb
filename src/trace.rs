//! The shared `TraceIdx` counter and its optional backing tape (§5, §9).
//!
//! Grounded in the original's preloaded pandas trace tape (`policy_skystore.py`
//! reads `df['time'] / 1000` as millisecond timestamps) used to replay a
//! recorded workload deterministically against a policy. When no tape is
//! configured the counter still advances (so `manual` transfer-policy users
//! get a stable sequence number) but timestamps come from the wall clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// A preloaded tape of millisecond epoch timestamps, one per trace event.
/// Indices past the end of the tape extrapolate by holding the last delta.
#[derive(Debug, Clone)]
pub struct TraceTape {
    millis: Vec<i64>,
}

impl TraceTape {
    pub fn from_millis(millis: Vec<i64>) -> Self {
        Self { millis }
    }

    pub fn timestamp_at(&self, idx: i64) -> Option<DateTime<Utc>> {
        if self.millis.is_empty() {
            return None;
        }
        let i = idx.max(0) as usize;
        let ms = if i < self.millis.len() {
            self.millis[i]
        } else {
            let last = *self.millis.last().unwrap();
            let step = if self.millis.len() >= 2 {
                last - self.millis[self.millis.len() - 2]
            } else {
                0
            };
            last + step * (i as i64 - self.millis.len() as i64 + 1)
        };
        Some(Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now))
    }

    pub fn len(&self) -> usize {
        self.millis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.millis.is_empty()
    }
}

/// Monotonic counter shared across every request handler, incremented
/// exactly once per read that `skystore`/`always_store` log (§5).
#[derive(Debug, Default)]
pub struct TraceIdx(AtomicI64);

impl TraceIdx {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves a trace index to a point in (simulated or real) time.
pub struct Clock {
    tape: Option<TraceTape>,
}

impl Clock {
    pub fn real_time() -> Self {
        Self { tape: None }
    }

    pub fn simulated(tape: TraceTape) -> Self {
        Self { tape: Some(tape) }
    }

    pub fn now(&self, idx: i64) -> DateTime<Utc> {
        match &self.tape {
            Some(tape) => tape.timestamp_at(idx).unwrap_or_else(Utc::now),
            None => Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_idx_advances_monotonically() {
        let idx = TraceIdx::new();
        assert_eq!(idx.current(), 0);
        assert_eq!(idx.next(), 0);
        assert_eq!(idx.next(), 1);
        assert_eq!(idx.current(), 2);
    }

    #[test]
    fn tape_resolves_in_bounds_indices_exactly() {
        let tape = TraceTape::from_millis(vec![1000, 2000, 4000]);
        assert_eq!(tape.timestamp_at(0).unwrap().timestamp_millis(), 1000);
        assert_eq!(tape.timestamp_at(2).unwrap().timestamp_millis(), 4000);
    }

    #[test]
    fn tape_extrapolates_past_its_end_by_holding_the_last_delta() {
        let tape = TraceTape::from_millis(vec![1000, 2000, 4000]);
        // last delta is 2000ms; index 3 should be 4000 + 2000 = 6000.
        assert_eq!(tape.timestamp_at(3).unwrap().timestamp_millis(), 6000);
        assert_eq!(tape.timestamp_at(4).unwrap().timestamp_millis(), 8000);
    }

    #[test]
    fn empty_tape_yields_no_timestamp() {
        let tape = TraceTape::from_millis(vec![]);
        assert!(tape.timestamp_at(0).is_none());
        assert!(tape.is_empty());
    }

    #[test]
    fn simulated_clock_reads_straight_off_the_tape() {
        let tape = TraceTape::from_millis(vec![5000, 10000]);
        let clock = Clock::simulated(tape);
        assert_eq!(clock.now(1).timestamp_millis(), 10000);
    }
}
