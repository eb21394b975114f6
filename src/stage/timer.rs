// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! A stage's timer wheel (spec §4.6 "Timers"). This module only tracks
//! *when* a timer is due and *whether* it is still live; it never runs
//! application code — firing a timer means enqueuing a `TimerTick` onto
//! the owning stage's mailbox, which [`crate::stage::executor`] does.
//!
//! Grounded on `app/stage/mod.rs`'s periodic `Reporter` cycle, which
//! the teacher drives off a fixed tick rather than a wheel; PlayHouse
//! needs per-timer periods and counts, so this keeps the teacher's
//! "compute next due instant, let the owner act on it" shape but over a
//! map of independent timers instead of one fixed interval.

use std::{
    collections::HashMap,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};

/// Identifies a timer within its owning stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

enum Remaining {
    /// `AddRepeatTimer`: fires until cancelled or the stage closes.
    Forever,
    /// `AddCountTimer`: fires this many more times.
    Count(u32),
}

struct Timer {
    next_fire: Instant,
    period: Duration,
    remaining: Remaining,
}

/// The live timers for one stage. Not thread-safe by design: a stage's
/// timer wheel is only ever touched from that stage's own cycle.
#[derive(Default)]
pub struct TimerWheel {
    next_id: AtomicU64,
    timers: HashMap<TimerId, Timer>,
    /// Ids explicitly cancelled via [`Self::cancel`]. Consulted by
    /// [`Self::is_cancelled`] so a `TimerTick` already sitting in the
    /// mailbox when `cancel` runs is dropped instead of fired — distinct
    /// from a count timer simply running out of fires, which needs no
    /// such bookkeeping since it never enqueues another tick.
    cancelled: std::collections::HashSet<TimerId>,
}

impl TimerWheel {
    /// An empty wheel.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// `AddRepeatTimer(initialDelay, period, fn)`: fires every `period`
    /// starting at `now + initial_delay`, until cancelled.
    pub fn add_repeat(&mut self, now: Instant, initial_delay: Duration, period: Duration) -> TimerId {
        let id = self.allocate_id();
        self.timers.insert(
            id,
            Timer {
                next_fire: now + initial_delay,
                period,
                remaining: Remaining::Forever,
            },
        );
        id
    }

    /// `AddCountTimer(initialDelay, period, count, fn)`: fires exactly
    /// `count` times unless cancelled first (spec §8 "Timer
    /// cardinality").
    pub fn add_count(&mut self, now: Instant, initial_delay: Duration, period: Duration, count: u32) -> TimerId {
        let id = self.allocate_id();
        self.timers.insert(
            id,
            Timer {
                next_fire: now + initial_delay,
                period,
                remaining: Remaining::Count(count),
            },
        );
        id
    }

    /// Remove a timer. Idempotent; returns `true` if it was still
    /// registered. A `TimerTick` already sitting in the mailbox for
    /// this id becomes stale: [`Self::is_cancelled`] returns `true` for
    /// it once this runs, and the executor drops stale ticks instead of
    /// firing them.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.cancelled.insert(id);
        self.timers.remove(&id).is_some()
    }

    /// True if `id` was explicitly cancelled. A count timer that simply
    /// ran out of fires is not "cancelled" in this sense — it never
    /// enqueues another tick, so there is nothing left to filter.
    pub fn is_cancelled(&self, id: TimerId) -> bool {
        self.cancelled.contains(&id)
    }

    /// Advance the wheel to `now`, returning every timer id that fired.
    /// A count timer that just fired its last tick is removed here, but
    /// is not marked cancelled: the tick this call just returned is
    /// still the legitimate final one.
    pub fn due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        let mut exhausted = Vec::new();
        for (&id, timer) in self.timers.iter_mut() {
            if timer.next_fire > now {
                continue;
            }
            fired.push(id);
            match &mut timer.remaining {
                Remaining::Forever => {
                    timer.next_fire = now + timer.period;
                }
                Remaining::Count(n) => {
                    *n -= 1;
                    if *n == 0 {
                        exhausted.push(id);
                    } else {
                        timer.next_fire = now + timer.period;
                    }
                }
            }
        }
        for id in exhausted {
            self.timers.remove(&id);
        }
        fired
    }

    /// Cancel every timer, e.g. when the owning stage closes (spec §5
    /// "closing a stage cancels all its timers").
    pub fn cancel_all(&mut self) {
        self.cancelled.extend(self.timers.keys().copied());
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_timer_fires_on_every_period_and_stays_live() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let id = wheel.add_repeat(t0, Duration::from_millis(10), Duration::from_millis(10));

        assert!(wheel.due(t0).is_empty());
        assert_eq!(wheel.due(t0 + Duration::from_millis(10)), vec![id]);
        assert!(!wheel.is_cancelled(id));
        assert_eq!(wheel.due(t0 + Duration::from_millis(20)), vec![id]);
        assert!(!wheel.is_cancelled(id));
    }

    #[test]
    fn count_timer_fires_exactly_n_times_then_retires() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let id = wheel.add_count(t0, Duration::ZERO, Duration::from_millis(10), 3);

        assert_eq!(wheel.due(t0), vec![id]);
        assert_eq!(wheel.due(t0 + Duration::from_millis(10)), vec![id]);
        assert_eq!(wheel.due(t0 + Duration::from_millis(20)), vec![id]);
        // the timer retired itself after its third fire, but that is not
        // the same as cancellation: the tick this call just returned is
        // still a legitimate fire that the executor must process.
        assert!(!wheel.is_cancelled(id));
        assert!(wheel.due(t0 + Duration::from_millis(30)).is_empty());
    }

    #[test]
    fn cancel_makes_an_in_flight_tick_stale() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let id = wheel.add_repeat(t0, Duration::ZERO, Duration::from_millis(10));
        assert_eq!(wheel.due(t0), vec![id]);

        assert!(wheel.cancel(id));
        assert!(wheel.is_cancelled(id));
        assert!(!wheel.cancel(id)); // idempotent: already removed from `timers`
    }

    #[test]
    fn cancel_all_marks_every_live_timer_cancelled() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let a = wheel.add_repeat(t0, Duration::ZERO, Duration::from_millis(10));
        let b = wheel.add_count(t0, Duration::ZERO, Duration::from_millis(10), 5);
        wheel.cancel_all();
        assert!(wheel.is_cancelled(a));
        assert!(wheel.is_cancelled(b));
    }
}
