//! Discrete-event scheduler
//!
//! The [`EventClock`] owns the global virtual time and the set of pending
//! events. Events are ordered by fire time and, for equal fire times, by
//! insertion order, so a run is fully determined by its seed and the
//! sequence of driver calls.
//!
//! Pending events live in an ordered map keyed by [`EventId`], which makes
//! cancellation a lookup-and-remove: a cancelled event can never fire.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ClockError;
use crate::time::SimTime;

/// Handle to a scheduled event
///
/// Ordering of ids is the dispatch order: fire time first, then the
/// insertion sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// When the event fires
    pub fire_at: SimTime,
    /// Global insertion sequence (FIFO tie-breaker)
    pub seq: u64,
}

/// Discrete-event scheduler over payloads of type `E`
#[derive(Debug)]
pub struct EventClock<E> {
    now: SimTime,
    next_seq: u64,
    pending: BTreeMap<EventId, E>,
    fired: u64,
}

impl<E> EventClock<E> {
    /// Create a clock at time zero with nothing scheduled
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            pending: BTreeMap::new(),
            fired: 0,
        }
    }

    /// Current virtual time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule an event at an absolute time
    ///
    /// Fails with [`ClockError::InvalidTime`] if `fire_at` is in the past.
    /// Scheduling at exactly `now` is allowed and runs after every event
    /// already queued for `now`.
    pub fn schedule(&mut self, fire_at: SimTime, event: E) -> Result<EventId, ClockError> {
        if fire_at < self.now {
            return Err(ClockError::InvalidTime {
                requested: fire_at,
                now: self.now,
            });
        }
        let id = EventId {
            fire_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.insert(id, event);
        trace!(fire_at = %fire_at, seq = id.seq, "Event scheduled");
        Ok(id)
    }

    /// Schedule an event `delay` after the current time
    pub fn schedule_after(&mut self, delay: Duration, event: E) -> EventId {
        let id = EventId {
            fire_at: self.now + delay,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.insert(id, event);
        id
    }

    /// Cancel a pending event, returning its payload if it had not fired yet
    pub fn cancel(&mut self, id: EventId) -> Option<E> {
        let removed = self.pending.remove(&id);
        if removed.is_some() {
            trace!(fire_at = %id.fire_at, seq = id.seq, "Event cancelled");
        }
        removed
    }

    /// Check whether an event is still waiting to fire
    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of events waiting to fire
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of events dispatched so far
    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    /// Fire time of the next pending event
    pub fn next_fire_time(&self) -> Option<SimTime> {
        self.pending.keys().next().map(|id| id.fire_at)
    }

    /// Remove the next event due at or before `deadline`
    ///
    /// Moves the clock to the event's fire time.
    pub fn pop_due(&mut self, deadline: SimTime) -> Option<(EventId, E)> {
        let first = *self.pending.keys().next()?;
        if first.fire_at > deadline {
            return None;
        }
        let event = self.pending.remove(&first)?;
        self.now = first.fire_at;
        self.fired += 1;
        Some((first, event))
    }

    /// Run every event due within `duration` of now, then move to `now + duration`
    ///
    /// The handler receives the clock itself so it can schedule follow-up
    /// events. If the handler fails, dispatch stops and the clock stays at
    /// the failing event's fire time. Returns the number of events fired.
    pub fn advance<F, Err>(&mut self, duration: Duration, mut handler: F) -> Result<u64, Err>
    where
        F: FnMut(&mut Self, EventId, E) -> Result<(), Err>,
    {
        let deadline = self.now + duration;
        let mut count = 0;
        while let Some((id, event)) = self.pop_due(deadline) {
            count += 1;
            handler(self, id, event)?;
        }
        self.now = deadline;
        Ok(count)
    }
}

impl<E> Default for EventClock<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<E>(_: &mut EventClock<E>, _: EventId, _: E) -> Result<(), ClockError> {
        Ok(())
    }

    #[test]
    fn test_schedule_in_past_rejected() {
        let mut clock: EventClock<u32> = EventClock::new();
        clock.advance(Duration::from_secs(5), noop).unwrap();

        let err = clock.schedule(SimTime::from_secs(4), 1).unwrap_err();
        assert!(matches!(err, ClockError::InvalidTime { .. }));
        assert!(clock.schedule(SimTime::from_secs(5), 2).is_ok());
    }

    #[test]
    fn test_fifo_for_equal_times() {
        let mut clock = EventClock::new();
        let t = SimTime::from_secs(1);
        for n in 0..5u32 {
            clock.schedule(t, n).unwrap();
        }
        clock.schedule(SimTime::from_millis(500), 99).unwrap();

        let mut order = Vec::new();
        clock
            .advance(Duration::from_secs(2), |_, _, n| {
                order.push(n);
                Ok::<_, ClockError>(())
            })
            .unwrap();
        assert_eq!(order, vec![99, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_advance_moves_time_without_events() {
        let mut clock: EventClock<()> = EventClock::new();
        let fired = clock.advance(Duration::from_secs(10), noop).unwrap();
        assert_eq!(fired, 0);
        assert_eq!(clock.now(), SimTime::from_secs(10));
    }

    #[test]
    fn test_events_beyond_deadline_wait() {
        let mut clock = EventClock::new();
        clock.schedule(SimTime::from_secs(3), "late").unwrap();
        let fired = clock.advance(Duration::from_secs(2), noop).unwrap();
        assert_eq!(fired, 0);
        assert_eq!(clock.pending_count(), 1);

        let fired = clock.advance(Duration::from_secs(1), noop).unwrap();
        assert_eq!(fired, 1);
        assert_eq!(clock.now(), SimTime::from_secs(3));
    }

    #[test]
    fn test_cancelled_event_never_fires() {
        let mut clock = EventClock::new();
        let keep = clock.schedule(SimTime::from_secs(1), "keep").unwrap();
        let drop = clock.schedule(SimTime::from_secs(1), "drop").unwrap();
        assert_eq!(clock.cancel(drop), Some("drop"));
        assert_eq!(clock.cancel(drop), None);
        assert!(clock.is_pending(keep));

        let mut seen = Vec::new();
        clock
            .advance(Duration::from_secs(2), |_, _, e| {
                seen.push(e);
                Ok::<_, ClockError>(())
            })
            .unwrap();
        assert_eq!(seen, vec!["keep"]);
    }

    #[test]
    fn test_handler_can_chain_events() {
        let mut clock = EventClock::new();
        clock.schedule(SimTime::ZERO, 0u32).unwrap();

        let mut seen = Vec::new();
        clock
            .advance(Duration::from_secs(5), |clock, _, n| {
                seen.push((clock.now(), n));
                if n < 3 {
                    clock.schedule_after(Duration::from_secs(1), n + 1);
                }
                Ok::<_, ClockError>(())
            })
            .unwrap();

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], (SimTime::from_secs(3), 3));
    }

    #[test]
    fn test_handler_error_stops_dispatch() {
        let mut clock = EventClock::new();
        clock.schedule(SimTime::from_secs(1), 1).unwrap();
        clock.schedule(SimTime::from_secs(2), 2).unwrap();

        let result = clock.advance(Duration::from_secs(5), |clock, _, n| {
            if n == 1 {
                Err(ClockError::InvalidTime {
                    requested: SimTime::ZERO,
                    now: clock.now(),
                })
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(clock.now(), SimTime::from_secs(1));
        assert_eq!(clock.pending_count(), 1);
    }
}
