//! Virtual-time stamps for log lines
//!
//! Wall-clock timestamps mean nothing inside a discrete-event run. The
//! simulator publishes its current virtual time to a thread-local slot as it
//! dispatches events, and [`VirtualTime`] stamps every log line with it.
//! Thread-local storage keeps simulations on different test threads apart.

use std::cell::Cell;
use std::fmt;

use motesim_core::SimTime;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

thread_local! {
    static VIRTUAL_NOW: Cell<Option<SimTime>> = const { Cell::new(None) };
}

/// Publish the current virtual time for this thread
pub fn set_virtual_now(now: SimTime) {
    VIRTUAL_NOW.with(|slot| slot.set(Some(now)));
}

/// Forget the published time (no simulation running on this thread)
pub fn clear_virtual_now() {
    VIRTUAL_NOW.with(|slot| slot.set(None));
}

/// The virtual time last published on this thread
pub fn virtual_now() -> Option<SimTime> {
    VIRTUAL_NOW.with(Cell::get)
}

/// Log timer printing `t=<seconds>` in virtual time, or `t=-` outside a run
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualTime;

impl FormatTime for VirtualTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        match virtual_now() {
            Some(now) => write!(w, "t={now}"),
            None => write!(w, "t=-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render() -> String {
        let mut out = String::new();
        VirtualTime.format_time(&mut Writer::new(&mut out)).unwrap();
        out
    }

    #[test]
    fn test_outside_run() {
        clear_virtual_now();
        assert_eq!(render(), "t=-");
        assert_eq!(virtual_now(), None);
    }

    #[test]
    fn test_stamps_published_time() {
        set_virtual_now(SimTime::from_millis(1_500));
        assert_eq!(render(), "t=1.500000s");
        set_virtual_now(SimTime::from_secs(10));
        assert_eq!(render(), "t=10.000000s");
        clear_virtual_now();
    }

    #[test]
    fn test_thread_isolation() {
        set_virtual_now(SimTime::from_secs(3));
        let other = std::thread::spawn(virtual_now).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(virtual_now(), Some(SimTime::from_secs(3)));
        clear_virtual_now();
    }
}
