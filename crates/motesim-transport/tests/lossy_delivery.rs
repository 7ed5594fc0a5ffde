//! Property tests for transport sessions over a lossy link
//!
//! Two session managers exchange segments through recording I/O. A seeded
//! generator drops segments; when nothing is in flight the earliest
//! retransmission timer fires.

use motesim_core::{NodeId, RecordingIo, SessionKey, SimTime};
use motesim_transport::{SessionManager, SessionState, TransportConfig};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn id(n: u16) -> NodeId {
    NodeId::new(n).unwrap()
}

struct Pair {
    a: SessionManager,
    a_io: RecordingIo,
    b: SessionManager,
    b_io: RecordingIo,
    rng: ChaCha8Rng,
    loss: f64,
    now: SimTime,
}

impl Pair {
    fn new(seed: u64, loss: f64) -> Self {
        Self {
            a: SessionManager::new(id(1), TransportConfig::default()),
            a_io: RecordingIo::new(id(1)),
            b: SessionManager::new(id(2), TransportConfig::default()),
            b_io: RecordingIo::new(id(2)),
            rng: ChaCha8Rng::seed_from_u64(seed),
            loss,
            now: SimTime::ZERO,
        }
    }

    /// Exchange segments until quiet; returns false if nothing moved
    fn deliver(&mut self) -> bool {
        let from_a = self.a_io.take_transmitted();
        let from_b = self.b_io.take_transmitted();
        if from_a.is_empty() && from_b.is_empty() {
            return false;
        }
        for (_, segment) in from_a {
            if self.rng.random::<f64>() >= self.loss {
                self.b.on_segment(segment, &mut self.b_io).unwrap();
            }
        }
        for (_, segment) in from_b {
            if self.rng.random::<f64>() >= self.loss {
                self.a.on_segment(segment, &mut self.a_io).unwrap();
            }
        }
        true
    }

    /// Fire the earliest armed timer on either side; returns false if none
    fn fire_next_timer(&mut self) -> bool {
        let a_next = self.a_io.armed_timers().into_iter().min();
        let b_next = self.b_io.armed_timers().into_iter().min();
        let (on_a, (timer, key)) = match (a_next, b_next) {
            (Some(a), Some(b)) if b.0 < a.0 => (false, b),
            (Some(a), _) => (true, a),
            (None, Some(b)) => (false, b),
            (None, None) => return false,
        };
        self.now = timer.fire_at;
        self.a_io.set_now(self.now);
        self.b_io.set_now(self.now);
        if on_a {
            self.a_io.fire(timer);
            self.a.on_timer(key, &mut self.a_io);
        } else {
            self.b_io.fire(timer);
            self.b.on_timer(key, &mut self.b_io);
        }
        true
    }

    fn run(&mut self, max_steps: usize) {
        for _ in 0..max_steps {
            if !self.deliver() && !self.fire_next_timer() {
                return;
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_delivery_is_ordered_prefix(
        seed in any::<u64>(),
        loss in 0.0f64..0.4,
        count in 1usize..40,
    ) {
        let mut pair = Pair::new(seed, loss);
        let key = SessionKey::new(id(1), id(2));
        pair.a.initiate(id(2), &mut pair.a_io).unwrap();
        let sent: Vec<Vec<u8>> = (0..count).map(|i| (i as u32).to_be_bytes().to_vec()).collect();
        for payload in &sent {
            pair.a.send(key, payload.clone(), &mut pair.a_io);
        }
        pair.run(20_000);

        let delivered = pair.b.delivered(key);
        prop_assert!(delivered.len() <= sent.len());
        prop_assert_eq!(delivered, &sent[..delivered.len()]);

        // Anything still open has made full progress
        if pair.a.state(key) == SessionState::Established {
            prop_assert_eq!(delivered.len(), sent.len());
        }
    }

    #[test]
    fn prop_lossless_delivers_everything(count in 1usize..100) {
        let mut pair = Pair::new(0, 0.0);
        let key = SessionKey::new(id(1), id(2));
        pair.a.initiate(id(2), &mut pair.a_io).unwrap();
        for i in 0..count {
            pair.a.send(key, vec![i as u8], &mut pair.a_io);
        }
        pair.run(10_000);

        prop_assert_eq!(pair.b.delivered(key).len(), count);
        prop_assert_eq!(pair.a.stats().retransmissions, 0);
    }

    #[test]
    fn prop_kill_is_idempotent(kills in 1usize..6, loss in 0.0f64..0.3, seed in any::<u64>()) {
        let mut pair = Pair::new(seed, loss);
        let key = SessionKey::new(id(1), id(2));
        pair.a.initiate(id(2), &mut pair.a_io).unwrap();
        pair.run(1_000);

        let mut accepted = 0;
        for _ in 0..kills {
            if pair.a.kill(key, &mut pair.a_io) {
                accepted += 1;
            }
        }
        prop_assert!(accepted <= 1);
        pair.run(10_000);

        prop_assert_eq!(pair.a.state(key), SessionState::Closed);
        prop_assert!(pair.a_io.armed_timers().is_empty());
        prop_assert!(!pair.a.kill(key, &mut pair.a_io));
    }
}
