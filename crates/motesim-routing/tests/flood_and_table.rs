//! Property tests for duplicate suppression and route preference

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use motesim_core::{NodeId, SimTime};
use motesim_routing::{FLOOD_WINDOW, FloodFilter, RouteEntry, RouteUpdate, RoutingTable};
use proptest::prelude::*;

fn id(n: u16) -> NodeId {
    NodeId::new(n).unwrap()
}

fn route(destination: u16, next_hop: u16, hop_count: u8, quality: f64) -> RouteEntry {
    RouteEntry {
        destination: id(destination),
        next_hop: id(next_hop),
        hop_count,
        quality,
        updated_at: SimTime::ZERO,
    }
}

proptest! {
    /// Inside the window, every (origin, seq) passes exactly once in any arrival order
    #[test]
    fn prop_flood_accepts_each_packet_once(
        arrivals in proptest::collection::vec((1u16..4, 0u32..FLOOD_WINDOW), 1..200)
    ) {
        let mut filter = FloodFilter::new();
        let mut accepted = BTreeSet::new();
        for (origin, seq) in arrivals {
            let fresh = filter.check_and_record(id(origin), seq);
            prop_assert_eq!(fresh, accepted.insert((origin, seq)));
        }
    }

    /// A packet that fell out of the window is never forwarded
    #[test]
    fn prop_flood_rejects_ancient(seq in 0u32..1_000, lag in FLOOD_WINDOW..10 * FLOOD_WINDOW) {
        let mut filter = FloodFilter::new();
        prop_assert!(filter.check_and_record(id(1), seq + lag));
        prop_assert!(!filter.check_and_record(id(1), seq));
    }

    /// Offers from distinct next hops leave the best one installed
    #[test]
    fn prop_table_keeps_best_offer(
        offers in proptest::collection::vec((2u16..10, 1u8..16, 0.0f64..=1.0), 1..40)
    ) {
        let mut table = RoutingTable::new(Duration::from_secs(3));
        let mut best: BTreeMap<u16, (u8, f64)> = BTreeMap::new();
        let mut used_hops = BTreeSet::new();
        for (next_hop, hops, quality) in offers {
            // One offer per next hop so refresh-from-current-hop never applies
            if !used_hops.insert(next_hop) {
                continue;
            }
            let update = table.offer(route(1, next_hop, hops, quality));
            prop_assert_ne!(update, RouteUpdate::Refreshed);
            let replace = match best.get(&1) {
                None => true,
                Some((h, q)) => hops < *h || (hops == *h && quality > *q),
            };
            if replace {
                best.insert(1, (hops, quality));
            }
        }
        let installed = table.get(id(1)).unwrap();
        prop_assert_eq!((installed.hop_count, installed.quality), best[&1]);
    }
}

#[test]
fn test_current_next_hop_can_worsen_route() {
    let mut table = RoutingTable::new(Duration::from_secs(3));
    table.offer(route(5, 2, 2, 0.9));
    assert_eq!(table.offer(route(5, 2, 4, 0.5)), RouteUpdate::Refreshed);
    assert_eq!(table.get(id(5)).unwrap().hop_count, 4);
    assert_eq!(table.offer(route(5, 3, 5, 1.0)), RouteUpdate::Rejected);
}
