//! Integration scenarios exercising the full motesim stack
//!
//! These drive a [`Simulation`] through its public API and check the
//! end-to-end behavior of:
//! - motesim-core (event clock, error taxonomy)
//! - motesim-routing (neighbor discovery, distance-vector routing, flooding)
//! - motesim-transport (session open, data transfer, teardown, timeout)

use std::collections::{BTreeMap, BTreeSet};

use motesim_core::{
    Channel, ClockError, NodeId, RoutingError, SimError, SimTime, TopologyError, TransportError,
};
use motesim_transport::SessionState;
use proptest::prelude::*;

use crate::config::SimConfig;
use crate::scenarios::{self, prepare};
use crate::simulation::Simulation;
use crate::topology::{LinkSignal, NoiseSpec, TopologySpec};
use crate::trace::TraceEvent;

fn id(n: u16) -> NodeId {
    NodeId::new(n).unwrap()
}

fn seeded(seed: u64) -> SimConfig {
    SimConfig::default().with_seed(seed)
}

fn two_nodes() -> TopologySpec {
    TopologySpec::from_links(&[(1, 2, 1.0)]).unwrap()
}

/// Two nodes on a perfect link, boot, open, close
#[test]
fn test_two_node_session_opens_and_closes() {
    let mut sim = prepare(seeded(1), two_nodes(), None).unwrap();

    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Established);
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Established);

    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Closed);
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Closed);
    assert!(sim.drain_session_failures().is_empty());
}

#[test]
fn test_kill_is_idempotent() {
    let mut sim = prepare(seeded(2), two_nodes(), None).unwrap();

    // Never opened
    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.run_time(1).unwrap();
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Closed);

    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();
    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();
    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();

    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Closed);
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Closed);
    assert!(sim.drain_session_failures().is_empty());
}

#[test]
fn test_data_arrives_in_order() {
    let mut sim = prepare(seeded(3), TopologySpec::line(3), None).unwrap();
    sim.run_time(20).unwrap();

    sim.initiate_tcp(id(1), id(3)).unwrap();
    sim.run_time(5).unwrap();
    let payloads: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i; 4]).collect();
    for payload in &payloads {
        sim.tcp_send(id(1), id(3), payload.clone()).unwrap();
    }
    sim.run_time(10).unwrap();

    assert_eq!(sim.tcp_received(id(1), id(3)).unwrap(), payloads);
    assert!(sim.tcp_received(id(3), id(1)).unwrap().is_empty());
}

#[test]
fn test_responder_can_send_back() {
    let mut sim = prepare(seeded(4), two_nodes(), None).unwrap();
    sim.run_time(5).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();

    sim.tcp_send(id(2), id(1), b"pong".to_vec()).unwrap();
    sim.run_time(5).unwrap();
    assert_eq!(sim.tcp_received(id(2), id(1)).unwrap(), vec![b"pong".to_vec()]);
}

#[test]
fn test_unreachable_peer_times_out() {
    let mut sim = prepare(seeded(5), two_nodes(), None).unwrap();
    sim.run_time(5).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Established);

    sim.power_off(id(2)).unwrap();
    sim.tcp_send(id(1), id(2), b"lost".to_vec()).unwrap();
    sim.run_time(60).unwrap();

    let failures = sim.drain_session_failures();
    assert_eq!(failures.len(), 1);
    let (node, TransportError::SessionTimeout { key, retries }) = &failures[0] else {
        panic!("unexpected failure {:?}", failures[0]);
    };
    assert_eq!(*node, id(1));
    assert_eq!((key.src, key.dst), (id(1), id(2)));
    assert_eq!(*retries, 5);
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Closed);
    assert!(sim.drain_session_failures().is_empty());
    assert!(sim
        .trace()
        .iter()
        .any(|r| matches!(r.event, TraceEvent::SessionFailed { .. })));
}

#[test]
fn test_isolated_node_never_routes() {
    let mut spec = TopologySpec::from_links(&[(1, 2, 1.0)]).unwrap();
    spec.add_node(id(3), None);
    let mut sim = prepare(seeded(6), spec, None).unwrap();
    sim.run_time(60).unwrap();

    for dest in [id(1), id(2)] {
        assert!(matches!(
            sim.route(id(3), dest),
            Err(SimError::Routing(RoutingError::NoRoute { .. }))
        ));
        assert!(matches!(
            sim.route(dest, id(3)),
            Err(SimError::Routing(RoutingError::NoRoute { .. }))
        ));
    }
    assert!(sim.neighbor_discovery_dump(id(3)).unwrap().is_empty());
    assert!(sim.routing_table_dump(id(3)).unwrap().is_empty());
}

#[test]
fn test_line_routing() {
    let mut sim = prepare(seeded(7), TopologySpec::line(5), None).unwrap();
    sim.run_time(60).unwrap();

    assert_eq!(sim.route(id(1), id(5)).unwrap(), id(2));
    assert_eq!(sim.route(id(5), id(1)).unwrap(), id(4));
    assert_eq!(sim.route(id(3), id(1)).unwrap(), id(2));
    assert_eq!(
        sim.route_path(id(5), id(1)).unwrap(),
        vec![id(5), id(4), id(3), id(2), id(1)]
    );

    let table = sim.routing_table_dump(id(1)).unwrap();
    let hops: BTreeMap<NodeId, u8> = table.iter().map(|e| (e.destination, e.hop_count)).collect();
    assert_eq!(hops.get(&id(2)), Some(&1));
    assert_eq!(hops.get(&id(5)), Some(&4));
}

#[test]
fn test_neighbors_converge_on_perfect_links() {
    let mut sim = prepare(seeded(8), TopologySpec::full(4), None).unwrap();
    // 3 * T_beacon / (1 - 0)
    sim.run_time(3).unwrap();
    for node in sim.node_ids() {
        let neighbors: BTreeSet<NodeId> = sim
            .neighbor_discovery_dump(node)
            .unwrap()
            .into_iter()
            .map(|e| e.neighbor)
            .collect();
        let expected: BTreeSet<NodeId> = sim.node_ids().into_iter().filter(|n| *n != node).collect();
        assert_eq!(neighbors, expected, "node {node}");
    }
}

#[test]
fn test_neighbors_discovered_on_lossy_links() {
    let spec = TopologySpec::from_links(&[(1, 2, 0.8), (2, 3, 0.8), (3, 4, 0.8), (4, 1, 0.8)]).unwrap();
    let mut sim = prepare(seeded(9), spec, None).unwrap();

    // 3 * T_beacon / (1 - 0.2)
    let mut seen: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for _ in 0..4 {
        sim.run_time(1).unwrap();
        for node in sim.node_ids() {
            let entries = sim.neighbor_discovery_dump(node).unwrap();
            seen.entry(node).or_default().extend(entries.iter().map(|e| e.neighbor));
        }
    }
    for node in sim.node_ids() {
        let expected: BTreeSet<NodeId> = sim.topology().neighbors(node).collect();
        assert_eq!(seen[&node], expected, "node {node}");
    }
}

#[test]
fn test_ping_floods_before_routes_exist() {
    let mut sim = prepare(seeded(10), TopologySpec::line(3), None).unwrap();
    sim.ping(id(1), id(3), "early").unwrap();
    sim.run_time(1).unwrap();

    let inbox = sim.inbox(id(3)).unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].flooded);
    assert_eq!(inbox[0].source, id(1));
    assert_eq!(inbox[0].payload, b"early");
    // The origin suppresses its own rebroadcast echo
    assert!(sim.inbox(id(1)).unwrap().is_empty());
}

#[test]
fn test_ping_routes_after_stabilization() {
    let mut sim = prepare(seeded(11), TopologySpec::line(4), None).unwrap();
    sim.run_time(60).unwrap();
    sim.ping(id(1), id(4), "Hello, World").unwrap();
    sim.run_time(1).unwrap();

    let inbox = sim.inbox(id(4)).unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(!inbox[0].flooded);
    assert_eq!(inbox[0].payload, b"Hello, World");
    assert!(sim.node(id(2)).unwrap().stats().forwarded >= 1);
}

#[test]
fn test_same_seed_same_trace() {
    let run = |seed| {
        let spec = TopologySpec::from_links(&[(1, 2, 0.7), (2, 3, 0.9), (1, 3, 0.4)]).unwrap();
        let mut sim = prepare(seeded(seed), spec, Some(NoiseSpec::new(vec![-98.0, -96.0]).unwrap())).unwrap();
        sim.run_time(20).unwrap();
        sim.ping(id(1), id(3), "x").unwrap();
        sim.initiate_tcp(id(3), id(1)).unwrap();
        sim.run_time(20).unwrap();
        sim.trace_json().unwrap()
    };
    assert_eq!(run(42), run(42));
    assert_ne!(run(42), run(43));
}

#[test]
fn test_commands_tagged_in_trace() {
    let mut sim = prepare(seeded(12), two_nodes(), None).unwrap();
    sim.ping(id(1), id(2), "x").unwrap();
    sim.run_time(1).unwrap();
    let command = sim
        .trace()
        .iter()
        .find_map(|r| match r.event {
            TraceEvent::Command { channel, command, .. } => Some((channel, command, r.at)),
            _ => None,
        })
        .unwrap();
    assert_eq!(command, (Channel::Command, "ping", SimTime::ZERO));
}

#[test]
fn test_driver_errors() {
    let mut sim = Simulation::new(seeded(13));
    sim.run_time(1).unwrap();
    assert!(matches!(
        sim.advance_until(SimTime::ZERO),
        Err(SimError::Clock(ClockError::InvalidTime { .. }))
    ));

    sim.load_topology(two_nodes()).unwrap();
    assert!(matches!(sim.load_topology(two_nodes()), Err(SimError::AlreadyInitialized { .. })));
    assert!(matches!(sim.initiate_tcp(id(1), id(2)), Err(SimError::NotBooted(_))));
    assert!(matches!(sim.initiate_tcp(id(1), id(7)), Err(SimError::UnknownNode(_))));
    assert!(matches!(sim.inbox(id(7)), Err(SimError::UnknownNode(_))));

    sim.boot_all().unwrap();
    sim.boot_all().unwrap();
    assert!(matches!(
        sim.load_noise(NoiseSpec::constant(-98.0)),
        Err(SimError::AlreadyInitialized { .. })
    ));
}

/// Malformed radio input is refused before any frame is sampled
#[test]
fn test_non_finite_inputs_refused() {
    assert!(matches!(
        TopologySpec::parse("1 2 NaN"),
        Err(TopologyError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        NoiseSpec::parse("NaN"),
        Err(TopologyError::Parse { line: 1, .. })
    ));

    let mut spec = TopologySpec::new();
    spec.add_link(id(1), id(2), LinkSignal::GainDbm(f64::NAN));
    let mut sim = Simulation::new(seeded(15));
    assert!(matches!(
        sim.load_topology(spec),
        Err(SimError::Topology(TopologyError::NonFiniteGain { .. }))
    ));
    assert!(matches!(
        sim.load_noise(NoiseSpec::constant(f64::NAN)),
        Err(SimError::Topology(TopologyError::NonFiniteNoise { .. }))
    ));

    // Both rejections leave the run open for valid input
    sim.load_topology(two_nodes()).unwrap();
    sim.load_noise(NoiseSpec::constant(-98.0)).unwrap();
    sim.boot_all().unwrap();
    sim.add_channel(Channel::Neighbor);
    sim.run_time(5).unwrap();
}

/// The initiator reboots without the responder hearing a FIN
#[test]
fn test_reopen_after_initiator_reboot() {
    let mut sim = prepare(seeded(16), two_nodes(), None).unwrap();
    sim.run_time(5).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();
    for i in 0..3u8 {
        sim.tcp_send(id(1), id(2), vec![i]).unwrap();
    }
    sim.run_time(5).unwrap();

    sim.power_off(id(1)).unwrap();
    sim.boot_node(id(1)).unwrap();
    sim.run_time(10).unwrap();
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Established);

    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.tcp_send(id(1), id(2), b"new".to_vec()).unwrap();
    sim.run_time(40).unwrap();

    assert_eq!(
        sim.tcp_received(id(1), id(2)).unwrap(),
        vec![vec![0], vec![1], vec![2], b"new".to_vec()]
    );
    assert_eq!(sim.session_state(id(1), id(1), id(2)).unwrap(), SessionState::Established);
    assert!(sim.drain_session_failures().is_empty());
}

/// A pair can be opened again once a clean close finished
#[test]
fn test_reopen_after_kill() {
    let mut sim = prepare(seeded(17), two_nodes(), None).unwrap();
    sim.run_time(5).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();
    sim.tcp_send(id(1), id(2), b"first".to_vec()).unwrap();
    sim.run_time(5).unwrap();
    sim.kill_tcp(id(1), id(2)).unwrap();
    sim.run_time(10).unwrap();
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Closed);

    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();
    sim.tcp_send(id(1), id(2), b"second".to_vec()).unwrap();
    sim.run_time(5).unwrap();

    assert_eq!(
        sim.tcp_received(id(1), id(2)).unwrap(),
        vec![b"first".to_vec(), b"second".to_vec()]
    );
    assert!(sim.drain_session_failures().is_empty());
}

/// After a timeout against a dead responder, the pair works once it returns
#[test]
fn test_reopen_after_session_timeout() {
    let mut sim = prepare(seeded(18), two_nodes(), None).unwrap();
    sim.run_time(5).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.run_time(5).unwrap();
    sim.power_off(id(2)).unwrap();
    sim.tcp_send(id(1), id(2), b"lost".to_vec()).unwrap();
    sim.run_time(60).unwrap();
    assert_eq!(sim.drain_session_failures().len(), 1);

    sim.boot_node(id(2)).unwrap();
    sim.run_time(20).unwrap();
    sim.initiate_tcp(id(1), id(2)).unwrap();
    sim.tcp_send(id(1), id(2), b"back".to_vec()).unwrap();
    sim.run_time(20).unwrap();

    assert_eq!(sim.tcp_received(id(1), id(2)).unwrap(), vec![b"back".to_vec()]);
    assert_eq!(sim.session_state(id(2), id(1), id(2)).unwrap(), SessionState::Established);
    assert!(sim.drain_session_failures().is_empty());
}

#[test]
fn test_reboot_rejoins_network() {
    let mut sim = prepare(seeded(14), TopologySpec::line(3), None).unwrap();
    sim.run_time(20).unwrap();
    sim.power_off(id(3)).unwrap();
    sim.run_time(20).unwrap();
    assert!(sim.route(id(1), id(3)).is_err());

    sim.boot_node(id(3)).unwrap();
    sim.run_time(20).unwrap();
    assert_eq!(sim.route_path(id(1), id(3)).unwrap(), vec![id(1), id(2), id(3)]);
}

#[test]
fn test_neighbor_scenario_dumps_every_node() {
    let spec = TopologySpec::line(4);
    let (sim, snapshots) = scenarios::run_neighbor_discovery(seeded(15), spec, None).unwrap();
    assert_eq!(snapshots.len(), 4);
    assert_eq!(snapshots[0].neighbors.len(), 1);
    assert_eq!(snapshots[1].neighbors.len(), 2);
    assert!(snapshots.windows(2).all(|w| w[0].at < w[1].at));
    assert!(sim.now() > SimTime::from_secs(100));
}

#[test]
fn test_tcp_scenario_on_grid() {
    let text = include_str!("../topo/project1.topo");
    let noise = include_str!("../topo/no_noise.txt");
    let (_, report) = scenarios::run_tcp(
        seeded(16),
        TopologySpec::parse(text).unwrap(),
        Some(NoiseSpec::parse(noise).unwrap()),
        id(8),
        id(2),
    )
    .unwrap();
    assert!(report.path.is_some());
    assert!(report.succeeded(), "{report:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Whatever the loss pattern, the receiver sees an ordered prefix
    #[test]
    fn prop_lossy_transfer_is_ordered_prefix(seed in any::<u64>(), quality in 0.6f64..1.0) {
        let spec = TopologySpec::from_links(&[(1, 2, quality), (2, 3, quality)]).unwrap();
        let mut sim = prepare(seeded(seed), spec, None).unwrap();
        sim.run_time(20).unwrap();
        sim.initiate_tcp(id(1), id(3)).unwrap();
        sim.run_time(10).unwrap();

        let sent: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        for payload in &sent {
            sim.tcp_send(id(1), id(3), payload.clone()).unwrap();
        }
        sim.run_time(30).unwrap();

        let received = sim.tcp_received(id(1), id(3)).unwrap();
        prop_assert!(received.len() <= sent.len());
        prop_assert_eq!(&received[..], &sent[..received.len()]);
    }

    #[test]
    fn prop_clock_never_goes_back(steps in proptest::collection::vec(0u64..3_000, 1..20)) {
        let mut sim = prepare(seeded(17), TopologySpec::ring(4), None).unwrap();
        let mut last = sim.now();
        for millis in steps {
            sim.advance_time(std::time::Duration::from_millis(millis)).unwrap();
            prop_assert!(sim.now() >= last);
            last = sim.now();
        }
        let times: Vec<SimTime> = sim.trace().iter().map(|r| r.at).collect();
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}
