//! Topology and noise model
//!
//! A [`TopologySpec`] describes which motes exist and which pairs can hear
//! each other, either with an explicit quality or with an RF gain. A
//! [`NoiseSpec`] holds noise-floor readings. [`Topology::resolve`] combines
//! the two into the immutable link table the channel bus samples from.
//!
//! Builders:
//! - Line: 1 - 2 - ... - k
//! - Ring: line plus k - 1
//! - Full: every pair linked
//! - Geometric: links between positions within range, gain from path loss
//! - Parsed: `.topo` text, one `<src> <dst> <gain_dbm>` per line

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use motesim_core::{NodeId, TopologyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Noise floor assumed when no noise readings are loaded
pub const DEFAULT_NOISE_FLOOR_DBM: f64 = -98.0;

/// SNR below which a link never delivers
const SNR_CUTOFF_DB: f64 = 5.0;
/// SNR span over which quality climbs from 0 to 1
const SNR_SPAN_DB: f64 = 10.0;
/// Noise standard deviation at which the noise factor reaches 0
const NOISE_STDDEV_SPAN_DB: f64 = 20.0;

/// Received power at one metre in the geometric builder
const PATH_LOSS_REFERENCE_DBM: f64 = -55.0;
const PATH_LOSS_EXPONENT: f64 = 3.0;

/// How a link's strength is given
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSignal {
    /// Base delivery quality in `[0, 1]`
    Quality(f64),
    /// RF gain in dBm, converted against the noise floor
    GainDbm(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(default)]
    pub position: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: NodeId,
    pub b: NodeId,
    pub signal: LinkSignal,
}

/// Declarative topology description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

impl TopologySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node; declaring it again only updates the position
    pub fn add_node(&mut self, id: NodeId, position: Option<(f64, f64)>) -> &mut Self {
        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(existing) => {
                if position.is_some() {
                    existing.position = position;
                }
            }
            None => self.nodes.push(NodeSpec { id, position }),
        }
        self
    }

    /// Link two nodes, declaring both
    pub fn add_link(&mut self, a: NodeId, b: NodeId, signal: LinkSignal) -> &mut Self {
        self.add_node(a, None);
        self.add_node(b, None);
        self.links.push(LinkSpec { a, b, signal });
        self
    }

    /// 1 - 2 - ... - k at full quality
    pub fn line(count: u16) -> Self {
        let ids = NodeId::range_to(count);
        let mut spec = Self::with_nodes(&ids);
        for pair in ids.windows(2) {
            spec.add_link(pair[0], pair[1], LinkSignal::Quality(1.0));
        }
        spec
    }

    /// Line closed back to node 1
    pub fn ring(count: u16) -> Self {
        let mut spec = Self::line(count);
        let ids = NodeId::range_to(count);
        if let (Some(first), Some(last)) = (ids.first(), ids.last())
            && ids.len() > 2
        {
            spec.add_link(*last, *first, LinkSignal::Quality(1.0));
        }
        spec
    }

    /// Every pair linked at full quality
    pub fn full(count: u16) -> Self {
        let ids = NodeId::range_to(count);
        let mut spec = Self::with_nodes(&ids);
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                spec.add_link(*a, *b, LinkSignal::Quality(1.0));
            }
        }
        spec
    }

    /// Build from `(a, b, quality)` triples
    pub fn from_links(links: &[(u16, u16, f64)]) -> Result<Self, TopologyError> {
        let mut spec = Self::new();
        for (a, b, quality) in links {
            let a = NodeId::try_from(*a)?;
            let b = NodeId::try_from(*b)?;
            if !(0.0..=1.0).contains(quality) {
                return Err(TopologyError::InvalidQuality {
                    a,
                    b,
                    quality: *quality,
                });
            }
            spec.add_link(a, b, LinkSignal::Quality(*quality));
        }
        Ok(spec)
    }

    /// Nodes at the given positions (ids 1..), linked when within `range`
    ///
    /// Gain follows a log-distance path-loss model, so it still depends on
    /// the noise floor loaded later.
    pub fn geometric(positions: &[(f64, f64)], range: f64) -> Self {
        let ids = NodeId::range_to(positions.len() as u16);
        let mut spec = Self::new();
        for (id, position) in ids.iter().zip(positions) {
            spec.add_node(*id, Some(*position));
        }
        for (i, (a, pa)) in ids.iter().zip(positions).enumerate() {
            for (b, pb) in ids[i + 1..].iter().zip(&positions[i + 1..]) {
                let distance = ((pa.0 - pb.0).powi(2) + (pa.1 - pb.1).powi(2)).sqrt();
                if distance <= range {
                    spec.add_link(*a, *b, LinkSignal::GainDbm(path_loss_gain(distance)));
                }
            }
        }
        spec
    }

    /// Parse the `.topo` text format
    ///
    /// One link per line as `<src> <dst> <gain_dbm>`, optionally prefixed
    /// with `gain`. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut spec = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let mut fields: Vec<&str> = content.split_whitespace().collect();
            if fields.first().is_some_and(|f| f.eq_ignore_ascii_case("gain")) {
                fields.remove(0);
            }
            let [src, dst, gain] = fields.as_slice() else {
                return Err(TopologyError::Parse {
                    line,
                    reason: format!("expected `<src> <dst> <gain>`, found {} fields", fields.len()),
                });
            };
            let src: NodeId = src.parse().map_err(|e| at_line(line, e))?;
            let dst: NodeId = dst.parse().map_err(|e| at_line(line, e))?;
            let gain = parse_finite(gain, line, "gain")?;
            if src == dst {
                return Err(TopologyError::SelfLink(src));
            }
            spec.add_link(src, dst, LinkSignal::GainDbm(gain));
        }
        debug!(nodes = spec.nodes.len(), links = spec.links.len(), "Topology parsed");
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        Self::parse(&read_file(path.as_ref())?)
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    fn with_nodes(ids: &[NodeId]) -> Self {
        let mut spec = Self::new();
        for id in ids {
            spec.add_node(*id, None);
        }
        spec
    }
}

/// Noise-floor readings in dBm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpec {
    readings: Vec<f64>,
}

impl NoiseSpec {
    pub fn new(readings: Vec<f64>) -> Result<Self, TopologyError> {
        if readings.is_empty() {
            return Err(TopologyError::EmptyNoise);
        }
        if let Some(reading) = readings.iter().copied().find(|r| !r.is_finite()) {
            return Err(TopologyError::NonFiniteNoise { reading });
        }
        Ok(Self { readings })
    }

    /// A perfectly steady floor
    pub fn constant(floor_dbm: f64) -> Self {
        Self {
            readings: vec![floor_dbm],
        }
    }

    /// One reading per line; blank lines and `#` comments skipped
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut readings = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            readings.push(parse_finite(content, index + 1, "noise reading")?);
        }
        Self::new(readings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        Self::parse(&read_file(path.as_ref())?)
    }

    pub fn readings(&self) -> &[f64] {
        &self.readings
    }

    /// Mean reading
    pub fn floor(&self) -> f64 {
        self.readings.iter().sum::<f64>() / self.readings.len() as f64
    }

    /// Delivery multiplier: 1 for a steady floor, falling with its spread
    pub fn factor(&self) -> f64 {
        let mean = self.floor();
        let variance = self
            .readings
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / self.readings.len() as f64;
        (1.0 - variance.sqrt() / NOISE_STDDEV_SPAN_DB).clamp(0.0, 1.0)
    }
}

/// Map an RF gain to a base quality against the noise floor
pub fn gain_to_quality(gain_dbm: f64, floor_dbm: f64) -> f64 {
    ((gain_dbm - floor_dbm - SNR_CUTOFF_DB) / SNR_SPAN_DB).clamp(0.0, 1.0)
}

fn path_loss_gain(distance: f64) -> f64 {
    PATH_LOSS_REFERENCE_DBM - 10.0 * PATH_LOSS_EXPONENT * distance.max(1.0).log10()
}

/// Parse a decimal field, rejecting NaN and infinities
fn parse_finite(raw: &str, line: usize, what: &str) -> Result<f64, TopologyError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(TopologyError::Parse {
            line,
            reason: format!("invalid {what} {raw:?}"),
        }),
    }
}

fn at_line(line: usize, error: TopologyError) -> TopologyError {
    match error {
        TopologyError::InvalidNodeId { raw } => TopologyError::Parse {
            line,
            reason: format!("invalid node id {raw:?}"),
        },
        other => other,
    }
}

fn read_file(path: &Path) -> Result<String, TopologyError> {
    fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolved, immutable topology shared read-only by the whole run
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: BTreeMap<NodeId, Option<(f64, f64)>>,
    /// Base quality keyed by `(low id, high id)`
    links: BTreeMap<(NodeId, NodeId), f64>,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    noise_floor: f64,
    noise_factor: f64,
}

impl Default for Topology {
    /// No nodes, no links, default noise floor
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            adjacency: BTreeMap::new(),
            noise_floor: DEFAULT_NOISE_FLOOR_DBM,
            noise_factor: 1.0,
        }
    }
}

impl Topology {
    /// Combine a topology with an optional noise model
    ///
    /// A pair listed more than once keeps its weakest quality.
    pub fn resolve(spec: &TopologySpec, noise: Option<&NoiseSpec>) -> Result<Self, TopologyError> {
        let noise_floor = noise.map_or(DEFAULT_NOISE_FLOOR_DBM, NoiseSpec::floor);
        let noise_factor = noise.map_or(1.0, NoiseSpec::factor);
        if !noise_floor.is_finite() {
            return Err(TopologyError::NonFiniteNoise { reading: noise_floor });
        }

        let nodes: BTreeMap<NodeId, Option<(f64, f64)>> =
            spec.nodes.iter().map(|n| (n.id, n.position)).collect();
        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> =
            nodes.keys().map(|id| (*id, BTreeSet::new())).collect();
        let mut links: BTreeMap<(NodeId, NodeId), f64> = BTreeMap::new();

        for link in &spec.links {
            let (a, b) = (link.a, link.b);
            if a == b {
                return Err(TopologyError::SelfLink(a));
            }
            if !nodes.contains_key(&a) || !nodes.contains_key(&b) {
                return Err(TopologyError::DanglingLink { a, b });
            }
            let quality = match link.signal {
                LinkSignal::Quality(q) if (0.0..=1.0).contains(&q) => q,
                LinkSignal::Quality(quality) => {
                    return Err(TopologyError::InvalidQuality { a, b, quality });
                }
                LinkSignal::GainDbm(gain) if gain.is_finite() => gain_to_quality(gain, noise_floor),
                LinkSignal::GainDbm(gain) => {
                    return Err(TopologyError::NonFiniteGain { a, b, gain });
                }
            };
            let key = (a.min(b), a.max(b));
            links
                .entry(key)
                .and_modify(|q| *q = q.min(quality))
                .or_insert(quality);
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        debug!(
            nodes = nodes.len(),
            links = links.len(),
            noise_floor,
            noise_factor,
            "Topology resolved"
        );
        Ok(Self {
            nodes,
            links,
            adjacency,
            noise_floor,
            noise_factor,
        })
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.nodes.get(&node).copied().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Base quality of the link between two nodes, if linked
    pub fn base_quality(&self, a: NodeId, b: NodeId) -> Option<f64> {
        self.links.get(&(a.min(b), a.max(b))).copied()
    }

    /// Per-attempt delivery probability: base quality times the noise factor
    pub fn delivery_probability(&self, a: NodeId, b: NodeId) -> Option<f64> {
        self.base_quality(a, b).map(|q| q * self.noise_factor)
    }

    /// Linked neighbors in ascending id order
    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.get(&node).into_iter().flatten().copied()
    }

    pub fn noise_floor(&self) -> f64 {
        self.noise_floor
    }

    pub fn noise_factor(&self) -> f64 {
        self.noise_factor
    }

    /// ASCII adjacency listing with link qualities
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n", self.link_count()));
        output.push_str(&format!(
            "  Noise: floor {:.1} dBm, factor {:.2}\n\n",
            self.noise_floor, self.noise_factor
        ));
        for (node, neighbors) in &self.adjacency {
            let listed: Vec<String> = neighbors
                .iter()
                .map(|n| match self.base_quality(*node, *n) {
                    Some(q) => format!("{n}({q:.2})"),
                    None => n.to_string(),
                })
                .collect();
            output.push_str(&format!("  {} -> [{}]\n", node, listed.join(", ")));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[test]
    fn test_line_topology() {
        let topo = Topology::resolve(&TopologySpec::line(4), None).unwrap();
        assert_eq!(topo.node_count(), 4);
        assert_eq!(topo.link_count(), 3);
        assert_eq!(topo.base_quality(id(2), id(3)), Some(1.0));
        assert_eq!(topo.base_quality(id(1), id(3)), None);
        assert_eq!(topo.neighbors(id(2)).collect::<Vec<_>>(), vec![id(1), id(3)]);
    }

    #[test]
    fn test_ring_and_full() {
        let ring = Topology::resolve(&TopologySpec::ring(5), None).unwrap();
        assert_eq!(ring.link_count(), 5);
        assert!(ring.base_quality(id(5), id(1)).is_some());

        let full = Topology::resolve(&TopologySpec::full(5), None).unwrap();
        assert_eq!(full.link_count(), 10);
    }

    #[test]
    fn test_gain_to_quality() {
        assert_eq!(gain_to_quality(-98.0, -98.0), 0.0);
        assert_eq!(gain_to_quality(-93.0, -98.0), 0.0);
        assert!((gain_to_quality(-88.0, -98.0) - 0.5).abs() < 1e-9);
        assert_eq!(gain_to_quality(-83.0, -98.0), 1.0);
        assert_eq!(gain_to_quality(-40.0, -98.0), 1.0);
    }

    #[test]
    fn test_parse_topo_text() {
        let text = "# two motes\n1 2 -54.0\n\ngain 2 1 -90.0\n2 3 -60 # trailing\n";
        let spec = TopologySpec::parse(text).unwrap();
        assert_eq!(spec.node_ids().len(), 3);
        assert_eq!(spec.links.len(), 3);

        // Both directions given: the weaker one wins
        let topo = Topology::resolve(&spec, None).unwrap();
        assert!((topo.base_quality(id(1), id(2)).unwrap() - 0.3).abs() < 1e-9);
        assert_eq!(topo.base_quality(id(2), id(3)), Some(1.0));
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = TopologySpec::parse("1 2 -50\n1 2\n").unwrap_err();
        assert!(matches!(err, TopologyError::Parse { line: 2, .. }));

        let err = TopologySpec::parse("1 x -50\n").unwrap_err();
        assert!(matches!(err, TopologyError::Parse { line: 1, .. }));

        let err = TopologySpec::parse("0 1 -50\n").unwrap_err();
        assert!(matches!(err, TopologyError::Parse { line: 1, .. }));

        let err = TopologySpec::parse("1 2 loud\n").unwrap_err();
        assert!(matches!(err, TopologyError::Parse { line: 1, .. }));

        let err = TopologySpec::parse("3 3 -50\n").unwrap_err();
        assert!(matches!(err, TopologyError::SelfLink(_)));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for text in ["1 2 NaN\n", "1 2 -50\n2 3 inf\n", "gain 1 2 -infinity\n"] {
            assert!(
                matches!(TopologySpec::parse(text), Err(TopologyError::Parse { .. })),
                "{text:?} should not parse"
            );
        }
        assert!(matches!(
            TopologySpec::parse("1 2 -50\n2 3 inf\n"),
            Err(TopologyError::Parse { line: 2, .. })
        ));

        assert!(matches!(
            NoiseSpec::parse("-98\nNaN\n"),
            Err(TopologyError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            NoiseSpec::new(vec![-98.0, f64::INFINITY]),
            Err(TopologyError::NonFiniteNoise { .. })
        ));

        let mut spec = TopologySpec::new();
        spec.add_link(id(1), id(2), LinkSignal::GainDbm(f64::NAN));
        assert!(matches!(
            Topology::resolve(&spec, None),
            Err(TopologyError::NonFiniteGain { .. })
        ));
        assert!(matches!(
            TopologySpec::from_links(&[(1, 2, f64::NAN)]),
            Err(TopologyError::InvalidQuality { .. })
        ));
    }

    #[test]
    fn test_from_links_validates_quality() {
        assert!(TopologySpec::from_links(&[(1, 2, 0.5)]).is_ok());
        assert!(matches!(
            TopologySpec::from_links(&[(1, 2, 1.5)]),
            Err(TopologyError::InvalidQuality { .. })
        ));
        assert!(matches!(
            TopologySpec::from_links(&[(0, 2, 0.5)]),
            Err(TopologyError::InvalidNodeId { .. })
        ));
    }

    #[test]
    fn test_dangling_link_rejected() {
        let spec = TopologySpec {
            nodes: vec![NodeSpec {
                id: id(1),
                position: None,
            }],
            links: vec![LinkSpec {
                a: id(1),
                b: id(2),
                signal: LinkSignal::Quality(1.0),
            }],
        };
        assert!(matches!(
            Topology::resolve(&spec, None),
            Err(TopologyError::DanglingLink { .. })
        ));
    }

    #[test]
    fn test_noise_model() {
        let steady = NoiseSpec::parse("-98\n-98\n# comment\n-98\n").unwrap();
        assert_eq!(steady.floor(), -98.0);
        assert_eq!(steady.factor(), 1.0);

        // stddev 10 dB halves delivery
        let noisy = NoiseSpec::new(vec![-108.0, -88.0]).unwrap();
        assert_eq!(noisy.floor(), -98.0);
        assert!((noisy.factor() - 0.5).abs() < 1e-9);

        assert!(matches!(NoiseSpec::parse("\n# nothing\n"), Err(TopologyError::EmptyNoise)));
        assert!(matches!(
            NoiseSpec::parse("-98\nquiet\n"),
            Err(TopologyError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_noise_scales_delivery() {
        let spec = TopologySpec::from_links(&[(1, 2, 0.8)]).unwrap();
        let noise = NoiseSpec::new(vec![-108.0, -88.0]).unwrap();
        let topo = Topology::resolve(&spec, Some(&noise)).unwrap();
        assert_eq!(topo.base_quality(id(1), id(2)), Some(0.8));
        assert!((topo.delivery_probability(id(1), id(2)).unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_geometric_links_within_range() {
        let spec = TopologySpec::geometric(&[(0.0, 0.0), (5.0, 0.0), (30.0, 0.0)], 20.0);
        let topo = Topology::resolve(&spec, None).unwrap();
        assert_eq!(topo.position(id(3)), Some((30.0, 0.0)));
        assert!(topo.base_quality(id(1), id(2)).unwrap() > 0.9);
        assert!(topo.base_quality(id(2), id(3)).is_none());
        assert!(topo.base_quality(id(1), id(3)).is_none());
    }

    #[test]
    fn test_visualize_lists_links() {
        let topo = Topology::resolve(&TopologySpec::line(3), None).unwrap();
        let rendered = topo.visualize();
        assert!(rendered.contains("Nodes: 3"));
        assert!(rendered.contains("2 -> [1(1.00), 3(1.00)]"));
    }
}
