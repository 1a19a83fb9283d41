//! Multiplexer tree routing
//!
//! Modules sit behind cascaded mux chips; each chip connects its upstream
//! bus to at most one of up to eight downstream channels, controlled by a
//! one-byte bitmask register. Selecting a module means activating the
//! unique root-to-leaf path of (chip, channel) edges that reaches it, and
//! the tree guarantees at most one leaf is reachable at any time.
//!
//! Register writes are the expensive resource here, so path switches are
//! diffed against the cached previous path: identical prefixes cost
//! nothing, and a repeated selection costs zero writes. Hardware state is
//! never read back; the cached per-node bitmask mirrors the last write.

use crate::error::{Error, Result};
use crate::i2c::{DEFAULT_TIMEOUT, I2cBus};
use tracing::{debug, trace};

/// Widest mux chip supported (one bitmask bit per channel)
pub const MAX_CHANNELS: u8 = 8;

/// 1-based front-panel module index
///
/// Index 0 is the "no module" sentinel and is unrepresentable; deselection
/// is expressed as `None` at the API level. The only 1-based to 0-based
/// conversion in the codebase is [`ModuleId::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(u16);

impl ModuleId {
    /// Create a module ID; `None` for 0
    pub fn new(value: u16) -> Option<ModuleId> {
        if value == 0 { None } else { Some(ModuleId(value)) }
    }

    /// The 1-based value
    pub fn value(self) -> u16 {
        self.0
    }

    /// The 0-based array index
    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One layer of the tree: the chip addresses in module order, and how many
/// channels each chip fans out to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxLayer {
    pub addresses: Vec<u8>,
    pub width: u8,
}

/// Static per-platform tree shape, root layer first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxTopology {
    pub layers: Vec<MuxLayer>,
}

impl MuxTopology {
    /// Single mux directly fanning out to `width` modules
    pub fn single(address: u8, width: u8) -> MuxTopology {
        MuxTopology {
            layers: vec![MuxLayer {
                addresses: vec![address],
                width,
            }],
        }
    }

    /// Number of modules the tree reaches
    pub fn num_modules(&self) -> usize {
        match self.layers.last() {
            Some(leaf) => leaf.addresses.len() * usize::from(leaf.width),
            None => 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidArgument(
                "mux topology needs at least one layer".to_string(),
            ));
        }
        let total = self.num_modules();
        if total > usize::from(u16::MAX) {
            return Err(Error::InvalidArgument(format!(
                "mux topology reaches {} modules, more than module IDs can number",
                total
            )));
        }
        for (depth, layer) in self.layers.iter().enumerate() {
            if layer.width == 0 || layer.width > MAX_CHANNELS {
                return Err(Error::InvalidArgument(format!(
                    "mux layer {} width {} out of range 1..={}",
                    depth, layer.width, MAX_CHANNELS
                )));
            }
            if layer.addresses.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "mux layer {} has no chips",
                    depth
                )));
            }
            // Every chip must serve the same whole number of modules, and
            // every channel a whole share of its chip.
            let chips = layer.addresses.len();
            if total % chips != 0 || (total / chips) % usize::from(layer.width) != 0 {
                return Err(Error::InvalidArgument(format!(
                    "mux layer {}: {} chips of width {} cannot evenly cover {} modules",
                    depth, chips, layer.width, total
                )));
            }
            // Each layer's chips must also spread evenly over the channels
            // of the layer above, or paths would alias chips across
            // channels.
            if depth > 0 {
                let parent = &self.layers[depth - 1];
                let channels = parent.addresses.len() * usize::from(parent.width);
                if chips % channels != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "mux layer {}: {} chips cannot be spread evenly over {} upstream channels",
                        depth, chips, channels
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One (chip, channel) edge on a path; `node` is an arena index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    node: usize,
    channel: u8,
}

/// One mux chip's runtime state
#[derive(Debug)]
struct MuxNode {
    address: u8,
    /// Mirror of the last bitmask written to the chip; never read back
    mask: u8,
}

/// The multiplexer tree for one platform
///
/// Built once at bus open from a [`MuxTopology`]; all state transitions
/// happen through [`initialize`](MuxTree::initialize) and
/// [`select`](MuxTree::select).
pub struct MuxTree {
    topology: MuxTopology,
    /// Arena of nodes, layer-major, root layer first
    nodes: Vec<MuxNode>,
    /// Arena offset of each layer's first node
    layer_start: Vec<usize>,
    /// Leaf of the currently active path
    selected: Option<ModuleId>,
}

impl MuxTree {
    /// Build a tree from a validated topology
    pub fn new(topology: MuxTopology) -> Result<MuxTree> {
        topology.validate()?;

        let mut nodes = Vec::new();
        let mut layer_start = Vec::with_capacity(topology.layers.len());
        for layer in &topology.layers {
            layer_start.push(nodes.len());
            for &address in &layer.addresses {
                nodes.push(MuxNode { address, mask: 0 });
            }
        }

        Ok(MuxTree {
            topology,
            nodes,
            layer_start,
            selected: None,
        })
    }

    /// Number of modules the tree reaches
    pub fn num_modules(&self) -> usize {
        self.topology.num_modules()
    }

    /// Leaf of the currently active path
    pub fn selected(&self) -> Option<ModuleId> {
        self.selected
    }

    /// Cached bitmask of the chip at (`layer`, `chip`)
    pub fn node_mask(&self, layer: usize, chip: usize) -> u8 {
        self.nodes[self.layer_start[layer] + chip].mask
    }

    /// Write a zero mask to every chip in the tree
    ///
    /// Chips power up with undefined channel state, so the very first thing
    /// a bus does after open is force the whole tree to a known-clear
    /// state. Writes are unconditional; the cache means nothing yet.
    pub fn initialize<B: I2cBus>(&mut self, bus: &mut B) -> Result<()> {
        debug!("clearing {} mux chips", self.nodes.len());
        for id in 0..self.nodes.len() {
            self.write_mask(bus, id, 0)?;
        }
        self.selected = None;
        Ok(())
    }

    /// Route the tree to `module`, or tear the active path down for `None`
    ///
    /// Performs the minimum number of register writes to get from the
    /// cached previous path to the new one: shared path prefixes are left
    /// untouched, and repeating the previous selection writes nothing.
    pub fn select<B: I2cBus>(&mut self, bus: &mut B, module: Option<ModuleId>) -> Result<()> {
        if let Some(m) = module {
            if m.index() >= self.num_modules() {
                return Err(Error::InvalidArgument(format!(
                    "module {} out of range 1..={}",
                    m,
                    self.num_modules()
                )));
            }
        }

        if module == self.selected {
            return Ok(());
        }

        match (self.selected, module) {
            (None, None) => {}
            (Some(old), None) => {
                trace!("deselecting module {}", old);
                let old_path = self.path_of(old);
                // One write: clearing the root edge makes every descendant
                // electrically unreachable. Their cached masks are zeroed
                // without writes; the next path through them rewrites them
                // unconditionally.
                self.write_mask(bus, old_path[0].node, 0)?;
                for edge in &old_path[1..] {
                    self.nodes[edge.node].mask = 0;
                }
            }
            (None, Some(new)) => {
                trace!("selecting module {} from idle", new);
                let new_path = self.path_of(new);
                // Root to leaf: a child write is meaningless until its
                // parent channel is live.
                for edge in &new_path {
                    self.write_mask(bus, edge.node, 1 << edge.channel)?;
                }
            }
            (Some(old), Some(new)) => {
                let old_path = self.path_of(old);
                let new_path = self.path_of(new);
                let depth = old_path
                    .iter()
                    .zip(&new_path)
                    .position(|(a, b)| a != b)
                    .unwrap_or(old_path.len());
                trace!("switching module {} -> {}, divergence depth {}", old, new, depth);

                self.clear_below(bus, &old_path, &new_path, depth)?;
                for edge in &new_path[depth..] {
                    self.write_mask(bus, edge.node, 1 << edge.channel)?;
                }
            }
        }

        self.selected = module;
        Ok(())
    }

    /// Remove every remnant of the old path from the divergence depth down
    ///
    /// If the chips differ at the divergence depth, the old chip is cleared
    /// outright (the new chip's write does not touch it). If only the
    /// channel differs, the chip itself gets rewritten by the selection
    /// pass, but any chip under the old channel would be left dangling on
    /// the shared downstream segment, so that whole sub-layer is cleared.
    /// Deeper old-path chips are cleared for the same reason.
    fn clear_below<B: I2cBus>(
        &mut self,
        bus: &mut B,
        old_path: &[Edge],
        new_path: &[Edge],
        depth: usize,
    ) -> Result<()> {
        if depth >= old_path.len() {
            return Ok(());
        }

        let mut remaining = &old_path[depth..];
        if old_path[depth].node != new_path[depth].node {
            self.write_mask(bus, old_path[depth].node, 0)?;
        } else {
            for chip in self.children_of(depth, old_path[depth]) {
                if self.nodes[chip].mask != 0 {
                    self.write_mask(bus, chip, 0)?;
                }
            }
        }
        remaining = &remaining[1..];

        for edge in remaining {
            if self.nodes[edge.node].mask != 0 {
                self.write_mask(bus, edge.node, 0)?;
            }
        }
        Ok(())
    }

    /// Root-to-leaf edges reaching `module`
    fn path_of(&self, module: ModuleId) -> Vec<Edge> {
        let index = module.index();
        let total = self.num_modules();

        let mut path = Vec::with_capacity(self.topology.layers.len());
        for (depth, layer) in self.topology.layers.iter().enumerate() {
            let per_chip = total / layer.addresses.len();
            let per_channel = per_chip / usize::from(layer.width);
            let chip = index / per_chip;
            let channel = ((index % per_chip) / per_channel) as u8;
            path.push(Edge {
                node: self.layer_start[depth] + chip,
                channel,
            });
        }
        path
    }

    /// Arena indices of the chips one layer below the given edge
    fn children_of(&self, depth: usize, edge: Edge) -> std::ops::Range<usize> {
        let next = depth + 1;
        if next >= self.topology.layers.len() {
            return 0..0;
        }
        let layer = &self.topology.layers[depth];
        let chip = edge.node - self.layer_start[depth];
        let below = self.topology.layers[next].addresses.len();
        // Chips per channel in the next layer.
        let per_channel = below / (layer.addresses.len() * usize::from(layer.width));
        let first = self.layer_start[next]
            + (chip * usize::from(layer.width) + usize::from(edge.channel)) * per_channel;
        first..first + per_channel
    }

    fn write_mask<B: I2cBus>(&mut self, bus: &mut B, node: usize, mask: u8) -> Result<()> {
        let address = self.nodes[node].address;
        trace!("mux {:#04x} <- mask {:#010b}", address, mask);
        bus.write(address, &[mask], DEFAULT_TIMEOUT)?;
        self.nodes[node].mask = mask;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_conversion() {
        assert_eq!(ModuleId::new(0), None);
        let m = ModuleId::new(1).unwrap();
        assert_eq!(m.value(), 1);
        assert_eq!(m.index(), 0);
        assert_eq!(ModuleId::new(256).unwrap().index(), 255);
    }

    #[test]
    fn test_topology_validation() {
        assert!(MuxTree::new(MuxTopology { layers: vec![] }).is_err());
        assert!(
            MuxTree::new(MuxTopology {
                layers: vec![MuxLayer {
                    addresses: vec![0x70],
                    width: 9,
                }],
            })
            .is_err()
        );
        // 3 leaf chips cannot be evenly shared by a width-8 root with 2
        // channels' worth of fanout.
        assert!(
            MuxTree::new(MuxTopology {
                layers: vec![
                    MuxLayer {
                        addresses: vec![0x70],
                        width: 2,
                    },
                    MuxLayer {
                        addresses: vec![0x71, 0x72, 0x73],
                        width: 8,
                    },
                ],
            })
            .is_err()
        );
        // 2 leaf chips cannot cover the root's 8 channels either.
        assert!(
            MuxTree::new(MuxTopology {
                layers: vec![
                    MuxLayer {
                        addresses: vec![0x70],
                        width: 8,
                    },
                    MuxLayer {
                        addresses: vec![0x71, 0x72],
                        width: 8,
                    },
                ],
            })
            .is_err()
        );
        assert!(MuxTree::new(MuxTopology::single(0x70, 8)).is_ok());
    }

    #[test]
    fn test_topology_caps_module_count_at_id_range() {
        // 8192 chips of width 8 would reach 65536 modules, one past what
        // a ModuleId can number.
        assert!(
            MuxTree::new(MuxTopology {
                layers: vec![MuxLayer {
                    addresses: vec![0x70; 8192],
                    width: 8,
                }],
            })
            .is_err()
        );
        assert!(
            MuxTree::new(MuxTopology {
                layers: vec![MuxLayer {
                    addresses: vec![0x70; 8191],
                    width: 8,
                }],
            })
            .is_ok()
        );
    }

    #[test]
    fn test_path_shape_two_layers() {
        // 2 roots of width 8, 32 leaf chips of width 8: 256 modules.
        let tree = MuxTree::new(two_layer()).unwrap();
        assert_eq!(tree.num_modules(), 256);

        let path = tree.path_of(ModuleId::new(1).unwrap());
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], Edge { node: 0, channel: 0 });
        assert_eq!(path[1], Edge { node: 2, channel: 0 });

        let path = tree.path_of(ModuleId::new(256).unwrap());
        assert_eq!(path[0], Edge { node: 1, channel: 7 });
        assert_eq!(path[1], Edge { node: 33, channel: 7 });
    }

    #[test]
    fn test_children_of() {
        let tree = MuxTree::new(two_layer()).unwrap();
        // Root chip 0, channel 0 feeds leaf chips 0..2.
        let children = tree.children_of(0, Edge { node: 0, channel: 0 });
        assert_eq!(children, 2..4);
        let children = tree.children_of(0, Edge { node: 1, channel: 7 });
        assert_eq!(children, 32..34);
        // Leaves have no children.
        let children = tree.children_of(1, Edge { node: 2, channel: 0 });
        assert_eq!(children, 0..0);
    }

    fn two_layer() -> MuxTopology {
        MuxTopology {
            layers: vec![
                MuxLayer {
                    addresses: vec![0x70, 0x71],
                    width: 8,
                },
                MuxLayer {
                    addresses: (0u8..32).map(|i| 0x20 + i).collect(),
                    width: 8,
                },
            ],
        }
    }
}
