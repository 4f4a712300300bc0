//! Shared data types for the routing core: addresses, the advertisable
//! network-node descriptor, and the routing-table entry that wraps it.

/// A node's 16-bit on-air identity.
pub type Address = u16;

/// Reserved address meaning "every one-hop neighbor".
pub const ADDRESS_BROADCAST: Address = 0xFFFF;

/// Reserved address meaning "unknown / no route", returned by lookups that miss.
pub const ADDRESS_UNKNOWN: Address = 0x0000;

/// Ceiling (and worst value) for both the composite route metric and the
/// per-direction link-quality estimates. Lower metric is better; higher
/// link quality is better.
pub const MAX_METRIC: u8 = 255;

/// Penalty applied per hop in the metric formula. A small integer scalar,
/// not a config knob: tuning it changes the shape of the whole network's
/// route preference, not a single node's behavior.
pub const REDUCED_FACTOR_HOP_COUNT: u8 = 1;

/// Bitfield of advertised node capabilities. `DEFAULT` advertises nothing
/// beyond basic routing participation.
pub type Role = u8;
pub const ROLE_DEFAULT: Role = 0;

/// Upper bound on routing-table size enforced when merging externally
/// advertised routes (ROUTE packets / multi-hop learning). Not exposed
/// through `RoutingConfig` since it's an internal safety bound rather
/// than a deployment-tunable knob; mirrors the original's `RTMAXSIZE`
/// compile-time constant.
pub const RT_MAX_SIZE: usize = 128;

/// The advertisable descriptor for a destination, as carried in HELLO and
/// ROUTE beacons and returned by [`crate::routing_table::RoutingTable::all_network_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkNode {
    pub address: Address,
    /// 0..=255, lower is better; 255 means unreachable.
    pub metric: u8,
    pub role: Role,
    pub hop_count: u8,
}

/// A single `{neighbor, observed quality}` pair as carried in a HELLO beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloPacketNode {
    pub address: Address,
    pub received_link_quality: u8,
}

/// A routing-table entry: a [`NetworkNode`] plus the local bookkeeping
/// needed to compute and refresh its metric and to expire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteNode {
    pub node: NetworkNode,
    /// Next hop to reach `node.address`. Equals `node.address` for a
    /// one-hop neighbor.
    pub via: Address,
    /// This node's estimate of how reliably it receives from `via`.
    pub received_link_quality: u8,
    /// `via`'s own estimate of how reliably it receives from us, as
    /// reported in its HELLO beacon.
    pub transmitted_link_quality: u8,
    /// Cached composite metric fed into the quality term of the metric
    /// formula. For a pure one-hop neighbor this is set once at insertion
    /// and never touched again by `update_metric` (matching the source);
    /// for a route learned from a ROUTE advertisement it tracks the
    /// metric most recently advertised by the next hop.
    pub received_metric: u8,
    /// Signed SNR of the most recent frame received from `via`.
    pub received_snr: i8,
    /// Monotonic-ms deadline; the entry is evicted once `now` passes it.
    pub timeout_deadline: u64,
    /// Set once any HELLO has been received directly from this neighbor.
    pub has_received_hello: bool,
}

impl RouteNode {
    /// True for a direct, one-hop neighbor (`via == address`).
    pub fn is_one_hop(&self) -> bool {
        self.via == self.node.address
    }
}
