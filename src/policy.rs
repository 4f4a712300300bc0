//! Routing policy (C5): the two forwarding disciplines a node can run,
//! grounded on the original's `VectorRouting` / `FloodingRouting` pair.
//!
//! Both policies answer exactly two questions:
//! - `route_received` — given a DATA packet that just arrived and is not
//!   addressed to us directly, should we accept it onto the transmit
//!   queue for onward relay, or drop it? This is a decision about the
//!   packet's *already-set* `via`/`hops` fields, not a table lookup —
//!   vector routing accepts only a packet whose `via` names us as the
//!   specific relay the previous hop chose; flooding accepts a broadcast
//!   rebroadcast or one explicitly relayed through us.
//! - `annotate_before_send` — given a packet about to leave the radio
//!   (whether locally originated or just accepted for relay), resolve
//!   *this* node's own next hop and write it into `via`/`hops`. This is
//!   the one operation that does consult the routing table.
//!
//! Local delivery (`dst == local_address` or a broadcast this node is
//! configured to consume) is decided by the forwarding pipeline before
//! either of these runs; both policies only see packets the pipeline
//! didn't already resolve as "for me".

use crate::config::PolicyKind;
use crate::routing_table::RoutingTable;
use crate::types::{Address, ADDRESS_BROADCAST, ADDRESS_UNKNOWN};

/// Whether `route_received` accepts a just-arrived DATA packet for
/// onward relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveDecision {
    /// Queue for relay; `annotate_before_send` will resolve our own next hop.
    AcceptForRelay,
    /// Count and log, do not retransmit.
    Drop { reason: &'static str },
}

/// Whether `annotate_before_send` cleared a packet for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    Clear { via: Address, hops: u8 },
    Veto { reason: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub enum RoutingPolicy {
    Vector,
    Flooding,
}

impl From<PolicyKind> for RoutingPolicy {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Vector => RoutingPolicy::Vector,
            PolicyKind::Flooding => RoutingPolicy::Flooding,
        }
    }
}

impl RoutingPolicy {
    /// `packet.via == local_address` for vector routing means a previous
    /// hop specifically chose us as its next hop for this packet — any
    /// other copy we overhear (same broadcast medium, different intended
    /// relay) is not ours to act on. Flooding instead keys off whether
    /// the packet is still mid-flood (`via == broadcast`) or was, unusually,
    /// relayed to us directly, and enforces the hop limit itself since
    /// there's no table lookup to naturally fail on indirection.
    pub fn route_received(&self, local_address: Address, via: Address, hops: u8) -> ReceiveDecision {
        match self {
            RoutingPolicy::Vector => {
                if via == local_address {
                    ReceiveDecision::AcceptForRelay
                } else {
                    ReceiveDecision::Drop { reason: "not addressed via us" }
                }
            }
            RoutingPolicy::Flooding => {
                if hops == 0 {
                    ReceiveDecision::Drop { reason: "hop limit exceeded" }
                } else if via == ADDRESS_BROADCAST || via == local_address {
                    ReceiveDecision::AcceptForRelay
                } else {
                    ReceiveDecision::Drop { reason: "not addressed via us" }
                }
            }
        }
    }

    /// Resolves the next hop for a packet about to be transmitted, whether
    /// it originated here or was just accepted for relay. `via` is the
    /// packet's *current* field value (broadcast for a packet still
    /// mid-flood, a specific address for one already resolved to a next
    /// hop). Broadcast destinations always clear, since neither policy can
    /// usefully refuse to propagate a flood.
    ///
    /// Vector routing ignores `via` entirely and always resolves fresh
    /// from the table, vetoing if nothing is known. Flooding branches on
    /// `via`: a packet still carrying `via == broadcast` just has its hop
    /// limit decremented and keeps flooding, with no table lookup; one
    /// that already names a specific relay is treated exactly like vector
    /// routing for that one hop, including the veto — flooding never
    /// falls back to rebroadcasting a packet whose `via` has already been
    /// narrowed to a unicast hop that turns out to be unreachable.
    pub fn annotate_before_send(&self, table: &RoutingTable, dst: Address, via: Address, hops: u8) -> SendDecision {
        if dst == ADDRESS_BROADCAST {
            return SendDecision::Clear { via: ADDRESS_BROADCAST, hops };
        }

        if matches!(self, RoutingPolicy::Flooding) && via == ADDRESS_BROADCAST {
            return SendDecision::Clear { via: ADDRESS_BROADCAST, hops: hops.saturating_sub(1) };
        }

        match table.route_to(dst) {
            Some(route) if route.via != ADDRESS_UNKNOWN => SendDecision::Clear { via: route.via, hops },
            _ => SendDecision::Veto { reason: "no route to destination" },
        }
    }
}
