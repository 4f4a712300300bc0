//! Hello engine (C4): periodic neighbor-discovery beacons and the
//! processing of beacons received from others.
//!
//! A HELLO carries the sender's one-hop neighbor list so a receiver can
//! learn the *transmitted* link quality (how well the sender hears us)
//! to pair with its own *received* link quality (how well we hear the
//! sender) — together these feed `RoutingTable::observe_one_hop_neighbor`.
//! It also carries the sender's `routing_table_id`/`routing_table_size`,
//! compared against this node's own before anything is merged: a peer
//! advertising a stale table is ignored outright, and a peer advertising
//! a newer or differently-sized one is asked for its full route list via
//! `RT_REQUEST` instead of being merged from the one-hop view a HELLO
//! carries.

use crate::packet::PacketBody;
use crate::routing_table::RoutingTable;
use crate::types::{Address, HelloPacketNode, Role};

pub struct HelloOutcome {
    /// Whether this beacon changed the routing table (new neighbor or a
    /// metric move), i.e. whether callers should re-propagate and advance
    /// their own routing-table id.
    pub updated: bool,
    /// Whether the peer's table looked newer or differently sized than
    /// ours, meaning this beacon was not merged and an `RT_REQUEST`
    /// should be sent to the peer instead.
    pub needs_route_request: bool,
}

pub struct HelloEngine {
    last_sent_ms: Option<u64>,
}

impl HelloEngine {
    pub fn new() -> Self {
        Self { last_sent_ms: None }
    }

    /// Whether `hello_interval_ms` has elapsed since the last beacon (or
    /// none has ever been sent).
    pub fn due(&self, now_ms: u64, hello_interval_ms: u32) -> bool {
        match self.last_sent_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= hello_interval_ms as u64,
        }
    }

    pub fn record_sent(&mut self, now_ms: u64) {
        self.last_sent_ms = Some(now_ms);
    }

    /// Builds this node's advertised one-hop neighbor list for an outgoing
    /// HELLO, from the routing table's current one-hop entries.
    pub fn hello_nodes(&self, table: &RoutingTable) -> Vec<HelloPacketNode> {
        table.hello_nodes()
    }

    /// Folds a received HELLO into the routing table, after first checking
    /// the peer's advertised table version against our own.
    ///
    /// The original shadows its `updated` variable in the equivalent
    /// function: an inner block recomputes the real result but an outer
    /// variable of the same name, declared `false` and never reassigned,
    /// is what actually gates propagation — so propagation silently never
    /// runs. Here there is exactly one `updated` binding, and it is the
    /// one returned by `RoutingTable::observe_one_hop_neighbor`.
    #[allow(clippy::too_many_arguments)]
    pub fn process_hello(
        &mut self,
        table: &RoutingTable,
        local_address: Address,
        from: Address,
        role: Role,
        peer_routing_table_id: u8,
        peer_routing_table_size: u8,
        received_link_quality: u8,
        received_snr: i8,
        hello_nodes: &[HelloPacketNode],
        now_ms: u64,
        timeout_ms: u64,
    ) -> HelloOutcome {
        let local_routing_table_id = table.routing_table_id();
        let local_routing_table_size = table.len() as u8;

        if peer_routing_table_id < local_routing_table_id {
            return HelloOutcome { updated: false, needs_route_request: false };
        }

        if peer_routing_table_id > local_routing_table_id || peer_routing_table_size != local_routing_table_size {
            return HelloOutcome { updated: false, needs_route_request: true };
        }

        let transmitted_link_quality = hello_nodes
            .iter()
            .find(|n| n.address == local_address)
            .map(|n| n.received_link_quality)
            .unwrap_or(0);

        let updated = table.observe_one_hop_neighbor(
            from,
            role,
            received_link_quality,
            transmitted_link_quality,
            received_snr,
            now_ms,
            timeout_ms,
        );

        if updated {
            table.update_metric_of_next_hop(from);
        }

        HelloOutcome { updated, needs_route_request: false }
    }

    /// Convenience for pulling the fields this module needs straight out
    /// of a parsed HELLO packet body.
    #[allow(clippy::too_many_arguments)]
    pub fn process_hello_packet(
        &mut self,
        table: &RoutingTable,
        local_address: Address,
        from: Address,
        body: &PacketBody,
        received_link_quality: u8,
        received_snr: i8,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Option<HelloOutcome> {
        match body {
            PacketBody::Hello { routing_table_id, routing_table_size, node_role, nodes } => Some(self.process_hello(
                table,
                local_address,
                from,
                *node_role,
                *routing_table_id,
                *routing_table_size,
                received_link_quality,
                received_snr,
                nodes,
                now_ms,
                timeout_ms,
            )),
            _ => None,
        }
    }
}

impl Default for HelloEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ROLE_DEFAULT;

    #[test]
    fn first_beacon_is_always_due() {
        let engine = HelloEngine::new();
        assert!(engine.due(0, 120_000));
    }

    #[test]
    fn beacon_not_due_before_interval_elapses() {
        let mut engine = HelloEngine::new();
        engine.record_sent(1_000);
        assert!(!engine.due(1_500, 120_000));
        assert!(engine.due(121_001, 120_000));
    }

    #[test]
    fn processing_hello_creates_one_hop_neighbor() {
        let table = RoutingTable::new(1);
        let mut engine = HelloEngine::new();
        // table starts at routing_table_id=0, size=0: a peer advertising
        // the same (0, 0) is not stale and not ahead, so this merges.
        let outcome = engine.process_hello(&table, 1, 2, ROLE_DEFAULT, 0, 0, 200, -40, &[], 0, 300_000);
        assert!(outcome.updated);
        assert!(!outcome.needs_route_request);
        assert!(table.route_to(2).is_some());
    }

    #[test]
    fn transmitted_link_quality_is_read_from_senders_neighbor_list() {
        let table = RoutingTable::new(1);
        let mut engine = HelloEngine::new();
        let nodes = [HelloPacketNode { address: 1, received_link_quality: 222 }];
        engine.process_hello(&table, 1, 2, ROLE_DEFAULT, 0, 0, 200, -40, &nodes, 0, 300_000);
        let route = table.route_to(2).unwrap();
        assert_eq!(route.transmitted_link_quality, 222);
    }

    /// End-to-end scenario 5: A has `rt_id=5, size=2`; a hello from B
    /// advertising `rt_id=7` is not merged — A's table is left untouched
    /// and the outcome asks for an `RT_REQUEST` to B instead.
    #[test]
    fn peer_with_newer_table_id_triggers_route_request_without_merging() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(10, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        table.observe_one_hop_neighbor(11, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        assert_eq!(table.routing_table_id(), 2);
        assert_eq!(table.len(), 2);

        let mut engine = HelloEngine::new();
        let outcome = engine.process_hello(&table, 1, 2, ROLE_DEFAULT, 7, 2, 200, -40, &[], 1_000, 300_000);
        assert!(!outcome.updated);
        assert!(outcome.needs_route_request);
        assert!(table.route_to(2).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn peer_with_different_table_size_triggers_route_request_without_merging() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(10, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        let local_id = table.routing_table_id();

        let mut engine = HelloEngine::new();
        let outcome = engine.process_hello(&table, 1, 2, ROLE_DEFAULT, local_id, 5, 200, -40, &[], 1_000, 300_000);
        assert!(!outcome.updated);
        assert!(outcome.needs_route_request);
        assert!(table.route_to(2).is_none());
    }

    #[test]
    fn peer_with_stale_table_id_is_dropped_without_route_request() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(10, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        table.observe_one_hop_neighbor(11, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        let local_id = table.routing_table_id();
        let local_size = table.len() as u8;

        let mut engine = HelloEngine::new();
        let outcome = engine.process_hello(&table, 1, 2, ROLE_DEFAULT, local_id - 1, local_size, 200, -40, &[], 1_000, 300_000);
        assert!(!outcome.updated);
        assert!(!outcome.needs_route_request);
        assert!(table.route_to(2).is_none());
    }

    #[test]
    fn matching_table_id_and_size_merges_normally() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(10, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        let local_id = table.routing_table_id();
        let local_size = table.len() as u8;

        let mut engine = HelloEngine::new();
        let outcome = engine.process_hello(&table, 1, 2, ROLE_DEFAULT, local_id, local_size, 200, -40, &[], 1_000, 300_000);
        assert!(outcome.updated);
        assert!(!outcome.needs_route_request);
        assert!(table.route_to(2).is_some());
    }
}
