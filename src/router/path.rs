// Lightning network client core library
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Pathfinding over the routing graph: Dijkstra search backwards from the
//! destination so per-hop amounts build up fee-exact along the way.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use super::graph::RoutingGraph;
use crate::p2p::{NodeId, ShortChannelId};

/// Cost of one block of CLTV delta, in msat; trades locked-up time
/// against fees in the edge weight.
pub const CLTV_COST_WEIGHT: u64 = 10;

/// Errors from route search.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum RoutingError {
    /// no route between source and destination for the requested amount
    NoRouteFound,

    /// node {0} is not present in the routing graph
    NodeUnknown(NodeId),

    /// every candidate route exceeds the fee budget
    FeeBudgetExceeded,

    /// every candidate route exceeds the CLTV budget
    CltvBudgetExceeded,
}

/// A route search request.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RouteRequest {
    /// The paying node
    pub source: NodeId,

    /// The destination node
    pub destination: NodeId,

    /// Amount the destination must receive, msat
    pub amount_msat: u64,

    /// Budget for the accumulated forwarding fees, msat
    pub max_fee_msat: u64,

    /// Budget for the accumulated CLTV deltas, blocks
    pub max_cltv_expiry: u32,

    /// CLTV delta required by the destination
    pub final_cltv_delta: u32,
}

impl RouteRequest {
    /// A request with customary budget defaults: 1% fee budget and a
    /// 2016-block CLTV budget.
    pub fn with(
        source: NodeId,
        destination: NodeId,
        amount_msat: u64,
    ) -> RouteRequest {
        RouteRequest {
            source,
            destination,
            amount_msat,
            max_fee_msat: amount_msat / 100,
            max_cltv_expiry: 2016,
            final_cltv_delta: 18,
        }
    }
}

/// One hop of a computed route, crossing one channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RouteHop {
    /// Channel the HTLC crosses
    pub short_channel_id: ShortChannelId,

    /// Node the HTLC arrives at
    pub node_id: NodeId,

    /// Amount that must arrive at `node_id`, msat
    pub amount_msat: u64,

    /// CLTV (relative to the current height) the HTLC arriving at
    /// `node_id` must carry
    pub cltv_expiry: u32,

    /// Fee the crossing adds on top of the downstream amount, msat
    pub fee_msat: u64,
}

/// A computed route, source-adjacent hop first.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PaymentRoute {
    /// Hops in forwarding order
    pub hops: Vec<RouteHop>,

    /// Amount the source must send, msat
    pub total_amount_msat: u64,

    /// Accumulated forwarding fees, msat
    pub total_fee_msat: u64,

    /// Accumulated CLTV (final delta included), blocks
    pub total_cltv_expiry: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct SearchEntry {
    cost: u64,
    amount_msat: u64,
    fee_msat: u64,
    cltv: u32,
    via: Option<Via>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct Via {
    short_channel_id: ShortChannelId,
    next_node: NodeId,
    fee_msat: u64,
}

/// Searches the cheapest feasible route delivering
/// `request.amount_msat` to the destination.
///
/// Edge weight is `fee + CLTV_COST_WEIGHT · cltv_delta`; per-edge
/// feasibility enforces the direction's HTLC bounds, the disabled flag and
/// both budgets. The search walks from the destination towards the source
/// so the amount crossing every edge is already fee-adjusted.
pub fn find_route(
    graph: &RoutingGraph,
    request: &RouteRequest,
) -> Result<PaymentRoute, RoutingError> {
    if request.source == request.destination {
        return Err(RoutingError::NoRouteFound);
    }
    if graph.node(&request.source).is_none() {
        return Err(RoutingError::NodeUnknown(request.source));
    }
    if graph.node(&request.destination).is_none() {
        return Err(RoutingError::NodeUnknown(request.destination));
    }

    let mut entries: BTreeMap<NodeId, SearchEntry> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(u64, NodeId)>> = BinaryHeap::new();
    entries.insert(request.destination, SearchEntry {
        cost: 0,
        amount_msat: request.amount_msat,
        fee_msat: 0,
        cltv: request.final_cltv_delta,
        via: None,
    });
    heap.push(Reverse((0, request.destination)));

    let mut fee_blocked = false;
    let mut cltv_blocked = false;

    while let Some(Reverse((cost, node))) = heap.pop() {
        let entry = match entries.get(&node) {
            Some(entry) if entry.cost == cost => *entry,
            _ => continue, // superseded queue entry
        };
        if node == request.source {
            break;
        }

        for channel in graph.channels_of(node) {
            let prev = match channel.other_end(node) {
                Some(prev) => prev,
                None => continue,
            };
            let policy = match channel.policy_from(prev) {
                Some(policy) => policy,
                None => continue,
            };
            if !policy.admits(entry.amount_msat) {
                continue;
            }
            // the source forwards its own HTLC: no fee, no delta of its
            // own channel policy
            let (fee, delta) = if prev == request.source {
                (0, 0)
            } else {
                (
                    policy.fee_msat(entry.amount_msat),
                    policy.cltv_expiry_delta as u32,
                )
            };
            if entry.fee_msat + fee > request.max_fee_msat {
                fee_blocked = true;
                continue;
            }
            if entry.cltv + delta > request.max_cltv_expiry {
                cltv_blocked = true;
                continue;
            }

            let candidate = SearchEntry {
                cost: entry.cost + fee + CLTV_COST_WEIGHT * delta as u64,
                amount_msat: entry.amount_msat + fee,
                fee_msat: entry.fee_msat + fee,
                cltv: entry.cltv + delta,
                via: Some(Via {
                    short_channel_id: channel.short_channel_id,
                    next_node: node,
                    fee_msat: fee,
                }),
            };
            let better = entries
                .get(&prev)
                .map(|existing| candidate.cost < existing.cost)
                .unwrap_or(true);
            if better {
                entries.insert(prev, candidate);
                heap.push(Reverse((candidate.cost, prev)));
            }
        }
    }

    let source_entry = match entries.get(&request.source) {
        Some(entry) => *entry,
        None if fee_blocked => return Err(RoutingError::FeeBudgetExceeded),
        None if cltv_blocked => return Err(RoutingError::CltvBudgetExceeded),
        None => return Err(RoutingError::NoRouteFound),
    };

    let mut hops = vec![];
    let mut cursor = source_entry;
    while let Some(via) = cursor.via {
        let next_entry = entries[&via.next_node];
        hops.push(RouteHop {
            short_channel_id: via.short_channel_id,
            node_id: via.next_node,
            amount_msat: next_entry.amount_msat,
            cltv_expiry: next_entry.cltv,
            fee_msat: via.fee_msat,
        });
        cursor = next_entry;
    }

    trace!(
        "route to {} found: {} hops, {} msat total, {} msat fees",
        request.destination,
        hops.len(),
        source_entry.amount_msat,
        source_entry.fee_msat
    );
    Ok(PaymentRoute {
        hops,
        total_amount_msat: source_entry.amount_msat,
        total_fee_msat: source_entry.fee_msat,
        total_cltv_expiry: source_entry.cltv,
    })
}
