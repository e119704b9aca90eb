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

//! Routing: the gossip-fed graph store, the pathfinder over it and
//! multi-path payment splitting/collection.

mod graph;
mod mpp;
mod path;

pub use graph::{
    ChannelInfo, DirectionalPolicy, FundingStatus, GossipError, NodeInfo,
    RoutingGraph, GOSSIP_PRUNE_HORIZON_SECS, MIN_FUNDING_CONFIRMATIONS,
};
pub use mpp::{
    split_payment, HtlcAction, MppError, MppReceiver, MppSender,
    PartCandidate, PaymentPart, PaymentStatus, SplitConfig,
    MPP_DEFAULT_MAX_PARTS, MPP_DEFAULT_MIN_PART_MSAT,
    MPP_DEFAULT_TIMEOUT_SECS,
};
pub use path::{
    find_route, PaymentRoute, RouteHop, RouteRequest, RoutingError,
    CLTV_COST_WEIGHT,
};
