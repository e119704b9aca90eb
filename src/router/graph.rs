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

//! Authenticated store of the public routing graph, fed by BOLT-7 gossip.
//!
//! Nodes and channels are owned by the store and reference each other only
//! through their 33-byte node ids and 8-byte short channel ids; entities
//! whose announcements go quiet are pruned after the staleness horizon.

use std::collections::{BTreeMap, BTreeSet};

use amplify::Wrapper;
use chrono::Utc;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1};

use crate::p2p::{
    AddressError, AddressList, Alias, ChannelAnnouncement, ChannelUpdate,
    Features, NodeAnnouncement, NodeId, ShortChannelId, BITCOIN_CHAIN_HASH,
};

/// Entities with no update newer than this horizon are pruned.
pub const GOSSIP_PRUNE_HORIZON_SECS: u32 = 14 * 24 * 60 * 60;

/// Confirmation depth a funding output needs before its channel is
/// admitted to the graph.
pub const MIN_FUNDING_CONFIRMATIONS: u32 = 6;

/// Why a gossip message was dropped.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum GossipError {
    /// announcement is for a different chain
    WrongChain,

    /// funding output has only {0} confirmations
    FundingUnconfirmed(u32),

    /// funding output is already spent
    FundingSpent,

    /// node ids of the announcement are not in lexicographic order
    UnorderedNodeIds,

    /// signature verification failed
    InvalidSignature,

    /// update for unknown channel {0}; the caller may retry after the
    /// channel is announced
    UnknownChannel(ShortChannelId),

    /// announcement for unknown node {0}
    UnknownNode(NodeId),

    /// timestamp {actual} is not newer than the stored {current}
    StaleTimestamp {
        /// Newest timestamp known for the entity/direction
        current: u32,
        /// Timestamp of the rejected message
        actual: u32,
    },

    /// invalid announced address
    #[from]
    #[display(inner)]
    Address(AddressError),
}

/// Forwarding policy of one channel direction, announced via
/// `channel_update`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DirectionalPolicy {
    /// Timestamp of the announcing `channel_update`
    pub timestamp: u32,

    /// Blocks added to the CLTV of a forwarded HTLC
    pub cltv_expiry_delta: u16,

    /// Minimum HTLC forwarded, msat
    pub htlc_minimum_msat: u64,

    /// Maximum HTLC forwarded, msat
    pub htlc_maximum_msat: u64,

    /// Base forwarding fee, msat
    pub fee_base_msat: u32,

    /// Proportional forwarding fee, millionths
    pub fee_proportional_millionths: u32,

    /// Whether the direction is disabled for forwarding
    pub disabled: bool,
}

impl DirectionalPolicy {
    /// Fee for forwarding `amount_msat` over this direction.
    pub fn fee_msat(&self, amount_msat: u64) -> u64 {
        self.fee_base_msat as u64
            + amount_msat * self.fee_proportional_millionths as u64
                / 1_000_000
    }

    /// Whether `amount_msat` is within the HTLC bounds of the direction.
    pub fn admits(&self, amount_msat: u64) -> bool {
        !self.disabled
            && amount_msat >= self.htlc_minimum_msat
            && amount_msat <= self.htlc_maximum_msat
    }
}

/// A channel known to the graph.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelInfo {
    /// Endpoint node ids, lexicographically ordered
    pub nodes: (NodeId, NodeId),

    /// Short channel id of the funding output
    pub short_channel_id: ShortChannelId,

    /// On-chain capacity of the funding output
    pub capacity_sats: u64,

    /// Channel features from the announcement
    pub features: Features,

    /// Per-direction policies: `.0` forwards node1→node2, `.1` the
    /// opposite way
    pub directions: (Option<DirectionalPolicy>, Option<DirectionalPolicy>),

    /// Unix timestamp of the freshest message concerning this channel
    pub last_update: u32,
}

impl ChannelInfo {
    /// The policy for forwarding *from* the given endpoint.
    pub fn policy_from(&self, node_id: NodeId) -> Option<&DirectionalPolicy> {
        if node_id == self.nodes.0 {
            self.directions.0.as_ref()
        } else if node_id == self.nodes.1 {
            self.directions.1.as_ref()
        } else {
            None
        }
    }

    /// The endpoint opposite to `node_id`.
    pub fn other_end(&self, node_id: NodeId) -> Option<NodeId> {
        if node_id == self.nodes.0 {
            Some(self.nodes.1)
        } else if node_id == self.nodes.1 {
            Some(self.nodes.0)
        } else {
            None
        }
    }
}

/// A node known to the graph.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeInfo {
    /// The node id
    pub node_id: NodeId,

    /// Node features from the freshest announcement
    pub features: Features,

    /// UTF-8 alias, zero-padded
    pub alias: Alias,

    /// Announced addresses
    pub addresses: AddressList,

    /// Unix timestamp of the freshest message concerning this node
    pub last_update: u32,
}

/// On-chain facts about a funding output, supplied by the chain source at
/// ingestion time.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FundingStatus {
    /// Confirmation depth of the funding transaction
    pub confirmations: u32,

    /// Whether the funding output is already spent
    pub spent: bool,

    /// Value of the funding output
    pub capacity_sats: u64,
}

/// The routing graph store: single writer (the gossip ingestion task),
/// many readers (the pathfinder).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RoutingGraph {
    nodes: BTreeMap<NodeId, NodeInfo>,
    channels: BTreeMap<ShortChannelId, ChannelInfo>,
}

fn verify_signature(
    digest: &amplify::Slice32,
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), GossipError> {
    let message = Message::from_slice(digest.as_inner())
        .map_err(|_| GossipError::InvalidSignature)?;
    SECP256K1
        .verify_ecdsa(&message, signature, pubkey)
        .map_err(|_| GossipError::InvalidSignature)
}

impl RoutingGraph {
    /// Creates an empty graph.
    pub fn new() -> RoutingGraph {
        RoutingGraph::default()
    }

    /// Number of known nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of known channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Looks up a node.
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    /// Looks up a channel.
    pub fn channel(&self, scid: &ShortChannelId) -> Option<&ChannelInfo> {
        self.channels.get(scid)
    }

    /// Iterates all channels.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.channels.values()
    }

    /// Channels adjacent to a node.
    pub fn channels_of(
        &self,
        node_id: NodeId,
    ) -> impl Iterator<Item = &ChannelInfo> {
        self.channels.values().filter(move |channel| {
            channel.nodes.0 == node_id || channel.nodes.1 == node_id
        })
    }

    /// Ingests a `channel_announcement`, verifying chain, funding depth
    /// and all four signatures; both endpoint nodes are promoted to the
    /// graph on first sight.
    pub fn apply_channel_announcement(
        &mut self,
        msg: &ChannelAnnouncement,
        funding: FundingStatus,
        now: u32,
    ) -> Result<(), GossipError> {
        if msg.chain_hash != *BITCOIN_CHAIN_HASH {
            return Err(GossipError::WrongChain);
        }
        if funding.confirmations < MIN_FUNDING_CONFIRMATIONS {
            return Err(GossipError::FundingUnconfirmed(
                funding.confirmations,
            ));
        }
        if funding.spent {
            return Err(GossipError::FundingSpent);
        }
        if msg.node_id_1 >= msg.node_id_2 {
            return Err(GossipError::UnorderedNodeIds);
        }

        let digest = msg.signature_digest();
        verify_signature(
            &digest,
            &msg.node_signature_1,
            &msg.node_id_1.public_key(),
        )?;
        verify_signature(
            &digest,
            &msg.node_signature_2,
            &msg.node_id_2.public_key(),
        )?;
        verify_signature(&digest, &msg.bitcoin_signature_1, &msg.bitcoin_key_1)?;
        verify_signature(&digest, &msg.bitcoin_signature_2, &msg.bitcoin_key_2)?;

        self.channels.insert(msg.short_channel_id, ChannelInfo {
            nodes: (msg.node_id_1, msg.node_id_2),
            short_channel_id: msg.short_channel_id,
            capacity_sats: funding.capacity_sats,
            features: msg.features.clone(),
            directions: (None, None),
            last_update: now,
        });
        for node_id in [msg.node_id_1, msg.node_id_2] {
            self.nodes.entry(node_id).or_insert_with(|| NodeInfo {
                node_id,
                features: Features::new(),
                alias: Alias::default(),
                addresses: AddressList::default(),
                last_update: now,
            });
        }
        trace!(
            "channel {} between {} and {} admitted to the graph",
            msg.short_channel_id,
            msg.node_id_1,
            msg.node_id_2
        );
        Ok(())
    }

    /// Ingests a `node_announcement`. Nodes without any known channel are
    /// rejected to keep the graph resistant to spam.
    pub fn apply_node_announcement(
        &mut self,
        msg: &NodeAnnouncement,
    ) -> Result<(), GossipError> {
        let node = self
            .nodes
            .get_mut(&msg.node_id)
            .ok_or(GossipError::UnknownNode(msg.node_id))?;
        if msg.timestamp <= node.last_update {
            return Err(GossipError::StaleTimestamp {
                current: node.last_update,
                actual: msg.timestamp,
            });
        }
        let digest = msg.signature_digest();
        verify_signature(&digest, &msg.signature, &msg.node_id.public_key())?;
        msg.addresses.validate()?;

        node.features = msg.features.clone();
        node.alias = msg.alias;
        node.addresses = msg.addresses.clone();
        node.last_update = msg.timestamp;
        Ok(())
    }

    /// Ingests a `channel_update` for one direction of a known channel.
    ///
    /// A disabling update is accepted even when the funding output is
    /// already spent, so the closure propagates; anything else on a spent
    /// channel is dropped.
    pub fn apply_channel_update(
        &mut self,
        msg: &ChannelUpdate,
        funding_spent: bool,
    ) -> Result<(), GossipError> {
        if msg.chain_hash != *BITCOIN_CHAIN_HASH {
            return Err(GossipError::WrongChain);
        }
        let channel = self
            .channels
            .get_mut(&msg.short_channel_id)
            .ok_or(GossipError::UnknownChannel(msg.short_channel_id))?;
        if funding_spent && !msg.is_disabled() {
            return Err(GossipError::FundingSpent);
        }

        let announcing_node = if msg.direction() == 0 {
            channel.nodes.0
        } else {
            channel.nodes.1
        };
        let slot = if msg.direction() == 0 {
            &mut channel.directions.0
        } else {
            &mut channel.directions.1
        };
        if let Some(policy) = slot {
            if msg.timestamp <= policy.timestamp {
                return Err(GossipError::StaleTimestamp {
                    current: policy.timestamp,
                    actual: msg.timestamp,
                });
            }
        }
        verify_signature(
            &msg.signature_digest(),
            &msg.signature,
            &announcing_node.public_key(),
        )?;

        *slot = Some(DirectionalPolicy {
            timestamp: msg.timestamp,
            cltv_expiry_delta: msg.cltv_expiry_delta,
            htlc_minimum_msat: msg.htlc_minimum_msat,
            htlc_maximum_msat: msg.htlc_maximum_msat,
            fee_base_msat: msg.fee_base_msat,
            fee_proportional_millionths: msg.fee_proportional_millionths,
            disabled: msg.is_disabled(),
        });
        channel.last_update = channel.last_update.max(msg.timestamp);
        Ok(())
    }

    /// Prunes against the wall clock with the default horizon.
    pub fn prune_stale(&mut self) -> (usize, usize) {
        let now = Utc::now().timestamp().max(0) as u32;
        self.prune(now, GOSSIP_PRUNE_HORIZON_SECS)
    }

    /// Removes channels with no update newer than the horizon, then every
    /// node no channel references anymore. Returns the removed
    /// (channels, nodes) counts.
    pub fn prune(&mut self, now: u32, horizon_secs: u32) -> (usize, usize) {
        let cutoff = now.saturating_sub(horizon_secs);
        let stale: Vec<ShortChannelId> = self
            .channels
            .values()
            .filter(|channel| channel.last_update < cutoff)
            .map(|channel| channel.short_channel_id)
            .collect();
        for scid in &stale {
            self.channels.remove(scid);
        }

        let referenced: BTreeSet<NodeId> = self
            .channels
            .values()
            .flat_map(|channel| [channel.nodes.0, channel.nodes.1])
            .collect();
        let orphaned: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|node_id| !referenced.contains(*node_id))
            .copied()
            .collect();
        for node_id in &orphaned {
            self.nodes.remove(node_id);
        }

        if !stale.is_empty() || !orphaned.is_empty() {
            debug!(
                "pruned {} stale channels and {} orphaned nodes",
                stale.len(),
                orphaned.len()
            );
        }
        (stale.len(), orphaned.len())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use amplify::Slice32;
    use secp256k1::SecretKey;

    use super::*;

    pub(crate) struct TestNode {
        pub sk: SecretKey,
        pub id: NodeId,
        pub bitcoin_sk: SecretKey,
        pub bitcoin_key: PublicKey,
    }

    pub(crate) fn test_node(seed: u8) -> TestNode {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let bitcoin_sk = SecretKey::from_slice(&[seed | 0x80; 32]).unwrap();
        TestNode {
            sk,
            id: NodeId::from(PublicKey::from_secret_key(SECP256K1, &sk)),
            bitcoin_sk,
            bitcoin_key: PublicKey::from_secret_key(SECP256K1, &bitcoin_sk),
        }
    }

    fn sign(digest: &Slice32, sk: &SecretKey) -> Signature {
        SECP256K1.sign_ecdsa(
            &Message::from_slice(digest.as_inner()).unwrap(),
            sk,
        )
    }

    pub(crate) fn announce_channel(
        a: &TestNode,
        b: &TestNode,
        scid: ShortChannelId,
    ) -> ChannelAnnouncement {
        let (one, two) = if a.id < b.id { (a, b) } else { (b, a) };
        let mut msg = ChannelAnnouncement {
            node_signature_1: dummy_sig(),
            node_signature_2: dummy_sig(),
            bitcoin_signature_1: dummy_sig(),
            bitcoin_signature_2: dummy_sig(),
            features: Features::new(),
            chain_hash: *BITCOIN_CHAIN_HASH,
            short_channel_id: scid,
            node_id_1: one.id,
            node_id_2: two.id,
            bitcoin_key_1: one.bitcoin_key,
            bitcoin_key_2: two.bitcoin_key,
        };
        let digest = msg.signature_digest();
        msg.node_signature_1 = sign(&digest, &one.sk);
        msg.node_signature_2 = sign(&digest, &two.sk);
        msg.bitcoin_signature_1 = sign(&digest, &one.bitcoin_sk);
        msg.bitcoin_signature_2 = sign(&digest, &two.bitcoin_sk);
        msg
    }

    pub(crate) fn update_channel(
        announcement: &ChannelAnnouncement,
        from: &TestNode,
        timestamp: u32,
        fee_base_msat: u32,
        fee_proportional_millionths: u32,
        cltv_expiry_delta: u16,
        htlc_maximum_msat: u64,
        disabled: bool,
    ) -> ChannelUpdate {
        let direction = if from.id == announcement.node_id_1 { 0 } else { 1 };
        let mut msg = ChannelUpdate {
            signature: dummy_sig(),
            chain_hash: *BITCOIN_CHAIN_HASH,
            short_channel_id: announcement.short_channel_id,
            timestamp,
            message_flags: 1,
            channel_flags: direction | if disabled { 0b10 } else { 0 },
            cltv_expiry_delta,
            htlc_minimum_msat: 1000,
            fee_base_msat,
            fee_proportional_millionths,
            htlc_maximum_msat,
        };
        msg.signature = sign(&msg.signature_digest(), &from.sk);
        msg
    }

    fn dummy_sig() -> Signature {
        let sk = secp256k1::ONE_KEY;
        SECP256K1
            .sign_ecdsa(&Message::from_slice(&[0x21; 32]).unwrap(), &sk)
    }

    fn funding() -> FundingStatus {
        FundingStatus {
            confirmations: 6,
            spent: false,
            capacity_sats: 1_000_000,
        }
    }

    fn scid(n: u32) -> ShortChannelId {
        ShortChannelId::new(700_000 + n, n, 0).unwrap()
    }

    #[test]
    fn announcement_admits_channel_and_nodes() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let mut graph = RoutingGraph::new();
        graph
            .apply_channel_announcement(
                &announce_channel(&alice, &bob, scid(1)),
                funding(),
                1_700_000_000,
            )
            .unwrap();
        assert_eq!(graph.channel_count(), 1);
        assert_eq!(graph.node_count(), 2);
        let channel = graph.channel(&scid(1)).unwrap();
        assert!(channel.nodes.0 < channel.nodes.1);
        assert_eq!(channel.capacity_sats, 1_000_000);
    }

    #[test]
    fn announcement_rejected_on_bad_signature() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let mut msg = announce_channel(&alice, &bob, scid(1));
        msg.node_signature_1 = dummy_sig();
        let mut graph = RoutingGraph::new();
        assert_eq!(
            graph.apply_channel_announcement(&msg, funding(), 0),
            Err(GossipError::InvalidSignature)
        );
        assert_eq!(graph.channel_count(), 0);
    }

    #[test]
    fn announcement_rejected_on_chain_funding_and_order() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let good = announce_channel(&alice, &bob, scid(1));
        let mut graph = RoutingGraph::new();

        let mut wrong_chain = good.clone();
        wrong_chain.chain_hash = Slice32::from_inner([0x55; 32]);
        assert_eq!(
            graph.apply_channel_announcement(&wrong_chain, funding(), 0),
            Err(GossipError::WrongChain)
        );

        assert_eq!(
            graph.apply_channel_announcement(
                &good,
                FundingStatus {
                    confirmations: 3,
                    ..funding()
                },
                0
            ),
            Err(GossipError::FundingUnconfirmed(3))
        );

        assert_eq!(
            graph.apply_channel_announcement(
                &good,
                FundingStatus {
                    spent: true,
                    ..funding()
                },
                0
            ),
            Err(GossipError::FundingSpent)
        );

        let mut unordered = good.clone();
        std::mem::swap(&mut unordered.node_id_1, &mut unordered.node_id_2);
        assert_eq!(
            graph.apply_channel_announcement(&unordered, funding(), 0),
            Err(GossipError::UnorderedNodeIds)
        );
    }

    #[test]
    fn update_timestamps_are_monotone_per_direction() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let announcement = announce_channel(&alice, &bob, scid(1));
        let mut graph = RoutingGraph::new();
        graph
            .apply_channel_announcement(&announcement, funding(), 100)
            .unwrap();

        let update =
            update_channel(&announcement, &alice, 200, 1000, 100, 40, 1_000_000_000, false);
        graph.apply_channel_update(&update, false).unwrap();

        // same direction, not newer: rejected
        assert_eq!(
            graph.apply_channel_update(&update, false),
            Err(GossipError::StaleTimestamp {
                current: 200,
                actual: 200
            })
        );

        // the opposite direction keeps its own clock
        let reverse =
            update_channel(&announcement, &bob, 150, 2000, 50, 14, 900_000_000, false);
        graph.apply_channel_update(&reverse, false).unwrap();

        let channel = graph.channel(&scid(1)).unwrap();
        assert!(channel.directions.0.is_some());
        assert!(channel.directions.1.is_some());
    }

    #[test]
    fn disable_update_accepted_on_spent_funding() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let announcement = announce_channel(&alice, &bob, scid(1));
        let mut graph = RoutingGraph::new();
        graph
            .apply_channel_announcement(&announcement, funding(), 100)
            .unwrap();

        let enable =
            update_channel(&announcement, &alice, 200, 0, 0, 40, 1_000, false);
        assert_eq!(
            graph.apply_channel_update(&enable, true),
            Err(GossipError::FundingSpent)
        );

        let disable =
            update_channel(&announcement, &alice, 300, 0, 0, 40, 1_000, true);
        graph.apply_channel_update(&disable, true).unwrap();
        let policy =
            graph.channel(&scid(1)).unwrap().directions.0.unwrap();
        assert!(policy.disabled);
    }

    #[test]
    fn update_for_unknown_channel_is_transient() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let announcement = announce_channel(&alice, &bob, scid(9));
        let update =
            update_channel(&announcement, &alice, 10, 0, 0, 40, 1_000, false);
        let mut graph = RoutingGraph::new();
        assert_eq!(
            graph.apply_channel_update(&update, false),
            Err(GossipError::UnknownChannel(scid(9)))
        );
    }

    #[test]
    fn node_announcement_requires_known_node() {
        let alice = test_node(0x01);
        let mut msg = NodeAnnouncement {
            signature: dummy_sig(),
            features: Features::new(),
            timestamp: 500,
            node_id: alice.id,
            rgb_color: Default::default(),
            alias: Alias::default(),
            addresses: AddressList::default(),
        };
        msg.signature = sign(&msg.signature_digest(), &alice.sk);

        let mut graph = RoutingGraph::new();
        assert_eq!(
            graph.apply_node_announcement(&msg),
            Err(GossipError::UnknownNode(alice.id))
        );

        let bob = test_node(0x02);
        graph
            .apply_channel_announcement(
                &announce_channel(&alice, &bob, scid(1)),
                funding(),
                100,
            )
            .unwrap();
        graph.apply_node_announcement(&msg).unwrap();
        assert_eq!(graph.node(&alice.id).unwrap().last_update, 500);
    }

    #[test]
    fn prune_removes_stale_channels_and_orphans() {
        let alice = test_node(0x01);
        let bob = test_node(0x02);
        let carol = test_node(0x03);
        let mut graph = RoutingGraph::new();
        graph
            .apply_channel_announcement(
                &announce_channel(&alice, &bob, scid(1)),
                funding(),
                100,
            )
            .unwrap();
        graph
            .apply_channel_announcement(
                &announce_channel(&bob, &carol, scid(2)),
                funding(),
                5_000_000,
            )
            .unwrap();

        let now = 5_000_000 + GOSSIP_PRUNE_HORIZON_SECS;
        let (channels, nodes) =
            graph.prune(now, GOSSIP_PRUNE_HORIZON_SECS);
        assert_eq!(channels, 1); // scid(1) was last seen at t=100
        assert_eq!(nodes, 1); // alice lost her only channel
        assert!(graph.channel(&scid(1)).is_none());
        assert!(graph.node(&alice.id).is_none());
        assert!(graph.node(&bob.id).is_some());
        assert!(graph.node(&carol.id).is_some());
    }
}
