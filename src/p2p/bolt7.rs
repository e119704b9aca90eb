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

//! BOLT-7 gossip messages.

use amplify::Slice32;
use ln_wire::WireEncode;
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;

use super::{
    AddressList, Alias, ChannelId, Features, NodeColor, NodeId, ShortChannelId,
};
use crate::crypto;

/// This is a direct message between the two endpoints of a channel and
/// serves as an opt-in mechanism to allow the announcement of the channel
/// to the rest of the network. It contains the necessary signatures, by the
/// sender, to construct the `channel_announcement` message.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("announcement_signatures({channel_id}, {short_channel_id}, ...)")]
pub struct AnnouncementSignatures {
    /// The channel ID
    pub channel_id: ChannelId,

    /// Short channel id of the confirmed funding output
    pub short_channel_id: ShortChannelId,

    /// Node signature
    pub node_signature: Signature,

    /// Bitcoin signature
    pub bitcoin_signature: Signature,
}

/// This gossip message contains ownership information regarding a channel.
/// It ties each on-chain bitcoin key to the associated lightning node key,
/// and vice-versa. The channel is not practically usable until at least one
/// side has announced its fee levels and expiry, using `channel_update`.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("channel_announcement({chain_hash}, {short_channel_id}, ...)")]
pub struct ChannelAnnouncement {
    /// Signature of node 1 over the announcement digest
    pub node_signature_1: Signature,

    /// Signature of node 2 over the announcement digest
    pub node_signature_2: Signature,

    /// Signature of bitcoin key 1 over the announcement digest
    pub bitcoin_signature_1: Signature,

    /// Signature of bitcoin key 2 over the announcement digest
    pub bitcoin_signature_2: Signature,

    /// Channel feature flags
    pub features: Features,

    /// Hash of the genesis block of the chain the channel lives on
    pub chain_hash: Slice32,

    /// Short channel id of the funding output
    pub short_channel_id: ShortChannelId,

    /// Numerically lesser of the two node ids
    pub node_id_1: NodeId,

    /// Numerically greater of the two node ids
    pub node_id_2: NodeId,

    /// Funding key of node 1
    pub bitcoin_key_1: PublicKey,

    /// Funding key of node 2
    pub bitcoin_key_2: PublicKey,
}

/// Byte length of the four leading signatures of `channel_announcement`.
const CHANNEL_ANNOUNCEMENT_SIG_LEN: usize = 64 * 4;

impl ChannelAnnouncement {
    /// Double-SHA256 digest of the canonical serialization starting after
    /// the signature fields; this is what all four signatures commit to.
    pub fn signature_digest(&self) -> Slice32 {
        let serialized = self.wire_serialize();
        crypto::sha256d(&serialized[CHANNEL_ANNOUNCEMENT_SIG_LEN..])
    }
}

/// This gossip message allows a node to indicate extra data associated with
/// it, in addition to its public key. To avoid trivial denial of service
/// attacks, nodes not associated with an already known channel are ignored.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("node_announcement({node_id}, {timestamp}, ...)")]
pub struct NodeAnnouncement {
    /// Signature of the announced node over the announcement digest
    pub signature: Signature,

    /// Node feature flags
    pub features: Features,

    /// Unix timestamp of the announcement; later timestamps replace
    /// earlier ones
    pub timestamp: u32,

    /// The announced node
    pub node_id: NodeId,

    /// RGB color code
    pub rgb_color: NodeColor,

    /// UTF-8 alias, zero-padded to 32 bytes
    pub alias: Alias,

    /// Announced network addresses
    pub addresses: AddressList,
}

impl NodeAnnouncement {
    /// Double-SHA256 digest of the canonical serialization starting after
    /// the signature field.
    pub fn signature_digest(&self) -> Slice32 {
        let serialized = self.wire_serialize();
        crypto::sha256d(&serialized[64..])
    }
}

/// After a channel has been initially announced, each side independently
/// announces the fees and minimum expiry delta it requires to relay HTLCs
/// through this channel. A node can do this multiple times, in order to
/// change fees.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("channel_update({short_channel_id}, {timestamp}, ...)")]
pub struct ChannelUpdate {
    /// Signature of the announcing direction's node over the update digest
    pub signature: Signature,

    /// Hash of the genesis block of the chain the channel lives on
    pub chain_hash: Slice32,

    /// Short channel id of the funding output
    pub short_channel_id: ShortChannelId,

    /// Unix timestamp of the update; strictly greater than any previous
    /// update of the same direction
    pub timestamp: u32,

    /// Bit 0 (`must_be_one`) marks the presence of `htlc_maximum_msat`
    pub message_flags: u8,

    /// Bit 0 selects the announced direction, bit 1 disables the channel
    pub channel_flags: u8,

    /// Blocks added to the CLTV of an HTLC forwarded through this channel
    pub cltv_expiry_delta: u16,

    /// Minimum HTLC the direction will forward, in msat
    pub htlc_minimum_msat: u64,

    /// Base forwarding fee in msat
    pub fee_base_msat: u32,

    /// Proportional forwarding fee in millionths
    pub fee_proportional_millionths: u32,

    /// Maximum HTLC the direction will forward, in msat
    pub htlc_maximum_msat: u64,
}

impl ChannelUpdate {
    /// Direction the update belongs to: 0 when the announcing node is
    /// `node_id_1`, 1 when it is `node_id_2`.
    pub fn direction(&self) -> u8 {
        self.channel_flags & 0x01
    }

    /// Detects whether the update disables forwarding over the channel.
    pub fn is_disabled(&self) -> bool {
        self.channel_flags & 0x02 != 0
    }

    /// Double-SHA256 digest of the canonical serialization starting after
    /// the signature field.
    pub fn signature_digest(&self) -> Slice32 {
        let serialized = self.wire_serialize();
        crypto::sha256d(&serialized[64..])
    }
}

impl_wire_struct!(AnnouncementSignatures {
    channel_id,
    short_channel_id,
    node_signature,
    bitcoin_signature
});
impl_wire_struct!(ChannelAnnouncement {
    node_signature_1,
    node_signature_2,
    bitcoin_signature_1,
    bitcoin_signature_2,
    features,
    chain_hash,
    short_channel_id,
    node_id_1,
    node_id_2,
    bitcoin_key_1,
    bitcoin_key_2
});
impl_wire_struct!(NodeAnnouncement {
    signature,
    features,
    timestamp,
    node_id,
    rgb_color,
    alias,
    addresses
});
impl_wire_struct!(ChannelUpdate {
    signature,
    chain_hash,
    short_channel_id,
    timestamp,
    message_flags,
    channel_flags,
    cltv_expiry_delta,
    htlc_minimum_msat,
    fee_base_msat,
    fee_proportional_millionths,
    htlc_maximum_msat
});

#[cfg(test)]
mod test {
    use ln_wire::WireDecode;
    use secp256k1::{Message, SECP256K1};

    use super::super::BITCOIN_CHAIN_HASH;
    use super::*;

    fn dummy_signature() -> Signature {
        let sk = secp256k1::ONE_KEY;
        SECP256K1.sign_ecdsa(&Message::from_slice(&[0x33; 32]).unwrap(), &sk)
    }

    #[test]
    fn channel_update_roundtrip_and_flags() {
        let update = ChannelUpdate {
            signature: dummy_signature(),
            chain_hash: *BITCOIN_CHAIN_HASH,
            short_channel_id: ShortChannelId::new(700_000, 1, 0).unwrap(),
            timestamp: 1_650_000_000,
            message_flags: 1,
            channel_flags: 0b10,
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 1000,
            fee_base_msat: 1000,
            fee_proportional_millionths: 100,
            htlc_maximum_msat: 990_000_000,
        };
        assert_eq!(update.direction(), 0);
        assert!(update.is_disabled());

        let encoded = update.wire_serialize();
        assert_eq!(ChannelUpdate::wire_deserialize(encoded).unwrap(), update);
    }

    #[test]
    fn digest_skips_signatures() {
        let update = ChannelUpdate {
            signature: dummy_signature(),
            chain_hash: *BITCOIN_CHAIN_HASH,
            short_channel_id: ShortChannelId::new(700_000, 1, 0).unwrap(),
            timestamp: 1,
            message_flags: 1,
            channel_flags: 1,
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 0,
            fee_base_msat: 0,
            fee_proportional_millionths: 0,
            htlc_maximum_msat: 1,
        };
        let mut other = update;
        other.signature = {
            let sk = secp256k1::ONE_KEY;
            SECP256K1
                .sign_ecdsa(&Message::from_slice(&[0x44; 32]).unwrap(), &sk)
        };
        // digest must not depend on the signature itself
        assert_eq!(update.signature_digest(), other.signature_digest());
    }
}
