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

//! Interfaces the core requires from its collaborators: the external
//! signer, a block source, a key/value store and the framed message pipe.
//! The core never holds raw channel or node keys and never opens sockets;
//! everything passing these traits is owned by the embedding application.

use amplify::Slice32;
use bitcoin::{Transaction, Txid};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;

use crate::crypto::CryptoError;
use crate::p2p::NodeId;
use crate::sphinx::Ecdh;

/// Identifier of a key inside the external signer.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
)]
#[display("key#{0}")]
pub struct KeyId(u32);

/// Errors produced by an external signer.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SignerError {
    /// signer does not know key {0}
    UnknownKey(KeyId),

    /// signer refused the operation: {0}
    Refused(String),
}

/// External signer surface. Gossip and BOLT-12 signatures, Sphinx shared
/// secrets and blinded-path tweaks all go through here.
pub trait Signer {
    /// ECDSA signature over a 32-byte digest with the identified key.
    fn sign(
        &self,
        digest: &Slice32,
        key_id: KeyId,
    ) -> Result<Signature, SignerError>;

    /// BOLT-4 ECDH of the identified key with `point`.
    fn ecdh(
        &self,
        point: &PublicKey,
        key_id: KeyId,
    ) -> Result<Slice32, SignerError>;

    /// ECDH with the identified key multiplied by `tweak` first; needed
    /// when peeling onions addressed to a blinded identity.
    fn ecdh_tweaked(
        &self,
        point: &PublicKey,
        tweak: &Slice32,
        key_id: KeyId,
    ) -> Result<Slice32, SignerError>;
}

/// Adapter presenting one signer key as the [`Ecdh`] capability the onion
/// engine consumes.
pub struct SignerEcdh<'a, S: Signer + ?Sized> {
    signer: &'a S,
    key_id: KeyId,
}

impl<'a, S: Signer + ?Sized> SignerEcdh<'a, S> {
    /// Binds a signer key for onion processing.
    pub fn new(signer: &'a S, key_id: KeyId) -> Self {
        SignerEcdh { signer, key_id }
    }
}

impl<'a, S: Signer + ?Sized> Ecdh for SignerEcdh<'a, S> {
    fn ecdh(&self, point: &PublicKey) -> Result<Slice32, CryptoError> {
        self.signer
            .ecdh(point, self.key_id)
            .map_err(|_| CryptoError::SharedSecret)
    }

    fn ecdh_tweaked(
        &self,
        point: &PublicKey,
        tweak: &Slice32,
    ) -> Result<Slice32, CryptoError> {
        self.signer
            .ecdh_tweaked(point, tweak, self.key_id)
            .map_err(|_| CryptoError::SharedSecret)
    }
}

/// Source of confirmed chain data. Blocks arrive in height order; the
/// monitor relies on that.
pub trait ChainSource {
    /// Transport-specific error type.
    type Error;

    /// Blocks until the next confirmed block is available and returns its
    /// height and transactions.
    fn next_block(&mut self)
        -> Result<(u32, Vec<Transaction>), Self::Error>;

    /// Confirmation depth of a transaction, zero when unconfirmed.
    fn get_tx_confirmations(&self, txid: &Txid)
        -> Result<u32, Self::Error>;
}

/// Entity families the store partitions records into.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum StorageBucket {
    /// Channel records keyed by channel id hex
    #[display("channels")]
    Channels,

    /// Peer records keyed by node id hex
    #[display("peers")]
    Peers,

    /// Preimage records keyed by payment hash hex
    #[display("preimages")]
    Preimages,

    /// Invoice records keyed by payment hash hex
    #[display("invoices")]
    Invoices,

    /// Routing graph nodes keyed by node id hex
    #[display("graph_nodes")]
    GraphNodes,

    /// Routing graph channels keyed by short channel id hex
    #[display("graph_channels")]
    GraphChannels,
}

/// Key/value persistence with best-effort durability. Values are opaque
/// serialized records; see the record types below for their shape.
pub trait Storage {
    /// Store-specific error type.
    type Error;

    /// Stores a record under its natural key.
    fn put(
        &mut self,
        bucket: StorageBucket,
        key: &str,
        value: &[u8],
    ) -> Result<(), Self::Error>;

    /// Loads a record.
    fn get(
        &self,
        bucket: StorageBucket,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Deletes a record.
    fn remove(
        &mut self,
        bucket: StorageBucket,
        key: &str,
    ) -> Result<(), Self::Error>;

    /// Lists the keys of a bucket.
    fn list(&self, bucket: StorageBucket)
        -> Result<Vec<String>, Self::Error>;
}

/// Framed, ordered, authenticated byte pipe to a peer; the noise
/// transport lives outside the core.
pub trait MessageTransport {
    /// Transport-specific error type.
    type Error;

    /// Sends one framed message to a peer.
    fn send(
        &mut self,
        peer: NodeId,
        message: Vec<u8>,
    ) -> Result<(), Self::Error>;

    /// Receives the next framed message from any peer.
    fn recv(&mut self) -> Result<(NodeId, Vec<u8>), Self::Error>;
}

/// Persisted channel snapshot, keyed by channel id hex.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelRecord {
    /// Channel id, hex
    pub channel_id: String,

    /// Short channel id in `BxTxO` form, once confirmed
    pub short_channel_id: Option<String>,

    /// Peer node id, hex
    pub peer_node_id: String,

    /// Channel capacity, satoshi
    pub capacity_sats: u64,

    /// Our balance, msat
    pub local_msat: u64,

    /// Peer balance, msat
    pub remote_msat: u64,

    /// Lifecycle state label
    pub state: String,
}

impl ChannelRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.channel_id
    }
}

/// Persisted peer entry, keyed by node id hex. The node key itself is
/// persisted as raw hex bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PeerRecord {
    /// Peer node id, hex-encoded raw key bytes
    pub node_id: String,

    /// Last known network address
    pub address: Option<String>,

    /// Unix time of the last successful connection
    pub last_connected: u64,
}

impl PeerRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.node_id
    }
}

/// Persisted preimage, keyed by payment hash hex.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PreimageRecord {
    /// Payment hash, hex
    pub payment_hash: String,

    /// Preimage, hex
    pub preimage: String,
}

impl PreimageRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.payment_hash
    }
}

/// Persisted invoice, keyed by payment hash hex.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct InvoiceRecord {
    /// Payment hash, hex
    pub payment_hash: String,

    /// Payment secret, hex
    pub payment_secret: String,

    /// Invoice amount, msat; open when absent
    pub amount_msat: Option<u64>,

    /// Human-readable description
    pub description: String,

    /// Unix creation time
    pub created_at: u64,

    /// Validity window, seconds
    pub expiry_secs: u64,
}

impl InvoiceRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.payment_hash
    }
}

/// Persisted routing-graph node, keyed by node id hex.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct GraphNodeRecord {
    /// Node id, hex
    pub node_id: String,

    /// Announced alias
    pub alias: String,

    /// Unix time of the freshest announcement
    pub last_update: u32,
}

impl GraphNodeRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.node_id
    }
}

/// Persisted routing-graph channel, keyed by short channel id hex.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct GraphChannelRecord {
    /// Short channel id as a hex u64
    pub short_channel_id: String,

    /// Lesser endpoint node id, hex
    pub node_1: String,

    /// Greater endpoint node id, hex
    pub node_2: String,

    /// Channel capacity, satoshi
    pub capacity_sats: u64,

    /// Unix time of the freshest message
    pub last_update: u32,
}

impl GraphChannelRecord {
    /// Natural storage key.
    pub fn storage_key(&self) -> &str {
        &self.short_channel_id
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    struct MemoryStorage {
        buckets: BTreeMap<(StorageBucket, String), Vec<u8>>,
    }

    impl Storage for MemoryStorage {
        type Error = std::convert::Infallible;

        fn put(
            &mut self,
            bucket: StorageBucket,
            key: &str,
            value: &[u8],
        ) -> Result<(), Self::Error> {
            self.buckets
                .insert((bucket, key.to_owned()), value.to_vec());
            Ok(())
        }

        fn get(
            &self,
            bucket: StorageBucket,
            key: &str,
        ) -> Result<Option<Vec<u8>>, Self::Error> {
            Ok(self.buckets.get(&(bucket, key.to_owned())).cloned())
        }

        fn remove(
            &mut self,
            bucket: StorageBucket,
            key: &str,
        ) -> Result<(), Self::Error> {
            self.buckets.remove(&(bucket, key.to_owned()));
            Ok(())
        }

        fn list(
            &self,
            bucket: StorageBucket,
        ) -> Result<Vec<String>, Self::Error> {
            Ok(self
                .buckets
                .keys()
                .filter(|(b, _)| *b == bucket)
                .map(|(_, key)| key.clone())
                .collect())
        }
    }

    #[test]
    fn storage_round_trip_per_bucket() {
        let mut storage = MemoryStorage::default();
        let record = PreimageRecord {
            payment_hash: "11".repeat(32),
            preimage: "22".repeat(32),
        };
        storage
            .put(
                StorageBucket::Preimages,
                record.storage_key(),
                record.preimage.as_bytes(),
            )
            .unwrap();
        assert_eq!(
            storage
                .get(StorageBucket::Preimages, record.storage_key())
                .unwrap(),
            Some(record.preimage.as_bytes().to_vec())
        );
        // buckets are disjoint namespaces
        assert_eq!(
            storage
                .get(StorageBucket::Invoices, record.storage_key())
                .unwrap(),
            None
        );
        assert_eq!(
            storage.list(StorageBucket::Preimages).unwrap(),
            vec![record.payment_hash.clone()]
        );
        storage
            .remove(StorageBucket::Preimages, record.storage_key())
            .unwrap();
        assert_eq!(
            storage
                .get(StorageBucket::Preimages, record.storage_key())
                .unwrap(),
            None
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn records_round_trip_through_json() {
        let channel = ChannelRecord {
            channel_id: "ab".repeat(32),
            short_channel_id: Some(s!("700123x42x1")),
            peer_node_id: "02".repeat(33),
            capacity_sats: 1_000_000,
            local_msat: 600_000_000,
            remote_msat: 400_000_000,
            state: s!("active"),
        };
        let json = serde_json::to_string(&channel).unwrap();
        assert_eq!(
            serde_json::from_str::<ChannelRecord>(&json).unwrap(),
            channel
        );

        let invoice = InvoiceRecord {
            payment_hash: "11".repeat(32),
            payment_secret: "42".repeat(32),
            amount_msat: Some(1_000_000),
            description: s!("coffee"),
            created_at: 1_700_000_000,
            expiry_secs: 3600,
        };
        let json = serde_json::to_string(&invoice).unwrap();
        assert_eq!(
            serde_json::from_str::<InvoiceRecord>(&json).unwrap(),
            invoice
        );

        let node = GraphNodeRecord {
            node_id: "03".repeat(33),
            alias: s!("satoshi"),
            last_update: 1_650_000_000,
        };
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(
            serde_json::from_str::<GraphNodeRecord>(&json).unwrap(),
            node
        );

        let graph_channel = GraphChannelRecord {
            short_channel_id: s!("0aae8c00002a0001"),
            node_1: "02".repeat(33),
            node_2: "03".repeat(33),
            capacity_sats: 5_000_000,
            last_update: 1_650_000_000,
        };
        let json = serde_json::to_string(&graph_channel).unwrap();
        assert_eq!(
            serde_json::from_str::<GraphChannelRecord>(&json).unwrap(),
            graph_channel
        );

        let peer = PeerRecord {
            node_id: "02".repeat(33),
            address: Some(s!("203.0.113.7:9735")),
            last_connected: 1_700_000_000,
        };
        let json = serde_json::to_string(&peer).unwrap();
        assert_eq!(
            serde_json::from_str::<PeerRecord>(&json).unwrap(),
            peer
        );
    }
}
