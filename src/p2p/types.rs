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

use std::fmt::{self, Display, Formatter};
use std::io;
use std::io::Read;
use std::str::FromStr;

use amplify::flags::FlagVec;
use amplify::hex::{self, FromHex};
use amplify::{Slice32, Wrapper};
use bitcoin::hashes::Hash;
use bitcoin::{Network, OutPoint, Txid};
use ln_wire::{Error, WireDecode, WireEncode};
use once_cell::sync::Lazy;
use secp256k1::PublicKey;

/// Chain hash of the bitcoin mainnet: the genesis block hash in internal
/// byte order, as carried by gossip messages and BOLT-12 chain lists.
pub static BITCOIN_CHAIN_HASH: Lazy<Slice32> = Lazy::new(|| {
    let genesis = bitcoin::blockdata::constants::genesis_block(Network::Bitcoin);
    Slice32::from_inner(genesis.block_hash().into_inner())
});

/// Channel id: 256-bit number constructed from the funding txid XOR'ed with
/// the 16-bit funding output number in its last two bytes.
#[derive(
    Wrapper,
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
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct ChannelId(Slice32);

impl FromHex for ChannelId {
    fn from_byte_iter<I>(iter: I) -> Result<Self, hex::Error>
    where
        I: Iterator<Item = Result<u8, hex::Error>>
            + ExactSizeIterator
            + DoubleEndedIterator,
    {
        Ok(Self(Slice32::from_byte_iter(iter)?))
    }
}

impl ChannelId {
    /// Computes the channel id of a funding outpoint.
    pub fn with(funding_outpoint: OutPoint) -> ChannelId {
        let mut slice = funding_outpoint.txid.into_inner();
        let vout = (funding_outpoint.vout as u16).to_be_bytes();
        slice[30] ^= vout[0];
        slice[31] ^= vout[1];
        ChannelId::from_inner(Slice32::from_inner(slice))
    }

    /// An all-zero channel id addresses every open channel with the peer
    /// (used by `error` and `warning` messages).
    pub fn is_wildcard(&self) -> bool {
        self.0.as_inner() == &[0u8; 32]
    }
}

impl WireEncode for ChannelId {
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error> {
        self.0.wire_encode(e)
    }
}

impl WireDecode for ChannelId {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error> {
        Slice32::wire_decode(d).map(ChannelId)
    }
}

/// Temporary channel id used before the funding transaction exists.
#[derive(
    Wrapper,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    From,
)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct TempChannelId(Slice32);

impl TempChannelId {
    /// Samples a fresh random temporary channel id.
    pub fn random() -> TempChannelId {
        TempChannelId(Slice32::random())
    }
}

impl From<TempChannelId> for ChannelId {
    fn from(temp: TempChannelId) -> ChannelId {
        ChannelId(temp.into_inner())
    }
}

impl WireEncode for TempChannelId {
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error> {
        self.0.wire_encode(e)
    }
}

impl WireDecode for TempChannelId {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error> {
        Slice32::wire_decode(d).map(TempChannelId)
    }
}

/// Identity of a lightning node: a compressed secp256k1 public key.
///
/// Ordering is lexicographic over the 33-byte compressed serialization,
/// which is the order `channel_announcement` requires for its two node ids.
#[derive(Wrapper, Copy, Clone, PartialEq, Eq, Hash, Debug, Display, From)]
#[display(inner)]
pub struct NodeId(PublicKey);

impl NodeId {
    /// Compressed 33-byte serialization.
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// The underlying public key.
    pub fn public_key(&self) -> PublicKey {
        self.0
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.serialize().cmp(&other.serialize())
    }
}

impl FromStr for NodeId {
    type Err = secp256k1::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_str(s).map(NodeId)
    }
}

impl WireEncode for NodeId {
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error> {
        self.0.wire_encode(e)
    }
}

impl WireDecode for NodeId {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error> {
        PublicKey::wire_decode(d).map(NodeId)
    }
}

/// Short channel id: 8-byte packing of the block height, transaction index
/// and output index of the channel funding output.
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
    Getters,
)]
#[display("{block_height}x{tx_index}x{output_index}")]
pub struct ShortChannelId {
    block_height: u32,
    tx_index: u32,
    output_index: u16,
}

impl ShortChannelId {
    /// Constructs a short channel id; fails if height or tx index exceed
    /// their 24-bit wire representation.
    pub fn new(
        block_height: u32,
        tx_index: u32,
        output_index: u16,
    ) -> Option<ShortChannelId> {
        if block_height > 0x00FF_FFFF || tx_index > 0x00FF_FFFF {
            return None;
        }
        Some(ShortChannelId {
            block_height,
            tx_index,
            output_index,
        })
    }

    /// Packs into the numeric form `height << 40 | tx << 16 | vout`.
    pub fn to_u64(self) -> u64 {
        (self.block_height as u64) << 40
            | (self.tx_index as u64) << 16
            | self.output_index as u64
    }

    /// Unpacks from the numeric form.
    pub fn from_u64(value: u64) -> ShortChannelId {
        ShortChannelId {
            block_height: (value >> 40) as u32 & 0x00FF_FFFF,
            tx_index: (value >> 16) as u32 & 0x00FF_FFFF,
            output_index: value as u16,
        }
    }
}

/// Error parsing [`ShortChannelId`] from strings.
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error,
)]
#[display(doc_comments)]
pub enum ShortChannelIdParseError {
    /// wrong block height data
    WrongBlockHeight,
    /// wrong transaction index number
    WrongTxIndex,
    /// wrong output index number
    WrongOutputIndex,
    /// expected three short channel id components (block height, tx index
    /// and output index)
    WrongComponentCount,
}

impl FromStr for ShortChannelId {
    type Err = ShortChannelIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('x');
        match (split.next(), split.next(), split.next(), split.next()) {
            (Some(block_height), Some(tx_index), Some(output_index), None) => {
                ShortChannelId::new(
                    block_height.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongBlockHeight
                    })?,
                    tx_index
                        .parse()
                        .map_err(|_| ShortChannelIdParseError::WrongTxIndex)?,
                    output_index.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongOutputIndex
                    })?,
                )
                .ok_or(ShortChannelIdParseError::WrongBlockHeight)
            }
            _ => Err(ShortChannelIdParseError::WrongComponentCount),
        }
    }
}

impl WireEncode for ShortChannelId {
    fn wire_encode<E: io::Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(&self.to_u64().to_be_bytes())?;
        Ok(8)
    }
}

impl WireDecode for ShortChannelId {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, Error> {
        let mut buf = [0u8; 8];
        d.read_exact(&mut buf)?;
        Ok(ShortChannelId::from_u64(u64::from_be_bytes(buf)))
    }
}

/// RGB color of a node in `node_announcement`.
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Default, From,
)]
#[display(Debug)]
pub struct NodeColor([u8; 3]);

impl WireEncode for NodeColor {
    fn wire_encode<E: io::Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(self.as_inner())?;
        Ok(3)
    }
}

impl WireDecode for NodeColor {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, Error> {
        let mut buf = [0u8; 3];
        d.read_exact(&mut buf)?;
        Ok(NodeColor::from_inner(buf))
    }
}

/// Node alias: 32 bytes of zero-padded UTF-8.
#[derive(
    Wrapper,
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
#[display(LowerHex)]
#[wrapper(LowerHex, UpperHex)]
pub struct Alias(Slice32);

impl WireEncode for Alias {
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error> {
        self.0.wire_encode(e)
    }
}

impl WireDecode for Alias {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error> {
        Slice32::wire_decode(d).map(Alias)
    }
}

/// Errors of semantic node-address validation.
#[derive(
    Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error,
)]
#[display(doc_comments)]
pub enum AddressError {
    /// node address carries zero port number
    ZeroPort,

    /// DNS hostname in a node address is empty
    EmptyHostname,

    /// DNS hostname of {0} bytes exceeds the 255-byte limit
    HostnameTooLong(usize),

    /// unknown address descriptor type {0}
    UnknownDescriptor(u8),
}

/// Address descriptor announced by a node (BOLT-7 `node_announcement`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum NodeAddr {
    /// IPv4 address and port.
    Ipv4 {
        /// The 4-byte IPv4 address
        addr: [u8; 4],
        /// The port on which the node is listening
        port: u16,
    },

    /// IPv6 address and port.
    Ipv6 {
        /// The 16-byte IPv6 address
        addr: [u8; 16],
        /// The port on which the node is listening
        port: u16,
    },

    /// Tor v3 onion service.
    TorV3 {
        /// The ed25519 long-term public key of the peer
        ed25519_pubkey: [u8; 32],
        /// The checksum of the pubkey and version as included in the onion
        /// address
        checksum: u16,
        /// The version byte as defined by the Tor onion v3 spec
        version: u8,
        /// The port on which the node is listening
        port: u16,
    },

    /// DNS hostname and port.
    Dns {
        /// Hostname bytes (ASCII)
        hostname: Vec<u8>,
        /// The port on which the node is listening
        port: u16,
    },
}

impl NodeAddr {
    fn descriptor_type(&self) -> u8 {
        match self {
            NodeAddr::Ipv4 { .. } => 1,
            NodeAddr::Ipv6 { .. } => 2,
            NodeAddr::TorV3 { .. } => 4,
            NodeAddr::Dns { .. } => 5,
        }
    }

    /// Length of the encoded descriptor, including the type byte.
    pub fn encoded_len(&self) -> usize {
        match self {
            NodeAddr::Ipv4 { .. } => 1 + 4 + 2,
            NodeAddr::Ipv6 { .. } => 1 + 16 + 2,
            NodeAddr::TorV3 { .. } => 1 + 32 + 2 + 1 + 2,
            NodeAddr::Dns { hostname, .. } => 1 + 1 + hostname.len() + 2,
        }
    }

    /// Port the node listens on.
    pub fn port(&self) -> u16 {
        match self {
            NodeAddr::Ipv4 { port, .. }
            | NodeAddr::Ipv6 { port, .. }
            | NodeAddr::TorV3 { port, .. }
            | NodeAddr::Dns { port, .. } => *port,
        }
    }

    /// Semantic validation: non-zero port and hostname length bounds.
    pub fn validate(&self) -> Result<(), AddressError> {
        if self.port() == 0 {
            return Err(AddressError::ZeroPort);
        }
        if let NodeAddr::Dns { hostname, .. } = self {
            if hostname.is_empty() {
                return Err(AddressError::EmptyHostname);
            }
            if hostname.len() > 255 {
                return Err(AddressError::HostnameTooLong(hostname.len()));
            }
        }
        Ok(())
    }
}

impl Display for NodeAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            NodeAddr::Ipv4 { addr, port } => write!(
                f,
                "{}.{}.{}.{}:{}",
                addr[0], addr[1], addr[2], addr[3], port
            ),
            NodeAddr::Ipv6 { addr, port } => {
                let segments: Vec<String> = addr
                    .chunks(2)
                    .map(|pair| {
                        format!("{:x}", (pair[0] as u16) << 8 | pair[1] as u16)
                    })
                    .collect();
                write!(f, "[{}]:{}", segments.join(":"), port)
            }
            NodeAddr::TorV3 { port, .. } => write!(f, "<torv3>.onion:{}", port),
            NodeAddr::Dns { hostname, port } => write!(
                f,
                "{}:{}",
                String::from_utf8_lossy(hostname),
                port
            ),
        }
    }
}

impl WireEncode for NodeAddr {
    fn wire_encode<E: io::Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(&[self.descriptor_type()])?;
        match self {
            NodeAddr::Ipv4 { addr, port } => {
                e.write_all(addr)?;
                e.write_all(&port.to_be_bytes())?;
            }
            NodeAddr::Ipv6 { addr, port } => {
                e.write_all(addr)?;
                e.write_all(&port.to_be_bytes())?;
            }
            NodeAddr::TorV3 {
                ed25519_pubkey,
                checksum,
                version,
                port,
            } => {
                e.write_all(ed25519_pubkey)?;
                e.write_all(&checksum.to_be_bytes())?;
                e.write_all(&[*version])?;
                e.write_all(&port.to_be_bytes())?;
            }
            NodeAddr::Dns { hostname, port } => {
                if hostname.len() > 255 {
                    return Err(Error::TooLargeData(hostname.len()));
                }
                e.write_all(&[hostname.len() as u8])?;
                e.write_all(hostname)?;
                e.write_all(&port.to_be_bytes())?;
            }
        }
        Ok(self.encoded_len())
    }
}

impl WireDecode for NodeAddr {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, Error> {
        let ty = u8::wire_decode(&mut d)?;
        match ty {
            1 => {
                let mut addr = [0u8; 4];
                d.read_exact(&mut addr)?;
                let port = u16::wire_decode(&mut d)?;
                Ok(NodeAddr::Ipv4 { addr, port })
            }
            2 => {
                let mut addr = [0u8; 16];
                d.read_exact(&mut addr)?;
                let port = u16::wire_decode(&mut d)?;
                Ok(NodeAddr::Ipv6 { addr, port })
            }
            4 => {
                let mut ed25519_pubkey = [0u8; 32];
                d.read_exact(&mut ed25519_pubkey)?;
                let checksum = u16::wire_decode(&mut d)?;
                let version = u8::wire_decode(&mut d)?;
                let port = u16::wire_decode(&mut d)?;
                Ok(NodeAddr::TorV3 {
                    ed25519_pubkey,
                    checksum,
                    version,
                    port,
                })
            }
            5 => {
                let len = u8::wire_decode(&mut d)? as usize;
                let mut hostname = vec![0u8; len];
                d.read_exact(&mut hostname)?;
                let port = u16::wire_decode(&mut d)?;
                Ok(NodeAddr::Dns { hostname, port })
            }
            unknown => Err(Error::EnumValueNotKnown(
                "NodeAddr",
                unknown as usize,
            )),
        }
    }
}

/// List of announced node addresses, length-prefixed on the wire with the
/// total descriptor byte count (not the descriptor count).
#[derive(
    Wrapper, Clone, PartialEq, Eq, Hash, Debug, Display, Default, From,
)]
#[display(Debug)]
pub struct AddressList(Vec<NodeAddr>);

impl AddressList {
    /// Iterates the announced addresses.
    pub fn iter(&self) -> std::slice::Iter<NodeAddr> {
        self.0.iter()
    }

    /// Semantic validation of every descriptor.
    pub fn validate(&self) -> Result<(), AddressError> {
        self.0.iter().try_for_each(NodeAddr::validate)
    }
}

impl WireEncode for AddressList {
    fn wire_encode<E: io::Write>(&self, mut e: E) -> Result<usize, Error> {
        let total: usize = self.0.iter().map(NodeAddr::encoded_len).sum();
        if total > u16::MAX as usize {
            return Err(Error::TooLargeData(total));
        }
        (total as u16).wire_encode(&mut e)?;
        for addr in &self.0 {
            addr.wire_encode(&mut e)?;
        }
        Ok(2 + total)
    }
}

impl WireDecode for AddressList {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, Error> {
        let len = u16::wire_decode(&mut d)? as u64;
        let mut data = vec![];
        (&mut d).take(len).read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(Error::TlvRecordEof);
        }
        let mut cursor = io::Cursor::new(data);
        let mut list = vec![];
        while (cursor.position() as usize) < cursor.get_ref().len() {
            list.push(NodeAddr::wire_decode(&mut cursor)?);
        }
        Ok(AddressList(list))
    }
}

/// Feature bit vector as used by `init`, `node_announcement` and
/// `channel_announcement`.
///
/// The wire form is a 16-bit byte-length prefix followed by the feature
/// bytes with bit 0 in the least significant bit of the last byte.
#[derive(Wrapper, Clone, PartialEq, Eq, Hash, Debug, Default, From)]
pub struct Features(FlagVec);

impl Features {
    /// Creates an empty feature vector.
    pub fn new() -> Features {
        Features(FlagVec::new())
    }

    /// Sets a feature bit.
    pub fn set(&mut self, feature: u16) {
        self.0.set(feature);
    }

    /// Detects whether a feature bit is set.
    pub fn is_set(&self, feature: u16) -> bool {
        self.0.is_set(feature)
    }

    /// Returns the lowest set even feature bit which is not in `known`.
    ///
    /// Even bits are compulsory ("it's OK to be odd"): a node must not
    /// proceed with a peer requiring features it does not understand.
    pub fn unknown_even(&self, known: &[u16]) -> Option<u16> {
        self.0
            .iter()
            .filter(|bit| bit % 2 == 0 && !known.contains(bit))
            .min()
    }
}

impl WireEncode for Features {
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error> {
        let mut bytes = self.0.shrunk().as_inner().to_owned();
        // FlagVec keeps bit 0 in the first byte; the wire keeps it in the
        // last one.
        bytes.reverse();
        bytes.wire_encode(e)
    }
}

impl WireDecode for Features {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error> {
        let mut bytes = Vec::<u8>::wire_decode(d)?;
        bytes.reverse();
        Ok(Features(FlagVec::from_inner(bytes)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_id_from_outpoint() {
        let txid = Txid::from_inner([0x11; 32]);
        let channel_id = ChannelId::with(OutPoint { txid, vout: 1 });
        let mut expected = [0x11; 32];
        expected[31] ^= 0x01;
        assert_eq!(channel_id.as_inner().as_inner(), &expected);
        assert!(!channel_id.is_wildcard());
        assert!(ChannelId::default().is_wildcard());
    }

    #[test]
    fn short_channel_id_packing() {
        let scid = ShortChannelId::new(700_123, 42, 1).unwrap();
        assert_eq!(scid.to_u64(), (700_123u64 << 40) | (42 << 16) | 1);
        assert_eq!(ShortChannelId::from_u64(scid.to_u64()), scid);
        assert_eq!(scid.to_string(), "700123x42x1");
        assert_eq!("700123x42x1".parse::<ShortChannelId>().unwrap(), scid);

        let encoded = scid.wire_serialize();
        assert_eq!(encoded.len(), 8);
        assert_eq!(ShortChannelId::wire_deserialize(encoded).unwrap(), scid);
    }

    #[test]
    fn short_channel_id_bounds() {
        assert!(ShortChannelId::new(0x0100_0000, 0, 0).is_none());
        assert!(ShortChannelId::new(0, 0x0100_0000, 0).is_none());
    }

    #[test]
    fn address_encodings() {
        let ipv4 = NodeAddr::Ipv4 {
            addr: [255, 254, 253, 252],
            port: 9735,
        };
        assert_eq!(ipv4.wire_serialize(), vec![
            0x01, 0xFF, 0xFE, 0xFD, 0xFC, 0x26, 0x07
        ]);

        let dns = NodeAddr::Dns {
            hostname: b"node.example.com".to_vec(),
            port: 9735,
        };
        let torv3 = NodeAddr::TorV3 {
            ed25519_pubkey: [0xAB; 32],
            checksum: 0x0102,
            version: 3,
            port: 9735,
        };

        let list =
            AddressList(vec![ipv4.clone(), dns.clone(), torv3.clone()]);
        let encoded = list.wire_serialize();
        let total: usize =
            [&ipv4, &dns, &torv3].iter().map(|a| a.encoded_len()).sum();
        assert_eq!(
            u16::from_be_bytes([encoded[0], encoded[1]]) as usize,
            total
        );
        assert_eq!(AddressList::wire_deserialize(encoded).unwrap(), list);
    }

    #[test]
    fn address_validation() {
        assert_eq!(
            NodeAddr::Ipv4 {
                addr: [1, 2, 3, 4],
                port: 0
            }
            .validate(),
            Err(AddressError::ZeroPort)
        );
        assert_eq!(
            NodeAddr::Dns {
                hostname: vec![],
                port: 1
            }
            .validate(),
            Err(AddressError::EmptyHostname)
        );
    }

    #[test]
    fn features_roundtrip() {
        let mut features = Features::new();
        features.set(0);
        features.set(9);
        features.set(14);
        let encoded = features.wire_serialize();
        let decoded = Features::wire_deserialize(encoded).unwrap();
        assert!(decoded.is_set(0));
        assert!(decoded.is_set(9));
        assert!(decoded.is_set(14));
        assert!(!decoded.is_set(1));
        assert_eq!(decoded, features);
    }

    #[test]
    fn unknown_even_features() {
        let mut features = Features::new();
        features.set(12);
        features.set(15);
        assert_eq!(features.unknown_even(&[12]), None);
        assert_eq!(features.unknown_even(&[]), Some(12));
    }

    #[test]
    fn node_id_ordering_is_lexicographic() {
        let a = NodeId::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        let b = NodeId::from_str(
            "03a634ce61a95bb3b0a543b63dc13c1f0edeba5e0fde87eacbd75dbaa4a5f7a2c0",
        )
        .unwrap();
        assert!(a < b);
        assert_eq!(a.serialize()[0], 0x02);
    }
}
