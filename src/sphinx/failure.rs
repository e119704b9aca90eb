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

//! Onion failure messages riding the Sphinx return path: the erring node
//! builds a MAC'ed failure payload and obfuscates it, every hop on the way
//! back obfuscates it again, and the payment origin strips the layers one
//! shared secret at a time until the MAC verifies.

use amplify::{Slice32, Wrapper};

use crate::crypto;

/// Fixed size of the failure payload region: code, data length, data and
/// padding.
pub const FAILURE_PAYLOAD_LEN: usize = 256;

/// Failure packet: 32-byte MAC followed by the payload region.
pub const FAILURE_PACKET_LEN: usize = FAILURE_PAYLOAD_LEN + 32;

/// Flag bit of failure codes the origin must treat as unparseable onions.
pub const BADONION: u16 = 0x8000;
/// Flag bit of permanent failures.
pub const PERM: u16 = 0x4000;
/// Flag bit of node-level (rather than channel-level) failures.
pub const NODE: u16 = 0x2000;
/// Flag bit of failures carrying a `channel_update`.
pub const UPDATE: u16 = 0x1000;

/// Onion failure codes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[display(Debug)]
#[repr(u16)]
pub enum FailureCode {
    /// The realm byte of the onion is unknown
    InvalidRealm = 0x4001,

    /// The forwarding node is temporarily unable to forward
    TemporaryNodeFailure = 0x2002,

    /// The forwarding node refuses to forward
    PermanentNodeFailure = 0x4002,

    /// The forwarding node requires an unsupported feature
    RequiredNodeFeatureMissing = 0x4003,

    /// The onion version byte is unknown
    InvalidOnionVersion = 0x4004,

    /// The onion HMAC does not verify
    InvalidOnionHmac = 0x4005,

    /// The onion ephemeral key is unparsable
    InvalidOnionKey = 0x4006,

    /// The HTLC is below the channel minimum
    AmountBelowMinimum = 0x100B,

    /// The forwarding fee is insufficient
    FeeInsufficient = 0x100C,

    /// The outgoing CLTV does not match the onion payload
    IncorrectCltvExpiry = 0x100D,

    /// The HTLC expires too close to the current height
    ExpiryTooSoon = 0x100E,

    /// Unknown payment hash, mismatched secret or amount
    IncorrectOrUnknownPaymentDetails = 0x400F,

    /// Final hop CLTV does not match the onion payload
    FinalIncorrectCltvExpiry = 0x4012,

    /// Final hop amount does not match the declared total
    FinalIncorrectHtlcAmount = 0x4013,

    /// The channel is disabled for forwarding
    ChannelDisabled = 0x1014,

    /// The HTLC expires too far in the future
    ExpiryTooFar = 0x0015,

    /// The hop payload TLV is malformed or misses required records
    InvalidOnionPayload = 0x4016,

    /// Not all parts of the multi-path payment arrived in time
    MppTimeout = 0x4017,

    /// The blinded path cannot be used
    InvalidOnionBlinding = 0x4018,
}

impl FailureCode {
    /// Numeric wire representation of the code.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parses a wire failure code.
    pub fn from_u16(code: u16) -> Option<FailureCode> {
        Some(match code {
            0x4001 => FailureCode::InvalidRealm,
            0x2002 => FailureCode::TemporaryNodeFailure,
            0x4002 => FailureCode::PermanentNodeFailure,
            0x4003 => FailureCode::RequiredNodeFeatureMissing,
            0x4004 => FailureCode::InvalidOnionVersion,
            0x4005 => FailureCode::InvalidOnionHmac,
            0x4006 => FailureCode::InvalidOnionKey,
            0x100B => FailureCode::AmountBelowMinimum,
            0x100C => FailureCode::FeeInsufficient,
            0x100D => FailureCode::IncorrectCltvExpiry,
            0x100E => FailureCode::ExpiryTooSoon,
            0x400F => FailureCode::IncorrectOrUnknownPaymentDetails,
            0x4012 => FailureCode::FinalIncorrectCltvExpiry,
            0x4013 => FailureCode::FinalIncorrectHtlcAmount,
            0x1014 => FailureCode::ChannelDisabled,
            0x0015 => FailureCode::ExpiryTooFar,
            0x4016 => FailureCode::InvalidOnionPayload,
            0x4017 => FailureCode::MppTimeout,
            0x4018 => FailureCode::InvalidOnionBlinding,
            _ => return None,
        })
    }

    /// Whether the failure is permanent for the failing channel or node.
    pub fn is_permanent(self) -> bool {
        self.to_u16() & PERM != 0
    }

    /// Whether the failure concerns the node rather than a channel.
    pub fn is_node_failure(self) -> bool {
        self.to_u16() & NODE != 0
    }
}

/// Errors from decoding a failure packet after de-obfuscation.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum FailureDecodeError {
    /// failure packet has wrong length {0}
    WrongPacketLength(usize),

    /// no shared secret of the route authenticates the failure packet
    UnrecognizedMac,

    /// failure data length {0} exceeds the payload region
    WrongDataLength(usize),

    /// unknown failure code {0:#06x}
    UnknownCode(u16),
}

/// A decoded onion failure.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("{code}")]
pub struct FailureMessage {
    /// The failure code
    pub code: FailureCode,

    /// Code-specific data (e.g. a `channel_update` for UPDATE failures)
    pub data: Vec<u8>,
}

impl FailureMessage {
    /// Creates a failure without attached data.
    pub fn new(code: FailureCode) -> FailureMessage {
        FailureMessage { code, data: vec![] }
    }

    fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(FAILURE_PAYLOAD_LEN);
        payload.extend_from_slice(&self.code.to_u16().to_be_bytes());
        payload.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.data);
        payload.resize(FAILURE_PAYLOAD_LEN, 0);
        payload
    }

    fn from_payload(payload: &[u8]) -> Result<Self, FailureDecodeError> {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let code = FailureCode::from_u16(code)
            .ok_or(FailureDecodeError::UnknownCode(code))?;
        let data_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        if data_len > FAILURE_PAYLOAD_LEN - 4 {
            return Err(FailureDecodeError::WrongDataLength(data_len));
        }
        Ok(FailureMessage {
            code,
            data: payload[4..4 + data_len].to_vec(),
        })
    }
}

/// Builds an obfuscated failure packet at the erring hop: MAC the payload
/// under the hop's "um" key, then apply the hop's own obfuscation layer.
pub fn build_failure_packet(
    shared_secret: &Slice32,
    failure: &FailureMessage,
) -> Vec<u8> {
    let um = crypto::derive_key(b"um", shared_secret);
    let payload = failure.to_payload();
    let mac = crypto::hmac_sha256(um.as_inner(), &[&payload]);

    let mut packet = Vec::with_capacity(FAILURE_PACKET_LEN);
    packet.extend_from_slice(mac.as_inner());
    packet.extend_from_slice(&payload);
    crypto::chacha_xor(&um, &mut packet);
    packet
}

/// Adds one obfuscation layer while forwarding a failure back towards the
/// payment origin.
pub fn wrap_failure_packet(shared_secret: &Slice32, packet: &mut [u8]) {
    let um = crypto::derive_key(b"um", shared_secret);
    crypto::chacha_xor(&um, packet);
}

/// Strips obfuscation layers at the payment origin, one per route hop,
/// until a MAC verifies; returns the index of the erring hop and the
/// decoded failure.
pub fn decode_failure_packet(
    hop_shared_secrets: &[Slice32],
    packet: &[u8],
) -> Result<(usize, FailureMessage), FailureDecodeError> {
    if packet.len() != FAILURE_PACKET_LEN {
        return Err(FailureDecodeError::WrongPacketLength(packet.len()));
    }
    let mut buf = packet.to_vec();
    for (hop, shared_secret) in hop_shared_secrets.iter().enumerate() {
        let um = crypto::derive_key(b"um", shared_secret);
        crypto::chacha_xor(&um, &mut buf);
        let mac = crypto::hmac_sha256(um.as_inner(), &[&buf[32..]]);
        if crypto::ct_eq(mac.as_inner(), &buf[..32]) {
            return FailureMessage::from_payload(&buf[32..])
                .map(|failure| (hop, failure));
        }
    }
    Err(FailureDecodeError::UnrecognizedMac)
}

#[cfg(test)]
mod test {
    use super::*;

    fn secrets() -> Vec<Slice32> {
        (1u8..=4).map(|i| Slice32::from_inner([i; 32])).collect()
    }

    #[test]
    fn failure_travels_the_return_path() {
        let secrets = secrets();
        let erring_hop = 2;
        let failure = FailureMessage {
            code: FailureCode::FeeInsufficient,
            data: vec![0x00, 0x01, 0x02],
        };

        let mut packet =
            build_failure_packet(&secrets[erring_hop], &failure);
        // hops between the erring node and the origin wrap again
        for hop in (0..erring_hop).rev() {
            wrap_failure_packet(&secrets[hop], &mut packet);
        }

        let (hop, decoded) =
            decode_failure_packet(&secrets, &packet).unwrap();
        assert_eq!(hop, erring_hop);
        assert_eq!(decoded, failure);
    }

    #[test]
    fn single_hop_failure() {
        let secrets = secrets();
        let failure = FailureMessage::new(
            FailureCode::IncorrectOrUnknownPaymentDetails,
        );
        let packet = build_failure_packet(&secrets[0], &failure);
        let (hop, decoded) =
            decode_failure_packet(&secrets, &packet).unwrap();
        assert_eq!(hop, 0);
        assert_eq!(decoded.code.to_u16(), 0x400F);
        assert!(decoded.code.is_permanent());
    }

    #[test]
    fn unrelated_secret_does_not_authenticate() {
        let failure = FailureMessage::new(FailureCode::MppTimeout);
        let packet =
            build_failure_packet(&Slice32::from_inner([0xEE; 32]), &failure);
        assert_eq!(
            decode_failure_packet(&secrets(), &packet),
            Err(FailureDecodeError::UnrecognizedMac)
        );
    }

    #[test]
    fn code_flags() {
        assert!(FailureCode::PermanentNodeFailure.is_node_failure());
        assert!(FailureCode::PermanentNodeFailure.is_permanent());
        assert!(!FailureCode::ExpiryTooFar.is_permanent());
        assert_eq!(FailureCode::from_u16(0x4016), Some(FailureCode::InvalidOnionPayload));
        assert_eq!(FailureCode::from_u16(0x9999), None);
    }
}
