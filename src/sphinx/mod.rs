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

//! Sphinx onion packets: fixed-size layered encryption for multi-hop
//! payments and onion messages.
//!
//! A packet is constructed once by the payment origin and peeled one layer
//! per hop; every intermediate packet is indistinguishable in size and
//! entropy from the original, so a hop only learns its predecessor, its
//! successor and its own payload.

mod blinded;
mod failure;
mod payload;

pub use blinded::{
    blind_path, construct_onion_message, decrypt_hop_data, BlindedHop,
    BlindedPath,
};
pub use failure::{
    build_failure_packet, decode_failure_packet, wrap_failure_packet,
    FailureCode, FailureDecodeError, FailureMessage, FAILURE_PACKET_LEN,
    FAILURE_PAYLOAD_LEN,
};
pub use payload::{OnionMsgPayload, PaymentData, PaymentPayload};

use std::io;

use amplify::{Slice32, Wrapper};
use ln_wire::{BigSize, WireDecode, WireEncode};
use secp256k1::{PublicKey, SecretKey, SECP256K1};

use crate::crypto::{self, CryptoError};

/// The only defined onion packet version.
pub const SPHINX_VERSION: u8 = 0;

/// Maximum number of hops a route may carry.
pub const MAX_HOPS: usize = 20;

/// Size of the layered hop-payloads region.
pub const HOP_PAYLOADS_LEN: usize = 1300;

/// Size of the packet HMAC and of every per-hop forwarding HMAC.
pub const HMAC_LEN: usize = 32;

/// Total onion packet size: version, ephemeral key, payloads, HMAC.
pub const PACKET_LEN: usize = 1 + 33 + HOP_PAYLOADS_LEN + HMAC_LEN;

/// Errors of Sphinx packet construction and peeling.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SphinxError {
    /// onion packet version {0} is not supported
    VersionNotSupported(u8),

    /// onion packet HMAC does not authenticate its payloads
    HmacMismatch,

    /// route must contain at least one hop
    EmptyRoute,

    /// route of {0} hops exceeds the 20-hop packet capacity
    TooManyHops(usize),

    /// hop payloads of {0} bytes total exceed the 1300-byte packet capacity
    PayloadsTooLarge(usize),

    /// hop payload frame is malformed
    MalformedFrame,

    /// elliptic-curve operation failed
    #[from]
    #[display(inner)]
    Crypto(CryptoError),
}

/// Private-key side of the BOLT-4 ECDH, abstracted so the node key can
/// stay inside an external signer.
pub trait Ecdh {
    /// `sha256(serialize(priv · point))`.
    fn ecdh(&self, point: &PublicKey) -> Result<Slice32, CryptoError>;

    /// Same as [`Ecdh::ecdh`] with the private key multiplied by `tweak`
    /// first; used by blinded routes.
    fn ecdh_tweaked(
        &self,
        point: &PublicKey,
        tweak: &Slice32,
    ) -> Result<Slice32, CryptoError>;
}

impl Ecdh for SecretKey {
    fn ecdh(&self, point: &PublicKey) -> Result<Slice32, CryptoError> {
        crypto::ecdh(self, point)
    }

    fn ecdh_tweaked(
        &self,
        point: &PublicKey,
        tweak: &Slice32,
    ) -> Result<Slice32, CryptoError> {
        crypto::ecdh(&crypto::mul_secret(self, tweak)?, point)
    }
}

/// One hop of a route: the node to traverse and its already-serialized
/// payload TLV.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Hop {
    /// Public key of the hop (a real node id, or a blinded one)
    pub node_id: PublicKey,

    /// Serialized payload the hop will decrypt
    pub payload: Vec<u8>,
}

impl Hop {
    /// Constructs a hop from its components.
    pub fn with(node_id: PublicKey, payload: Vec<u8>) -> Hop {
        Hop { node_id, payload }
    }
}

/// Fixed-size Sphinx packet as carried by `update_add_htlc` and onion
/// messages.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OnionPacket {
    /// Version byte; only version 0 is defined
    pub version: u8,

    /// Ephemeral key the processing hop runs ECDH against
    pub ephemeral_key: PublicKey,

    /// Layer-encrypted hop payloads
    pub hop_payloads: Box<[u8; HOP_PAYLOADS_LEN]>,

    /// HMAC binding the payloads and the associated data
    pub hmac: Slice32,
}

impl WireEncode for OnionPacket {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        self.version.wire_encode(&mut e)?;
        self.ephemeral_key.wire_encode(&mut e)?;
        e.write_all(&self.hop_payloads[..])?;
        self.hmac.wire_encode(&mut e)?;
        Ok(PACKET_LEN)
    }
}

impl WireDecode for OnionPacket {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let version = u8::wire_decode(&mut d)?;
        let ephemeral_key = PublicKey::wire_decode(&mut d)?;
        let mut hop_payloads = Box::new([0u8; HOP_PAYLOADS_LEN]);
        d.read_exact(&mut hop_payloads[..])?;
        let hmac = Slice32::wire_decode(&mut d)?;
        Ok(OnionPacket {
            version,
            ephemeral_key,
            hop_payloads,
            hmac,
        })
    }
}

/// Result of peeling one onion layer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PeeledOnion {
    /// The processing hop's own payload, still TLV-serialized
    pub payload: Vec<u8>,

    /// Packet for the next hop; `None` when this hop is final
    pub next: Option<OnionPacket>,

    /// Shared secret of this hop, needed to wrap failure messages
    pub shared_secret: Slice32,
}

/// Derives the per-hop shared secrets for a route by walking the ephemeral
/// key through its blinding factors.
pub fn hop_shared_secrets(
    session_key: &SecretKey,
    hops: &[PublicKey],
) -> Result<Vec<Slice32>, SphinxError> {
    let mut secrets = Vec::with_capacity(hops.len());
    let mut ephemeral_key = *session_key;
    for hop_pubkey in hops {
        let shared_secret = crypto::ecdh(&ephemeral_key, hop_pubkey)?;
        let ephemeral_pub =
            PublicKey::from_secret_key(SECP256K1, &ephemeral_key);
        let blinding = crypto::sha256(&[
            &ephemeral_pub.serialize(),
            shared_secret.as_inner(),
        ]);
        secrets.push(shared_secret);
        ephemeral_key = crypto::mul_secret(&ephemeral_key, &blinding)?;
    }
    Ok(secrets)
}

fn frame_len(payload: &[u8]) -> usize {
    BigSize::from(payload.len()).encoded_len() + payload.len() + HMAC_LEN
}

fn encode_frame(payload: &[u8], hmac: &Slice32) -> Vec<u8> {
    let mut frame = BigSize::from(payload.len()).wire_serialize();
    frame.extend_from_slice(payload);
    frame.extend_from_slice(hmac.as_inner());
    frame
}

/// Filler bytes covering the region the intermediate hops will shift into
/// view, computed by simulating the per-hop stream consumption over the
/// tail of the payloads buffer.
fn filler(shared_secrets: &[Slice32], frame_lens: &[usize]) -> Vec<u8> {
    let mut filler: Vec<u8> = vec![];
    let mut pos = 0usize;
    let hops = shared_secrets.len();
    for (shared_secret, frame_len) in
        shared_secrets.iter().zip(frame_lens).take(hops - 1)
    {
        let rho = crypto::derive_key(b"rho", shared_secret);
        let offset = (HOP_PAYLOADS_LEN - pos) as u64;
        pos += frame_len;
        filler.resize(pos, 0);
        crypto::chacha_xor_offset(&rho, offset, &mut filler);
    }
    filler
}

/// Constructs a Sphinx packet over a route of at most 20 hops.
///
/// `assoc_data` is bound into every per-hop HMAC (the payment hash for
/// payment onions, empty for onion messages).
pub fn construct_onion(
    session_key: &SecretKey,
    hops: &[Hop],
    assoc_data: &[u8],
) -> Result<OnionPacket, SphinxError> {
    if hops.is_empty() {
        return Err(SphinxError::EmptyRoute);
    }
    if hops.len() > MAX_HOPS {
        return Err(SphinxError::TooManyHops(hops.len()));
    }
    let frame_lens: Vec<usize> =
        hops.iter().map(|hop| frame_len(&hop.payload)).collect();
    let total: usize = frame_lens.iter().sum();
    if total > HOP_PAYLOADS_LEN {
        return Err(SphinxError::PayloadsTooLarge(total));
    }

    let node_ids: Vec<PublicKey> =
        hops.iter().map(|hop| hop.node_id).collect();
    let shared_secrets = hop_shared_secrets(session_key, &node_ids)?;
    let filler = filler(&shared_secrets, &frame_lens);

    // Start from a pseudo-random buffer so unused tail bytes carry no
    // structure.
    let pad_key = crypto::derive_key(
        b"pad",
        &Slice32::from_inner(session_key.secret_bytes()),
    );
    let mut buffer = Box::new([0u8; HOP_PAYLOADS_LEN]);
    crypto::chacha_xor(&pad_key, &mut buffer[..]);

    let mut hmac = Slice32::default();
    for i in (0..hops.len()).rev() {
        let frame = encode_frame(&hops[i].payload, &hmac);
        buffer.copy_within(0..HOP_PAYLOADS_LEN - frame.len(), frame.len());
        buffer[..frame.len()].copy_from_slice(&frame);

        let rho = crypto::derive_key(b"rho", &shared_secrets[i]);
        crypto::chacha_xor(&rho, &mut buffer[..]);

        if i == hops.len() - 1 {
            buffer[HOP_PAYLOADS_LEN - filler.len()..]
                .copy_from_slice(&filler);
        }

        let mu = crypto::derive_key(b"mu", &shared_secrets[i]);
        hmac = crypto::hmac_sha256(mu.as_inner(), &[&buffer[..], assoc_data]);
    }

    Ok(OnionPacket {
        version: SPHINX_VERSION,
        ephemeral_key: PublicKey::from_secret_key(SECP256K1, session_key),
        hop_payloads: buffer,
        hmac,
    })
}

/// Peels one layer of an onion packet at the processing hop.
///
/// `path_key` carries the route-blinding ephemeral when the hop is part of
/// a blinded route (delivered in `update_add_htlc` or the onion message
/// envelope); the shared secret is then derived with the tweaked node key.
pub fn peel_onion(
    packet: &OnionPacket,
    ecdh: &impl Ecdh,
    assoc_data: &[u8],
    path_key: Option<&PublicKey>,
) -> Result<PeeledOnion, SphinxError> {
    if packet.version != SPHINX_VERSION {
        return Err(SphinxError::VersionNotSupported(packet.version));
    }

    let shared_secret = match path_key {
        None => ecdh.ecdh(&packet.ephemeral_key)?,
        Some(path_key) => {
            let path_secret = ecdh.ecdh(path_key)?;
            let tweak = crypto::hmac_sha256(b"blinded_node_id", &[
                path_secret.as_inner()
            ]);
            ecdh.ecdh_tweaked(&packet.ephemeral_key, &tweak)?
        }
    };

    let mu = crypto::derive_key(b"mu", &shared_secret);
    let expected = crypto::hmac_sha256(mu.as_inner(), &[
        &packet.hop_payloads[..],
        assoc_data,
    ]);
    if !crypto::ct_eq(expected.as_inner(), packet.hmac.as_inner()) {
        return Err(SphinxError::HmacMismatch);
    }

    // Decrypt over twice the payload size: the tail half provides the
    // entropy shifted in for the next hop.
    let rho = crypto::derive_key(b"rho", &shared_secret);
    let mut buffer = vec![0u8; HOP_PAYLOADS_LEN * 2];
    buffer[..HOP_PAYLOADS_LEN].copy_from_slice(&packet.hop_payloads[..]);
    crypto::chacha_xor(&rho, &mut buffer);

    let mut cursor = io::Cursor::new(&buffer[..]);
    let payload_len = BigSize::wire_decode(&mut cursor)
        .map_err(|_| SphinxError::MalformedFrame)?
        .into_inner() as usize;
    let prefix_len = cursor.position() as usize;
    let frame_len = prefix_len + payload_len + HMAC_LEN;
    if frame_len > HOP_PAYLOADS_LEN {
        return Err(SphinxError::MalformedFrame);
    }
    let payload =
        buffer[prefix_len..prefix_len + payload_len].to_vec();
    let mut next_hmac = [0u8; HMAC_LEN];
    next_hmac
        .copy_from_slice(&buffer[prefix_len + payload_len..frame_len]);

    if next_hmac == [0u8; HMAC_LEN] {
        return Ok(PeeledOnion {
            payload,
            next: None,
            shared_secret,
        });
    }

    let blinding = crypto::sha256(&[
        &packet.ephemeral_key.serialize(),
        shared_secret.as_inner(),
    ]);
    let next_ephemeral =
        crypto::mul_point(&packet.ephemeral_key, &blinding)?;

    let mut next_payloads = Box::new([0u8; HOP_PAYLOADS_LEN]);
    next_payloads
        .copy_from_slice(&buffer[frame_len..frame_len + HOP_PAYLOADS_LEN]);

    Ok(PeeledOnion {
        payload,
        next: Some(OnionPacket {
            version: SPHINX_VERSION,
            ephemeral_key: next_ephemeral,
            hop_payloads: next_payloads,
            hmac: Slice32::from_inner(next_hmac),
        }),
        shared_secret,
    })
}
