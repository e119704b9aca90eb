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

//! Blinded paths: routes whose node identities are obscured by
//! deterministic per-hop public-key tweaks, and the onion messages carried
//! over them.

use std::io;

use amplify::Wrapper;
use ln_wire::{WireDecode, WireEncode};
use secp256k1::{PublicKey, SecretKey, SECP256K1};

use super::{
    construct_onion, Ecdh, Hop, OnionMsgPayload, OnionPacket, SphinxError,
};
use crate::crypto;

/// One hop of a blinded path as published inside offers and reply paths.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlindedHop {
    /// Tweaked node id the sender addresses
    pub blinded_node_id: PublicKey,

    /// Routing data only the real node can decrypt
    pub encrypted_data: Vec<u8>,
}

/// A published blinded path: the introduction node, the initial path key
/// and the blinded hops (the first of which belongs to the introduction
/// node itself).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlindedPath {
    /// Real node id of the entry point into the path
    pub introduction_node_id: PublicKey,

    /// First route-blinding ephemeral, handed to the introduction node
    pub path_key: PublicKey,

    /// Blinded hops, introduction node first
    pub hops: Vec<BlindedHop>,
}

impl WireEncode for BlindedHop {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.blinded_node_id.wire_encode(&mut e)?;
        len += self.encrypted_data.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for BlindedHop {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let blinded_node_id = PublicKey::wire_decode(&mut d)?;
        let encrypted_data = Vec::<u8>::wire_decode(&mut d)?;
        Ok(BlindedHop {
            blinded_node_id,
            encrypted_data,
        })
    }
}

impl WireEncode for BlindedPath {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.introduction_node_id.wire_encode(&mut e)?;
        len += self.path_key.wire_encode(&mut e)?;
        if self.hops.len() > u8::MAX as usize {
            return Err(ln_wire::Error::TooLargeData(self.hops.len()));
        }
        len += (self.hops.len() as u8).wire_encode(&mut e)?;
        for hop in &self.hops {
            len += hop.wire_encode(&mut e)?;
        }
        Ok(len)
    }
}

impl WireDecode for BlindedPath {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let introduction_node_id = PublicKey::wire_decode(&mut d)?;
        let path_key = PublicKey::wire_decode(&mut d)?;
        let count = u8::wire_decode(&mut d)? as usize;
        let mut hops = Vec::with_capacity(count);
        for _ in 0..count {
            hops.push(BlindedHop::wire_decode(&mut d)?);
        }
        Ok(BlindedPath {
            introduction_node_id,
            path_key,
            hops,
        })
    }
}

/// Builds a blinded path over real node ids, encrypting per-hop recipient
/// data and tweaking each identity so only its owner can recognize it.
pub fn blind_path(
    session_key: &SecretKey,
    hops: &[(PublicKey, Vec<u8>)],
) -> Result<BlindedPath, SphinxError> {
    if hops.is_empty() {
        return Err(SphinxError::EmptyRoute);
    }
    let path_key = PublicKey::from_secret_key(SECP256K1, session_key);
    let mut ephemeral_key = *session_key;
    let mut blinded_hops = Vec::with_capacity(hops.len());
    for (node_id, data) in hops {
        let ephemeral_pub =
            PublicKey::from_secret_key(SECP256K1, &ephemeral_key);
        let path_secret = crypto::ecdh(&ephemeral_key, node_id)?;
        let tweak = crypto::hmac_sha256(b"blinded_node_id", &[
            path_secret.as_inner()
        ]);
        let blinded_node_id = crypto::mul_point(node_id, &tweak)?;

        let rho = crypto::derive_key(b"rho", &path_secret);
        let mut encrypted_data = data.clone();
        crypto::chacha_xor(&rho, &mut encrypted_data);
        blinded_hops.push(BlindedHop {
            blinded_node_id,
            encrypted_data,
        });

        let blinding = crypto::sha256(&[
            &ephemeral_pub.serialize(),
            path_secret.as_inner(),
        ]);
        ephemeral_key = crypto::mul_secret(&ephemeral_key, &blinding)?;
    }
    Ok(BlindedPath {
        introduction_node_id: hops[0].0,
        path_key,
        hops: blinded_hops,
    })
}

/// Node-side processing of a blinded hop: decrypts the recipient data
/// under the path key and advances the path key for the next hop.
pub fn decrypt_hop_data(
    ecdh: &impl Ecdh,
    path_key: &PublicKey,
    encrypted_data: &[u8],
) -> Result<(Vec<u8>, PublicKey), SphinxError> {
    let path_secret = ecdh.ecdh(path_key)?;
    let rho = crypto::derive_key(b"rho", &path_secret);
    let mut data = encrypted_data.to_vec();
    crypto::chacha_xor(&rho, &mut data);

    let blinding =
        crypto::sha256(&[&path_key.serialize(), path_secret.as_inner()]);
    let next_path_key = crypto::mul_point(path_key, &blinding)?;
    Ok((data, next_path_key))
}

/// Constructs an onion message over a blinded path. The final hop payload
/// carries the BOLT-12 content; every other hop only receives its
/// encrypted recipient data. Returns the packet and the path key that must
/// accompany it to the introduction node.
pub fn construct_onion_message(
    session_key: &SecretKey,
    path: &BlindedPath,
    final_payload: OnionMsgPayload,
) -> Result<(OnionPacket, PublicKey), SphinxError> {
    if path.hops.is_empty() {
        return Err(SphinxError::EmptyRoute);
    }
    let last = path.hops.len() - 1;
    let hops: Vec<Hop> = path
        .hops
        .iter()
        .enumerate()
        .map(|(i, hop)| {
            let payload = if i == last {
                OnionMsgPayload {
                    encrypted_recipient_data: hop.encrypted_data.clone(),
                    ..final_payload.clone()
                }
            } else {
                OnionMsgPayload {
                    encrypted_recipient_data: hop.encrypted_data.clone(),
                    ..OnionMsgPayload::default()
                }
            };
            Hop::with(hop.blinded_node_id, payload.wire_serialize())
        })
        .collect();

    // Onion messages bind no associated data; authenticity comes from the
    // blinded path itself.
    let packet = construct_onion(session_key, &hops, &[])?;
    Ok((packet, path.path_key))
}

#[cfg(test)]
mod test {
    use super::super::peel_onion;
    use super::*;

    fn node_keys(count: usize) -> Vec<(SecretKey, PublicKey)> {
        (0x10..0x10 + count as u8)
            .map(|i| {
                let sk = SecretKey::from_slice(&[i; 32]).unwrap();
                (sk, PublicKey::from_secret_key(SECP256K1, &sk))
            })
            .collect()
    }

    #[test]
    fn blinded_ids_differ_from_real_ones() {
        let keys = node_keys(2);
        let path_session = SecretKey::from_slice(&[0x61; 32]).unwrap();
        let path = blind_path(&path_session, &[
            (keys[0].1, vec![0x01, 0x02]),
            (keys[1].1, vec![0x03, 0x04]),
        ])
        .unwrap();
        assert_eq!(path.introduction_node_id, keys[0].1);
        assert_ne!(path.hops[0].blinded_node_id, keys[0].1);
        assert_ne!(path.hops[1].blinded_node_id, keys[1].1);
    }

    #[test]
    fn path_roundtrips_on_the_wire() {
        let keys = node_keys(2);
        let path_session = SecretKey::from_slice(&[0x62; 32]).unwrap();
        let path = blind_path(&path_session, &[
            (keys[0].1, vec![0xAA; 12]),
            (keys[1].1, vec![0xBB; 40]),
        ])
        .unwrap();
        let encoded = path.wire_serialize();
        assert_eq!(BlindedPath::wire_deserialize(encoded).unwrap(), path);
    }

    #[test]
    fn onion_message_travels_a_blinded_path() {
        let keys = node_keys(3);
        let recipient_data: Vec<Vec<u8>> =
            vec![vec![0x0A; 8], vec![0x0B; 8], vec![0x0C; 8]];
        let path_session = SecretKey::from_slice(&[0x63; 32]).unwrap();
        let path = blind_path(
            &path_session,
            &keys
                .iter()
                .zip(&recipient_data)
                .map(|((_, pk), data)| (*pk, data.clone()))
                .collect::<Vec<_>>(),
        )
        .unwrap();

        let onion_session = SecretKey::from_slice(&[0x64; 32]).unwrap();
        let invoice_request = vec![0xF0, 0x0D];
        let (mut packet, mut path_key) = construct_onion_message(
            &onion_session,
            &path,
            OnionMsgPayload {
                invoice_request: Some(invoice_request.clone()),
                ..OnionMsgPayload::default()
            },
        )
        .unwrap();

        for (i, (sk, _)) in keys.iter().enumerate() {
            let (data, next_path_key) =
                decrypt_hop_data(sk, &path_key, &path.hops[i].encrypted_data)
                    .unwrap();
            assert_eq!(data, recipient_data[i]);

            let peeled =
                peel_onion(&packet, sk, &[], Some(&path_key)).unwrap();
            let payload =
                OnionMsgPayload::wire_deserialize(&peeled.payload).unwrap();
            assert_eq!(
                payload.encrypted_recipient_data,
                path.hops[i].encrypted_data
            );
            match peeled.next {
                Some(next) => {
                    assert!(i < keys.len() - 1);
                    packet = next;
                    path_key = next_path_key;
                }
                None => {
                    assert_eq!(i, keys.len() - 1);
                    assert_eq!(
                        payload.invoice_request,
                        Some(invoice_request.clone())
                    );
                }
            }
        }
    }
}
