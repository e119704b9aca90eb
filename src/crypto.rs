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

//! Cryptographic primitives shared by the Sphinx engine and the gossip
//! verifier: BOLT-4 ECDH, labelled HMAC-SHA256 key derivation, the ChaCha20
//! keystream and constant-time comparison.

use amplify::{Slice32, Wrapper};
use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::{sha256, sha256d, Hash, HashEngine};
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};
use subtle::ConstantTimeEq;

/// Errors from scalar arithmetic over secp256k1.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CryptoError {
    /// tweak value is out of the secp256k1 group order
    InvalidTweak,

    /// scalar multiplication produced the point at infinity
    SharedSecret,
}

/// SHA-256 of the concatenation of `chunks`.
pub fn sha256(chunks: &[&[u8]]) -> Slice32 {
    let mut engine = sha256::Hash::engine();
    for chunk in chunks {
        engine.input(chunk);
    }
    Slice32::from_inner(sha256::Hash::from_engine(engine).into_inner())
}

/// Double SHA-256 used for gossip signature digests and txids.
pub fn sha256d(data: &[u8]) -> Slice32 {
    Slice32::from_inner(sha256d::Hash::hash(data).into_inner())
}

/// HMAC-SHA256 with an arbitrary-length key.
pub fn hmac_sha256(key: &[u8], data: &[&[u8]]) -> Slice32 {
    let mut engine = HmacEngine::<sha256::Hash>::new(key);
    for chunk in data {
        engine.input(chunk);
    }
    Slice32::from_inner(Hmac::from_engine(engine).into_inner())
}

/// Per-hop key derivation: HMAC-SHA256 keyed by an ASCII label ("rho", "mu",
/// "um", "pad") over the 32-byte shared secret.
pub fn derive_key(label: &[u8], secret: &Slice32) -> Slice32 {
    hmac_sha256(label, &[secret.as_inner()])
}

/// BOLT-4 ECDH: SHA-256 of the compressed serialization of `pk` multiplied
/// by the scalar of `sk`.
pub fn ecdh(sk: &SecretKey, pk: &PublicKey) -> Result<Slice32, CryptoError> {
    let scalar = Scalar::from_be_bytes(sk.secret_bytes())
        .map_err(|_| CryptoError::InvalidTweak)?;
    let point = pk
        .mul_tweak(SECP256K1, &scalar)
        .map_err(|_| CryptoError::SharedSecret)?;
    Ok(sha256(&[&point.serialize()]))
}

/// Multiplies a secret key by a 32-byte tweak.
pub fn mul_secret(
    sk: &SecretKey,
    tweak: &Slice32,
) -> Result<SecretKey, CryptoError> {
    let scalar = Scalar::from_be_bytes(tweak.into_inner())
        .map_err(|_| CryptoError::InvalidTweak)?;
    (*sk).mul_tweak(&scalar).map_err(|_| CryptoError::InvalidTweak)
}

/// Multiplies a public key by a 32-byte tweak.
pub fn mul_point(
    pk: &PublicKey,
    tweak: &Slice32,
) -> Result<PublicKey, CryptoError> {
    let scalar = Scalar::from_be_bytes(tweak.into_inner())
        .map_err(|_| CryptoError::InvalidTweak)?;
    pk.mul_tweak(SECP256K1, &scalar)
        .map_err(|_| CryptoError::SharedSecret)
}

/// ChaCha20 keystream of `len` bytes under `key` and an all-zero nonce.
pub fn chacha_stream(key: &Slice32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    chacha_xor(key, &mut buf);
    buf
}

/// XORs `buf` in place with the ChaCha20 keystream under `key` and an
/// all-zero nonce.
pub fn chacha_xor(key: &Slice32, buf: &mut [u8]) {
    chacha_xor_offset(key, 0, buf)
}

/// XORs `buf` in place with the ChaCha20 keystream starting at byte
/// `offset` of the stream. Used by the Sphinx filler computation, which
/// consumes the tail of each hop's stream.
pub fn chacha_xor_offset(key: &Slice32, offset: u64, buf: &mut [u8]) {
    let nonce = [0u8; 12];
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key.as_inner()),
        chacha20::Nonce::from_slice(&nonce),
    );
    cipher.seek(offset);
    cipher.apply_keystream(buf);
}

/// Constant-time equality of two byte strings. Lengths are compared in
/// variable time; lengths are public here.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
