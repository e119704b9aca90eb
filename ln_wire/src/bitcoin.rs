// Wire encoding for lightning network peer protocol data types
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use std::io::{Read, Write};

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Script, Txid};

use crate::{Error, WireDecode, WireEncode};

impl WireEncode for PublicKey {
    fn wire_encode<E: Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(&self.serialize())?;
        Ok(33)
    }
}

impl WireDecode for PublicKey {
    fn wire_decode<D: Read>(mut d: D) -> Result<Self, Error> {
        let mut buf = [0u8; 33];
        d.read_exact(&mut buf)?;
        PublicKey::from_slice(&buf).map_err(|_| {
            Error::DataIntegrityError(s!("invalid secp256k1 public key"))
        })
    }
}

// Signatures are encoded in the compact 64-byte form, not DER.
impl WireEncode for Signature {
    fn wire_encode<E: Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(&self.serialize_compact())?;
        Ok(64)
    }
}

impl WireDecode for Signature {
    fn wire_decode<D: Read>(mut d: D) -> Result<Self, Error> {
        let mut buf = [0u8; 64];
        d.read_exact(&mut buf)?;
        Signature::from_compact(&buf).map_err(|_| {
            Error::DataIntegrityError(s!("invalid compact ECDSA signature"))
        })
    }
}

impl WireEncode for Txid {
    fn wire_encode<E: Write>(&self, mut e: E) -> Result<usize, Error> {
        e.write_all(&self.into_inner())?;
        Ok(32)
    }
}

impl WireDecode for Txid {
    fn wire_decode<D: Read>(mut d: D) -> Result<Self, Error> {
        let mut buf = [0u8; 32];
        d.read_exact(&mut buf)?;
        Ok(Txid::from_inner(buf))
    }
}

impl WireEncode for Script {
    fn wire_encode<E: Write>(&self, e: E) -> Result<usize, Error> {
        self.as_bytes().to_vec().wire_encode(e)
    }
}

impl WireDecode for Script {
    fn wire_decode<D: Read>(d: D) -> Result<Self, Error> {
        Ok(Script::from(Vec::<u8>::wire_decode(d)?))
    }
}

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;

    use super::*;

    #[test]
    fn pubkey_roundtrip() {
        let raw = Vec::<u8>::from_hex(
            "02eec7245d6b7d2ccb30380bfbe2a3648cd7a942653f5aa340edcea1f283686619",
        )
        .unwrap();
        let pk = PublicKey::wire_deserialize(&raw).unwrap();
        assert_eq!(pk.wire_serialize(), raw);
    }

    #[test]
    fn invalid_pubkey_rejected() {
        assert!(PublicKey::wire_deserialize([0x05; 33]).is_err());
    }

    #[test]
    fn script_roundtrip() {
        let script = Script::from(vec![0x00u8, 0x14, 0xAA, 0xBB]);
        let encoded = script.wire_serialize();
        assert_eq!(&encoded[..2], &[0x00, 0x04]);
        assert_eq!(Script::wire_deserialize(encoded).unwrap(), script);
    }
}
