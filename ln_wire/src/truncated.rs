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

//! Truncated big-endian integers (`tu32`/`tu64`) used inside TLV values:
//! leading zero bytes are stripped on encoding and forbidden on decoding,
//! and the empty byte string decodes to zero. Truncated integers always
//! occupy the remainder of their TLV record.

use std::io::{Read, Write};

use crate::{Error, WireDecode, WireEncode};

/// Truncated `u64` (`tu64` in the BOLT TLV vocabulary).
#[derive(
    Wrapper,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Display,
    Default,
    From,
)]
#[display(inner)]
pub struct Tu64(u64);

/// Truncated `u32` (`tu32` in the BOLT TLV vocabulary).
#[derive(
    Wrapper,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Display,
    Default,
    From,
)]
#[display(inner)]
pub struct Tu32(u32);

fn encode_truncated<E: Write>(bytes: &[u8], mut e: E) -> Result<usize, Error> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    e.write_all(&bytes[start..])?;
    Ok(bytes.len() - start)
}

fn decode_truncated<D: Read>(mut d: D, max_len: usize) -> Result<u64, Error> {
    let mut buf = vec![];
    d.read_to_end(&mut buf)?;
    if buf.len() > max_len {
        return Err(Error::TruncatedIntOverflow(buf.len()));
    }
    if buf.first() == Some(&0) {
        return Err(Error::TruncatedIntNonMinimal);
    }
    let mut value = 0u64;
    for byte in buf {
        value = value << 8 | byte as u64;
    }
    Ok(value)
}

impl WireEncode for Tu64 {
    fn wire_encode<E: Write>(&self, e: E) -> Result<usize, Error> {
        encode_truncated(&self.0.to_be_bytes(), e)
    }
}

impl WireDecode for Tu64 {
    fn wire_decode<D: Read>(d: D) -> Result<Self, Error> {
        decode_truncated(d, 8).map(Tu64)
    }
}

impl WireEncode for Tu32 {
    fn wire_encode<E: Write>(&self, e: E) -> Result<usize, Error> {
        encode_truncated(&self.0.to_be_bytes(), e)
    }
}

impl WireDecode for Tu32 {
    fn wire_decode<D: Read>(d: D) -> Result<Self, Error> {
        decode_truncated(d, 4).map(|val| Tu32(val as u32))
    }
}
