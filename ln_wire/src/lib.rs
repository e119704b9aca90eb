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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    //missing_docs
)]

//! Binary wire formats shared by all BOLT peer messages: fixed-width
//! big-endian integers, `BigSize` variable-length integers, truncated
//! (`tu32`/`tu64`) integers and TLV streams with strictly ascending record
//! types.
//!
//! Every message field serializes through [`WireEncode`]/[`WireDecode`];
//! the crate guarantees that `decode(encode(x)) == x` byte-for-byte and that
//! non-canonical encodings are rejected rather than silently normalized.

#[macro_use]
extern crate amplify;

mod big_size;
mod bitcoin;
mod error;
mod primitives;
mod tlv;
mod truncated;

pub use big_size::BigSize;
pub use error::Error;
pub use tlv::TlvStream;
pub use truncated::{Tu32, Tu64};

// -----------------------------------------------------------------------------

use std::io;

/// Lightning-network peer-protocol encoding as defined in BOLT-1 and used by
/// all other BOLTs for message bodies and TLV tails.
pub trait WireEncode {
    /// Encodes `self` into the writer, returning the number of bytes written.
    fn wire_encode<E: io::Write>(&self, e: E) -> Result<usize, Error>;

    /// Serializes `self` into an owned byte vector.
    fn wire_serialize(&self) -> Vec<u8> {
        let mut encoder = vec![];
        self.wire_encode(&mut encoder)
            .expect("memory encoders do not fail");
        encoder
    }
}

/// Lightning-network peer-protocol decoding; the inverse of [`WireEncode`].
pub trait WireDecode
where
    Self: Sized,
{
    /// Decodes `Self` from the reader.
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, Error>;

    /// Deserializes `Self` from a byte slice, requiring that the whole slice
    /// is consumed.
    fn wire_deserialize(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let data = data.as_ref();
        let mut decoder = io::Cursor::new(data);
        let rv = Self::wire_decode(&mut decoder)?;
        let consumed = decoder.position() as usize;

        // Fail if the data are not consumed entirely.
        if consumed == data.len() {
            Ok(rv)
        } else {
            Err(Error::DataNotEntirelyConsumed)
        }
    }
}

/// Convenience function for [`WireEncode::wire_serialize`].
pub fn wire_serialize<T>(data: &T) -> Vec<u8>
where
    T: WireEncode,
{
    data.wire_serialize()
}

/// Convenience function for [`WireDecode::wire_deserialize`].
pub fn wire_deserialize<T>(data: impl AsRef<[u8]>) -> Result<T, Error>
where
    T: WireDecode,
{
    T::wire_deserialize(data)
}
