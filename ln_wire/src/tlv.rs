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

use std::collections::BTreeMap;
use std::io::{Read, Write};

use amplify::Wrapper;

use crate::{BigSize, Error, WireDecode, WireEncode};

/// Stream of TLV records trailing a message body or forming a TLV-based
/// payload (onion hop data, BOLT-12 strings).
///
/// Records are `type: BigSize | length: BigSize | value: length bytes` with
/// strictly ascending types. Message decoders [`take`] the types they
/// recognize and then call [`reject_unknown_even`]: unknown even types are a
/// hard decoding failure while unknown odd types stay in the stream and are
/// re-serialized for forwarding.
///
/// [`take`]: TlvStream::take
/// [`reject_unknown_even`]: TlvStream::reject_unknown_even
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TlvStream {
    records: BTreeMap<u64, Vec<u8>>,
}

impl TlvStream {
    /// Creates an empty stream.
    pub fn new() -> TlvStream {
        TlvStream::default()
    }

    /// Number of records in the stream.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Detects whether the stream contains any records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a record, replacing any previous record of the same type.
    pub fn insert(&mut self, ty: u64, value: Vec<u8>) -> Option<Vec<u8>> {
        self.records.insert(ty, value)
    }

    /// Adds a record holding the serialization of `value`.
    pub fn insert_encoded(
        &mut self,
        ty: u64,
        value: &impl WireEncode,
    ) -> Option<Vec<u8>> {
        self.insert(ty, value.wire_serialize())
    }

    /// Returns the value of a record, if present.
    pub fn get(&self, ty: u64) -> Option<&[u8]> {
        self.records.get(&ty).map(Vec::as_slice)
    }

    /// Removes and returns the value of a record, if present.
    pub fn take(&mut self, ty: u64) -> Option<Vec<u8>> {
        self.records.remove(&ty)
    }

    /// Removes a record and decodes its value, requiring the value to be
    /// consumed entirely.
    pub fn take_decoded<T: WireDecode>(
        &mut self,
        ty: u64,
    ) -> Result<Option<T>, Error> {
        self.take(ty).map(T::wire_deserialize).transpose()
    }

    /// Iterates records in ascending type order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.records.iter().map(|(ty, value)| (*ty, value.as_slice()))
    }

    /// Fails with [`Error::TlvUnknownEvenType`] if the remaining records
    /// contain an even type. Called by message decoders after all known
    /// types were [`TlvStream::take`]n.
    pub fn reject_unknown_even(&self) -> Result<(), Error> {
        for (ty, _) in self.iter() {
            if ty % 2 == 0 {
                return Err(Error::TlvUnknownEvenType(ty));
            }
        }
        Ok(())
    }
}

impl WireEncode for TlvStream {
    fn wire_encode<E: Write>(&self, mut e: E) -> Result<usize, Error> {
        let mut len = 0;
        for (ty, value) in &self.records {
            len += BigSize::from(*ty).wire_encode(&mut e)?;
            len += BigSize::from(value.len()).wire_encode(&mut e)?;
            e.write_all(value)?;
            len += value.len();
        }
        Ok(len)
    }
}

impl WireDecode for TlvStream {
    fn wire_decode<D: Read>(mut d: D) -> Result<Self, Error> {
        let mut records = BTreeMap::new();
        let mut previous = None;
        loop {
            let mut first = [0u8; 1];
            match d.read(&mut first)? {
                0 => break,
                _ => {}
            }
            let ty = BigSize::wire_decode((&first[..]).chain(&mut d))?
                .into_inner();
            if let Some(previous) = previous {
                if ty <= previous {
                    return Err(Error::TlvStreamOrder {
                        previous,
                        actual: ty,
                    });
                }
            }
            previous = Some(ty);

            let length = BigSize::wire_decode(&mut d)?.into_inner();
            let mut value = Vec::with_capacity(length.min(0x10000) as usize);
            (&mut d).take(length).read_to_end(&mut value)?;
            if value.len() as u64 != length {
                return Err(Error::TlvRecordEof);
            }
            records.insert(ty, value);
        }
        Ok(TlvStream { records })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_ascending() {
        let mut stream = TlvStream::new();
        stream.insert(2, vec![0x0F, 0x42, 0x40]);
        stream.insert(4, vec![0x00, 0x90]);
        stream.insert(253, vec![0xAA]);

        let encoded = stream.wire_serialize();
        // types must come out strictly ascending
        assert_eq!(encoded[0], 2);
        let decoded = TlvStream::wire_deserialize(&encoded).unwrap();
        assert_eq!(decoded, stream);
    }

    #[test]
    fn order_violation_rejected() {
        // type 4 followed by type 2
        let raw = [0x04, 0x01, 0xAA, 0x02, 0x01, 0xBB];
        assert_eq!(
            TlvStream::wire_deserialize(raw),
            Err(Error::TlvStreamOrder {
                previous: 4,
                actual: 2
            })
        );
        // duplicate type is also an order violation
        let raw = [0x04, 0x01, 0xAA, 0x04, 0x01, 0xBB];
        assert_eq!(
            TlvStream::wire_deserialize(raw),
            Err(Error::TlvStreamOrder {
                previous: 4,
                actual: 4
            })
        );
    }

    #[test]
    fn truncated_value_rejected() {
        let raw = [0x02, 0x05, 0xAA, 0xBB];
        assert_eq!(TlvStream::wire_deserialize(raw), Err(Error::TlvRecordEof));
    }

    #[test]
    fn unknown_even_policy() {
        let mut stream = TlvStream::new();
        stream.insert(7, vec![0x01]);
        assert_eq!(stream.reject_unknown_even(), Ok(()));
        stream.insert(10, vec![0x02]);
        assert_eq!(
            stream.reject_unknown_even(),
            Err(Error::TlvUnknownEvenType(10))
        );
    }

    #[test]
    fn empty_stream() {
        assert_eq!(TlvStream::wire_serialize(&TlvStream::new()), vec![]);
        assert_eq!(
            TlvStream::wire_deserialize([]).unwrap(),
            TlvStream::new()
        );
    }
}
