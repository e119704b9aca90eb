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

//! Merkle root over the TLV records of a BOLT-12 string; the root is what
//! offer and invoice signatures commit to.
//!
//! Each leaf hashes one serialized record (`type ‖ length ‖ value`); pairs
//! combine through SHA-256 with the two children in lexicographic order,
//! an odd trailing node is promoted unchanged.

use amplify::{Slice32, Wrapper};
use ln_wire::{BigSize, TlvStream, WireEncode};

use crate::crypto;

/// TLV type of the signature record, excluded from the signed tree.
pub const SIGNATURE_TLV_TYPE: u64 = 240;

fn leaf_hash(ty: u64, value: &[u8]) -> Slice32 {
    let mut record = BigSize::from(ty).wire_serialize();
    record.extend(BigSize::from(value.len()).wire_serialize());
    record.extend_from_slice(value);
    crypto::sha256(&[&record])
}

fn combine(a: &Slice32, b: &Slice32) -> Slice32 {
    let (lo, hi) = if a.as_inner() <= b.as_inner() {
        (a, b)
    } else {
        (b, a)
    };
    crypto::sha256(&[lo.as_inner(), hi.as_inner()])
}

/// Computes the merkle root of every non-signature record of the stream.
pub fn merkle_root(stream: &TlvStream) -> Slice32 {
    let mut layer: Vec<Slice32> = stream
        .iter()
        .filter(|(ty, _)| *ty != SIGNATURE_TLV_TYPE)
        .map(|(ty, value)| leaf_hash(ty, value))
        .collect();
    if layer.is_empty() {
        return crypto::sha256(&[&[]]);
    }
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len() / 2 + 1);
        let mut pairs = layer.chunks(2);
        for pair in &mut pairs {
            match pair {
                [a, b] => next.push(combine(a, b)),
                [a] => next.push(*a),
                _ => unreachable!("chunks(2) yields 1 or 2 elements"),
            }
        }
        layer = next;
    }
    layer[0]
}
