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

use amplify::IoError;

/// Errors from wire encoding and decoding of peer messages.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// I/O error
    #[from(std::io::Error)]
    #[from(std::io::ErrorKind)]
    #[display(inner)]
    Io(IoError),

    /// decoded BigSize is not canonical
    BigSizeNotCanonical,

    /// unexpected EOF while decoding BigSize value
    BigSizeEof,

    /// truncated integer carries a leading zero byte
    TruncatedIntNonMinimal,

    /// truncated integer of {0} bytes exceeds the width of the target type
    TruncatedIntOverflow(usize),

    /// TLV type {actual} breaks the strictly ascending order of the stream
    /// after type {previous}
    TlvStreamOrder { previous: u64, actual: u64 },

    /// TLV record value is shorter than its declared length
    TlvRecordEof,

    /// unknown even TLV type {0} which the decoder is required to understand
    TlvUnknownEvenType(u64),

    /// not all provided data were consumed during decoding process
    DataNotEntirelyConsumed,

    /// Custom type-specific error
    #[display(inner)]
    DataIntegrityError(String),

    /// unsupported value `{1}` for enum `{0}` encountered during decode
    /// operation
    EnumValueNotKnown(&'static str, usize),

    /// data size {0} exceeds maximum allowed for the lightning message
    TooLargeData(usize),
}
