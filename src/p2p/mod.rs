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

//! BOLT peer messages and their wire envelope: a 2-byte big-endian message
//! type followed by the type-specific body and an optional TLV tail.

/// Implements [`ln_wire::WireEncode`]/[`ln_wire::WireDecode`] for a message
/// struct as the plain concatenation of its fields; the `tlv` form treats
/// the last field as a TLV tail whose unknown even records fail decoding.
macro_rules! impl_wire_struct {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl ::ln_wire::WireEncode for $ty {
            fn wire_encode<E: ::std::io::Write>(
                &self,
                mut e: E,
            ) -> Result<usize, ::ln_wire::Error> {
                let mut len = 0usize;
                $( len += ::ln_wire::WireEncode::wire_encode(
                    &self.$field,
                    &mut e,
                )?; )+
                Ok(len)
            }
        }

        impl ::ln_wire::WireDecode for $ty {
            fn wire_decode<D: ::std::io::Read>(
                mut d: D,
            ) -> Result<Self, ::ln_wire::Error> {
                Ok($ty {
                    $( $field: ::ln_wire::WireDecode::wire_decode(&mut d)?, )+
                })
            }
        }
    };
    ($ty:ident { $($field:ident),+ ; tlv $tlvfield:ident $(,)? }) => {
        impl ::ln_wire::WireEncode for $ty {
            fn wire_encode<E: ::std::io::Write>(
                &self,
                mut e: E,
            ) -> Result<usize, ::ln_wire::Error> {
                let mut len = 0usize;
                $( len += ::ln_wire::WireEncode::wire_encode(
                    &self.$field,
                    &mut e,
                )?; )+
                len += ::ln_wire::WireEncode::wire_encode(
                    &self.$tlvfield,
                    &mut e,
                )?;
                Ok(len)
            }
        }

        impl ::ln_wire::WireDecode for $ty {
            fn wire_decode<D: ::std::io::Read>(
                mut d: D,
            ) -> Result<Self, ::ln_wire::Error> {
                $( let $field = ::ln_wire::WireDecode::wire_decode(&mut d)?; )+
                let $tlvfield = <::ln_wire::TlvStream as
                    ::ln_wire::WireDecode>::wire_decode(&mut d)?;
                $tlvfield.reject_unknown_even()?;
                Ok($ty {
                    $( $field, )+
                    $tlvfield,
                })
            }
        }
    };
}

mod bolt1;
mod bolt2;
mod bolt7;
mod types;

pub use bolt1::*;
pub use bolt2::*;
pub use bolt7::*;
pub use types::*;

use std::io;

use ln_wire::{WireDecode, WireEncode};

/// Default lightning network peer port.
pub const LN_P2P_PORT: u16 = 9735;

/// Peer messages understood by the client, tagged with their BOLT-1
/// message type.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display(inner)]
#[non_exhaustive]
pub enum Messages {
    // Part I: Generic messages outside of channel operations (BOLT-1)
    // ===============================================================
    /// Once authentication is complete, the first message reveals the
    /// features supported or required by this node.
    Init(Init),

    /// Tells a peer that something is incorrect; wildcard channel id
    /// applies to all channels.
    Error(Error),

    /// Non-fatal variant of [`Messages::Error`].
    Warning(Warning),

    /// Connection keep-alive probe.
    Ping(Ping),

    /// Reply to [`Messages::Ping`].
    Pong(Pong),

    // Part II: Channel establishment v2 and interactive construction
    // ==============================================================
    /// Initiates a dual-funded channel.
    OpenChannel2(OpenChannel2),

    /// Accepts a dual-funded channel.
    AcceptChannel2(AcceptChannel2),

    /// Adds an input to the transaction under construction.
    TxAddInput(TxAddInput),

    /// Adds an output to the transaction under construction.
    TxAddOutput(TxAddOutput),

    /// Removes a previously added input.
    TxRemoveInput(TxRemoveInput),

    /// Removes a previously added output.
    TxRemoveOutput(TxRemoveOutput),

    /// Ends the sender's changes for this round.
    TxComplete(TxComplete),

    /// Carries witnesses for the negotiated transaction.
    TxSignatures(TxSignatures),

    /// Requests fee-bumping renegotiation.
    TxInitRbf(TxInitRbf),

    /// Accepts fee-bumping renegotiation.
    TxAckRbf(TxAckRbf),

    /// Aborts the interactive construction session.
    TxAbort(TxAbort),

    // Part III: Splicing
    // ==================
    /// Initiates resizing of an existing channel.
    SpliceInit(SpliceInit),

    /// Accepts a splice.
    SpliceAck(SpliceAck),

    /// Announces the required splice confirmation depth was reached.
    SpliceLocked(SpliceLocked),

    // Part IV: HTLC updates
    // =====================
    /// Offers an HTLC.
    UpdateAddHtlc(UpdateAddHtlc),

    /// Settles an HTLC with its preimage.
    UpdateFulfillHtlc(UpdateFulfillHtlc),

    /// Fails an HTLC with an onion-wrapped reason.
    UpdateFailHtlc(UpdateFailHtlc),

    /// Fails an HTLC whose onion was unreadable.
    UpdateFailMalformedHtlc(UpdateFailMalformedHtlc),

    // Part V: Gossip (BOLT-7)
    // =======================
    /// Announces a channel to the network.
    ChannelAnnouncement(ChannelAnnouncement),

    /// Announces node metadata.
    NodeAnnouncement(NodeAnnouncement),

    /// Announces per-direction forwarding parameters.
    ChannelUpdate(ChannelUpdate),

    /// Exchanges announcement signatures between channel endpoints.
    AnnouncementSignatures(AnnouncementSignatures),
}

/// BOLT message type numbers.
pub mod msg_type {
    /// `warning`
    pub const WARNING: u16 = 1;
    /// `init`
    pub const INIT: u16 = 16;
    /// `error`
    pub const ERROR: u16 = 17;
    /// `ping`
    pub const PING: u16 = 18;
    /// `pong`
    pub const PONG: u16 = 19;
    /// `open_channel2`
    pub const OPEN_CHANNEL2: u16 = 64;
    /// `accept_channel2`
    pub const ACCEPT_CHANNEL2: u16 = 65;
    /// `tx_add_input`
    pub const TX_ADD_INPUT: u16 = 66;
    /// `tx_add_output`
    pub const TX_ADD_OUTPUT: u16 = 67;
    /// `tx_remove_input`
    pub const TX_REMOVE_INPUT: u16 = 68;
    /// `tx_remove_output`
    pub const TX_REMOVE_OUTPUT: u16 = 69;
    /// `tx_complete`
    pub const TX_COMPLETE: u16 = 70;
    /// `tx_signatures`
    pub const TX_SIGNATURES: u16 = 71;
    /// `tx_init_rbf`
    pub const TX_INIT_RBF: u16 = 72;
    /// `tx_ack_rbf`
    pub const TX_ACK_RBF: u16 = 73;
    /// `tx_abort`
    pub const TX_ABORT: u16 = 74;
    /// `splice_locked`
    pub const SPLICE_LOCKED: u16 = 77;
    /// `splice_init`
    pub const SPLICE_INIT: u16 = 80;
    /// `splice_ack`
    pub const SPLICE_ACK: u16 = 81;
    /// `update_add_htlc`
    pub const UPDATE_ADD_HTLC: u16 = 128;
    /// `update_fulfill_htlc`
    pub const UPDATE_FULFILL_HTLC: u16 = 130;
    /// `update_fail_htlc`
    pub const UPDATE_FAIL_HTLC: u16 = 131;
    /// `update_fail_malformed_htlc`
    pub const UPDATE_FAIL_MALFORMED_HTLC: u16 = 135;
    /// `channel_announcement`
    pub const CHANNEL_ANNOUNCEMENT: u16 = 256;
    /// `node_announcement`
    pub const NODE_ANNOUNCEMENT: u16 = 257;
    /// `channel_update`
    pub const CHANNEL_UPDATE: u16 = 258;
    /// `announcement_signatures`
    pub const ANNOUNCEMENT_SIGNATURES: u16 = 259;
}

impl Messages {
    /// BOLT-1 message type of this message.
    pub fn msg_type(&self) -> u16 {
        match self {
            Messages::Warning(_) => msg_type::WARNING,
            Messages::Init(_) => msg_type::INIT,
            Messages::Error(_) => msg_type::ERROR,
            Messages::Ping(_) => msg_type::PING,
            Messages::Pong(_) => msg_type::PONG,
            Messages::OpenChannel2(_) => msg_type::OPEN_CHANNEL2,
            Messages::AcceptChannel2(_) => msg_type::ACCEPT_CHANNEL2,
            Messages::TxAddInput(_) => msg_type::TX_ADD_INPUT,
            Messages::TxAddOutput(_) => msg_type::TX_ADD_OUTPUT,
            Messages::TxRemoveInput(_) => msg_type::TX_REMOVE_INPUT,
            Messages::TxRemoveOutput(_) => msg_type::TX_REMOVE_OUTPUT,
            Messages::TxComplete(_) => msg_type::TX_COMPLETE,
            Messages::TxSignatures(_) => msg_type::TX_SIGNATURES,
            Messages::TxInitRbf(_) => msg_type::TX_INIT_RBF,
            Messages::TxAckRbf(_) => msg_type::TX_ACK_RBF,
            Messages::TxAbort(_) => msg_type::TX_ABORT,
            Messages::SpliceLocked(_) => msg_type::SPLICE_LOCKED,
            Messages::SpliceInit(_) => msg_type::SPLICE_INIT,
            Messages::SpliceAck(_) => msg_type::SPLICE_ACK,
            Messages::UpdateAddHtlc(_) => msg_type::UPDATE_ADD_HTLC,
            Messages::UpdateFulfillHtlc(_) => msg_type::UPDATE_FULFILL_HTLC,
            Messages::UpdateFailHtlc(_) => msg_type::UPDATE_FAIL_HTLC,
            Messages::UpdateFailMalformedHtlc(_) => {
                msg_type::UPDATE_FAIL_MALFORMED_HTLC
            }
            Messages::ChannelAnnouncement(_) => msg_type::CHANNEL_ANNOUNCEMENT,
            Messages::NodeAnnouncement(_) => msg_type::NODE_ANNOUNCEMENT,
            Messages::ChannelUpdate(_) => msg_type::CHANNEL_UPDATE,
            Messages::AnnouncementSignatures(_) => {
                msg_type::ANNOUNCEMENT_SIGNATURES
            }
        }
    }

    /// Whether an unrecognized message of this type may be ignored
    /// ("it's OK to be odd", BOLT-1).
    pub fn is_ignorable_type(msg_type: u16) -> bool {
        msg_type % 2 == 1
    }
}

impl WireEncode for Messages {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.msg_type().wire_encode(&mut e)?;
        len += match self {
            Messages::Warning(msg) => msg.wire_encode(&mut e)?,
            Messages::Init(msg) => msg.wire_encode(&mut e)?,
            Messages::Error(msg) => msg.wire_encode(&mut e)?,
            Messages::Ping(msg) => msg.wire_encode(&mut e)?,
            Messages::Pong(msg) => msg.wire_encode(&mut e)?,
            Messages::OpenChannel2(msg) => msg.wire_encode(&mut e)?,
            Messages::AcceptChannel2(msg) => msg.wire_encode(&mut e)?,
            Messages::TxAddInput(msg) => msg.wire_encode(&mut e)?,
            Messages::TxAddOutput(msg) => msg.wire_encode(&mut e)?,
            Messages::TxRemoveInput(msg) => msg.wire_encode(&mut e)?,
            Messages::TxRemoveOutput(msg) => msg.wire_encode(&mut e)?,
            Messages::TxComplete(msg) => msg.wire_encode(&mut e)?,
            Messages::TxSignatures(msg) => msg.wire_encode(&mut e)?,
            Messages::TxInitRbf(msg) => msg.wire_encode(&mut e)?,
            Messages::TxAckRbf(msg) => msg.wire_encode(&mut e)?,
            Messages::TxAbort(msg) => msg.wire_encode(&mut e)?,
            Messages::SpliceLocked(msg) => msg.wire_encode(&mut e)?,
            Messages::SpliceInit(msg) => msg.wire_encode(&mut e)?,
            Messages::SpliceAck(msg) => msg.wire_encode(&mut e)?,
            Messages::UpdateAddHtlc(msg) => msg.wire_encode(&mut e)?,
            Messages::UpdateFulfillHtlc(msg) => msg.wire_encode(&mut e)?,
            Messages::UpdateFailHtlc(msg) => msg.wire_encode(&mut e)?,
            Messages::UpdateFailMalformedHtlc(msg) => {
                msg.wire_encode(&mut e)?
            }
            Messages::ChannelAnnouncement(msg) => msg.wire_encode(&mut e)?,
            Messages::NodeAnnouncement(msg) => msg.wire_encode(&mut e)?,
            Messages::ChannelUpdate(msg) => msg.wire_encode(&mut e)?,
            Messages::AnnouncementSignatures(msg) => {
                msg.wire_encode(&mut e)?
            }
        };
        Ok(len)
    }
}

impl WireDecode for Messages {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let ty = u16::wire_decode(&mut d)?;
        Ok(match ty {
            msg_type::WARNING => Messages::Warning(Warning::wire_decode(d)?),
            msg_type::INIT => Messages::Init(Init::wire_decode(d)?),
            msg_type::ERROR => Messages::Error(Error::wire_decode(d)?),
            msg_type::PING => Messages::Ping(Ping::wire_decode(d)?),
            msg_type::PONG => Messages::Pong(Pong::wire_decode(d)?),
            msg_type::OPEN_CHANNEL2 => {
                Messages::OpenChannel2(OpenChannel2::wire_decode(d)?)
            }
            msg_type::ACCEPT_CHANNEL2 => {
                Messages::AcceptChannel2(AcceptChannel2::wire_decode(d)?)
            }
            msg_type::TX_ADD_INPUT => {
                Messages::TxAddInput(TxAddInput::wire_decode(d)?)
            }
            msg_type::TX_ADD_OUTPUT => {
                Messages::TxAddOutput(TxAddOutput::wire_decode(d)?)
            }
            msg_type::TX_REMOVE_INPUT => {
                Messages::TxRemoveInput(TxRemoveInput::wire_decode(d)?)
            }
            msg_type::TX_REMOVE_OUTPUT => {
                Messages::TxRemoveOutput(TxRemoveOutput::wire_decode(d)?)
            }
            msg_type::TX_COMPLETE => {
                Messages::TxComplete(TxComplete::wire_decode(d)?)
            }
            msg_type::TX_SIGNATURES => {
                Messages::TxSignatures(TxSignatures::wire_decode(d)?)
            }
            msg_type::TX_INIT_RBF => {
                Messages::TxInitRbf(TxInitRbf::wire_decode(d)?)
            }
            msg_type::TX_ACK_RBF => {
                Messages::TxAckRbf(TxAckRbf::wire_decode(d)?)
            }
            msg_type::TX_ABORT => Messages::TxAbort(TxAbort::wire_decode(d)?),
            msg_type::SPLICE_LOCKED => {
                Messages::SpliceLocked(SpliceLocked::wire_decode(d)?)
            }
            msg_type::SPLICE_INIT => {
                Messages::SpliceInit(SpliceInit::wire_decode(d)?)
            }
            msg_type::SPLICE_ACK => {
                Messages::SpliceAck(SpliceAck::wire_decode(d)?)
            }
            msg_type::UPDATE_ADD_HTLC => {
                Messages::UpdateAddHtlc(UpdateAddHtlc::wire_decode(d)?)
            }
            msg_type::UPDATE_FULFILL_HTLC => {
                Messages::UpdateFulfillHtlc(UpdateFulfillHtlc::wire_decode(d)?)
            }
            msg_type::UPDATE_FAIL_HTLC => {
                Messages::UpdateFailHtlc(UpdateFailHtlc::wire_decode(d)?)
            }
            msg_type::UPDATE_FAIL_MALFORMED_HTLC => {
                Messages::UpdateFailMalformedHtlc(
                    UpdateFailMalformedHtlc::wire_decode(d)?,
                )
            }
            msg_type::CHANNEL_ANNOUNCEMENT => Messages::ChannelAnnouncement(
                ChannelAnnouncement::wire_decode(d)?,
            ),
            msg_type::NODE_ANNOUNCEMENT => {
                Messages::NodeAnnouncement(NodeAnnouncement::wire_decode(d)?)
            }
            msg_type::CHANNEL_UPDATE => {
                Messages::ChannelUpdate(ChannelUpdate::wire_decode(d)?)
            }
            msg_type::ANNOUNCEMENT_SIGNATURES => {
                Messages::AnnouncementSignatures(
                    AnnouncementSignatures::wire_decode(d)?,
                )
            }
            unknown => {
                return Err(ln_wire::Error::EnumValueNotKnown(
                    "Messages",
                    unknown as usize,
                ))
            }
        })
    }
}

#[cfg(test)]
mod test {
    use ln_wire::TlvStream;

    use super::*;

    #[test]
    fn envelope_type_is_big_endian() {
        let msg = Messages::TxComplete(TxComplete {
            channel_id: ChannelId::default(),
        });
        let encoded = msg.wire_serialize();
        assert_eq!(&encoded[..2], &[0x00, 70]);
        assert_eq!(Messages::wire_deserialize(encoded).unwrap(), msg);
    }

    #[test]
    fn envelope_roundtrips_byte_for_byte() {
        let mut tlvs = TlvStream::new();
        tlvs.insert(731, vec![0xDE, 0xAD]);
        let messages = vec![
            Messages::Ping(Ping {
                pong_size: 12,
                ignored: vec![0; 3],
            }),
            Messages::TxAbort(TxAbort {
                channel_id: ChannelId::default(),
                data: b"too many inputs".to_vec(),
            }),
            Messages::TxInitRbf(TxInitRbf {
                channel_id: ChannelId::default(),
                locktime: 0,
                feerate_perkw: 760,
                funding_output_contribution: Some(100_000),
                unknown_tlvs: tlvs,
            }),
        ];
        for msg in messages {
            let encoded = msg.wire_serialize();
            let decoded = Messages::wire_deserialize(&encoded).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(decoded.wire_serialize(), encoded);
        }
    }

    #[test]
    fn unknown_message_type() {
        assert_eq!(
            Messages::wire_deserialize([0x00, 0x02]),
            Err(ln_wire::Error::EnumValueNotKnown("Messages", 2))
        );
        assert!(!Messages::is_ignorable_type(2));
        assert!(Messages::is_ignorable_type(32769));
    }
}
