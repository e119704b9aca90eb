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

//! BOLT-2 channel protocol messages: v2 channel establishment, interactive
//! transaction construction, splicing and HTLC updates.

use std::io;

use amplify::Slice32;
use bitcoin::{Script, Txid};
use ln_wire::{TlvStream, WireDecode, WireEncode};
use secp256k1::PublicKey;

use super::{ChannelId, TempChannelId};
use crate::sphinx::OnionPacket;

/// TLV type carrying the signed funding contribution in RBF negotiation.
const RBF_TLV_FUNDING_CONTRIBUTION: u64 = 0;

/// TLV type carrying the path key of a blinded HTLC.
const HTLC_TLV_PATH_KEY: u64 = 0;

/// This message initiates the v2 channel establishment workflow where both
/// peers may contribute funding inputs through interactive transaction
/// construction.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("open_channel2({chain_hash}, {temporary_channel_id}, \
           {funding_satoshis}, ...)")]
pub struct OpenChannel2 {
    /// The genesis hash of the blockchain where the channel is to be opened
    pub chain_hash: Slice32,

    /// A temporary channel ID derived from the opener's revocation basepoint
    pub temporary_channel_id: TempChannelId,

    /// Feerate for the funding transaction, in satoshi per 1000 weight
    pub funding_feerate_perkw: u32,

    /// Feerate for the commitment transactions, in satoshi per 1000 weight
    pub commitment_feerate_perkw: u32,

    /// Satoshis the opener is putting into the channel
    pub funding_satoshis: u64,

    /// Threshold below which outputs should not be generated for the
    /// opener's commitment or HTLC transactions
    pub dust_limit_satoshis: u64,

    /// Maximum value of outstanding HTLCs offered by the peer
    pub max_htlc_value_in_flight_msat: u64,

    /// The minimum value of an HTLC the opener will accept
    pub htlc_minimum_msat: u64,

    /// Blocks the peer's to-self outputs must be delayed
    pub to_self_delay: u16,

    /// The maximum number of pending HTLCs the peer may offer
    pub max_accepted_htlcs: u16,

    /// Locktime for the funding transaction
    pub locktime: u32,

    /// The funding pubkey of the opener
    pub funding_pubkey: PublicKey,

    /// Revocation basepoint of the opener
    pub revocation_basepoint: PublicKey,

    /// Payment basepoint of the opener
    pub payment_basepoint: PublicKey,

    /// Delayed payment basepoint of the opener
    pub delayed_payment_basepoint: PublicKey,

    /// HTLC basepoint of the opener
    pub htlc_basepoint: PublicKey,

    /// First per-commitment point of the opener
    pub first_per_commitment_point: PublicKey,

    /// Second per-commitment point of the opener
    pub second_per_commitment_point: PublicKey,

    /// Only the least significant bit (`announce_channel`) is defined
    pub channel_flags: u8,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

/// Response to [`OpenChannel2`] accepting the channel and contributing
/// optional funding of its own.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("accept_channel2({temporary_channel_id}, {funding_satoshis}, ...)")]
pub struct AcceptChannel2 {
    /// Temporary channel id echoed from `open_channel2`
    pub temporary_channel_id: TempChannelId,

    /// Satoshis the acceptor is putting into the channel
    pub funding_satoshis: u64,

    /// Dust limit of the acceptor
    pub dust_limit_satoshis: u64,

    /// Maximum value of outstanding HTLCs offered by the peer
    pub max_htlc_value_in_flight_msat: u64,

    /// The minimum value of an HTLC the acceptor will accept
    pub htlc_minimum_msat: u64,

    /// Number of confirmations the acceptor requires before `channel_ready`
    pub minimum_depth: u32,

    /// Blocks the peer's to-self outputs must be delayed
    pub to_self_delay: u16,

    /// The maximum number of pending HTLCs the peer may offer
    pub max_accepted_htlcs: u16,

    /// The funding pubkey of the acceptor
    pub funding_pubkey: PublicKey,

    /// Revocation basepoint of the acceptor
    pub revocation_basepoint: PublicKey,

    /// Payment basepoint of the acceptor
    pub payment_basepoint: PublicKey,

    /// Delayed payment basepoint of the acceptor
    pub delayed_payment_basepoint: PublicKey,

    /// HTLC basepoint of the acceptor
    pub htlc_basepoint: PublicKey,

    /// First per-commitment point of the acceptor
    pub first_per_commitment_point: PublicKey,

    /// Second per-commitment point of the acceptor
    pub second_per_commitment_point: PublicKey,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

/// Proposes adding an input to the transaction under construction. The
/// previous transaction is carried in full so the peer can verify the
/// spent output is not malleable.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_add_input({channel_id}, {serial_id}, vout={prevtx_vout})")]
pub struct TxAddInput {
    /// The channel the transaction is built for
    pub channel_id: ChannelId,

    /// Identifier of this input within the session; the parity bit encodes
    /// which peer added it
    pub serial_id: u64,

    /// Serialized transaction containing the output to spend
    pub prevtx: Vec<u8>,

    /// Index of the output to spend within `prevtx`
    pub prevtx_vout: u32,

    /// Sequence number for the input
    pub sequence: u32,
}

/// Proposes adding an output to the transaction under construction.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_add_output({channel_id}, {serial_id}, {sats} sat)")]
pub struct TxAddOutput {
    /// The channel the transaction is built for
    pub channel_id: ChannelId,

    /// Identifier of this output within the session
    pub serial_id: u64,

    /// Value of the output in satoshis
    pub sats: u64,

    /// Spending script of the output
    pub script: Script,
}

/// Withdraws an input previously added by the sender.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_remove_input({channel_id}, {serial_id})")]
pub struct TxRemoveInput {
    /// The channel the transaction is built for
    pub channel_id: ChannelId,

    /// Serial id of the input to remove
    pub serial_id: u64,
}

/// Withdraws an output previously added by the sender.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_remove_output({channel_id}, {serial_id})")]
pub struct TxRemoveOutput {
    /// The channel the transaction is built for
    pub channel_id: ChannelId,

    /// Serial id of the output to remove
    pub serial_id: u64,
}

/// Signals that the sender has no further changes to the transaction.
/// When both peers have sent it consecutively, negotiation completes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_complete({channel_id})")]
pub struct TxComplete {
    /// The channel the transaction is built for
    pub channel_id: ChannelId,
}

/// Carries the witnesses for the inputs a peer contributed to the
/// negotiated transaction.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_signatures({channel_id}, {txid}, ...)")]
pub struct TxSignatures {
    /// The channel the transaction was built for
    pub channel_id: ChannelId,

    /// Txid of the negotiated transaction, as a consistency check
    pub txid: Txid,

    /// Witness stacks for the sender's inputs, in ascending serial id order
    pub witnesses: Vec<Vec<u8>>,
}

impl WireEncode for TxSignatures {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.channel_id.wire_encode(&mut e)?;
        len += self.txid.wire_encode(&mut e)?;
        if self.witnesses.len() > u16::MAX as usize {
            return Err(ln_wire::Error::TooLargeData(self.witnesses.len()));
        }
        len += (self.witnesses.len() as u16).wire_encode(&mut e)?;
        for witness in &self.witnesses {
            len += witness.wire_encode(&mut e)?;
        }
        Ok(len)
    }
}

impl WireDecode for TxSignatures {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let channel_id = ChannelId::wire_decode(&mut d)?;
        let txid = Txid::wire_decode(&mut d)?;
        let count = u16::wire_decode(&mut d)? as usize;
        let mut witnesses = Vec::with_capacity(count);
        for _ in 0..count {
            witnesses.push(Vec::<u8>::wire_decode(&mut d)?);
        }
        Ok(TxSignatures {
            channel_id,
            txid,
            witnesses,
        })
    }
}

/// Requests a fee-bumping restart of the interactive construction for the
/// same channel.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_init_rbf({channel_id}, {feerate_perkw} sat/kW)")]
pub struct TxInitRbf {
    /// The channel whose funding transaction is replaced
    pub channel_id: ChannelId,

    /// Locktime for the replacement transaction
    pub locktime: u32,

    /// Feerate of the replacement, at least 25/24 of the previous one
    pub feerate_perkw: u32,

    /// Satoshis the sender contributes to the funding output
    pub funding_output_contribution: Option<i64>,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

impl WireEncode for TxInitRbf {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.channel_id.wire_encode(&mut e)?;
        len += self.locktime.wire_encode(&mut e)?;
        len += self.feerate_perkw.wire_encode(&mut e)?;
        let mut tlvs = self.unknown_tlvs.clone();
        if let Some(contribution) = self.funding_output_contribution {
            tlvs.insert_encoded(RBF_TLV_FUNDING_CONTRIBUTION, &contribution);
        }
        len += tlvs.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for TxInitRbf {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let channel_id = ChannelId::wire_decode(&mut d)?;
        let locktime = u32::wire_decode(&mut d)?;
        let feerate_perkw = u32::wire_decode(&mut d)?;
        let mut tlvs = TlvStream::wire_decode(&mut d)?;
        let funding_output_contribution =
            tlvs.take_decoded::<i64>(RBF_TLV_FUNDING_CONTRIBUTION)?;
        tlvs.reject_unknown_even()?;
        Ok(TxInitRbf {
            channel_id,
            locktime,
            feerate_perkw,
            funding_output_contribution,
            unknown_tlvs: tlvs,
        })
    }
}

/// Accepts an RBF restart proposed with [`TxInitRbf`].
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_ack_rbf({channel_id})")]
pub struct TxAckRbf {
    /// The channel whose funding transaction is replaced
    pub channel_id: ChannelId,

    /// Satoshis the sender contributes to the funding output
    pub funding_output_contribution: Option<i64>,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

impl WireEncode for TxAckRbf {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.channel_id.wire_encode(&mut e)?;
        let mut tlvs = self.unknown_tlvs.clone();
        if let Some(contribution) = self.funding_output_contribution {
            tlvs.insert_encoded(RBF_TLV_FUNDING_CONTRIBUTION, &contribution);
        }
        len += tlvs.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for TxAckRbf {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let channel_id = ChannelId::wire_decode(&mut d)?;
        let mut tlvs = TlvStream::wire_decode(&mut d)?;
        let funding_output_contribution =
            tlvs.take_decoded::<i64>(RBF_TLV_FUNDING_CONTRIBUTION)?;
        tlvs.reject_unknown_even()?;
        Ok(TxAckRbf {
            channel_id,
            funding_output_contribution,
            unknown_tlvs: tlvs,
        })
    }
}

/// Terminates an interactive construction session; both sides echo it
/// before the session may be restarted.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("tx_abort({channel_id}, ...)")]
pub struct TxAbort {
    /// The channel whose session is aborted
    pub channel_id: ChannelId,

    /// Human-readable reason, usually ASCII
    pub data: Vec<u8>,
}

impl TxAbort {
    /// Lossy UTF-8 rendering of the abort reason.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Offers a new HTLC to the peer, carrying the onion routing packet for
/// the next hops.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("update_add_htlc({channel_id}, {htlc_id}, {amount_msat} msat, \
           cltv={cltv_expiry})")]
pub struct UpdateAddHtlc {
    /// The channel carrying the HTLC
    pub channel_id: ChannelId,

    /// Sender-local incrementing HTLC counter
    pub htlc_id: u64,

    /// Value of the HTLC
    pub amount_msat: u64,

    /// SHA-256 hash of the payment preimage
    pub payment_hash: Slice32,

    /// Absolute block height after which the HTLC expires
    pub cltv_expiry: u32,

    /// Sphinx packet for the downstream hops
    pub onion_packet: OnionPacket,

    /// Path key of a blinded route, when the HTLC travels one
    pub path_key: Option<PublicKey>,

    /// Unknown odd TLV records, preserved for re-serialization
    pub unknown_tlvs: TlvStream,
}

impl WireEncode for UpdateAddHtlc {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.channel_id.wire_encode(&mut e)?;
        len += self.htlc_id.wire_encode(&mut e)?;
        len += self.amount_msat.wire_encode(&mut e)?;
        len += self.payment_hash.wire_encode(&mut e)?;
        len += self.cltv_expiry.wire_encode(&mut e)?;
        len += self.onion_packet.wire_encode(&mut e)?;
        let mut tlvs = self.unknown_tlvs.clone();
        if let Some(path_key) = &self.path_key {
            tlvs.insert_encoded(HTLC_TLV_PATH_KEY, path_key);
        }
        len += tlvs.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for UpdateAddHtlc {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let channel_id = ChannelId::wire_decode(&mut d)?;
        let htlc_id = u64::wire_decode(&mut d)?;
        let amount_msat = u64::wire_decode(&mut d)?;
        let payment_hash = Slice32::wire_decode(&mut d)?;
        let cltv_expiry = u32::wire_decode(&mut d)?;
        let onion_packet = OnionPacket::wire_decode(&mut d)?;
        let mut tlvs = TlvStream::wire_decode(&mut d)?;
        let path_key = tlvs.take_decoded::<PublicKey>(HTLC_TLV_PATH_KEY)?;
        tlvs.reject_unknown_even()?;
        Ok(UpdateAddHtlc {
            channel_id,
            htlc_id,
            amount_msat,
            payment_hash,
            cltv_expiry,
            onion_packet,
            path_key,
            unknown_tlvs: tlvs,
        })
    }
}

/// Settles an incoming HTLC by revealing its payment preimage.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("update_fulfill_htlc({channel_id}, {htlc_id})")]
pub struct UpdateFulfillHtlc {
    /// The channel carrying the HTLC
    pub channel_id: ChannelId,

    /// Id of the HTLC being settled
    pub htlc_id: u64,

    /// Preimage whose SHA-256 equals the HTLC payment hash
    pub payment_preimage: Slice32,
}

/// Fails an incoming HTLC, carrying the Sphinx-wrapped failure reason
/// back towards the payment origin.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("update_fail_htlc({channel_id}, {htlc_id})")]
pub struct UpdateFailHtlc {
    /// The channel carrying the HTLC
    pub channel_id: ChannelId,

    /// Id of the HTLC being failed
    pub htlc_id: u64,

    /// Onion-encrypted failure reason
    pub reason: Vec<u8>,
}

/// Fails an incoming HTLC whose onion could not be parsed; sent in the
/// clear since no shared secret could be derived.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("update_fail_malformed_htlc({channel_id}, {htlc_id}, \
           {failure_code:#06x})")]
pub struct UpdateFailMalformedHtlc {
    /// The channel carrying the HTLC
    pub channel_id: ChannelId,

    /// Id of the HTLC being failed
    pub htlc_id: u64,

    /// SHA-256 of the onion the sender could not process
    pub sha256_of_onion: Slice32,

    /// Failure code; must have the BADONION bit set
    pub failure_code: u16,
}

/// Initiates resizing of an existing channel through a new funding
/// transaction negotiated interactively.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("splice_init({channel_id}, {funding_contribution_satoshis} sat)")]
pub struct SpliceInit {
    /// The channel being spliced
    pub channel_id: ChannelId,

    /// Relative contribution: positive for splice-in, negative for
    /// splice-out
    pub funding_contribution_satoshis: i64,

    /// Feerate for the splice transaction, in satoshi per 1000 weight
    pub funding_feerate_perkw: u32,

    /// Locktime for the splice transaction
    pub locktime: u32,

    /// Funding pubkey the sender will use in the new funding output
    pub funding_pubkey: PublicKey,
}

/// Accepts a splice and announces the acceptor's own relative
/// contribution.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("splice_ack({channel_id}, {funding_contribution_satoshis} sat)")]
pub struct SpliceAck {
    /// The channel being spliced
    pub channel_id: ChannelId,

    /// Relative contribution of the acceptor
    pub funding_contribution_satoshis: i64,

    /// Funding pubkey the sender will use in the new funding output
    pub funding_pubkey: PublicKey,
}

/// Announces that the splice transaction reached its required confirmation
/// depth on the sender's side.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[display("splice_locked({channel_id})")]
pub struct SpliceLocked {
    /// The channel being spliced
    pub channel_id: ChannelId,

    /// Next commitment point to use after the splice
    pub next_per_commitment_point: PublicKey,
}

impl_wire_struct!(OpenChannel2 {
    chain_hash,
    temporary_channel_id,
    funding_feerate_perkw,
    commitment_feerate_perkw,
    funding_satoshis,
    dust_limit_satoshis,
    max_htlc_value_in_flight_msat,
    htlc_minimum_msat,
    to_self_delay,
    max_accepted_htlcs,
    locktime,
    funding_pubkey,
    revocation_basepoint,
    payment_basepoint,
    delayed_payment_basepoint,
    htlc_basepoint,
    first_per_commitment_point,
    second_per_commitment_point,
    channel_flags;
    tlv unknown_tlvs
});
impl_wire_struct!(AcceptChannel2 {
    temporary_channel_id,
    funding_satoshis,
    dust_limit_satoshis,
    max_htlc_value_in_flight_msat,
    htlc_minimum_msat,
    minimum_depth,
    to_self_delay,
    max_accepted_htlcs,
    funding_pubkey,
    revocation_basepoint,
    payment_basepoint,
    delayed_payment_basepoint,
    htlc_basepoint,
    first_per_commitment_point,
    second_per_commitment_point;
    tlv unknown_tlvs
});
impl_wire_struct!(TxAddInput {
    channel_id,
    serial_id,
    prevtx,
    prevtx_vout,
    sequence
});
impl_wire_struct!(TxAddOutput {
    channel_id,
    serial_id,
    sats,
    script
});
impl_wire_struct!(TxRemoveInput {
    channel_id,
    serial_id
});
impl_wire_struct!(TxRemoveOutput {
    channel_id,
    serial_id
});
impl_wire_struct!(TxComplete { channel_id });
impl_wire_struct!(TxAbort {
    channel_id,
    data
});
impl_wire_struct!(UpdateFulfillHtlc {
    channel_id,
    htlc_id,
    payment_preimage
});
impl_wire_struct!(UpdateFailHtlc {
    channel_id,
    htlc_id,
    reason
});
impl_wire_struct!(UpdateFailMalformedHtlc {
    channel_id,
    htlc_id,
    sha256_of_onion,
    failure_code
});
impl_wire_struct!(SpliceInit {
    channel_id,
    funding_contribution_satoshis,
    funding_feerate_perkw,
    locktime,
    funding_pubkey
});
impl_wire_struct!(SpliceAck {
    channel_id,
    funding_contribution_satoshis,
    funding_pubkey
});
impl_wire_struct!(SpliceLocked {
    channel_id,
    next_per_commitment_point
});

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tx_add_input_roundtrip() {
        let msg = TxAddInput {
            channel_id: ChannelId::default(),
            serial_id: 2,
            prevtx: vec![0x02, 0x00, 0x00, 0x00],
            prevtx_vout: 1,
            sequence: 0xFFFF_FFFD,
        };
        let encoded = msg.wire_serialize();
        assert_eq!(TxAddInput::wire_deserialize(encoded).unwrap(), msg);
    }

    #[test]
    fn tx_signatures_roundtrip() {
        let msg = TxSignatures {
            channel_id: ChannelId::default(),
            txid: Txid::wire_deserialize([0x42; 32]).unwrap(),
            witnesses: vec![vec![0x01, 0x02], vec![], vec![0xFF; 72]],
        };
        let encoded = msg.wire_serialize();
        assert_eq!(TxSignatures::wire_deserialize(encoded).unwrap(), msg);
    }

    #[test]
    fn tx_init_rbf_contribution_tlv() {
        let msg = TxInitRbf {
            channel_id: ChannelId::default(),
            locktime: 800_000,
            feerate_perkw: 2500,
            funding_output_contribution: Some(-20_000),
            unknown_tlvs: TlvStream::new(),
        };
        let encoded = msg.wire_serialize();
        let decoded = TxInitRbf::wire_deserialize(encoded).unwrap();
        assert_eq!(decoded.funding_output_contribution, Some(-20_000));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn splice_init_negative_contribution() {
        let msg = SpliceInit {
            channel_id: ChannelId::default(),
            funding_contribution_satoshis: -50_000,
            funding_feerate_perkw: 1000,
            locktime: 0,
            funding_pubkey: PublicKey::from_secret_key(
                secp256k1::SECP256K1,
                &secp256k1::ONE_KEY,
            ),
        };
        let encoded = msg.wire_serialize();
        assert_eq!(SpliceInit::wire_deserialize(encoded).unwrap(), msg);
    }
}
