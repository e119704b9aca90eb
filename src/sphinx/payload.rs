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

//! Per-hop payloads carried inside the Sphinx packet, decrypted one layer
//! per hop. Payment payloads and onion-message payloads draw from two
//! disjoint TLV namespaces.

use std::io;

use amplify::{Slice32, Wrapper};
use ln_wire::{TlvStream, Tu32, Tu64, WireDecode, WireEncode};
use secp256k1::PublicKey;

use super::blinded::BlindedPath;
use crate::p2p::ShortChannelId;

/// TLV namespace of payment hop payloads.
mod tlv {
    pub const AMT_TO_FORWARD: u64 = 2;
    pub const OUTGOING_CLTV_VALUE: u64 = 4;
    pub const SHORT_CHANNEL_ID: u64 = 6;
    pub const PAYMENT_DATA: u64 = 8;
    pub const ENCRYPTED_RECIPIENT_DATA: u64 = 10;
    pub const BLINDING_POINT: u64 = 12;
    pub const CURRENT_PATH_KEY: u64 = 14;
    pub const PAYMENT_METADATA: u64 = 16;
}

/// TLV namespace of onion-message hop payloads.
mod msg_tlv {
    pub const REPLY_PATH: u64 = 2;
    pub const ENCRYPTED_RECIPIENT_DATA: u64 = 4;
    pub const INVOICE_REQUEST: u64 = 64;
    pub const INVOICE: u64 = 66;
    pub const INVOICE_ERROR: u64 = 68;
}

/// Payment secret and total amount declared by the final hop of an MPP
/// payment.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PaymentData {
    /// Secret from the invoice, proving the payload comes from the payer
    pub payment_secret: Slice32,

    /// Total amount of the payment across all its parts, in msat
    pub total_msat: u64,
}

impl WireEncode for PaymentData {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.payment_secret.wire_encode(&mut e)?;
        len += Tu64::from(self.total_msat).wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for PaymentData {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        let payment_secret = Slice32::wire_decode(&mut d)?;
        let total_msat = Tu64::wire_decode(&mut d)?.into_inner();
        Ok(PaymentData {
            payment_secret,
            total_msat,
        })
    }
}

/// Decrypted payload of one payment hop.
///
/// A hop is *final* iff `payment_data` is present and `short_channel_id`
/// is absent; every hop must carry a positive amount and CLTV.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PaymentPayload {
    /// Amount to forward to (or accept at) the next hop, in msat
    pub amt_to_forward: u64,

    /// Outgoing CLTV the next HTLC must carry
    pub outgoing_cltv_value: u32,

    /// Channel to forward over; intermediate hops only
    pub short_channel_id: Option<ShortChannelId>,

    /// Payment secret and declared total; final hops only
    pub payment_data: Option<PaymentData>,

    /// Encrypted recipient data of a blinded hop
    pub encrypted_recipient_data: Option<Vec<u8>>,

    /// Blinding point override delivered inside the onion
    pub blinding_point: Option<PublicKey>,

    /// Current path key of a blinded hop
    pub current_path_key: Option<PublicKey>,

    /// Extra payment metadata from the invoice
    pub payment_metadata: Option<Vec<u8>>,

    /// Unknown odd TLV records, preserved
    pub unknown: TlvStream,
}

impl PaymentPayload {
    /// Creates an intermediate-hop payload.
    pub fn intermediate(
        amt_to_forward: u64,
        outgoing_cltv_value: u32,
        short_channel_id: ShortChannelId,
    ) -> PaymentPayload {
        PaymentPayload {
            amt_to_forward,
            outgoing_cltv_value,
            short_channel_id: Some(short_channel_id),
            payment_data: None,
            encrypted_recipient_data: None,
            blinding_point: None,
            current_path_key: None,
            payment_metadata: None,
            unknown: TlvStream::new(),
        }
    }

    /// Creates a final-hop payload.
    pub fn receiver(
        amt_to_forward: u64,
        outgoing_cltv_value: u32,
        payment_data: PaymentData,
    ) -> PaymentPayload {
        PaymentPayload {
            amt_to_forward,
            outgoing_cltv_value,
            short_channel_id: None,
            payment_data: Some(payment_data),
            encrypted_recipient_data: None,
            blinding_point: None,
            current_path_key: None,
            payment_metadata: None,
            unknown: TlvStream::new(),
        }
    }

    /// A hop is final iff it carries payment data and no forwarding
    /// channel.
    pub fn is_final_hop(&self) -> bool {
        self.payment_data.is_some() && self.short_channel_id.is_none()
    }

    /// A hop is blinded iff it carries encrypted recipient data.
    pub fn is_blinded(&self) -> bool {
        self.encrypted_recipient_data.is_some()
    }
}

impl WireEncode for PaymentPayload {
    fn wire_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut tlvs = self.unknown.clone();
        tlvs.insert_encoded(
            tlv::AMT_TO_FORWARD,
            &Tu64::from(self.amt_to_forward),
        );
        tlvs.insert_encoded(
            tlv::OUTGOING_CLTV_VALUE,
            &Tu32::from(self.outgoing_cltv_value),
        );
        if let Some(short_channel_id) = self.short_channel_id {
            tlvs.insert_encoded(tlv::SHORT_CHANNEL_ID, &short_channel_id);
        }
        if let Some(payment_data) = self.payment_data {
            tlvs.insert_encoded(tlv::PAYMENT_DATA, &payment_data);
        }
        if let Some(data) = &self.encrypted_recipient_data {
            tlvs.insert(tlv::ENCRYPTED_RECIPIENT_DATA, data.clone());
        }
        if let Some(point) = &self.blinding_point {
            tlvs.insert_encoded(tlv::BLINDING_POINT, point);
        }
        if let Some(point) = &self.current_path_key {
            tlvs.insert_encoded(tlv::CURRENT_PATH_KEY, point);
        }
        if let Some(metadata) = &self.payment_metadata {
            tlvs.insert(tlv::PAYMENT_METADATA, metadata.clone());
        }
        tlvs.wire_encode(e)
    }
}

impl WireDecode for PaymentPayload {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, ln_wire::Error> {
        let mut tlvs = TlvStream::wire_decode(d)?;
        let amt_to_forward = tlvs
            .take_decoded::<Tu64>(tlv::AMT_TO_FORWARD)?
            .map(Tu64::into_inner)
            .ok_or_else(|| {
                ln_wire::Error::DataIntegrityError(s!(
                    "payment payload must contain amt_to_forward"
                ))
            })?;
        let outgoing_cltv_value = tlvs
            .take_decoded::<Tu32>(tlv::OUTGOING_CLTV_VALUE)?
            .map(Tu32::into_inner)
            .ok_or_else(|| {
                ln_wire::Error::DataIntegrityError(s!(
                    "payment payload must contain outgoing_cltv_value"
                ))
            })?;
        if amt_to_forward == 0 {
            return Err(ln_wire::Error::DataIntegrityError(s!(
                "payment payload carries zero amt_to_forward"
            )));
        }
        if outgoing_cltv_value == 0 {
            return Err(ln_wire::Error::DataIntegrityError(s!(
                "payment payload carries zero outgoing_cltv_value"
            )));
        }
        let short_channel_id =
            tlvs.take_decoded::<ShortChannelId>(tlv::SHORT_CHANNEL_ID)?;
        let payment_data =
            tlvs.take_decoded::<PaymentData>(tlv::PAYMENT_DATA)?;
        if short_channel_id.is_some() && payment_data.is_some() {
            return Err(ln_wire::Error::DataIntegrityError(s!(
                "payment payload must not contain both short_channel_id and \
                 payment_data"
            )));
        }
        let encrypted_recipient_data =
            tlvs.take(tlv::ENCRYPTED_RECIPIENT_DATA);
        let blinding_point =
            tlvs.take_decoded::<PublicKey>(tlv::BLINDING_POINT)?;
        let current_path_key =
            tlvs.take_decoded::<PublicKey>(tlv::CURRENT_PATH_KEY)?;
        let payment_metadata = tlvs.take(tlv::PAYMENT_METADATA);
        tlvs.reject_unknown_even()?;
        Ok(PaymentPayload {
            amt_to_forward,
            outgoing_cltv_value,
            short_channel_id,
            payment_data,
            encrypted_recipient_data,
            blinding_point,
            current_path_key,
            payment_metadata,
            unknown: tlvs,
        })
    }
}

/// Decrypted payload of one onion-message hop.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct OnionMsgPayload {
    /// Blinded path the recipient should reply over
    pub reply_path: Option<BlindedPath>,

    /// Encrypted recipient data of the blinded hop
    pub encrypted_recipient_data: Vec<u8>,

    /// Serialized BOLT-12 invoice request
    pub invoice_request: Option<Vec<u8>>,

    /// Serialized BOLT-12 invoice
    pub invoice: Option<Vec<u8>>,

    /// Serialized BOLT-12 invoice error
    pub invoice_error: Option<Vec<u8>>,

    /// Unknown odd TLV records, preserved
    pub unknown: TlvStream,
}

impl WireEncode for OnionMsgPayload {
    fn wire_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut tlvs = self.unknown.clone();
        if let Some(reply_path) = &self.reply_path {
            tlvs.insert_encoded(msg_tlv::REPLY_PATH, reply_path);
        }
        tlvs.insert(
            msg_tlv::ENCRYPTED_RECIPIENT_DATA,
            self.encrypted_recipient_data.clone(),
        );
        if let Some(request) = &self.invoice_request {
            tlvs.insert(msg_tlv::INVOICE_REQUEST, request.clone());
        }
        if let Some(invoice) = &self.invoice {
            tlvs.insert(msg_tlv::INVOICE, invoice.clone());
        }
        if let Some(error) = &self.invoice_error {
            tlvs.insert(msg_tlv::INVOICE_ERROR, error.clone());
        }
        tlvs.wire_encode(e)
    }
}

impl WireDecode for OnionMsgPayload {
    fn wire_decode<D: io::Read>(d: D) -> Result<Self, ln_wire::Error> {
        let mut tlvs = TlvStream::wire_decode(d)?;
        let reply_path =
            tlvs.take_decoded::<BlindedPath>(msg_tlv::REPLY_PATH)?;
        let encrypted_recipient_data = tlvs
            .take(msg_tlv::ENCRYPTED_RECIPIENT_DATA)
            .unwrap_or_default();
        let invoice_request = tlvs.take(msg_tlv::INVOICE_REQUEST);
        let invoice = tlvs.take(msg_tlv::INVOICE);
        let invoice_error = tlvs.take(msg_tlv::INVOICE_ERROR);
        tlvs.reject_unknown_even()?;
        Ok(OnionMsgPayload {
            reply_path,
            encrypted_recipient_data,
            invoice_request,
            invoice,
            invoice_error,
            unknown: tlvs,
        })
    }
}
