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

//! BOLT-12 offer negotiation: offers, invoice requests and invoices as
//! canonical TLV streams wrapped in checksum-less bech32, signed over the
//! merkle root of their records.

mod merkle;

pub use merkle::{merkle_root, SIGNATURE_TLV_TYPE};

use std::fmt::{self, Display, Formatter};
use std::io;
use std::str::FromStr;

use amplify::{Slice32, Wrapper};
use ln_wire::{TlvStream, Tu32, Tu64, WireDecode, WireEncode};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::sphinx::BlindedPath;

/// Human-readable prefix of offers.
pub const OFFER_HRP: &str = "lno";

/// Human-readable prefix of invoice requests.
pub const INVOICE_REQUEST_HRP: &str = "lnr";

/// Human-readable prefix of invoices.
pub const INVOICE_HRP: &str = "lni";

/// Default invoice validity when `invoice_relative_expiry` is absent,
/// seconds.
pub const INVOICE_DEFAULT_RELATIVE_EXPIRY_SECS: u32 = 7200;

/// Who pays whom once an invoice request materializes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum PaymentFlow {
    /// The requester pays the offer issuer
    #[display("user_pays_merchant")]
    UserPaysMerchant,

    /// The issuer refunds the requester
    #[display("merchant_pays_user")]
    MerchantPaysUser,
}

/// Errors of BOLT-12 parsing and semantic validation.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Bolt12Error {
    /// malformed bech32 string
    #[from]
    Bech32(bech32::Error),

    /// malformed TLV payload
    #[from]
    #[display(inner)]
    Wire(ln_wire::Error),

    /// string with prefix `{actual}` where `{expected}` was expected
    WrongHrp {
        /// Required human-readable prefix
        expected: &'static str,
        /// Prefix found in the input
        actual: String,
    },

    /// TLV record holds invalid UTF-8 text
    InvalidString,

    /// required field `{0}` is missing
    MissingField(&'static str),

    /// currency code requires an amount
    CurrencyWithoutAmount,

    /// quantity_max of zero is not allowed
    ZeroQuantityMax,

    /// requested quantity {quantity} exceeds the offer maximum {maximum}
    QuantityOutOfRange {
        /// Requested quantity
        quantity: u64,
        /// Offer-side maximum
        maximum: u64,
    },

    /// blinded path without hops
    EmptyPath,

    /// invoice carries {paths} paths but {payinfo} payment infos
    PathCountMismatch {
        /// Number of blinded paths
        paths: usize,
        /// Number of `invoice_blindedpay` entries
        payinfo: usize,
    },

    /// fallback address version {0} exceeds the maximum witness version
    FallbackVersion(u8),

    /// BIP-353 name contains forbidden character `{0}`
    InvalidNameCharacter(char),

    /// signature does not verify against the merkle root
    InvalidSignature,

    /// message is not signed
    NotSigned,
}

mod tlv {
    // offer namespace, shared by invoice requests and invoices
    pub const CHAINS: u64 = 2;
    pub const METADATA: u64 = 4;
    pub const CURRENCY: u64 = 6;
    pub const AMOUNT: u64 = 8;
    pub const DESCRIPTION: u64 = 10;
    pub const FEATURES: u64 = 12;
    pub const ABSOLUTE_EXPIRY: u64 = 14;
    pub const PATHS: u64 = 16;
    pub const ISSUER: u64 = 18;
    pub const QUANTITY_MAX: u64 = 20;
    pub const ISSUER_ID: u64 = 22;

    // invoice_request namespace
    pub const INVREQ_METADATA: u64 = 0;
    pub const INVREQ_CHAIN: u64 = 80;
    pub const INVREQ_AMOUNT: u64 = 82;
    pub const INVREQ_FEATURES: u64 = 84;
    pub const INVREQ_QUANTITY: u64 = 86;
    pub const INVREQ_PAYER_ID: u64 = 88;
    pub const INVREQ_PAYER_NOTE: u64 = 89;
    pub const INVREQ_BIP353_NAME: u64 = 91;

    // invoice namespace
    pub const INVOICE_PATHS: u64 = 160;
    pub const INVOICE_BLINDEDPAY: u64 = 162;
    pub const INVOICE_CREATED_AT: u64 = 164;
    pub const INVOICE_RELATIVE_EXPIRY: u64 = 166;
    pub const INVOICE_PAYMENT_HASH: u64 = 168;
    pub const INVOICE_AMOUNT: u64 = 170;
    pub const INVOICE_FALLBACKS: u64 = 172;
    pub const INVOICE_FEATURES: u64 = 174;
    pub const INVOICE_NODE_ID: u64 = 176;
}

fn take_string(
    stream: &mut TlvStream,
    ty: u64,
) -> Result<Option<String>, Bolt12Error> {
    stream
        .take(ty)
        .map(|bytes| {
            String::from_utf8(bytes).map_err(|_| Bolt12Error::InvalidString)
        })
        .transpose()
}

fn take_tu64(
    stream: &mut TlvStream,
    ty: u64,
) -> Result<Option<u64>, Bolt12Error> {
    Ok(stream.take_decoded::<Tu64>(ty)?.map(Tu64::into_inner))
}

fn take_paths(
    stream: &mut TlvStream,
    ty: u64,
) -> Result<Vec<BlindedPath>, Bolt12Error> {
    let value = match stream.take(ty) {
        None => return Ok(vec![]),
        Some(value) => value,
    };
    let mut cursor = io::Cursor::new(&value[..]);
    let mut paths = vec![];
    while (cursor.position() as usize) < value.len() {
        paths.push(BlindedPath::wire_decode(&mut cursor)?);
    }
    Ok(paths)
}

fn paths_record(paths: &[BlindedPath]) -> Vec<u8> {
    let mut value = vec![];
    for path in paths {
        value.extend(path.wire_serialize());
    }
    value
}

fn verify_root_signature(
    root: &Slice32,
    signature: Option<&Signature>,
    key: &PublicKey,
) -> Result<(), Bolt12Error> {
    let signature = signature.ok_or(Bolt12Error::NotSigned)?;
    let message = Message::from_slice(root.as_inner())
        .map_err(|_| Bolt12Error::InvalidSignature)?;
    SECP256K1
        .verify_ecdsa(&message, signature, key)
        .map_err(|_| Bolt12Error::InvalidSignature)
}

fn sign_root(root: &Slice32, sk: &SecretKey) -> Signature {
    let message = Message::from_slice(root.as_inner())
        .expect("merkle roots are 32 bytes");
    SECP256K1.sign_ecdsa(&message, sk)
}

fn encode_bech32(hrp: &'static str, stream: &TlvStream) -> String {
    use bech32::ToBase32;
    bech32::encode_without_checksum(
        hrp,
        stream.wire_serialize().to_base32(),
    )
    .expect("static HRPs are valid")
}

fn decode_bech32(
    hrp: &'static str,
    s: &str,
) -> Result<TlvStream, Bolt12Error> {
    use bech32::FromBase32;
    // long strings may be folded with `+` and whitespace
    let compact: String = s
        .chars()
        .filter(|c| *c != '+' && !c.is_whitespace())
        .collect();
    let (actual, data) = bech32::decode_without_checksum(&compact)?;
    if actual != hrp {
        return Err(Bolt12Error::WrongHrp {
            expected: hrp,
            actual,
        });
    }
    let bytes = Vec::<u8>::from_base32(&data)?;
    Ok(TlvStream::wire_deserialize(bytes)?)
}

/// An offer ("lno"): the merchant-published half of the negotiation.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Offer {
    /// Chains the offer is valid on; bitcoin mainnet when empty
    pub chains: Option<Vec<Slice32>>,

    /// Opaque issuer data echoed back in the invoice request
    pub metadata: Option<Vec<u8>>,

    /// ISO 4217 currency code when the amount is not in msat
    pub currency: Option<String>,

    /// Amount in msat, or in the currency's minor unit
    pub amount: Option<u64>,

    /// Description of the purpose of the payment
    pub description: Option<String>,

    /// Offer feature flags
    pub features: Option<Vec<u8>>,

    /// Unix time after which the offer is void
    pub absolute_expiry: Option<u64>,

    /// Blinded paths to reach the issuer
    pub paths: Vec<BlindedPath>,

    /// Free-form issuer identity
    pub issuer: Option<String>,

    /// Maximum quantity of items; `None` means exactly one
    pub quantity_max: Option<u64>,

    /// Public key of the issuer
    pub issuer_id: Option<PublicKey>,

    /// Unknown odd records, preserved
    pub unknown: TlvStream,
}

impl Offer {
    fn write_tlv_stream(&self, stream: &mut TlvStream) {
        if let Some(chains) = &self.chains {
            let mut value = vec![];
            for chain in chains {
                value.extend_from_slice(chain.as_inner());
            }
            stream.insert(tlv::CHAINS, value);
        }
        if let Some(metadata) = &self.metadata {
            stream.insert(tlv::METADATA, metadata.clone());
        }
        if let Some(currency) = &self.currency {
            stream.insert(tlv::CURRENCY, currency.as_bytes().to_vec());
        }
        if let Some(amount) = self.amount {
            stream.insert_encoded(tlv::AMOUNT, &Tu64::from(amount));
        }
        if let Some(description) = &self.description {
            stream
                .insert(tlv::DESCRIPTION, description.as_bytes().to_vec());
        }
        if let Some(features) = &self.features {
            stream.insert(tlv::FEATURES, features.clone());
        }
        if let Some(expiry) = self.absolute_expiry {
            stream.insert_encoded(tlv::ABSOLUTE_EXPIRY, &Tu64::from(expiry));
        }
        if !self.paths.is_empty() {
            stream.insert(tlv::PATHS, paths_record(&self.paths));
        }
        if let Some(issuer) = &self.issuer {
            stream.insert(tlv::ISSUER, issuer.as_bytes().to_vec());
        }
        if let Some(quantity_max) = self.quantity_max {
            stream
                .insert_encoded(tlv::QUANTITY_MAX, &Tu64::from(quantity_max));
        }
        if let Some(issuer_id) = &self.issuer_id {
            stream.insert_encoded(tlv::ISSUER_ID, issuer_id);
        }
    }

    /// Canonical TLV stream of the offer.
    pub fn to_tlv_stream(&self) -> TlvStream {
        let mut stream = self.unknown.clone();
        self.write_tlv_stream(&mut stream);
        stream
    }

    fn take_from_stream(
        stream: &mut TlvStream,
    ) -> Result<Offer, Bolt12Error> {
        let chains = stream.take(tlv::CHAINS).map(|value| {
            value
                .chunks(32)
                .filter(|chunk| chunk.len() == 32)
                .map(|chunk| {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(chunk);
                    Slice32::from_inner(hash)
                })
                .collect()
        });
        Ok(Offer {
            chains,
            metadata: stream.take(tlv::METADATA),
            currency: take_string(stream, tlv::CURRENCY)?,
            amount: take_tu64(stream, tlv::AMOUNT)?,
            description: take_string(stream, tlv::DESCRIPTION)?,
            features: stream.take(tlv::FEATURES),
            absolute_expiry: take_tu64(stream, tlv::ABSOLUTE_EXPIRY)?,
            paths: take_paths(stream, tlv::PATHS)?,
            issuer: take_string(stream, tlv::ISSUER)?,
            quantity_max: take_tu64(stream, tlv::QUANTITY_MAX)?,
            issuer_id: stream.take_decoded::<PublicKey>(tlv::ISSUER_ID)?,
            unknown: TlvStream::new(),
        })
    }

    /// Semantic validation of a decoded offer.
    pub fn validate(&self) -> Result<(), Bolt12Error> {
        if self.description.is_none()
            && self.issuer_id.is_none()
            && self.paths.is_empty()
        {
            return Err(Bolt12Error::MissingField("offer_description"));
        }
        if self.currency.is_some() && self.amount.is_none() {
            return Err(Bolt12Error::CurrencyWithoutAmount);
        }
        if self.quantity_max == Some(0) {
            return Err(Bolt12Error::ZeroQuantityMax);
        }
        if self.paths.iter().any(|path| path.hops.is_empty()) {
            return Err(Bolt12Error::EmptyPath);
        }
        Ok(())
    }

    /// Whether the offer is void at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.absolute_expiry
            .map(|expiry| now > expiry)
            .unwrap_or(false)
    }
}

impl Display for Offer {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&encode_bech32(OFFER_HRP, &self.to_tlv_stream()))
    }
}

impl FromStr for Offer {
    type Err = Bolt12Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut stream = decode_bech32(OFFER_HRP, s)?;
        let mut offer = Offer::take_from_stream(&mut stream)?;
        stream.reject_unknown_even()?;
        offer.unknown = stream;
        offer.validate()?;
        Ok(offer)
    }
}

/// An invoice request ("lnr"): the payer's answer to an offer, or a
/// standalone refund request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InvoiceRequest {
    /// Offer records mirrored into the request
    pub offer: Offer,

    /// Payer-chosen blob making the request unique (required)
    pub metadata: Vec<u8>,

    /// Chain the payment will use
    pub chain: Option<Slice32>,

    /// Amount the payer intends to pay, msat
    pub amount_msat: Option<u64>,

    /// Invoice-request feature flags
    pub features: Option<Vec<u8>>,

    /// Quantity of items requested
    pub quantity: Option<u64>,

    /// Transient key identifying the payer (required)
    pub payer_id: Option<PublicKey>,

    /// Free-form note from the payer
    pub payer_note: Option<String>,

    /// BIP-353 human-readable name the request was resolved from
    pub bip353_name: Option<String>,

    /// Signature of the payer over the merkle root
    pub signature: Option<Signature>,

    /// Unknown odd records, preserved
    pub unknown: TlvStream,
}

impl InvoiceRequest {
    /// Creates a request against an offer.
    pub fn for_offer(offer: Offer, metadata: Vec<u8>) -> InvoiceRequest {
        InvoiceRequest {
            offer,
            metadata,
            chain: None,
            amount_msat: None,
            features: None,
            quantity: None,
            payer_id: None,
            payer_note: None,
            bip353_name: None,
            signature: None,
            unknown: TlvStream::new(),
        }
    }

    /// Canonical TLV stream of the request.
    pub fn to_tlv_stream(&self) -> TlvStream {
        let mut stream = self.unknown.clone();
        self.offer.write_tlv_stream(&mut stream);
        stream.insert(tlv::INVREQ_METADATA, self.metadata.clone());
        if let Some(chain) = &self.chain {
            stream.insert(tlv::INVREQ_CHAIN, chain.as_inner().to_vec());
        }
        if let Some(amount) = self.amount_msat {
            stream.insert_encoded(tlv::INVREQ_AMOUNT, &Tu64::from(amount));
        }
        if let Some(features) = &self.features {
            stream.insert(tlv::INVREQ_FEATURES, features.clone());
        }
        if let Some(quantity) = self.quantity {
            stream
                .insert_encoded(tlv::INVREQ_QUANTITY, &Tu64::from(quantity));
        }
        if let Some(payer_id) = &self.payer_id {
            stream.insert_encoded(tlv::INVREQ_PAYER_ID, payer_id);
        }
        if let Some(note) = &self.payer_note {
            stream.insert(tlv::INVREQ_PAYER_NOTE, note.as_bytes().to_vec());
        }
        if let Some(name) = &self.bip353_name {
            stream
                .insert(tlv::INVREQ_BIP353_NAME, name.as_bytes().to_vec());
        }
        if let Some(signature) = &self.signature {
            stream.insert(
                SIGNATURE_TLV_TYPE,
                signature.serialize_compact().to_vec(),
            );
        }
        stream
    }

    /// Merkle root the payer signature commits to.
    pub fn signing_root(&self) -> Slice32 {
        merkle_root(&self.to_tlv_stream())
    }

    /// Signs the request with the payer key.
    pub fn sign(&mut self, sk: &SecretKey) {
        self.payer_id =
            Some(PublicKey::from_secret_key(SECP256K1, sk));
        self.signature = Some(sign_root(&self.signing_root(), sk));
    }

    /// Verifies the payer signature.
    pub fn verify_signature(&self) -> Result<(), Bolt12Error> {
        let payer_id = self
            .payer_id
            .ok_or(Bolt12Error::MissingField("invreq_payer_id"))?;
        verify_root_signature(
            &self.signing_root(),
            self.signature.as_ref(),
            &payer_id,
        )
    }

    /// Direction of funds: requests against an offer with an issuer pay
    /// the merchant, offer-less requests ask for a refund.
    pub fn payment_flow(&self) -> PaymentFlow {
        if self.offer.issuer_id.is_some() {
            PaymentFlow::UserPaysMerchant
        } else {
            PaymentFlow::MerchantPaysUser
        }
    }

    /// Semantic validation of a decoded request.
    pub fn validate(&self) -> Result<(), Bolt12Error> {
        if self.metadata.is_empty() {
            return Err(Bolt12Error::MissingField("invreq_metadata"));
        }
        if self.payer_id.is_none() {
            return Err(Bolt12Error::MissingField("invreq_payer_id"));
        }
        if self.payment_flow() == PaymentFlow::MerchantPaysUser {
            // refund requests carry their own description and amount
            if self.offer.description.is_none() {
                return Err(Bolt12Error::MissingField("offer_description"));
            }
            if self.amount_msat.is_none() {
                return Err(Bolt12Error::MissingField("invreq_amount"));
            }
        }
        if let (Some(quantity_max), Some(quantity)) =
            (self.offer.quantity_max, self.quantity)
        {
            if quantity > quantity_max {
                return Err(Bolt12Error::QuantityOutOfRange {
                    quantity,
                    maximum: quantity_max,
                });
            }
        }
        if let Some(name) = &self.bip353_name {
            for c in name.chars() {
                if !(c.is_ascii_alphanumeric()
                    || c == '-'
                    || c == '_'
                    || c == '.')
                {
                    return Err(Bolt12Error::InvalidNameCharacter(c));
                }
            }
        }
        self.offer.validate()
    }
}

impl Display for InvoiceRequest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&encode_bech32(
            INVOICE_REQUEST_HRP,
            &self.to_tlv_stream(),
        ))
    }
}

impl FromStr for InvoiceRequest {
    type Err = Bolt12Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut stream = decode_bech32(INVOICE_REQUEST_HRP, s)?;
        let offer = Offer::take_from_stream(&mut stream)?;
        let metadata = stream
            .take(tlv::INVREQ_METADATA)
            .ok_or(Bolt12Error::MissingField("invreq_metadata"))?;
        let chain = stream.take_decoded::<Slice32>(tlv::INVREQ_CHAIN)?;
        let amount_msat = take_tu64(&mut stream, tlv::INVREQ_AMOUNT)?;
        let features = stream.take(tlv::INVREQ_FEATURES);
        let quantity = take_tu64(&mut stream, tlv::INVREQ_QUANTITY)?;
        let payer_id =
            stream.take_decoded::<PublicKey>(tlv::INVREQ_PAYER_ID)?;
        let payer_note = take_string(&mut stream, tlv::INVREQ_PAYER_NOTE)?;
        let bip353_name =
            take_string(&mut stream, tlv::INVREQ_BIP353_NAME)?;
        let signature =
            stream.take_decoded::<Signature>(SIGNATURE_TLV_TYPE)?;
        stream.reject_unknown_even()?;

        let request = InvoiceRequest {
            offer,
            metadata,
            chain,
            amount_msat,
            features,
            quantity,
            payer_id,
            payer_note,
            bip353_name,
            signature,
            unknown: stream,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Forwarding terms of one blinded path inside an invoice
/// (`invoice_blindedpay`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlindedPayInfo {
    /// Base fee over the whole path, msat
    pub fee_base_msat: u32,

    /// Proportional fee over the whole path, millionths
    pub fee_proportional_millionths: u32,

    /// Accumulated CLTV delta of the path
    pub cltv_expiry_delta: u16,

    /// Minimum HTLC through the path, msat
    pub htlc_minimum_msat: u64,

    /// Maximum HTLC through the path, msat
    pub htlc_maximum_msat: u64,

    /// Feature flags of the path
    pub features: Vec<u8>,
}

impl WireEncode for BlindedPayInfo {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.fee_base_msat.wire_encode(&mut e)?;
        len += self.fee_proportional_millionths.wire_encode(&mut e)?;
        len += self.cltv_expiry_delta.wire_encode(&mut e)?;
        len += self.htlc_minimum_msat.wire_encode(&mut e)?;
        len += self.htlc_maximum_msat.wire_encode(&mut e)?;
        len += self.features.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for BlindedPayInfo {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        Ok(BlindedPayInfo {
            fee_base_msat: u32::wire_decode(&mut d)?,
            fee_proportional_millionths: u32::wire_decode(&mut d)?,
            cltv_expiry_delta: u16::wire_decode(&mut d)?,
            htlc_minimum_msat: u64::wire_decode(&mut d)?,
            htlc_maximum_msat: u64::wire_decode(&mut d)?,
            features: Vec::<u8>::wire_decode(&mut d)?,
        })
    }
}

/// An on-chain fallback address of an invoice.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FallbackAddress {
    /// Segwit witness version
    pub version: u8,

    /// Witness program
    pub program: Vec<u8>,
}

impl WireEncode for FallbackAddress {
    fn wire_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, ln_wire::Error> {
        let mut len = self.version.wire_encode(&mut e)?;
        len += self.program.wire_encode(&mut e)?;
        Ok(len)
    }
}

impl WireDecode for FallbackAddress {
    fn wire_decode<D: io::Read>(mut d: D) -> Result<Self, ln_wire::Error> {
        Ok(FallbackAddress {
            version: u8::wire_decode(&mut d)?,
            program: Vec::<u8>::wire_decode(&mut d)?,
        })
    }
}

/// An invoice ("lni"): the merchant's signed answer fixing the payment
/// terms.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Bolt12Invoice {
    /// The request the invoice answers, mirrored record for record
    pub request: InvoiceRequest,

    /// Blinded paths the payment must use (required, non-empty)
    pub paths: Vec<BlindedPath>,

    /// Per-path forwarding terms, one entry per path
    pub blindedpay: Vec<BlindedPayInfo>,

    /// Unix time the invoice was created (required)
    pub created_at: Option<u64>,

    /// Validity window after `created_at`, seconds; 7200 when absent
    pub relative_expiry: Option<u32>,

    /// Hash whose preimage settles the payment (required)
    pub payment_hash: Option<Slice32>,

    /// Amount to pay, msat (required)
    pub amount_msat: Option<u64>,

    /// On-chain fallback addresses
    pub fallbacks: Vec<FallbackAddress>,

    /// Invoice feature flags
    pub features: Option<Vec<u8>>,

    /// Key the invoice is signed with (required)
    pub node_id: Option<PublicKey>,

    /// Signature of `node_id` over the merkle root
    pub signature: Option<Signature>,

    /// Unknown odd records, preserved
    pub unknown: TlvStream,
}

impl Bolt12Invoice {
    /// Canonical TLV stream of the invoice.
    pub fn to_tlv_stream(&self) -> TlvStream {
        let mut stream = self.unknown.clone();
        // the answered request is mirrored, minus its own signature
        let mut request = self.request.clone();
        request.signature = None;
        let request_stream = request.to_tlv_stream();
        for (ty, value) in request_stream.iter() {
            stream.insert(ty, value.to_vec());
        }

        if !self.paths.is_empty() {
            stream.insert(tlv::INVOICE_PATHS, paths_record(&self.paths));
        }
        if !self.blindedpay.is_empty() {
            let mut value = vec![];
            for payinfo in &self.blindedpay {
                value.extend(payinfo.wire_serialize());
            }
            stream.insert(tlv::INVOICE_BLINDEDPAY, value);
        }
        if let Some(created_at) = self.created_at {
            stream.insert_encoded(
                tlv::INVOICE_CREATED_AT,
                &Tu64::from(created_at),
            );
        }
        if let Some(relative_expiry) = self.relative_expiry {
            stream.insert_encoded(
                tlv::INVOICE_RELATIVE_EXPIRY,
                &Tu32::from(relative_expiry),
            );
        }
        if let Some(payment_hash) = &self.payment_hash {
            stream.insert(
                tlv::INVOICE_PAYMENT_HASH,
                payment_hash.as_inner().to_vec(),
            );
        }
        if let Some(amount) = self.amount_msat {
            stream.insert_encoded(tlv::INVOICE_AMOUNT, &Tu64::from(amount));
        }
        if !self.fallbacks.is_empty() {
            let mut value = vec![];
            for fallback in &self.fallbacks {
                value.extend(fallback.wire_serialize());
            }
            stream.insert(tlv::INVOICE_FALLBACKS, value);
        }
        if let Some(features) = &self.features {
            stream.insert(tlv::INVOICE_FEATURES, features.clone());
        }
        if let Some(node_id) = &self.node_id {
            stream.insert_encoded(tlv::INVOICE_NODE_ID, node_id);
        }
        if let Some(signature) = &self.signature {
            stream.insert(
                SIGNATURE_TLV_TYPE,
                signature.serialize_compact().to_vec(),
            );
        }
        stream
    }

    /// Merkle root the invoice signature commits to.
    pub fn signing_root(&self) -> Slice32 {
        merkle_root(&self.to_tlv_stream())
    }

    /// Signs the invoice with the node key.
    pub fn sign(&mut self, sk: &SecretKey) {
        self.node_id = Some(PublicKey::from_secret_key(SECP256K1, sk));
        self.signature = Some(sign_root(&self.signing_root(), sk));
    }

    /// Verifies the node signature.
    pub fn verify_signature(&self) -> Result<(), Bolt12Error> {
        let node_id = self
            .node_id
            .ok_or(Bolt12Error::MissingField("invoice_node_id"))?;
        verify_root_signature(
            &self.signing_root(),
            self.signature.as_ref(),
            &node_id,
        )
    }

    /// Semantic validation of a decoded invoice.
    pub fn validate(&self) -> Result<(), Bolt12Error> {
        if self.amount_msat.is_none() {
            return Err(Bolt12Error::MissingField("invoice_amount"));
        }
        if self.created_at.is_none() {
            return Err(Bolt12Error::MissingField("invoice_created_at"));
        }
        if self.payment_hash.is_none() {
            return Err(Bolt12Error::MissingField("invoice_payment_hash"));
        }
        if self.node_id.is_none() {
            return Err(Bolt12Error::MissingField("invoice_node_id"));
        }
        if self.signature.is_none() {
            return Err(Bolt12Error::MissingField("signature"));
        }
        if self.paths.is_empty() {
            return Err(Bolt12Error::MissingField("invoice_paths"));
        }
        if self.paths.len() != self.blindedpay.len() {
            return Err(Bolt12Error::PathCountMismatch {
                paths: self.paths.len(),
                payinfo: self.blindedpay.len(),
            });
        }
        if self.paths.iter().any(|path| path.hops.is_empty()) {
            return Err(Bolt12Error::EmptyPath);
        }
        for fallback in &self.fallbacks {
            if fallback.version > 16 {
                return Err(Bolt12Error::FallbackVersion(fallback.version));
            }
        }
        Ok(())
    }

    /// Whether the invoice is expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        match self.created_at {
            Some(created_at) => {
                let expiry = self
                    .relative_expiry
                    .unwrap_or(INVOICE_DEFAULT_RELATIVE_EXPIRY_SECS)
                    as u64;
                now > created_at + expiry
            }
            None => false,
        }
    }
}

impl Display for Bolt12Invoice {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&encode_bech32(INVOICE_HRP, &self.to_tlv_stream()))
    }
}

impl FromStr for Bolt12Invoice {
    type Err = Bolt12Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut stream = decode_bech32(INVOICE_HRP, s)?;
        let offer = Offer::take_from_stream(&mut stream)?;
        let metadata =
            stream.take(tlv::INVREQ_METADATA).unwrap_or_default();
        let request = InvoiceRequest {
            offer,
            metadata,
            chain: stream.take_decoded::<Slice32>(tlv::INVREQ_CHAIN)?,
            amount_msat: take_tu64(&mut stream, tlv::INVREQ_AMOUNT)?,
            features: stream.take(tlv::INVREQ_FEATURES),
            quantity: take_tu64(&mut stream, tlv::INVREQ_QUANTITY)?,
            payer_id: stream
                .take_decoded::<PublicKey>(tlv::INVREQ_PAYER_ID)?,
            payer_note: take_string(&mut stream, tlv::INVREQ_PAYER_NOTE)?,
            bip353_name: take_string(
                &mut stream,
                tlv::INVREQ_BIP353_NAME,
            )?,
            signature: None,
            unknown: TlvStream::new(),
        };

        let paths = take_paths(&mut stream, tlv::INVOICE_PATHS)?;
        let blindedpay = match stream.take(tlv::INVOICE_BLINDEDPAY) {
            None => vec![],
            Some(value) => {
                let mut cursor = io::Cursor::new(&value[..]);
                let mut payinfo = vec![];
                while (cursor.position() as usize) < value.len() {
                    payinfo.push(BlindedPayInfo::wire_decode(&mut cursor)?);
                }
                payinfo
            }
        };
        let fallbacks = match stream.take(tlv::INVOICE_FALLBACKS) {
            None => vec![],
            Some(value) => {
                let mut cursor = io::Cursor::new(&value[..]);
                let mut fallbacks = vec![];
                while (cursor.position() as usize) < value.len() {
                    fallbacks
                        .push(FallbackAddress::wire_decode(&mut cursor)?);
                }
                fallbacks
            }
        };

        let invoice = Bolt12Invoice {
            request,
            paths,
            blindedpay,
            created_at: take_tu64(&mut stream, tlv::INVOICE_CREATED_AT)?,
            relative_expiry: stream
                .take_decoded::<Tu32>(tlv::INVOICE_RELATIVE_EXPIRY)?
                .map(Tu32::into_inner),
            payment_hash: stream
                .take_decoded::<Slice32>(tlv::INVOICE_PAYMENT_HASH)?,
            amount_msat: take_tu64(&mut stream, tlv::INVOICE_AMOUNT)?,
            fallbacks,
            features: stream.take(tlv::INVOICE_FEATURES),
            node_id: stream
                .take_decoded::<PublicKey>(tlv::INVOICE_NODE_ID)?,
            signature: stream
                .take_decoded::<Signature>(SIGNATURE_TLV_TYPE)?,
            unknown: {
                stream.reject_unknown_even()?;
                stream
            },
        };
        invoice.validate()?;
        invoice.verify_signature()?;
        Ok(invoice)
    }
}

#[cfg(test)]
mod test {
    use secp256k1::SecretKey;

    use super::*;
    use crate::sphinx::blind_path;

    fn keypair(seed: u8) -> (SecretKey, PublicKey) {
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        (sk, PublicKey::from_secret_key(SECP256K1, &sk))
    }

    fn one_hop_path(seed: u8) -> BlindedPath {
        let (_, node) = keypair(seed);
        let session = SecretKey::from_slice(&[0x51; 32]).unwrap();
        blind_path(&session, &[(node, vec![0x00; 8])]).unwrap()
    }

    fn offer() -> Offer {
        let (_, issuer_id) = keypair(0x21);
        Offer {
            amount: Some(50_000_000),
            description: Some(s!("coffee beans")),
            issuer_id: Some(issuer_id),
            ..Offer::default()
        }
    }

    #[test]
    fn offer_bech32_roundtrip() {
        let offer = offer();
        let encoded = offer.to_string();
        assert!(encoded.starts_with("lno1"));
        assert_eq!(encoded.parse::<Offer>().unwrap(), offer);
    }

    #[test]
    fn folded_strings_are_stripped() {
        let offer = offer();
        let encoded = offer.to_string();
        let mid = encoded.len() / 2;
        let folded =
            format!("{}+\n {}", &encoded[..mid], &encoded[mid..]);
        assert_eq!(folded.parse::<Offer>().unwrap(), offer);
    }

    #[test]
    fn wrong_hrp_rejected() {
        let encoded = offer().to_string();
        assert!(matches!(
            encoded.parse::<Bolt12Invoice>(),
            Err(Bolt12Error::WrongHrp { .. })
        ));
    }

    #[test]
    fn offer_validation_rules() {
        let bare = Offer::default();
        assert_eq!(
            bare.validate(),
            Err(Bolt12Error::MissingField("offer_description"))
        );

        let mut with_currency = offer();
        with_currency.currency = Some(s!("EUR"));
        with_currency.amount = None;
        assert_eq!(
            with_currency.validate(),
            Err(Bolt12Error::CurrencyWithoutAmount)
        );

        let mut zero_quantity = offer();
        zero_quantity.quantity_max = Some(0);
        assert_eq!(
            zero_quantity.validate(),
            Err(Bolt12Error::ZeroQuantityMax)
        );

        let mut hopless = offer();
        hopless.paths = vec![BlindedPath {
            introduction_node_id: keypair(0x22).1,
            path_key: keypair(0x23).1,
            hops: vec![],
        }];
        assert_eq!(hopless.validate(), Err(Bolt12Error::EmptyPath));

        let empty_path_offer = Offer {
            paths: vec![one_hop_path(0x24)],
            ..Offer::default()
        };
        empty_path_offer.validate().unwrap();
    }

    #[test]
    fn invoice_request_roundtrip_and_flow() {
        let (payer_sk, _) = keypair(0x41);
        let mut request =
            InvoiceRequest::for_offer(offer(), vec![0xAB; 16]);
        request.quantity = Some(2);
        request.sign(&payer_sk);
        request.validate().unwrap();
        request.verify_signature().unwrap();
        assert_eq!(request.payment_flow(), PaymentFlow::UserPaysMerchant);

        let encoded = request.to_string();
        assert!(encoded.starts_with("lnr1"));
        let decoded = encoded.parse::<InvoiceRequest>().unwrap();
        assert_eq!(decoded, request);

        // refund request: no issuer, own description and amount required
        let refund_offer = Offer {
            description: Some(s!("refund for order 17")),
            ..Offer::default()
        };
        let mut refund =
            InvoiceRequest::for_offer(refund_offer, vec![0x01]);
        refund.sign(&payer_sk);
        assert_eq!(
            refund.validate(),
            Err(Bolt12Error::MissingField("invreq_amount"))
        );
        refund.amount_msat = Some(10_000);
        refund.sign(&payer_sk);
        refund.validate().unwrap();
        assert_eq!(refund.payment_flow(), PaymentFlow::MerchantPaysUser);
    }

    #[test]
    fn quantity_bounds_follow_the_offer() {
        let (payer_sk, _) = keypair(0x41);
        let mut bounded_offer = offer();
        bounded_offer.quantity_max = Some(3);
        let mut request =
            InvoiceRequest::for_offer(bounded_offer, vec![0x02]);
        request.quantity = Some(5);
        request.sign(&payer_sk);
        assert_eq!(
            request.validate(),
            Err(Bolt12Error::QuantityOutOfRange {
                quantity: 5,
                maximum: 3
            })
        );
    }

    #[test]
    fn bip353_name_characters() {
        let (payer_sk, _) = keypair(0x41);
        let mut request = InvoiceRequest::for_offer(offer(), vec![0x03]);
        request.bip353_name = Some(s!("pay.me_now-1"));
        request.sign(&payer_sk);
        request.validate().unwrap();

        request.bip353_name = Some(s!("pay me"));
        assert_eq!(
            request.validate(),
            Err(Bolt12Error::InvalidNameCharacter(' '))
        );
    }

    fn signed_invoice() -> (Bolt12Invoice, SecretKey) {
        let (payer_sk, _) = keypair(0x41);
        let (node_sk, _) = keypair(0x42);
        let mut request =
            InvoiceRequest::for_offer(offer(), vec![0xAB; 16]);
        request.sign(&payer_sk);

        let mut invoice = Bolt12Invoice {
            request,
            paths: vec![one_hop_path(0x43)],
            blindedpay: vec![BlindedPayInfo {
                fee_base_msat: 1_000,
                fee_proportional_millionths: 100,
                cltv_expiry_delta: 42,
                htlc_minimum_msat: 1,
                htlc_maximum_msat: 100_000_000,
                features: vec![],
            }],
            created_at: Some(1_700_000_000),
            relative_expiry: None,
            payment_hash: Some(Slice32::from_inner([0x66; 32])),
            amount_msat: Some(50_000_000),
            fallbacks: vec![],
            features: None,
            node_id: None,
            signature: None,
            unknown: TlvStream::new(),
        };
        invoice.sign(&node_sk);
        (invoice, node_sk)
    }

    #[test]
    fn invoice_roundtrip_with_signature() {
        let (invoice, _) = signed_invoice();
        invoice.validate().unwrap();
        invoice.verify_signature().unwrap();

        let encoded = invoice.to_string();
        assert!(encoded.starts_with("lni1"));
        let decoded = encoded.parse::<Bolt12Invoice>().unwrap();
        assert_eq!(decoded.amount_msat, Some(50_000_000));
        assert_eq!(decoded.signing_root(), invoice.signing_root());
    }

    #[test]
    fn tampered_invoice_fails_verification() {
        let (mut invoice, _) = signed_invoice();
        invoice.amount_msat = Some(1);
        assert_eq!(
            invoice.verify_signature(),
            Err(Bolt12Error::InvalidSignature)
        );
    }

    #[test]
    fn invoice_structural_rules() {
        let (mut invoice, _) = signed_invoice();
        invoice.blindedpay.clear();
        assert_eq!(
            invoice.validate(),
            Err(Bolt12Error::PathCountMismatch {
                paths: 1,
                payinfo: 0
            })
        );

        let (mut invoice, _) = signed_invoice();
        invoice.paths.clear();
        invoice.blindedpay.clear();
        assert_eq!(
            invoice.validate(),
            Err(Bolt12Error::MissingField("invoice_paths"))
        );

        let (mut invoice, _) = signed_invoice();
        invoice.fallbacks.push(FallbackAddress {
            version: 17,
            program: vec![0x00; 20],
        });
        assert_eq!(
            invoice.validate(),
            Err(Bolt12Error::FallbackVersion(17))
        );
    }

    #[test]
    fn invoice_expiry_defaults_to_7200() {
        let (invoice, _) = signed_invoice();
        let created_at = invoice.created_at.unwrap();
        assert!(!invoice.is_expired(created_at + 7200));
        assert!(invoice.is_expired(created_at + 7201));

        let mut short_lived = invoice;
        short_lived.relative_expiry = Some(60);
        assert!(short_lived.is_expired(created_at + 61));
        assert!(!short_lived.is_expired(created_at + 60));
    }

    #[test]
    fn offer_expiry() {
        let mut offer = offer();
        assert!(!offer.is_expired(u64::MAX));
        offer.absolute_expiry = Some(1_000);
        assert!(!offer.is_expired(1_000));
        assert!(offer.is_expired(1_001));
    }

    #[test]
    fn blinded_hop_survives_offer_roundtrip() {
        let path = one_hop_path(0x44);
        let offer = Offer {
            description: Some(s!("paths only")),
            paths: vec![path.clone()],
            ..Offer::default()
        };
        let decoded = offer.to_string().parse::<Offer>().unwrap();
        assert_eq!(decoded.paths, vec![path]);
        assert!(!decoded.paths[0].hops.is_empty());
    }
}
