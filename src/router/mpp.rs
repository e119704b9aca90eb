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

//! Multi-path payments: splitting an amount across parallel routes on the
//! sending side, and collecting the parts of one `payment_hash` on the
//! receiving side until the declared total arrives or the hold times out.

use std::collections::BTreeMap;

use amplify::Slice32;

use crate::p2p::ShortChannelId;
use crate::sphinx::{FailureCode, PaymentPayload};

/// Default maximum number of parts a payment is split into.
pub const MPP_DEFAULT_MAX_PARTS: usize = 16;

/// Default seconds a partial payment is held before all parts are failed
/// with `MPP_TIMEOUT`.
pub const MPP_DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default minimum size of one part, msat.
pub const MPP_DEFAULT_MIN_PART_MSAT: u64 = 10_000_000;

/// Errors of the sending-side splitter.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum MppError {
    /// feasible liquidity {available} msat cannot carry the payment of
    /// {required} msat
    LiquidityInsufficient {
        /// Amount that had to be split, msat
        required: u64,
        /// Sum of usable candidate liquidity, msat
        available: u64,
    },

    /// payment cannot be split into at most {0} parts
    TooManyParts(usize),
}

/// Terminal status of an outbound payment.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum PaymentStatus {
    /// Preimage received; payment proven
    #[display("SUCCEEDED")]
    Succeeded,

    /// No feasible split or route
    #[display("FAILED_NO_ROUTE")]
    FailedNoRoute,

    /// Parts expired before completion
    #[display("FAILED_TIMEOUT")]
    FailedTimeout,

    /// Cancelled by the sender; in-flight HTLCs resolve by their CLTV
    #[display("CANCELLED")]
    Cancelled,
}

/// Splitting knobs.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SplitConfig {
    /// Maximum number of parts
    pub max_parts: usize,

    /// Minimum size of one part, msat
    pub min_part_msat: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            max_parts: MPP_DEFAULT_MAX_PARTS,
            min_part_msat: MPP_DEFAULT_MIN_PART_MSAT,
        }
    }
}

/// A candidate route for one part, reduced to its bottleneck numbers.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PartCandidate {
    /// First channel of the candidate route
    pub short_channel_id: ShortChannelId,

    /// Spendable liquidity along the route, msat
    pub liquidity_msat: u64,

    /// Smallest `htlc_maximum_msat` along the route
    pub htlc_maximum_msat: u64,
}

impl PartCandidate {
    fn usable_msat(&self) -> u64 {
        self.liquidity_msat.min(self.htlc_maximum_msat)
    }
}

/// One part of a split payment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PaymentPart {
    /// Route (by first channel) the part travels
    pub short_channel_id: ShortChannelId,

    /// Amount of the part, msat
    pub amount_msat: u64,
}

/// Greedily splits `total_msat` over the candidates, largest usable
/// liquidity first. Every part is at least `min_part_msat` except a final
/// remainder absorbed into its predecessor when possible.
pub fn split_payment(
    candidates: &[PartCandidate],
    total_msat: u64,
    config: &SplitConfig,
) -> Result<Vec<PaymentPart>, MppError> {
    let available: u64 =
        candidates.iter().map(PartCandidate::usable_msat).sum();
    if available < total_msat {
        return Err(MppError::LiquidityInsufficient {
            required: total_msat,
            available,
        });
    }

    let mut sorted: Vec<&PartCandidate> = candidates.iter().collect();
    sorted.sort_by_key(|candidate| std::cmp::Reverse(candidate.usable_msat()));

    let mut parts: Vec<PaymentPart> = vec![];
    let mut remaining = total_msat;
    for candidate in sorted {
        if remaining == 0 {
            break;
        }
        let usable = candidate.usable_msat();
        if usable == 0 {
            continue;
        }
        // skip channels too small to be worth a part, unless they can
        // finish the payment
        if usable < config.min_part_msat && usable < remaining {
            continue;
        }
        if parts.len() == config.max_parts {
            return Err(MppError::TooManyParts(config.max_parts));
        }
        let amount = remaining.min(usable);
        parts.push(PaymentPart {
            short_channel_id: candidate.short_channel_id,
            amount_msat: amount,
        });
        remaining -= amount;
    }
    if remaining > 0 {
        return Err(MppError::LiquidityInsufficient {
            required: total_msat,
            available,
        });
    }
    debug!(
        "split {} msat into {} parts",
        total_msat,
        parts.len()
    );
    Ok(parts)
}

/// What to do with an incoming final-hop HTLC.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum HtlcAction {
    /// Settle all listed HTLCs with the invoice preimage
    Fulfill {
        /// Ids of every held part, arrival order
        htlc_ids: Vec<u64>,
    },

    /// Keep the HTLC until more parts arrive or the hold times out
    Hold,

    /// Fail the listed HTLCs with the given failure code
    Reject {
        /// Ids of the failed HTLCs
        htlc_ids: Vec<u64>,
        /// Failure reported back through the onion
        code: FailureCode,
    },
}

/// Terms of an invoice the receiver is collecting against.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct InvoiceTerms {
    payment_secret: Slice32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct ReceivedPart {
    htlc_id: u64,
    amount_msat: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct ReceiveSlot {
    total_msat: u64,
    payment_secret: Slice32,
    received_msat: u64,
    parts: Vec<ReceivedPart>,
    first_arrival: u64,
}

/// Receiving-side collector holding partial payments keyed by their
/// payment hash.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MppReceiver {
    invoices: BTreeMap<Slice32, InvoiceTerms>,
    slots: BTreeMap<Slice32, ReceiveSlot>,
    timeout_secs: u64,
}

impl MppReceiver {
    /// Creates a collector with the given hold timeout.
    pub fn new(timeout_secs: u64) -> MppReceiver {
        MppReceiver {
            invoices: BTreeMap::new(),
            slots: BTreeMap::new(),
            timeout_secs,
        }
    }

    /// Registers an invoice the node is willing to be paid against.
    pub fn register_invoice(
        &mut self,
        payment_hash: Slice32,
        payment_secret: Slice32,
    ) {
        self.invoices
            .insert(payment_hash, InvoiceTerms { payment_secret });
    }

    /// Number of payments currently being collected.
    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    /// Processes the decrypted final-hop payload of an incoming HTLC.
    pub fn handle_htlc(
        &mut self,
        payment_hash: Slice32,
        htlc_id: u64,
        amount_msat: u64,
        payload: &PaymentPayload,
        now_secs: u64,
    ) -> HtlcAction {
        let reject = |code| HtlcAction::Reject {
            htlc_ids: vec![htlc_id],
            code,
        };

        let payment_data = match &payload.payment_data {
            Some(payment_data) => payment_data,
            // an MPP part without payment_data cannot be attributed
            None => {
                return reject(
                    FailureCode::IncorrectOrUnknownPaymentDetails,
                )
            }
        };
        let invoice = match self.invoices.get(&payment_hash) {
            Some(invoice) => invoice,
            None => {
                return reject(
                    FailureCode::IncorrectOrUnknownPaymentDetails,
                )
            }
        };
        if payment_data.payment_secret != invoice.payment_secret {
            return reject(FailureCode::IncorrectOrUnknownPaymentDetails);
        }

        let slot = self.slots.entry(payment_hash).or_insert(ReceiveSlot {
            total_msat: payment_data.total_msat,
            payment_secret: payment_data.payment_secret,
            received_msat: 0,
            parts: vec![],
            first_arrival: now_secs,
        });
        if payment_data.total_msat != slot.total_msat {
            return reject(FailureCode::FinalIncorrectHtlcAmount);
        }
        if payment_data.payment_secret != slot.payment_secret {
            return reject(FailureCode::IncorrectOrUnknownPaymentDetails);
        }

        slot.received_msat += amount_msat;
        slot.parts.push(ReceivedPart {
            htlc_id,
            amount_msat,
        });

        // overpayment is acceptable; underpayment holds
        if slot.received_msat >= slot.total_msat {
            let htlc_ids: Vec<u64> =
                slot.parts.iter().map(|part| part.htlc_id).collect();
            info!(
                "payment {} complete: {} msat in {} parts",
                payment_hash,
                slot.received_msat,
                htlc_ids.len()
            );
            self.slots.remove(&payment_hash);
            return HtlcAction::Fulfill { htlc_ids };
        }
        HtlcAction::Hold
    }

    /// Expires every partial payment older than the hold timeout,
    /// returning the reject actions for their held parts.
    pub fn sweep(&mut self, now_secs: u64) -> Vec<(Slice32, HtlcAction)> {
        let expired: Vec<Slice32> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                now_secs >= slot.first_arrival + self.timeout_secs
            })
            .map(|(hash, _)| *hash)
            .collect();
        expired
            .into_iter()
            .filter_map(|payment_hash| {
                self.slots.remove(&payment_hash).map(|slot| {
                    warn!(
                        "payment {} timed out with {} of {} msat",
                        payment_hash, slot.received_msat, slot.total_msat
                    );
                    (payment_hash, HtlcAction::Reject {
                        htlc_ids: slot
                            .parts
                            .into_iter()
                            .map(|part| part.htlc_id)
                            .collect(),
                        code: FailureCode::MppTimeout,
                    })
                })
            })
            .collect()
    }
}

/// Sending-side bookkeeping of outbound payments towards their terminal
/// status.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MppSender {
    payments: BTreeMap<Slice32, OutboundPayment>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct OutboundPayment {
    parts: Vec<PaymentPart>,
    started_at: u64,
    status: Option<PaymentStatus>,
}

impl MppSender {
    /// Creates an empty tracker.
    pub fn new() -> MppSender {
        MppSender::default()
    }

    /// Registers a freshly split payment.
    pub fn begin(
        &mut self,
        payment_hash: Slice32,
        parts: Vec<PaymentPart>,
        now_secs: u64,
    ) {
        self.payments.insert(payment_hash, OutboundPayment {
            parts,
            started_at: now_secs,
            status: None,
        });
    }

    /// Terminal status of a payment, if reached.
    pub fn status(&self, payment_hash: &Slice32) -> Option<PaymentStatus> {
        self.payments
            .get(payment_hash)
            .and_then(|payment| payment.status)
    }

    /// Parts a payment was split into.
    pub fn parts(&self, payment_hash: &Slice32) -> Option<&[PaymentPart]> {
        self.payments
            .get(payment_hash)
            .map(|payment| payment.parts.as_slice())
    }

    /// Marks a payment settled; fed by the preimage store when any part
    /// is fulfilled (off-chain or by on-chain extraction).
    pub fn on_settled(&mut self, payment_hash: &Slice32) {
        if let Some(payment) = self.payments.get_mut(payment_hash) {
            payment.status = Some(PaymentStatus::Succeeded);
        }
    }

    /// Marks a payment unroutable.
    pub fn on_no_route(&mut self, payment_hash: &Slice32) {
        if let Some(payment) = self.payments.get_mut(payment_hash) {
            payment.status = Some(PaymentStatus::FailedNoRoute);
        }
    }

    /// Cancels an outbound payment: retries stop, in-flight HTLCs still
    /// resolve by their CLTV.
    pub fn cancel(&mut self, payment_hash: &Slice32) {
        if let Some(payment) = self.payments.get_mut(payment_hash) {
            if payment.status.is_none() {
                payment.status = Some(PaymentStatus::Cancelled);
            }
        }
    }

    /// Times out pending payments older than `timeout_secs`.
    pub fn sweep(&mut self, now_secs: u64, timeout_secs: u64) {
        for payment in self.payments.values_mut() {
            if payment.status.is_none()
                && now_secs >= payment.started_at + timeout_secs
            {
                payment.status = Some(PaymentStatus::FailedTimeout);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sphinx::PaymentData;
    use amplify::Wrapper;

    fn scid(n: u32) -> ShortChannelId {
        ShortChannelId::new(700_000 + n, n, 0).unwrap()
    }

    fn candidate(n: u32, liquidity_msat: u64) -> PartCandidate {
        PartCandidate {
            short_channel_id: scid(n),
            liquidity_msat,
            htlc_maximum_msat: liquidity_msat,
        }
    }

    fn final_payload(secret: [u8; 32], total_msat: u64) -> PaymentPayload {
        PaymentPayload::receiver(total_msat, 144, PaymentData {
            payment_secret: Slice32::from_inner(secret),
            total_msat,
        })
    }

    #[test]
    fn split_across_five_channel_fixture() {
        // bottleneck liquidity of the routes towards node4 in the 5-node
        // fixture; no single route carries the 1.5e9 msat total
        let candidates = vec![
            candidate(1, 1_000_000_000),
            candidate(2, 500_000_000),
            candidate(3, 800_000_000),
            candidate(4, 600_000_000),
        ];
        let total = 1_500_000_000u64;
        let parts = split_payment(
            &candidates,
            total,
            &SplitConfig::default(),
        )
        .unwrap();
        assert!(parts.len() >= 2);
        let sum: u64 = parts.iter().map(|part| part.amount_msat).sum();
        assert_eq!(sum, total);
        assert!(parts.len() <= MPP_DEFAULT_MAX_PARTS);
        for part in &parts {
            assert!(part.amount_msat >= SplitConfig::default().min_part_msat);
        }
    }

    #[test]
    fn split_fails_on_insufficient_liquidity() {
        let candidates = vec![candidate(1, 100), candidate(2, 200)];
        assert_eq!(
            split_payment(&candidates, 1_000, &SplitConfig::default()),
            Err(MppError::LiquidityInsufficient {
                required: 1_000,
                available: 300,
            })
        );
    }

    #[test]
    fn split_respects_max_parts() {
        let candidates: Vec<PartCandidate> =
            (1..=4).map(|n| candidate(n, 30_000_000)).collect();
        let config = SplitConfig {
            max_parts: 2,
            min_part_msat: 1,
        };
        assert_eq!(
            split_payment(&candidates, 100_000_000, &config),
            Err(MppError::TooManyParts(2))
        );
    }

    #[test]
    fn receiver_fulfills_at_total() {
        let mut receiver = MppReceiver::new(MPP_DEFAULT_TIMEOUT_SECS);
        let hash = Slice32::from_inner([0x11; 32]);
        receiver.register_invoice(hash, Slice32::from_inner([0x42; 32]));

        let payload = final_payload([0x42; 32], 1_000_000);
        assert_eq!(
            receiver.handle_htlc(hash, 1, 400_000, &payload, 10),
            HtlcAction::Hold
        );
        assert_eq!(receiver.pending_count(), 1);
        // overpayment on the second part is allowed
        assert_eq!(
            receiver.handle_htlc(hash, 2, 700_000, &payload, 11),
            HtlcAction::Fulfill {
                htlc_ids: vec![1, 2]
            }
        );
        assert_eq!(receiver.pending_count(), 0);
    }

    #[test]
    fn receiver_rejects_secret_mismatch() {
        let mut receiver = MppReceiver::new(MPP_DEFAULT_TIMEOUT_SECS);
        let hash = Slice32::from_inner([0x11; 32]);
        receiver.register_invoice(hash, Slice32::from_inner([0x42; 32]));

        let payload = final_payload([0x42; 32], 1_000_000);
        receiver.handle_htlc(hash, 1, 400_000, &payload, 10);

        let wrong_secret = final_payload([0x43; 32], 1_000_000);
        assert_eq!(
            receiver.handle_htlc(hash, 2, 600_000, &wrong_secret, 11),
            HtlcAction::Reject {
                htlc_ids: vec![2],
                code: FailureCode::IncorrectOrUnknownPaymentDetails,
            }
        );
    }

    #[test]
    fn receiver_rejects_total_mismatch() {
        let mut receiver = MppReceiver::new(MPP_DEFAULT_TIMEOUT_SECS);
        let hash = Slice32::from_inner([0x11; 32]);
        receiver.register_invoice(hash, Slice32::from_inner([0x42; 32]));

        receiver.handle_htlc(
            hash,
            1,
            400_000,
            &final_payload([0x42; 32], 1_000_000),
            10,
        );
        assert_eq!(
            receiver.handle_htlc(
                hash,
                2,
                600_000,
                &final_payload([0x42; 32], 2_000_000),
                11,
            ),
            HtlcAction::Reject {
                htlc_ids: vec![2],
                code: FailureCode::FinalIncorrectHtlcAmount,
            }
        );
    }

    #[test]
    fn receiver_rejects_unknown_and_missing_data() {
        let mut receiver = MppReceiver::new(MPP_DEFAULT_TIMEOUT_SECS);
        let unknown_hash = Slice32::from_inner([0x77; 32]);
        assert_eq!(
            receiver.handle_htlc(
                unknown_hash,
                1,
                100,
                &final_payload([0x42; 32], 100),
                10,
            ),
            HtlcAction::Reject {
                htlc_ids: vec![1],
                code: FailureCode::IncorrectOrUnknownPaymentDetails,
            }
        );

        let hash = Slice32::from_inner([0x11; 32]);
        receiver.register_invoice(hash, Slice32::from_inner([0x42; 32]));
        let mut no_data = final_payload([0x42; 32], 100);
        no_data.payment_data = None;
        assert_eq!(
            receiver.handle_htlc(hash, 2, 100, &no_data, 10),
            HtlcAction::Reject {
                htlc_ids: vec![2],
                code: FailureCode::IncorrectOrUnknownPaymentDetails,
            }
        );
    }

    #[test]
    fn receiver_times_out_partial_payments() {
        let mut receiver = MppReceiver::new(60);
        let hash = Slice32::from_inner([0x11; 32]);
        receiver.register_invoice(hash, Slice32::from_inner([0x42; 32]));
        receiver.handle_htlc(
            hash,
            7,
            400_000,
            &final_payload([0x42; 32], 1_000_000),
            100,
        );
        receiver.handle_htlc(
            hash,
            8,
            100_000,
            &final_payload([0x42; 32], 1_000_000),
            120,
        );

        assert!(receiver.sweep(150).is_empty());
        let expired = receiver.sweep(160);
        assert_eq!(expired, vec![(hash, HtlcAction::Reject {
            htlc_ids: vec![7, 8],
            code: FailureCode::MppTimeout,
        })]);
        assert_eq!(receiver.pending_count(), 0);
    }

    #[test]
    fn sender_terminal_statuses() {
        let mut sender = MppSender::new();
        let hash = Slice32::from_inner([0x31; 32]);
        sender.begin(hash, vec![], 100);
        assert_eq!(sender.status(&hash), None);

        sender.sweep(159, 60);
        assert_eq!(sender.status(&hash), None);
        sender.sweep(160, 60);
        assert_eq!(sender.status(&hash), Some(PaymentStatus::FailedTimeout));

        let other = Slice32::from_inner([0x32; 32]);
        sender.begin(other, vec![], 100);
        sender.cancel(&other);
        assert_eq!(sender.status(&other), Some(PaymentStatus::Cancelled));
        // a preimage arriving after cancellation still proves the payment
        sender.on_settled(&other);
        assert_eq!(sender.status(&other), Some(PaymentStatus::Succeeded));
    }
}
