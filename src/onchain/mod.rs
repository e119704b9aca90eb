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

//! On-chain monitor: classifies confirmed transactions touching tracked
//! channels (commitments, cooperative closes, HTLC claims, penalties),
//! extracts preimages from HTLC-success witnesses and drives per-output
//! resolution state machines.

mod resolution;

pub use resolution::{
    OutputAction, OutputResolution, ResolutionState, IRREVOCABLE_DEPTH,
    OFFERED_HTLC_PENALTY_INPUT_WEIGHT, OFFERED_HTLC_PENALTY_WITNESS_WEIGHT,
    PENALTY_WINDOW_BLOCKS, RECEIVED_HTLC_PENALTY_INPUT_WEIGHT,
    RECEIVED_HTLC_PENALTY_WITNESS_WEIGHT, TO_LOCAL_PENALTY_INPUT_WEIGHT,
    TO_LOCAL_PENALTY_WITNESS_WEIGHT,
};

use std::collections::{BTreeMap, BTreeSet};

use amplify::{Slice32, Wrapper};
use bitcoin::{OutPoint, Transaction, Txid};

use crate::crypto;
use crate::p2p::ChannelId;

/// Classification of a confirmed transaction relative to one channel.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
pub enum TxClass {
    /// Cooperative close: funding spent into plain key-hash payouts
    #[display("mutual_close")]
    MutualClose,

    /// Our own last-broadcast commitment
    #[display("local_commitment")]
    LocalCommitment,

    /// A commitment published by the peer
    #[display("remote_commitment")]
    RemoteCommitment,

    /// A commitment the peer had already revoked
    #[display("revoked_commitment")]
    RevokedCommitment,

    /// HTLC claimed through the timeout branch (`locktime > 0`)
    #[display("htlc_timeout")]
    HtlcTimeout,

    /// HTLC claimed with its preimage
    #[display("htlc_success")]
    HtlcSuccess {
        /// The 32-byte preimage pulled from the witness
        preimage: Slice32,
    },

    /// Sweep of multiple outputs of a revoked commitment
    #[display("penalty")]
    Penalty,

    /// Any other spend of a tracked commitment output
    #[display("sweep")]
    Sweep,

    /// Transaction does not touch the channel
    #[display("unrelated")]
    Unrelated,
}

/// Events surfaced to the embedder by block processing.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MonitorEvent {
    /// The channel funding output was spent
    FundingSpent {
        /// Affected channel
        channel_id: ChannelId,
        /// How the spend classified
        class: TxClass,
        /// The spending transaction id
        txid: Txid,
    },

    /// A preimage was extracted from an HTLC-success witness; feeds the
    /// payment sender so held HTLCs can settle
    PreimageExtracted {
        /// Affected channel
        channel_id: ChannelId,
        /// SHA-256 of the preimage, i.e. the payment hash
        payment_hash: Slice32,
        /// The preimage itself
        preimage: Slice32,
    },

    /// A tracked output changed resolution state
    OutputResolved {
        /// Affected channel
        channel_id: ChannelId,
        /// The resolved output
        outpoint: OutPoint,
        /// New state
        state: ResolutionState,
    },

    /// A tracked HTLC crossed its CLTV expiry; a timeout spend is due
    HtlcTimedOut {
        /// Affected channel
        channel_id: ChannelId,
        /// The expired HTLC output
        outpoint: OutPoint,
    },

    /// The penalty window of a revoked commitment elapsed without a
    /// penalty broadcast; the revoked funds are lost
    PenaltyWindowLost {
        /// Affected channel
        channel_id: ChannelId,
    },
}

/// Parameters registering a channel with the monitor.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelWatch {
    /// The channel id
    pub channel_id: ChannelId,

    /// Funding outpoint to watch for spends
    pub funding_outpoint: OutPoint,

    /// Txid of our own last-broadcast commitment template
    pub our_commitment_txid: Option<Txid>,

    /// Txids of commitments the peer revoked
    pub revoked_commitment_txids: BTreeSet<Txid>,
}

/// A tracked HTLC output on a confirmed commitment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct TrackedHtlc {
    cltv_expiry: u32,
    timed_out: bool,
}

/// Aggregated on-chain state of one channel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelState {
    watch: ChannelWatch,
    commitment_seen: Option<Txid>,
    resolutions: BTreeMap<OutPoint, OutputResolution>,
    htlcs: BTreeMap<OutPoint, TrackedHtlc>,
    extracted_preimages: Vec<Slice32>,
    revoked_seen_height: Option<u32>,
    penalty_broadcast: bool,
    penalty_lost: bool,
    last_activity_height: u32,
}

impl ChannelState {
    fn new(watch: ChannelWatch) -> ChannelState {
        ChannelState {
            watch,
            commitment_seen: None,
            resolutions: BTreeMap::new(),
            htlcs: BTreeMap::new(),
            extracted_preimages: Vec::new(),
            revoked_seen_height: None,
            penalty_broadcast: false,
            penalty_lost: false,
            last_activity_height: 0,
        }
    }

    /// Resolution record of a tracked output.
    pub fn resolution(&self, outpoint: &OutPoint) -> Option<&OutputResolution> {
        self.resolutions.get(outpoint)
    }

    /// Preimages extracted from this channel's HTLC claims.
    pub fn extracted_preimages(&self) -> &[Slice32] {
        &self.extracted_preimages
    }

    /// Height of the last on-chain activity observed for the channel.
    pub fn last_activity_height(&self) -> u32 {
        self.last_activity_height
    }
}

/// First 32-byte witness element that is not the final script; by the
/// HTLC-success witness shape this is the payment preimage.
fn witness_preimage(tx: &Transaction) -> Option<Slice32> {
    for input in &tx.input {
        let elements: Vec<&[u8]> = input.witness.iter().collect();
        if elements.len() < 2 {
            continue;
        }
        for element in &elements[..elements.len() - 1] {
            if element.len() == 32 {
                let mut preimage = [0u8; 32];
                preimage.copy_from_slice(element);
                return Some(Slice32::from_inner(preimage));
            }
        }
    }
    None
}

fn is_keyhash_payout(script: &bitcoin::Script) -> bool {
    script.is_v0_p2wpkh() || script.is_p2pkh()
}

/// The on-chain monitor, consuming confirmed transactions in block order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ChainMonitor {
    channels: BTreeMap<ChannelId, ChannelState>,
    current_height: u32,
}

impl ChainMonitor {
    /// Creates an empty monitor.
    pub fn new() -> ChainMonitor {
        ChainMonitor::default()
    }

    /// Registers a channel for monitoring.
    pub fn watch_channel(&mut self, watch: ChannelWatch) {
        self.channels
            .insert(watch.channel_id, ChannelState::new(watch));
    }

    /// Registers an HTLC output of a confirmed commitment for timeout
    /// tracking and resolution.
    pub fn track_htlc_output(
        &mut self,
        channel_id: ChannelId,
        outpoint: OutPoint,
        cltv_expiry: u32,
    ) {
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.htlcs.insert(outpoint, TrackedHtlc {
                cltv_expiry,
                timed_out: false,
            });
            channel
                .resolutions
                .entry(outpoint)
                .or_insert_with(OutputResolution::default);
        }
    }

    /// State of a monitored channel.
    pub fn channel_state(&self, channel_id: &ChannelId) -> Option<&ChannelState> {
        self.channels.get(channel_id)
    }

    /// Current chain height the monitor has processed up to.
    pub fn height(&self) -> u32 {
        self.current_height
    }

    /// Classifies a confirmed transaction relative to one channel.
    pub fn classify(channel: &ChannelState, tx: &Transaction) -> TxClass {
        let txid = tx.txid();
        let spends_funding = tx.input.iter().any(|input| {
            input.previous_output == channel.watch.funding_outpoint
        });
        if spends_funding {
            if tx
                .output
                .iter()
                .all(|output| is_keyhash_payout(&output.script_pubkey))
            {
                return TxClass::MutualClose;
            }
            if channel.watch.revoked_commitment_txids.contains(&txid) {
                return TxClass::RevokedCommitment;
            }
            return if Some(txid) == channel.watch.our_commitment_txid {
                TxClass::LocalCommitment
            } else {
                TxClass::RemoteCommitment
            };
        }

        // penalty: several inputs sweeping one revoked commitment
        for revoked in &channel.watch.revoked_commitment_txids {
            let swept = tx
                .input
                .iter()
                .filter(|input| input.previous_output.txid == *revoked)
                .count();
            if swept >= 2 {
                return TxClass::Penalty;
            }
        }

        let commitment = match channel.commitment_seen {
            Some(commitment) => commitment,
            None => return TxClass::Unrelated,
        };
        let spends_commitment = tx
            .input
            .iter()
            .any(|input| input.previous_output.txid == commitment);
        if !spends_commitment {
            return TxClass::Unrelated;
        }
        if tx.lock_time.0 > 0 {
            return TxClass::HtlcTimeout;
        }
        if let Some(preimage) = witness_preimage(tx) {
            return TxClass::HtlcSuccess { preimage };
        }
        TxClass::Sweep
    }

    /// Processes the transactions of one confirmed block. Blocks must be
    /// delivered in height order; within a block, transactions keep their
    /// canonical order.
    pub fn process_block(
        &mut self,
        height: u32,
        txs: &[Transaction],
    ) -> Vec<MonitorEvent> {
        self.current_height = height;
        let mut events = vec![];

        for (channel_id, channel) in &mut self.channels {
            for tx in txs {
                let class = Self::classify(channel, tx);
                if class == TxClass::Unrelated {
                    continue;
                }
                let txid = tx.txid();
                channel.last_activity_height = height;

                match &class {
                    TxClass::MutualClose
                    | TxClass::LocalCommitment
                    | TxClass::RemoteCommitment
                    | TxClass::RevokedCommitment => {
                        channel.commitment_seen = Some(txid);
                        if class == TxClass::RevokedCommitment {
                            channel.revoked_seen_height = Some(height);
                        }
                        let funding = channel.watch.funding_outpoint;
                        let resolution = channel
                            .resolutions
                            .entry(funding)
                            .or_insert_with(OutputResolution::default);
                        resolution.observe_spend(txid, height);
                        events.push(MonitorEvent::OutputResolved {
                            channel_id: *channel_id,
                            outpoint: funding,
                            state: resolution.state,
                        });
                        info!(
                            "channel {} funding spent by {} ({})",
                            channel_id, txid, class
                        );
                        events.push(MonitorEvent::FundingSpent {
                            channel_id: *channel_id,
                            class: class.clone(),
                            txid,
                        });
                    }
                    TxClass::Penalty => {
                        channel.penalty_broadcast = true;
                    }
                    TxClass::HtlcSuccess { preimage } => {
                        channel.extracted_preimages.push(*preimage);
                        events.push(MonitorEvent::PreimageExtracted {
                            channel_id: *channel_id,
                            payment_hash: crypto::sha256(&[
                                preimage.as_inner()
                            ]),
                            preimage: *preimage,
                        });
                    }
                    TxClass::HtlcTimeout | TxClass::Sweep => {}
                    TxClass::Unrelated => unreachable!("filtered above"),
                }

                // resolve the specific outputs this transaction spends
                for input in &tx.input {
                    let outpoint = input.previous_output;
                    if let Some(resolution) =
                        channel.resolutions.get_mut(&outpoint)
                    {
                        if resolution.state == ResolutionState::Unresolved {
                            resolution.observe_spend(txid, height);
                            events.push(MonitorEvent::OutputResolved {
                                channel_id: *channel_id,
                                outpoint,
                                state: resolution.state,
                            });
                        }
                    }
                }
            }

            // depth-driven transitions for everything already resolved
            for (outpoint, resolution) in &mut channel.resolutions {
                let before = resolution.state;
                resolution.update_depth(height);
                if resolution.state != before {
                    events.push(MonitorEvent::OutputResolved {
                        channel_id: *channel_id,
                        outpoint: *outpoint,
                        state: resolution.state,
                    });
                }
            }

            // HTLC timeouts: due exactly when the chain reaches expiry
            for (outpoint, htlc) in &mut channel.htlcs {
                if htlc.timed_out || height < htlc.cltv_expiry {
                    continue;
                }
                let unresolved = channel
                    .resolutions
                    .get_mut(outpoint)
                    .map(|resolution| {
                        resolution.state == ResolutionState::Unresolved
                            && resolution
                                .schedule(OutputAction::SpendWithTimeout)
                    })
                    .unwrap_or(false);
                if unresolved {
                    htlc.timed_out = true;
                    events.push(MonitorEvent::HtlcTimedOut {
                        channel_id: *channel_id,
                        outpoint: *outpoint,
                    });
                }
            }

            // a revoked commitment must be answered within the window
            if let Some(seen) = channel.revoked_seen_height {
                if !channel.penalty_broadcast
                    && !channel.penalty_lost
                    && height >= seen + PENALTY_WINDOW_BLOCKS
                {
                    channel.penalty_lost = true;
                    warn!(
                        "channel {} penalty window expired unanswered",
                        channel_id
                    );
                    events.push(MonitorEvent::PenaltyWindowLost {
                        channel_id: *channel_id,
                    });
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash;
    use bitcoin::{
        PackedLockTime, Script, Sequence, TxIn, TxOut, Witness,
    };

    use super::*;

    fn outpoint(byte: u8, vout: u32) -> OutPoint {
        OutPoint {
            txid: Txid::from_inner([byte; 32]),
            vout,
        }
    }

    fn spend(
        prev: OutPoint,
        locktime: u32,
        witness: Vec<Vec<u8>>,
        outputs: Vec<TxOut>,
    ) -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime(locktime),
            input: vec![TxIn {
                previous_output: prev,
                script_sig: Script::new(),
                sequence: Sequence(0xFFFF_FFFD),
                witness: Witness::from_vec(witness),
            }],
            output: outputs,
        }
    }

    fn keyhash_output(value: u64) -> TxOut {
        TxOut {
            value,
            script_pubkey: Script::new_v0_p2wpkh(
                &bitcoin::WPubkeyHash::from_inner([0x0C; 20]),
            ),
        }
    }

    fn script_output(value: u64) -> TxOut {
        TxOut {
            value,
            script_pubkey: Script::new_v0_p2wsh(
                &bitcoin::WScriptHash::from_inner([0x0D; 32]),
            ),
        }
    }

    fn watch() -> ChannelWatch {
        ChannelWatch {
            channel_id: ChannelId::default(),
            funding_outpoint: outpoint(0x10, 0),
            our_commitment_txid: None,
            revoked_commitment_txids: BTreeSet::new(),
        }
    }

    fn watched_monitor() -> ChainMonitor {
        let mut monitor = ChainMonitor::new();
        monitor.watch_channel(watch());
        monitor
    }

    #[test]
    fn mutual_close_classification() {
        let mut monitor = watched_monitor();
        let close = spend(outpoint(0x10, 0), 0, vec![], vec![
            keyhash_output(40_000),
            keyhash_output(60_000),
        ]);
        let events = monitor.process_block(800_000, &[close.clone()]);
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::FundingSpent {
                class: TxClass::MutualClose,
                ..
            }
        )));
    }

    #[test]
    fn local_vs_remote_commitment() {
        let commitment = spend(outpoint(0x10, 0), 0, vec![], vec![
            script_output(90_000),
            keyhash_output(10_000),
        ]);

        let mut local_watch = watch();
        local_watch.our_commitment_txid = Some(commitment.txid());
        let mut monitor = ChainMonitor::new();
        monitor.watch_channel(local_watch);
        let events = monitor.process_block(800_000, &[commitment.clone()]);
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::FundingSpent {
                class: TxClass::LocalCommitment,
                ..
            }
        )));

        let mut monitor = watched_monitor();
        let events = monitor.process_block(800_000, &[commitment]);
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::FundingSpent {
                class: TxClass::RemoteCommitment,
                ..
            }
        )));
    }

    #[test]
    fn htlc_success_extracts_preimage() {
        let mut monitor = watched_monitor();
        let commitment = spend(outpoint(0x10, 0), 0, vec![], vec![
            script_output(90_000),
        ]);
        monitor.process_block(800_000, &[commitment.clone()]);

        let preimage = [0x5A; 32];
        let htlc_spend = spend(
            OutPoint {
                txid: commitment.txid(),
                vout: 0,
            },
            0,
            vec![vec![0x30; 71], preimage.to_vec(), vec![0x51; 45]],
            vec![keyhash_output(89_000)],
        );
        let events = monitor.process_block(800_001, &[htlc_spend]);
        let extracted = events.iter().find_map(|event| match event {
            MonitorEvent::PreimageExtracted {
                preimage,
                payment_hash,
                ..
            } => Some((*preimage, *payment_hash)),
            _ => None,
        });
        let (extracted, payment_hash) = extracted.expect("preimage event");
        assert_eq!(extracted, Slice32::from_inner(preimage));
        assert_eq!(payment_hash, crypto::sha256(&[&preimage]));
        let state = monitor
            .channel_state(&ChannelId::default())
            .unwrap();
        assert_eq!(state.extracted_preimages(), &[extracted]);
    }

    #[test]
    fn htlc_timeout_classification() {
        let mut monitor = watched_monitor();
        let commitment = spend(outpoint(0x10, 0), 0, vec![], vec![
            script_output(90_000),
        ]);
        monitor.process_block(800_000, &[commitment.clone()]);

        let timeout_spend = spend(
            OutPoint {
                txid: commitment.txid(),
                vout: 0,
            },
            800_100,
            vec![vec![0x30; 71], vec![], vec![0x51; 45]],
            vec![keyhash_output(89_000)],
        );
        let channel = monitor
            .channel_state(&ChannelId::default())
            .unwrap();
        assert_eq!(
            ChainMonitor::classify(channel, &timeout_spend),
            TxClass::HtlcTimeout
        );
    }

    #[test]
    fn penalty_classification_and_window() {
        let revoked = spend(outpoint(0x10, 0), 0, vec![], vec![
            script_output(50_000),
            script_output(40_000),
        ]);
        let mut channel_watch = watch();
        channel_watch
            .revoked_commitment_txids
            .insert(revoked.txid());
        let mut monitor = ChainMonitor::new();
        monitor.watch_channel(channel_watch.clone());

        let events = monitor.process_block(800_000, &[revoked.clone()]);
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::FundingSpent {
                class: TxClass::RevokedCommitment,
                ..
            }
        )));

        // a sweep of two revoked outputs is a penalty
        let penalty = Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: (0..2)
                .map(|vout| TxIn {
                    previous_output: OutPoint {
                        txid: revoked.txid(),
                        vout,
                    },
                    script_sig: Script::new(),
                    sequence: Sequence(0xFFFF_FFFF),
                    witness: Witness::default(),
                })
                .collect(),
            output: vec![keyhash_output(89_000)],
        };
        let channel = monitor
            .channel_state(&ChannelId::default())
            .unwrap();
        assert_eq!(
            ChainMonitor::classify(channel, &penalty),
            TxClass::Penalty
        );

        // unanswered, the window elapses and the funds are lost
        let mut lost_events = vec![];
        for height in 800_001..=800_000 + PENALTY_WINDOW_BLOCKS {
            lost_events.extend(monitor.process_block(height, &[]));
        }
        assert!(lost_events.iter().any(|event| matches!(
            event,
            MonitorEvent::PenaltyWindowLost { .. }
        )));

        // answered in time, no loss event
        let mut monitor = ChainMonitor::new();
        monitor.watch_channel(channel_watch);
        monitor.process_block(800_000, &[revoked]);
        let events = monitor.process_block(800_001, &[penalty]);
        assert!(!events.iter().any(|event| matches!(
            event,
            MonitorEvent::PenaltyWindowLost { .. }
        )));
        let mut events = vec![];
        for height in 800_002..=800_040 {
            events.extend(monitor.process_block(height, &[]));
        }
        assert!(!events.iter().any(|event| matches!(
            event,
            MonitorEvent::PenaltyWindowLost { .. }
        )));
    }

    #[test]
    fn htlc_times_out_exactly_at_expiry() {
        let mut monitor = watched_monitor();
        let htlc_outpoint = outpoint(0x20, 1);
        monitor.track_htlc_output(
            ChannelId::default(),
            htlc_outpoint,
            800_050,
        );

        let events = monitor.process_block(800_049, &[]);
        assert!(events.iter().all(|event| !matches!(
            event,
            MonitorEvent::HtlcTimedOut { .. }
        )));

        let events = monitor.process_block(800_050, &[]);
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::HtlcTimedOut { outpoint, .. }
                if *outpoint == htlc_outpoint
        )));
        let resolution = monitor
            .channel_state(&ChannelId::default())
            .unwrap()
            .resolution(&htlc_outpoint)
            .unwrap();
        assert!(resolution
            .next_actions
            .contains(&OutputAction::SpendWithTimeout));

        // the action is raised only once
        let events = monitor.process_block(800_051, &[]);
        assert!(events.iter().all(|event| !matches!(
            event,
            MonitorEvent::HtlcTimedOut { .. }
        )));
    }

    #[test]
    fn irrevocable_at_one_hundred_confirmations() {
        let mut monitor = watched_monitor();
        let close = spend(outpoint(0x10, 0), 0, vec![], vec![
            keyhash_output(100_000),
        ]);
        monitor.process_block(800_000, &[close]);

        let mut events = vec![];
        for height in 800_001..=800_099 {
            events.extend(monitor.process_block(height, &[]));
        }
        let resolution = monitor
            .channel_state(&ChannelId::default())
            .unwrap()
            .resolution(&outpoint(0x10, 0))
            .unwrap()
            .clone();
        assert_eq!(resolution.confirmation_depth, 100);
        assert_eq!(
            resolution.state,
            ResolutionState::IrrevocablyResolved
        );
        assert!(events.iter().any(|event| matches!(
            event,
            MonitorEvent::OutputResolved {
                state: ResolutionState::IrrevocablyResolved,
                ..
            }
        )));
    }
}
