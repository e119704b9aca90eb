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

//! Splice manager: drives the interactive construction engine to resize a
//! live channel (splice-in, splice-out, fee-bumping RBF) and tracks the
//! confirmation and `splice_locked` handshake that activates the new
//! funding output.

use std::time::{Duration, Instant};

use bitcoin::Txid;
use secp256k1::PublicKey;

use super::interactive::{
    FundingInput, FundingOutput, InteractiveTxSession, SessionConfig,
    SessionError, SessionState, StepOutcome,
};
use crate::p2p::{
    ChannelId, Messages, SpliceAck, SpliceInit, SpliceLocked, TxAckRbf,
    TxInitRbf, TxSignatures,
};

/// Confirmations of the splice transaction required before
/// `splice_locked`.
pub const SPLICE_MIN_CONFIRMATIONS: u32 = 3;

/// Wall-clock deadline of a splice negotiation.
pub const SPLICE_TIMEOUT: Duration = Duration::from_secs(300);

/// Largest channel capacity expressible in lightning amounts:
/// 16 777 215 000 msat.
pub const MAX_SPLICE_CAPACITY_SATS: u64 = 16_777_215;

/// Direction of a splice.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum SpliceType {
    /// Capacity grows
    #[display("splice_in")]
    In,

    /// Capacity shrinks
    #[display("splice_out")]
    Out,

    /// Funding transaction replaced at a higher feerate
    #[display("rbf")]
    Rbf,

    /// Both peers move funds in opposite directions
    #[display("combined")]
    Combined,
}

/// Splice lifecycle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum SpliceState {
    /// No splice in progress
    #[display("IDLE")]
    Idle,

    /// `splice_init` sent, waiting for `splice_ack`
    #[display("AWAITING_ACK")]
    AwaitingAck,

    /// Interactive construction in progress
    #[display("NEGOTIATING")]
    Negotiating,

    /// Waiting for `tx_signatures` of both sides
    #[display("AWAITING_SIGNATURES")]
    AwaitingSignatures,

    /// Waiting for the splice transaction to confirm
    #[display("AWAITING_CONFIRMATION")]
    AwaitingConfirmation,

    /// Waiting for both `splice_locked`
    #[display("AWAITING_LOCKED")]
    AwaitingLocked,

    /// New funding output active
    #[display("COMPLETED")]
    Completed,

    /// Splice abandoned; the previous funding output stays active
    #[display("ABORTED")]
    Aborted,
}

/// Errors aborting a splice.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SpliceError {
    /// splice message not valid in the current state
    UnexpectedMessage,

    /// splice message channel id does not match the channel
    ChannelMismatch,

    /// resulting capacity would be negative
    CapacityUnderflow,

    /// resulting capacity {0} sat is below the channel dust limit
    BelowDust(u64),

    /// resulting capacity {0} sat exceeds the maximum expressible channel
    /// capacity
    CapacityOverflow(u64),

    /// splice negotiation exceeded its deadline
    Timeout,

    /// interactive construction failed
    #[from]
    #[display(inner)]
    Construction(SessionError),

    /// RBF feerate {proposed} sat/kW does not exceed {previous} sat/kW by
    /// the required 1/24th
    FeerateTooLow {
        /// Feerate of the transaction being replaced
        previous: u32,
        /// Proposed replacement feerate
        proposed: u32,
    },

    /// confirmation of an unrelated transaction {0}
    UnknownTxid(Txid),
}

/// Static parameters of a splice attempt.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpliceConfig {
    /// The channel being spliced
    pub channel_id: ChannelId,

    /// Capacity of the channel before the splice, in satoshi
    pub current_capacity_sats: u64,

    /// Dust limit the new capacity must stay above
    pub dust_limit_sats: u64,

    /// Feerate of the splice transaction, sat per 1000 weight
    pub feerate_perkw: u32,

    /// Locktime of the splice transaction
    pub locktime: u32,

    /// Funding pubkey for the new funding output
    pub funding_pubkey: PublicKey,

    /// Commitment point to announce in our `splice_locked`
    pub next_per_commitment_point: PublicKey,

    /// Inputs this node contributes to the splice transaction (the
    /// previous funding outpoint included)
    pub our_inputs: Vec<FundingInput>,

    /// Non-funding outputs this node contributes (e.g. a splice-out
    /// payout)
    pub our_outputs: Vec<FundingOutput>,

    /// Script of the new shared funding output
    pub funding_script: bitcoin::Script,

    /// Negotiation deadline
    pub timeout: Duration,
}

/// Outcome of one splice protocol step.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpliceOutcome {
    /// State after the step
    pub state: SpliceState,

    /// Messages to deliver to the peer
    pub messages: Vec<Messages>,

    /// Error aborting the splice, if any
    pub error: Option<SpliceError>,
}

/// Per-channel splice state machine.
#[derive(Clone, Debug)]
pub struct SpliceManager {
    config: SpliceConfig,
    state: SpliceState,
    we_are_initiator: bool,
    our_contribution_sats: i64,
    their_contribution_sats: i64,
    new_capacity_sats: u64,
    session: Option<InteractiveTxSession>,
    splice_txid: Option<Txid>,
    confirmations: u32,
    rbf: bool,
    we_sent_locked: bool,
    peer_sent_locked: bool,
    deadline: Instant,
}

impl SpliceManager {
    /// Starts a splice as initiator, producing `splice_init`.
    pub fn initiate(
        config: SpliceConfig,
        our_contribution_sats: i64,
    ) -> (SpliceManager, SpliceOutcome) {
        let deadline = Instant::now() + config.timeout;
        let message = Messages::SpliceInit(SpliceInit {
            channel_id: config.channel_id,
            funding_contribution_satoshis: our_contribution_sats,
            funding_feerate_perkw: config.feerate_perkw,
            locktime: config.locktime,
            funding_pubkey: config.funding_pubkey,
        });
        let manager = SpliceManager {
            config,
            state: SpliceState::AwaitingAck,
            we_are_initiator: true,
            our_contribution_sats,
            their_contribution_sats: 0,
            new_capacity_sats: 0,
            session: None,
            splice_txid: None,
            confirmations: 0,
            rbf: false,
            we_sent_locked: false,
            peer_sent_locked: false,
            deadline,
        };
        let outcome = SpliceOutcome {
            state: manager.state,
            messages: vec![message],
            error: None,
        };
        (manager, outcome)
    }

    /// Creates the accepting side; `our_contribution_sats` is what this
    /// node will answer with in `splice_ack`.
    pub fn respond(
        config: SpliceConfig,
        our_contribution_sats: i64,
    ) -> SpliceManager {
        let deadline = Instant::now() + config.timeout;
        SpliceManager {
            config,
            state: SpliceState::Idle,
            we_are_initiator: false,
            our_contribution_sats,
            their_contribution_sats: 0,
            new_capacity_sats: 0,
            session: None,
            splice_txid: None,
            confirmations: 0,
            rbf: false,
            we_sent_locked: false,
            peer_sent_locked: false,
            deadline,
        }
    }

    /// Current state.
    pub fn state(&self) -> SpliceState {
        self.state
    }

    /// Resulting capacity once both contributions are known.
    pub fn new_capacity_sats(&self) -> u64 {
        self.new_capacity_sats
    }

    /// Direction of the splice once both contributions are known.
    pub fn splice_type(&self) -> Option<SpliceType> {
        if self.state == SpliceState::Idle
            || self.state == SpliceState::AwaitingAck
        {
            return None;
        }
        if self.rbf {
            return Some(SpliceType::Rbf);
        }
        let ours = self.our_contribution_sats;
        let theirs = self.their_contribution_sats;
        Some(if ours > 0 && theirs < 0 || ours < 0 && theirs > 0 {
            SpliceType::Combined
        } else if ours + theirs > 0 {
            SpliceType::In
        } else if ours + theirs < 0 {
            SpliceType::Out
        } else {
            SpliceType::Rbf
        })
    }

    /// Txid of the splice transaction, once negotiated.
    pub fn splice_txid(&self) -> Option<Txid> {
        self.splice_txid
    }

    /// Confirmations of the splice transaction observed so far.
    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    fn abort(&mut self, error: SpliceError) -> SpliceOutcome {
        warn!("splice on {} aborted: {}", self.config.channel_id, error);
        self.state = SpliceState::Aborted;
        self.session = None;
        SpliceOutcome {
            state: self.state,
            messages: vec![],
            error: Some(error),
        }
    }

    fn validate_capacity(&self) -> Result<u64, SpliceError> {
        let relative =
            self.our_contribution_sats + self.their_contribution_sats;
        let capacity = self.config.current_capacity_sats as i64 + relative;
        if capacity <= 0 {
            return Err(SpliceError::CapacityUnderflow);
        }
        let capacity = capacity as u64;
        if capacity < self.config.dust_limit_sats {
            return Err(SpliceError::BelowDust(capacity));
        }
        if capacity > MAX_SPLICE_CAPACITY_SATS {
            return Err(SpliceError::CapacityOverflow(capacity));
        }
        Ok(capacity)
    }

    fn session_config(&self) -> SessionConfig {
        let mut outputs = vec![FundingOutput {
            sats: self.new_capacity_sats,
            script: self.config.funding_script.clone(),
        }];
        outputs.extend(self.config.our_outputs.iter().cloned());
        SessionConfig {
            channel_id: self.config.channel_id,
            we_are_initiator: self.we_are_initiator,
            // the shared funding output carries the whole new capacity
            our_contribution_sats: if self.we_are_initiator {
                self.new_capacity_sats
            } else {
                0
            },
            peer_contribution_sats: if self.we_are_initiator {
                0
            } else {
                self.new_capacity_sats
            },
            target_feerate_perkw: self.config.feerate_perkw,
            locktime: self.config.locktime,
            our_inputs: self.config.our_inputs.clone(),
            our_outputs: if self.we_are_initiator {
                outputs
            } else {
                self.config.our_outputs.clone()
            },
            timeout: self
                .deadline
                .saturating_duration_since(Instant::now()),
            max_rounds: super::INTERACTIVE_TX_MAX_ROUNDS,
        }
    }

    /// Processes one incoming peer message.
    pub fn handle_message(&mut self, message: &Messages) -> SpliceOutcome {
        if Instant::now() >= self.deadline
            && !matches!(
                self.state,
                SpliceState::Completed | SpliceState::Aborted
            )
        {
            return self.abort(SpliceError::Timeout);
        }
        match message {
            Messages::SpliceInit(msg) => self.on_splice_init(msg),
            Messages::SpliceAck(msg) => self.on_splice_ack(msg),
            Messages::TxInitRbf(msg) => self.on_tx_init_rbf(msg),
            Messages::TxAckRbf(msg) => self.on_tx_ack_rbf(msg),
            Messages::SpliceLocked(msg) => self.on_splice_locked(msg),
            Messages::TxSignatures(msg) => self.on_tx_signatures(msg),
            Messages::TxAddInput(_)
            | Messages::TxAddOutput(_)
            | Messages::TxRemoveInput(_)
            | Messages::TxRemoveOutput(_)
            | Messages::TxComplete(_)
            | Messages::TxAbort(_) => self.on_construction_message(message),
            _ => self.abort(SpliceError::UnexpectedMessage),
        }
    }

    fn on_splice_init(&mut self, msg: &SpliceInit) -> SpliceOutcome {
        if msg.channel_id != self.config.channel_id {
            return self.abort(SpliceError::ChannelMismatch);
        }
        if self.we_are_initiator || self.state != SpliceState::Idle {
            return self.abort(SpliceError::UnexpectedMessage);
        }
        self.their_contribution_sats = msg.funding_contribution_satoshis;
        self.new_capacity_sats = match self.validate_capacity() {
            Ok(capacity) => capacity,
            Err(err) => return self.abort(err),
        };
        self.config.feerate_perkw = msg.funding_feerate_perkw;
        self.config.locktime = msg.locktime;
        self.session =
            Some(InteractiveTxSession::respond(self.session_config()));
        self.state = SpliceState::Negotiating;
        debug!(
            "splice on {} negotiating, new capacity {} sat",
            self.config.channel_id, self.new_capacity_sats
        );
        SpliceOutcome {
            state: self.state,
            messages: vec![Messages::SpliceAck(SpliceAck {
                channel_id: self.config.channel_id,
                funding_contribution_satoshis: self.our_contribution_sats,
                funding_pubkey: self.config.funding_pubkey,
            })],
            error: None,
        }
    }

    fn on_splice_ack(&mut self, msg: &SpliceAck) -> SpliceOutcome {
        if msg.channel_id != self.config.channel_id {
            return self.abort(SpliceError::ChannelMismatch);
        }
        if !self.we_are_initiator || self.state != SpliceState::AwaitingAck {
            return self.abort(SpliceError::UnexpectedMessage);
        }
        self.their_contribution_sats = msg.funding_contribution_satoshis;
        self.new_capacity_sats = match self.validate_capacity() {
            Ok(capacity) => capacity,
            Err(err) => return self.abort(err),
        };
        let (session, outcome) =
            InteractiveTxSession::start(self.session_config());
        self.session = Some(session);
        self.state = SpliceState::Negotiating;
        SpliceOutcome {
            state: self.state,
            messages: outcome.messages,
            error: None,
        }
    }

    /// Restarts construction at a higher feerate while the splice
    /// transaction is still unconfirmed.
    pub fn initiate_rbf(
        &mut self,
        feerate_perkw: u32,
        locktime: u32,
    ) -> SpliceOutcome {
        if self.state != SpliceState::AwaitingConfirmation
            || !self.we_are_initiator
        {
            return self.abort(SpliceError::UnexpectedMessage);
        }
        if let Err(err) = self.check_rbf_feerate(feerate_perkw) {
            return self.abort(err);
        }
        self.config.feerate_perkw = feerate_perkw;
        self.config.locktime = locktime;
        self.rbf = true;
        self.splice_txid = None;
        self.session = None;
        self.state = SpliceState::AwaitingAck;
        SpliceOutcome {
            state: self.state,
            messages: vec![Messages::TxInitRbf(TxInitRbf {
                channel_id: self.config.channel_id,
                locktime,
                feerate_perkw,
                funding_output_contribution: Some(
                    self.our_contribution_sats,
                ),
                unknown_tlvs: Default::default(),
            })],
            error: None,
        }
    }

    fn check_rbf_feerate(&self, proposed: u32) -> Result<(), SpliceError> {
        let previous = self.config.feerate_perkw;
        if proposed < previous + previous / 24 {
            return Err(SpliceError::FeerateTooLow { previous, proposed });
        }
        Ok(())
    }

    fn on_tx_init_rbf(&mut self, msg: &TxInitRbf) -> SpliceOutcome {
        if msg.channel_id != self.config.channel_id {
            return self.abort(SpliceError::ChannelMismatch);
        }
        if self.we_are_initiator
            || self.state != SpliceState::AwaitingConfirmation
        {
            return self.abort(SpliceError::UnexpectedMessage);
        }
        if let Err(err) = self.check_rbf_feerate(msg.feerate_perkw) {
            return self.abort(err);
        }
        self.config.feerate_perkw = msg.feerate_perkw;
        self.config.locktime = msg.locktime;
        if let Some(contribution) = msg.funding_output_contribution {
            self.their_contribution_sats = contribution;
        }
        self.new_capacity_sats = match self.validate_capacity() {
            Ok(capacity) => capacity,
            Err(err) => return self.abort(err),
        };
        self.rbf = true;
        self.splice_txid = None;
        self.session =
            Some(InteractiveTxSession::respond(self.session_config()));
        self.state = SpliceState::Negotiating;
        SpliceOutcome {
            state: self.state,
            messages: vec![Messages::TxAckRbf(TxAckRbf {
                channel_id: self.config.channel_id,
                funding_output_contribution: Some(
                    self.our_contribution_sats,
                ),
                unknown_tlvs: Default::default(),
            })],
            error: None,
        }
    }

    fn on_tx_ack_rbf(&mut self, msg: &TxAckRbf) -> SpliceOutcome {
        if msg.channel_id != self.config.channel_id {
            return self.abort(SpliceError::ChannelMismatch);
        }
        if !self.we_are_initiator
            || !self.rbf
            || self.state != SpliceState::AwaitingAck
        {
            return self.abort(SpliceError::UnexpectedMessage);
        }
        if let Some(contribution) = msg.funding_output_contribution {
            self.their_contribution_sats = contribution;
        }
        self.new_capacity_sats = match self.validate_capacity() {
            Ok(capacity) => capacity,
            Err(err) => return self.abort(err),
        };
        let (session, outcome) =
            InteractiveTxSession::start(self.session_config());
        self.session = Some(session);
        self.state = SpliceState::Negotiating;
        SpliceOutcome {
            state: self.state,
            messages: outcome.messages,
            error: None,
        }
    }

    fn on_construction_message(&mut self, message: &Messages) -> SpliceOutcome {
        let session = match &mut self.session {
            Some(session) if self.state == SpliceState::Negotiating => {
                session
            }
            _ => return self.abort(SpliceError::UnexpectedMessage),
        };
        let outcome = session.handle_message(message);
        self.absorb_session_outcome(outcome)
    }

    fn absorb_session_outcome(&mut self, outcome: StepOutcome) -> SpliceOutcome {
        if let Some(err) = outcome.error {
            return self.abort(SpliceError::Construction(err));
        }
        if let Some(constructed) = &outcome.constructed_tx {
            self.splice_txid = Some(constructed.txid);
        }
        if outcome.state == SessionState::Success
            && self.splice_txid.is_some()
            && self.state == SpliceState::Negotiating
        {
            self.state = SpliceState::AwaitingSignatures;
        }
        SpliceOutcome {
            state: self.state,
            messages: outcome.messages,
            error: None,
        }
    }

    /// Signs our contributed inputs; forwards to the construction session.
    pub fn create_signatures(
        &mut self,
        witnesses: Vec<Vec<u8>>,
    ) -> SpliceOutcome {
        let session = match &mut self.session {
            Some(session)
                if self.state == SpliceState::AwaitingSignatures =>
            {
                session
            }
            _ => return self.abort(SpliceError::UnexpectedMessage),
        };
        let outcome = session.create_signatures(witnesses);
        let result = self.absorb_signature_outcome(outcome);
        result
    }

    fn on_tx_signatures(&mut self, msg: &TxSignatures) -> SpliceOutcome {
        let session = match &mut self.session {
            Some(session)
                if self.state == SpliceState::AwaitingSignatures =>
            {
                session
            }
            _ => return self.abort(SpliceError::UnexpectedMessage),
        };
        let outcome = session.process_signatures(msg);
        self.absorb_signature_outcome(outcome)
    }

    fn absorb_signature_outcome(&mut self, outcome: StepOutcome) -> SpliceOutcome {
        if let Some(err) = outcome.error {
            return self.abort(SpliceError::Construction(err));
        }
        let fully_signed = self
            .session
            .as_ref()
            .map(|session| session.signed_transaction().is_some())
            .unwrap_or(false);
        if fully_signed {
            self.state = SpliceState::AwaitingConfirmation;
            if let Some(txid) = self.splice_txid {
                debug!(
                    "splice tx {} awaiting {} confirmations",
                    txid, SPLICE_MIN_CONFIRMATIONS
                );
            }
        }
        SpliceOutcome {
            state: self.state,
            messages: outcome.messages,
            error: None,
        }
    }

    /// Feeds a confirmation-depth observation of the splice transaction.
    /// Emits `splice_locked` when the depth requirement is met.
    pub fn on_confirmation(
        &mut self,
        txid: Txid,
        depth: u32,
    ) -> SpliceOutcome {
        if self.state != SpliceState::AwaitingConfirmation {
            return SpliceOutcome {
                state: self.state,
                messages: vec![],
                error: None,
            };
        }
        if Some(txid) != self.splice_txid {
            return self.abort(SpliceError::UnknownTxid(txid));
        }
        self.confirmations = depth;
        if depth < SPLICE_MIN_CONFIRMATIONS {
            return SpliceOutcome {
                state: self.state,
                messages: vec![],
                error: None,
            };
        }
        self.state = SpliceState::AwaitingLocked;
        self.we_sent_locked = true;
        SpliceOutcome {
            state: self.state,
            messages: vec![Messages::SpliceLocked(SpliceLocked {
                channel_id: self.config.channel_id,
                next_per_commitment_point: self
                    .config
                    .next_per_commitment_point,
            })],
            error: None,
        }
    }

    fn on_splice_locked(&mut self, msg: &SpliceLocked) -> SpliceOutcome {
        if msg.channel_id != self.config.channel_id {
            return self.abort(SpliceError::ChannelMismatch);
        }
        match self.state {
            SpliceState::AwaitingConfirmation
            | SpliceState::AwaitingLocked => {}
            _ => return self.abort(SpliceError::UnexpectedMessage),
        }
        self.peer_sent_locked = true;
        if self.we_sent_locked {
            self.state = SpliceState::Completed;
            info!(
                "splice on {} completed, capacity {} sat",
                self.config.channel_id, self.new_capacity_sats
            );
        }
        SpliceOutcome {
            state: self.state,
            messages: vec![],
            error: None,
        }
    }
}
