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

//! Interactive transaction construction (BOLT-2 §2): the two-party state
//! machine used by dual funding, splicing and RBF.
//!
//! Both peers add and remove inputs and outputs identified by serial ids
//! whose parity encodes the contributor; when both have sent consecutive
//! `tx_complete` the transaction is finalized deterministically and
//! witnesses are exchanged with `tx_signatures`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bitcoin::consensus::encode::deserialize as consensus_deserialize;
use bitcoin::hashes::Hash;
use bitcoin::{
    OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};

use crate::p2p::{
    ChannelId, Messages, TxAbort, TxAddInput, TxAddOutput, TxComplete,
    TxRemoveInput, TxRemoveOutput, TxSignatures,
};

/// Maximum number of inputs (and, independently, outputs) a constructed
/// transaction may carry.
pub const INTERACTIVE_TX_MAX_CONTRIBUTIONS: usize = 252;

/// Maximum number of protocol messages processed within one session.
pub const INTERACTIVE_TX_MAX_ROUNDS: u32 = 100;

/// Wall-clock deadline for a session.
pub const INTERACTIVE_TX_TIMEOUT: Duration = Duration::from_secs(60);

/// Which peer contributed an input or output.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum Owner {
    /// Contributed by this node
    #[display("local")]
    Local,

    /// Contributed by the remote peer
    #[display("remote")]
    Remote,
}

/// Session lifecycle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum SessionState {
    /// Session was created but not started
    #[display("IDLE")]
    Idle,

    /// We owe the peer our contributions
    #[display("AWAITING_OUR_TURN")]
    AwaitingOurTurn,

    /// Waiting for peer contributions or `tx_complete`
    #[display("AWAITING_PEER_TURN")]
    AwaitingPeerTurn,

    /// One side has sent `tx_complete`, the other has not
    #[display("TX_COMPLETE")]
    TxComplete,

    /// Transaction finalized; witnesses are being exchanged
    #[display("AWAITING_SIGNATURES")]
    AwaitingSignatures,

    /// Negotiation finished; the constructed transaction is available
    #[display("SUCCESS")]
    Success,

    /// Session ended by a protocol violation of the peer or by `tx_abort`
    #[display("ABORTED")]
    Aborted,

    /// Session ended by deadline, round limit or invalid final transaction
    #[display("FAILED")]
    Failed,
}

impl SessionState {
    /// States in which no further messages are processed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Success | SessionState::Aborted | SessionState::Failed
        )
    }
}

/// Errors terminating or refusing a step of the session. The `Display`
/// rendering doubles as the human-readable `tx_abort` reason.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SessionError {
    /// Message not valid in the current session state
    UnexpectedMessage,

    /// Message channel id does not match the session
    ChannelMismatch,

    /// Serial id parity does not match the sending peer
    WrongSerialParity(u64),

    /// Serial id already used in this session
    DuplicateSerialId(u64),

    /// Too many inputs
    TooManyInputs,

    /// Too many outputs
    TooManyOutputs,

    /// Peer removed an entry it does not own
    ForeignRemoval(u64),

    /// Negotiation exceeded the round limit
    TooManyRounds,

    /// Negotiation exceeded its deadline
    Timeout,

    /// Constructed transaction must have at least one input and one output
    EmptyTransaction,

    /// Constructed transaction outputs exceed its inputs
    InsufficientFunds {
        /// Sum of the known input values, in satoshi
        inputs: u64,
        /// Sum of the output values, in satoshi
        outputs: u64,
    },

    /// Previous transaction bytes of an input cannot be parsed
    InvalidPrevTx(u64),

    /// Referenced vout does not exist in the previous transaction
    InvalidPrevTxVout(u64),

    /// tx_signatures txid does not match the constructed transaction
    TxidMismatch,

    /// Witness count does not match the contributed inputs
    WitnessCountMismatch {
        /// Number of inputs the signatures must cover
        expected: usize,
        /// Number of witnesses provided
        provided: usize,
    },

    /// Peer aborted: {0}
    PeerAbort(String),
}

/// An input this node intends to contribute.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FundingInput {
    /// Serialized previous transaction
    pub prevtx: Vec<u8>,

    /// Output of the previous transaction to spend
    pub vout: u32,

    /// nSequence for the input
    pub sequence: u32,
}

/// An output this node intends to contribute.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FundingOutput {
    /// Output value in satoshi
    pub sats: u64,

    /// Output script
    pub script: Script,
}

/// Session parameters handed to [`InteractiveTxSession::start`] (initiator)
/// or [`InteractiveTxSession::respond`] (non-initiator).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionConfig {
    /// Channel the transaction is negotiated for
    pub channel_id: ChannelId,

    /// Whether this node is the session initiator
    pub we_are_initiator: bool,

    /// Funding satoshis contributed by this node
    pub our_contribution_sats: u64,

    /// Funding satoshis contributed by the peer
    pub peer_contribution_sats: u64,

    /// Target feerate of the constructed transaction, sat per 1000 weight
    pub target_feerate_perkw: u32,

    /// nLockTime of the constructed transaction
    pub locktime: u32,

    /// Inputs this node contributes
    pub our_inputs: Vec<FundingInput>,

    /// Outputs this node contributes (funding output included for the
    /// initiator)
    pub our_outputs: Vec<FundingOutput>,

    /// Session deadline
    pub timeout: Duration,

    /// Session round limit
    pub max_rounds: u32,
}

impl SessionConfig {
    /// Creates a config with protocol-default limits and no contributions.
    pub fn with(channel_id: ChannelId, we_are_initiator: bool) -> Self {
        SessionConfig {
            channel_id,
            we_are_initiator,
            our_contribution_sats: 0,
            peer_contribution_sats: 0,
            target_feerate_perkw: 253,
            locktime: 0,
            our_inputs: vec![],
            our_outputs: vec![],
            timeout: INTERACTIVE_TX_TIMEOUT,
            max_rounds: INTERACTIVE_TX_MAX_ROUNDS,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct SessionInput {
    prevtx: Vec<u8>,
    vout: u32,
    sequence: u32,
    owner: Owner,
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct SessionOutput {
    sats: u64,
    script: Script,
    owner: Owner,
}

/// Transaction produced by a completed negotiation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstructedTx {
    /// The unsigned transaction, inputs and outputs in serial id order
    pub tx: Transaction,

    /// Canonical txid (double SHA-256 of the serialized transaction)
    pub txid: Txid,

    /// Output index holding the joint funding, when one matches the
    /// combined contribution
    pub funding_vout: Option<u32>,
}

/// Result of one protocol step.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StepOutcome {
    /// Session state after the step
    pub state: SessionState,

    /// Messages to deliver to the peer
    pub messages: Vec<Messages>,

    /// Error terminating the session, if any
    pub error: Option<SessionError>,

    /// Constructed transaction, present from finalization on
    pub constructed_tx: Option<ConstructedTx>,
}

impl StepOutcome {
    fn ok(session: &InteractiveTxSession, messages: Vec<Messages>) -> Self {
        StepOutcome {
            state: session.state,
            messages,
            error: None,
            constructed_tx: session.constructed.clone(),
        }
    }
}

/// The two-party interactive construction session.
#[derive(Clone, Debug)]
pub struct InteractiveTxSession {
    config: SessionConfig,
    state: SessionState,
    inputs: BTreeMap<u64, SessionInput>,
    outputs: BTreeMap<u64, SessionOutput>,
    we_sent_complete: bool,
    peer_sent_complete: bool,
    round_count: u32,
    deadline: Instant,
    next_serial: u64,
    constructed: Option<ConstructedTx>,
    our_witnesses: Option<Vec<Vec<u8>>>,
    peer_witnesses: Option<Vec<Vec<u8>>>,
}

impl InteractiveTxSession {
    /// Starts a session as the initiator, emitting every contribution and
    /// the closing `tx_complete`.
    pub fn start(config: SessionConfig) -> (InteractiveTxSession, StepOutcome) {
        debug_assert!(config.we_are_initiator);
        let mut session = InteractiveTxSession::new(config);
        let messages = session.emit_contributions();
        session.state = SessionState::AwaitingPeerTurn;
        let outcome = StepOutcome::ok(&session, messages);
        (session, outcome)
    }

    /// Creates a session as the non-initiator; contributions are emitted
    /// once the peer finishes its turn.
    pub fn respond(config: SessionConfig) -> InteractiveTxSession {
        debug_assert!(!config.we_are_initiator);
        let mut session = InteractiveTxSession::new(config);
        session.state = SessionState::AwaitingOurTurn;
        session
    }

    fn new(config: SessionConfig) -> InteractiveTxSession {
        let deadline = Instant::now() + config.timeout;
        InteractiveTxSession {
            config,
            state: SessionState::Idle,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            we_sent_complete: false,
            peer_sent_complete: false,
            round_count: 0,
            deadline,
            next_serial: 0,
            constructed: None,
            our_witnesses: None,
            peer_witnesses: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channel the session belongs to.
    pub fn channel_id(&self) -> ChannelId {
        self.config.channel_id
    }

    /// The constructed transaction, once negotiation finalized.
    pub fn constructed_tx(&self) -> Option<&ConstructedTx> {
        self.constructed.as_ref()
    }

    /// Serial id parity bit of a session side: 0 for the initiator, 1 for
    /// the non-initiator.
    fn parity(&self, owner: Owner) -> u64 {
        match (owner, self.config.we_are_initiator) {
            (Owner::Local, true) | (Owner::Remote, false) => 0,
            (Owner::Local, false) | (Owner::Remote, true) => 1,
        }
    }

    fn allocate_serial(&mut self) -> u64 {
        let serial = self.next_serial << 1 | self.parity(Owner::Local);
        self.next_serial += 1;
        serial
    }

    fn emit_contributions(&mut self) -> Vec<Messages> {
        let mut messages = vec![];
        for input in self.config.our_inputs.clone() {
            let serial_id = self.allocate_serial();
            self.inputs.insert(serial_id, SessionInput {
                prevtx: input.prevtx.clone(),
                vout: input.vout,
                sequence: input.sequence,
                owner: Owner::Local,
            });
            messages.push(Messages::TxAddInput(TxAddInput {
                channel_id: self.config.channel_id,
                serial_id,
                prevtx: input.prevtx,
                prevtx_vout: input.vout,
                sequence: input.sequence,
            }));
        }
        for output in self.config.our_outputs.clone() {
            let serial_id = self.allocate_serial();
            self.outputs.insert(serial_id, SessionOutput {
                sats: output.sats,
                script: output.script.clone(),
                owner: Owner::Local,
            });
            messages.push(Messages::TxAddOutput(TxAddOutput {
                channel_id: self.config.channel_id,
                serial_id,
                sats: output.sats,
                script: output.script,
            }));
        }
        self.we_sent_complete = true;
        messages.push(Messages::TxComplete(TxComplete {
            channel_id: self.config.channel_id,
        }));
        messages
    }

    /// Terminates the session from our side, emitting `tx_abort` with the
    /// error text as reason.
    fn abort(&mut self, error: SessionError, state: SessionState) -> StepOutcome {
        warn!(
            "interactive-tx session {} aborted: {}",
            self.config.channel_id, error
        );
        self.state = state;
        StepOutcome {
            state: self.state,
            messages: vec![Messages::TxAbort(TxAbort {
                channel_id: self.config.channel_id,
                data: error.to_string().into_bytes(),
            })],
            error: Some(error),
            constructed_tx: None,
        }
    }

    /// Processes one incoming protocol message.
    pub fn handle_message(&mut self, message: &Messages) -> StepOutcome {
        if self.state.is_terminal() {
            return StepOutcome {
                state: self.state,
                messages: vec![],
                error: Some(SessionError::UnexpectedMessage),
                constructed_tx: self.constructed.clone(),
            };
        }
        if Instant::now() >= self.deadline {
            return self.abort(SessionError::Timeout, SessionState::Failed);
        }

        match message {
            Messages::TxAddInput(msg) => self.on_add_input(msg),
            Messages::TxAddOutput(msg) => self.on_add_output(msg),
            Messages::TxRemoveInput(msg) => self.on_remove_input(msg),
            Messages::TxRemoveOutput(msg) => self.on_remove_output(msg),
            Messages::TxComplete(msg) => self.on_complete(msg),
            Messages::TxAbort(msg) => {
                self.state = SessionState::Aborted;
                StepOutcome {
                    state: self.state,
                    messages: vec![],
                    error: Some(SessionError::PeerAbort(msg.message())),
                    constructed_tx: None,
                }
            }
            _ => self.abort(
                SessionError::UnexpectedMessage,
                SessionState::Aborted,
            ),
        }
    }

    fn check_channel(&self, channel_id: ChannelId) -> Result<(), SessionError> {
        if channel_id != self.config.channel_id {
            return Err(SessionError::ChannelMismatch);
        }
        Ok(())
    }

    fn check_peer_serial(&self, serial_id: u64) -> Result<(), SessionError> {
        if serial_id & 1 != self.parity(Owner::Remote) {
            return Err(SessionError::WrongSerialParity(serial_id));
        }
        if self.inputs.contains_key(&serial_id)
            || self.outputs.contains_key(&serial_id)
        {
            return Err(SessionError::DuplicateSerialId(serial_id));
        }
        Ok(())
    }

    fn on_add_input(&mut self, msg: &TxAddInput) -> StepOutcome {
        if let Err(err) = self
            .check_channel(msg.channel_id)
            .and_then(|_| self.check_peer_serial(msg.serial_id))
        {
            return self.abort(err, SessionState::Aborted);
        }
        if self.inputs.len() + 1 > INTERACTIVE_TX_MAX_CONTRIBUTIONS {
            return self.abort(
                SessionError::TooManyInputs,
                SessionState::Aborted,
            );
        }
        self.inputs.insert(msg.serial_id, SessionInput {
            prevtx: msg.prevtx.clone(),
            vout: msg.prevtx_vout,
            sequence: msg.sequence,
            owner: Owner::Remote,
        });
        self.peer_sent_complete = false;
        StepOutcome::ok(self, vec![])
    }

    fn on_add_output(&mut self, msg: &TxAddOutput) -> StepOutcome {
        if let Err(err) = self
            .check_channel(msg.channel_id)
            .and_then(|_| self.check_peer_serial(msg.serial_id))
        {
            return self.abort(err, SessionState::Aborted);
        }
        if self.outputs.len() + 1 > INTERACTIVE_TX_MAX_CONTRIBUTIONS {
            return self.abort(
                SessionError::TooManyOutputs,
                SessionState::Aborted,
            );
        }
        self.outputs.insert(msg.serial_id, SessionOutput {
            sats: msg.sats,
            script: msg.script.clone(),
            owner: Owner::Remote,
        });
        self.peer_sent_complete = false;
        StepOutcome::ok(self, vec![])
    }

    fn on_remove_input(&mut self, msg: &TxRemoveInput) -> StepOutcome {
        if let Err(err) = self.check_channel(msg.channel_id) {
            return self.abort(err, SessionState::Aborted);
        }
        match self.inputs.get(&msg.serial_id) {
            Some(input) if input.owner == Owner::Remote => {
                self.inputs.remove(&msg.serial_id);
                self.peer_sent_complete = false;
                StepOutcome::ok(self, vec![])
            }
            _ => self.abort(
                SessionError::ForeignRemoval(msg.serial_id),
                SessionState::Aborted,
            ),
        }
    }

    fn on_remove_output(&mut self, msg: &TxRemoveOutput) -> StepOutcome {
        if let Err(err) = self.check_channel(msg.channel_id) {
            return self.abort(err, SessionState::Aborted);
        }
        match self.outputs.get(&msg.serial_id) {
            Some(output) if output.owner == Owner::Remote => {
                self.outputs.remove(&msg.serial_id);
                self.peer_sent_complete = false;
                StepOutcome::ok(self, vec![])
            }
            _ => self.abort(
                SessionError::ForeignRemoval(msg.serial_id),
                SessionState::Aborted,
            ),
        }
    }

    fn on_complete(&mut self, msg: &TxComplete) -> StepOutcome {
        if let Err(err) = self.check_channel(msg.channel_id) {
            return self.abort(err, SessionState::Aborted);
        }
        // a peer turn ends with tx_complete; bounded turn exchanges keep a
        // stalling peer from negotiating forever
        self.round_count += 1;
        if self.round_count > self.config.max_rounds {
            return self
                .abort(SessionError::TooManyRounds, SessionState::Failed);
        }
        self.peer_sent_complete = true;

        let mut messages = vec![];
        if !self.we_sent_complete {
            messages = self.emit_contributions();
        }

        if self.we_sent_complete && self.peer_sent_complete {
            match self.finalize() {
                Ok(constructed) => {
                    debug!(
                        "interactive-tx session {} finalized txid {}",
                        self.config.channel_id, constructed.txid
                    );
                    self.constructed = Some(constructed);
                    self.state = SessionState::Success;
                }
                Err(err) => {
                    return self.abort(err, SessionState::Failed);
                }
            }
        } else {
            self.state = SessionState::TxComplete;
        }
        StepOutcome::ok(self, messages)
    }

    /// Deterministic construction of the negotiated transaction: entries
    /// ordered by ascending serial id (unique by construction), canonical
    /// txid over the consensus serialization.
    fn finalize(&self) -> Result<ConstructedTx, SessionError> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(SessionError::EmptyTransaction);
        }

        let mut input_total = 0u64;
        let mut tx_inputs = Vec::with_capacity(self.inputs.len());
        for (serial_id, input) in &self.inputs {
            let prevtx: Transaction = consensus_deserialize(&input.prevtx)
                .map_err(|_| SessionError::InvalidPrevTx(*serial_id))?;
            let spent = prevtx
                .output
                .get(input.vout as usize)
                .ok_or(SessionError::InvalidPrevTxVout(*serial_id))?;
            input_total += spent.value;
            tx_inputs.push(TxIn {
                previous_output: OutPoint {
                    txid: prevtx.txid(),
                    vout: input.vout,
                },
                script_sig: Script::new(),
                sequence: Sequence(input.sequence),
                witness: Witness::default(),
            });
        }

        let mut output_total = 0u64;
        let tx_outputs: Vec<TxOut> = self
            .outputs
            .values()
            .map(|output| {
                output_total += output.sats;
                TxOut {
                    value: output.sats,
                    script_pubkey: output.script.clone(),
                }
            })
            .collect();

        if input_total < output_total {
            return Err(SessionError::InsufficientFunds {
                inputs: input_total,
                outputs: output_total,
            });
        }

        let funding_sats = self.config.our_contribution_sats
            + self.config.peer_contribution_sats;
        let funding_vout = tx_outputs
            .iter()
            .position(|output| output.value == funding_sats)
            .map(|vout| vout as u32);

        let tx = Transaction {
            version: 2,
            lock_time: PackedLockTime(self.config.locktime),
            input: tx_inputs,
            output: tx_outputs,
        };
        let txid = tx.txid();
        Ok(ConstructedTx {
            tx,
            txid,
            funding_vout,
        })
    }

    fn owned_input_count(&self, owner: Owner) -> usize {
        self.inputs
            .values()
            .filter(|input| input.owner == owner)
            .count()
    }

    /// Attaches our witnesses (one per contributed input, in ascending
    /// serial id order) and emits `tx_signatures`.
    pub fn create_signatures(
        &mut self,
        witnesses: Vec<Vec<u8>>,
    ) -> StepOutcome {
        let constructed = match &self.constructed {
            Some(constructed)
                if matches!(
                    self.state,
                    SessionState::Success | SessionState::AwaitingSignatures
                ) =>
            {
                constructed.clone()
            }
            _ => {
                return StepOutcome {
                    state: self.state,
                    messages: vec![],
                    error: Some(SessionError::UnexpectedMessage),
                    constructed_tx: self.constructed.clone(),
                }
            }
        };
        let expected = self.owned_input_count(Owner::Local);
        if witnesses.len() != expected {
            return self.abort(
                SessionError::WitnessCountMismatch {
                    expected,
                    provided: witnesses.len(),
                },
                SessionState::Failed,
            );
        }
        self.our_witnesses = Some(witnesses.clone());
        self.update_signature_state();
        StepOutcome::ok(self, vec![Messages::TxSignatures(TxSignatures {
            channel_id: self.config.channel_id,
            txid: constructed.txid,
            witnesses,
        })])
    }

    /// Processes the peer's `tx_signatures`.
    pub fn process_signatures(&mut self, msg: &TxSignatures) -> StepOutcome {
        let constructed = match &self.constructed {
            Some(constructed)
                if matches!(
                    self.state,
                    SessionState::Success | SessionState::AwaitingSignatures
                ) =>
            {
                constructed.clone()
            }
            _ => {
                return StepOutcome {
                    state: self.state,
                    messages: vec![],
                    error: Some(SessionError::UnexpectedMessage),
                    constructed_tx: self.constructed.clone(),
                }
            }
        };
        if let Err(err) = self.check_channel(msg.channel_id) {
            return self.abort(err, SessionState::Aborted);
        }
        if msg.txid != constructed.txid {
            return self.abort(SessionError::TxidMismatch, SessionState::Aborted);
        }
        let expected = self.owned_input_count(Owner::Remote);
        if msg.witnesses.len() != expected {
            return self.abort(
                SessionError::WitnessCountMismatch {
                    expected,
                    provided: msg.witnesses.len(),
                },
                SessionState::Aborted,
            );
        }
        self.peer_witnesses = Some(msg.witnesses.clone());
        self.update_signature_state();
        StepOutcome::ok(self, vec![])
    }

    fn update_signature_state(&mut self) {
        let both =
            self.our_witnesses.is_some() && self.peer_witnesses.is_some();
        self.state = if both {
            SessionState::Success
        } else {
            SessionState::AwaitingSignatures
        };
    }

    /// The fully signed transaction, once both witness sets arrived.
    pub fn signed_transaction(&self) -> Option<Transaction> {
        let constructed = self.constructed.as_ref()?;
        let ours = self.our_witnesses.as_ref()?;
        let theirs = self.peer_witnesses.as_ref()?;

        let mut tx = constructed.tx.clone();
        let mut ours = ours.iter();
        let mut theirs = theirs.iter();
        for (tx_input, input) in tx.input.iter_mut().zip(self.inputs.values())
        {
            let witness = match input.owner {
                Owner::Local => ours.next()?,
                Owner::Remote => theirs.next()?,
            };
            tx_input.witness = Witness::from_vec(vec![witness.clone()]);
        }
        Some(tx)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::consensus::encode::serialize;

    use super::*;

    fn coin(value: u64) -> Vec<u8> {
        let tx = Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_inner([0x01; 32]),
                    vout: 0,
                },
                script_sig: Script::new(),
                sequence: Sequence(0xFFFF_FFFF),
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value,
                script_pubkey: Script::new_v0_p2wpkh(
                    &bitcoin::WPubkeyHash::from_inner([0x02; 20]),
                ),
            }],
        };
        serialize(&tx)
    }

    fn funding_script() -> Script {
        Script::new_v0_p2wsh(&bitcoin::WScriptHash::from_inner([0x03; 32]))
    }

    fn initiator_config() -> SessionConfig {
        let mut config = SessionConfig::with(ChannelId::default(), true);
        config.our_contribution_sats = 120_000;
        config.peer_contribution_sats = 80_000;
        config.our_inputs = vec![FundingInput {
            prevtx: coin(300_000),
            vout: 0,
            sequence: 0xFFFF_FFFD,
        }];
        config.our_outputs = vec![
            FundingOutput {
                sats: 200_000,
                script: funding_script(),
            },
            FundingOutput {
                sats: 99_000,
                script: Script::new_v0_p2wpkh(
                    &bitcoin::WPubkeyHash::from_inner([0x04; 20]),
                ),
            },
        ];
        config
    }

    fn responder_config() -> SessionConfig {
        let mut config = SessionConfig::with(ChannelId::default(), false);
        config.our_contribution_sats = 80_000;
        config.peer_contribution_sats = 120_000;
        config.our_inputs = vec![FundingInput {
            prevtx: coin(100_000),
            vout: 0,
            sequence: 0xFFFF_FFFD,
        }];
        config
    }

    fn drive(
        from: &mut Vec<Messages>,
        to: &mut InteractiveTxSession,
    ) -> Vec<Messages> {
        let mut replies = vec![];
        for message in from.drain(..) {
            let outcome = to.handle_message(&message);
            assert_eq!(outcome.error, None, "unexpected abort");
            replies.extend(outcome.messages);
        }
        replies
    }

    #[test]
    fn happy_path_two_parties() {
        let (mut alice, started) =
            InteractiveTxSession::start(initiator_config());
        let mut bob = InteractiveTxSession::respond(responder_config());

        // initiator sent: add_input, 2 × add_output, complete; all its
        // serial ids carry parity 0
        assert_eq!(started.messages.len(), 4);
        for message in &started.messages {
            if let Messages::TxAddInput(msg) = message {
                assert_eq!(msg.serial_id & 1, 0);
            }
        }

        let mut to_bob = started.messages;
        let mut to_alice = drive(&mut to_bob, &mut bob);
        let leftover = drive(&mut to_alice, &mut alice);
        assert!(leftover.is_empty());

        assert_eq!(alice.state(), SessionState::Success);
        assert_eq!(bob.state(), SessionState::Success);

        let alice_tx = alice.constructed_tx().unwrap().clone();
        let bob_tx = bob.constructed_tx().unwrap();
        assert_eq!(alice_tx.txid, bob_tx.txid);
        assert_eq!(alice_tx.tx.input.len(), 2);
        assert!(alice_tx.tx.output.len() >= 1);
        // funding output carries the joint contribution
        let funding_vout = alice_tx.funding_vout.unwrap();
        assert_eq!(
            alice_tx.tx.output[funding_vout as usize].value,
            200_000
        );
        // outputs never exceed inputs
        let in_total = 300_000 + 100_000u64;
        let out_total: u64 =
            alice_tx.tx.output.iter().map(|o| o.value).sum();
        assert!(out_total <= in_total);

        // witnesses flow both ways and complete the transaction
        let sigs = alice.create_signatures(vec![vec![0xAA; 72]]);
        assert_eq!(alice.state(), SessionState::AwaitingSignatures);
        let mut msgs = sigs.messages;
        assert_eq!(msgs.len(), 1);
        if let Messages::TxSignatures(msg) = &msgs[0] {
            let outcome = bob.process_signatures(msg);
            assert_eq!(outcome.error, None);
        } else {
            panic!("expected tx_signatures");
        }
        let bob_sigs = bob.create_signatures(vec![vec![0xBB; 72]]);
        assert_eq!(bob.state(), SessionState::Success);
        msgs = bob_sigs.messages;
        if let Messages::TxSignatures(msg) = &msgs[0] {
            let outcome = alice.process_signatures(msg);
            assert_eq!(outcome.error, None);
        } else {
            panic!("expected tx_signatures");
        }
        assert_eq!(alice.state(), SessionState::Success);
        assert!(alice.signed_transaction().is_some());
        assert!(bob.signed_transaction().is_some());
    }

    #[test]
    fn single_hop_happy_path_scenario() {
        // initiator proposes one input and the funding output; peer adds
        // nothing and both complete
        let mut config = initiator_config();
        config.our_outputs = vec![FundingOutput {
            sats: 200_000,
            script: funding_script(),
        }];
        let (mut alice, started) = InteractiveTxSession::start(config);

        let mut responder = responder_config();
        responder.our_inputs = vec![];
        let mut bob = InteractiveTxSession::respond(responder);

        let mut to_bob = started.messages;
        let mut to_alice = drive(&mut to_bob, &mut bob);
        drive(&mut to_alice, &mut alice);

        assert_eq!(alice.state(), SessionState::Success);
        assert_eq!(bob.state(), SessionState::Success);
        let constructed = bob.constructed_tx().unwrap();
        assert_eq!(constructed.tx.input.len(), 1);
        assert!(constructed.tx.output.len() >= 1);
        assert!(constructed
            .tx
            .output
            .iter()
            .any(|output| output.value == 200_000));
    }

    #[test]
    fn too_many_inputs_refused() {
        let (mut alice, _) = InteractiveTxSession::start(initiator_config());
        let mut outcome = None;
        for i in 0..=INTERACTIVE_TX_MAX_CONTRIBUTIONS as u64 {
            let step =
                alice.handle_message(&Messages::TxAddInput(TxAddInput {
                    channel_id: ChannelId::default(),
                    serial_id: i << 1 | 1,
                    prevtx: coin(10_000),
                    prevtx_vout: 0,
                    sequence: 0,
                }));
            if step.error.is_some() {
                outcome = Some(step);
                break;
            }
        }
        let outcome = outcome.expect("limit must trigger");
        assert_eq!(outcome.state, SessionState::Aborted);
        assert_eq!(outcome.error, Some(SessionError::TooManyInputs));
        match &outcome.messages[0] {
            Messages::TxAbort(abort) => {
                assert_eq!(abort.message(), "Too many inputs")
            }
            _ => panic!("expected tx_abort"),
        }
    }

    #[test]
    fn wrong_parity_refused() {
        let (mut alice, _) = InteractiveTxSession::start(initiator_config());
        let outcome =
            alice.handle_message(&Messages::TxAddInput(TxAddInput {
                channel_id: ChannelId::default(),
                serial_id: 4, // parity 0 belongs to the initiator (us)
                prevtx: coin(10_000),
                prevtx_vout: 0,
                sequence: 0,
            }));
        assert_eq!(outcome.state, SessionState::Aborted);
        assert_eq!(outcome.error, Some(SessionError::WrongSerialParity(4)));
    }

    #[test]
    fn removing_our_entry_refused() {
        let (mut alice, started) =
            InteractiveTxSession::start(initiator_config());
        let our_output_serial = started
            .messages
            .iter()
            .find_map(|message| match message {
                Messages::TxAddOutput(msg) => Some(msg.serial_id),
                _ => None,
            })
            .unwrap();
        let outcome =
            alice.handle_message(&Messages::TxRemoveOutput(TxRemoveOutput {
                channel_id: ChannelId::default(),
                serial_id: our_output_serial,
            }));
        assert_eq!(outcome.state, SessionState::Aborted);
        assert_eq!(
            outcome.error,
            Some(SessionError::ForeignRemoval(our_output_serial))
        );
    }

    #[test]
    fn round_limit_fails_session() {
        let mut config = initiator_config();
        config.max_rounds = 0;
        let (mut alice, _) = InteractiveTxSession::start(config);
        let outcome = alice.handle_message(&Messages::TxComplete(
            TxComplete {
                channel_id: ChannelId::default(),
            },
        ));
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.error, Some(SessionError::TooManyRounds));
    }

    #[test]
    fn timeout_fails_session() {
        let mut config = initiator_config();
        config.timeout = Duration::from_secs(0);
        let (mut alice, _) = InteractiveTxSession::start(config);
        let outcome = alice.handle_message(&Messages::TxComplete(
            TxComplete {
                channel_id: ChannelId::default(),
            },
        ));
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.error, Some(SessionError::Timeout));
    }

    #[test]
    fn peer_abort_ends_session() {
        let (mut alice, _) = InteractiveTxSession::start(initiator_config());
        let outcome = alice.handle_message(&Messages::TxAbort(TxAbort {
            channel_id: ChannelId::default(),
            data: b"changed my mind".to_vec(),
        }));
        assert_eq!(outcome.state, SessionState::Aborted);
        assert_eq!(
            outcome.error,
            Some(SessionError::PeerAbort(s!("changed my mind")))
        );
    }
}
