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

//! Per-output resolution bookkeeping: every tracked channel output walks
//! UNRESOLVED → RESOLVED → IRREVOCABLY_RESOLVED as its spend gains depth.

use std::collections::BTreeSet;

use amplify::Slice32;
use bitcoin::Txid;

/// Depth at which a resolution can never be reorganized away.
pub const IRREVOCABLE_DEPTH: u32 = 100;

/// Blocks available to answer a revoked commitment with a penalty
/// transaction.
pub const PENALTY_WINDOW_BLOCKS: u32 = 18;

/// Witness-only weight of a to_local penalty spend.
pub const TO_LOCAL_PENALTY_WITNESS_WEIGHT: u64 = 160;
/// Witness-only weight of an offered-HTLC penalty spend.
pub const OFFERED_HTLC_PENALTY_WITNESS_WEIGHT: u64 = 243;
/// Witness-only weight of a received-HTLC penalty spend.
pub const RECEIVED_HTLC_PENALTY_WITNESS_WEIGHT: u64 = 249;
/// Full input weight of a to_local penalty spend.
pub const TO_LOCAL_PENALTY_INPUT_WEIGHT: u64 = 324;
/// Full input weight of an offered-HTLC penalty spend.
pub const OFFERED_HTLC_PENALTY_INPUT_WEIGHT: u64 = 407;
/// Full input weight of a received-HTLC penalty spend.
pub const RECEIVED_HTLC_PENALTY_INPUT_WEIGHT: u64 = 413;

/// Lifecycle of one tracked output.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum ResolutionState {
    /// No confirmed spend observed
    #[display("UNRESOLVED")]
    Unresolved,

    /// A spend confirmed but may still be reorganized away
    #[display("RESOLVED")]
    Resolved,

    /// The spend is buried beyond any plausible reorg
    #[display("IRREVOCABLY_RESOLVED")]
    IrrevocablyResolved,
}

/// Actions the monitor may take or schedule for an output.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum OutputAction {
    /// Spend an expired HTLC through its timeout branch
    #[display("spend_with_timeout")]
    SpendWithTimeout,

    /// Spend an HTLC with a known preimage
    #[display("spend_with_preimage")]
    SpendWithPreimage,

    /// Sweep all outputs of a revoked commitment
    #[display("broadcast_penalty")]
    BroadcastPenalty,

    /// Claim a plain to-us output once its delay expires
    #[display("sweep")]
    Sweep,
}

/// Resolution record of one tracked output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutputResolution {
    /// Current lifecycle state
    pub state: ResolutionState,

    /// Transaction that spent the output
    pub resolving_txid: Option<Txid>,

    /// Block height the spend confirmed at
    pub spend_height: Option<u32>,

    /// Confirmation depth of the spend
    pub confirmation_depth: u32,

    /// Actions already performed
    pub actions_taken: BTreeSet<OutputAction>,

    /// Actions the embedder should perform next
    pub next_actions: BTreeSet<OutputAction>,

    /// Preimage pulled out of the resolving witness, if any
    pub extracted_preimage: Option<Slice32>,
}

impl Default for OutputResolution {
    fn default() -> Self {
        OutputResolution {
            state: ResolutionState::Unresolved,
            resolving_txid: None,
            spend_height: None,
            confirmation_depth: 0,
            actions_taken: BTreeSet::new(),
            next_actions: BTreeSet::new(),
            extracted_preimage: None,
        }
    }
}

impl OutputResolution {
    /// Records a confirmed spend of the output.
    pub fn observe_spend(&mut self, txid: Txid, height: u32) {
        if self.state == ResolutionState::Unresolved {
            self.resolving_txid = Some(txid);
            self.spend_height = Some(height);
            self.confirmation_depth = 1;
            self.state = ResolutionState::Resolved;
            self.next_actions.clear();
        }
    }

    /// Updates the confirmation depth at a new chain tip; transitions are
    /// monotone in depth.
    pub fn update_depth(&mut self, tip_height: u32) {
        if let Some(spend_height) = self.spend_height {
            if tip_height >= spend_height {
                self.confirmation_depth = tip_height - spend_height + 1;
            }
            if self.state == ResolutionState::Resolved
                && self.confirmation_depth >= IRREVOCABLE_DEPTH
            {
                self.state = ResolutionState::IrrevocablyResolved;
            }
        }
    }

    /// Schedules an action unless it was already taken.
    pub fn schedule(&mut self, action: OutputAction) -> bool {
        if self.actions_taken.contains(&action) {
            return false;
        }
        self.next_actions.insert(action)
    }

    /// Moves an action from scheduled to taken.
    pub fn mark_taken(&mut self, action: OutputAction) {
        self.next_actions.remove(&action);
        self.actions_taken.insert(action);
    }
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash;

    use super::*;

    #[test]
    fn resolution_lifecycle() {
        let mut resolution = OutputResolution::default();
        assert_eq!(resolution.state, ResolutionState::Unresolved);

        let txid = Txid::from_inner([0x01; 32]);
        resolution.observe_spend(txid, 800_000);
        assert_eq!(resolution.state, ResolutionState::Resolved);
        assert_eq!(resolution.confirmation_depth, 1);

        resolution.update_depth(800_098);
        assert_eq!(resolution.confirmation_depth, 99);
        assert_eq!(resolution.state, ResolutionState::Resolved);

        resolution.update_depth(800_099);
        assert_eq!(resolution.confirmation_depth, 100);
        assert_eq!(resolution.state, ResolutionState::IrrevocablyResolved);
    }

    #[test]
    fn second_spend_is_ignored() {
        let mut resolution = OutputResolution::default();
        resolution.observe_spend(Txid::from_inner([0x01; 32]), 100);
        resolution.observe_spend(Txid::from_inner([0x02; 32]), 200);
        assert_eq!(
            resolution.resolving_txid,
            Some(Txid::from_inner([0x01; 32]))
        );
        assert_eq!(resolution.spend_height, Some(100));
    }

    #[test]
    fn actions_do_not_repeat() {
        let mut resolution = OutputResolution::default();
        assert!(resolution.schedule(OutputAction::SpendWithTimeout));
        resolution.mark_taken(OutputAction::SpendWithTimeout);
        assert!(!resolution.schedule(OutputAction::SpendWithTimeout));
        assert!(resolution.next_actions.is_empty());
    }

    #[test]
    fn penalty_weights() {
        // input weights are their witness weights plus the 41-byte input
        // serialization at factor four
        assert_eq!(
            TO_LOCAL_PENALTY_INPUT_WEIGHT
                - TO_LOCAL_PENALTY_WITNESS_WEIGHT,
            164
        );
        assert_eq!(
            OFFERED_HTLC_PENALTY_INPUT_WEIGHT
                - OFFERED_HTLC_PENALTY_WITNESS_WEIGHT,
            164
        );
        assert_eq!(
            RECEIVED_HTLC_PENALTY_INPUT_WEIGHT
                - RECEIVED_HTLC_PENALTY_WITNESS_WEIGHT,
            164
        );
    }
}
