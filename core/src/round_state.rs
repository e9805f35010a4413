//! The mutable consensus state at a single height. Owned exclusively by the
//! dispatcher in [`crate::engine`]; never mutated from anywhere else.

use std::collections::HashMap;

use crate::block::ConsensusValue;
use crate::types::{BlockHash, Height, Proposal, Round, RoundStep, View};
use crate::validator_set::ValidatorSet;
use crate::vote::VoteSet;

/// The proposal this node has seen for the current `(height, round)`,
/// together with the block it carries (so `finalizeCommit` can read the
/// committed block back out even when it arrived via a locked-block
/// substitution rather than the network — see §4.5 commit-time alignment).
#[derive(Debug, Clone)]
pub struct ReceivedProposal<B> {
    pub block: B,
    pub round: Round,
    pub pol_round: Round,
}

/// The central entity: everything the round state machine needs to decide
/// its next transition. Created at round 0 of a height, reset in place on
/// every height advance (see [`crate::engine::Engine::update_state_for_new_height`]).
pub struct RoundState<B: ConsensusValue> {
    pub view: View,
    pub step: RoundStep,

    /// The locally assembled candidate block for this height, installed by
    /// the (external) block producer. Read only when this node is proposer
    /// and has no `valid_block` to re-propose.
    pub block: Option<B>,

    /// The round/block this validator is locked on. Invariant:
    /// `locked_block.is_some() == !locked_round.is_nil()`.
    pub locked_round: Round,
    pub locked_block: Option<B>,

    /// The last round with a 2/3 prevote polka for a non-nil block, and
    /// that block. Invariant: `valid_block.is_some() == !valid_round.is_nil()`.
    pub valid_round: Round,
    pub valid_block: Option<B>,

    /// The proposal received this `(height, round)`, if any.
    pub proposal_received: Option<ReceivedProposal<B>>,

    pub prevotes: HashMap<i64, VoteSet>,
    pub precommits: HashMap<i64, VoteSet>,

    /// Ensures `enter_precommit_wait` schedules its timer at most once per
    /// round; reset on every `enter_new_round`.
    pub precommit_waited: bool,

    /// `-1` except during the `Commit` step of the current height.
    pub commit_round: Round,
    pub commit_time: Option<chrono::DateTime<chrono::Utc>>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl<B: ConsensusValue> RoundState<B> {
    pub fn new(height: Height, start_time: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            view: View {
                height,
                round: Round(0),
            },
            step: RoundStep::NewHeight,
            block: None,
            locked_round: Round::NIL,
            locked_block: None,
            valid_round: Round::NIL,
            valid_block: None,
            proposal_received: None,
            prevotes: HashMap::new(),
            precommits: HashMap::new(),
            precommit_waited: false,
            commit_round: Round::NIL,
            commit_time: None,
            start_time,
        }
    }

    pub fn height(&self) -> Height {
        self.view.height
    }

    pub fn round(&self) -> Round {
        self.view.round
    }

    /// Lazily create and return the prevote tally for `round`.
    pub fn prevotes_for(&mut self, round: Round, validators: &ValidatorSet) -> &mut VoteSet {
        self.prevotes.entry(round.0).or_insert_with(|| {
            VoteSet::new(crate::types::VoteKind::Prevote, self.view.height, round, validators)
        })
    }

    /// Lazily create and return the precommit tally for `round`.
    ///
    /// Named distinctly from a same-signature-looking read of the prevote
    /// map on purpose: an earlier revision of this lookup read from
    /// `self.prevotes` by copy-paste mistake, which silently made
    /// precommit-quorum checks operate on prevote data. Keep these two
    /// accessors reading their own maps.
    pub fn precommits_for(&mut self, round: Round, validators: &ValidatorSet) -> &mut VoteSet {
        self.precommits.entry(round.0).or_insert_with(|| {
            VoteSet::new(crate::types::VoteKind::Precommit, self.view.height, round, validators)
        })
    }

    pub fn get_precommits_by_round(&self, round: Round) -> Option<&VoteSet> {
        self.precommits.get(&round.0)
    }

    pub fn get_prevotes_by_round(&self, round: Round) -> Option<&VoteSet> {
        self.prevotes.get(&round.0)
    }

    /// True when `proposal_received` exists and either carries no PoL round
    /// or the prevote set at its PoL round already has a majority for the
    /// proposed block.
    pub fn is_proposal_complete(&self, validators: &ValidatorSet) -> bool {
        let Some(proposal) = &self.proposal_received else {
            return false;
        };
        if proposal.pol_round.is_nil() {
            return true;
        }
        let Some(prevotes) = self.get_prevotes_by_round(proposal.pol_round) else {
            return false;
        };
        prevotes.has_majority(&proposal.block.hash(), validators)
    }

    pub fn set_proposal(&mut self, proposal: &Proposal<B>) {
        self.proposal_received = Some(ReceivedProposal {
            block: proposal.block.clone(),
            round: proposal.round,
            pol_round: proposal.pol_round,
        });
    }

    /// Unlock: clears `locked_round`/`locked_block` back to the nil sentinel.
    pub fn unlock(&mut self) {
        self.locked_round = Round::NIL;
        self.locked_block = None;
    }

    pub fn proposal_hash(&self) -> Option<BlockHash> {
        self.proposal_received.as_ref().map(|p| p.block.hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn new_round_state_is_unlocked_and_invalid() {
        let rs: RoundState<Block> = RoundState::new(Height(1), now());
        assert_eq!(rs.locked_round, Round::NIL);
        assert!(rs.locked_block.is_none());
        assert_eq!(rs.valid_round, Round::NIL);
        assert!(rs.valid_block.is_none());
        assert_eq!(rs.commit_round, Round::NIL);
        assert_eq!(rs.step, RoundStep::NewHeight);
    }

    #[test]
    fn unlock_clears_both_fields() {
        let mut rs: RoundState<Block> = RoundState::new(Height(1), now());
        rs.locked_round = Round(2);
        rs.locked_block = Some(crate::block::Block {
            header: crate::block::BlockHeader {
                height: Height(1),
                timestamp: 0,
                parent_hash: BlockHash::NIL,
                proposer: crate::types::ValidatorAddress([0; 20]),
            },
            payload: vec![],
        });

        rs.unlock();
        assert_eq!(rs.locked_round, Round::NIL);
        assert!(rs.locked_block.is_none());
    }

    #[test]
    fn is_proposal_complete_without_proposal_is_false() {
        let rs: RoundState<Block> = RoundState::new(Height(1), now());
        let validators = ValidatorSet::new(vec![]);
        assert!(!rs.is_proposal_complete(&validators));
    }
}
