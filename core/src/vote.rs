//! Per-`(height, round, kind)` vote tally and majority predicates.
//!
//! Signature verification happens before a vote ever reaches `add_vote` —
//! the caller (the dispatcher, via the `Backend`) is responsible for
//! rejecting unsigned or badly-signed envelopes. This module only enforces
//! set-membership and one-vote-per-validator.

use std::collections::HashMap;

use crate::types::{BlockHash, Height, Round, ValidatorAddress, Vote, VoteKind};
use crate::validator_set::ValidatorSet;

/// Errors `VoteSet::add_vote` can return. None of these are fatal; the
/// caller logs and drops the vote.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddVoteError {
    #[error("validator {0} is not a member of this height's validator set")]
    UnknownValidator(ValidatorAddress),
    #[error("wrong vote kind: expected {expected:?}, got {got:?}")]
    WrongKind { expected: VoteKind, got: VoteKind },
    #[error("wrong view: expected (h={expected_h:?}, r={expected_r:?}), got (h={got_h:?}, r={got_r:?})")]
    WrongView {
        expected_h: Height,
        expected_r: Round,
        got_h: Height,
        got_r: Round,
    },
    #[error("double sign: validator {0} already voted for a different block this round")]
    DoubleSign(ValidatorAddress),
}

/// Tallies votes of one kind for a fixed `(height, round)`.
#[derive(Debug, Clone)]
pub struct VoteSet {
    kind: VoteKind,
    height: Height,
    round: Round,
    total_voting_power: u64,
    votes: HashMap<ValidatorAddress, Vote>,
}

impl VoteSet {
    pub fn new(kind: VoteKind, height: Height, round: Round, validators: &ValidatorSet) -> Self {
        Self {
            kind,
            height,
            round,
            total_voting_power: validators.total_voting_power(),
            votes: HashMap::new(),
        }
    }

    /// Add a vote. Returns `Ok(true)` if newly added, `Ok(false)` if it was
    /// an identical re-submission (idempotent no-op), `Err` for a rejected
    /// vote (wrong view/kind, unknown validator, or a double-sign).
    pub fn add_vote(
        &mut self,
        vote: Vote,
        validators: &ValidatorSet,
    ) -> Result<bool, AddVoteError> {
        if vote.vote_kind != self.kind {
            return Err(AddVoteError::WrongKind {
                expected: self.kind,
                got: vote.vote_kind,
            });
        }
        if vote.height != self.height || vote.round != self.round {
            return Err(AddVoteError::WrongView {
                expected_h: self.height,
                expected_r: self.round,
                got_h: vote.height,
                got_r: vote.round,
            });
        }
        if validators.get_by_address(&vote.validator).is_none() {
            return Err(AddVoteError::UnknownValidator(vote.validator));
        }

        match self.votes.get(&vote.validator) {
            None => {
                self.votes.insert(vote.validator, vote);
                Ok(true)
            }
            Some(existing) if existing.block_hash == vote.block_hash => Ok(false),
            Some(_) => Err(AddVoteError::DoubleSign(vote.validator)),
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    fn power_for<'a>(&self, validators: &'a ValidatorSet, addr: &ValidatorAddress) -> u64 {
        validators
            .get_by_address(addr)
            .map(|(_, v)| v.voting_power)
            .unwrap_or(0)
    }

    fn is_majority(&self, power: u64) -> bool {
        // strictly more than 2/3: power * 3 > total * 2
        power as u128 * 3 > self.total_voting_power as u128 * 2
    }

    /// Strictly more than 2/3 voting power for the same non-nil block hash.
    pub fn has_majority(&self, block_hash: &BlockHash, validators: &ValidatorSet) -> bool {
        let power: u64 = self
            .votes
            .values()
            .filter(|v| v.block_hash.as_ref() == Some(block_hash))
            .map(|v| self.power_for(validators, &v.validator))
            .sum();
        self.is_majority(power)
    }

    /// Strictly more than 2/3 voting power has voted for anything (hash or nil).
    pub fn has_two_thirds_any(&self, validators: &ValidatorSet) -> bool {
        let power: u64 = self
            .votes
            .keys()
            .map(|addr| self.power_for(validators, addr))
            .sum();
        self.is_majority(power)
    }

    /// If some block hash (possibly nil) has strictly more than 2/3 of the
    /// voting power, return it.
    pub fn two_thirds_majority(&self, validators: &ValidatorSet) -> Option<Option<BlockHash>> {
        let mut tally: HashMap<Option<BlockHash>, u64> = HashMap::new();
        for vote in self.votes.values() {
            let power = self.power_for(validators, &vote.validator);
            *tally.entry(vote.block_hash).or_insert(0) += power;
        }
        tally
            .into_iter()
            .find(|(_, power)| self.is_majority(*power))
            .map(|(hash, _)| hash)
    }
}
