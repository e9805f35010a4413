//! Validator-set lookups the core consumes. Derivation of the set itself
//! (from stake, from a registry contract, ...) is the embedder's job; this
//! module only defines the shape the round state machine reads.

use serde::{Deserialize, Serialize};

use crate::types::{Round, ValidatorAddress};

/// A single validator's identity and voting power within a height's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: ValidatorAddress,
    pub voting_power: u64,
}

/// The committee backing every 2/3 threshold at a given height.
///
/// `calc_proposer` implements the default deterministic rotation this crate
/// ships — every correct validator computes the same proposer for a given
/// `(prev_proposer, round)` pair as long as they agree on the ordered
/// validator list. Embedders with weighted proposer-priority algorithms
/// (e.g. cumulative-voting-power rotation) should treat this as a reference
/// implementation and substitute their own if the simple modulo rotation
/// does not match their weighting requirements (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by_key(|v| v.address);
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    pub fn get_by_address(&self, address: &ValidatorAddress) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| &v.address == address)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn get_proposer(&self) -> Option<&Validator> {
        self.validators.first()
    }

    pub fn is_proposer(&self, address: &ValidatorAddress, prev_proposer: &ValidatorAddress, round: Round) -> bool {
        self.calc_proposer(prev_proposer, round)
            .is_some_and(|p| &p.address == address)
    }

    /// Deterministic proposer for `round`, rotating from `prev_proposer`.
    ///
    /// `round` must be non-negative; the round-zero case simply returns
    /// `prev_proposer` itself (the rotation anchor for the height).
    pub fn calc_proposer(&self, prev_proposer: &ValidatorAddress, round: Round) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }
        let anchor = self
            .get_by_address(prev_proposer)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let offset = round.0.rem_euclid(self.validators.len() as i64) as usize;
        let index = (anchor + offset) % self.validators.len();
        self.validators.get(index)
    }
}
