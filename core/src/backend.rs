//! The embedding system's side of the contract: identity, signing,
//! broadcast, and validator-set lookup. The core treats all of these as
//! synchronous from its own perspective — any I/O they perform on other
//! threads is the embedder's concern (see §5 of the design notes) — but it
//! never holds a lock across a call into the `Backend`.

use thiserror::Error;

use crate::block::ConsensusValue;
use crate::types::{Height, ValidatorAddress};
use crate::validator_set::ValidatorSet;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Operations the round state machine requires from its embedder.
///
/// `B` is the block/value type carried by proposals (see
/// [`crate::block::ConsensusValue`]).
pub trait Backend<B: ConsensusValue> {
    /// Identity of the local validator, or `None` if this node is an
    /// observer that never proposes or votes.
    fn address(&self) -> Option<ValidatorAddress>;

    /// Sign the given pre-image (see [`crate::codec::sign_bytes`]).
    fn sign(&self, bytes: &[u8]) -> Result<crate::types::Signature, BackendError>;

    /// Disseminate a fully-signed envelope to every validator in `validators`.
    fn broadcast(
        &self,
        validators: &ValidatorSet,
        envelope: &crate::types::Envelope,
    ) -> Result<(), BackendError>;

    /// Snapshot of the validator set authorized to vote at `height`.
    fn validators(&self, height: Height) -> ValidatorSet;
}
