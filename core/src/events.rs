//! The three producers the dispatcher multiplexes into one ordered event
//! stream — local block assembly, inbound peer messages, and timer fires —
//! plus the `BlockFinalized` event the engine posts on commit.

use crate::block::ConsensusValue;
use crate::types::{Proposal, ValidatorAddress, Vote};

/// An event arriving at the dispatcher via the peer/local-block half of the
/// multiplexed stream (see §5). Timer fires are the other half; they travel
/// on [`crate::timer::TimerService`]'s own channel and are merged with this
/// one only at the `select!` in [`crate::engine::Engine::run`], since the
/// engine is what owns the dispatch priority between the two producers.
///
/// Signature verification of inbound proposals/votes happens before
/// construction of this type — the core never re-verifies, only trusts the
/// caller did (see §4.3/§7).
pub enum ConsensusEvent<B: ConsensusValue> {
    /// The external block producer has assembled a candidate for this
    /// height (`SetBlockForProposal`).
    NewBlock(B),
    /// An already-verified proposal from a peer.
    Proposal {
        proposal: Proposal<B>,
        proposer: ValidatorAddress,
    },
    /// An already-verified vote from a peer.
    Vote(Vote),
}

/// Posted once a block reaches finalization.
#[derive(Debug, Clone)]
pub struct BlockFinalized<B: ConsensusValue> {
    pub height: crate::types::Height,
    pub block: B,
}
