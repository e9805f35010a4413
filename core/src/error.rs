//! The three error regimes from the design notes:
//!
//! 1. Ignorable (guard-rejected) transitions — not an error type at all;
//!    see the `tracing::debug!` calls at each guard in [`crate::engine`].
//! 2. Recoverable side-effect failures — [`SendError`], logged at `error`
//!    and dropped; no state rollback.
//! 3. Fatal invariant violations — [`FatalError`], which aborts the
//!    process via [`fatal`] rather than attempting to recover.

use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;

/// A failed outbound send (encode, sign, or broadcast). The decision that
/// produced the vote or proposal has already been recorded in `RoundState`;
/// losing the broadcast is safe because a higher layer's retry or the
/// peer's re-request covers eventual delivery.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A violated safety invariant: a programming error, not a network
/// condition. Recovering from these would risk signing something unsafe,
/// so the process aborts instead.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("enterCommit invoked without a majority precommit for round {round:?}")]
    CommitWithoutMajority { round: crate::types::Round },
    #[error("enterPrevoteWait invoked without a 2/3-any prevote tally at round {round:?}")]
    PrevoteWaitWithoutQuorum { round: crate::types::Round },
    #[error("enterPrecommitWait invoked without a 2/3-any precommit tally at round {round:?}")]
    PrecommitWaitWithoutQuorum { round: crate::types::Round },
    #[error("finalizeCommit invoked at height {got:?}, expected {expected:?}")]
    FinalizeWrongHeight {
        expected: crate::types::Height,
        got: crate::types::Height,
    },
    #[error("finalizeCommit invoked outside of the Commit step (step = {step:?})")]
    FinalizeWrongStep { step: crate::types::RoundStep },
}

/// Log the violation at `error` level and abort the process. There is no
/// return value because there is no safe way to continue past a violated
/// consensus invariant.
#[track_caller]
pub fn fatal(err: FatalError) -> ! {
    tracing::error!(error = %err, "fatal consensus invariant violation");
    panic!("{err}");
}
