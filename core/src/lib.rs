//! A Tendermint-style BFT round state machine.
//!
//! This crate owns the round/step lattice, vote tallying, locking
//! discipline, and timeout scheduling for a single consensus instance. It
//! does not produce blocks, validate their contents, persist chain state,
//! or move bytes over a network — those are the embedder's job, reached
//! through the [`backend::Backend`] trait and the [`block::ConsensusValue`]
//! trait.
//!
//! Wire it up by constructing an [`engine::Engine`] with a [`backend::Backend`]
//! implementation and a starting height, then feed it a stream of
//! [`events::ConsensusEvent`] via [`engine::Engine::run`].

pub mod backend;
pub mod block;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod round_state;
pub mod timer;
pub mod types;
pub mod validator_set;
pub mod vote;

pub use backend::{Backend, BackendError};
pub use block::{Block, BlockHeader, ConsensusValue};
pub use config::Config;
pub use engine::{Engine, StateSnapshot};
pub use error::{FatalError, SendError};
pub use events::{BlockFinalized, ConsensusEvent};
pub use round_state::{ReceivedProposal, RoundState};
pub use timer::{TimeoutFire, TimeoutKey, TimerService};
pub use types::{
    BlockHash, Envelope, Height, Proposal, Round, RoundStep, Signature, ValidatorAddress, View,
    Vote, VoteKind,
};
pub use validator_set::{Validator, ValidatorSet};
pub use vote::{AddVoteError, VoteSet};
