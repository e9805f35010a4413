use serde::{Deserialize, Serialize};

/// Block height under consensus. Monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Height(pub u64);

impl Height {
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }
}

/// Attempt number within a height. Signed so that `-1` can mean "no valid
/// round known" wherever the round machinery needs that sentinel
/// (`Proposal::pol_round`, `RoundState::locked_round`/`valid_round`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(pub i64);

impl Round {
    pub const NIL: Round = Round(-1);

    pub fn is_nil(self) -> bool {
        self.0 < 0
    }

    pub fn succ(self) -> Round {
        Round(self.0 + 1)
    }
}

/// The `(height, round)` a piece of consensus state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub height: Height,
    pub round: Round,
}

/// Phase within a round. Declaration order is the total order the guard
/// predicates in the dispatch table (`step >= X`) compare against — do not
/// reorder these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundStep {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

/// SHA-256 block hash. The nil sentinel is the all-zero hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const NIL: BlockHash = BlockHash([0u8; 32]);

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 20-byte validator identity, derived by the embedder from its public key.
/// Opaque to the core beyond equality/ordering/hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorAddress(pub [u8; 20]);

impl std::fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Opaque 65-byte signature. The core never inspects the bytes; it only
/// asks the `Backend` to produce and later forwards them verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub [u8; 65]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..4]))
    }
}

/// Vote kind. `Commit` never appears on the wire in live consensus messages
/// — it exists in this enum only so the committed-seal tag value and the
/// envelope `code` values share a single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoteKind {
    Propose = 1,
    Prevote = 2,
    Precommit = 3,
    Commit = 0,
}

/// A block proposal from the round's designated proposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal<B> {
    pub block: B,
    pub round: Round,
    /// The round whose prevote polka justifies this proposal, or `Round::NIL`.
    pub pol_round: Round,
}

/// A signed vote (prevote or precommit) cast by a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub vote_kind: VoteKind,
    pub height: Height,
    pub round: Round,
    /// `None` is the nil vote (no block, or timed out).
    pub block_hash: Option<BlockHash>,
    pub validator: ValidatorAddress,
}

/// A message envelope as it travels the wire. The signature covers
/// `payload || code || address` (see [`crate::codec::sign_bytes`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: VoteKind,
    pub payload: Vec<u8>,
    pub address: ValidatorAddress,
    pub signature: Signature,
}
