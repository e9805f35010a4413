//! The block/value type the round state machine carries.
//!
//! Block assembly, transaction selection, and semantic validation are the
//! embedder's responsibility (see the crate-level docs). This module only
//! defines the shape the core needs: something hashable and cloneable that
//! can be carried inside a [`crate::types::Proposal`] and compared for
//! equality against a locked or valid value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::BlockHash;

/// Anything the round state machine can propose, lock onto, and commit.
///
/// Embedders implement this for their real block type; [`Block`] below is
/// a minimal concrete implementation used by the demonstration binary and
/// by this crate's own tests. The `Serialize`/`DeserializeOwned` bounds are
/// here rather than bolted on at each call site because every proposal
/// carrying a `B` gets bincode-encoded for the wire (see `engine::send_propose`).
pub trait ConsensusValue:
    Clone + std::fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn hash(&self) -> BlockHash;
}

/// Minimal opaque block carried by the core: a header the embedder already
/// committed to (parent hash, proposer, timestamp) plus an opaque payload
/// whose contents the core never interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: crate::types::Height,
    pub timestamp: u64,
    pub parent_hash: BlockHash,
    pub proposer: crate::types::ValidatorAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Opaque application payload (e.g. an encoded transaction batch).
    /// The core never looks inside this.
    pub payload: Vec<u8>,
}

impl ConsensusValue for Block {
    fn hash(&self) -> BlockHash {
        let encoded =
            bincode::serialize(self).expect("block serialization is infallible for owned data");
        let digest = Sha256::digest(&encoded);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        BlockHash(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Height, ValidatorAddress};

    fn sample(payload: Vec<u8>) -> Block {
        Block {
            header: BlockHeader {
                height: Height(1),
                timestamp: 1_700_000_000,
                parent_hash: BlockHash::NIL,
                proposer: ValidatorAddress([0u8; 20]),
            },
            payload,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let b = sample(vec![1, 2, 3]);
        assert_eq!(b.hash(), b.hash());
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = sample(vec![1]);
        let b = sample(vec![2]);
        assert_ne!(a.hash(), b.hash());
    }
}
