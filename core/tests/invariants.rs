//! Property-based checks of the universal invariants from the distilled
//! spec's testable-properties section, run over randomly interleaved vote
//! deliveries. Unlike the scenario drivers in `scenarios.rs`, these don't
//! script a specific outcome — they fuzz the sequence of inbound votes and
//! assert the structural invariants never break, however the votes land.

use std::sync::{Arc, Mutex};

use bft_core::block::ConsensusValue;
use bft_core::{
    Backend, BackendError, Block, BlockHeader, BlockHash, Config, ConsensusEvent, Engine, Envelope,
    Height, Round, RoundStep, Signature, Validator, ValidatorAddress, ValidatorSet, Vote, VoteKind,
};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

fn addr(n: u8) -> ValidatorAddress {
    let mut a = [0u8; 20];
    a[19] = n;
    ValidatorAddress(a)
}

fn four_validators() -> (Vec<ValidatorAddress>, ValidatorSet) {
    let addrs: Vec<ValidatorAddress> = (0..4).map(addr).collect();
    let set = ValidatorSet::new(
        addrs
            .iter()
            .map(|&address| Validator { address, voting_power: 1 })
            .collect(),
    );
    (addrs, set)
}

struct RecordingBackend {
    address: Option<ValidatorAddress>,
    validators: ValidatorSet,
    sent: Arc<Mutex<Vec<Envelope>>>,
}

impl Backend<Block> for RecordingBackend {
    fn address(&self) -> Option<ValidatorAddress> {
        self.address
    }
    fn sign(&self, _bytes: &[u8]) -> Result<Signature, BackendError> {
        Ok(Signature([0u8; 65]))
    }
    fn broadcast(&self, _validators: &ValidatorSet, envelope: &Envelope) -> Result<(), BackendError> {
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }
    fn validators(&self, _height: Height) -> ValidatorSet {
        self.validators.clone()
    }
}

/// Asserts the invariants that must hold at every observable point,
/// regardless of how votes have landed so far.
fn assert_universal_invariants<B: ConsensusValue>(state: &bft_core::RoundState<B>) {
    assert_eq!(
        state.locked_block.is_some(),
        !state.locked_round.is_nil(),
        "locked_block/locked_round nil-ness must agree"
    );
    assert_eq!(
        state.valid_block.is_some(),
        !state.valid_round.is_nil(),
        "valid_block/valid_round nil-ness must agree"
    );
    assert!(
        state.commit_round.is_nil() || state.step == RoundStep::Commit,
        "commit_round is set outside of the Commit step"
    );
}

/// One random event: which of the three non-local validators casts a
/// vote, which kind, and which of a small fixed set of hashes (or nil) it
/// votes for.
fn event_strategy() -> impl Strategy<Value = (usize, bool, u8)> {
    (0usize..3, any::<bool>(), 0u8..3)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn universal_invariants_hold_under_random_vote_interleavings(
        events in prop_vec(event_strategy(), 1..16)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (addrs, validators) = four_validators();
            let local = addrs[0];
            let sent = Arc::new(Mutex::new(Vec::new()));
            let backend = RecordingBackend { address: Some(local), validators: validators.clone(), sent };

            let mut engine = Engine::new(backend, Config::default(), Height(1), local);

            engine.handle_event(ConsensusEvent::NewBlock(Block {
                header: BlockHeader {
                    height: Height(1),
                    timestamp: 0,
                    parent_hash: BlockHash::NIL,
                    proposer: local,
                },
                payload: vec![1],
            }));
            engine.enter_new_round(Height(1), Round(0));
            assert_universal_invariants(engine.round_state());

            let known_hash = engine
                .round_state()
                .proposal_received
                .as_ref()
                .map(|p| p.block.hash());
            let other_hash = BlockHash([0x42; 32]);

            let current_round = engine.round_state().round();
            let current_height = engine.round_state().height();

            for (validator_idx, is_precommit, hash_choice) in events {
                // Stop feeding once the engine has moved past the height
                // this harness set up votes for; a fresh height has its
                // own fresh round state and the scripted votes no longer
                // apply to it.
                if engine.round_state().height() != current_height {
                    break;
                }
                let validator = addrs[validator_idx + 1];
                let hash = match hash_choice {
                    0 => None,
                    1 => known_hash,
                    _ => Some(other_hash),
                };
                let kind = if is_precommit { VoteKind::Precommit } else { VoteKind::Prevote };
                let vote = Vote {
                    vote_kind: kind,
                    height: current_height,
                    round: current_round,
                    block_hash: hash,
                    validator,
                };
                engine.handle_event(ConsensusEvent::Vote(vote));
                assert_universal_invariants(engine.round_state());
            }
        });
    }
}
