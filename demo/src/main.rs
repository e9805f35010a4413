//! In-process multi-validator simulation of [`bft_core`].
//!
//! Wires up one [`Engine`] per simulated validator, connected through an
//! in-memory `Backend` that signs with real ed25519 keys and fans
//! broadcasts out to every registered validator's inbound channel. Block
//! production is stubbed out to a trivial deterministic payload per
//! height — assembling real candidate blocks is out of scope for the core
//! crate (see its crate docs) and is the embedder's job in a real node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clap::Parser;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use bft_core::block::ConsensusValue;
use bft_core::codec::sign_bytes;
use bft_core::{
    Backend, BackendError, Block, BlockHeader, BlockFinalized, Config, ConsensusEvent, Engine,
    Envelope, Height, Proposal, Signature, Validator, ValidatorAddress, ValidatorSet, Vote,
    VoteKind,
};

#[derive(Parser)]
#[command(name = "bft-demo", version, about = "Drive bft-core through a few committed heights")]
struct Args {
    /// Number of simulated validators.
    #[arg(long, default_value_t = 4)]
    validators: usize,

    /// Number of heights to finalize before exiting.
    #[arg(long, default_value_t = 3)]
    heights: u64,
}

fn address_from_key(key: &VerifyingKey) -> ValidatorAddress {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    ValidatorAddress(out)
}

fn trivial_block(height: Height, proposer: ValidatorAddress) -> Block {
    Block {
        header: BlockHeader {
            height,
            timestamp: height.0 * 1000,
            parent_hash: bft_core::BlockHash::NIL,
            proposer,
        },
        payload: height.0.to_le_bytes().to_vec(),
    }
}

type InboundTx = mpsc::UnboundedSender<ConsensusEvent<Block>>;

/// Routes signed envelopes between simulated validators. Stands in for the
/// peer network + signature verification a real embedder's networking
/// layer would perform before handing the core a [`ConsensusEvent`].
struct InMemoryBackend {
    address: ValidatorAddress,
    signing_key: SigningKey,
    validators: ValidatorSet,
    hub: Arc<Mutex<HashMap<ValidatorAddress, (InboundTx, VerifyingKey)>>>,
}

impl Backend<Block> for InMemoryBackend {
    fn address(&self) -> Option<ValidatorAddress> {
        Some(self.address)
    }

    fn sign(&self, bytes: &[u8]) -> Result<Signature, BackendError> {
        let sig = self.signing_key.sign(bytes);
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        Ok(Signature(out))
    }

    fn broadcast(&self, validators: &ValidatorSet, envelope: &Envelope) -> Result<(), BackendError> {
        let pre_image = sign_bytes(envelope.code, &envelope.payload, &envelope.address);
        let hub = self.hub.lock().expect("hub lock poisoned");

        for i in 0..validators.len() {
            let Some(target) = validators.get_by_index(i) else {
                continue;
            };
            let Some((tx, verifying_key)) = hub.get(&target.address) else {
                continue;
            };

            let sig_bytes: [u8; 64] = match envelope.signature.0[..64].try_into() {
                Ok(b) => b,
                Err(_) => continue,
            };
            let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            if verifying_key.verify(&pre_image, &signature).is_err() {
                tracing::warn!(address = %envelope.address, "dropping envelope with invalid signature");
                continue;
            }

            let event = match envelope.code {
                VoteKind::Propose => {
                    let proposal: Proposal<Block> = match bincode::deserialize(&envelope.payload) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable proposal");
                            continue;
                        }
                    };
                    ConsensusEvent::Proposal { proposal, proposer: envelope.address }
                }
                VoteKind::Prevote | VoteKind::Precommit => {
                    let vote: Vote = match bincode::deserialize(&envelope.payload) {
                        Ok(v) => v,
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable vote");
                            continue;
                        }
                    };
                    ConsensusEvent::Vote(vote)
                }
                VoteKind::Commit => continue,
            };

            let _ = tx.send(event);
        }
        Ok(())
    }

    fn validators(&self, _height: Height) -> ValidatorSet {
        self.validators.clone()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut rng = rand::rngs::OsRng;

    let keys: Vec<SigningKey> = (0..args.validators).map(|_| SigningKey::generate(&mut rng)).collect();
    let addresses: Vec<ValidatorAddress> = keys.iter().map(|k| address_from_key(&k.verifying_key())).collect();
    let validator_set = ValidatorSet::new(
        addresses
            .iter()
            .map(|&address| Validator { address, voting_power: 1 })
            .collect(),
    );
    let genesis_proposer = validator_set.get_proposer().expect("non-empty validator set").address;

    let hub: Arc<Mutex<HashMap<ValidatorAddress, (InboundTx, VerifyingKey)>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let mut finalized_rx_node0 = None;

    for i in 0..args.validators {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.lock().unwrap().insert(addresses[i], (tx.clone(), keys[i].verifying_key()));

        let backend = InMemoryBackend {
            address: addresses[i],
            signing_key: keys[i].clone(),
            validators: validator_set.clone(),
            hub: Arc::clone(&hub),
        };
        let engine = Engine::new(backend, Config::default(), Height(1), genesis_proposer);

        let mut producer_rx = engine.subscribe_finalized();
        if i == 0 {
            finalized_rx_node0 = Some(engine.subscribe_finalized());
        }

        // Feed round-zero's candidate block now; later heights are fed by
        // the per-node producer task below, triggered off this node's own
        // finalization events.
        let _ = tx.send(ConsensusEvent::NewBlock(trivial_block(Height(1), addresses[i])));

        tokio::spawn(engine.run(rx));

        let producer_tx = tx.clone();
        let producer_address = addresses[i];
        tokio::spawn(async move {
            while let Ok(finalized) = producer_rx.recv().await {
                let next = finalized.height.next();
                let _ = producer_tx.send(ConsensusEvent::NewBlock(trivial_block(next, producer_address)));
            }
        });
    }

    let mut finalized_rx = finalized_rx_node0.expect("at least one validator");
    let mut seen = 0u64;
    while seen < args.heights {
        match finalized_rx.recv().await {
            Ok(BlockFinalized { height, block }) => {
                seen += 1;
                println!(
                    "height {} finalized: hash={} payload={}",
                    height.0,
                    block.hash(),
                    hex::encode(&block.payload)
                );
            }
            Err(err) => {
                tracing::error!(%err, "finalized stream closed early");
                break;
            }
        }
    }
}
