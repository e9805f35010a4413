//! Canonical envelope encoding and the committed-seal construction.
//!
//! Interpreting application payloads is out of scope for this crate — the
//! core treats the `payload` field of an [`Envelope`] as opaque bytes it
//! was handed by [`crate::vote`]/[`crate::engine`] — but the exact byte
//! layout here is load-bearing: downstream verifiers (including other
//! validators) must reconstruct the same signature pre-image.

use thiserror::Error;

use crate::types::{BlockHash, Envelope, VoteKind};

/// The byte value of [`VoteKind::Commit`] reserved for the committed seal.
/// Kept in the same enum as the live vote kinds as a single source of
/// truth on tag values (see §6/§9).
pub const COMMIT_TAG: u8 = VoteKind::Commit as u8;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("envelope serialization failed: {0}")]
    Serialize(#[from] bincode::Error),
}

/// Encode an envelope for wire transmission.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(envelope)?)
}

/// Decode an envelope received over the wire.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a vote or proposal payload prior to signing and wrapping in an
/// [`Envelope`].
pub fn encode_payload<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(value)?)
}

/// The signature pre-image for an envelope: `payload || code || address`,
/// i.e. every envelope field except the signature itself.
pub fn sign_bytes(code: VoteKind, payload: &[u8], address: &crate::types::ValidatorAddress) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1 + 20);
    buf.extend_from_slice(payload);
    buf.push(code as u8);
    buf.extend_from_slice(&address.0);
    buf
}

/// The 33-byte committed seal: `block_hash || byte(CommitTag)`. This exact
/// concatenation must be preserved to retain compatibility with external
/// verifiers that check the seal against the finalized block.
pub fn committed_seal(hash: &BlockHash) -> [u8; 33] {
    let mut seal = [0u8; 33];
    seal[..32].copy_from_slice(&hash.0);
    seal[32] = COMMIT_TAG;
    seal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Signature, ValidatorAddress};

    #[test]
    fn committed_seal_is_33_bytes_with_commit_tag() {
        let hash = BlockHash([7u8; 32]);
        let seal = committed_seal(&hash);
        assert_eq!(seal.len(), 33);
        assert_eq!(&seal[..32], &hash.0);
        assert_eq!(seal[32], 0);
    }

    #[test]
    fn envelope_roundtrips_through_encode_decode() {
        let envelope = Envelope {
            code: VoteKind::Prevote,
            payload: vec![1, 2, 3, 4],
            address: ValidatorAddress([9u8; 20]),
            signature: Signature([0u8; 65]),
        };

        let bytes = encode_envelope(&envelope).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();

        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.address, envelope.address);
    }

    #[test]
    fn sign_bytes_is_stable_across_calls() {
        let address = ValidatorAddress([3u8; 20]);
        let a = sign_bytes(VoteKind::Precommit, b"hello", &address);
        let b = sign_bytes(VoteKind::Precommit, b"hello", &address);
        assert_eq!(a, b);
    }

    #[test]
    fn sign_bytes_differs_when_code_differs() {
        let address = ValidatorAddress([3u8; 20]);
        let prevote = sign_bytes(VoteKind::Prevote, b"hello", &address);
        let precommit = sign_bytes(VoteKind::Precommit, b"hello", &address);
        assert_ne!(prevote, precommit);
    }

    #[test]
    fn decode_invalid_bytes_errors() {
        let result = decode_envelope(&[0xff, 0x00, 0x01]);
        assert!(result.is_err());
    }
}
