// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Commitments: signed per-node endorsements of a proposed block for the current round.
//!
//! The wire format and the signature scheme are collaborator concerns (§6); this crate treats a
//! commitment as opaque bytes until [`Commitment::from_opaque`] hands back a typed value with
//! exactly the fields the round state machine needs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::identity::NodePublicKey;

/// A decoded commitment. Equality on `io_root`/`state_root` is what discrepancy detection
/// operates on; the signature is assumed verified by construction (either checked during
/// `from_opaque`, or -- in tests -- via [`Commitment::new_unchecked`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub node_public_key: NodePublicKey,
    /// Base round this commitment targets: the finalized block will have `round = base_round + 1`.
    pub base_round: u64,
    pub io_root: Hash,
    pub state_root: Hash,
}

impl Commitment {
    /// Builds a commitment directly, bypassing signature verification. Reserved for tests and
    /// for callers that have already verified the signature via the external codec.
    pub fn new_unchecked(
        node_public_key: NodePublicKey,
        base_round: u64,
        io_root: Hash,
        state_root: Hash,
    ) -> Self {
        Self {
            node_public_key,
            base_round,
            io_root,
            state_root,
        }
    }

    /// Decodes a commitment from its opaque wire form. In this crate the decode step is purely
    /// structural; authenticity of the signature embedded in the wire format is the codec
    /// collaborator's responsibility per §6.
    pub fn from_opaque(opaque: &Bytes) -> Result<Self, DecodeError> {
        decode(opaque).ok_or(DecodeError::Malformed)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("opaque commitment bytes could not be parsed")]
    Malformed,
}

/// Default in-process codec used by tests and by deployments that have no separate wire format.
/// A real deployment swaps this module out for the platform's commitment wire codec (§6); the
/// core never depends on the encoding beyond `from_opaque`.
fn decode(bytes: &Bytes) -> Option<Commitment> {
    serde_json::from_slice(bytes).ok()
}

impl Commitment {
    pub fn to_opaque(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("commitment serialization is infallible"))
    }
}
