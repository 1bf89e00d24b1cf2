// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the coordinator, its rounds, and its public API.

use thiserror::Error;

use crate::hash::Hash;

/// Errors returned by [`crate::round::Round::add_commitment`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("node {0:?} is not a member of the computation group")]
    NotAMember(crate::identity::NodePublicKey),
    #[error("node {0:?} has role {1:?}, which does not match the round's current phase")]
    RoleMismatch(crate::identity::NodePublicKey, crate::committee::Role),
    #[error("commitment signature failed verification")]
    InvalidSignature,
    #[error("commitment targets base round {found}, expected {expected}")]
    WrongRound { expected: u64, found: u64 },
}

/// Outcome of [`crate::round::Round::try_finalize`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    #[error("round is still waiting for enough agreeing commitments")]
    StillWaiting,
    #[error("discrepancy detected among primary commitments")]
    DiscrepancyDetected(Hash),
}

/// Errors returned by [`crate::round::Round::force_backup_transition`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("round is already in the discrepancy phase")]
pub struct AlreadyInDiscrepancyError;

/// Errors surfaced by the coordinator's public commit RPC.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("no such runtime: {0:?}")]
    NoSuchRuntime(crate::identity::RuntimeId),
    #[error("no round is currently in progress for this runtime")]
    NoRoundInProgress,
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
    #[error("could not decode the opaque commitment: {0}")]
    InvalidCommitment(String),
    #[error("caller's wait for the commit reply was canceled")]
    Canceled,
    #[error("runtime worker has shut down")]
    WorkerGone,
}

/// Structural errors surfaced by block/runtime lookups. A registered runtime's chain always has
/// at least a genesis block, so there is no "runtime has no blocks" case here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no such runtime: {0:?}")]
    NoSuchRuntime(crate::identity::RuntimeId),
    #[error("no block at round {0}")]
    NotFound(u64),
}

/// Returned by [`crate::coordinator::Coordinator::register_runtime`] for a runtime that is
/// already tracked. Not a failure: callers are expected to ignore it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("runtime is already registered")]
pub struct RuntimeExists;
