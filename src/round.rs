// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The round state machine (§4.1): one unit of progress per runtime, from a base block to the
//! next finalized (or failed) block.

use std::collections::BTreeMap;

use crate::block::Block;
use crate::commitment::Commitment;
use crate::committee::{Committee, ComputationGroup, Role};
use crate::error::{AlreadyInDiscrepancyError, CommitmentError, FinalizeError};
use crate::hash::Hash;
use crate::identity::NodePublicKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    WaitingCommitments,
    DiscrepancyWaitingCommitments,
}

/// One in-progress round. Transitions (epoch change, post-finalization succession, forced
/// discrepancy) replace the round wholesale rather than mutating it in place -- see §9.
pub struct Round {
    committee: Committee,
    computation_group: ComputationGroup,
    current_block: Block,
    commitments: BTreeMap<NodePublicKey, Commitment>,
    state: RoundState,
    did_timeout: bool,
    finalized: Option<Block>,
}

impl Round {
    pub fn new(committee: Committee, computation_group: ComputationGroup, current_block: Block) -> Self {
        Self {
            committee,
            computation_group,
            current_block,
            commitments: BTreeMap::new(),
            state: RoundState::WaitingCommitments,
            did_timeout: false,
            finalized: None,
        }
    }

    pub fn base_round(&self) -> u64 {
        self.current_block.header.round
    }

    pub fn target_round(&self) -> u64 {
        self.base_round() + 1
    }

    pub fn current_block(&self) -> &Block {
        &self.current_block
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn computation_group(&self) -> &ComputationGroup {
        &self.computation_group
    }

    /// True once `try_finalize`/`populate_finalized_block` has produced a block for this round.
    /// The worker uses this to detect a commit arriving for an already-finalized round (§4.2).
    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn mark_timeout(&mut self) {
        self.did_timeout = true;
    }

    pub fn did_timeout(&self) -> bool {
        self.did_timeout
    }

    fn active_role(&self) -> Role {
        match self.state {
            RoundState::WaitingCommitments => Role::Worker,
            RoundState::DiscrepancyWaitingCommitments => Role::BackupWorker,
        }
    }

    /// Validates `commitment` against the computation group and current phase, then stores it
    /// under its node's key, overwriting any prior commitment from the same node (§3, invariant
    /// i/ii, and the idempotence property in §8).
    pub fn add_commitment(&mut self, commitment: Commitment) -> Result<(), CommitmentError> {
        let role = self
            .computation_group
            .role_of(&commitment.node_public_key)
            .ok_or(CommitmentError::NotAMember(commitment.node_public_key))?;

        let expected_role = self.active_role();
        if role != expected_role {
            return Err(CommitmentError::RoleMismatch(commitment.node_public_key, role));
        }

        if commitment.base_round != self.base_round() {
            return Err(CommitmentError::WrongRound {
                expected: self.base_round(),
                found: commitment.base_round,
            });
        }

        self.commitments.insert(commitment.node_public_key, commitment);
        Ok(())
    }

    /// Attempts to finalize the round from the currently active phase's commitments. See the
    /// dispatch table in §4.1/§4.2 for how the worker reacts to each variant.
    pub fn try_finalize(&mut self, now: u64) -> Result<Block, FinalizeError> {
        let expected_role = self.active_role();
        let active: Vec<&Commitment> = self
            .commitments
            .values()
            .filter(|c| self.computation_group.role_of(&c.node_public_key) == Some(expected_role))
            .collect();

        if active.is_empty() {
            return Err(FinalizeError::StillWaiting);
        }

        // Group commitments by agreed content, preserving first-seen (BTreeMap key) order so
        // that "the io_root of the first primary commitment" is deterministic.
        let mut groups: Vec<(Hash, Hash, usize)> = Vec::new();
        for c in &active {
            if let Some(group) = groups
                .iter_mut()
                .find(|(io, state, _)| *io == c.io_root && *state == c.state_root)
            {
                group.2 += 1;
            } else {
                groups.push((c.io_root, c.state_root, 1));
            }
        }

        if let Some((io_root, state_root, _)) = groups
            .iter()
            .find(|(_, _, count)| *count >= self.committee.threshold)
        {
            let block = Block::new_normal(&self.current_block, now, *io_root, *state_root);
            self.finalized = Some(block.clone());
            return Ok(block);
        }

        if groups.len() > 1 {
            return match self.state {
                RoundState::WaitingCommitments => Err(FinalizeError::DiscrepancyDetected(groups[0].0)),
                // Disagreement among backups doesn't escalate further; there's nowhere left to go.
                RoundState::DiscrepancyWaitingCommitments => Err(FinalizeError::StillWaiting),
            };
        }

        Err(FinalizeError::StillWaiting)
    }

    /// Escalates to the backup committee. Called by the worker on a primary-phase timeout.
    /// Errors if the round has already escalated once -- there's no second escalation tier.
    pub fn force_backup_transition(&mut self) -> Result<(), AlreadyInDiscrepancyError> {
        match self.state {
            RoundState::WaitingCommitments => {
                self.state = RoundState::DiscrepancyWaitingCommitments;
                Ok(())
            }
            RoundState::DiscrepancyWaitingCommitments => Err(AlreadyInDiscrepancyError),
        }
    }

    /// Marks the round as having produced `block` without going through `try_finalize` --
    /// used for epoch-transition and round-failed blocks (§4.1).
    pub fn populate_finalized_block(&mut self, block: Block) {
        self.finalized = Some(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HeaderType;
    use crate::committee::{CommitteeKind, CommitteeMember, RuntimeNodeMetadata};
    use crate::identity::RuntimeId;

    fn node(byte: u8) -> NodePublicKey {
        NodePublicKey::from_bytes([byte; 32])
    }

    fn committee(threshold: usize) -> Committee {
        Committee {
            runtime_id: RuntimeId::from_bytes([9; 32]),
            kind: CommitteeKind::Compute,
            members: vec![
                CommitteeMember {
                    public_key: node(1),
                    role: Role::Worker,
                },
                CommitteeMember {
                    public_key: node(2),
                    role: Role::Worker,
                },
                CommitteeMember {
                    public_key: node(3),
                    role: Role::Worker,
                },
                CommitteeMember {
                    public_key: node(10),
                    role: Role::BackupWorker,
                },
                CommitteeMember {
                    public_key: node(11),
                    role: Role::BackupWorker,
                },
            ],
            valid_for: 1,
            threshold,
        }
    }

    fn round(threshold: usize) -> Round {
        let committee = committee(threshold);
        let nodes: Vec<RuntimeNodeMetadata> = committee
            .members
            .iter()
            .map(|m| RuntimeNodeMetadata {
                node_public_key: m.public_key,
            })
            .collect();
        let group = ComputationGroup::build(&committee, &nodes);
        Round::new(committee, group, Block::genesis(0))
    }

    fn commit(node_pk: NodePublicKey, base_round: u64, root_seed: u8) -> Commitment {
        Commitment::new_unchecked(
            node_pk,
            base_round,
            Hash::from_bytes([root_seed; 32]),
            Hash::from_bytes([root_seed; 32]),
        )
    }

    #[test]
    fn rejects_commitment_from_non_member() {
        let mut r = round(2);
        let err = r.add_commitment(commit(node(99), 0, 1)).unwrap_err();
        assert_eq!(err, CommitmentError::NotAMember(node(99)));
    }

    #[test]
    fn rejects_backup_commitment_in_primary_phase() {
        let mut r = round(2);
        let err = r.add_commitment(commit(node(10), 0, 1)).unwrap_err();
        assert_eq!(err, CommitmentError::RoleMismatch(node(10), Role::BackupWorker));
    }

    #[test]
    fn rejects_commitment_targeting_wrong_base_round() {
        let mut r = round(2);
        let err = r.add_commitment(commit(node(1), 5, 1)).unwrap_err();
        assert_eq!(
            err,
            CommitmentError::WrongRound {
                expected: 0,
                found: 5
            }
        );
    }

    #[test]
    fn same_node_commit_twice_overwrites_not_duplicates() {
        let mut r = round(2);
        r.add_commitment(commit(node(1), 0, 1)).unwrap();
        r.add_commitment(commit(node(1), 0, 2)).unwrap();
        assert_eq!(r.commitments.len(), 1);
        assert_eq!(r.commitments[&node(1)].io_root, Hash::from_bytes([2; 32]));
    }

    #[test]
    fn still_waiting_below_threshold() {
        let mut r = round(2);
        r.add_commitment(commit(node(1), 0, 1)).unwrap();
        assert_eq!(r.try_finalize(100), Err(FinalizeError::StillWaiting));
    }

    #[test]
    fn finalizes_once_threshold_of_agreeing_commitments_reached() {
        let mut r = round(2);
        r.add_commitment(commit(node(1), 0, 7)).unwrap();
        r.add_commitment(commit(node(2), 0, 7)).unwrap();
        let block = r.try_finalize(100).unwrap();
        assert_eq!(block.header.round, 1);
        assert_eq!(block.header.header_type, HeaderType::Normal);
        assert_eq!(block.header.io_root, Hash::from_bytes([7; 32]));
        assert!(r.is_finalized());
    }

    #[test]
    fn disagreement_in_primary_phase_is_discrepancy() {
        let mut r = round(2);
        r.add_commitment(commit(node(1), 0, 1)).unwrap();
        r.add_commitment(commit(node(2), 0, 2)).unwrap();
        let err = r.try_finalize(100).unwrap_err();
        assert_eq!(err, FinalizeError::DiscrepancyDetected(Hash::from_bytes([1; 32])));
    }

    #[test]
    fn disagreement_in_backup_phase_is_still_waiting_not_a_second_discrepancy() {
        let mut r = round(2);
        r.add_commitment(commit(node(1), 0, 1)).unwrap();
        r.add_commitment(commit(node(2), 0, 2)).unwrap();
        assert!(r.try_finalize(100).is_err());
        r.force_backup_transition().unwrap();
        r.add_commitment(commit(node(10), 0, 3)).unwrap();
        r.add_commitment(commit(node(11), 0, 4)).unwrap();
        assert_eq!(r.try_finalize(100), Err(FinalizeError::StillWaiting));
    }

    #[test]
    fn backup_phase_finalizes_on_threshold() {
        let mut r = round(2);
        r.force_backup_transition().unwrap();
        r.add_commitment(commit(node(10), 0, 9)).unwrap();
        r.add_commitment(commit(node(11), 0, 9)).unwrap();
        let block = r.try_finalize(100).unwrap();
        assert_eq!(block.header.io_root, Hash::from_bytes([9; 32]));
    }

    #[test]
    fn late_primary_commit_rejected_after_forced_backup_transition() {
        let mut r = round(2);
        r.force_backup_transition().unwrap();
        let err = r.add_commitment(commit(node(1), 0, 1)).unwrap_err();
        assert_eq!(err, CommitmentError::RoleMismatch(node(1), Role::Worker));
    }

    #[test]
    fn force_backup_transition_twice_errors() {
        let mut r = round(2);
        r.force_backup_transition().unwrap();
        assert_eq!(r.force_backup_transition(), Err(AlreadyInDiscrepancyError));
    }

    #[test]
    fn populate_finalized_block_marks_round_done() {
        let mut r = round(2);
        assert!(!r.is_finalized());
        let block = Block::new_empty(&r.current_block.clone(), 5, HeaderType::EpochTransition);
        r.populate_finalized_block(block);
        assert!(r.is_finalized());
    }
}
