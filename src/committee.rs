// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Committees, as supplied by the external scheduler, and computation groups, which enrich
//! committee members with runtime-specific node metadata fetched from the registry.

use std::collections::BTreeMap;

use crate::identity::{Epoch, NodePublicKey, RuntimeId};

/// Only `Compute` committees are consumed by this crate; other kinds are ignored by the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitteeKind {
    Compute,
    Storage,
}

/// A member's role within a compute committee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Worker,
    BackupWorker,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeMember {
    pub public_key: NodePublicKey,
    pub role: Role,
}

/// A scheduled committee for one runtime, valid for one epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    pub runtime_id: RuntimeId,
    pub kind: CommitteeKind,
    pub members: Vec<CommitteeMember>,
    pub valid_for: Epoch,
    /// Number of agreeing commitments from workers of the active role required to finalize.
    pub threshold: usize,
}

impl Committee {
    /// Identity used for deduplicating committee-installation events: two committees with the
    /// same `(runtime_id, valid_for)` are considered the same committee.
    pub fn identity(&self) -> (RuntimeId, Epoch) {
        (self.runtime_id, self.valid_for)
    }

    pub fn workers(&self) -> impl Iterator<Item = &CommitteeMember> {
        self.members.iter().filter(|m| m.role == Role::Worker)
    }

    pub fn backup_workers(&self) -> impl Iterator<Item = &CommitteeMember> {
        self.members
            .iter()
            .filter(|m| m.role == Role::BackupWorker)
    }
}

/// Per-member metadata fetched from the registry at committee-installation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeNodeMetadata {
    pub node_public_key: NodePublicKey,
}

/// `node_pk -> { committee_role, runtime_metadata }`, built by joining a [`Committee`]'s members
/// with registry node metadata.
#[derive(Clone, Debug, Default)]
pub struct ComputationGroup {
    members: BTreeMap<NodePublicKey, (Role, RuntimeNodeMetadata)>,
}

impl ComputationGroup {
    pub fn build(committee: &Committee, nodes: &[RuntimeNodeMetadata]) -> Self {
        let mut members = BTreeMap::new();
        for member in &committee.members {
            if let Some(node) = nodes
                .iter()
                .find(|n| n.node_public_key == member.public_key)
            {
                members.insert(member.public_key, (member.role, node.clone()));
            }
        }
        Self { members }
    }

    pub fn role_of(&self, node: &NodePublicKey) -> Option<Role> {
        self.members.get(node).map(|(role, _)| *role)
    }

    pub fn contains(&self, node: &NodePublicKey) -> bool {
        self.members.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(byte: u8) -> NodePublicKey {
        NodePublicKey::from_bytes([byte; 32])
    }

    fn committee() -> Committee {
        Committee {
            runtime_id: RuntimeId::from_bytes([1; 32]),
            kind: CommitteeKind::Compute,
            members: vec![
                CommitteeMember {
                    public_key: node(1),
                    role: Role::Worker,
                },
                CommitteeMember {
                    public_key: node(2),
                    role: Role::BackupWorker,
                },
            ],
            valid_for: 1,
            threshold: 1,
        }
    }

    #[test]
    fn computation_group_joins_metadata_and_tracks_roles() {
        let c = committee();
        let nodes = vec![
            RuntimeNodeMetadata {
                node_public_key: node(1),
            },
            RuntimeNodeMetadata {
                node_public_key: node(2),
            },
        ];
        let group = ComputationGroup::build(&c, &nodes);
        assert_eq!(group.role_of(&node(1)), Some(Role::Worker));
        assert_eq!(group.role_of(&node(2)), Some(Role::BackupWorker));
        assert_eq!(group.role_of(&node(3)), None);
        assert!(!group.contains(&node(3)));
    }

    #[test]
    fn missing_registry_metadata_drops_member_from_group() {
        let c = committee();
        let group = ComputationGroup::build(&c, &[]);
        assert!(group.is_empty());
    }

    #[test]
    fn identity_pairs_runtime_and_epoch() {
        let c = committee();
        assert_eq!(c.identity(), (c.runtime_id, 1));
    }
}
