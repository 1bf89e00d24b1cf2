// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared scheduler/registry test doubles, used by both the worker and coordinator unit tests.

#![cfg(test)]

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::committee::{Committee, CommitteeKind, CommitteeMember, Role, RuntimeNodeMetadata};
use crate::identity::{NodePublicKey, RuntimeId};
use crate::registry::{Registry, RuntimeDescriptor, SubscriptionHandle as RegistrySubscriptionHandle};
use crate::scheduler::{Scheduler, SubscriptionHandle as SchedulerSubscriptionHandle};

pub(crate) struct NoopSubscription;
impl SchedulerSubscriptionHandle for NoopSubscription {}
impl RegistrySubscriptionHandle for NoopSubscription {}

/// A scheduler whose committee stream is fed by the test, with a single subscriber.
pub(crate) struct TestScheduler {
    committees: AsyncMutex<Option<mpsc::UnboundedReceiver<Committee>>>,
}

impl TestScheduler {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Committee>) -> Self {
        Self {
            committees: AsyncMutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl Scheduler for TestScheduler {
    type Subscription = NoopSubscription;
    type Stream = UnboundedReceiverStream<Committee>;

    async fn watch_committees(&self) -> (Self::Stream, Self::Subscription) {
        let rx = self
            .committees
            .lock()
            .await
            .take()
            .expect("single subscriber in tests");
        (UnboundedReceiverStream::new(rx), NoopSubscription)
    }
}

/// A registry with a fixed node set and an externally-fed runtime-registration stream.
pub(crate) struct TestRegistry {
    nodes: Vec<RuntimeNodeMetadata>,
    runtimes: AsyncMutex<Option<mpsc::UnboundedReceiver<RuntimeDescriptor>>>,
}

impl TestRegistry {
    pub(crate) fn new(nodes: Vec<RuntimeNodeMetadata>, runtimes_rx: mpsc::UnboundedReceiver<RuntimeDescriptor>) -> Self {
        Self {
            nodes,
            runtimes: AsyncMutex::new(Some(runtimes_rx)),
        }
    }
}

#[async_trait]
impl Registry for TestRegistry {
    type Subscription = NoopSubscription;
    type Stream = UnboundedReceiverStream<RuntimeDescriptor>;

    async fn watch_runtimes(&self) -> (Self::Stream, Self::Subscription) {
        let rx = self
            .runtimes
            .lock()
            .await
            .take()
            .expect("single subscriber in tests");
        (UnboundedReceiverStream::new(rx), NoopSubscription)
    }

    async fn get_nodes(&self) -> anyhow::Result<Vec<RuntimeNodeMetadata>> {
        Ok(self.nodes.clone())
    }

    async fn get_runtime(&self, id: RuntimeId) -> anyhow::Result<RuntimeDescriptor> {
        Ok(RuntimeDescriptor::new(id, true))
    }
}

pub(crate) fn node(byte: u8) -> NodePublicKey {
    NodePublicKey::from_bytes([byte; 32])
}

pub(crate) fn runtime(byte: u8) -> RuntimeId {
    RuntimeId::from_bytes([byte; 32])
}

pub(crate) fn committee(runtime_id: RuntimeId, valid_for: u64) -> Committee {
    Committee {
        runtime_id,
        kind: CommitteeKind::Compute,
        members: vec![
            CommitteeMember { public_key: node(1), role: Role::Worker },
            CommitteeMember { public_key: node(2), role: Role::Worker },
            CommitteeMember { public_key: node(3), role: Role::Worker },
            CommitteeMember { public_key: node(10), role: Role::BackupWorker },
            CommitteeMember { public_key: node(11), role: Role::BackupWorker },
        ],
        valid_for,
        threshold: 2,
    }
}

pub(crate) fn all_committee_nodes() -> Vec<RuntimeNodeMetadata> {
    [1u8, 2, 3, 10, 11]
        .into_iter()
        .map(|b| RuntimeNodeMetadata { node_public_key: node(b) })
        .collect()
}
