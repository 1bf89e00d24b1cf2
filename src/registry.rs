// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Trait boundary to the external node/runtime registry (§6).

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::committee::RuntimeNodeMetadata;
use crate::identity::RuntimeId;

/// A registry-tracked runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub id: RuntimeId,
    compute: bool,
}

impl RuntimeDescriptor {
    pub fn new(id: RuntimeId, compute: bool) -> Self {
        Self { id, compute }
    }

    pub fn is_compute(&self) -> bool {
        self.compute
    }
}

pub trait SubscriptionHandle: Send + Sync {}

/// The node/runtime registry, consumed for runtime-registration events and per-epoch node
/// metadata lookups during epoch transitions (§4.2).
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    type Subscription: SubscriptionHandle;
    type Stream: Stream<Item = RuntimeDescriptor> + Send + Unpin;

    /// Subscribes to runtime registration events.
    async fn watch_runtimes(&self) -> (Self::Stream, Self::Subscription);

    /// Returns the current node set, used to build a computation group from a committee.
    async fn get_nodes(&self) -> anyhow::Result<Vec<RuntimeNodeMetadata>>;

    /// Re-fetches a single runtime's record, to pick up parameter changes on epoch transition.
    /// A failure here is fatal to the owning worker (§4.2, §5).
    async fn get_runtime(&self, id: RuntimeId) -> anyhow::Result<RuntimeDescriptor>;
}
