// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Trait boundary to the external committee scheduler (§6). Consumed, never implemented, by
//! this crate outside of tests.

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::committee::Committee;

/// A subscription handle. Dropping it unsubscribes; the coordinator never needs to call
/// anything on it explicitly, but keeps it alive for as long as the stream is read.
pub trait SubscriptionHandle: Send + Sync {}

/// Watches the scheduler for newly installed committees across all runtimes.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    type Subscription: SubscriptionHandle;
    type Stream: Stream<Item = Committee> + Send + Unpin;

    /// Subscribes to the committee stream. The stream closes when the scheduler shuts down.
    async fn watch_committees(&self) -> (Self::Stream, Self::Subscription);
}
