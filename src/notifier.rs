// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pub/sub fan-out for blocks, events, and pruned blocks (§4.4).
//!
//! Each subscriber gets its own unbounded queue fed by the broker: a slow subscriber grows its
//! own buffer and can never stall the broker or the worker that publishes into it. This trades
//! memory for that guarantee, which is the contract §4.4 asks for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::block::BlockHeader;
use crate::hash::Hash;
use crate::identity::RuntimeId;

pub type SubscriptionId = u64;

/// A single non-replaying pub/sub broker for one message type.
pub struct Broker<T> {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Broker<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Publishes `message` to every current subscriber. Subscribers whose receiver has been
    /// dropped are pruned on the spot -- that's what "unsubscription releases buffers" means.
    pub fn publish(&self, message: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, sender| sender.send(message.clone()).is_ok());
    }

    pub fn subscribe(&self) -> (SubscriptionId, UnboundedReceiverStream<T>) {
        let mut subscribers = self.subscribers.lock();
        self.insert_locked(&mut subscribers)
    }

    /// Subscribes, but first calls `seed` (synchronously, while still holding the subscriber
    /// lock) to produce a replay message that is queued before any message published after this
    /// call returns. This is how `watch_blocks` guarantees the new subscriber's first message is
    /// the latest block, with no race against a concurrent append+publish.
    pub fn subscribe_with_replay(
        &self,
        seed: impl FnOnce() -> T,
    ) -> (SubscriptionId, UnboundedReceiverStream<T>) {
        let mut subscribers = self.subscribers.lock();
        let replay = seed();
        let (id, stream) = self.insert_locked(&mut subscribers);
        // The sender was just inserted under the same lock, so this can't fail.
        subscribers
            .get(&id)
            .expect("just inserted")
            .send(replay)
            .ok();
        (id, stream)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }

    fn insert_locked(
        &self,
        subscribers: &mut HashMap<SubscriptionId, mpsc::UnboundedSender<T>>,
    ) -> (SubscriptionId, UnboundedReceiverStream<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.insert(id, sender);
        (id, UnboundedReceiverStream::new(receiver))
    }
}

/// Events observable on a runtime's event stream. `RoundFailed`/`Normal`/`EpochTransition` are
/// observed via the block stream instead; this is reserved for signals that aren't themselves a
/// block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeEvent {
    DiscrepancyDetected {
        io_root: Hash,
        block_header: BlockHeader,
    },
}

/// A pruning notification. Pruning itself happens outside this crate (§1); this is only the
/// payload re-broadcast on `watch_pruned_blocks`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrunedBlock {
    pub runtime_id: RuntimeId,
    pub round: u64,
}
