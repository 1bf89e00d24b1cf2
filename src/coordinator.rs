// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The coordinator: process-wide owner of the runtime table, the registry-registration loop,
//! and the public query/commit/subscribe API (§4.3).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use prometheus::Registry as PrometheusRegistry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::block::{Block, BlockChain};
use crate::clock::now_unix_secs;
use crate::config::Config;
use crate::error::{CommitError, QueryError, RuntimeExists};
use crate::identity::RuntimeId;
use crate::metrics::CoordinatorMetrics;
use crate::notifier::{Broker, PrunedBlock, RuntimeEvent};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::worker::{self, WorkerCommand, WorkerHandle};

const COMMAND_BUFFER: usize = 64;

struct RuntimeState {
    chain: Arc<BlockChain>,
    block_notifier: Arc<Broker<Block>>,
    event_notifier: Arc<Broker<RuntimeEvent>>,
    prune_notifier: Arc<Broker<PrunedBlock>>,
    worker: WorkerHandle,
}

/// Process-wide coordinator, generic over the external scheduler and registry collaborators.
pub struct Coordinator<S: Scheduler, R: Registry> {
    scheduler: Arc<S>,
    registry: Arc<R>,
    config: Config,
    runtimes: Mutex<HashMap<RuntimeId, RuntimeState>>,
    all_block_notifier: Arc<Broker<Block>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl<S: Scheduler, R: Registry> Coordinator<S, R> {
    /// Builds the coordinator and spawns its registry-registration loop, mirroring the
    /// teacher's `AuthorityNode::start` constructor-plus-background-task pattern.
    pub fn spawn(
        config: Config,
        scheduler: Arc<S>,
        registry: Arc<R>,
        metrics_registry: &PrometheusRegistry,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let coordinator = Arc::new(Self {
            scheduler,
            registry,
            config,
            runtimes: Mutex::new(HashMap::new()),
            all_block_notifier: Arc::new(Broker::new()),
            metrics: Arc::new(CoordinatorMetrics::new(metrics_registry)),
        });
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_registration_loop().await })
        };
        (coordinator, task)
    }

    async fn run_registration_loop(self: Arc<Self>) {
        let (mut runtimes, _subscription) = self.registry.watch_runtimes().await;
        while let Some(descriptor) = runtimes.next().await {
            if !descriptor.is_compute() {
                continue;
            }
            if self.register_runtime(descriptor.id).is_err() {
                debug!(runtime_id = ?descriptor.id, "runtime already registered, ignoring");
            }
        }
        debug!("registry runtime stream closed, registration loop exiting");
    }

    fn register_runtime(&self, id: RuntimeId) -> Result<(), RuntimeExists> {
        let mut runtimes = self.runtimes.lock();
        if runtimes.contains_key(&id) {
            return Err(RuntimeExists);
        }

        let genesis = self
            .config
            .genesis_blocks
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Block::genesis(now_unix_secs()));
        let chain = Arc::new(BlockChain::new(id, genesis));
        let block_notifier = Arc::new(Broker::new());
        let event_notifier = Arc::new(Broker::new());
        let prune_notifier = Arc::new(Broker::new());

        let worker = worker::spawn(
            id,
            self.scheduler.clone(),
            self.registry.clone(),
            chain.clone(),
            self.config.round_timeout,
            block_notifier.clone(),
            event_notifier.clone(),
            self.all_block_notifier.clone(),
            self.metrics.clone(),
            COMMAND_BUFFER,
        );

        runtimes.insert(
            id,
            RuntimeState {
                chain,
                block_notifier,
                event_notifier,
                prune_notifier,
                worker,
            },
        );
        info!(runtime_id = ?id, "runtime registered");
        Ok(())
    }

    pub fn latest_block(&self, runtime_id: RuntimeId) -> Result<Block, QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        Ok(state.chain.latest())
    }

    pub fn block(&self, runtime_id: RuntimeId, round: u64) -> Result<Block, QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        state.chain.get(round)
    }

    /// Decodes and routes `opaque` to the runtime's worker, awaiting the reply or `cancel`,
    /// whichever comes first. A `cancel` firing first does not undo the commit: it only gives up
    /// on waiting for the reply (§5).
    pub async fn commit(
        &self,
        runtime_id: RuntimeId,
        opaque: Bytes,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), CommitError> {
        let commands = {
            let runtimes = self.runtimes.lock();
            runtimes
                .get(&runtime_id)
                .ok_or(CommitError::NoSuchRuntime(runtime_id))?
                .worker
                .commands
                .clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(WorkerCommand::Commit { opaque, reply: reply_tx })
            .await
            .map_err(|_| CommitError::WorkerGone)?;

        tokio::select! {
            result = reply_rx => result.map_err(|_| CommitError::WorkerGone)?,
            _ = cancel => Err(CommitError::Canceled),
        }
    }

    /// Subscribes to `runtime_id`'s block stream. The first message delivered is always the
    /// runtime's current latest block (§4.4, §8).
    pub fn watch_blocks(&self, runtime_id: RuntimeId) -> Result<UnboundedReceiverStream<Block>, QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        let chain = state.chain.clone();
        let (_, stream) = state.block_notifier.subscribe_with_replay(move || chain.latest());
        Ok(stream)
    }

    pub fn watch_events(&self, runtime_id: RuntimeId) -> Result<UnboundedReceiverStream<RuntimeEvent>, QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        let (_, stream) = state.event_notifier.subscribe();
        Ok(stream)
    }

    /// Process-wide block stream, covering every runtime. Does not replay (§4.4).
    pub fn watch_all_blocks(&self) -> UnboundedReceiverStream<Block> {
        let (_, stream) = self.all_block_notifier.subscribe();
        stream
    }

    pub fn watch_pruned_blocks(&self, runtime_id: RuntimeId) -> Result<UnboundedReceiverStream<PrunedBlock>, QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        let (_, stream) = state.prune_notifier.subscribe();
        Ok(stream)
    }

    /// Re-broadcasts a pruning notification produced by the surrounding system (§1, §4.4): this
    /// crate does not perform pruning itself.
    pub fn publish_pruned_block(&self, runtime_id: RuntimeId, pruned: PrunedBlock) -> Result<(), QueryError> {
        let runtimes = self.runtimes.lock();
        let state = runtimes
            .get(&runtime_id)
            .ok_or(QueryError::NoSuchRuntime(runtime_id))?;
        state.prune_notifier.publish(pruned);
        Ok(())
    }

    /// Waits for every currently-tracked worker to finish. Idempotent: a worker is drained from
    /// the table the first time it's awaited here, so a second call sees an empty table and
    /// returns immediately (§4.3: "exactly once").
    pub async fn cleanup(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut runtimes = self.runtimes.lock();
            runtimes.drain().map(|(_, state)| state.worker.task).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{all_committee_nodes, committee, runtime, TestRegistry, TestScheduler};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn spawn_coordinator() -> (
        Arc<Coordinator<TestScheduler, TestRegistry>>,
        JoinHandle<()>,
        mpsc::UnboundedSender<crate::registry::RuntimeDescriptor>,
        mpsc::UnboundedSender<crate::committee::Committee>,
    ) {
        let (committees_tx, committees_rx) = mpsc::unbounded_channel();
        let (runtimes_tx, runtimes_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(TestScheduler::new(committees_rx));
        let registry = Arc::new(TestRegistry::new(all_committee_nodes(), runtimes_rx));
        let config = Config::new(Duration::from_millis(100));
        let metrics_registry = PrometheusRegistry::new();
        let (coordinator, task) = Coordinator::spawn(config, scheduler, registry, &metrics_registry);
        (coordinator, task, runtimes_tx, committees_tx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition should become true within the timeout");
    }

    #[tokio::test]
    async fn unknown_runtime_queries_return_no_such_runtime() {
        let (coordinator, task, _runtimes_tx, _committees_tx) = spawn_coordinator();
        assert_eq!(
            coordinator.latest_block(runtime(1)).unwrap_err(),
            QueryError::NoSuchRuntime(runtime(1))
        );
        task.abort();
    }

    #[tokio::test]
    async fn registering_runtime_spawns_worker_with_genesis_block() {
        let (coordinator, task, runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(7);
        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();

        wait_for(|| coordinator.latest_block(id).is_ok()).await;
        assert_eq!(coordinator.latest_block(id).unwrap().header.round, 0);
        task.abort();
    }

    #[tokio::test]
    async fn non_compute_runtime_is_ignored() {
        let (coordinator, task, runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(8);
        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, false))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            coordinator.latest_block(id).unwrap_err(),
            QueryError::NoSuchRuntime(id)
        );
        task.abort();
    }

    #[tokio::test]
    async fn watch_blocks_replays_genesis_immediately() {
        let (coordinator, task, runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(9);
        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();
        wait_for(|| coordinator.latest_block(id).is_ok()).await;

        let mut blocks = coordinator.watch_blocks(id).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), blocks.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.header.round, 0);
        task.abort();
    }

    #[tokio::test]
    async fn commit_reaches_worker_and_finalizes_through_coordinator_api() {
        let (coordinator, task, runtimes_tx, committees_tx) = spawn_coordinator();
        let id = runtime(11);
        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();
        wait_for(|| coordinator.latest_block(id).is_ok()).await;

        committees_tx.send(committee(id, 1)).unwrap();
        wait_for(|| coordinator.latest_block(id).map(|b| b.header.round).unwrap_or(0) == 1).await;

        let commitment_a = crate::commitment::Commitment::new_unchecked(
            crate::test_support::node(1),
            1,
            crate::hash::Hash::from_bytes([3; 32]),
            crate::hash::Hash::from_bytes([3; 32]),
        )
        .to_opaque();
        let commitment_b = crate::commitment::Commitment::new_unchecked(
            crate::test_support::node(2),
            1,
            crate::hash::Hash::from_bytes([3; 32]),
            crate::hash::Hash::from_bytes([3; 32]),
        )
        .to_opaque();

        coordinator.commit(id, commitment_a, std::future::pending()).await.unwrap();
        coordinator.commit(id, commitment_b, std::future::pending()).await.unwrap();

        wait_for(|| coordinator.latest_block(id).map(|b| b.header.round).unwrap_or(0) == 2).await;
        assert_eq!(coordinator.latest_block(id).unwrap().header.io_root, crate::hash::Hash::from_bytes([3; 32]));

        task.abort();
    }

    #[tokio::test]
    async fn registering_same_runtime_twice_spawns_only_one_worker() {
        let (coordinator, task, _runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(17);

        assert!(coordinator.register_runtime(id).is_ok());
        assert_eq!(coordinator.register_runtime(id), Err(RuntimeExists));
        assert_eq!(coordinator.runtimes.lock().len(), 1);

        task.abort();
    }

    #[tokio::test]
    async fn registry_stream_redelivering_the_same_runtime_is_a_no_op() {
        let (coordinator, task, runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(19);

        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();
        wait_for(|| coordinator.latest_block(id).is_ok()).await;

        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();
        // Give the registration loop a chance to process the duplicate event.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(coordinator.runtimes.lock().len(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (coordinator, task, runtimes_tx, _committees_tx) = spawn_coordinator();
        let id = runtime(13);
        runtimes_tx
            .send(crate::registry::RuntimeDescriptor::new(id, true))
            .unwrap();
        wait_for(|| coordinator.latest_block(id).is_ok()).await;

        coordinator.cleanup().await;
        coordinator.cleanup().await;
        task.abort();
    }
}
