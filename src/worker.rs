// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The per-runtime worker: a single-owner event loop serializing committee events, commit
//! submissions, and timer expiries into round transitions (§4.2).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockChain, HeaderType};
use crate::clock::now_unix_secs;
use crate::commitment::Commitment;
use crate::committee::{Committee, CommitteeKind, ComputationGroup};
use crate::error::{CommitError, FinalizeError};
use crate::identity::RuntimeId;
use crate::metrics::CoordinatorMetrics;
use crate::notifier::{Broker, RuntimeEvent};
use crate::registry::Registry;
use crate::round::{Round, RoundState};
use crate::scheduler::Scheduler;
use crate::timer::RoundTimer;

/// Commands routed to a worker through its bounded command channel (§4.2, §9: bounded, the
/// sender backs off rather than dropping).
pub enum WorkerCommand {
    Commit {
        opaque: Bytes,
        reply: oneshot::Sender<Result<(), CommitError>>,
    },
}

/// What the coordinator keeps after spawning a worker: the command sender and the task handle,
/// mirroring the teacher's `ChannelCoreThreadDispatcher` + join-handle pairing.
pub struct WorkerHandle {
    pub commands: mpsc::Sender<WorkerCommand>,
    pub task: JoinHandle<()>,
}

fn runtime_label(id: RuntimeId) -> String {
    format!("{id:?}")
}

fn header_type_label(header_type: HeaderType) -> &'static str {
    match header_type {
        HeaderType::Genesis => "genesis",
        HeaderType::Normal => "normal",
        HeaderType::EpochTransition => "epoch_transition",
        HeaderType::RoundFailed => "round_failed",
    }
}

struct Worker<S: Scheduler, R: Registry> {
    runtime_id: RuntimeId,
    scheduler: Arc<S>,
    registry: Arc<R>,
    chain: Arc<BlockChain>,
    round: Option<Round>,
    timer: RoundTimer,
    round_timeout: Duration,
    commands: mpsc::Receiver<WorkerCommand>,
    block_notifier: Arc<Broker<Block>>,
    event_notifier: Arc<Broker<RuntimeEvent>>,
    all_block_notifier: Arc<Broker<Block>>,
    metrics: Arc<CoordinatorMetrics>,
}

/// Spawns a worker for `runtime_id`, returning the handle the coordinator routes commits through.
#[allow(clippy::too_many_arguments)]
pub fn spawn<S: Scheduler, R: Registry>(
    runtime_id: RuntimeId,
    scheduler: Arc<S>,
    registry: Arc<R>,
    chain: Arc<BlockChain>,
    round_timeout: Duration,
    block_notifier: Arc<Broker<Block>>,
    event_notifier: Arc<Broker<RuntimeEvent>>,
    all_block_notifier: Arc<Broker<Block>>,
    metrics: Arc<CoordinatorMetrics>,
    command_buffer: usize,
) -> WorkerHandle {
    let (commands_tx, commands_rx) = mpsc::channel(command_buffer);
    let worker = Worker {
        runtime_id,
        scheduler,
        registry,
        chain,
        round: None,
        timer: RoundTimer::disarmed(),
        round_timeout,
        commands: commands_rx,
        block_notifier,
        event_notifier,
        all_block_notifier,
        metrics,
    };
    let task = tokio::spawn(worker.run());
    WorkerHandle {
        commands: commands_tx,
        task,
    }
}

impl<S: Scheduler, R: Registry> Worker<S, R> {
    async fn run(mut self) {
        let (mut committees, _subscription) = self.scheduler.watch_committees().await;
        loop {
            tokio::select! {
                maybe_committee = committees.next() => {
                    match maybe_committee {
                        Some(committee) => self.handle_committee_event(committee).await,
                        None => {
                            debug!(runtime_id = ?self.runtime_id, "committee stream closed, worker exiting");
                            break;
                        }
                    }
                }
                maybe_command = self.commands.recv() => {
                    match maybe_command {
                        Some(WorkerCommand::Commit { opaque, reply }) => {
                            self.handle_commit(opaque, reply).await
                        }
                        None => {
                            debug!(runtime_id = ?self.runtime_id, "command channel closed, worker exiting");
                            break;
                        }
                    }
                }
                _ = self.timer.expired() => self.handle_timeout().await,
            }
        }
    }

    #[tracing::instrument(skip_all, fields(runtime_id = ?self.runtime_id, valid_for = committee.valid_for))]
    async fn handle_committee_event(&mut self, committee: Committee) {
        if committee.runtime_id != self.runtime_id || committee.kind != CommitteeKind::Compute {
            return;
        }
        if let Some(round) = &self.round {
            if round.committee().identity() == committee.identity() {
                debug!(runtime_id = ?self.runtime_id, "duplicate committee event, ignoring");
                return;
            }
        }

        self.timer.disarm();

        let nodes = self.registry.get_nodes().await.unwrap_or_else(|err| {
            panic!(
                "fatal error fetching registry nodes for runtime {:?}: {err}",
                self.runtime_id
            )
        });
        let group = ComputationGroup::build(&committee, &nodes);

        let latest = self.chain.latest();
        let transition = Block::new_empty(&latest, now_unix_secs(), HeaderType::EpochTransition);
        self.chain.append(transition.clone());
        self.metrics
            .blocks_appended
            .with_label_values(&[
                runtime_label(self.runtime_id).as_str(),
                header_type_label(HeaderType::EpochTransition),
            ])
            .inc();
        self.publish_block(transition.clone());
        info!(
            runtime_id = ?self.runtime_id,
            round = transition.header.round,
            "epoch transition"
        );

        self.round = Some(Round::new(committee, group, transition));

        self.registry
            .get_runtime(self.runtime_id)
            .await
            .unwrap_or_else(|err| {
                panic!(
                    "fatal error refreshing registry record for runtime {:?}: {err}",
                    self.runtime_id
                )
            });
    }

    async fn handle_commit(&mut self, opaque: Bytes, reply: oneshot::Sender<Result<(), CommitError>>) {
        if self.round.is_none() {
            let _ = reply.send(Err(CommitError::NoRoundInProgress));
            return;
        }

        if self
            .round
            .as_ref()
            .expect("checked above")
            .is_finalized()
        {
            let latest = self.chain.latest();
            let round = self.round.as_ref().expect("checked above");
            let committee = round.committee().clone();
            let group = round.computation_group().clone();
            self.round = Some(Round::new(committee, group, latest));
        }

        let commitment = match Commitment::from_opaque(&opaque) {
            Ok(commitment) => commitment,
            Err(err) => {
                let _ = reply.send(Err(CommitError::InvalidCommitment(err.to_string())));
                return;
            }
        };

        debug!(
            runtime_id = ?self.runtime_id,
            node = ?commitment.node_public_key,
            "commitment received"
        );

        let round = self.round.as_mut().expect("round is present by construction above");
        match round.add_commitment(commitment) {
            Ok(()) => {
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                debug!(runtime_id = ?self.runtime_id, error = %err, "commitment rejected");
                let _ = reply.send(Err(CommitError::Commitment(err)));
                return;
            }
        }

        self.dispatch_finalize(false).await;
    }

    async fn handle_timeout(&mut self) {
        match self.round.as_mut() {
            Some(round) => round.mark_timeout(),
            None => return,
        }
        self.dispatch_finalize(true).await;
    }

    /// Implements the dispatch table in §4.2.
    #[tracing::instrument(skip_all, fields(runtime_id = ?self.runtime_id, forced))]
    async fn dispatch_finalize(&mut self, forced: bool) {
        let now = now_unix_secs();
        let round = self
            .round
            .as_mut()
            .expect("dispatch_finalize is only called with an active round");

        match round.try_finalize(now) {
            Ok(block) => {
                self.chain.append(block.clone());
                self.metrics
                    .blocks_appended
                    .with_label_values(&[
                        runtime_label(self.runtime_id).as_str(),
                        header_type_label(block.header.header_type),
                    ])
                    .inc();
                info!(
                    runtime_id = ?self.runtime_id,
                    round = block.header.round,
                    "block finalized"
                );
                self.publish_block(block);
                self.timer.disarm();
            }
            Err(FinalizeError::StillWaiting) => {
                if !forced {
                    self.timer.arm(self.round_timeout);
                    return;
                }
                match round.state() {
                    RoundState::WaitingCommitments => {
                        round
                            .force_backup_transition()
                            .expect("primary phase cannot already be in discrepancy");
                        self.metrics
                            .round_timeouts
                            .with_label_values(&[runtime_label(self.runtime_id).as_str(), "primary"])
                            .inc();
                        warn!(
                            runtime_id = ?self.runtime_id,
                            "primary phase timed out, escalating to backup committee"
                        );
                        self.timer.arm(self.round_timeout);
                    }
                    RoundState::DiscrepancyWaitingCommitments => {
                        self.metrics
                            .round_timeouts
                            .with_label_values(&[runtime_label(self.runtime_id).as_str(), "discrepancy"])
                            .inc();
                        self.metrics
                            .rounds_failed
                            .with_label_values(&[runtime_label(self.runtime_id).as_str()])
                            .inc();
                        warn!(
                            runtime_id = ?self.runtime_id,
                            "backup phase timed out, failing round"
                        );
                        let failed = Block::new_empty(round.current_block(), now, HeaderType::RoundFailed);
                        round.populate_finalized_block(failed.clone());
                        self.chain.append(failed.clone());
                        self.metrics
                            .blocks_appended
                            .with_label_values(&[
                                runtime_label(self.runtime_id).as_str(),
                                header_type_label(HeaderType::RoundFailed),
                            ])
                            .inc();
                        self.publish_block(failed);
                        self.timer.disarm();
                    }
                }
            }
            Err(FinalizeError::DiscrepancyDetected(io_root)) => {
                let block_header = self.chain.latest().header;
                warn!(
                    runtime_id = ?self.runtime_id,
                    io_root = ?io_root,
                    "discrepancy detected among primary commitments"
                );
                self.event_notifier.publish(RuntimeEvent::DiscrepancyDetected {
                    io_root,
                    block_header,
                });
                self.metrics
                    .discrepancies_detected
                    .with_label_values(&[runtime_label(self.runtime_id).as_str()])
                    .inc();
                round
                    .force_backup_transition()
                    .expect("discrepancy is only detected once, from the primary phase");
                self.timer.arm(self.round_timeout);
            }
        }
    }

    fn publish_block(&self, block: Block) {
        self.all_block_notifier.publish(block.clone());
        self.block_notifier.publish(block);
    }
}
