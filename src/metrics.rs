// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics, in the teacher's `Context::metrics` style. Carried as ambient
//! observability even though pruning/GC metrics are explicitly out of scope (§1).

use prometheus::{register_int_counter_vec_with_registry, IntCounterVec, Registry};

pub struct CoordinatorMetrics {
    pub blocks_appended: IntCounterVec,
    pub discrepancies_detected: IntCounterVec,
    pub rounds_failed: IntCounterVec,
    pub round_timeouts: IntCounterVec,
}

impl CoordinatorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            blocks_appended: register_int_counter_vec_with_registry!(
                "roothash_blocks_appended_total",
                "Blocks appended to a runtime's chain, by header type",
                &["runtime_id", "header_type"],
                registry,
            )
            .expect("metric registration is infallible for a fresh registry"),
            discrepancies_detected: register_int_counter_vec_with_registry!(
                "roothash_discrepancies_detected_total",
                "Discrepancies detected among primary-worker commitments",
                &["runtime_id"],
                registry,
            )
            .expect("metric registration is infallible for a fresh registry"),
            rounds_failed: register_int_counter_vec_with_registry!(
                "roothash_rounds_failed_total",
                "Rounds that emitted a RoundFailed block",
                &["runtime_id"],
                registry,
            )
            .expect("metric registration is infallible for a fresh registry"),
            round_timeouts: register_int_counter_vec_with_registry!(
                "roothash_round_timeouts_total",
                "Round timer expiries, by phase",
                &["runtime_id", "phase"],
                registry,
            )
            .expect("metric registration is infallible for a fresh registry"),
        }
    }
}
