// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Construction-time configuration. No environment variables, no CLI, no file loader: the
//! coordinator is configured purely programmatically, per §6.

use std::collections::HashMap;
use std::time::Duration;

use crate::block::Block;
use crate::identity::RuntimeId;

/// Configuration accepted by [`crate::coordinator::Coordinator::spawn`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Per-runtime genesis blocks. A runtime absent from this map receives a synthetic empty
    /// genesis stamped with the construction-time wall clock.
    pub genesis_blocks: HashMap<RuntimeId, Block>,
    /// Wall-clock timeout applied uniformly to every runtime's round.
    pub round_timeout: Duration,
}

impl Config {
    pub fn new(round_timeout: Duration) -> Self {
        Self {
            genesis_blocks: HashMap::new(),
            round_timeout,
        }
    }

    pub fn with_genesis(mut self, runtime_id: RuntimeId, block: Block) -> Self {
        assert_eq!(
            block.header.round, 0,
            "genesis block for runtime {runtime_id:?} must be round 0"
        );
        self.genesis_blocks.insert(runtime_id, block);
        self
    }
}
