// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Blocks and the per-runtime append-only block chain.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::hash::Hash;
use crate::identity::RuntimeId;

/// Header type, mirroring the roothash wire header type used by the surrounding system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderType {
    Genesis,
    Normal,
    EpochTransition,
    RoundFailed,
}

/// Block header. Content roots are opaque to this crate beyond equality/hashing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub round: u64,
    pub timestamp: u64,
    pub header_type: HeaderType,
    pub previous_hash: Hash,
    pub io_root: Hash,
    pub state_root: Hash,
}

/// A finalized (or genesis) block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
}

impl Block {
    /// Builds the genesis block (`round = 0`) for a runtime, stamped with `timestamp`.
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            header: BlockHeader {
                round: 0,
                timestamp,
                header_type: HeaderType::Genesis,
                previous_hash: Hash::empty(),
                io_root: Hash::empty(),
                state_root: Hash::empty(),
            },
        }
    }

    /// Builds an empty block continuing the chain from `previous`, at `previous.round + 1`.
    /// Used for epoch-transition and round-failed blocks, which carry no computed content.
    pub fn new_empty(previous: &Block, timestamp: u64, header_type: HeaderType) -> Self {
        Self {
            header: BlockHeader {
                round: previous.header.round + 1,
                timestamp,
                header_type,
                previous_hash: previous.header.io_root,
                io_root: Hash::empty(),
                state_root: Hash::empty(),
            },
        }
    }

    /// Builds a normal block from agreed commitment content, continuing the chain from `previous`.
    pub fn new_normal(previous: &Block, timestamp: u64, io_root: Hash, state_root: Hash) -> Self {
        Self {
            header: BlockHeader {
                round: previous.header.round + 1,
                timestamp,
                header_type: HeaderType::Normal,
                previous_hash: previous.header.io_root,
                io_root,
                state_root,
            },
        }
    }
}

/// Per-runtime ordered sequence of finalized blocks, indexed by round number.
///
/// `blocks[i].header.round == i` is an invariant enforced on every append; callers outside the
/// owning worker only ever read through a shared lock.
pub struct BlockChain {
    runtime_id: RuntimeId,
    blocks: RwLock<Vec<Block>>,
}

impl BlockChain {
    pub fn new(runtime_id: RuntimeId, genesis: Block) -> Self {
        assert_eq!(genesis.header.round, 0, "genesis block must be round 0");
        Self {
            runtime_id,
            blocks: RwLock::new(vec![genesis]),
        }
    }

    /// Appends `block`, which must continue the chain at `latest.round + 1`.
    ///
    /// This is only ever called by the runtime's single owning worker; it is not reachable
    /// concurrently, so no read-modify-write race is possible even though the lock is shared
    /// with readers.
    pub fn append(&self, block: Block) {
        let mut blocks = self.blocks.write();
        let expected_round = blocks.last().expect("chain always has a genesis").header.round + 1;
        assert_eq!(
            block.header.round, expected_round,
            "block chain append violates round continuity for runtime {:?}",
            self.runtime_id
        );
        blocks.push(block);
    }

    pub fn latest(&self) -> Block {
        self.blocks
            .read()
            .last()
            .expect("chain always has a genesis")
            .clone()
    }

    /// Looks up the block at `round`. Panics (fatal bug, not a user error) if the stored block at
    /// that index has an inconsistent round number -- this is an invariant check, not an error
    /// path, matching §4.3.
    pub fn get(&self, round: u64) -> Result<Block, QueryError> {
        let blocks = self.blocks.read();
        let index = round as usize;
        match blocks.get(index) {
            Some(block) => {
                assert_eq!(
                    block.header.round, round,
                    "chain index {index} holds block with round {}, expected {round}",
                    block.header.round
                );
                Ok(block.clone())
            }
            None => Err(QueryError::NotFound(round)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> RuntimeId {
        RuntimeId::from_bytes([7; 32])
    }

    #[test]
    fn genesis_is_round_zero() {
        let chain = BlockChain::new(rid(), Block::genesis(100));
        assert_eq!(chain.latest().header.round, 0);
        assert_eq!(chain.latest().header.header_type, HeaderType::Genesis);
    }

    #[test]
    fn append_advances_round_and_is_queryable() {
        let genesis = Block::genesis(100);
        let chain = BlockChain::new(rid(), genesis.clone());
        let next = Block::new_empty(&genesis, 101, HeaderType::EpochTransition);
        chain.append(next.clone());

        assert_eq!(chain.latest(), next);
        assert_eq!(chain.get(0).unwrap(), genesis);
        assert_eq!(chain.get(1).unwrap(), next);
    }

    #[test]
    fn get_unknown_round_is_not_found() {
        let chain = BlockChain::new(rid(), Block::genesis(100));
        assert_eq!(chain.get(5), Err(QueryError::NotFound(5)));
    }

    #[test]
    #[should_panic(expected = "violates round continuity")]
    fn append_out_of_order_panics() {
        let genesis = Block::genesis(100);
        let chain = BlockChain::new(rid(), genesis.clone());
        let bad = Block::new_empty(&genesis, 101, HeaderType::EpochTransition);
        chain.append(bad.clone());
        // Skips round 2 entirely.
        let skip = Block {
            header: BlockHeader {
                round: 3,
                ..bad.header
            },
        };
        chain.append(skip);
    }
}
