// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Opaque content hash.
//!
//! The actual hashing algorithm is a collaborator concern (§6); this crate only needs a
//! fixed-size, totally ordered, serializable value that can be compared for equality across
//! commitments and block headers.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const HASH_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn empty() -> Self {
        Self([0u8; HASH_SIZE])
    }

    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().take(4) {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_byte_exact() {
        let a = Hash::from_bytes([1; HASH_SIZE]);
        let b = Hash::from_bytes([1; HASH_SIZE]);
        let c = Hash::from_bytes([2; HASH_SIZE]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_is_all_zero() {
        assert_eq!(Hash::empty().as_bytes(), &[0u8; HASH_SIZE]);
    }
}
