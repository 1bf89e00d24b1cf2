// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Opaque identity types: runtime and node public keys.
//!
//! Signature verification itself is a collaborator concern (§6); these types only need to be
//! usable as map keys (`Eq` + `Ord` + `Hash`) and to round-trip through the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const PUBLIC_KEY_SIZE: usize = 32;

macro_rules! public_key_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; PUBLIC_KEY_SIZE]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                for byte in self.0.iter().take(4) {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "..)")
            }
        }

        impl From<[u8; PUBLIC_KEY_SIZE]> for $name {
            fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
                Self(bytes)
            }
        }
    };
}

public_key_newtype!(RuntimeId);
public_key_newtype!(NodePublicKey);

/// A scheduler-defined epoch boundary. Committee identity is constant within an epoch.
pub type Epoch = u64;
