// Copyright (c) 2025 Cascoin Trust Developers

//! Primitive identifiers and amounts shared by every trust component.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Amount in base units.
pub type Amount = u64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// Seconds in one day.
pub const SECS_PER_DAY: u64 = 86_400;

/// Error parsing a hex-encoded identifier.
#[derive(Debug, Error, PartialEq)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const NULL: Self = Self([0u8; $len]);

            /// Whether every byte is zero.
            pub fn is_null(&self) -> bool {
                self.0 == [0u8; $len]
            }

            /// A value with every byte set to `byte`.
            pub fn repeat_byte(byte: u8) -> Self {
                Self([byte; $len])
            }

            /// A value whose trailing eight bytes hold `n` big-endian.
            pub fn from_low_u64_be(n: u64) -> Self {
                let mut bytes = [0u8; $len];
                bytes[$len - 8..].copy_from_slice(&n.to_be_bytes());
                Self(bytes)
            }

            /// Lowercase hex without prefix.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                if bytes.len() != $len {
                    return Err(ParseIdError::Length {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
        }
    };
}

fixed_bytes!(
    /// A 160-bit account address.
    ///
    /// `Address::NULL` stands for "no viewer" in personalized queries.
    Address,
    20
);

fixed_bytes!(
    /// A 256-bit transaction hash.
    TxHash,
    32
);

/// Convert base units into whole coins as a float.
pub fn to_coins(amount: Amount) -> f64 {
    amount as f64 / COIN as f64
}
