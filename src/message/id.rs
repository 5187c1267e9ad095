//! Origin identifier minted once per diff-sync stack.

use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Counter for generating unique origin IDs within a process
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of the diff-sync stack (or server) that produced a broadcast.
///
/// Composed of:
/// - 8 bytes: timestamp (milliseconds since UNIX epoch)
/// - 8 bytes: process-local counter
/// - 8 bytes: random component
///
/// Ordering follows creation time, so ids minted later compare greater
/// (ties broken by the counter within one process).
///
/// On the wire an id is the string `tttttttttttttttt-cccccccccccccccc-rrrrrrrrrrrrrrrr`
/// (three zero-padded hex groups), which is also its [`Display`] form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OriginId {
    timestamp: u64,
    counter: u64,
    random: u64,
}

impl OriginId {
    /// Length of the canonical string form.
    pub const ENCODED_LEN: usize = 16 * 3 + 2;

    /// Mint a new unique origin ID.
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let random = rand::random::<u64>();

        Self {
            timestamp,
            counter,
            random,
        }
    }

    /// Create an origin ID from raw components (for testing/deserialization).
    pub const fn from_parts(timestamp: u64, counter: u64, random: u64) -> Self {
        Self {
            timestamp,
            counter,
            random,
        }
    }

    /// Get the timestamp component.
    #[inline]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Get the counter component.
    #[inline]
    pub const fn counter(&self) -> u64 {
        self.counter
    }

    /// Get the random component.
    #[inline]
    pub const fn random(&self) -> u64 {
        self.random
    }
}

impl Default for OriginId {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginId({})", self)
    }
}

impl Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:016x}-{:016x}",
            self.timestamp, self.counter, self.random
        )
    }
}

impl FromStr for OriginId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidOriginId(s.to_string());

        if s.len() != Self::ENCODED_LEN {
            return Err(invalid());
        }

        let mut parts = s.split('-');
        let mut next = || -> Result<u64, Error> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 16 {
                return Err(invalid());
            }
            u64::from_str_radix(part, 16).map_err(|_| invalid())
        };

        let timestamp = next()?;
        let counter = next()?;
        let random = next()?;
        Ok(Self::from_parts(timestamp, counter, random))
    }
}

impl Serialize for OriginId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OriginId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
