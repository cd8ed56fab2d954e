//! Identity types for tickroom
//!
//! Rooms are named by the application. Post names are short random
//! identifiers generated client-side so a locally predicted post can be
//! matched against its confirmed copy.

use std::fmt;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// Length of a generated post name
pub const POST_NAME_LEN: usize = 8;

/// Alphabet used for post names (64 symbols, one per `byte % 64`)
pub const POST_NAME_ALPHABET: &[u8; 64] =
    b"_abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-";

/// Room identity - namespace of one independent simulation
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        RoomId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Room({})", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        RoomId::new(value)
    }
}

/// Post name - client-generated correlation id
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostName(pub String);

impl PostName {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        PostName(name.into())
    }

    /// Build a name from raw random bytes
    pub fn from_random_bytes(bytes: [u8; POST_NAME_LEN]) -> Self {
        let name = bytes
            .iter()
            .map(|b| POST_NAME_ALPHABET[(*b % 64) as usize] as char)
            .collect();
        PostName(name)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Confirmed posts may arrive without a name
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

impl fmt::Display for PostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostName {
    fn from(value: &str) -> Self {
        PostName::new(value)
    }
}

/// Source of fresh post names
pub trait NameSource: Send {
    fn next_name(&mut self) -> PostName;
}

/// Names drawn from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameSource for RandomNames {
    fn next_name(&mut self) -> PostName {
        let mut bytes = [0u8; POST_NAME_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        PostName::from_random_bytes(bytes)
    }
}

/// Reproducible names for simulations and tests
#[derive(Debug, Clone)]
pub struct SeededNames {
    rng: StdRng,
}

impl SeededNames {
    pub fn new(seed: u64) -> Self {
        SeededNames {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl NameSource for SeededNames {
    fn next_name(&mut self) -> PostName {
        let mut bytes = [0u8; POST_NAME_LEN];
        self.rng.fill_bytes(&mut bytes);
        PostName::from_random_bytes(bytes)
    }
}
