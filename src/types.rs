//! Core types for solo mining
//!
//! The 256-bit target codec used to classify results, plus the small
//! identifier types shared between the client, the job manager and the
//! mining backends.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Reverse the byte order of a 32-byte value.
///
/// The node reports targets big-endian, while hash results and the
/// comparison below work on little-endian byte arrays.
pub fn reverse_bytes(bytes: &[u8; 32]) -> [u8; 32] {
    let mut out = *bytes;
    out.reverse();
    out
}

/// Compare two little-endian 256-bit values, most significant byte first.
///
/// Returns the sign of `result - target`.
pub fn compare_target(result: &[u8; 32], target: &[u8; 32]) -> Ordering {
    for i in (0..32).rev() {
        match result[i].cmp(&target[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Decode a node target and derive the share threshold sent to backends.
///
/// Returns the actual (little-endian) target and the partial target as
/// little-endian hex.
pub fn derive_partial_target(hex_target: &str) -> Result<(Target, String)> {
    let actual = Target::from_str(hex_target)?;
    let partial = actual.partial();
    Ok((actual, partial.to_hex_le()))
}

/// Mining target, stored little-endian (byte 31 is most significant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// Target size in bytes
    pub const SIZE: usize = 32;

    /// Create a target from little-endian bytes
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create target from a little-endian slice
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::target(format!(
                "Invalid target length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Little-endian bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Big-endian hex, as the node prints it
    pub fn to_hex_be(&self) -> String {
        hex::encode(reverse_bytes(&self.0))
    }

    /// Little-endian hex, as mining backends consume it
    pub fn to_hex_le(&self) -> String {
        hex::encode(self.0)
    }

    /// Check whether a little-endian hash does not exceed this target
    pub fn meets_target(&self, hash: &[u8; 32]) -> bool {
        compare_target(hash, &self.0) != Ordering::Greater
    }

    /// Share threshold one byte looser than this target.
    ///
    /// In big-endian order every byte moves one position towards the front
    /// and the last byte repeats the byte before it. This is the historical
    /// shimming the backends were built against, not an exact multiply; a
    /// target whose top byte is already set saturates to `max()`.
    pub fn partial(&self) -> Target {
        let be = reverse_bytes(&self.0);
        if be[0] != 0 {
            return Target::max();
        }

        let mut shifted = [0u8; 32];
        shifted[..31].copy_from_slice(&be[1..]);
        shifted[31] = shifted[30];
        Target(reverse_bytes(&shifted))
    }

    /// Maximum possible target (easiest difficulty)
    pub fn max() -> Self {
        Self([0xff; 32])
    }
}

impl FromStr for Target {
    type Err = Error;

    /// Parse a big-endian hex target as reported by `getblocktemplate`
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::SIZE * 2 {
            return Err(Error::target(format!(
                "Invalid target hex length: expected 64 chars, got {}",
                s.len()
            )));
        }

        let mut be = [0u8; 32];
        hex::decode_to_slice(s, &mut be)
            .map_err(|e| Error::target(format!("Invalid hex in target: {}", e)))?;
        Ok(Self(reverse_bytes(&be)))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_be())
    }
}

/// Block header nonce (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u32);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Convert to bytes (little-endian)
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Opaque job identifier handed to mining backends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Job id for the n-th job minted by a client
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("{:08x}", sequence))
    }

    /// Get the id as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Proof-of-work algorithm tag carried by each job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Algorithm(pub String);

impl Algorithm {
    /// Create a new algorithm tag
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the tag as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the mining backend that produced a result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendId(pub u32);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Disconnected; nothing scheduled
    Unconnected,
    /// Waiting for the first template, or retrying after a failure
    Connecting,
    /// Holding a valid job and polling
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unconnected => write!(f, "unconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A solved result reported by a mining backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    pub nonce: Nonce,
    /// Hash of the header with `nonce`, little-endian
    pub result: [u8; 32],
    /// Difficulty the backend was asked to meet
    pub diff: u64,
    /// Difficulty the hash actually reaches
    pub actual_diff: u64,
    pub backend: BackendId,
}

/// Outcome of a forwarded result, as reported to the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// RPC sequence id of the `submitblock` call (0 for results never sent)
    pub seq: u64,
    pub diff: u64,
    pub actual_diff: u64,
    pub backend: BackendId,
    /// Round-trip time of the submission
    pub elapsed: Duration,
}

/// Classification of a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareStatus {
    /// Node accepted the block
    Accepted,
    /// Met the share threshold but not the block target; never sent
    Partial,
    /// Node rejected the block, or the submission failed
    Rejected(String),
}

impl ShareStatus {
    /// Reject reason, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            ShareStatus::Accepted => None,
            ShareStatus::Partial => Some("partial"),
            ShareStatus::Rejected(reason) => Some(reason),
        }
    }
}

/// Why a result was turned away before reaching the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejection {
    /// Result belongs to a superseded job
    #[error("job is not current")]
    NotCurrent,
    /// Result does not meet the block target
    #[error("partial share")]
    Partial,
}
