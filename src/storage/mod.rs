//! Durable log storage contract and the adapters shipped with the crate.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::utils::ParlogError;

use bytes::Bytes;

use serde::{Deserialize, Serialize};

/// Member ID within a consensus group, defined for better code readability.
pub type MemberId = u32;

/// Term number type, defined for better code readability.
pub type Term = u64;

/// Log index type, defined for better code readability.
pub type Index = u64;

/// One durable log record of a member.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term under which the entry was appended.
    pub term: Term,

    /// Position in the log; the first entry sits at index 1.
    pub index: Index,

    /// Opaque command bytes.
    pub payload: Bytes,
}

/// Random-access durable log, keyed by `(member, index)`.
///
/// Entries may arrive with non-monotonic indexes; it is the save queue's
/// job, not the adapter's, to re-establish a contiguous prefix. Besides the
/// entries themselves, an adapter persists three small metadata slots per
/// member: the max-gap bound that limits post-crash scans, and the owner
/// pid/address pair backing the single-writer guard.
///
/// All operations are synchronous; adapters surface their failures as the
/// `Storage` error kind.
pub trait Storage: Send + Sync {
    /// Returns the entry with the highest stored index, or `None` if the
    /// member's log is empty.
    fn get_last(&self, member: MemberId)
        -> Result<Option<LogEntry>, ParlogError>;

    /// Point lookup; `None` if missing.
    fn get(
        &self,
        member: MemberId,
        index: Index,
    ) -> Result<Option<LogEntry>, ParlogError>;

    /// Inserts an entry at an arbitrary index. Fails if the index is
    /// already occupied.
    fn append(
        &self,
        member: MemberId,
        term: Term,
        index: Index,
        payload: &[u8],
    ) -> Result<(), ParlogError>;

    /// Removes the entry at `index`; idempotent on already-absent.
    fn delete(&self, member: MemberId, index: Index)
        -> Result<(), ParlogError>;

    /// Number of entries stored for the member.
    fn count(&self, member: MemberId) -> Result<u64, ParlogError>;

    /// Reads the persisted max-gap bound (0 if never set).
    fn get_max_gap(&self, member: MemberId) -> Result<u32, ParlogError>;

    /// Persists the max-gap bound.
    fn set_max_gap(&self, member: MemberId, gap: u32)
        -> Result<(), ParlogError>;

    /// Reads the owner process id slot.
    fn get_owner_pid(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError>;

    /// Writes the owner process id slot.
    fn set_owner_pid(
        &self,
        member: MemberId,
        pid: &str,
    ) -> Result<(), ParlogError>;

    /// Reads the owner address slot.
    fn get_owner_address(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError>;

    /// Writes the owner address slot.
    fn set_owner_address(
        &self,
        member: MemberId,
        address: &str,
    ) -> Result<(), ParlogError>;
}
