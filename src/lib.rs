//! Parallelized persistence pipeline for a replicated log.
//!
//! A pool of worker threads writes AppendEntries payloads to random-access
//! storage in parallel, while a commit tracker exposes the longest
//! contiguous prefix of the log as the *saved index* that the consensus
//! layer gates its commit index on. Writes may complete out of order; the
//! tracker bridges the gaps, reconciles with storage after a crash or role
//! change, and steps the saved index back when consensus forces divergent
//! history to be overwritten.

#[macro_use]
mod utils;

mod queue;
mod storage;

pub use queue::{
    AppendRequest, Config, PeerProbe, ProcessIdentity, QueueState, Rid,
    RoleNotifier, SaveQueue, SaveStatsSnapshot, StorageConfig, TracingConfig,
};
pub use storage::{
    FileStorage, Index, LogEntry, MemberId, MemoryStorage, Storage, Term,
};
pub use utils::ParlogError;
