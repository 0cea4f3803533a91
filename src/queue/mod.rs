//! The save queue: a multi-worker pipeline that parallelizes log writes
//! while tracking the longest contiguous saved prefix.
//!
//! N worker threads drain a blocking work queue and insert entries into
//! storage in parallel. When a worker finishes the write of some index, it
//! compares that index with the saved index: an exact successor advances
//! the saved index (pulling any previously completed out-of-order writes
//! along), anything further ahead is parked in the out-of-order set until
//! the prefix below it completes.

mod append;
mod recovery;
mod stats;



pub use stats::SaveStatsSnapshot;
use stats::SaveStats;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::storage::{Index, MemberId, Storage, Term};
use crate::utils::ParlogError;

use bytes::Bytes;

use serde::Deserialize;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Storage pipeline knobs.
    pub storage: StorageConfig,

    /// Verbose tracing toggles.
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Worker pool size. Read once at `start()`.
    pub save_queue_workers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfig {
    /// Enables verbose per-write trace logs. Reloadable at runtime via
    /// `SaveQueue::reload_config`.
    pub storage: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            save_queue_workers: 5,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig { storage: false }
    }
}

impl Config {
    /// Parses a config from TOML text, filling unset keys with defaults.
    pub fn from_toml(text: &str) -> Result<Self, ParlogError> {
        Ok(toml::from_str(text)?)
    }
}

/// Result identifier: term and index at the tip of the contiguous saved
/// prefix. `(0, 0)` denotes an empty log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rid {
    pub term: Term,
    pub index: Index,
}

/// One AppendEntries payload, to be persisted at index `prev_index + 1`.
///
/// The queue interprets only `prev_index`, `entry_term`, and `payload`; the
/// remaining fields ride along opaquely for the consensus layer.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    /// Sending member (the leader).
    pub from: MemberId,

    /// Leader's term at send time.
    pub term: Term,

    /// Term of the entry preceding this one.
    pub prev_term: Term,

    /// Index of the entry preceding this one.
    pub prev_index: Index,

    /// Term of the entry itself.
    pub entry_term: Term,

    /// Leader's commit index at send time.
    pub commit_index: Index,

    /// Opaque command bytes.
    pub payload: Bytes,
}

/// Callback seam into the role machine.
pub trait RoleNotifier: Send + Sync {
    /// Fired whenever the saved index advances, entries are deleted, or a
    /// worker observes a storage error.
    fn index_updated(&self, is_error: bool, deleted: bool);
}

/// Probe for whether a process at the given address is still alive on the
/// network; consulted by the single-writer guard at construction.
pub trait PeerProbe: Send + Sync {
    fn is_active(&self, address: &str) -> bool;
}

impl<F> PeerProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_active(&self, address: &str) -> bool {
        self(address)
    }
}

/// Identity of the hosting process, recorded in the storage owner slots.
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    /// Process id string, unique per process lifetime.
    pub pid: String,

    /// Network address this process serves on.
    pub address: String,
}

/// Diagnostic copy of the tracker state, taken under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub initialized: bool,
    pub saved_index: Index,
    pub last_term: Term,

    /// Indexes currently being written, ascending.
    pub saving: Vec<Index>,

    /// Indexes written but not yet contiguous, ascending.
    pub saved: Vec<Index>,

    /// Work-queue depth.
    pub queued: usize,

    pub max_gap: u32,
}

/// All mutable state, guarded by the one tracker mutex.
struct Tracker {
    /// Set to true once the reconciler has run successfully.
    initialized: bool,

    /// The highest contiguous index that has been saved.
    saved_index: Index,

    /// Term recorded at `saved_index`.
    last_term: Term,

    /// Indexes currently being written by some worker.
    saving: HashSet<Index>,

    /// Out-of-order completions above the contiguous prefix, index -> term.
    saved: HashMap<Index, Term>,

    /// Upper bound on how far ahead of the prefix a write may be; mirrored
    /// in storage so post-crash scans stay bounded.
    max_gap: u32,

    /// Log entries waiting to be saved.
    work_queue: VecDeque<AppendRequest>,

    /// Workers currently parked on `queue_nonempty`; the only signal
    /// `settle` has for quiescence.
    num_waiters: u32,

    /// Workers spawned by `start()` and not yet joined.
    num_workers: u32,

    /// Raised by `stop()`; workers treat it as an interrupt.
    shutting_down: bool,
}

impl Tracker {
    fn new() -> Self {
        Tracker {
            initialized: false,
            saved_index: 0,
            last_term: 0,
            saving: HashSet::new(),
            saved: HashMap::new(),
            max_gap: 0,
            work_queue: VecDeque::new(),
            num_waiters: 0,
            num_workers: 0,
            shutting_down: false,
        }
    }
}

/// Shared guts of the queue, held by the handle and every worker.
struct SaveCore {
    member: MemberId,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn RoleNotifier>,
    identity: ProcessIdentity,

    tracker: Mutex<Tracker>,

    /// Signaled when the reconciler completes.
    index_initialized: Condvar,

    /// Signaled on enqueue; also what `settle`'s quiescence loop parks on.
    queue_nonempty: Condvar,

    storage_tracing: AtomicBool,
    stats: SaveStats,
}

impl SaveCore {
    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().expect("tracker mutex poisoned")
    }

    fn tracing(&self) -> bool {
        self.storage_tracing.load(Ordering::Relaxed)
    }

    fn get_latest(&self) -> Result<Rid, ParlogError> {
        let t = self.lock();
        if !t.initialized {
            // settle() must succeed first before this method can be used
            return Err(ParlogError::NotInitialized);
        }
        Ok(Rid {
            term: t.last_term,
            index: t.saved_index,
        })
    }

    fn get_latest_wait(&self) -> Result<Rid, ParlogError> {
        let mut t = self.lock();
        while !t.initialized {
            if t.shutting_down {
                return Err(ParlogError::Cancelled);
            }
            t = self
                .index_initialized
                .wait(t)
                .expect("tracker mutex poisoned");
        }
        Ok(Rid {
            term: t.last_term,
            index: t.saved_index,
        })
    }

    /// Worker thread body: pop one request at a time and save it. A failed
    /// save is reported to the role machine but does not kill the worker.
    fn worker_loop(&self, worker: u32) {
        pl_debug!(self.member; "save worker {} spawned", worker);
        loop {
            let req = {
                let mut t = self.lock();
                loop {
                    if t.shutting_down {
                        pl_debug!(self.member; "save worker {} exiting", worker);
                        return;
                    }
                    if let Some(req) = t.work_queue.pop_front() {
                        break req;
                    }
                    t.num_waiters += 1;
                    t = self
                        .queue_nonempty
                        .wait(t)
                        .expect("tracker mutex poisoned");
                    t.num_waiters -= 1;
                }
            };

            match self.handle_append(&req) {
                Ok(()) => {}
                Err(ParlogError::Cancelled) => {
                    pl_debug!(self.member; "save worker {} exiting", worker);
                    return;
                }
                Err(e) => {
                    pl_error!(self.member; "saving index {} failed: {}",
                                           req.prev_index + 1, e);
                    self.notifier.index_updated(true, false);
                }
            }
            // the request is released here regardless of outcome
        }
    }
}

/// Handle to the save queue of one member.
pub struct SaveQueue {
    core: Arc<SaveCore>,
    workers: Vec<JoinHandle<()>>,
    num_workers: u32,
}

impl SaveQueue {
    /// Creates the queue against the given storage: verifies that no other
    /// live process owns the member's rows, claims the owner slots, and
    /// runs the reconciler so `get_latest` works right away. Workers are
    /// not spawned until `start()`.
    pub fn new(
        member: MemberId,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn RoleNotifier>,
        probe: Arc<dyn PeerProbe>,
        identity: ProcessIdentity,
        config: &Config,
    ) -> Result<Self, ParlogError> {
        if let Some(owner) = storage.get_owner_address(member)? {
            if owner != identity.address && probe.is_active(&owner) {
                return Err(ParlogError::AlreadyOwned(format!(
                    "process at address {} is currently using storage of \
                     member {}",
                    owner, member
                )));
            }
        }
        storage.set_owner_address(member, &identity.address)?;
        storage.set_owner_pid(member, &identity.pid)?;

        let core = Arc::new(SaveCore {
            member,
            storage,
            notifier,
            identity,
            tracker: Mutex::new(Tracker::new()),
            index_initialized: Condvar::new(),
            queue_nonempty: Condvar::new(),
            storage_tracing: AtomicBool::new(config.tracing.storage),
            stats: SaveStats::new(),
        });
        core.init_saved_index()?;

        Ok(SaveQueue {
            core,
            workers: Vec::new(),
            num_workers: config.storage.save_queue_workers,
        })
    }

    /// Spawns the worker pool. May be called again only after `stop()`.
    pub fn start(&mut self) -> Result<(), ParlogError> {
        if !self.workers.is_empty() {
            return logged_err!(self.core.member; Inconsistent,
                "worker pool is already running");
        }
        {
            let mut t = self.core.lock();
            t.shutting_down = false;
            t.num_workers = self.num_workers;
        }
        for worker in 0..self.num_workers {
            let core = Arc::clone(&self.core);
            let handle = thread::Builder::new()
                .name(format!("save-worker-{}", worker))
                .spawn(move || core.worker_loop(worker))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Cooperative shutdown: raises the interrupt flag, wakes every parked
    /// thread, joins the pool (letting in-flight writes finish), then
    /// resets the tracker so a restarted queue must `settle` first.
    pub fn stop(&mut self) {
        {
            let mut t = self.core.lock();
            t.shutting_down = true;
        }
        self.core.queue_nonempty.notify_all();
        self.core.index_initialized.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                pl_warn!(self.core.member;
                    "a save worker panicked before shutdown");
            }
        }

        let mut t = self.core.lock();
        t.num_workers = 0;
        t.initialized = false;
        t.saved_index = 0;
        t.last_term = 0;
    }

    /// Queues a request for saving. The saved index will advance once the
    /// write lands and the prefix below it is complete.
    pub fn enqueue(&self, request: AppendRequest) {
        let mut t = self.core.lock();
        t.work_queue.push_back(request);
        self.core.queue_nonempty.notify_one();
    }

    /// Number of requests waiting to be processed.
    pub fn size(&self) -> usize {
        self.core.lock().work_queue.len()
    }

    /// Atomically copies the latest saved term and index.
    pub fn get_latest(&self) -> Result<Rid, ParlogError> {
        self.core.get_latest()
    }

    /// Like `get_latest`, but blocks until the reconciler has run.
    pub fn get_latest_wait(&self) -> Result<Rid, ParlogError> {
        self.core.get_latest_wait()
    }

    /// Discards pending work, quiesces the pool, and re-reconciles with
    /// storage. Called whenever the member's Raft role changes. Returns
    /// the latest stored term and index.
    pub fn settle(&self) -> Result<Rid, ParlogError> {
        self.core.settle()
    }

    /// Deletes every entry in the log. Used when entering passive mode.
    pub fn truncate(&self) -> Result<(), ParlogError> {
        self.core.truncate()
    }

    /// Diagnostic copy of the tracker state, taken under the lock.
    pub fn snapshot(&self) -> QueueState {
        let t = self.core.lock();
        let mut saving: Vec<Index> = t.saving.iter().copied().collect();
        saving.sort_unstable();
        let mut saved: Vec<Index> = t.saved.keys().copied().collect();
        saved.sort_unstable();
        QueueState {
            initialized: t.initialized,
            saved_index: t.saved_index,
            last_term: t.last_term,
            saving,
            saved,
            queued: t.work_queue.len(),
            max_gap: t.max_gap,
        }
    }

    /// Point-in-time copy of the write/delete counters.
    pub fn stats(&self) -> SaveStatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Checks that storage has not fallen behind the in-memory saved
    /// index.
    pub fn verify_saved_index(&self) -> Result<(), ParlogError> {
        // capture first; it may move on while we read storage
        let saved_index = self.core.lock().saved_index;
        match self.core.storage.get_last(self.core.member)? {
            Some(last) if last.index < saved_index => {
                logged_err!(self.core.member; Inconsistent,
                    "last stored index {} is behind saved index {}",
                    last.index, saved_index)
            }
            None if saved_index > 0 => {
                logged_err!(self.core.member; Inconsistent,
                    "log is empty but saved index is {}", saved_index)
            }
            _ => Ok(()),
        }
    }

    /// Applies reloadable settings from a re-read config. The worker pool
    /// size is read once at `start()` and is not affected.
    pub fn reload_config(&self, config: &Config) {
        self.core
            .storage_tracing
            .store(config.tracing.storage, Ordering::Relaxed);
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
