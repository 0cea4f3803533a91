//! Reconciliation with storage: startup recovery, role-change settling,
//! and log truncation.

use std::time::Duration;

use super::*;

impl SaveCore {
    /// Re-establishes the saved index from the entries currently in
    /// storage.
    ///
    /// Runs with workers quiesced; the tracker lock is held across the
    /// storage reads, the scan being bounded by the persisted max gap.
    pub(super) fn init_saved_index(&self) -> Result<(), ParlogError> {
        let mut t = self.lock();

        // only commit the new rid once everything checks out
        let mut new_last_term = t.last_term;
        let mut new_saved_index = t.saved_index;

        let mut last_index = 0;
        if let Some(entry) = self.storage.get_last(self.member)? {
            new_last_term = entry.term;
            last_index = entry.index;
        }

        // quick safety check against another process updating the same rows
        if let Some(pid) = self.storage.get_owner_pid(self.member)? {
            if pid != self.identity.pid {
                pl_warn!(self.member;
                    "another process pid={} may be updating the same rows, \
                     current pid={}",
                    pid, self.identity.pid);
            }
        }
        self.storage.set_owner_pid(self.member, &self.identity.pid)?;
        self.storage
            .set_owner_address(self.member, &self.identity.address)?;

        t.max_gap = self.storage.get_max_gap(self.member)?;
        pl_info!(self.member;
            "initializing saved index with latest=({},{}) max_gap={}",
            new_last_term, last_index, t.max_gap);

        // walk forward from just below the gap window looking for the first
        // missing index; the extra back-step of one recovers the term of
        // the entry preceding the first missing slot
        let start =
            last_index.saturating_sub(t.max_gap as Index + 1).max(1);
        for i in start..=last_index {
            match self.storage.get(self.member, i)? {
                Some(entry) => {
                    new_last_term = entry.term;
                    new_saved_index = entry.index;
                }
                None => {
                    pl_info!(self.member;
                        "index {} is missing (last={}), deleting subsequent \
                         entries",
                        i, last_index);
                    self.delete_range(
                        i + 1,
                        Some(last_index),
                        new_saved_index,
                    )?;
                    break;
                }
            }
        }

        // no gaps and no extra entries may remain
        let count = self.storage.count(self.member)?;
        if count != new_saved_index {
            return logged_err!(self.member; Inconsistent,
                "last contiguous index is {} but storage holds {} entries",
                new_saved_index, count);
        }

        t.last_term = new_last_term;
        t.saved_index = new_saved_index;
        t.work_queue.clear();
        t.saved.clear();
        t.saving.clear();

        t.initialized = true;
        self.index_initialized.notify_all();

        // all gaps removed, so reset the persisted bound
        self.storage.set_max_gap(self.member, 0)?;
        t.max_gap = 0;
        Ok(())
    }

    /// Discards pending work, waits for every worker to park on the queue,
    /// then re-runs the reconciler and snapshots the result.
    pub(super) fn settle(&self) -> Result<Rid, ParlogError> {
        {
            let mut t = self.lock();
            pl_info!(self.member;
                "settling storage, queued={} waiters={} max_gap={}",
                t.work_queue.len(), t.num_waiters, t.max_gap);

            // drop the pending requests
            t.work_queue.clear();

            // a worker stuck inside a storage call keeps this looping; the
            // timed wait only bounds each check
            // TODO: force-abort a worker that never returns from storage
            while t.num_workers > 0 && t.num_waiters < t.num_workers {
                if t.shutting_down {
                    return Err(ParlogError::Cancelled);
                }
                let (guard, _) = self
                    .queue_nonempty
                    .wait_timeout(t, Duration::from_millis(100))
                    .expect("tracker mutex poisoned");
                t = guard;
            }
        }

        self.init_saved_index()?;
        self.get_latest()
    }

    /// Deletes every entry in the log, then settles into the fresh empty
    /// state.
    pub(super) fn truncate(&self) -> Result<(), ParlogError> {
        pl_info!(self.member; "deleting all records in the log");
        if let Some(last) = self.storage.get_last(self.member)? {
            let saved_index = self.lock().saved_index;
            self.delete_range(1, Some(last.index), saved_index)?;
        }
        {
            let mut t = self.lock();
            t.last_term = 0;
            t.saved_index = 0;
        }

        // pick up the fresh new log state
        let rid = self.settle()?;
        if rid != Rid::default() {
            return logged_err!(self.member; Inconsistent,
                "log is not empty after truncation, latest=({},{})",
                rid.term, rid.index);
        }
        Ok(())
    }

    /// Deletes entries in `[from, to]`, highest index first, so the log
    /// stays contiguous from the bottom and the persisted max gap never
    /// needs to grow mid-delete. A `to` of `None` is re-resolved from the
    /// last stored entry. Returns the number of entries actually deleted.
    pub(super) fn delete_range(
        &self,
        from: Index,
        to: Option<Index>,
        saved_index: Index,
    ) -> Result<u64, ParlogError> {
        let to = match to {
            Some(to) => to,
            None => match self.storage.get_last(self.member)? {
                Some(entry) => entry.index.max(saved_index),
                None => saved_index,
            },
        };

        let mut deleted = 0;
        for i in (from..=to).rev() {
            if self.storage.get(self.member, i)?.is_some() {
                pl_info!(self.member; "deleting index {}", i);
                self.storage.delete(self.member, i)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.stats.record_deleted(deleted);
        }
        Ok(deleted)
    }
}
