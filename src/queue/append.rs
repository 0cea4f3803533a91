//! Append handling: decide under the lock, write outside it, reconcile.

use super::*;

impl SaveCore {
    /// Saves the entry of `req` at index `req.prev_index + 1`.
    ///
    /// Re-sent requests are absorbed by the in-flight / out-of-order /
    /// below-prefix checks, so at most one worker ever writes a given
    /// index. A request at or below the saved index whose payload differs
    /// from the stored bytes is a divergence forced by the consensus layer:
    /// the saved index steps back to just below it and the obsolete suffix
    /// is deleted before the new entry is written.
    ///
    /// Callers must not enqueue a divergent overwrite while earlier appends
    /// are still racing; completions that land above the in-flight maximum
    /// during the overwrite are not chased by the deletion.
    pub(super) fn handle_append(
        &self,
        req: &AppendRequest,
    ) -> Result<(), ParlogError> {
        let index = req.prev_index + 1;
        let mut deleted = 0;

        // phase one: decide, under the lock
        {
            let mut t = self.lock();
            if t.shutting_down {
                return Err(ParlogError::Cancelled);
            }

            if t.saving.contains(&index) {
                if self.tracing() {
                    pl_info!(self.member;
                        "index {} is currently being saved, ignoring", index);
                }
                return Ok(());
            }

            if index <= t.saved_index {
                // possibly overwriting an already-saved entry
                let existing = match self.storage.get(self.member, index)? {
                    Some(entry) => entry,
                    None => {
                        return logged_err!(self.member; Inconsistent,
                            "cannot retrieve index {} although saved index \
                             is {}",
                            index, t.saved_index);
                    }
                };
                let identical = existing.payload == req.payload;
                pl_info!(self.member;
                    "overwriting index {} below saved index {}, contents \
                     are {}",
                    index, t.saved_index,
                    if identical { "identical" } else { "different" });
                if identical {
                    return Ok(());
                }

                t.saved_index = index - 1;
                pl_info!(self.member;
                    "stepping saved index back to {} and deleting \
                     subsequent entries",
                    t.saved_index);
                let last_to_delete = t.saving.iter().max().copied();
                deleted =
                    self.delete_range(index, last_to_delete, t.saved_index)?;
                self.stats.record_overwrite();
            } else if t.saved.contains_key(&index) {
                if self.tracing() {
                    pl_info!(self.member;
                        "index {} has already been saved, ignoring", index);
                }
                return Ok(());
            } else {
                // widen the persisted gap bound before admitting the write
                let gap = (index - t.saved_index).max(t.max_gap as Index);
                if gap > t.max_gap as Index {
                    // round up to the next multiple of 10
                    let gap = ((gap - 1) / 10 + 1) * 10;
                    if self.tracing() || gap % 100 == 0 {
                        pl_info!(self.member;
                            "increasing max gap from {} to {}",
                            t.max_gap, gap);
                    }
                    self.storage.set_max_gap(self.member, gap as u32)?;
                    t.max_gap = gap as u32;
                }
            }
            t.saving.insert(index);
        }

        // an overwrite's deletions are permanent whether or not the
        // re-append below succeeds, so report them before the write
        if deleted > 0 {
            self.notifier.index_updated(false, true);
        }

        // phase two: write, without holding the lock
        if let Err(e) =
            self.storage
                .append(self.member, req.entry_term, index, &req.payload)
        {
            // un-claim the index so a retry of this entry is accepted
            let mut t = self.lock();
            t.saving.remove(&index);
            return Err(e);
        }
        if self.tracing() {
            let t = self.lock();
            pl_info!(self.member;
                "insert(term={} index={} size={}) waiters={} saved={}",
                req.entry_term, index, req.payload.len(),
                t.num_waiters, t.saved.len());
        }
        self.stats.record_saved(req.payload.len());

        // phase three: reconcile, under the lock
        let advanced;
        {
            let mut t = self.lock();
            if !t.saving.remove(&index) {
                pl_warn!(self.member;
                    "index {} was already removed from the in-flight set",
                    index);
            }

            let before = t.saved_index;
            let mut at = index;
            if at == t.saved_index + 1 {
                t.saved_index = at;
                t.last_term = req.entry_term;
                at += 1;

                // drain the contiguous run of out-of-order completions
                let first = at;
                while let Some(term) = t.saved.remove(&at) {
                    t.last_term = term;
                    t.saved_index = at;
                    at += 1;
                }
                if at > first && self.tracing() {
                    pl_info!(self.member;
                        "pulled indexes {} to {} out of the out-of-order \
                         set, {} remaining",
                        first, at - 1, t.saved.len());
                }
            } else if at > t.saved_index {
                t.saved.insert(at, req.entry_term);
            } else {
                // an overwrite advanced past this worker's write
                pl_warn!(self.member;
                    "saved index {} already passed index {}",
                    t.saved_index, at);
            }
            advanced = t.saved_index > before;
        }

        if deleted > 0 || advanced {
            self.notifier.index_updated(false, deleted > 0);
        }
        Ok(())
    }
}
