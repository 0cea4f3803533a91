//! In-memory storage adapter, for tests and embedded single-process use.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::utils::ParlogError;

use bytes::Bytes;

use super::{Index, LogEntry, MemberId, Storage, Term};

/// Rows and metadata slots of a single member.
#[derive(Default)]
struct MemberRows {
    entries: BTreeMap<Index, (Term, Bytes)>,
    max_gap: u32,
    owner_pid: Option<String>,
    owner_address: Option<String>,
}

/// Hash-map-backed storage adapter. Infallible except for occupied-index
/// appends.
#[derive(Default)]
pub struct MemoryStorage {
    members: Mutex<HashMap<MemberId, MemberRows>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rows<T>(
        &self,
        member: MemberId,
        f: impl FnOnce(&mut MemberRows) -> T,
    ) -> T {
        let mut members =
            self.members.lock().expect("memory storage mutex poisoned");
        f(members.entry(member).or_default())
    }
}

impl Storage for MemoryStorage {
    fn get_last(
        &self,
        member: MemberId,
    ) -> Result<Option<LogEntry>, ParlogError> {
        Ok(self.with_rows(member, |rows| {
            rows.entries.iter().next_back().map(|(index, (term, payload))| {
                LogEntry {
                    term: *term,
                    index: *index,
                    payload: payload.clone(),
                }
            })
        }))
    }

    fn get(
        &self,
        member: MemberId,
        index: Index,
    ) -> Result<Option<LogEntry>, ParlogError> {
        Ok(self.with_rows(member, |rows| {
            rows.entries.get(&index).map(|(term, payload)| LogEntry {
                term: *term,
                index,
                payload: payload.clone(),
            })
        }))
    }

    fn append(
        &self,
        member: MemberId,
        term: Term,
        index: Index,
        payload: &[u8],
    ) -> Result<(), ParlogError> {
        self.with_rows(member, |rows| {
            if rows.entries.contains_key(&index) {
                return Err(ParlogError::Storage(format!(
                    "index {} is already occupied",
                    index
                )));
            }
            rows.entries
                .insert(index, (term, Bytes::copy_from_slice(payload)));
            Ok(())
        })
    }

    fn delete(
        &self,
        member: MemberId,
        index: Index,
    ) -> Result<(), ParlogError> {
        self.with_rows(member, |rows| {
            rows.entries.remove(&index);
        });
        Ok(())
    }

    fn count(&self, member: MemberId) -> Result<u64, ParlogError> {
        Ok(self.with_rows(member, |rows| rows.entries.len() as u64))
    }

    fn get_max_gap(&self, member: MemberId) -> Result<u32, ParlogError> {
        Ok(self.with_rows(member, |rows| rows.max_gap))
    }

    fn set_max_gap(
        &self,
        member: MemberId,
        gap: u32,
    ) -> Result<(), ParlogError> {
        self.with_rows(member, |rows| rows.max_gap = gap);
        Ok(())
    }

    fn get_owner_pid(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError> {
        Ok(self.with_rows(member, |rows| rows.owner_pid.clone()))
    }

    fn set_owner_pid(
        &self,
        member: MemberId,
        pid: &str,
    ) -> Result<(), ParlogError> {
        self.with_rows(member, |rows| rows.owner_pid = Some(pid.into()));
        Ok(())
    }

    fn get_owner_address(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError> {
        Ok(self.with_rows(member, |rows| rows.owner_address.clone()))
    }

    fn set_owner_address(
        &self,
        member: MemberId,
        address: &str,
    ) -> Result<(), ParlogError> {
        self.with_rows(member, |rows| {
            rows.owner_address = Some(address.into())
        });
        Ok(())
    }
}
