//! File-backed storage adapter: one directory per member, one encoded
//! entry file per log index.
//!
//! The layout trades write batching for a trivially correct rendition of
//! the random-access contract: `create_new` enforces the occupied-index
//! rule, deletion is a file removal, and a half-written entry from a crash
//! is confined to its own index, which the save queue's reconciler already
//! knows how to discard.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::utils::ParlogError;

use bytes::Bytes;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use super::{Index, LogEntry, MemberId, Storage, Term};

const ENTRY_SUFFIX: &str = ".ent";
const MAX_GAP_FILE: &str = "max_gap";
const OWNER_PID_FILE: &str = "owner_pid";
const OWNER_ADDRESS_FILE: &str = "owner_address";

/// Directory-per-member durable storage adapter.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens the storage rooted at the given directory, creating it if
    /// needed.
    pub fn open(root: &Path) -> Result<Self, ParlogError> {
        fs::create_dir_all(root)?;
        Ok(FileStorage {
            root: root.to_path_buf(),
        })
    }

    fn member_dir(&self, member: MemberId) -> Result<PathBuf, ParlogError> {
        let dir = self.root.join(format!("m{}", member));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    // Zero-padded so that plain name order equals index order.
    fn entry_path(dir: &Path, index: Index) -> PathBuf {
        dir.join(format!("{:020}{}", index, ENTRY_SUFFIX))
    }

    fn read_slot(
        &self,
        member: MemberId,
        name: &str,
    ) -> Result<Option<String>, ParlogError> {
        match fs::read_to_string(self.member_dir(member)?.join(name)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_slot(
        &self,
        member: MemberId,
        name: &str,
        value: &str,
    ) -> Result<(), ParlogError> {
        fs::write(self.member_dir(member)?.join(name), value)?;
        Ok(())
    }

    fn scan_indexes(
        &self,
        member: MemberId,
    ) -> Result<Vec<Index>, ParlogError> {
        let mut indexes = Vec::new();
        for dent in fs::read_dir(self.member_dir(member)?)? {
            let name = dent?.file_name();
            if let Some(stem) =
                name.to_string_lossy().strip_suffix(ENTRY_SUFFIX)
            {
                if let Ok(index) = stem.parse::<Index>() {
                    indexes.push(index);
                }
            }
        }
        Ok(indexes)
    }
}

impl Storage for FileStorage {
    fn get_last(
        &self,
        member: MemberId,
    ) -> Result<Option<LogEntry>, ParlogError> {
        match self.scan_indexes(member)?.into_iter().max() {
            Some(index) => self.get(member, index),
            None => Ok(None),
        }
    }

    fn get(
        &self,
        member: MemberId,
        index: Index,
    ) -> Result<Option<LogEntry>, ParlogError> {
        let path = Self::entry_path(&self.member_dir(member)?, index);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let entry: LogEntry = decode_from_slice(&buf)?;
        Ok(Some(entry))
    }

    fn append(
        &self,
        member: MemberId,
        term: Term,
        index: Index,
        payload: &[u8],
    ) -> Result<(), ParlogError> {
        let bytes = encode_to_vec(&LogEntry {
            term,
            index,
            payload: Bytes::copy_from_slice(payload),
        })?;
        let path = Self::entry_path(&self.member_dir(member)?, index);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    }

    fn delete(
        &self,
        member: MemberId,
        index: Index,
    ) -> Result<(), ParlogError> {
        let path = Self::entry_path(&self.member_dir(member)?, index);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn count(&self, member: MemberId) -> Result<u64, ParlogError> {
        Ok(self.scan_indexes(member)?.len() as u64)
    }

    fn get_max_gap(&self, member: MemberId) -> Result<u32, ParlogError> {
        match self.read_slot(member, MAX_GAP_FILE)? {
            Some(text) => text.trim().parse::<u32>().map_err(|e| {
                ParlogError::Storage(format!("malformed max_gap slot: {}", e))
            }),
            None => Ok(0),
        }
    }

    fn set_max_gap(
        &self,
        member: MemberId,
        gap: u32,
    ) -> Result<(), ParlogError> {
        self.write_slot(member, MAX_GAP_FILE, &gap.to_string())
    }

    fn get_owner_pid(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError> {
        self.read_slot(member, OWNER_PID_FILE)
    }

    fn set_owner_pid(
        &self,
        member: MemberId,
        pid: &str,
    ) -> Result<(), ParlogError> {
        self.write_slot(member, OWNER_PID_FILE, pid)
    }

    fn get_owner_address(
        &self,
        member: MemberId,
    ) -> Result<Option<String>, ParlogError> {
        self.read_slot(member, OWNER_ADDRESS_FILE)
    }

    fn set_owner_address(
        &self,
        member: MemberId,
        address: &str,
    ) -> Result<(), ParlogError> {
        self.write_slot(member, OWNER_ADDRESS_FILE, address)
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;

    #[test]
    fn append_and_lookup() -> Result<(), ParlogError> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::open(dir.path())?;
        storage.append(1, 3, 7, b"seventh")?;
        storage.append(1, 3, 2, b"second")?;
        assert_eq!(
            storage.get(1, 7)?,
            Some(LogEntry {
                term: 3,
                index: 7,
                payload: Bytes::from_static(b"seventh"),
            })
        );
        assert_eq!(storage.get(1, 4)?, None);
        assert_eq!(storage.get_last(1)?.map(|e| e.index), Some(7));
        assert_eq!(storage.count(1)?, 2);
        Ok(())
    }

    #[test]
    fn occupied_append_rejected() -> Result<(), ParlogError> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::open(dir.path())?;
        storage.append(1, 1, 1, b"first")?;
        assert!(storage.append(1, 2, 1, b"usurper").is_err());
        assert_eq!(
            storage.get(1, 1)?.map(|e| e.payload),
            Some(Bytes::from_static(b"first"))
        );
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> Result<(), ParlogError> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::open(dir.path())?;
        storage.append(1, 1, 1, b"entry")?;
        storage.delete(1, 1)?;
        storage.delete(1, 1)?;
        assert_eq!(storage.count(1)?, 0);
        Ok(())
    }

    #[test]
    fn survives_reopen() -> Result<(), ParlogError> {
        let dir = tempfile::tempdir()?;
        {
            let storage = FileStorage::open(dir.path())?;
            storage.append(1, 1, 1, b"persisted")?;
            storage.set_max_gap(1, 20)?;
            storage.set_owner_pid(1, "pid-9")?;
        }
        let storage = FileStorage::open(dir.path())?;
        assert_eq!(storage.get(1, 1)?.map(|e| e.index), Some(1));
        assert_eq!(storage.get_max_gap(1)?, 20);
        assert_eq!(storage.get_owner_pid(1)?, Some("pid-9".into()));
        Ok(())
    }

    #[test]
    fn members_are_isolated() -> Result<(), ParlogError> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::open(dir.path())?;
        storage.append(1, 1, 1, b"of-member-1")?;
        assert_eq!(storage.count(2)?, 0);
        assert_eq!(storage.get_last(2)?, None);
        Ok(())
    }
}
