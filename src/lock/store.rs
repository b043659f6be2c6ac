//! LockStore trait and the file-backed store.
//!
//! The record is claimed by hard-linking a fully written temp file onto
//! the lock path. `link(2)` fails with `EEXIST` when the path is taken, so
//! the claim is atomic and a reader never observes a half-written record.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Local};

use super::LockError;

/// Raw lock artifact contents plus its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub contents: String,
    pub modified: Option<DateTime<Local>>,
}

/// Persistence for the single lock record.
pub trait LockStore {
    /// Read the record, `Ok(None)` if it does not exist.
    fn read(&self) -> Result<Option<StoredRecord>, LockError>;

    /// Create the record naming `owner` only if none exists.
    ///
    /// Returns `Ok(false)` when another record is already present.
    fn create_exclusive(&self, owner: i32) -> Result<bool, LockError>;

    /// Replace whatever record exists with one naming `owner`.
    fn overwrite(&self, owner: i32) -> Result<(), LockError>;

    /// Delete the record. Deleting a missing record is not an error.
    fn remove(&self) -> Result<(), LockError>;
}

impl<T: LockStore + ?Sized> LockStore for &T {
    fn read(&self) -> Result<Option<StoredRecord>, LockError> {
        (**self).read()
    }

    fn create_exclusive(&self, owner: i32) -> Result<bool, LockError> {
        (**self).create_exclusive(owner)
    }

    fn overwrite(&self, owner: i32) -> Result<(), LockError> {
        (**self).overwrite(owner)
    }

    fn remove(&self) -> Result<(), LockError> {
        (**self).remove()
    }
}

/// Lock record kept as a one-line text file.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    path: PathBuf,
}

impl FileLockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn io_err(&self, op: &'static str, source: io::Error) -> LockError {
        LockError::Io {
            op,
            path: self.path.clone(),
            source,
        }
    }

    /// Write `owner` into a private sibling temp file and return its path.
    fn write_temp(&self, owner: i32) -> Result<PathBuf, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err("create_dir", e))?;
        }
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{owner}.tmp"));
        let temp = self.path.with_file_name(name);

        let mut file = fs::File::create(&temp).map_err(|e| self.io_err("write", e))?;
        file.write_all(format!("{owner}\n").as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| {
                let _ = fs::remove_file(&temp);
                self.io_err("write", e)
            })?;
        Ok(temp)
    }
}

impl LockStore for FileLockStore {
    fn read(&self) -> Result<Option<StoredRecord>, LockError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err("read", e)),
        };
        let modified = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Local>::from);
        Ok(Some(StoredRecord { contents, modified }))
    }

    fn create_exclusive(&self, owner: i32) -> Result<bool, LockError> {
        let temp = self.write_temp(owner)?;
        let linked = fs::hard_link(&temp, &self.path);
        let _ = fs::remove_file(&temp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_err("create", e)),
        }
    }

    fn overwrite(&self, owner: i32) -> Result<(), LockError> {
        let temp = self.write_temp(owner)?;
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            self.io_err("overwrite", e)
        })
    }

    fn remove(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err("remove", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn create_exclusive_writes_owner_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));

        assert!(store.create_exclusive(9999).unwrap());

        let record = store.read().unwrap().expect("record exists");
        assert_eq!(record.contents, "9999\n");
        assert!(record.modified.is_some());
    }

    #[test]
    fn create_exclusive_loses_to_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));

        assert!(store.create_exclusive(100).unwrap());
        assert!(!store.create_exclusive(200).unwrap());

        assert_eq!(store.read().unwrap().unwrap().contents, "100\n");
    }

    #[test]
    fn temp_files_do_not_linger() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));

        store.create_exclusive(100).unwrap();
        store.create_exclusive(200).unwrap();
        store.overwrite(300).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("wezfocus.lock")]);
    }

    #[test]
    fn overwrite_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));

        store.create_exclusive(100).unwrap();
        store.overwrite(200).unwrap();

        assert_eq!(store.read().unwrap().unwrap().contents, "200\n");
    }

    #[test]
    fn creates_missing_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("nested/run/wezfocus.lock"));
        assert!(store.create_exclusive(42).unwrap());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockStore::new(dir.path().join("wezfocus.lock"));

        store.create_exclusive(1234).unwrap();
        store.remove().unwrap();
        store.remove().unwrap();

        assert_eq!(store.read().unwrap(), None);
    }
}
