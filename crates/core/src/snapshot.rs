//! Directory snapshots for diff-based backends

use crate::error::MonitorError;
use ahash::AHashMap;
use smallvec::SmallVec;
use std::ffi::{OsStr, OsString};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Change stamp of a directory entry
///
/// Content generation is size + mtime; attribute generation is mode + ctime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation {
    /// Size in bytes
    pub len: u64,
    /// Last modification time
    pub modified: Option<SystemTime>,
    /// Permission bits and file type (0 where unavailable)
    pub mode: u32,
    /// Status change time in nanoseconds since the epoch (0 where unavailable)
    pub status_changed_ns: i128,
}

impl Generation {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            mode: mode_of(metadata),
            status_changed_ns: ctime_of(metadata),
        }
    }

    /// Size or mtime differ
    pub fn content_differs(&self, other: &Generation) -> bool {
        self.len != other.len || self.modified != other.modified
    }

    /// Mode or ctime differ
    pub fn attributes_differ(&self, other: &Generation) -> bool {
        self.mode != other.mode || self.status_changed_ns != other.status_changed_ns
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// File name within the directory
    pub name: OsString,
    /// Inode number (a name hash on platforms without inodes)
    pub inode: u64,
    /// Change stamp
    pub generation: Generation,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<OsString>, inode: u64, generation: Generation) -> Self {
        Self {
            name: name.into(),
            inode,
            generation,
        }
    }
}

/// Immutable capture of a directory's entries at one instant
///
/// Entries keep their capture order; name and inode lookups are indexed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Directory the snapshot was taken of
    directory: PathBuf,
    /// Entries in iteration order
    entries: Vec<DirectoryEntry>,
    /// name -> position in `entries`
    by_name: AHashMap<OsString, usize>,
    /// inode -> positions in `entries` (several for hard links)
    by_inode: AHashMap<u64, SmallVec<[usize; 1]>>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn empty(directory: impl Into<PathBuf>) -> Self {
        Self::from_entries(directory, Vec::new())
    }

    /// Build a snapshot from entries in the given order
    ///
    /// A repeated name keeps its first occurrence.
    pub fn from_entries(directory: impl Into<PathBuf>, entries: Vec<DirectoryEntry>) -> Self {
        let mut snapshot = Self {
            directory: directory.into(),
            entries: Vec::with_capacity(entries.len()),
            by_name: AHashMap::with_capacity(entries.len()),
            by_inode: AHashMap::with_capacity(entries.len()),
        };

        for entry in entries {
            if snapshot.by_name.contains_key(&entry.name) {
                continue;
            }
            let idx = snapshot.entries.len();
            snapshot.by_name.insert(entry.name.clone(), idx);
            snapshot.by_inode.entry(entry.inode).or_default().push(idx);
            snapshot.entries.push(entry);
        }

        snapshot
    }

    /// Capture a full listing of `directory`
    ///
    /// Entries are sorted by name so iteration order is deterministic. An entry
    /// that disappears between listing and stat is left out; any failure of the
    /// listing itself fails the whole capture (never a partial snapshot).
    pub fn capture(directory: &Path) -> Result<Self, MonitorError> {
        let read_dir =
            fs::read_dir(directory).map_err(|e| MonitorError::capture(directory, e))?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| MonitorError::capture(directory, e))?;
            let name = item.file_name();

            let metadata = match fs::symlink_metadata(item.path()) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(MonitorError::capture(directory, e)),
            };

            let inode = inode_of(&metadata, &name);
            entries.push(DirectoryEntry::new(
                name,
                inode,
                Generation::from_metadata(&metadata),
            ));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::trace!(
            "Captured {} entries of {}",
            entries.len(),
            directory.display()
        );
        Ok(Self::from_entries(directory, entries))
    }

    /// Get an entry by name
    pub fn get(&self, name: &OsStr) -> Option<&DirectoryEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Positions of entries sharing `inode`, in iteration order
    pub fn positions_of_inode(&self, inode: u64) -> &[usize] {
        self.by_inode
            .get(&inode)
            .map(|positions| positions.as_slice())
            .unwrap_or(&[])
    }

    /// Entry at a position
    pub fn entry(&self, idx: usize) -> &DirectoryEntry {
        &self.entries[idx]
    }

    /// Iterate entries in order
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }

    /// Check if the snapshot has an entry named `name`
    pub fn contains(&self, name: &OsStr) -> bool {
        self.by_name.contains_key(name)
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory the snapshot belongs to
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `(name, inode)` pairs in order
    pub fn names_and_inodes(&self) -> Vec<(OsString, u64)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.inode))
            .collect()
    }
}

impl PartialEq for Snapshot {
    /// Two snapshots are equal when they hold the same entries, regardless of order
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|e| other.get(&e.name) == Some(e))
    }
}

#[cfg(unix)]
fn inode_of(metadata: &Metadata, _name: &OsStr) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode_of(_metadata: &Metadata, name: &OsStr) -> u64 {
    // Fallback: hash of the name, so renames are never paired by inode
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    u32::from(metadata.permissions().readonly())
}

#[cfg(unix)]
fn ctime_of(metadata: &Metadata) -> i128 {
    use std::os::unix::fs::MetadataExt;
    i128::from(metadata.ctime()) * 1_000_000_000 + i128::from(metadata.ctime_nsec())
}

#[cfg(not(unix))]
fn ctime_of(_metadata: &Metadata) -> i128 {
    0
}
