//! Snapshot diff engine
//!
//! Compares two full listings of one directory and produces semantic changes:
//! renames are recognised by inode, a name reused by a different inode is a
//! delete followed by a create, and metadata changes on a stable (name, inode)
//! pair become CHANGED or ATTRIBUTE_CHANGED.

use crate::error::MonitorError;
use crate::snapshot::{DirectoryEntry, Snapshot};
use ahash::{AHashMap, AHashSet};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// One semantic difference between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// New name, not explained by a rename
    Created { name: OsString, inode: u64 },
    /// Name is gone, not explained by a rename
    Deleted { name: OsString, inode: u64 },
    /// Same inode under a new name; replaces `to` if it existed
    Renamed {
        from: OsString,
        to: OsString,
        inode: u64,
    },
    /// Size or mtime changed
    Changed { name: OsString },
    /// Only mode or ctime changed
    AttributeChanged { name: OsString },
}

impl Change {
    /// Name the change is primarily about
    pub fn name(&self) -> &OsStr {
        match self {
            Change::Created { name, .. }
            | Change::Deleted { name, .. }
            | Change::Changed { name }
            | Change::AttributeChanged { name } => name,
            Change::Renamed { from, .. } => from,
        }
    }

    /// Inode usable as a move correlation key
    pub fn inode(&self) -> Option<u64> {
        match self {
            Change::Created { inode, .. }
            | Change::Deleted { inode, .. }
            | Change::Renamed { inode, .. } => Some(*inode),
            Change::Changed { .. } | Change::AttributeChanged { .. } => None,
        }
    }
}

/// Ordered list of changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub changes: Vec<Change>,
}

impl SnapshotDiff {
    /// Compute the diff between two snapshots of the same directory
    ///
    /// Emission order: renames and creations in `current` order, then deletions
    /// (and delete+create replacements) in `previous` order, then metadata changes.
    pub fn compute(previous: &Snapshot, current: &Snapshot) -> Self {
        let mut changes = Vec::new();
        // previous entries consumed as a rename source
        let mut consumed = vec![false; previous.len()];
        // names in `current` that a rename landed on over an existing entry
        let mut renamed_over: AHashSet<&OsStr> = AHashSet::new();

        for cur in current.iter() {
            let same_name = previous.get(&cur.name);
            if matches!(same_name, Some(prev) if prev.inode == cur.inode) {
                continue;
            }

            // First unconsumed entry with this inode whose name is gone from `current`
            let source = previous
                .positions_of_inode(cur.inode)
                .iter()
                .copied()
                .find(|&idx| {
                    let prev = previous.entry(idx);
                    !consumed[idx] && prev.name != cur.name && !current.contains(&prev.name)
                });

            match source {
                Some(idx) => {
                    consumed[idx] = true;
                    if same_name.is_some() {
                        renamed_over.insert(cur.name.as_os_str());
                    }
                    changes.push(Change::Renamed {
                        from: previous.entry(idx).name.clone(),
                        to: cur.name.clone(),
                        inode: cur.inode,
                    });
                }
                None if same_name.is_none() => changes.push(Change::Created {
                    name: cur.name.clone(),
                    inode: cur.inode,
                }),
                // Same name, new inode: reported as a replacement below
                None => {}
            }
        }

        for (idx, prev) in previous.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            match current.get(&prev.name) {
                None => changes.push(Change::Deleted {
                    name: prev.name.clone(),
                    inode: prev.inode,
                }),
                Some(cur) if cur.inode != prev.inode => {
                    if renamed_over.contains(prev.name.as_os_str()) {
                        continue;
                    }
                    changes.push(Change::Deleted {
                        name: prev.name.clone(),
                        inode: prev.inode,
                    });
                    changes.push(Change::Created {
                        name: cur.name.clone(),
                        inode: cur.inode,
                    });
                }
                Some(_) => {}
            }
        }

        for cur in current.iter() {
            let Some(prev) = previous.get(&cur.name) else {
                continue;
            };
            if prev.inode != cur.inode {
                continue;
            }
            if prev.generation.content_differs(&cur.generation) {
                changes.push(Change::Changed {
                    name: cur.name.clone(),
                });
            } else if prev.generation.attributes_differ(&cur.generation) {
                changes.push(Change::AttributeChanged {
                    name: cur.name.clone(),
                });
            }
        }

        Self { changes }
    }

    /// Check if there are any changes
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Get the number of changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Replay the changes onto `previous`
    ///
    /// Inodes come from the changes themselves; generations of touched names are
    /// taken from `current`, untouched entries keep their `previous` generation.
    pub fn apply(&self, previous: &Snapshot, current: &Snapshot) -> Snapshot {
        let mut entries: AHashMap<OsString, DirectoryEntry> = previous
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();

        let generation_of = |name: &OsStr| {
            current
                .get(name)
                .map(|e| e.generation)
                .unwrap_or_default()
        };

        for change in &self.changes {
            match change {
                Change::Created { name, inode } => {
                    entries.insert(
                        name.clone(),
                        DirectoryEntry::new(name.clone(), *inode, generation_of(name)),
                    );
                }
                Change::Deleted { name, .. } => {
                    entries.remove(name);
                }
                Change::Renamed { from, to, .. } => {
                    if let Some(moved) = entries.remove(from) {
                        entries.insert(
                            to.clone(),
                            DirectoryEntry::new(to.clone(), moved.inode, generation_of(to)),
                        );
                    }
                }
                Change::Changed { name } | Change::AttributeChanged { name } => {
                    if let Some(entry) = entries.get_mut(name) {
                        entry.generation = generation_of(name);
                    }
                }
            }
        }

        Snapshot::from_entries(previous.directory(), entries.into_values().collect())
    }
}

impl IntoIterator for SnapshotDiff {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Stateful diff driver for one watched directory
///
/// The first snapshot establishes the baseline and produces no changes.
#[derive(Debug)]
pub struct DiffEngine {
    directory: PathBuf,
    previous: Option<Snapshot>,
}

impl DiffEngine {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            previous: None,
        }
    }

    /// Capture the baseline synchronously
    pub fn with_baseline(directory: &Path) -> Result<Self, MonitorError> {
        let baseline = Snapshot::capture(directory)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            previous: Some(baseline),
        })
    }

    /// Diff `current` against the last snapshot and make it the new baseline
    pub fn advance(&mut self, current: Snapshot) -> SnapshotDiff {
        let diff = match &self.previous {
            Some(previous) => SnapshotDiff::compute(previous, &current),
            None => SnapshotDiff::default(),
        };
        self.previous = Some(current);
        diff
    }

    /// Capture a fresh listing and diff it
    ///
    /// On failure the baseline is left untouched.
    pub fn rescan(&mut self) -> Result<SnapshotDiff, MonitorError> {
        let current = Snapshot::capture(&self.directory)?;
        Ok(self.advance(current))
    }

    /// Last captured snapshot
    pub fn baseline(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
