//! Per-directory package index and its wire formats.
//!
//! The index is populated concurrently through a [`PackageIndexBuilder`] and
//! frozen into an immutable [`PackageIndex`] once every scan task has
//! finished. All serializations walk the entries in filename order so that
//! output is reproducible for the same set of files.

use crate::package::PackageRecord;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, lock-guarded collection of records under construction.
#[derive(Clone, Debug, Default)]
pub struct PackageIndexBuilder {
    entries: Arc<Mutex<BTreeMap<String, PackageRecord>>>,
}

impl PackageIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same filename.
    pub fn insert(&self, record: PackageRecord) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(record.filename.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the collected records into an immutable index.
    ///
    /// Must only be called after every writer has finished. Clones still held
    /// elsewhere keep their own view; the frozen index is a snapshot.
    pub fn freeze(self) -> PackageIndex {
        let entries = match Arc::try_unwrap(self.entries) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        PackageIndex { entries }
    }
}

/// Immutable set of package records for one directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageIndex {
    entries: BTreeMap<String, PackageRecord>,
}

impl PackageIndex {
    /// Build an index directly from records.
    pub fn from_records(records: impl IntoIterator<Item = PackageRecord>) -> Self {
        Self {
            entries: records
                .into_iter()
                .map(|record| (record.filename.clone(), record))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a record by archive filename.
    pub fn get(&self, filename: &str) -> Option<&PackageRecord> {
        self.entries.get(filename)
    }

    /// Records in filename order.
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.entries.values()
    }

    /// Filenames in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sum of all archive sizes.
    pub fn total_size(&self) -> u64 {
        self.records().map(|r| r.size).sum()
    }

    /// Render the `Packages` document.
    ///
    /// Each stanza is the record's control text followed by `Filename`,
    /// `Size` and one line per computed checksum, then a blank line.
    pub fn to_packages_text(&self) -> String {
        let mut out = String::new();
        for record in self.records() {
            record.write_stanza(&mut out);
            out.push('\n');
        }
        out
    }

    /// Render the `Packages.stamps` document: one line per record with the
    /// filename followed by its checksums.
    pub fn to_stamps_text(&self) -> String {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&record.filename);
            for (_, digest) in record.checksums.fields() {
                out.push(' ');
                out.push_str(digest);
            }
            out.push('\n');
        }
        out
    }
}
