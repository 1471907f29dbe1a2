use crate::store::Store;
use std::io::{self, Write};

/// A point-in-time copy of the table, taken under the exclusive table lock
/// and streamed out afterwards with no lock held.
///
/// Entries are in bucket-traversal order - the same order `SHOW` prints -
/// so a snapshot file and a listing of the same state are byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    entries: Vec<(String, String)>,
}

impl TableSnapshot {
    pub(crate) fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Writes the snapshot in listing format, one `(key, value)` per line.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        for (key, value) in &self.entries {
            writeln!(out, "({key}, {value})")?;
        }
        Ok(())
    }
}

/// Writes the live table in listing format, quiescing mutators for the
/// duration; used by `SHOW`.
pub fn write_listing(store: &Store, out: &mut impl Write) -> io::Result<()> {
    let mut result = Ok(());
    store.for_each(|key, value| {
        if result.is_ok() {
            result = writeln!(out, "({key}, {value})");
        }
    });
    result
}
