//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: used by node.rs for replication, persisted via raft-storage
//! what: LogEntry struct, RaftLog with 1-based indexing, dirty-suffix tracking

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};
use crate::Term;

/// A single entry in the replicated log
///
/// The command is opaque to the consensus core; it defaults to raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<C = Vec<u8>> {
    /// The command to be applied to the state machine
    pub command: C,
    /// The term when this entry was created
    pub term: Term,
}

impl<C> LogEntry<C> {
    /// Create a new log entry
    pub fn new(term: Term, command: C) -> Self {
        Self { command, term }
    }
}

/// The replicated log of a single node.
///
/// Real entries live at indices `1..=last_index()`. Index 0 is the implicit
/// empty prefix every log agrees on, with term 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftLog<C = Vec<u8>> {
    entries: Vec<LogEntry<C>>,
    /// lowest index modified since the last `take_unsynced`
    unsynced_from: Option<u64>,
}

impl<C> Default for RaftLog<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            unsynced_from: None,
        }
    }
}

impl<C: Clone> RaftLog<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from entries that are already durable (crash recovery)
    pub fn from_persisted(entries: Vec<LogEntry<C>>) -> Self {
        Self {
            entries,
            unsynced_from: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Entry at a 1-based index
    pub fn get(&self, index: u64) -> Result<&LogEntry<C>> {
        if index == 0 || index > self.last_index() {
            return Err(RaftError::IndexOutOfRange {
                index,
                last_index: self.last_index(),
            });
        }
        Ok(&self.entries[(index - 1) as usize])
    }

    /// Term at `index`; 0 for the reserved index and for anything past the end
    pub fn term_at(&self, index: u64) -> Term {
        self.get(index).map(|e| e.term).unwrap_or(0)
    }

    /// Append entries to the tail as one unit
    pub fn append(&mut self, entries: impl IntoIterator<Item = LogEntry<C>>) {
        let first_new = self.last_index() + 1;
        let before = self.entries.len();
        self.entries.extend(entries);
        if self.entries.len() > before {
            self.mark_unsynced(first_new);
        }
    }

    /// Remove every entry at `from_index` and beyond
    pub fn truncate_from(&mut self, from_index: u64) {
        let keep = from_index.saturating_sub(1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
            self.mark_unsynced(from_index.max(1));
        }
    }

    /// Cloned entries from `start_index` (inclusive) to the end
    pub fn entries_from(&self, start_index: u64) -> Vec<LogEntry<C>> {
        let start = start_index.saturating_sub(1) as usize;
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries[start..].to_vec()
    }

    /// Cloned entries in `start..=end`, clamped to the log
    pub fn slice(&self, start: u64, end: u64) -> Vec<LogEntry<C>> {
        let lo = start.max(1);
        let hi = end.min(self.last_index());
        if lo > hi {
            return Vec::new();
        }
        self.entries[(lo - 1) as usize..hi as usize].to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry<C>> {
        self.entries.iter()
    }

    /// Lowest index whose contents changed since the last call, if any.
    ///
    /// The caller is expected to rewrite its durable copy from that index on.
    pub fn take_unsynced(&mut self) -> Option<u64> {
        self.unsynced_from.take()
    }

    fn mark_unsynced(&mut self, index: u64) {
        self.unsynced_from = Some(match self.unsynced_from {
            Some(current) => current.min(index),
            None => index,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, cmd: &str) -> LogEntry<String> {
        LogEntry::new(term, cmd.to_string())
    }

    #[test]
    fn empty_log_has_zero_last_index_and_term() {
        let log: RaftLog<String> = RaftLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn index_zero_is_reserved() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, "a")]);
        assert_eq!(
            log.get(0),
            Err(RaftError::IndexOutOfRange {
                index: 0,
                last_index: 1,
            })
        );
    }

    #[test]
    fn get_past_end_fails() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, "a")]);
        assert!(log.get(2).is_err());
    }

    #[test]
    fn truncate_marks_suffix_unsynced() {
        let mut log = RaftLog::new();
        log.append(vec![entry(1, "a"), entry(1, "b"), entry(2, "c")]);
        assert_eq!(log.take_unsynced(), Some(1));

        log.truncate_from(2);
        log.append(vec![entry(3, "x")]);

        assert_eq!(log.take_unsynced(), Some(2));
        assert_eq!(log.take_unsynced(), None);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 3);
    }

    #[test]
    fn truncate_past_end_is_noop() {
        let mut log = RaftLog::from_persisted(vec![entry(1, "a")]);
        log.truncate_from(5);
        assert_eq!(log.len(), 1);
        assert_eq!(log.take_unsynced(), None);
    }

    #[test]
    fn slice_clamps_to_log() {
        let log = RaftLog::from_persisted(vec![entry(1, "a"), entry(1, "b")]);
        assert_eq!(log.slice(0, 10).len(), 2);
        assert_eq!(log.slice(2, 2), vec![entry(1, "b")]);
        assert!(log.slice(3, 4).is_empty());
    }
}
