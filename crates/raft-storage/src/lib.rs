//! # raft-storage
//!
//! why: term, vote and log must survive a crash before a node answers anyone
//! relations: written by raft-runtime before any reply leaves a node; stores raft-core log entries
//! what: Storage trait, json FileStorage with atomic replace, InMemoryStorage

use raft_core::{LogEntry, NodeId, Term};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// durable home of a node's hard state
///
/// log positions are 1-based, matching raft-core's log indexing.
/// a fresh store reports term 0, no vote, and an empty log.
pub trait Storage<C> {
    /// overwrite the stored term and vote; both change together
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<NodeId>) -> io::Result<()>;

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<NodeId>)>;

    /// add entries after the current last one
    fn append_entries(&mut self, entries: &[LogEntry<C>]) -> io::Result<()>;

    /// whole log in index order, read once at startup
    fn load_log(&self) -> io::Result<Vec<LogEntry<C>>>;

    /// drop every entry at `from_index` and beyond (for conflict resolution)
    fn truncate_log_from(&mut self, from_index: u64) -> io::Result<()>;

    /// forget everything, as if the node had never run
    fn clear(&mut self) -> io::Result<()>;
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn keep_before(from_index: u64) -> usize {
    from_index.saturating_sub(1) as usize
}

// -- file storage implementation --

/// json files in one directory, each replaced atomically on write
///
/// layout:
/// - meta.json: term and voted_for
/// - log.json: every log entry, oldest first
pub struct FileStorage<C = Vec<u8>> {
    dir: PathBuf,
    _command: PhantomData<fn() -> C>,
}

impl<C> FileStorage<C> {
    /// open (and create if missing) a storage directory
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _command: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.json")
    }

    /// atomic write: write to temp file, fsync, then rename over the target
    fn write_atomic(&self, target: &Path, temp_name: &str, bytes: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(temp_name);
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, target)
    }

    fn read_if_exists(path: &Path) -> io::Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    fn write_log(&self, log: &[LogEntry<C>]) -> io::Result<()>
    where
        C: Serialize,
    {
        // whole-file rewrite keeps the format trivially recoverable
        let json = serde_json::to_string_pretty(log).map_err(invalid_data)?;
        self.write_atomic(&self.log_path(), "log.tmp", json.as_bytes())
    }
}

/// on-disk shape of meta.json
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct MetaData {
    term: Term,
    voted_for: Option<NodeId>,
}

impl<C: Serialize + DeserializeOwned + Clone> Storage<C> for FileStorage<C> {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<NodeId>) -> io::Result<()> {
        let meta = MetaData { term, voted_for };
        let json = serde_json::to_string_pretty(&meta).map_err(invalid_data)?;
        self.write_atomic(&self.meta_path(), "meta.tmp", json.as_bytes())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<NodeId>)> {
        let Some(contents) = Self::read_if_exists(&self.meta_path())? else {
            return Ok((0, None)); // never written: fresh node
        };
        let meta: MetaData = serde_json::from_str(&contents).map_err(invalid_data)?;
        Ok((meta.term, meta.voted_for))
    }

    fn append_entries(&mut self, entries: &[LogEntry<C>]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut log = self.load_log()?;
        log.extend(entries.iter().cloned());
        self.write_log(&log)
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry<C>>> {
        match Self::read_if_exists(&self.log_path())? {
            Some(contents) => serde_json::from_str(&contents).map_err(invalid_data),
            None => Ok(Vec::new()),
        }
    }

    fn truncate_log_from(&mut self, from_index: u64) -> io::Result<()> {
        let mut log = self.load_log()?;
        let keep = keep_before(from_index);
        if keep >= log.len() {
            return Ok(());
        }
        log.truncate(keep);
        self.write_log(&log)
    }

    fn clear(&mut self) -> io::Result<()> {
        for path in [self.meta_path(), self.log_path()] {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

// -- in-memory storage implementation --

/// volatile stand-in for tests; a restart loses everything
#[derive(Debug, Clone)]
pub struct InMemoryStorage<C = Vec<u8>> {
    term: Term,
    voted_for: Option<NodeId>,
    log: Vec<LogEntry<C>>,
}

impl<C> Default for InMemoryStorage<C> {
    fn default() -> Self {
        Self {
            term: 0,
            voted_for: None,
            log: Vec::new(),
        }
    }
}

impl<C> InMemoryStorage<C> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clone> Storage<C> for InMemoryStorage<C> {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<NodeId>) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<NodeId>)> {
        Ok((self.term, self.voted_for))
    }

    fn append_entries(&mut self, entries: &[LogEntry<C>]) -> io::Result<()> {
        self.log.extend(entries.iter().cloned());
        Ok(())
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry<C>>> {
        Ok(self.log.clone())
    }

    fn truncate_log_from(&mut self, from_index: u64) -> io::Result<()> {
        self.log.truncate(keep_before(from_index));
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.term = 0;
        self.voted_for = None;
        self.log.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_storage_truncates_log() {
        let mut storage: InMemoryStorage = InMemoryStorage::new();
        let entries = vec![
            LogEntry::new(1, vec![1]),
            LogEntry::new(1, vec![2]),
            LogEntry::new(1, vec![3]),
        ];
        storage.append_entries(&entries).unwrap();

        storage.truncate_log_from(2).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log, vec![LogEntry::new(1, vec![1])]);
    }

    #[test]
    fn file_storage_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let mut storage: FileStorage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(2, Some(1)).unwrap();
        storage
            .append_entries(&[LogEntry::new(2, b"x".to_vec())])
            .unwrap();

        assert!(!dir.path().join("meta.tmp").exists());
        assert!(!dir.path().join("log.tmp").exists());
    }

    #[test]
    fn file_storage_clear_on_fresh_dir_is_ok() {
        let dir = tempdir().unwrap();
        let mut storage: FileStorage = FileStorage::new(dir.path()).unwrap();
        assert!(storage.clear().is_ok());
    }
}
