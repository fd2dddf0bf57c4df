//! Corpus of previously fingerprinted contracts
//!
//! The on-disk format is newline-delimited JSON, one record per non-blank
//! line. Loading only ever appends; readers work on an immutable snapshot, so
//! a concurrent load is seen either completely or not at all.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::hash::HashOptions;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus source {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid corpus record in {origin} at line {line}: {source}")]
    Record {
        origin: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Hash options as written in a corpus record.
///
/// Kept as plain strings: records from other producers may name algorithms
/// this crate does not implement, and those must simply never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryOptions {
    pub algorithm: String,
    pub mode: String,
}

impl EntryOptions {
    pub fn agrees_with(&self, options: &HashOptions) -> bool {
        self.algorithm == options.algorithm.name() && self.mode == options.mode.name()
    }
}

impl From<HashOptions> for EntryOptions {
    fn from(options: HashOptions) -> Self {
        Self {
            algorithm: options.algorithm.name().to_string(),
            mode: options.mode.name().to_string(),
        }
    }
}

/// One corpus record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub hash: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub options: EntryOptions,
}

impl DatabaseEntry {
    pub fn new(hash: String, name: String, path: Option<String>, options: HashOptions) -> Self {
        Self {
            hash,
            name,
            path,
            options: options.into(),
        }
    }
}

/// In-memory corpus, shared read-only between matching calls
#[derive(Debug)]
pub struct Corpus {
    entries: RwLock<Arc<[DatabaseEntry]>>,
}

impl Default for Corpus {
    fn default() -> Self {
        Self::from_entries(Vec::new())
    }
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A corpus over pre-parsed records
    pub fn from_entries(entries: Vec<DatabaseEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into()),
        }
    }

    /// The current contents; later loads do not affect a taken snapshot
    pub fn snapshot(&self) -> Arc<[DatabaseEntry]> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records carrying `hash`, whatever their options
    pub fn by_hash(&self, hash: &str) -> Vec<DatabaseEntry> {
        self.snapshot()
            .iter()
            .filter(|entry| entry.hash == hash)
            .cloned()
            .collect()
    }

    /// Append records
    pub fn extend(&self, entries: Vec<DatabaseEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut current = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let merged: Vec<DatabaseEntry> = current.iter().cloned().chain(entries).collect();
        *current = merged.into();
    }

    /// Swap the whole corpus for `entries`
    pub fn replace(&self, entries: Vec<DatabaseEntry>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries.into();
    }

    /// Load a corpus file, or every `*.json` file of a directory
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<usize, CorpusError> {
        let path = path.as_ref();
        if path.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }

    /// Load one newline-delimited JSON corpus file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, CorpusError> {
        let path = path.as_ref();
        let entries = read_file(path)?;
        Ok(self.append(entries, &path.display().to_string()))
    }

    /// Load every `*.json` file in `dir`, in file name order. Either all files
    /// are loaded or none is.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize, CorpusError> {
        let dir = dir.as_ref();
        let io_error = |source| CorpusError::Io {
            origin: dir.display().to_string(),
            source,
        };

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_error)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .map_err(io_error)?;
        files.retain(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"));
        files.sort();

        let mut entries = Vec::new();
        for file in &files {
            entries.extend(read_file(file)?);
        }
        Ok(self.append(entries, &dir.display().to_string()))
    }

    /// Load records from a stream; `origin` names it in errors and logs
    pub fn load_reader<R: BufRead>(&self, reader: R, origin: &str) -> Result<usize, CorpusError> {
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| CorpusError::Io {
                origin: origin.to_string(),
                source,
            })?;
            if let Some(entry) = parse_line(&line, idx + 1, origin)? {
                entries.push(entry);
            }
        }
        Ok(self.append(entries, origin))
    }

    fn append(&self, entries: Vec<DatabaseEntry>, origin: &str) -> usize {
        let loaded = entries.len();
        self.extend(entries);
        debug!(origin = %origin, records = loaded, total = self.len(), "corpus_loaded");
        loaded
    }
}

fn read_file(path: &Path) -> Result<Vec<DatabaseEntry>, CorpusError> {
    let origin = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| CorpusError::Io {
        origin: origin.clone(),
        source,
    })?;
    parse_records(&text, &origin)
}

/// Parse newline-delimited JSON records; blank lines are skipped
pub fn parse_records(text: &str, origin: &str) -> Result<Vec<DatabaseEntry>, CorpusError> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if let Some(entry) = parse_line(line, idx + 1, origin)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn parse_line(line: &str, line_no: usize, origin: &str) -> Result<Option<DatabaseEntry>, CorpusError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| CorpusError::Record {
            origin: origin.to_string(),
            line: line_no,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Algorithm, HashMode};

    const CORPUS: &str = r#"
{"hash":"aa","name":"Foo","path":"Foo.sol","options":{"algorithm":"sha1","mode":"AST_STRUCTURE"}}

{"hash":"bb","name":"Bar","path":"Bar.sol","options":{"algorithm":"md5","mode":"AST_EXACT"}}
"#;

    #[test]
    fn test_parse_records_skips_blank_lines() {
        let entries = parse_records(CORPUS, "inline").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Foo");
        assert_eq!(entries[1].options.algorithm, "md5");
    }

    #[test]
    fn test_bad_record_reports_line() {
        let text = "{\"hash\":\"aa\",\"name\":\"Foo\",\"path\":\"Foo.sol\",\"options\":{\"algorithm\":\"sha1\",\"mode\":\"AST_EXACT\"}}\n{not json}\n";
        let err = parse_records(text, "broken.json").unwrap_err();
        assert!(matches!(err, CorpusError::Record { line: 2, .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_failed_load_appends_nothing() {
        let corpus = Corpus::new();
        let text = format!("{}\nnope\n", CORPUS.trim());
        assert!(corpus.load_reader(text.as_bytes(), "stream").is_err());
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_loads_accumulate() {
        let corpus = Corpus::new();
        assert_eq!(corpus.load_reader(CORPUS.as_bytes(), "a").unwrap(), 2);
        assert_eq!(corpus.load_reader(CORPUS.as_bytes(), "b").unwrap(), 2);
        assert_eq!(corpus.len(), 4);
        assert_eq!(corpus.by_hash("aa").len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_loads() {
        let corpus = Corpus::new();
        corpus.load_reader(CORPUS.as_bytes(), "a").unwrap();
        let before = corpus.snapshot();

        corpus.load_reader(CORPUS.as_bytes(), "b").unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(corpus.snapshot().len(), 4);

        corpus.replace(Vec::new());
        assert!(corpus.is_empty());
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn test_entry_options_agreement() {
        let options = EntryOptions {
            algorithm: "sha1".to_string(),
            mode: "AST_STRUCTURE".to_string(),
        };
        assert!(options.agrees_with(&HashOptions::new(Algorithm::Sha1, HashMode::Structure)));
        assert!(!options.agrees_with(&HashOptions::new(Algorithm::Sha1, HashMode::Exact)));
        assert!(!options.agrees_with(&HashOptions::new(Algorithm::Sha256, HashMode::Structure)));
    }
}
