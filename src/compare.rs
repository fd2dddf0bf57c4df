//! Matching fingerprints against a corpus
//!
//! [`Doppelganger`] ties fingerprinting to a shared [`Corpus`]. A probe
//! record matches a corpus entry when hash, algorithm and mode all agree.
//! Results are grouped per probe contract, keyed by `(path, name)`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, trace};

use crate::ast::SyntaxNode;
use crate::database::{Corpus, DatabaseEntry};
use crate::fingerprint::{self, FingerprintError, FingerprintOptions, HashedContract};
use crate::hash::HashOptions;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("fingerprinting task failed: {0}")]
    Task(#[from] JoinError),
}

/// Where a probe contract came from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchKey {
    pub path: String,
    pub name: String,
}

impl MatchKey {
    pub fn of(target: &HashedContract) -> Self {
        Self {
            path: target.path().unwrap_or_default().to_string(),
            name: target.name().to_string(),
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.path, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchGroup {
    pub target: HashedContract,
    pub matches: Vec<DatabaseEntry>,
}

/// Corpus matches per probe contract
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompareResult {
    results: BTreeMap<MatchKey, MatchGroup>,
}

impl CompareResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `matches` under the target's key. The first target seen for a
    /// key is kept.
    pub fn add_result(&mut self, target: &HashedContract, matches: Vec<DatabaseEntry>) {
        self.results
            .entry(MatchKey::of(target))
            .or_insert_with(|| MatchGroup {
                target: target.clone(),
                matches: Vec::new(),
            })
            .matches
            .extend(matches);
    }

    /// Matches recorded for the contract `name` found at `path`
    pub fn get(&self, path: &str, name: &str) -> Option<&MatchGroup> {
        self.results.get(&MatchKey {
            path: path.to_string(),
            name: name.to_string(),
        })
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&MatchKey, &MatchGroup)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl Serialize for CompareResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.results.iter().map(|(key, group)| (key.to_string(), group)))
    }
}

/// Match probe records against corpus entries, accumulating into `results`.
///
/// Entries are first narrowed to those whose hash belongs to any probe; each
/// probe then keeps the entries that also agree on algorithm and mode.
pub fn match_records(
    records: &[HashedContract],
    corpus: &[DatabaseEntry],
    results: &mut CompareResult,
) {
    let targets: HashSet<&str> = records.iter().map(HashedContract::hash).collect();
    let candidates: Vec<&DatabaseEntry> = corpus
        .iter()
        .filter(|entry| targets.contains(entry.hash.as_str()))
        .collect();
    let candidate_hashes: HashSet<&str> = candidates.iter().map(|e| e.hash.as_str()).collect();

    for target in records
        .iter()
        .filter(|record| candidate_hashes.contains(record.hash()))
    {
        let options = target.options();
        let matches: Vec<DatabaseEntry> = candidates
            .iter()
            .filter(|entry| entry.hash == target.hash() && entry.options.agrees_with(&options))
            .map(|entry| (*entry).clone())
            .collect();

        if matches.is_empty() {
            trace!(
                contract = %target.name(),
                hash = %target.hash(),
                "hash_collision_across_options"
            );
            continue;
        }
        debug!(
            contract = %target.name(),
            mode = %options.mode,
            matches = matches.len(),
            "corpus_match"
        );
        results.add_result(target, matches);
    }
}

/// Records that fingerprint identically under the same options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub options: HashOptions,
    pub members: Vec<DatabaseEntry>,
}

/// Group `records` by (hash, algorithm, mode), keeping groups with more than
/// one member
pub fn find_duplicates(records: &[HashedContract]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<(&str, &str, &str), DuplicateGroup> = BTreeMap::new();
    for record in records {
        let options = record.options();
        groups
            .entry((options.mode.name(), options.algorithm.name(), record.hash()))
            .or_insert_with(|| DuplicateGroup {
                hash: record.hash().to_string(),
                options,
                members: Vec::new(),
            })
            .members
            .push(record.to_entry());
    }
    groups
        .into_values()
        .filter(|group| group.members.len() > 1)
        .collect()
}

/// Fingerprints documents and matches them against a shared corpus
#[derive(Debug, Clone, Default)]
pub struct Doppelganger {
    options: FingerprintOptions,
    corpus: Arc<Corpus>,
}

impl Doppelganger {
    /// An engine with an empty corpus
    pub fn new(options: FingerprintOptions) -> Self {
        Self::with_corpus(options, Arc::new(Corpus::new()))
    }

    pub fn with_corpus(options: FingerprintOptions, corpus: Arc<Corpus>) -> Self {
        Self { options, corpus }
    }

    pub fn options(&self) -> &FingerprintOptions {
        &self.options
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn fingerprint(
        &self,
        document: &SyntaxNode,
        path: Option<&str>,
    ) -> Result<Vec<HashedContract>, FingerprintError> {
        fingerprint::fingerprint(document, &self.options, path)
    }

    /// Fingerprint the parser's raw JSON output
    pub fn fingerprint_json(
        &self,
        document: Value,
        path: Option<&str>,
    ) -> Result<Vec<HashedContract>, FingerprintError> {
        self.fingerprint(&SyntaxNode::from_json(document)?, path)
    }

    pub fn compare(
        &self,
        document: &SyntaxNode,
        path: Option<&str>,
    ) -> Result<CompareResult, FingerprintError> {
        let mut results = CompareResult::new();
        self.compare_into(document, path, &mut results)?;
        Ok(results)
    }

    /// Like [`Self::compare`], appending to an existing result
    pub fn compare_into(
        &self,
        document: &SyntaxNode,
        path: Option<&str>,
        results: &mut CompareResult,
    ) -> Result<(), FingerprintError> {
        let records = self.fingerprint(document, path)?;
        match_records(&records, &self.corpus.snapshot(), results);
        Ok(())
    }

    /// Match already computed fingerprints
    pub fn compare_records(&self, records: &[HashedContract]) -> CompareResult {
        let mut results = CompareResult::new();
        match_records(records, &self.corpus.snapshot(), &mut results);
        results
    }

    /// [`Self::fingerprint`] on tokio's blocking pool
    pub async fn fingerprint_async(
        &self,
        document: SyntaxNode,
        path: Option<String>,
    ) -> Result<Vec<HashedContract>, CompareError> {
        let engine = self.clone();
        let records =
            tokio::task::spawn_blocking(move || engine.fingerprint(&document, path.as_deref()))
                .await??;
        Ok(records)
    }

    /// [`Self::compare`] on tokio's blocking pool
    pub async fn compare_async(
        &self,
        document: SyntaxNode,
        path: Option<String>,
    ) -> Result<CompareResult, CompareError> {
        let engine = self.clone();
        let results =
            tokio::task::spawn_blocking(move || engine.compare(&document, path.as_deref()))
                .await??;
        Ok(results)
    }
}
