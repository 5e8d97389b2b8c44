use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::IndexerError;

/// The terms one file produced at one point in time.
pub type TermSet = HashSet<String>;

/// The index shared between the reconciler (single writer) and readers.
pub(crate) type SharedIndex = Arc<RwLock<InvertedIndex>>;

// ---------------------------------------------------------------------------
// InvertedIndex
// ---------------------------------------------------------------------------

/// Term → files and file → terms, kept as mutual inverses.
///
/// Every method takes `&mut self` or `&self`, so wrapping the index in a
/// read/write lock makes each mutation a single critical section: readers see
/// the state before or after an `add_file`/`remove_file`/`reindex_file`,
/// never a half-applied one.
///
/// Paths are kept sorted, which gives search results a stable order and lets
/// [`files_under`](InvertedIndex::files_under) answer with a range scan.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, BTreeSet<PathBuf>>,
    files:    BTreeMap<PathBuf, TermSet>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mutation ──────────────────────────────────────────────────────────

    /// Index `path` under `terms`.
    ///
    /// # Errors
    ///
    /// [`IndexerError::AlreadyIndexed`] if `path` is present; re-indexing goes
    /// through [`reindex_file`](InvertedIndex::reindex_file).
    pub fn add_file(&mut self, path: PathBuf, terms: TermSet) -> Result<(), IndexerError> {
        if self.files.contains_key(&path) {
            return Err(IndexerError::AlreadyIndexed(path));
        }
        for term in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(path.clone());
        }
        self.files.insert(path, terms);
        Ok(())
    }

    /// Drop `path` from the index, returning the terms it was indexed under.
    ///
    /// Absent paths are a no-op. Terms left without any file are pruned.
    pub fn remove_file(&mut self, path: &Path) -> Option<TermSet> {
        let terms = self.files.remove(path)?;
        for term in &terms {
            self.unlink(term, path);
        }
        Some(terms)
    }

    /// Replace the terms of `path` with `terms`, touching only the difference.
    ///
    /// Inserts the file if it was not indexed. Returns `true` when the stored
    /// term set changed (always `true` for an insert).
    pub fn reindex_file(&mut self, path: PathBuf, terms: TermSet) -> bool {
        let Some(old) = self.files.get_mut(&path) else {
            // Absent, so this cannot fail.
            let _ = self.add_file(path, terms);
            return true;
        };
        if *old == terms {
            return false;
        }

        let stale: Vec<String> = old.difference(&terms).cloned().collect();
        let fresh: Vec<String> = terms.difference(old).cloned().collect();
        *old = terms;

        for term in &stale {
            self.unlink(term, &path);
        }
        for term in fresh {
            self.postings.entry(term).or_default().insert(path.clone());
        }
        true
    }

    /// Remove every file and term.
    pub fn clear(&mut self) {
        self.postings.clear();
        self.files.clear();
    }

    fn unlink(&mut self, term: &str, path: &Path) {
        if let Some(paths) = self.postings.get_mut(term) {
            paths.remove(path);
            if paths.is_empty() {
                self.postings.remove(term);
            }
        }
    }

    // ── Lookup ────────────────────────────────────────────────────────────

    /// Files currently indexed under `term`. Empty for unknown terms.
    pub fn lookup(&self, term: &str) -> BTreeSet<PathBuf> {
        self.postings.get(term).cloned().unwrap_or_default()
    }

    /// Files indexed under at least one of `terms`, each with the terms that
    /// hit it in the order they were given.
    pub fn lookup_any<S: AsRef<str>>(&self, terms: &[S]) -> BTreeMap<PathBuf, Vec<String>> {
        let mut hits: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for term in terms.iter().map(AsRef::as_ref) {
            if !seen.insert(term) {
                continue;
            }
            let Some(paths) = self.postings.get(term) else {
                continue;
            };
            for path in paths {
                hits.entry(path.clone()).or_default().push(term.to_owned());
            }
        }
        hits
    }

    /// The terms `path` is currently indexed under.
    pub fn terms_of(&self, path: &Path) -> Option<&TermSet> {
        self.files.get(path)
    }

    /// Whether `path` is indexed.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Indexed files strictly below the directory `dir`.
    pub fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.files
            .range::<Path, _>((std::ops::Bound::Excluded(dir), std::ops::Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Every indexed file, sorted.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }
}
