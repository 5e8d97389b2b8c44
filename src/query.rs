use crate::error::IndexerError;
use crate::index::{InvertedIndex, TermSet};
use crate::results::SearchResult;
use crate::traits::Tokenizer;

/// One or more words to search for, with OR semantics.
///
/// Built from a single word or a list of words:
///
/// ```rust
/// use filedex::Query;
///
/// let single = Query::from("kotlin");
/// let many = Query::from(["kotlin", "coroutines"]);
/// assert_eq!(single.words(), ["kotlin"]);
/// assert_eq!(many.words().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    words: Vec<String>,
}

impl Query {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// The words as given by the caller.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Normalize every word with `tokenizer`.
    ///
    /// Exact duplicate words are collapsed; words that normalize to nothing
    /// are dropped.
    ///
    /// # Errors
    ///
    /// [`IndexerError::InvalidQuery`] if no word survives normalization.
    pub(crate) fn compile(&self, tokenizer: &dyn Tokenizer) -> Result<CompiledQuery, IndexerError> {
        let mut terms: Vec<(String, String)> = Vec::with_capacity(self.words.len());
        for word in &self.words {
            if terms.iter().any(|(original, _)| original == word) {
                continue;
            }
            let normalized = tokenizer.normalize(word);
            if !normalized.is_empty() {
                terms.push((word.clone(), normalized));
            }
        }
        if terms.is_empty() {
            return Err(IndexerError::InvalidQuery(format!(
                "no searchable words in {:?}",
                self.words
            )));
        }
        Ok(CompiledQuery { terms })
    }
}

impl From<&str> for Query {
    fn from(word: &str) -> Self {
        Self::new([word])
    }
}

impl From<String> for Query {
    fn from(word: String) -> Self {
        Self::new([word])
    }
}

impl From<&String> for Query {
    fn from(word: &String) -> Self {
        Self::new([word.as_str()])
    }
}

impl From<Vec<&str>> for Query {
    fn from(words: Vec<&str>) -> Self {
        Self::new(words)
    }
}

impl From<Vec<String>> for Query {
    fn from(words: Vec<String>) -> Self {
        Self { words }
    }
}

impl From<&[&str]> for Query {
    fn from(words: &[&str]) -> Self {
        Self::new(words.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Query {
    fn from(words: [&str; N]) -> Self {
        Self::new(words)
    }
}

// ---------------------------------------------------------------------------
// CompiledQuery
// ---------------------------------------------------------------------------

/// A query whose words have been normalized by the active tokenizer.
///
/// Keeps each caller word next to its normalized term so results can report
/// the words the caller actually asked for.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    /// `(original, normalized)` in query order.
    terms: Vec<(String, String)>,
}

impl CompiledQuery {
    /// Normalized terms in query order, duplicates removed.
    pub(crate) fn normalized(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.terms.len());
        for (_, term) in &self.terms {
            if !out.contains(&term.as_str()) {
                out.push(term);
            }
        }
        out
    }

    /// Caller words whose normalized form appears in `terms`, in query order.
    pub(crate) fn matches_in(&self, terms: &TermSet) -> Vec<String> {
        self.terms
            .iter()
            .filter(|(_, normalized)| terms.contains(normalized))
            .map(|(original, _)| original.clone())
            .collect()
    }

    /// Evaluate against `index`, one result per matching file, sorted by path.
    pub(crate) fn search(&self, index: &InvertedIndex) -> Vec<SearchResult> {
        index
            .lookup_any(&self.normalized())
            .into_iter()
            .map(|(file, hit)| SearchResult {
                matches: self
                    .terms
                    .iter()
                    .filter(|(_, normalized)| hit.contains(normalized))
                    .map(|(original, _)| original.clone())
                    .collect(),
                file,
            })
            .collect()
    }
}
