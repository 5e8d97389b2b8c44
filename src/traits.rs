use std::path::Path;

use crate::index::TermSet;

/// Turns file content into the set of terms it is indexed under.
///
/// Implement this to change how text is split and normalized, for
/// example to keep underscores in identifiers or to stem words.
///
/// # Contract
///
/// Both methods must be deterministic and pure: no I/O, no shared mutable
/// state. The scanner calls `tokenize` concurrently from several threads and
/// the reconciler calls it from a blocking task while searches run.
///
/// `tokenize` only ever receives text that has already been read; I/O errors
/// never reach the tokenizer. Every token it returns is passed through
/// [`normalize`](Tokenizer::normalize) before it enters the index, and query
/// words are normalized the same way before lookup, so a tokenizer may return
/// raw words and leave normalization to `normalize`. Empty terms are dropped.
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
/// use filedex::Tokenizer;
///
/// /// Splits on whitespace and punctuation but keeps `_` inside identifiers.
/// struct CodeTokenizer;
///
/// impl Tokenizer for CodeTokenizer {
///     fn tokenize(&self, content: &str) -> HashSet<String> {
///         content
///             .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '_'))
///             .filter(|w| !w.is_empty())
///             .map(str::to_owned)
///             .collect()
///     }
///
///     fn normalize(&self, word: &str) -> String {
///         word.to_lowercase()
///     }
/// }
///
/// let terms = CodeTokenizer.tokenize("fn my_func() {}");
/// assert!(terms.contains("my_func"));
/// ```
pub trait Tokenizer: Send + Sync {
    /// Split `content` into a set of terms. Duplicates are collapsed by the set.
    fn tokenize(&self, content: &str) -> TermSet;

    /// Normalize a single word into the form stored in the index.
    fn normalize(&self, word: &str) -> String;
}

/// Decides whether a discovered regular file takes part in indexing.
///
/// Closures of type `Fn(&Path) -> bool` implement this trait, so most callers
/// pass one through [`FileIndexerBuilder::file_filter`](crate::FileIndexerBuilder::file_filter).
///
/// # Thread Safety
///
/// `Send + Sync` are required: filters are shared by the parallel scanner,
/// the watcher and the reconciler.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use filedex::PathFilter;
///
/// struct SourceOnly;
///
/// impl PathFilter for SourceOnly {
///     fn accepts(&self, path: &Path) -> bool {
///         matches!(path.extension().and_then(|e| e.to_str()), Some("rs" | "kt" | "java"))
///     }
/// }
///
/// assert!(SourceOnly.accepts(Path::new("/src/main.rs")));
/// assert!(!SourceOnly.accepts(Path::new("/README.md")));
/// ```
pub trait PathFilter: Send + Sync {
    /// Returns `true` if the file at `path` should be indexed.
    fn accepts(&self, path: &Path) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn accepts(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Run `tokenizer` over `content` and normalize every token, dropping empties.
pub(crate) fn terms_for(tokenizer: &dyn Tokenizer, content: &str) -> TermSet {
    tokenizer
        .tokenize(content)
        .iter()
        .map(|token| tokenizer.normalize(token))
        .filter(|term| !term.is_empty())
        .collect()
}
