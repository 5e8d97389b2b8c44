//! # filedex
//!
//! A live inverted index over files and directories.
//!
//! filedex scans a set of roots, tokenizes every accepted text file into
//! words, and keeps the word→files index in sync with the filesystem while it
//! runs. Callers search it synchronously or subscribe to live streams of file
//! changes and match changes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), filedex::IndexerError> {
//!     let indexer = filedex::builder()
//!         .add_path("./src")
//!         .extensions(["rs", "md"])
//!         .build()?;
//!
//!     let report = indexer.start().await?;
//!     println!("indexed {} files in {:.3}s",
//!         report.stats.indexed,
//!         report.stats.duration.as_secs_f64()
//!     );
//!
//!     for hit in indexer.search(["unsafe", "transmute"])? {
//!         println!("{} matched {:?}", hit.file.display(), hit.matches);
//!     }
//!
//!     let mut todos = indexer.watch_for_word("TODO")?;
//!     while let Some(update) = todos.next().await {
//!         let update = update?;
//!         if update.matches.is_empty() {
//!             println!("no more TODOs in {}", update.file.display());
//!         } else {
//!             println!("new TODO in {}", update.file.display());
//!         }
//!     }
//!
//!     indexer.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Tokenizers and Filters
//!
//! Implement [`Tokenizer`] to change how content is split into words:
//!
//! ```rust
//! use filedex::{TermSet, Tokenizer};
//!
//! struct Whitespace;
//!
//! impl Tokenizer for Whitespace {
//!     fn tokenize(&self, content: &str) -> TermSet {
//!         content.split_whitespace().map(str::to_owned).collect()
//!     }
//!
//!     fn normalize(&self, word: &str) -> String {
//!         word.to_owned()
//!     }
//! }
//! ```
//!
//! Any `Fn(&Path) -> bool` is a [`PathFilter`]:
//!
//! ```rust
//! let builder = filedex::builder()
//!     .add_path(".")
//!     .file_filter(|p| !p.components().any(|c| c.as_os_str() == "target"));
//! ```

#![forbid(unsafe_code)]

mod builder;
mod diagnostics;
mod error;
mod event;
mod hub;
mod index;
mod indexer;
mod query;
mod reconciler;
mod results;
mod scanner;
mod stream;
mod tokenizer;
mod traits;
mod watcher;

// ── Public re-exports ─────────────────────────────────────────────────────────

pub use builder::{
    AcceptAll, ExtensionFilter, FileIndexerBuilder, DEFAULT_BACKPRESSURE_TIMEOUT,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_DEBOUNCE,
};
pub use diagnostics::DiagnosticsSnapshot;
pub use error::IndexerError;
pub use event::FileEvent;
pub use index::{InvertedIndex, TermSet};
pub use indexer::FileIndexer;
pub use query::Query;
pub use results::{ScanReport, ScanStats, SearchResult};
pub use stream::LiveStream;
pub use tokenizer::DefaultTokenizer;
pub use traits::{PathFilter, Tokenizer};

// ── Entry point ───────────────────────────────────────────────────────────────

/// Create a new [`FileIndexerBuilder`] to configure an indexer.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// let indexer = filedex::builder()
///     .add_path("/var/log")
///     .add_path("/etc/hosts")
///     .debounce(Duration::from_millis(250))
///     .build()
///     .unwrap();
///
/// assert!(!indexer.is_running());
/// ```
pub fn builder() -> FileIndexerBuilder {
    FileIndexerBuilder::default()
}
