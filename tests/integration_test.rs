use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filedex::{FileEvent, FileIndexer, IndexerError, LiveStream, TermSet, Tokenizer};
use tokio_stream::StreamExt;

/// Upper bound for any single filesystem notification to arrive.
const WAIT: Duration = Duration::from_secs(5);

/// How long to listen for events that must not arrive.
const QUIET: Duration = Duration::from_millis(700);

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a temporary directory tree for testing.
///
/// Structure:
/// ```text
/// tmp/
///   a.txt          "hello world"
///   b.txt          "hello kotlin"
///   notes.md       "TODO: write notes"
///   subdir/
///     c.txt        "nested hello"
///     data.bin     binary
/// ```
fn setup_test_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(root.join("a.txt"), "hello world").unwrap();
    fs::write(root.join("b.txt"), "hello kotlin").unwrap();
    fs::write(root.join("notes.md"), "TODO: write notes").unwrap();

    let sub = root.join("subdir");
    fs::create_dir(&sub).unwrap();
    fs::write(sub.join("c.txt"), "nested hello").unwrap();
    fs::write(sub.join("data.bin"), [0u8, 1, 2, 3, b'h', b'i']).unwrap();

    dir
}

/// Canonical form of the temp root, matching the paths the indexer reports.
fn canonical(dir: &tempfile::TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}

async fn start_indexer(root: &Path) -> FileIndexer {
    let indexer = filedex::builder()
        .add_path(root)
        .debounce(Duration::from_millis(50))
        .build()
        .unwrap();
    indexer.start().await.unwrap();
    indexer
}

/// Next value from `stream`, failing the test if none arrives in time.
async fn next_value<T>(stream: &mut LiveStream<T>) -> T {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for an update")
        .expect("stream ended unexpectedly")
        .expect("subscription failed")
}

/// Assert that `stream` stays silent for a while.
async fn assert_quiet<T: std::fmt::Debug>(stream: &mut LiveStream<T>) {
    if let Ok(item) = tokio::time::timeout(QUIET, stream.next()).await {
        panic!("unexpected update: {item:?}");
    }
}

fn files(results: &[filedex::SearchResult]) -> Vec<PathBuf> {
    results.iter().map(|r| r.file.clone()).collect()
}

// ---------------------------------------------------------------------------
// Initial scan and search
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn finds_files_by_any_word() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;

    let hello = indexer.search("hello").unwrap();
    assert_eq!(
        files(&hello),
        [root.join("a.txt"), root.join("b.txt"), root.join("subdir/c.txt")]
    );

    let either = indexer.search(["world", "kotlin"]).unwrap();
    assert_eq!(either.len(), 2);
    assert_eq!(either[0].file, root.join("a.txt"));
    assert_eq!(either[0].matches, ["world"]);
    assert_eq!(either[1].file, root.join("b.txt"));
    assert_eq!(either[1].matches, ["kotlin"]);

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn search_is_case_insensitive_and_keeps_caller_spelling() {
    let dir = setup_test_dir();
    let indexer = start_indexer(dir.path()).await;

    let results = indexer.search(["TODO:", "Kotlin"]).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.matches == ["TODO:"]));
    assert!(results.iter().any(|r| r.matches == ["Kotlin"]));

    assert!(indexer.search("absent").unwrap().is_empty());
    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_report_counts_skipped_binaries() {
    let dir = setup_test_dir();
    let indexer = filedex::builder()
        .add_path(dir.path())
        .collect_errors(true)
        .build()
        .unwrap();

    let report = indexer.start().await.unwrap();
    assert_eq!(report.stats.indexed, 4);
    assert_eq!(report.stats.skipped, 1);
    assert!(report.stats.dirs >= 1);
    assert!(report.errors.iter().any(|e| matches!(e, IndexerError::NotText(_))));
    assert_eq!(indexer.indexed_files(), 4);
    assert_eq!(indexer.diagnostics().files_skipped, 1);

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_and_custom_tokenizer_are_applied() {
    struct KeepUnderscores;

    impl Tokenizer for KeepUnderscores {
        fn tokenize(&self, content: &str) -> TermSet {
            content
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|w| !w.is_empty())
                .map(str::to_owned)
                .collect()
        }

        fn normalize(&self, word: &str) -> String {
            word.to_lowercase()
        }
    }

    let dir = setup_test_dir();
    fs::write(dir.path().join("code.txt"), "fn my_func() {}").unwrap();

    let indexer = filedex::builder()
        .add_path(dir.path())
        .tokenizer(KeepUnderscores)
        .extensions(["txt"])
        .build()
        .unwrap();
    indexer.start().await.unwrap();

    assert_eq!(indexer.search("my_func").unwrap().len(), 1);
    assert!(indexer.search("my").unwrap().is_empty());
    // notes.md is filtered out
    assert!(indexer.search("todo").unwrap().is_empty());

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn single_file_root_and_overlapping_roots() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = filedex::builder()
        .add_path(dir.path().join("a.txt"))
        .add_path(dir.path().join("subdir"))
        .add_path(dir.path().join("subdir"))
        .build()
        .unwrap();

    let report = indexer.start().await.unwrap();
    assert_eq!(report.stats.indexed, 2);
    assert_eq!(indexer.roots(), [root.join("a.txt"), root.join("subdir")]);
    assert_eq!(
        files(&indexer.search("hello").unwrap()),
        [root.join("a.txt"), root.join("subdir/c.txt")]
    );

    indexer.close().await;
}

// ---------------------------------------------------------------------------
// Live updates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn new_file_is_reported_once_to_word_watchers() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut todos = indexer.watch_for_word("TODO").unwrap();

    fs::write(root.join("c.txt"), "TODO fix").unwrap();

    let hit = next_value(&mut todos).await;
    assert_eq!(hit.file, root.join("c.txt"));
    assert_eq!(hit.matches, ["TODO"]);
    assert_quiet(&mut todos).await;

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_file_leaves_the_index() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut changes = indexer.watch_for_changes().unwrap();

    fs::remove_file(root.join("a.txt")).unwrap();

    assert_eq!(next_value(&mut changes).await, FileEvent::Deleted(root.join("a.txt")));
    assert!(!files(&indexer.search("hello").unwrap()).contains(&root.join("a.txt")));

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_writes_coalesce_into_one_modification() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = filedex::builder()
        .add_path(dir.path())
        .debounce(Duration::from_millis(200))
        .build()
        .unwrap();
    indexer.start().await.unwrap();
    let mut changes = indexer.watch_for_changes().unwrap();

    let b = root.join("b.txt");
    fs::write(&b, "first draft").unwrap();
    fs::write(&b, "second draft").unwrap();
    fs::write(&b, "final version").unwrap();

    assert_eq!(next_value(&mut changes).await, FileEvent::Modified(b.clone()));
    assert_quiet(&mut changes).await;

    assert_eq!(files(&indexer.search("final").unwrap()), [b.clone()]);
    assert!(indexer.search(["kotlin", "draft"]).unwrap().is_empty());
    assert!(indexer.diagnostics().events_coalesced >= 1);

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_events_arrive_in_order() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut changes = indexer.watch_for_changes().unwrap();
    let path = root.join("life.txt");

    fs::write(&path, "born").unwrap();
    assert_eq!(next_value(&mut changes).await, FileEvent::Created(path.clone()));

    fs::write(&path, "grown").unwrap();
    assert_eq!(next_value(&mut changes).await, FileEvent::Modified(path.clone()));
    assert_eq!(indexer.search("grown").unwrap().len(), 1);

    fs::remove_file(&path).unwrap();
    assert_eq!(next_value(&mut changes).await, FileEvent::Deleted(path.clone()));
    assert!(indexer.search(["born", "grown"]).unwrap().is_empty());

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn word_watch_reports_files_that_stop_matching() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut kotlin = indexer.watch_for_word("kotlin").unwrap();

    fs::write(root.join("b.txt"), "hello java").unwrap();

    let gone = next_value(&mut kotlin).await;
    assert_eq!(gone.file, root.join("b.txt"));
    assert!(gone.matches.is_empty());

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn words_watch_sends_the_full_result_list() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut words = indexer.watch_for_words(["kotlin", "rust"]).unwrap();

    fs::write(root.join("r.txt"), "rust and kotlin").unwrap();

    let list = next_value(&mut words).await;
    assert_eq!(files(&list), [root.join("b.txt"), root.join("r.txt")]);
    assert_eq!(list[1].matches, ["kotlin", "rust"]);

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn new_directory_is_indexed() {
    let dir = setup_test_dir();
    let root = canonical(&dir);
    let indexer = start_indexer(dir.path()).await;
    let mut changes = indexer.watch_for_changes().unwrap();

    let fresh = root.join("fresh");
    fs::create_dir(&fresh).unwrap();
    fs::write(fresh.join("inner.txt"), "deep thought").unwrap();

    let event = next_value(&mut changes).await;
    assert_eq!(event, FileEvent::Created(fresh.join("inner.txt")));
    assert_eq!(files(&indexer.search("thought").unwrap()), [fresh.join("inner.txt")]);

    indexer.close().await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent_and_ends_streams() {
    let dir = setup_test_dir();
    let indexer = start_indexer(dir.path()).await;
    let mut changes = indexer.watch_for_changes().unwrap();

    indexer.close().await;
    indexer.close().await;

    let end = tokio::time::timeout(WAIT, changes.next()).await.unwrap();
    assert!(end.is_none());
    assert!(!indexer.is_running());
    assert_eq!(indexer.indexed_files(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn use_after_close_is_rejected() {
    let dir = setup_test_dir();
    let indexer = start_indexer(dir.path()).await;
    indexer.close().await;

    assert!(matches!(indexer.search("hello"), Err(IndexerError::Closed)));
    assert!(matches!(indexer.watch_for_word("hello"), Err(IndexerError::Closed)));
    assert!(matches!(indexer.start().await, Err(IndexerError::Closed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn double_start_is_rejected() {
    let dir = setup_test_dir();
    let indexer = start_indexer(dir.path()).await;

    assert!(matches!(indexer.start().await, Err(IndexerError::AlreadyStarted)));
    assert!(indexer.is_running());

    indexer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_root_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let indexer = filedex::builder()
        .add_path(dir.path().join("nope"))
        .build()
        .unwrap();

    let err = indexer.start().await.unwrap_err();
    assert!(matches!(err, IndexerError::NotFound(_)));
    assert!(err.path().is_some());
    assert!(!indexer.is_running());
}

#[test]
fn no_roots_fails_build() {
    assert!(matches!(filedex::builder().build(), Err(IndexerError::NoRoots)));
}
