use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::{ChangeKind, FileEvent, RawChange};
use crate::hub::SubscriptionHub;
use crate::index::SharedIndex;
use crate::scanner::{FileScanner, Root};

/// Turns debounced changes into index mutations and [`FileEvent`]s.
///
/// The reconciler is the only writer of the index once `start()` returns.
/// It never trusts what the watcher reported about a file: every created or
/// modified path is re-read, and a path that can no longer be read is treated
/// as deleted.
///
/// | change   | indexed? | action                  | event     |
/// |----------|----------|-------------------------|-----------|
/// | created  | no       | read, add               | Created   |
/// | created  | yes      | read, reindex           | Modified if the terms changed |
/// | modified | yes      | read, reindex           | Modified  |
/// | modified | no       | read, add               | Created   |
/// | deleted  | yes      | remove                  | Deleted   |
/// | deleted  | no       | remove files below it   | Deleted per file, or nothing |
///
/// Files rejected by the filter or deeper than the depth limit are ignored,
/// exactly as the initial scan ignores them.
pub(crate) struct Reconciler {
    scanner: FileScanner,
    index:   SharedIndex,
    roots:   Vec<Root>,
}

impl Reconciler {
    pub(crate) fn new(scanner: FileScanner, index: SharedIndex, roots: Vec<Root>) -> Self {
        Self { scanner, index, roots }
    }

    /// Apply one change and return the events it produced, in order.
    ///
    /// Blocking: reads files.
    pub(crate) fn reconcile(&self, change: &RawChange) -> Vec<FileEvent> {
        self.scanner.diagnostics.events_reconciled();
        match change.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                self.upsert_path(&change.path, change.kind)
            }
            ChangeKind::Deleted => self.remove_path(&change.path),
            ChangeKind::Rescan => self.rescan(&change.path),
        }
    }

    fn upsert_path(&self, path: &Path, kind: ChangeKind) -> Vec<FileEvent> {
        match fs::symlink_metadata(path) {
            // Files found inside a new directory arrive as creations; their own
            // Created events may follow and must not report them twice
            Ok(meta) if meta.is_dir() => self
                .scanner
                .accepted_files(&self.roots, path)
                .iter()
                .filter_map(|file| self.upsert_file(file, ChangeKind::Created))
                .collect(),
            Ok(meta) if meta.is_file() => self.upsert_file(path, kind).into_iter().collect(),
            // Symlinks and special files are never indexed
            Ok(_) => Vec::new(),
            // Gone before we got to it
            Err(_) => self.remove_path(path),
        }
    }

    fn upsert_file(&self, path: &Path, kind: ChangeKind) -> Option<FileEvent> {
        if !self.scanner.filter.accepts(path) || !self.scanner.within_depth(&self.roots, path) {
            return None;
        }

        match self.scanner.read_terms(path) {
            Ok(terms) => {
                let mut index = self.index.write();
                if index.contains(path) {
                    let changed = index.reindex_file(path.to_path_buf(), terms);
                    // A late Created for a file already picked up is not news;
                    // an explicit modification is always reported
                    if !changed && kind == ChangeKind::Created {
                        return None;
                    }
                    Some(FileEvent::Modified(path.to_path_buf()))
                } else {
                    index.add_file(path.to_path_buf(), terms).ok()?;
                    Some(FileEvent::Created(path.to_path_buf()))
                }
            }
            Err(err) => {
                self.scanner.diagnostics.read_failures();
                log::debug!("reconcile: treating {} as deleted: {err}", path.display());
                self.index
                    .write()
                    .remove_file(path)
                    .map(|_| FileEvent::Deleted(path.to_path_buf()))
            }
        }
    }

    /// Remove `path`, or every indexed file below it if it was a directory.
    fn remove_path(&self, path: &Path) -> Vec<FileEvent> {
        let mut index = self.index.write();
        if index.remove_file(path).is_some() {
            return vec![FileEvent::Deleted(path.to_path_buf())];
        }
        index
            .files_under(path)
            .into_iter()
            .map(|file| {
                index.remove_file(&file);
                FileEvent::Deleted(file)
            })
            .collect()
    }

    /// Walk `root` again after the watcher lost events and bring the index in line.
    ///
    /// Only files whose terms changed are reported as modified.
    fn rescan(&self, root_path: &Path) -> Vec<FileEvent> {
        let Some(root) = self.roots.iter().find(|r| r.path == root_path) else {
            return Vec::new();
        };
        log::info!("rescanning {} after watcher overflow", root.path.display());

        let present: Vec<PathBuf> = if root.is_dir {
            self.scanner.accepted_files(&self.roots, &root.path)
        } else if root.path.is_file() && self.scanner.filter.accepts(&root.path) {
            vec![root.path.clone()]
        } else {
            Vec::new()
        };

        let mut events = Vec::new();
        for file in &present {
            match self.scanner.read_terms(file) {
                Ok(terms) => {
                    let mut index = self.index.write();
                    let existed = index.contains(file);
                    if index.reindex_file(file.clone(), terms) {
                        events.push(if existed {
                            FileEvent::Modified(file.clone())
                        } else {
                            FileEvent::Created(file.clone())
                        });
                    }
                }
                Err(err) => {
                    self.scanner.diagnostics.read_failures();
                    log::debug!("rescan: skipped {}: {err}", file.display());
                    if self.index.write().remove_file(file).is_some() {
                        events.push(FileEvent::Deleted(file.clone()));
                    }
                }
            }
        }

        let seen: HashSet<&PathBuf> = present.iter().collect();
        let mut index = self.index.write();
        let mut indexed = index.files_under(&root.path);
        if index.contains(&root.path) {
            indexed.push(root.path.clone());
        }
        for file in indexed {
            if !seen.contains(&file) {
                index.remove_file(&file);
                events.push(FileEvent::Deleted(file));
            }
        }
        events
    }
}

/// Consume changes until cancelled, publishing each resulting event.
///
/// Changes are applied strictly one after another, and an event is fully
/// delivered before the next change is read, so subscribers observe each
/// path's events in the order they were reconciled.
pub(crate) async fn run(
    reconciler: Arc<Reconciler>,
    mut changes_rx: mpsc::Receiver<RawChange>,
    hub: Arc<SubscriptionHub>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes_rx.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let worker = Arc::clone(&reconciler);
        let events = match tokio::task::spawn_blocking(move || worker.reconcile(&change)).await {
            Ok(events) => events,
            Err(err) => {
                log::warn!("reconcile task failed: {err}");
                continue;
            }
        };

        for event in events {
            log::debug!("{event:?}");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = hub.publish(&event) => {}
            }
        }
    }

    log::debug!("reconciler stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::RwLock;

    use super::*;
    use crate::builder::AcceptAll;
    use crate::diagnostics::Diagnostics;
    use crate::index::InvertedIndex;
    use crate::scanner::{resolve_roots, WalkConfig};
    use crate::tokenizer::DefaultTokenizer;
    use crate::traits::PathFilter;

    struct Fixture {
        dir:        tempfile::TempDir,
        root:       PathBuf,
        reconciler: Reconciler,
        index:      SharedIndex,
    }

    fn fixture() -> Fixture {
        fixture_with(None, Arc::new(AcceptAll))
    }

    fn fixture_with(max_depth: Option<usize>, filter: Arc<dyn PathFilter>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let roots = resolve_roots(&[dir.path().to_path_buf()]).unwrap();
        let root = roots[0].path.clone();
        let index: SharedIndex = Arc::new(RwLock::new(InvertedIndex::new()));
        let scanner = FileScanner {
            config:         WalkConfig { threads: 1, max_depth },
            tokenizer:      Arc::new(DefaultTokenizer),
            filter,
            collect_errors: false,
            diagnostics:    Arc::new(Diagnostics::default()),
        };
        let reconciler = Reconciler::new(scanner, Arc::clone(&index), roots);
        Fixture { dir, root, reconciler, index }
    }

    impl Fixture {
        fn apply(&self, path: &Path, kind: ChangeKind) -> Vec<FileEvent> {
            self.reconciler.reconcile(&RawChange::new(path, kind))
        }
    }

    #[test]
    fn created_then_modified_then_deleted() {
        let f = fixture();
        let file = f.root.join("a.txt");

        fs::write(&file, "hello world").unwrap();
        assert_eq!(f.apply(&file, ChangeKind::Created), [FileEvent::Created(file.clone())]);

        fs::write(&file, "goodbye world").unwrap();
        assert_eq!(f.apply(&file, ChangeKind::Modified), [FileEvent::Modified(file.clone())]);
        assert!(f.index.read().lookup("hello").is_empty());
        assert_eq!(f.index.read().lookup("goodbye").len(), 1);

        fs::remove_file(&file).unwrap();
        assert_eq!(f.apply(&file, ChangeKind::Deleted), [FileEvent::Deleted(file.clone())]);
        assert_eq!(f.index.read().file_count(), 0);
        assert!(f.dir.path().exists());
    }

    #[test]
    fn created_while_present_is_modified_and_modified_while_absent_is_created() {
        let f = fixture();
        let file = f.root.join("b.txt");
        fs::write(&file, "one").unwrap();
        assert_eq!(f.apply(&file, ChangeKind::Modified), [FileEvent::Created(file.clone())]);

        fs::write(&file, "two").unwrap();
        assert_eq!(f.apply(&file, ChangeKind::Created), [FileEvent::Modified(file.clone())]);
    }

    #[test]
    fn late_created_for_a_walked_file_is_not_repeated() {
        let f = fixture();
        let sub = f.root.join("fresh");
        fs::create_dir(&sub).unwrap();
        let file = sub.join("x.txt");
        fs::write(&file, "x").unwrap();

        assert_eq!(f.apply(&sub, ChangeKind::Created), [FileEvent::Created(file.clone())]);
        assert!(f.apply(&file, ChangeKind::Created).is_empty());
        assert_eq!(f.apply(&file, ChangeKind::Modified), [FileEvent::Modified(file.clone())]);
    }

    #[test]
    fn live_changes_respect_the_depth_limit() {
        let f = fixture_with(Some(2), Arc::new(AcceptAll));
        let sub = f.root.join("sub");
        fs::create_dir_all(sub.join("deep")).unwrap();
        fs::write(f.root.join("a.txt"), "a").unwrap();
        fs::write(sub.join("b.txt"), "b").unwrap();
        let deep = sub.join("deep/c.txt");
        fs::write(&deep, "c").unwrap();

        assert_eq!(f.apply(&sub, ChangeKind::Created), [FileEvent::Created(sub.join("b.txt"))]);
        assert!(f.apply(&deep, ChangeKind::Modified).is_empty());
        assert!(f.apply(&deep, ChangeKind::Created).is_empty());

        let events = f.apply(&f.root, ChangeKind::Rescan);
        assert_eq!(events, [FileEvent::Created(f.root.join("a.txt"))]);
        assert!(!f.index.read().contains(&deep));
        assert_eq!(f.index.read().file_count(), 2);
    }

    #[test]
    fn filtered_files_are_ignored_but_directories_are_walked() {
        let only_txt = |p: &Path| p.extension().is_some_and(|e| e == "txt");
        let f = fixture_with(None, Arc::new(only_txt));
        let sub = f.root.join("docs");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("keep.txt"), "keep").unwrap();
        let skipped = sub.join("skip.bin");
        fs::write(&skipped, "skip").unwrap();

        assert_eq!(f.apply(&sub, ChangeKind::Created), [FileEvent::Created(sub.join("keep.txt"))]);
        assert!(f.apply(&skipped, ChangeKind::Modified).is_empty());
        assert_eq!(f.index.read().file_count(), 1);
    }

    #[test]
    fn deleted_while_absent_is_silent() {
        let f = fixture();
        assert!(f.apply(&f.root.join("never.txt"), ChangeKind::Deleted).is_empty());
    }

    #[test]
    fn vanished_file_degrades_to_deleted() {
        let f = fixture();
        let file = f.root.join("gone.txt");
        fs::write(&file, "here").unwrap();
        f.apply(&file, ChangeKind::Created);
        fs::remove_file(&file).unwrap();

        assert_eq!(f.apply(&file, ChangeKind::Modified), [FileEvent::Deleted(file.clone())]);
        assert!(f.apply(&file, ChangeKind::Modified).is_empty(), "absent and unreadable: nothing");
    }

    #[test]
    fn directory_create_and_delete_cover_every_file() {
        let f = fixture();
        let sub = f.root.join("sub");
        fs::create_dir_all(sub.join("deep")).unwrap();
        fs::write(sub.join("x.txt"), "x").unwrap();
        fs::write(sub.join("deep/y.txt"), "y").unwrap();

        let created = f.apply(&sub, ChangeKind::Created);
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|e| matches!(e, FileEvent::Created(_))));

        fs::remove_dir_all(&sub).unwrap();
        let deleted = f.apply(&sub, ChangeKind::Deleted);
        assert_eq!(deleted.len(), 2);
        assert_eq!(f.index.read().file_count(), 0);
    }

    #[test]
    fn rescan_reports_only_differences() {
        let f = fixture();
        let kept = f.root.join("kept.txt");
        let changed = f.root.join("changed.txt");
        let removed = f.root.join("removed.txt");
        for (p, text) in [(&kept, "same"), (&changed, "before"), (&removed, "bye")] {
            fs::write(p, text).unwrap();
            f.apply(p, ChangeKind::Created);
        }

        fs::write(&changed, "after").unwrap();
        fs::remove_file(&removed).unwrap();
        let added = f.root.join("added.txt");
        fs::write(&added, "new").unwrap();

        let mut events = f.apply(&f.root, ChangeKind::Rescan);
        events.sort_by(|a, b| a.path().cmp(b.path()));
        assert_eq!(
            events,
            [
                FileEvent::Created(added),
                FileEvent::Modified(changed),
                FileEvent::Deleted(removed),
            ]
        );
        assert_eq!(f.reconciler.scanner.diagnostics.snapshot().events_reconciled, 4);
    }

    #[tokio::test]
    async fn run_publishes_events_to_subscribers() {
        use tokio_stream::StreamExt;

        let f = fixture();
        let hub = Arc::new(SubscriptionHub::new(
            Arc::clone(&f.index),
            8,
            Duration::from_secs(1),
            Arc::new(Diagnostics::default()),
        ));
        let mut events = hub.watch_changes().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let file = f.root.join("live.txt");
        fs::write(&file, "live").unwrap();

        let Fixture { reconciler, .. } = f;
        let task = tokio::spawn(run(Arc::new(reconciler), rx, Arc::clone(&hub), cancel.clone()));
        tx.send(RawChange::new(&file, ChangeKind::Created)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.next()).await.unwrap();
        assert_eq!(event.unwrap().unwrap(), FileEvent::Created(file));

        cancel.cancel();
        task.await.unwrap();
    }
}
