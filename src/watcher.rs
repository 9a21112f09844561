/// Incremental file watching with debounced batches
///
/// Raw filesystem events are collected into a pending set and flushed as one
/// batch once the tree has been quiet for the debounce interval, so an
/// editor save storm becomes a single incremental update. The native notify
/// backend is preferred; when it cannot start, a polling scanner takes over
/// and diffs modification times on an interval.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{IndexingConfig, WatcherConfig};
use crate::glob_utils::PatternFilter;
use crate::indexer::file_walker;
use crate::types::WatcherStatusInfo;

/// A change the index applier must process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// File was created or modified
    Changed(PathBuf),
    /// File is gone
    Removed(PathBuf),
}

#[derive(Debug, Default)]
pub struct WatcherStatus {
    running: AtomicBool,
    backend: Mutex<Option<String>>,
    events_seen: AtomicU64,
    batches_flushed: AtomicU64,
}

impl WatcherStatus {
    pub fn info(&self) -> WatcherStatusInfo {
        WatcherStatusInfo {
            running: self.running.load(Ordering::Relaxed),
            backend: self
                .backend
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            events_seen: self.events_seen.load(Ordering::Relaxed),
            batches_applied: self.batches_flushed.load(Ordering::Relaxed),
        }
    }

    fn set_backend(&self, backend: &str) {
        *self.backend.lock().unwrap_or_else(|p| p.into_inner()) = Some(backend.to_string());
    }
}

/// Handle keeping the watcher alive; dropping or stopping it ends watching
pub struct WatchHandle {
    status: Arc<WatcherStatus>,
    cancel: CancellationToken,
    // Kept alive for the native backend; None under polling
    _native: Option<notify::RecommendedWatcher>,
}

impl WatchHandle {
    pub fn status(&self) -> Arc<WatcherStatus> {
        self.status.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.status.running.store(false, Ordering::Relaxed);
        info!("Watcher stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.status.running.store(false, Ordering::Relaxed);
    }
}

/// Start watching `root`, delivering debounced batches to `batches`
pub fn start(
    root: PathBuf,
    watcher_config: &WatcherConfig,
    indexing_config: &IndexingConfig,
    data_dir: PathBuf,
    batches: mpsc::Sender<Vec<FileEvent>>,
    parent_cancel: &CancellationToken,
) -> Result<WatchHandle, crate::error::WatcherError> {
    let status = Arc::new(WatcherStatus::default());
    let cancel = parent_cancel.child_token();
    let filter = PatternFilter::new(
        &indexing_config.include_patterns,
        &indexing_config.exclude_patterns,
    )
    .map_err(|e| crate::error::WatcherError::StartFailed(e.to_string()))?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<FileEvent>();

    let native = match start_native(&root, raw_tx.clone()) {
        Ok(w) => {
            status.set_backend("notify");
            info!("Watching {} with the notify backend", root.display());
            Some(w)
        }
        Err(e) => {
            warn!(
                "notify backend unavailable ({}); polling every {}s instead",
                e, watcher_config.poll_interval_secs
            );
            status.set_backend("polling");
            spawn_poller(
                root.clone(),
                indexing_config.clone(),
                filter.clone(),
                Duration::from_secs(watcher_config.poll_interval_secs.max(1)),
                raw_tx,
                cancel.clone(),
            );
            None
        }
    };

    status.running.store(true, Ordering::Relaxed);
    spawn_debouncer(
        root,
        data_dir,
        filter,
        Duration::from_millis(watcher_config.debounce_ms.max(1)),
        raw_rx,
        batches,
        status.clone(),
        cancel.clone(),
    );

    Ok(WatchHandle {
        status,
        cancel,
        _native: native,
    })
}

fn start_native(
    root: &Path,
    tx: mpsc::UnboundedSender<FileEvent>,
) -> notify::Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(e) => e,
            Err(e) => {
                debug!("Watch error: {}", e);
                return;
            }
        };
        for file_event in classify(&event) {
            let _ = tx.send(file_event);
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Translate a notify event into index-relevant file events
fn classify(event: &Event) -> Vec<FileEvent> {
    let mut out = Vec::new();
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                // Renames arrive as Modify(Name); existence decides the side
                if path.is_file() {
                    out.push(FileEvent::Changed(path.clone()));
                } else if !path.exists() {
                    out.push(FileEvent::Removed(path.clone()));
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(FileEvent::Removed(path.clone()));
            }
        }
        _ => {}
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn spawn_debouncer(
    root: PathBuf,
    data_dir: PathBuf,
    filter: PatternFilter,
    debounce: Duration,
    mut raw_rx: mpsc::UnboundedReceiver<FileEvent>,
    batches: mpsc::Sender<Vec<FileEvent>>,
    status: Arc<WatcherStatus>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, FileEvent> = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = raw_rx.recv() => {
                    let Some(event) = event else { break };
                    let path = match &event {
                        FileEvent::Changed(p) | FileEvent::Removed(p) => p.clone(),
                    };
                    if !relevant(&root, &data_dir, &filter, &path) {
                        continue;
                    }
                    status.events_seen.fetch_add(1, Ordering::Relaxed);
                    pending.insert(path, event);
                }
                _ = tokio::time::sleep(debounce), if !pending.is_empty() => {
                    let batch: Vec<FileEvent> = {
                        let mut drained: Vec<(PathBuf, FileEvent)> = pending.drain().collect();
                        drained.sort_by(|(a, _), (b, _)| a.cmp(b));
                        drained.into_iter().map(|(_, e)| e).collect()
                    };
                    debug!("Flushing {} debounced file events", batch.len());
                    status.batches_flushed.fetch_add(1, Ordering::Relaxed);
                    if batches.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Whether an event path matters to the index
fn relevant(root: &Path, data_dir: &Path, filter: &PatternFilter, path: &Path) -> bool {
    if path.starts_with(data_dir) {
        return false;
    }
    let rel = file_walker::relative_path(root, path);
    filter.matches(&rel)
}

fn spawn_poller(
    root: PathBuf,
    config: IndexingConfig,
    filter: PatternFilter,
    interval: Duration,
    tx: mpsc::UnboundedSender<FileEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut snapshot: HashMap<String, (i64, u64)> = HashMap::new();
        if let Ok(files) = scan(&root, &config, &filter).await {
            snapshot = files;
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let current = match scan(&root, &config, &filter).await {
                Ok(c) => c,
                Err(e) => {
                    debug!("Poll scan failed: {}", e);
                    continue;
                }
            };
            for (rel, stamp) in &current {
                if snapshot.get(rel) != Some(stamp) {
                    let _ = tx.send(FileEvent::Changed(root.join(rel)));
                }
            }
            for rel in snapshot.keys() {
                if !current.contains_key(rel) {
                    let _ = tx.send(FileEvent::Removed(root.join(rel)));
                }
            }
            snapshot = current;
        }
    });
}

async fn scan(
    root: &Path,
    config: &IndexingConfig,
    filter: &PatternFilter,
) -> anyhow::Result<HashMap<String, (i64, u64)>> {
    let root = root.to_path_buf();
    let config = config.clone();
    let filter = filter.clone();
    let files = tokio::task::spawn_blocking(move || {
        file_walker::walk_root(&root, &config, &filter, true)
    })
    .await??;
    Ok(files
        .into_iter()
        .map(|f| (f.rel_path, (f.mtime, f.size)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_remove() {
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/repo/gone.rs")],
            attrs: Default::default(),
        };
        assert_eq!(
            classify(&event),
            vec![FileEvent::Removed(PathBuf::from("/repo/gone.rs"))]
        );
    }

    #[test]
    fn test_relevant_skips_data_dir() {
        let filter = PatternFilter::new(&[], &[]).unwrap();
        let root = Path::new("/repo");
        let data_dir = Path::new("/repo/.code_slice");
        assert!(!relevant(root, data_dir, &filter, Path::new("/repo/.code_slice/meta.json")));
        assert!(relevant(root, data_dir, &filter, Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn test_relevant_applies_filter() {
        let filter = PatternFilter::new(&[], &["**/*.log".to_string()]).unwrap();
        let root = Path::new("/repo");
        let data_dir = Path::new("/repo/.code_slice");
        assert!(!relevant(root, data_dir, &filter, Path::new("/repo/out.log")));
    }

    #[tokio::test]
    async fn test_debounced_batch_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(root.join("a.rs"), "fn a() {}").unwrap();

        let (batch_tx, mut batch_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let config = WatcherConfig {
            auto_start: false,
            debounce_ms: 100,
            poll_interval_secs: 1,
        };
        let handle = start(
            root.clone(),
            &config,
            &IndexingConfig::default(),
            root.join(".code_slice"),
            batch_tx,
            &cancel,
        )
        .unwrap();

        // Give the backend a moment to arm, then touch two files
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(root.join("a.rs"), "fn a() { changed(); }").unwrap();
        std::fs::write(root.join("b.rs"), "fn b() {}").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), batch_rx.recv())
            .await
            .expect("timed out waiting for a batch")
            .expect("watcher channel closed");
        let mut paths: Vec<PathBuf> = batch
            .iter()
            .map(|e| match e {
                FileEvent::Changed(p) | FileEvent::Removed(p) => p.clone(),
            })
            .collect();
        paths.sort();
        assert!(paths.contains(&root.join("a.rs")) || paths.contains(&root.join("b.rs")));

        let status = handle.status();
        assert!(status.info().running);
        assert!(status.info().events_seen >= 1);
        handle.stop();
        assert!(!handle.status().info().running);
    }
}
