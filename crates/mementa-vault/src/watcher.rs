//! Vault watcher: debounced filesystem events for out-of-band edits.
//!
//! Watches the vault root recursively and forwards `{add, change, unlink}`
//! events for markdown files into a channel the backlink synchronizer and the
//! index consume. Repeated changes to the same path inside one debounce
//! window collapse to the last observation. An optional VCS snapshot hook
//! commits each flushed batch; snapshot failures are logged and never block
//! event emission.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use tokio::sync::mpsc;

use mementa_core::{defaults, Note, Result};

use crate::header::{self, ParseMode};

/// A single coalesced filesystem observation.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A markdown file appeared. Carries the leniently parsed note.
    Added { path: PathBuf, note: Note },
    /// A markdown file changed. Carries the freshly reloaded note.
    Changed { path: PathBuf, note: Note },
    /// A markdown file disappeared.
    Removed { path: PathBuf },
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Added { path, .. }
            | WatchEvent::Changed { path, .. }
            | WatchEvent::Removed { path } => path,
        }
    }
}

/// Optional VCS snapshot hook configuration.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Commit message template; `{count}` expands to the batch size.
    pub message_template: String,
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            message_template: "vault snapshot: {count} changed".to_string(),
            max_attempts: defaults::SNAPSHOT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(defaults::SNAPSHOT_BACKOFF_MS),
        }
    }
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce: Duration,
    pub snapshot: Option<SnapshotOptions>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        WatcherOptions {
            debounce: Duration::from_millis(defaults::WATCH_DEBOUNCE_MS),
            snapshot: None,
        }
    }
}

/// Recursive vault watcher. Dropping it stops the underlying notify threads.
pub struct VaultWatcher {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl VaultWatcher {
    /// Start watching `root`, forwarding events into `tx`.
    pub fn new(
        root: &Path,
        tx: mpsc::UnboundedSender<WatchEvent>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let snapshot = options.snapshot.clone();
        let snapshot_root = root.to_path_buf();

        let mut debouncer = new_debouncer(
            options.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    // Last observation per path wins within the window.
                    let mut coalesced: HashMap<PathBuf, EventKind> = HashMap::new();
                    for event in events.iter() {
                        match event.event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                                for path in event
                                    .paths
                                    .iter()
                                    .filter(|p| is_watchable(p))
                                {
                                    coalesced.insert(path.clone(), event.event.kind);
                                }
                            }
                            _ => {}
                        }
                    }
                    if coalesced.is_empty() {
                        return;
                    }

                    let mut batch_paths = Vec::with_capacity(coalesced.len());
                    for (path, kind) in coalesced {
                        if let Some(event) = load_event(&path, kind) {
                            batch_paths.push(path);
                            if tx.send(event).is_err() {
                                tracing::debug!("watch receiver dropped, discarding events");
                                return;
                            }
                        }
                    }

                    if let Some(snapshot) = &snapshot {
                        spawn_snapshot(snapshot.clone(), snapshot_root.clone(), batch_paths);
                    }
                }
                Err(errors) => {
                    tracing::error!(?errors, "vault watcher reported errors");
                }
            },
        )
        .map_err(|e| mementa_core::Error::Internal(format!("watcher init: {e}")))?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| mementa_core::Error::Internal(format!("watch {}: {e}", root.display())))?;

        tracing::info!(root = %root.display(), "vault watcher started");
        Ok(VaultWatcher {
            _debouncer: debouncer,
        })
    }
}

/// Only plain markdown files are interesting; dotfiles, VCS internals,
/// vendored trees, and temp spill are not.
pub fn is_watchable(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.ends_with(".tmp") {
        return false;
    }
    if path.extension().map(|e| e != "md").unwrap_or(true) {
        return false;
    }
    !path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.') || defaults::IGNORED_DIRS.contains(&s))
            .unwrap_or(false)
    })
}

/// Map a coalesced kind to a watch event, loading the note for non-removals.
///
/// Runs on the notify thread, so file reads here are deliberately blocking.
fn load_event(path: &Path, kind: EventKind) -> Option<WatchEvent> {
    match kind {
        EventKind::Remove(_) => Some(WatchEvent::Removed {
            path: path.to_path_buf(),
        }),
        EventKind::Create(_) | EventKind::Modify(_) => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Created and deleted within one window.
                    return Some(WatchEvent::Removed {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "watched file unreadable");
                    return None;
                }
            };
            let (header, body) = match header::parse_document(&text, ParseMode::Lenient) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "watched file unparseable");
                    return None;
                }
            };
            let note = Note {
                path: path.to_path_buf(),
                header,
                body,
            };
            let event = if matches!(kind, EventKind::Create(_)) {
                WatchEvent::Added {
                    path: path.to_path_buf(),
                    note,
                }
            } else {
                WatchEvent::Changed {
                    path: path.to_path_buf(),
                    note,
                }
            };
            Some(event)
        }
        _ => None,
    }
}

/// Run the VCS snapshot hook off the watcher thread.
fn spawn_snapshot(options: SnapshotOptions, root: PathBuf, paths: Vec<PathBuf>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        std::thread::spawn(move || snapshot_blocking(&options, &root, &paths));
        return;
    };
    handle.spawn(async move {
        tokio::task::spawn_blocking(move || snapshot_blocking(&options, &root, &paths))
            .await
            .ok();
    });
}

fn snapshot_blocking(options: &SnapshotOptions, root: &Path, paths: &[PathBuf]) {
    let message = options
        .message_template
        .replace("{count}", &paths.len().to_string());

    for attempt in 1..=options.max_attempts {
        match try_snapshot(root, paths, &message) {
            Ok(()) => {
                tracing::debug!(files = paths.len(), "vault snapshot committed");
                return;
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "vault snapshot failed");
                if attempt < options.max_attempts {
                    std::thread::sleep(options.backoff * attempt);
                }
            }
        }
    }
}

fn try_snapshot(root: &Path, paths: &[PathBuf], message: &str) -> std::io::Result<()> {
    let mut add = std::process::Command::new("git");
    add.arg("-C").arg(root).arg("add").arg("--");
    for path in paths {
        add.arg(path);
    }
    run_git(add)?;

    let mut commit = std::process::Command::new("git");
    commit
        .arg("-C")
        .arg(root)
        .arg("commit")
        .arg("--no-verify")
        .arg("-m")
        .arg(message);
    run_git(commit)
}

fn run_git(mut command: std::process::Command) -> std::io::Result<()> {
    let output = command.output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_is_watchable_filters() {
        assert!(is_watchable(Path::new("/vault/3-Resources/note.md")));
        assert!(!is_watchable(Path::new("/vault/.hidden.md")));
        assert!(!is_watchable(Path::new("/vault/.git/note.md")));
        assert!(!is_watchable(Path::new("/vault/node_modules/pkg/readme.md")));
        assert!(!is_watchable(Path::new("/vault/note.tmp")));
        assert!(!is_watchable(Path::new("/vault/note.txt")));
        assert!(!is_watchable(Path::new("/vault/nofile")));
    }

    #[tokio::test]
    async fn test_watcher_reports_add_change_unlink() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = VaultWatcher::new(
            dir.path(),
            tx,
            WatcherOptions {
                debounce: Duration::from_millis(100),
                snapshot: None,
            },
        )
        .unwrap();

        let path = dir.path().join("note.md");
        std::fs::write(&path, "first").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within deadline")
            .expect("channel closed");
        match event {
            WatchEvent::Added { note, .. } | WatchEvent::Changed { note, .. } => {
                assert_eq!(note.body, "first");
                assert_eq!(note.header.title, "Untitled");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        std::fs::remove_file(&path).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no unlink event within deadline")
            .expect("channel closed");
        assert!(matches!(event, WatchEvent::Removed { .. }));
    }

    #[tokio::test]
    async fn test_watcher_ignores_non_markdown() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = VaultWatcher::new(
            dir.path(),
            tx,
            WatcherOptions {
                debounce: Duration::from_millis(100),
                snapshot: None,
            },
        )
        .unwrap();

        std::fs::write(dir.path().join("data.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".draft.md"), "hidden").unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(600), rx.recv()).await;
        assert!(outcome.is_err(), "expected silence, got {outcome:?}");
    }
}
