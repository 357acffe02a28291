//! Backlink synchronizer.
//!
//! Keeps the invariant: for every note N, `N.header.links` equals the set of
//! UIDs resolved from N's body. Watcher events feed a pending set which is
//! flushed in fixed-size batches with bounded concurrency, so edit bursts
//! cannot exhaust file handles.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use mementa_core::{defaults, Error, EventBus, Note, Result, Uid, VaultEvent};

use crate::header::{self, ParseMode};
use crate::notes::{NoteStore, SaveOptions, VaultCatalog};
use crate::watcher::WatchEvent;
use crate::fs;

/// Synchronizer tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Pending UIDs flushed per batch.
    pub batch_size: usize,
    /// Concurrent per-note syncs within a batch.
    pub max_in_flight: usize,
    /// Quiet period before a flush after the last enqueued event.
    pub debounce: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            batch_size: defaults::SYNC_BATCH_SIZE,
            max_in_flight: defaults::SYNC_MAX_IN_FLIGHT,
            debounce: Duration::from_millis(defaults::SYNC_DEBOUNCE_MS),
        }
    }
}

/// Report of a bulk synchronization pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Notes examined.
    pub synced: usize,
    /// Notes whose header links actually changed.
    pub changed: usize,
    /// Per-note failures, logged and skipped.
    pub failed: Vec<(Uid, String)>,
}

/// Event-driven reconciler of header `links` against body links.
pub struct BacklinkSynchronizer {
    store: Arc<NoteStore>,
    bus: Arc<EventBus>,
    pending: Mutex<HashSet<Uid>>,
    options: SyncOptions,
}

impl BacklinkSynchronizer {
    pub fn new(store: Arc<NoteStore>, bus: Arc<EventBus>, options: SyncOptions) -> Self {
        BacklinkSynchronizer {
            store,
            bus,
            pending: Mutex::new(HashSet::new()),
            options,
        }
    }

    /// Reconcile one note. Returns whether the header was rewritten.
    pub async fn sync(&self, uid: &Uid) -> Result<bool> {
        let catalog = self.store.catalog().await?;
        self.sync_with(uid, &catalog).await
    }

    async fn sync_with(&self, uid: &Uid, catalog: &VaultCatalog) -> Result<bool> {
        let Some(mut note) = self.store.find_by_uid(uid).await? else {
            return Err(Error::NotFound(format!("note {uid}")));
        };

        let analysis = self.store.analyze_links_with(&note, catalog).await?;
        let current: HashSet<&Uid> = note.header.links.iter().collect();
        let resolved: HashSet<&Uid> = analysis.outbound.iter().collect();
        if current == resolved {
            return Ok(false);
        }

        note.header.links = analysis.outbound;
        self.store.save(&mut note, SaveOptions::default()).await?;
        tracing::debug!(uid = %uid, links = note.header.links.len(), "backlinks reconciled");
        Ok(true)
    }

    /// Rebuild every note's links in batches with bounded concurrency.
    pub async fn rebuild_all(&self) -> Result<SyncReport> {
        let catalog = self.store.catalog().await?;
        let uids: Vec<Uid> = catalog
            .summaries()
            .iter()
            .map(|s| s.uid.clone())
            .collect();
        self.sync_batch(&uids, &catalog).await
    }

    async fn sync_batch(&self, uids: &[Uid], catalog: &VaultCatalog) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for chunk in uids.chunks(self.options.batch_size) {
            let outcomes = stream::iter(chunk.iter().cloned())
                .map(|uid| async move {
                    let result = self.sync_with(&uid, catalog).await;
                    (uid, result)
                })
                .buffer_unordered(self.options.max_in_flight)
                .collect::<Vec<_>>()
                .await;

            for (uid, outcome) in outcomes {
                report.synced += 1;
                match outcome {
                    Ok(true) => report.changed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(uid = %uid, error = %err, "backlink sync failed");
                        report.failed.push((uid, err.to_string()));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Remove a deleted UID from every header that still references it.
    ///
    /// Returns the UIDs whose headers were rewritten and emits a single
    /// `BacklinkSync` event carrying the affected count. Cleaning up a UID
    /// nobody references is a no-op success.
    pub async fn cleanup(&self, deleted: &Uid) -> Result<Vec<Uid>> {
        let mut affected = Vec::new();
        for summary in self.store.list().await? {
            let mut note = match self.store.load(&summary.path).await {
                Ok(note) => note,
                Err(err) => {
                    tracing::warn!(path = %summary.path.display(), error = %err, "skipping during cleanup");
                    continue;
                }
            };
            if !note.header.links.contains(deleted) {
                continue;
            }
            note.header.links.retain(|l| l != deleted);
            self.store.save(&mut note, SaveOptions::default()).await?;
            affected.push(note.header.id.clone());
        }

        self.bus.emit(VaultEvent::BacklinkSync {
            target: deleted.clone(),
            affected: affected.len(),
        });
        Ok(affected)
    }

    /// Queue a note for the next debounced flush.
    pub async fn enqueue(&self, uid: Uid) {
        self.pending.lock().await.insert(uid);
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Flush everything currently pending.
    pub async fn flush_pending(&self) -> Result<SyncReport> {
        let uids: Vec<Uid> = {
            let mut pending = self.pending.lock().await;
            pending.drain().collect()
        };
        if uids.is_empty() {
            return Ok(SyncReport::default());
        }
        let catalog = self.store.catalog().await?;
        self.sync_batch(&uids, &catalog).await
    }

    /// Make sure an out-of-band file carries its header on disk.
    ///
    /// Files written without a header get a synthesized one on every parse,
    /// so their UID would drift between passes. Persisting the header once
    /// pins the identity.
    async fn adopt(&self, mut note: Note) -> Uid {
        let stable = match fs::safe_read(&note.path).await {
            Ok(text) => header::parse_document(&text, ParseMode::Strict).is_ok(),
            Err(_) => true, // gone again; nothing to pin
        };
        if !stable {
            if let Err(err) = self.store.save(&mut note, SaveOptions::default()).await {
                tracing::warn!(path = %note.path.display(), error = %err, "could not persist header");
            }
        }
        note.header.id
    }

    /// Consume watcher events: enqueue touched notes and flush after a quiet
    /// period. Runs until the channel closes.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(event) = rx.recv().await else {
                    break;
                };
                match event {
                    WatchEvent::Added { note, .. } | WatchEvent::Changed { note, .. } => {
                        let uid = self.adopt(note).await;
                        self.enqueue(uid).await;
                    }
                    WatchEvent::Removed { .. } => {}
                }

                // Keep absorbing events until the stream goes quiet.
                loop {
                    match tokio::time::timeout(self.options.debounce, rx.recv()).await {
                        Ok(Some(WatchEvent::Added { note, .. }))
                        | Ok(Some(WatchEvent::Changed { note, .. })) => {
                            let uid = self.adopt(note).await;
                            self.enqueue(uid).await;
                        }
                        Ok(Some(WatchEvent::Removed { .. })) => {}
                        Ok(None) | Err(_) => break,
                    }
                }

                if let Err(err) = self.flush_pending().await {
                    tracing::error!(error = %err, "pending backlink flush failed");
                }
            }
            // Channel closed: drain whatever is left.
            if let Err(err) = self.flush_pending().await {
                tracing::error!(error = %err, "final backlink flush failed");
            }
        })
    }
}
