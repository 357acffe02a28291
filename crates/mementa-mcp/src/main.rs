//! mementa-mcp - knowledge-memory tool server over stdin/stdout.
//!
//! Startup wiring: configuration from the environment, tracing to stderr
//! (stdout belongs to the protocol), vault and index bootstrap, watcher and
//! backlink synchronizer in the background, then the protocol loop until a
//! termination signal. Shutdown drains in order: watcher, pending backlink
//! sync, database.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mementa_core::{Category, EventBus, Note, Result, RuntimeConfig};
use mementa_index::{Database, DbOptions, SearchEngine};
use mementa_mcp::{register_builtin, ProtocolServer, SessionStore, ToolContext, ToolRegistry};
use mementa_vault::{
    ensure_dir, BacklinkSynchronizer, NoteStore, OrganizerOptions, ParaOrganizer, SyncOptions,
    VaultLayout, VaultWatcher, WatchEvent, WatcherOptions,
};

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run()) {
        tracing::error!(error = %err, "fatal startup or runtime failure");
        eprintln!("mementa-mcp: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = RuntimeConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    tracing::info!(
        vault = %config.vault_path.display(),
        index = %config.index_path.display(),
        mode = ?config.mode,
        "starting mementa-mcp"
    );

    // Vault layer.
    let store = Arc::new(NoteStore::new(&config.vault_path));
    let bus = Arc::new(EventBus::default());
    let layout = VaultLayout::new(&config.vault_path);
    for category in Category::ALL {
        ensure_dir(&layout.dir_for(category)).await?;
    }
    let organizer = Arc::new(ParaOrganizer::new(
        store.clone(),
        layout,
        OrganizerOptions::default(),
        bus.clone(),
    ));
    let synchronizer = Arc::new(BacklinkSynchronizer::new(
        store.clone(),
        bus.clone(),
        SyncOptions::default(),
    ));

    // Index layer.
    let db = Database::open(&config.index_path, DbOptions::default()).await?;
    let engine = Arc::new(SearchEngine::new(db.clone()).with_bus(bus.clone()));

    // Bring the derived index up to date with the authoritative vault.
    let notes = initial_notes(&store).await?;
    if !notes.is_empty() {
        let report = engine.batch_index(&notes).await?;
        tracing::info!(
            successful = report.successful,
            failed = report.failed,
            "startup index pass complete"
        );
    }

    // Watcher events fan out to the backlink synchronizer and the index.
    let (watch_tx, watch_rx) = mpsc::unbounded_channel();
    let watcher = VaultWatcher::new(&config.vault_path, watch_tx, WatcherOptions::default())?;
    let (sync_tx, sync_rx) = mpsc::unbounded_channel();
    let (index_tx, index_rx) = mpsc::unbounded_channel();
    let fanout = tokio::spawn(fanout_events(watch_rx, sync_tx, index_tx));
    let sync_listener = synchronizer.clone().spawn_listener(sync_rx);
    let index_listener = tokio::spawn(index_events(index_rx, engine.clone()));

    // Tool runtime.
    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry);
    let ctx = Arc::new(ToolContext {
        store: store.clone(),
        organizer,
        synchronizer: synchronizer.clone(),
        engine: engine.clone(),
        sessions: Arc::new(SessionStore::default()),
        bus,
        config,
    });
    let server = ProtocolServer::new(Arc::new(registry), ctx);

    // Serve until EOF or a termination signal.
    server
        .serve(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await?;

    // Ordered shutdown: stop the watcher, drain pending sync, close the db.
    drop(watcher);
    fanout.abort();
    if let Err(err) = synchronizer.flush_pending().await {
        tracing::warn!(error = %err, "final backlink flush failed");
    }
    sync_listener.abort();
    index_listener.abort();
    db.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Forward each watcher event to both consumers.
async fn fanout_events(
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    sync_tx: mpsc::UnboundedSender<WatchEvent>,
    index_tx: mpsc::UnboundedSender<WatchEvent>,
) {
    while let Some(event) = rx.recv().await {
        let _ = sync_tx.send(event.clone());
        let _ = index_tx.send(event);
    }
}

/// Keep the index aligned with out-of-band vault edits.
async fn index_events(mut rx: mpsc::UnboundedReceiver<WatchEvent>, engine: Arc<SearchEngine>) {
    while let Some(event) = rx.recv().await {
        match event {
            WatchEvent::Added { note, .. } | WatchEvent::Changed { note, .. } => {
                if let Err(err) = engine.index_note(&note).await {
                    tracing::warn!(uid = %note.header.id, error = %err, "watch index failed");
                }
            }
            WatchEvent::Removed { path } => {
                let key = path.to_string_lossy();
                match engine.uid_for_path(&key).await {
                    Ok(Some(uid)) => {
                        if let Err(err) = engine.remove_note(&uid).await {
                            tracing::warn!(uid = %uid, error = %err, "watch unindex failed");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "watch lookup failed");
                    }
                }
            }
        }
    }
}

/// Load every vault note for the startup index pass.
async fn initial_notes(store: &NoteStore) -> Result<Vec<Note>> {
    let mut notes = Vec::new();
    for summary in store.list().await? {
        match store.load(&summary.path).await {
            Ok(note) => notes.push(note),
            Err(err) => {
                tracing::warn!(path = %summary.path.display(), error = %err, "skipping at startup");
            }
        }
    }
    Ok(notes)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::warn!(error = %err, "no SIGTERM handler; ctrl-c only");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    tracing::info!("termination signal received");
}
