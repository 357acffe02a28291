//! End-to-end vault invariants: save/load round trips and watcher-driven
//! backlink reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use mementa_core::EventBus;
use mementa_vault::{
    BacklinkSynchronizer, CreateNote, NoteStore, SaveOptions, SyncOptions, VaultWatcher,
    WatcherOptions,
};

#[tokio::test]
async fn save_then_load_preserves_header_and_body() {
    let dir = TempDir::new().unwrap();
    let store = NoteStore::new(dir.path());

    let mut request = CreateNote::new("Quarterly review", "## Notes\n\n- item one\n");
    request.tags = vec!["review".into(), "q3".into()];
    request.project = Some("ops".into());
    let created = store
        .create(&dir.path().join("3-Resources/q3.md"), request)
        .await
        .unwrap();

    let loaded = store.load(&created.path).await.unwrap();
    assert_eq!(loaded.header, created.header);
    assert_eq!(loaded.body, created.body);

    // A second save of the unchanged note must not alter the file.
    let before = std::fs::read_to_string(&created.path).unwrap();
    let mut note = loaded;
    store.save(&mut note, SaveOptions::default()).await.unwrap();
    let after = std::fs::read_to_string(&created.path).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn watcher_feeds_backlink_synchronizer() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(NoteStore::new(dir.path()));
    let bus = Arc::new(EventBus::default());

    let target = store
        .create(&dir.path().join("target.md"), CreateNote::new("Target", ""))
        .await
        .unwrap();

    let sync = Arc::new(BacklinkSynchronizer::new(
        store.clone(),
        bus,
        SyncOptions {
            debounce: Duration::from_millis(150),
            ..SyncOptions::default()
        },
    ));

    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = VaultWatcher::new(
        dir.path(),
        tx,
        WatcherOptions {
            debounce: Duration::from_millis(100),
            snapshot: None,
        },
    )
    .unwrap();
    let listener = sync.clone().spawn_listener(rx);

    // Simulate an out-of-band edit that introduces a body link.
    let source_path = dir.path().join("source.md");
    std::fs::write(
        &source_path,
        format!("reference to [[{}]]", target.uid()),
    )
    .unwrap();

    // Wait for the watcher -> synchronizer pipeline to converge.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(note) = store.load(&source_path).await {
            if note.header.links.contains(target.uid()) {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "backlink sync did not converge"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    listener.abort();
}
