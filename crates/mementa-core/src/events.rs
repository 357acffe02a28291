//! Typed vault events and the broadcast event bus.
//!
//! Components that mutate the vault or the index announce it here; the
//! backlink synchronizer, the index, and any observer subscribe
//! independently. Slow receivers that fall behind get a `Lagged` error and
//! miss events; freshness matters more than completeness for these streams.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::MoveReason;
use crate::uid::Uid;

/// Domain event emitted on the vault bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum VaultEvent {
    /// A note appeared in the vault.
    NoteAdded { uid: Uid, path: PathBuf },
    /// A note's file content changed.
    NoteChanged { uid: Uid, path: PathBuf },
    /// A note file disappeared from the vault.
    NoteRemoved { path: PathBuf },
    /// The organizer relocated a note.
    NoteMoved {
        uid: Uid,
        from: PathBuf,
        to: PathBuf,
        reason: MoveReason,
    },
    /// The synchronizer removed a deleted UID from referencing headers.
    BacklinkSync { target: Uid, affected: usize },
    /// A note's index, FTS, and link rows were refreshed.
    IndexUpdated { uid: Uid },
    /// A note's index, FTS, and link rows were deleted.
    IndexRemoved { uid: Uid },
}

impl VaultEvent {
    /// Dot-namespaced event name for logs and observers.
    pub fn event_type(&self) -> &'static str {
        match self {
            VaultEvent::NoteAdded { .. } => "note.added",
            VaultEvent::NoteChanged { .. } => "note.changed",
            VaultEvent::NoteRemoved { .. } => "note.removed",
            VaultEvent::NoteMoved { .. } => "note.moved",
            VaultEvent::BacklinkSync { .. } => "backlink.sync",
            VaultEvent::IndexUpdated { .. } => "index.updated",
            VaultEvent::IndexRemoved { .. } => "index.removed",
        }
    }
}

/// Broadcast-based event bus distributing [`VaultEvent`]s to consumers.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl EventBus {
    /// Create a bus with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: VaultEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            subscribers = self.tx.receiver_count(),
            "bus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to the stream. Each subscriber gets an independent cursor.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uid::generate_uid;

    #[tokio::test]
    async fn test_emit_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let uid = generate_uid();

        bus.emit(VaultEvent::IndexUpdated { uid: uid.clone() });

        match rx.recv().await.unwrap() {
            VaultEvent::IndexUpdated { uid: got } => assert_eq!(got, uid),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_the_same_event() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(VaultEvent::BacklinkSync {
            target: generate_uid(),
            affected: 3,
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            VaultEvent::BacklinkSync { affected: 3, .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            VaultEvent::BacklinkSync { affected: 3, .. }
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(VaultEvent::NoteRemoved {
            path: PathBuf::from("/tmp/gone.md"),
        });
    }

    #[test]
    fn test_event_type_names() {
        let uid = generate_uid();
        assert_eq!(
            VaultEvent::NoteMoved {
                uid: uid.clone(),
                from: PathBuf::new(),
                to: PathBuf::new(),
                reason: MoveReason::AutoArchive,
            }
            .event_type(),
            "note.moved"
        );
        assert_eq!(
            VaultEvent::IndexRemoved { uid }.event_type(),
            "index.removed"
        );
    }

    #[test]
    fn test_event_json_carries_reason() {
        let event = VaultEvent::NoteMoved {
            uid: generate_uid(),
            from: PathBuf::from("/v/2-Areas/a.md"),
            to: PathBuf::from("/v/4-Archives/a.md"),
            reason: MoveReason::AutoArchive,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"NoteMoved"#));
        assert!(json.contains(r#""reason":"auto-archive"#));
    }
}
