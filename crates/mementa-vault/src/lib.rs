//! # mementa-vault
//!
//! The storage layer of mementa: human-readable markdown notes with fenced
//! header metadata, organized in a PARA directory tree.
//!
//! This crate provides:
//! - The header codec (parse, serialize, validate)
//! - Atomic file I/O primitives (temp-write + rename, backups, listing)
//! - The note repository, the single writer of note files
//! - A debounced recursive vault watcher with an optional VCS snapshot hook
//! - The PARA organizer (category routing, age-based archival)
//! - The backlink synchronizer keeping header `links` converged with bodies

pub mod backlinks;
pub mod fs;
pub mod header;
pub mod notes;
pub mod organizer;
pub mod watcher;

pub use backlinks::{BacklinkSynchronizer, SyncOptions, SyncReport};
pub use fs::{atomic_write, create_backup, ensure_dir, list_markdown, safe_read, ListOptions, WriteOptions};
pub use header::{parse_document, serialize_document, split_document, ParseMode};
pub use notes::{
    count_mentions, extract_link_candidates, CreateNote, NoteStore, SaveOptions, VaultCatalog,
};
pub use organizer::{
    resolve_category, sanitize_title, NoteMove, OrganizerOptions, ParaOrganizer, VaultLayout,
};
pub use watcher::{SnapshotOptions, VaultWatcher, WatchEvent, WatcherOptions};
