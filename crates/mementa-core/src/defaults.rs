//! Centralized default constants for the mementa system.
//!
//! **This module is the single source of truth** for shared default values.
//! Components reference these constants instead of defining their own magic
//! numbers. When adding new constants, place them in the matching section.

// =============================================================================
// VAULT & WATCHER
// =============================================================================

/// Debounce window for filesystem events in milliseconds.
pub const WATCH_DEBOUNCE_MS: u64 = 500;

/// Directory names the watcher never descends into.
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

/// Attempts for the optional VCS snapshot hook.
pub const SNAPSHOT_MAX_ATTEMPTS: u32 = 3;

/// Base backoff between snapshot attempts in milliseconds (linear).
pub const SNAPSHOT_BACKOFF_MS: u64 = 250;

// =============================================================================
// PARA ORGANIZER
// =============================================================================

/// Days without an update before a note is considered archival.
pub const ARCHIVE_THRESHOLD_DAYS: i64 = 90;

/// Maximum length of a sanitized title used as a filename stem.
pub const SANITIZED_TITLE_MAX: usize = 50;

// =============================================================================
// BACKLINK SYNCHRONIZER
// =============================================================================

/// Pending UIDs flushed per batch.
pub const SYNC_BATCH_SIZE: usize = 10;

/// Concurrent per-note syncs in flight within a batch.
pub const SYNC_MAX_IN_FLIGHT: usize = 5;

/// Debounce before flushing the pending set, in milliseconds.
pub const SYNC_DEBOUNCE_MS: u64 = 1_000;

// =============================================================================
// DATABASE
// =============================================================================

/// Index database filename when the caller leaves the path blank.
pub const INDEX_DB_FILENAME: &str = ".memory-index.db";

/// Current schema version recorded in `index_metadata`.
pub const SCHEMA_VERSION: i64 = 1;

/// SQLite page size in bytes.
pub const DB_PAGE_SIZE: u32 = 4096;

/// SQLite cache size in KiB (applied as a negative `cache_size` pragma).
pub const DB_CACHE_SIZE_KIB: i64 = 64_000;

/// Connections in the pool. Writes serialize in WAL mode regardless.
pub const DB_MAX_CONNECTIONS: u32 = 4;

// =============================================================================
// SEARCH & GRAPH
// =============================================================================

/// Default page size for search results.
pub const SEARCH_LIMIT: i64 = 50;

/// Candidate pool cap for hybrid rescoring.
pub const SEARCH_CANDIDATE_CAP: usize = 500;

/// Default snippet length in characters.
pub const SNIPPET_LENGTH: usize = 150;

/// Default highlight tag wrapped around matched terms.
pub const HIGHLIGHT_TAG: &str = "mark";

/// Weight of the FTS score in the hybrid blend.
pub const FTS_WEIGHT: f64 = 0.7;

/// Weight of the link score in the hybrid blend.
pub const LINK_WEIGHT: f64 = 0.3;

/// Backlinks and outbound links sampled per candidate during rescoring.
pub const LINK_SAMPLE: i64 = 10;

/// Raw link score divisor before clamping to [0, 1].
pub const LINK_SCORE_DIVISOR: f64 = 20.0;

/// Strength cap for a single link relation.
pub const LINK_STRENGTH_CAP: i64 = 10;

/// Default traversal depth for `connected`.
pub const CONNECTED_DEPTH: u32 = 2;

/// Default node cap for `connected`.
pub const CONNECTED_LIMIT: usize = 100;

/// Per-hop score decay during graph traversal.
pub const CONNECTED_DECAY: f64 = 0.7;

/// Default page size for backlink/outbound/orphan listings.
pub const GRAPH_LIMIT: i64 = 50;

/// Notes per transaction chunk during batch indexing.
pub const BATCH_INDEX_CHUNK: usize = 100;

// =============================================================================
// TOOL RUNTIME
// =============================================================================

/// Default per-attempt tool timeout in milliseconds.
pub const TOOL_TIMEOUT_MS: u64 = 5_000;

/// Default retry budget beyond the first attempt.
pub const TOOL_MAX_RETRIES: u32 = 2;

/// Characters of masked input echoed into tool logs.
pub const INPUT_PREVIEW_CHARS: usize = 200;

// =============================================================================
// SESSIONS
// =============================================================================

/// Recent UIDs retained per session context.
pub const SESSION_CAPACITY: usize = 32;

/// Default result count for associative search.
pub const ASSOCIATE_LIMIT: usize = 5;

/// Default blend weight of session affinity in associative search.
pub const ASSOCIATE_STRENGTH: f64 = 0.7;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast capacity of the vault event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;
