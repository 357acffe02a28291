//! Structured logging field name constants.
//!
//! All crates use these constants for consistent structured logging fields so
//! log tooling can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration (search hits, sync batches) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "vault", "index", "search", "graph", "tools", "protocol"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name, e.g. "search", "index_note", "sync".
pub const OPERATION: &str = "op";

/// Tool name being executed.
pub const TOOL: &str = "tool";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Note UID being operated on.
pub const UID: &str = "uid";

/// Vault-relative or absolute file path.
pub const PATH: &str = "path";

/// Search query text (masked before emission).
pub const QUERY: &str = "query";

/// Session context identifier.
pub const SESSION_ID: &str = "session_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or listing.
pub const RESULT_COUNT: &str = "result_count";

/// Attempt number within an execution-policy retry loop (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of notes touched by a batch operation.
pub const BATCH_SIZE: &str = "batch_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails (masked before emission).
pub const ERROR_MSG: &str = "error";
