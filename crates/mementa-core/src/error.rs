//! Error types for mementa.

use thiserror::Error;

/// Result type alias using mementa's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for mementa operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found (note, file, session).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Target already exists (create into an occupied path).
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Header or body parsing failed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tool input failed schema validation.
    #[error("Schema validation failed for tool '{tool}': {detail}")]
    SchemaValidation { tool: String, detail: String },

    /// A write to the vault failed.
    #[error("Write error: {0}")]
    Write(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Indexing a note failed.
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Search operation failed.
    #[error("Search error: {0}")]
    Search(String),

    /// Link graph operation failed.
    #[error("Graph error: {0}")]
    Graph(String),

    /// Tool execution exceeded its time budget.
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Unknown tool or illegal state transition.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic tool handler failure.
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// Database integrity check failed.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short kind name, stable across layers; used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Parse(_) => "parse_error",
            Error::SchemaValidation { .. } => "schema_validation_error",
            Error::Write(_) => "write_error",
            Error::Database(_) => "database_error",
            Error::Indexing(_) => "indexing_error",
            Error::Search(_) => "search_error",
            Error::Graph(_) => "graph_error",
            Error::Timeout { .. } => "timeout",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Tool { .. } => "tool_error",
            Error::Integrity(_) => "integrity_error",
            Error::Internal(_) => "internal",
            Error::Io(_) => "write_error",
        }
    }

    /// Whether the execution policy may retry this failure.
    ///
    /// Only transient write, database, and timeout failures qualify;
    /// validation and domain errors always surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::Database(_) | Error::Timeout { .. } | Error::Io(_)
        )
    }

    /// Protocol-level error code for the tool transport.
    pub fn protocol_code(&self) -> i64 {
        match self {
            Error::InvalidRequest(_) => -32601,
            Error::SchemaValidation { .. } => -32602,
            Error::NotFound(_) => -32001,
            Error::AlreadyExists(_) => -32002,
            Error::Parse(_) => -32003,
            Error::Write(_) | Error::Io(_) => -32004,
            Error::Database(_) => -32005,
            Error::Indexing(_) => -32006,
            Error::Search(_) => -32007,
            Error::Graph(_) => -32008,
            Error::Timeout { .. } => -32009,
            Error::Integrity(_) => -32010,
            Error::Tool { .. } => -32011,
            Error::Internal(_) => -32603,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_not_found() {
        let err = Error::NotFound("note 123".to_string());
        assert_eq!(err.to_string(), "Not found: note 123");
    }

    #[test]
    fn test_display_timeout() {
        let err = Error::Timeout {
            tool: "search_memory".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Tool 'search_memory' timed out after 5000ms"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Write("disk full".into()).is_retryable());
        assert!(Error::Timeout {
            tool: "t".into(),
            timeout_ms: 1
        }
        .is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::SchemaValidation {
            tool: "t".into(),
            detail: "bad".into()
        }
        .is_retryable());
        assert!(!Error::InvalidRequest("unknown tool".into()).is_retryable());
    }

    #[test]
    fn test_kind_names_stable() {
        assert_eq!(Error::Parse("x".into()).kind(), "parse_error");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), "write_error");
    }

    #[test]
    fn test_protocol_codes_distinct_for_request_errors() {
        assert_eq!(Error::InvalidRequest("x".into()).protocol_code(), -32601);
        assert_eq!(
            Error::SchemaValidation {
                tool: "t".into(),
                detail: "d".into()
            }
            .protocol_code(),
            -32602
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
