//! # mementa-core
//!
//! Shared foundation for the mementa knowledge-memory engine:
//! - Error taxonomy and `Result` alias
//! - Note identity (timestamp + counter UIDs)
//! - The note/header/link data model
//! - Runtime configuration and execution policy
//! - Typed vault events and the broadcast event bus
//! - Structured logging field schema and sensitive-value masking

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod masking;
pub mod models;
pub mod uid;

pub use config::{ExecutionPolicy, Mode, PolicyOverride, RuntimeConfig};
pub use error::{Error, Result};
pub use events::{EventBus, VaultEvent};
pub use masking::mask_sensitive;
pub use models::{
    content_hash, Category, IndexedNote, LinkAnalysis, LinkKind, LinkRecord, MoveReason, Note,
    NoteHeader, NoteSummary,
};
pub use uid::{generate_uid, is_valid_uid, Uid};
