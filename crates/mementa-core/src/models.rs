//! Data model for notes, headers, and link relations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::uid::Uid;

/// PARA category of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Category {
    Projects,
    Areas,
    Resources,
    Archives,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Projects,
        Category::Areas,
        Category::Resources,
        Category::Archives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Projects => "Projects",
            Category::Areas => "Areas",
            Category::Resources => "Resources",
            Category::Archives => "Archives",
        }
    }

    /// Default on-disk directory name for the category.
    pub fn default_dir(&self) -> &'static str {
        match self {
            Category::Projects => "1-Projects",
            Category::Areas => "2-Areas",
            Category::Resources => "3-Resources",
            Category::Archives => "4-Archives",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Resources
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Projects" => Ok(Category::Projects),
            "Areas" => Ok(Category::Areas),
            "Resources" => Ok(Category::Resources),
            "Archives" => Ok(Category::Archives),
            other => Err(Error::Parse(format!("unknown category: {other:?}"))),
        }
    }
}

/// Kind of a directed link relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Internal,
    External,
    Tag,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Internal => "internal",
            LinkKind::External => "external",
            LinkKind::Tag => "tag",
        }
    }
}

impl FromStr for LinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internal" => Ok(LinkKind::Internal),
            "external" => Ok(LinkKind::External),
            "tag" => Ok(LinkKind::Tag),
            other => Err(Error::Parse(format!("unknown link kind: {other:?}"))),
        }
    }
}

/// Header metadata of a note.
///
/// Serialized as the `---`-fenced prefix of the markdown file, with the
/// stable key order `id, title, category, tags, project, created, updated,
/// links`, followed by any preserved unknown scalar fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteHeader {
    pub id: Uid,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub links: Vec<Uid>,
    /// Unknown scalar fields preserved from lenient parses.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl NoteHeader {
    /// Fresh header for a new note with generated identity and now-timestamps.
    ///
    /// Timestamps are truncated to microsecond precision, matching what the
    /// header serialization retains.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        NoteHeader {
            id: crate::uid::generate_uid(),
            title: title.into(),
            category: Category::Resources,
            tags: Vec::new(),
            project: None,
            created: now,
            updated: now,
            links: Vec::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Bump the `updated` timestamp, keeping `created <= updated`.
    pub fn touch(&mut self) {
        let now = Utc::now().trunc_subsecs(6);
        self.updated = if now > self.created { now } else { self.created };
    }

    /// Validate the header invariants shared by strict and lenient modes.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Parse("empty title".into()));
        }
        if self.created > self.updated {
            return Err(Error::Parse(format!(
                "created {} is after updated {}",
                self.created, self.updated
            )));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Parse("empty tag".into()));
        }
        if let Some(project) = &self.project {
            if project.trim().is_empty() {
                return Err(Error::Parse("empty project".into()));
            }
        }
        if self.links.contains(&self.id) {
            return Err(Error::Parse("self link".into()));
        }
        Ok(())
    }
}

/// A markdown note: header metadata plus body, bound to its vault path.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: PathBuf,
    pub header: NoteHeader,
    pub body: String,
}

impl Note {
    pub fn uid(&self) -> &Uid {
        &self.header.id
    }

    /// Hash of the body, used to skip redundant reindexing.
    pub fn content_hash(&self) -> String {
        content_hash(&self.body)
    }
}

/// Compute the canonical content hash (`sha256:<hex>`).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Directed link relation between two notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: Uid,
    pub target: Uid,
    pub kind: LinkKind,
    /// Mention count in the source body, capped at
    /// [`crate::defaults::LINK_STRENGTH_CAP`].
    pub strength: i64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Row of the `notes` index table, derived from the authoritative note file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedNote {
    pub uid: Uid,
    pub title: String,
    pub category: Category,
    pub file_path: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

/// Header-level summary used by vault scans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteSummary {
    pub uid: Uid,
    pub title: String,
    pub category: Category,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub updated: DateTime<Utc>,
    pub path: PathBuf,
}

/// Result of analyzing the links of one note against the vault.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkAnalysis {
    /// Body links resolved to vault UIDs.
    pub outbound: Vec<Uid>,
    /// Body link candidates that resolved to nothing.
    pub broken: Vec<String>,
    /// UIDs of vault notes whose bodies mention this note.
    pub inbound: Vec<Uid>,
}

/// Why a note was moved between PARA directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveReason {
    Manual,
    AutoArchive,
    CategoryChange,
    ProjectChange,
}

impl MoveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveReason::Manual => "manual",
            MoveReason::AutoArchive => "auto-archive",
            MoveReason::CategoryChange => "category-change",
            MoveReason::ProjectChange => "project-change",
        }
    }
}
