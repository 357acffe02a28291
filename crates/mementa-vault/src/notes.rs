//! Note repository: the only writer of note files in the vault.
//!
//! Every component that mutates a note on disk goes through [`NoteStore`],
//! which keeps the exclusive-writer discipline and routes all writes through
//! the atomic I/O layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use mementa_core::{
    Category, Error, LinkAnalysis, Note, NoteHeader, NoteSummary, Result, Uid,
};

use crate::fs::{self, ListOptions, WriteOptions};
use crate::header::{self, ParseMode};

/// `[[wiki]]` style body links.
static WIKI_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("wiki link regex is valid"));

/// `[text](target)` markdown links.
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\(([^()\s]+)\)").expect("md link regex is valid"));

/// Options for [`NoteStore::save`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Write through the atomic temp-and-rename path.
    pub atomic: bool,
    /// Move the previous file aside as a `.bak` before writing.
    pub backup: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            atomic: true,
            backup: false,
        }
    }
}

/// Request for [`NoteStore::create`].
#[derive(Debug, Clone)]
pub struct CreateNote {
    pub title: String,
    pub body: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub project: Option<String>,
}

impl CreateNote {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        CreateNote {
            title: title.into(),
            body: body.into(),
            category: Category::Resources,
            tags: Vec::new(),
            project: None,
        }
    }
}

/// Title-to-UID lookup built from one vault scan, reused by bulk operations.
#[derive(Debug, Default, Clone)]
pub struct VaultCatalog {
    by_title: HashMap<String, Uid>,
    summaries: Vec<NoteSummary>,
}

impl VaultCatalog {
    pub fn resolve_title(&self, title: &str) -> Option<&Uid> {
        self.by_title.get(title)
    }

    pub fn summaries(&self) -> &[NoteSummary] {
        &self.summaries
    }
}

/// Filesystem-backed note repository rooted at the vault directory.
#[derive(Debug, Clone)]
pub struct NoteStore {
    root: PathBuf,
}

impl NoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        NoteStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a note with lenient header parsing.
    pub async fn load(&self, path: &Path) -> Result<Note> {
        self.load_with(path, ParseMode::Lenient).await
    }

    /// Load a note with an explicit parse mode.
    pub async fn load_with(&self, path: &Path, mode: ParseMode) -> Result<Note> {
        let text = fs::safe_read(path).await?;
        let (header, body) = header::parse_document(&text, mode)?;
        Ok(Note {
            path: path.to_path_buf(),
            header,
            body,
        })
    }

    /// Save a note back to its path.
    ///
    /// `updated` is bumped only when the serialized content actually differs
    /// from what is on disk, so a no-op save leaves the file untouched.
    pub async fn save(&self, note: &mut Note, options: SaveOptions) -> Result<()> {
        let existing = match fs::safe_read(&note.path).await {
            Ok(text) => Some(text),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let unchanged = existing
            .as_deref()
            .map(|text| text == header::serialize_document(&note.header, &note.body))
            .unwrap_or(false);
        if unchanged {
            return Ok(());
        }

        if let Some(text) = &existing {
            // Bump `updated` only when the body moved, not for pure header
            // rewrites such as backlink reconciliation.
            if let Ok((_, old_body)) = header::parse_document(text, ParseMode::Lenient) {
                if old_body != note.body {
                    note.header.touch();
                }
            }
            if options.backup {
                fs::create_backup(&note.path).await?;
            }
        }

        let serialized = header::serialize_document(&note.header, &note.body);
        if options.atomic {
            fs::atomic_write(
                &note.path,
                serialized.as_bytes(),
                WriteOptions { create_dirs: true },
            )
            .await
        } else {
            if let Some(parent) = note.path.parent() {
                fs::ensure_dir(parent).await?;
            }
            tokio::fs::write(&note.path, serialized.as_bytes())
                .await
                .map_err(|e| Error::Write(format!("write {}: {e}", note.path.display())))
        }
    }

    /// Create a new note at `path`. Fails when the path is already occupied.
    pub async fn create(&self, path: &Path, request: CreateNote) -> Result<Note> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| Error::Write(format!("stat {}: {e}", path.display())))?
        {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }

        let mut header = NoteHeader::new(request.title);
        header.category = request.category;
        header.tags = request.tags;
        header.project = request.project.filter(|p| !p.trim().is_empty());
        header.validate()?;

        let note = Note {
            path: path.to_path_buf(),
            header,
            body: request.body,
        };
        let serialized = header::serialize_document(&note.header, &note.body);
        fs::atomic_write(
            path,
            serialized.as_bytes(),
            WriteOptions { create_dirs: true },
        )
        .await?;
        Ok(note)
    }

    /// Delete a note file. Fails `NotFound` when the path is absent.
    pub async fn delete(&self, path: &Path, backup: bool) -> Result<()> {
        if backup {
            fs::create_backup(path).await?;
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Move a note to a new path, writing the new file before removing the
    /// old one so a crash never loses the note.
    pub async fn move_note(&self, note: &mut Note, target: &Path) -> Result<()> {
        if note.path == target {
            return Ok(());
        }
        let old_path = note.path.clone();
        let serialized = header::serialize_document(&note.header, &note.body);
        fs::atomic_write(
            target,
            serialized.as_bytes(),
            WriteOptions { create_dirs: true },
        )
        .await?;
        if let Err(e) = tokio::fs::remove_file(&old_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(Error::Io(e));
            }
        }
        note.path = target.to_path_buf();
        Ok(())
    }

    /// Header-level summaries of every note in the vault.
    pub async fn list(&self) -> Result<Vec<NoteSummary>> {
        let paths = fs::list_markdown(
            &self.root,
            &ListOptions {
                recursive: true,
                pattern: None,
            },
        )?;

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path).await {
                Ok(note) => summaries.push(NoteSummary {
                    uid: note.header.id,
                    title: note.header.title,
                    category: note.header.category,
                    project: note.header.project,
                    tags: note.header.tags,
                    updated: note.header.updated,
                    path,
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable note");
                }
            }
        }
        Ok(summaries)
    }

    /// Build the title/UID catalog from one vault scan.
    pub async fn catalog(&self) -> Result<VaultCatalog> {
        let summaries = self.list().await?;
        let mut by_title = HashMap::with_capacity(summaries.len());
        for summary in &summaries {
            // First title wins; duplicate titles are ambiguous on purpose.
            by_title
                .entry(summary.title.clone())
                .or_insert_with(|| summary.uid.clone());
        }
        Ok(VaultCatalog {
            by_title,
            summaries,
        })
    }

    /// Find a note by UID, reading only headers until the match is found.
    pub async fn find_by_uid(&self, uid: &Uid) -> Result<Option<Note>> {
        let paths = fs::list_markdown(
            &self.root,
            &ListOptions {
                recursive: true,
                pattern: None,
            },
        )?;
        for path in paths {
            let Ok(text) = fs::safe_read(&path).await else {
                continue;
            };
            let Ok((header, body)) = header::parse_document(&text, ParseMode::Lenient) else {
                continue;
            };
            if &header.id == uid {
                return Ok(Some(Note { path, header, body }));
            }
        }
        Ok(None)
    }

    /// Analyze the links of `note` against the whole vault.
    pub async fn analyze_links(&self, note: &Note) -> Result<LinkAnalysis> {
        let catalog = self.catalog().await?;
        self.analyze_links_with(note, &catalog).await
    }

    /// Analyze links using a prebuilt catalog (bulk rebuild path).
    pub async fn analyze_links_with(
        &self,
        note: &Note,
        catalog: &VaultCatalog,
    ) -> Result<LinkAnalysis> {
        let mut analysis = LinkAnalysis::default();

        for candidate in extract_link_candidates(&note.body) {
            let resolved = if let Ok(uid) = Uid::parse(&candidate) {
                catalog
                    .summaries
                    .iter()
                    .any(|s| s.uid == uid)
                    .then_some(uid)
            } else {
                catalog.resolve_title(&candidate).cloned()
            };
            match resolved {
                Some(uid) => {
                    if uid != note.header.id && !analysis.outbound.contains(&uid) {
                        analysis.outbound.push(uid);
                    }
                }
                None => {
                    if !analysis.broken.contains(&candidate) {
                        analysis.broken.push(candidate);
                    }
                }
            }
        }

        // Inbound: any vault body mentioning this note's UID or title.
        let self_uid = note.header.id.as_str();
        for summary in &catalog.summaries {
            if summary.uid == note.header.id {
                continue;
            }
            let Ok(text) = fs::safe_read(&summary.path).await else {
                continue;
            };
            let Ok((_, body)) = header::parse_document(&text, ParseMode::Lenient) else {
                continue;
            };
            if body.contains(self_uid) || mentions_title(&body, &note.header.title) {
                analysis.inbound.push(summary.uid.clone());
            }
        }

        Ok(analysis)
    }
}

/// Pull link targets out of a markdown body, skipping external URLs.
pub fn extract_link_candidates(body: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for capture in WIKI_LINK.captures_iter(body) {
        let target = capture[1].trim();
        // `[[target|alias]]` keeps only the target part.
        let target = target.split('|').next().unwrap_or(target).trim();
        if !target.is_empty() {
            candidates.push(target.to_string());
        }
    }
    for capture in MD_LINK.captures_iter(body) {
        let target = capture[1].trim();
        if target.is_empty() || target.starts_with("http://") || target.starts_with("https://") {
            continue;
        }
        // Strip a relative `.md` suffix so `[x](note.md)` resolves by title.
        let target = target.strip_suffix(".md").unwrap_or(target);
        candidates.push(target.to_string());
    }
    candidates
}

/// Count occurrences of `target` (a UID or title) in `body`.
pub fn count_mentions(body: &str, target: &str) -> usize {
    if target.is_empty() {
        return 0;
    }
    body.match_indices(target).count()
}

fn mentions_title(body: &str, title: &str) -> bool {
    !title.trim().is_empty() && body.contains(title)
}
