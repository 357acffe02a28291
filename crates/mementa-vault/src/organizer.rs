//! PARA organizer: category routing and age-based archival.
//!
//! Routing rules, in priority order: a note with a project belongs in
//! `Projects`; a note untouched past the archive threshold belongs in
//! `Archives`; otherwise an already-valid category is preserved, and
//! everything else lands in `Resources`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use mementa_core::{
    defaults, Category, EventBus, MoveReason, Note, NoteHeader, Result, Uid, VaultEvent,
};

use crate::notes::{NoteStore, SaveOptions};

/// On-disk directory names for the four categories.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    pub root: PathBuf,
    pub projects_dir: String,
    pub areas_dir: String,
    pub resources_dir: String,
    pub archives_dir: String,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        VaultLayout {
            root: root.into(),
            projects_dir: Category::Projects.default_dir().to_string(),
            areas_dir: Category::Areas.default_dir().to_string(),
            resources_dir: Category::Resources.default_dir().to_string(),
            archives_dir: Category::Archives.default_dir().to_string(),
        }
    }

    pub fn dir_for(&self, category: Category) -> PathBuf {
        let dir = match category {
            Category::Projects => &self.projects_dir,
            Category::Areas => &self.areas_dir,
            Category::Resources => &self.resources_dir,
            Category::Archives => &self.archives_dir,
        };
        self.root.join(dir)
    }
}

/// Organizer behavior switches.
#[derive(Debug, Clone)]
pub struct OrganizerOptions {
    /// Move files to their computed location; when off, only headers are
    /// rewritten.
    pub auto_move: bool,
    pub archive_threshold_days: i64,
    /// Group project notes into per-project subfolders under the projects
    /// directory.
    pub project_subfolders: bool,
}

impl Default for OrganizerOptions {
    fn default() -> Self {
        OrganizerOptions {
            auto_move: true,
            archive_threshold_days: defaults::ARCHIVE_THRESHOLD_DAYS,
            project_subfolders: true,
        }
    }
}

/// Outcome of one organize pass over a note.
#[derive(Debug, Clone)]
pub struct NoteMove {
    pub uid: Uid,
    pub from: PathBuf,
    pub to: PathBuf,
    pub reason: MoveReason,
}

/// PARA category router and archiver.
pub struct ParaOrganizer {
    store: Arc<NoteStore>,
    layout: VaultLayout,
    options: OrganizerOptions,
    bus: Arc<EventBus>,
}

impl ParaOrganizer {
    pub fn new(
        store: Arc<NoteStore>,
        layout: VaultLayout,
        options: OrganizerOptions,
        bus: Arc<EventBus>,
    ) -> Self {
        ParaOrganizer {
            store,
            layout,
            options,
            bus,
        }
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    /// Decide the category a note belongs in right now.
    pub fn resolve_category(&self, header: &NoteHeader, now: DateTime<Utc>) -> Category {
        resolve_category(header, now, self.options.archive_threshold_days)
    }

    /// Compute the canonical path for a header.
    pub fn target_path(&self, header: &NoteHeader) -> PathBuf {
        let mut dir = self.layout.dir_for(header.category);
        if header.category == Category::Projects && self.options.project_subfolders {
            if let Some(project) = &header.project {
                dir = dir.join(sanitize_title(project));
            }
        }
        dir.join(format!("{}.md", sanitize_title(&header.title)))
    }

    /// Route one note: fix its category and, when auto-move is on, its path.
    ///
    /// Returns the move that happened, or `None` when the note was already
    /// where it belongs.
    pub async fn organize(&self, note: &mut Note, reason: MoveReason) -> Result<Option<NoteMove>> {
        let resolved = self.resolve_category(&note.header, Utc::now());
        let category_changed = resolved != note.header.category;
        note.header.category = resolved;

        let target = self.target_path(&note.header);
        let needs_move = self.options.auto_move && target != note.path;

        if !category_changed && !needs_move {
            return Ok(None);
        }

        if needs_move {
            let from = note.path.clone();
            self.store.move_note(note, &target).await?;
            let moved = NoteMove {
                uid: note.header.id.clone(),
                from: from.clone(),
                to: target.clone(),
                reason,
            };
            self.bus.emit(VaultEvent::NoteMoved {
                uid: moved.uid.clone(),
                from,
                to: target,
                reason,
            });
            Ok(Some(moved))
        } else {
            // Header-only rewrite.
            self.store.save(note, SaveOptions::default()).await?;
            Ok(None)
        }
    }

    /// Archive every note whose `updated` is past the threshold.
    ///
    /// Traverses only the live categories; archives are already archived.
    pub async fn archive_old(&self) -> Result<Vec<NoteMove>> {
        let cutoff = Utc::now() - Duration::days(self.options.archive_threshold_days);
        let mut moves = Vec::new();

        for summary in self.store.list().await? {
            if summary.category == Category::Archives {
                continue;
            }
            if summary.updated > cutoff || summary.project.is_some() {
                continue;
            }
            let mut note = match self.store.load(&summary.path).await {
                Ok(note) => note,
                Err(err) => {
                    tracing::warn!(path = %summary.path.display(), error = %err, "skipping unarchivable note");
                    continue;
                }
            };
            note.header.category = Category::Archives;
            let target = self.target_path(&note.header);
            let from = note.path.clone();
            if self.options.auto_move {
                self.store.move_note(&mut note, &target).await?;
            } else {
                self.store.save(&mut note, SaveOptions::default()).await?;
            }
            let moved = NoteMove {
                uid: note.header.id.clone(),
                from: from.clone(),
                to: if self.options.auto_move {
                    target.clone()
                } else {
                    from.clone()
                },
                reason: MoveReason::AutoArchive,
            };
            self.bus.emit(VaultEvent::NoteMoved {
                uid: moved.uid.clone(),
                from: moved.from.clone(),
                to: moved.to.clone(),
                reason: MoveReason::AutoArchive,
            });
            moves.push(moved);
        }
        Ok(moves)
    }

    /// Archive every note of one project, clearing the project field.
    pub async fn archive_project(&self, project: &str) -> Result<Vec<NoteMove>> {
        let mut moves = Vec::new();
        for summary in self.store.list().await? {
            if summary.project.as_deref() != Some(project) {
                continue;
            }
            let mut note = match self.store.load(&summary.path).await {
                Ok(note) => note,
                Err(err) => {
                    tracing::warn!(path = %summary.path.display(), error = %err, "skipping project note");
                    continue;
                }
            };
            note.header.project = None;
            note.header.category = Category::Archives;
            let target = self.target_path(&note.header);
            let from = note.path.clone();
            if self.options.auto_move {
                self.store.move_note(&mut note, &target).await?;
            } else {
                self.store.save(&mut note, SaveOptions::default()).await?;
            }
            let moved = NoteMove {
                uid: note.header.id.clone(),
                from: from.clone(),
                to: note.path.clone(),
                reason: MoveReason::ProjectChange,
            };
            self.bus.emit(VaultEvent::NoteMoved {
                uid: moved.uid.clone(),
                from: moved.from.clone(),
                to: moved.to.clone(),
                reason: MoveReason::ProjectChange,
            });
            moves.push(moved);
        }
        Ok(moves)
    }
}

/// Category routing shared by the organizer and its tests.
pub fn resolve_category(
    header: &NoteHeader,
    now: DateTime<Utc>,
    archive_threshold_days: i64,
) -> Category {
    if header
        .project
        .as_deref()
        .map(|p| !p.trim().is_empty())
        .unwrap_or(false)
    {
        return Category::Projects;
    }
    if now - header.updated > Duration::days(archive_threshold_days) {
        return Category::Archives;
    }
    header.category
}

/// Turn a title into a filesystem-safe stem.
///
/// Replaces `<>:"/\|?*` and whitespace runs with `-`, trims leading and
/// trailing dashes, and truncates to 50 characters.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = false;
    for c in title.chars() {
        let mapped = if c.is_whitespace() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            '-'
        } else {
            c
        };
        if mapped == '-' {
            if !last_dash {
                out.push('-');
            }
            last_dash = true;
        } else {
            out.push(mapped);
            last_dash = false;
        }
    }
    let trimmed: String = out.trim_matches('-').to_string();
    let truncated: String = trimmed.chars().take(defaults::SANITIZED_TITLE_MAX).collect();
    let final_stem = truncated.trim_matches('-').to_string();
    if final_stem.is_empty() {
        "untitled".to_string()
    } else {
        final_stem
    }
}
