//! Atomic file I/O primitives for the vault.
//!
//! All note writes go through [`atomic_write`]: the payload lands in a
//! temporary sibling file, is fsynced, then renamed over the destination.
//! A crash mid-write leaves either the old content or the new content at the
//! destination, never a torn file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use mementa_core::{Error, Result};

/// Per-process counter feeding temp-file nonces.
static WRITE_NONCE: AtomicU64 = AtomicU64::new(0);

/// Options for [`atomic_write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Create missing parent directories before writing.
    pub create_dirs: bool,
}

/// Options for [`list_markdown`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Optional `*`-wildcard filename pattern, e.g. `"2026-*.md"`.
    pub pattern: Option<String>,
}

/// Write `bytes` to `path` atomically.
///
/// The data is written to `path.tmp.<nonce>` in the same directory, fsynced,
/// and renamed over `path`. The temp file is removed on any failure.
pub async fn atomic_write(path: &Path, bytes: &[u8], options: WriteOptions) -> Result<()> {
    if options.create_dirs {
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }
    }

    let nonce = WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
    let tmp = temp_sibling(path, nonce);

    let result = write_and_sync(&tmp, bytes).await;
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::Write(format!(
            "rename {} -> {}: {err}",
            tmp.display(),
            path.display()
        )));
    }
    Ok(())
}

async fn write_and_sync(tmp: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| Error::Write(format!("create {}: {e}", tmp.display())))?;
    file.write_all(bytes)
        .await
        .map_err(|e| Error::Write(format!("write {}: {e}", tmp.display())))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Write(format!("fsync {}: {e}", tmp.display())))?;
    Ok(())
}

fn temp_sibling(path: &Path, nonce: u64) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let tmp_name = format!("{file_name}.tmp.{}-{nonce}", std::process::id());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

/// Read a UTF-8 file, failing with `NotFound` when it is absent.
pub async fn safe_read(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(path.display().to_string()))
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Idempotent recursive directory creation.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::Write(format!("mkdir {}: {e}", path.display())))
}

/// Rename `path` aside to `path.bak.<timestamp>` before a destructive
/// operation. Returns the backup location.
pub async fn create_backup(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%6f");
    let backup = PathBuf::from(format!("{}.bak.{stamp}", path.display()));
    tokio::fs::rename(path, &backup).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Write(format!("backup {}: {e}", path.display()))
        }
    })?;
    Ok(backup)
}

/// Enumerate markdown files under `root`.
///
/// Dotfiles and dot-directories are skipped, symlinks are not followed (so
/// link cycles cannot loop the walk), and results are sorted for
/// deterministic iteration.
pub fn list_markdown(root: &Path, options: &ListOptions) -> Result<Vec<PathBuf>> {
    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable vault entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().map(|e| e != "md").unwrap_or(true) {
            continue;
        }
        if let Some(pattern) = &options.pattern {
            let name = entry.file_name().to_string_lossy();
            if !wildcard_match(pattern, &name) {
                continue;
            }
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Minimal `*`-wildcard matcher over filenames.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_creates_file_with_exact_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");

        atomic_write(&path, b"hello vault", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(safe_read(&path).await.unwrap(), "hello vault");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");

        atomic_write(&path, b"first", WriteOptions::default())
            .await
            .unwrap();
        atomic_write(&path, b"second", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(safe_read(&path).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");
        atomic_write(&path, b"content", WriteOptions::default())
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_atomic_write_create_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3-Resources/deep/note.md");

        let no_dirs = atomic_write(&path, b"x", WriteOptions::default()).await;
        assert!(no_dirs.is_err());

        atomic_write(&path, b"x", WriteOptions { create_dirs: true })
            .await
            .unwrap();
        assert_eq!(safe_read(&path).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_safe_read_not_found() {
        let dir = TempDir::new().unwrap();
        let err = safe_read(&dir.path().join("missing.md")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_dir_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/c");
        ensure_dir(&target).await.unwrap();
        ensure_dir(&target).await.unwrap();
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_create_backup_moves_file_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");
        atomic_write(&path, b"keep me", WriteOptions::default())
            .await
            .unwrap();

        let backup = create_backup(&path).await.unwrap();
        assert!(!path.exists());
        assert!(backup.to_string_lossy().contains(".bak."));
        assert_eq!(safe_read(&backup).await.unwrap(), "keep me");
    }

    #[tokio::test]
    async fn test_create_backup_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = create_backup(&dir.path().join("absent.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_markdown_filters_and_recursion() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        ensure_dir(&root.join("sub")).await.unwrap();
        ensure_dir(&root.join(".hidden")).await.unwrap();
        for (rel, content) in [
            ("a.md", "a"),
            ("b.txt", "b"),
            (".secret.md", "s"),
            ("sub/c.md", "c"),
            (".hidden/d.md", "d"),
        ] {
            std::fs::write(root.join(rel), content).unwrap();
        }

        let flat = list_markdown(
            root,
            &ListOptions {
                recursive: false,
                pattern: None,
            },
        )
        .unwrap();
        assert_eq!(flat, vec![root.join("a.md")]);

        let deep = list_markdown(
            root,
            &ListOptions {
                recursive: true,
                pattern: None,
            },
        )
        .unwrap();
        assert_eq!(deep, vec![root.join("a.md"), root.join("sub/c.md")]);
    }

    #[tokio::test]
    async fn test_list_markdown_pattern() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for name in ["2026-plan.md", "2025-plan.md", "notes.md"] {
            std::fs::write(root.join(name), "x").unwrap();
        }

        let matched = list_markdown(
            root,
            &ListOptions {
                recursive: false,
                pattern: Some("2026-*.md".to_string()),
            },
        )
        .unwrap();
        assert_eq!(matched, vec![root.join("2026-plan.md")]);
    }

    #[test]
    fn test_wildcard_matcher() {
        assert!(wildcard_match("*.md", "note.md"));
        assert!(wildcard_match("2026-*", "2026-plan.md"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("*.md", "note.txt"));
        assert!(!wildcard_match("plan.md", "other.md"));
    }
}
