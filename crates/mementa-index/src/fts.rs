//! Full-text index over cleaned note bodies.
//!
//! Notes are indexed with markdown syntax stripped: heading markers,
//! emphasis, code fences, and link syntax collapse to their text content.
//! Queries rank by the engine's BM25 and carry snippets with every query
//! term highlighted. Metadata filters apply as conjunctive post-predicates
//! over the candidate rows.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, Sqlite, Transaction};

use mementa_core::{defaults, Category, Note, Result, Uid};

use crate::manager::Database;

static FENCE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(```|~~~).*$").expect("fence regex is valid"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+").expect("heading regex is valid"));
static WIKI_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("wiki regex is valid"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("link regex is valid"));
static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*_`]+").expect("emphasis regex is valid"));

/// Strip markdown syntax down to searchable text.
pub fn strip_markdown(body: &str) -> String {
    let text = FENCE_LINE.replace_all(body, "");
    let text = HEADING.replace_all(&text, "");
    let text = WIKI_LINK.replace_all(&text, |caps: &regex::Captures<'_>| {
        caps.get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    });
    let text = MD_LINK.replace_all(&text, "$1");
    let text = EMPHASIS.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Break a raw query into FTS terms: alphanumeric word characters only.
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Query options for the full-text layer.
#[derive(Debug, Clone)]
pub struct FtsQuery {
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub snippet_length: usize,
    pub highlight_tag: String,
}

impl Default for FtsQuery {
    fn default() -> Self {
        FtsQuery {
            category: None,
            tags: Vec::new(),
            project: None,
            limit: defaults::SEARCH_LIMIT,
            offset: 0,
            snippet_length: defaults::SNIPPET_LENGTH,
            highlight_tag: defaults::HIGHLIGHT_TAG.to_string(),
        }
    }
}

/// One full-text match.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub uid: Uid,
    pub title: String,
    pub category: Category,
    pub project: Option<String>,
    pub tags: Vec<String>,
    /// Positive engine relevance (higher is better).
    pub raw_score: f64,
    pub snippet: String,
}

/// Timing and volume metrics of one FTS pass.
#[derive(Debug, Clone, Default)]
pub struct FtsMetrics {
    pub query_ms: u64,
    /// Matches after filtering, before offset/limit.
    pub total_matches: usize,
}

/// Full-text search provider over the `notes_fts` virtual table.
#[derive(Debug, Clone)]
pub struct FtsIndex {
    db: Database,
}

impl FtsIndex {
    pub fn new(db: Database) -> Self {
        FtsIndex { db }
    }

    /// Replace the FTS row for a note. Idempotent.
    pub async fn update(&self, note: &Note) -> Result<()> {
        let mut tx = self.db.begin().await?;
        self.update_tx(&mut tx, note).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace the FTS row for a note inside an existing transaction.
    pub async fn update_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        note: &Note,
    ) -> Result<()> {
        sqlx::query("DELETE FROM notes_fts WHERE uid = ?1")
            .bind(note.header.id.as_str())
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "INSERT INTO notes_fts (uid, title, content, tags, category, project)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(note.header.id.as_str())
        .bind(&note.header.title)
        .bind(strip_markdown(&note.body))
        .bind(note.header.tags.join(" "))
        .bind(note.header.category.as_str())
        .bind(note.header.project.as_deref().unwrap_or(""))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Remove a note's FTS row. Removing an absent row is a no-op.
    pub async fn remove(&self, uid: &Uid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        self.remove_tx(&mut tx, uid).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        uid: &Uid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM notes_fts WHERE uid = ?1")
            .bind(uid.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run the engine-side index merge.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("INSERT INTO notes_fts (notes_fts) VALUES ('optimize')")
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// BM25-ranked search with conjunctive metadata post-filters.
    ///
    /// An empty query, or one that tokenizes to nothing, returns zero rows
    /// and valid metrics without touching the engine.
    pub async fn search(&self, query: &str, options: &FtsQuery) -> Result<(Vec<FtsHit>, FtsMetrics)> {
        let started = Instant::now();
        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Ok((
                Vec::new(),
                FtsMetrics {
                    query_ms: started.elapsed().as_millis() as u64,
                    total_matches: 0,
                },
            ));
        }

        // Implicit AND between quoted terms keeps FTS5 operators inert.
        let match_expr = terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" ");

        let rows = sqlx::query(
            "SELECT uid, title, content, tags, category, project,
                    bm25(notes_fts) AS rank
             FROM notes_fts
             WHERE notes_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )
        .bind(&match_expr)
        .bind(defaults::SEARCH_CANDIDATE_CAP as i64)
        .fetch_all(self.db.pool())
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let uid_raw: String = row.get("uid");
            let Ok(uid) = Uid::parse(&uid_raw) else {
                tracing::warn!(uid = %uid_raw, "fts row with malformed uid");
                continue;
            };
            let category_raw: String = row.get("category");
            let category = category_raw.parse().unwrap_or_default();
            let project: String = row.get("project");
            let tags_raw: String = row.get("tags");
            let content: String = row.get("content");
            // bm25() returns more-negative-is-better; flip to positive.
            let rank: f64 = row.get("rank");
            let raw_score = (-rank).max(0.0);

            hits.push((
                FtsHit {
                    uid,
                    title: row.get("title"),
                    category,
                    project: (!project.is_empty()).then_some(project),
                    tags: if tags_raw.is_empty() {
                        Vec::new()
                    } else {
                        tags_raw.split(' ').map(String::from).collect()
                    },
                    raw_score,
                    snippet: String::new(),
                },
                content,
            ));
        }

        // Conjunctive post-predicates on metadata columns.
        let filtered: Vec<(FtsHit, String)> = hits
            .into_iter()
            .filter(|(hit, _)| {
                if let Some(category) = options.category {
                    if hit.category != category {
                        return false;
                    }
                }
                if let Some(project) = &options.project {
                    if hit.project.as_deref() != Some(project.as_str()) {
                        return false;
                    }
                }
                options
                    .tags
                    .iter()
                    .all(|wanted| hit.tags.iter().any(|t| t == wanted))
            })
            .collect();

        let total_matches = filtered.len();
        let offset = options.offset.max(0) as usize;
        let limit = options.limit.max(0) as usize;

        let page: Vec<FtsHit> = filtered
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(mut hit, content)| {
                hit.snippet = build_snippet(
                    &content,
                    &terms,
                    options.snippet_length,
                    &options.highlight_tag,
                );
                hit
            })
            .collect();

        Ok((
            page,
            FtsMetrics {
                query_ms: started.elapsed().as_millis() as u64,
                total_matches,
            },
        ))
    }
}

/// Build a snippet around the first term occurrence, wrapping every query
/// term in the highlight tag.
///
/// Term boundaries are case-insensitive word boundaries: `fts` highlights
/// `FTS` but not the middle of `shifts`.
pub fn build_snippet(content: &str, terms: &[String], length: usize, tag: &str) -> String {
    if content.is_empty() || length == 0 {
        return String::new();
    }

    let lowered = content.to_lowercase();
    let first_match = terms
        .iter()
        .filter_map(|t| find_word(&lowered, &t.to_lowercase()))
        .min();

    // Window starts a little before the first match so it reads naturally.
    let start = match first_match {
        Some(pos) => {
            let lead = length / 4;
            floor_char_boundary(content, pos.saturating_sub(lead))
        }
        None => 0,
    };

    let taken: String = content[start..].chars().take(length).collect();
    let truncated_end = start + taken.len() < content.len();
    let mut window = taken;
    if start > 0 {
        window = format!("…{window}");
    }
    if truncated_end {
        window.push('…');
    }

    highlight_terms(&window, terms, tag)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Byte offset of `term` in `haystack` at word boundaries, if any.
fn find_word(haystack: &str, term: &str) -> Option<usize> {
    if term.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(term) {
        let pos = from + rel;
        let before_ok = pos == 0
            || !haystack[..pos]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after = pos + term.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return Some(pos);
        }
        from = pos + term.len();
    }
    None
}

fn highlight_terms(window: &str, terms: &[String], tag: &str) -> String {
    let mut out = window.to_string();
    for term in terms {
        let lowered_term = term.to_lowercase();
        let mut rebuilt = String::with_capacity(out.len());
        let mut rest = out.as_str();
        loop {
            let lowered = rest.to_lowercase();
            // Case folding that changes byte lengths would desynchronize
            // offsets; fall back to the unhighlighted remainder there.
            if lowered.len() != rest.len() {
                rebuilt.push_str(rest);
                break;
            }
            match find_word(&lowered, &lowered_term) {
                Some(pos) => {
                    let end = pos + lowered_term.len();
                    if !rest.is_char_boundary(pos) || !rest.is_char_boundary(end) {
                        rebuilt.push_str(rest);
                        break;
                    }
                    rebuilt.push_str(&rest[..pos]);
                    rebuilt.push_str(&format!("<{tag}>{}</{tag}>", &rest[pos..end]));
                    rest = &rest[end..];
                }
                None => {
                    rebuilt.push_str(rest);
                    break;
                }
            }
        }
        out = rebuilt;
    }
    out
}
