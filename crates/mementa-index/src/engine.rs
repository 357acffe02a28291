//! Hybrid search engine composing the database, FTS, and link graph.
//!
//! Ranking blends normalized textual relevance with link-graph centrality:
//! `combined = 0.7 * fts + 0.3 * link`, where the link score saturates at
//! twenty weighted strength points. The header-declared `links` of a note are
//! the indexed source of truth; the backlink synchronizer keeps them
//! converged with the body.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use sqlx::Row;

use mementa_core::{defaults, Note, Result, Uid, VaultEvent};

use crate::fts::{FtsIndex, FtsQuery};
use crate::graph::{ConnectedOptions, LinkGraph};
use crate::manager::Database;

/// Search options for the hybrid surface.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub category: Option<mementa_core::Category>,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub snippet_length: usize,
    pub highlight_tag: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
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

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub uid: Uid,
    pub title: String,
    pub category: mementa_core::Category,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub snippet: String,
    pub fts_score: f64,
    pub link_score: f64,
    pub combined_score: f64,
    /// Outbound link UIDs of the result note.
    pub outbound: Vec<Uid>,
}

/// Timing and volume metrics of one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMetrics {
    pub query_ms: u64,
    pub processing_ms: u64,
    pub total_ms: u64,
    pub total_results: usize,
    pub returned_results: usize,
    pub cache_hit: bool,
}

/// One failed note inside a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub uid: Uid,
    pub error: String,
}

/// Outcome report of [`SearchEngine::batch_index`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchIndexReport {
    pub successful: usize,
    pub failed: usize,
    pub total_ms: u64,
    pub failures: Vec<IndexFailure>,
}

/// The composed index: notes table, FTS rows, and link graph in one store.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    db: Database,
    fts: FtsIndex,
    graph: LinkGraph,
    bus: Option<std::sync::Arc<mementa_core::EventBus>>,
}

impl SearchEngine {
    pub fn new(db: Database) -> Self {
        SearchEngine {
            fts: FtsIndex::new(db.clone()),
            graph: LinkGraph::new(db.clone()),
            db,
            bus: None,
        }
    }

    /// Attach an event bus; index mutations then announce themselves.
    pub fn with_bus(mut self, bus: std::sync::Arc<mementa_core::EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn fts(&self) -> &FtsIndex {
        &self.fts
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// Index one note: `notes` upsert, FTS row, and outgoing links, all in
    /// one transaction. Indexing the same note twice is a no-op thanks to
    /// the content hash check.
    pub async fn index_note(&self, note: &Note) -> Result<()> {
        let hash = note.content_hash();

        if self.is_fresh(note, &hash).await? {
            tracing::debug!(uid = %note.header.id, "index skip: content unchanged");
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        self.index_note_tx(&mut tx, note, &hash).await?;
        tx.commit().await?;

        if let Some(bus) = &self.bus {
            bus.emit(VaultEvent::IndexUpdated {
                uid: note.header.id.clone(),
            });
        }
        Ok(())
    }

    /// The transactional body of [`Self::index_note`]: `notes` upsert, FTS
    /// row, and outgoing links inside the caller's transaction.
    async fn index_note_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        note: &Note,
        hash: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let tags_json = serde_json::to_string(&note.header.tags)?;
        sqlx::query(
            "INSERT INTO notes (uid, title, category, file_path, project, tags_json,
                                content_hash, created_at, updated_at, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(uid) DO UPDATE SET
                 title = excluded.title,
                 category = excluded.category,
                 file_path = excluded.file_path,
                 project = excluded.project,
                 tags_json = excluded.tags_json,
                 content_hash = excluded.content_hash,
                 updated_at = excluded.updated_at,
                 indexed_at = excluded.indexed_at",
        )
        .bind(note.header.id.as_str())
        .bind(&note.header.title)
        .bind(note.header.category.as_str())
        .bind(note.path.to_string_lossy().as_ref())
        .bind(note.header.project.as_deref())
        .bind(&tags_json)
        .bind(hash)
        .bind(note.header.created)
        .bind(note.header.updated)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        self.fts.update_tx(tx, note).await?;
        self.graph
            .update_links_tx(tx, &note.header.id, &note.body, &note.header.links)
            .await?;
        Ok(())
    }

    /// True when the stored row already matches this note exactly.
    async fn is_fresh(&self, note: &Note, hash: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT title, category, file_path, project, tags_json, content_hash
             FROM notes WHERE uid = ?1",
        )
        .bind(note.header.id.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let stored_hash: String = row.get("content_hash");
        if stored_hash != hash {
            return Ok(false);
        }
        let title: String = row.get("title");
        let category: String = row.get("category");
        let file_path: String = row.get("file_path");
        let project: Option<String> = row.get("project");
        let tags_json: String = row.get("tags_json");
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        if title != note.header.title
            || category != note.header.category.as_str()
            || file_path != note.path.to_string_lossy()
            || project.as_deref() != note.header.project.as_deref()
            || tags != note.header.tags
        {
            return Ok(false);
        }

        // Header links are indexed state too; a pure link edit must reindex.
        let stored_links = self.graph.outbound(&note.header.id, i64::MAX).await?;
        let mut stored: Vec<&str> = stored_links.iter().map(|l| l.uid.as_str()).collect();
        stored.sort_unstable();
        let mut declared: Vec<&str> = note
            .header
            .links
            .iter()
            .filter(|l| **l != note.header.id)
            .map(|l| l.as_str())
            .collect();
        declared.sort_unstable();
        declared.dedup();
        Ok(stored == declared)
    }

    /// Remove a note from notes, FTS, and graph. Idempotent.
    pub async fn remove_note(&self, uid: &Uid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM notes WHERE uid = ?1")
            .bind(uid.as_str())
            .execute(&mut *tx)
            .await?;
        self.fts.remove_tx(&mut tx, uid).await?;
        self.graph.remove_links_tx(&mut tx, uid).await?;
        tx.commit().await?;

        if let Some(bus) = &self.bus {
            bus.emit(VaultEvent::IndexRemoved { uid: uid.clone() });
        }
        Ok(())
    }

    /// Title of an indexed note, if present.
    pub async fn note_title(&self, uid: &Uid) -> Result<Option<String>> {
        let row = sqlx::query("SELECT title FROM notes WHERE uid = ?1")
            .bind(uid.as_str())
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|r| r.get::<String, _>("title")))
    }

    /// Look up the UID indexed for a vault path, if any.
    pub async fn uid_for_path(&self, path: &str) -> Result<Option<Uid>> {
        let row = sqlx::query("SELECT uid FROM notes WHERE file_path = ?1")
            .bind(path)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.and_then(|r| Uid::parse(&r.get::<String, _>("uid")).ok()))
    }

    /// Index a collection of notes in chunked transactions.
    ///
    /// Each chunk is one transaction; inside it every note gets a savepoint,
    /// so a failing note rolls back only its own work and is recorded in the
    /// report without aborting the chunk.
    pub async fn batch_index(&self, notes: &[Note]) -> Result<BatchIndexReport> {
        let started = Instant::now();
        let mut report = BatchIndexReport::default();

        for chunk in notes.chunks(defaults::BATCH_INDEX_CHUNK) {
            let mut tx = self.db.begin().await?;
            let mut indexed = Vec::with_capacity(chunk.len());

            for (position, note) in chunk.iter().enumerate() {
                let hash = note.content_hash();
                if self.is_fresh(note, &hash).await? {
                    report.successful += 1;
                    continue;
                }

                let savepoint = format!("batch_note_{position}");
                sqlx::query(&format!("SAVEPOINT {savepoint}"))
                    .execute(&mut *tx)
                    .await?;
                match self.index_note_tx(&mut tx, note, &hash).await {
                    Ok(()) => {
                        sqlx::query(&format!("RELEASE SAVEPOINT {savepoint}"))
                            .execute(&mut *tx)
                            .await?;
                        report.successful += 1;
                        indexed.push(note.header.id.clone());
                    }
                    Err(err) => {
                        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {savepoint}"))
                            .execute(&mut *tx)
                            .await?;
                        sqlx::query(&format!("RELEASE SAVEPOINT {savepoint}"))
                            .execute(&mut *tx)
                            .await?;
                        tracing::warn!(uid = %note.header.id, error = %err, "batch index failure");
                        report.failed += 1;
                        report.failures.push(IndexFailure {
                            uid: note.header.id.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            tx.commit().await?;

            if let Some(bus) = &self.bus {
                for uid in indexed {
                    bus.emit(VaultEvent::IndexUpdated { uid });
                }
            }
        }

        report.total_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            successful = report.successful,
            failed = report.failed,
            duration_ms = report.total_ms,
            "batch index complete"
        );
        Ok(report)
    }

    /// Hybrid search: FTS candidates rescored by link centrality.
    ///
    /// Returns `(results, metrics, total_count)` where `total_count` is the
    /// number of matches before offset/limit.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<(Vec<SearchResult>, SearchMetrics, usize)> {
        let started = Instant::now();

        // Pull a full candidate page window; the combined score decides the
        // final order, so pagination happens after rescoring.
        let fts_query = FtsQuery {
            category: options.category,
            tags: options.tags.clone(),
            project: options.project.clone(),
            limit: defaults::SEARCH_CANDIDATE_CAP as i64,
            offset: 0,
            snippet_length: options.snippet_length,
            highlight_tag: options.highlight_tag.clone(),
        };
        let (hits, fts_metrics) = self.fts.search(query, &fts_query).await?;
        let query_ms = fts_metrics.query_ms;
        let processing_started = Instant::now();

        let max_raw = hits
            .iter()
            .map(|h| h.raw_score)
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let fts_score = (hit.raw_score / max_raw).clamp(0.0, 1.0);

            let backlinks = self
                .graph
                .backlinks(&hit.uid, defaults::LINK_SAMPLE)
                .await?;
            let outbound = self.graph.outbound(&hit.uid, defaults::LINK_SAMPLE).await?;
            let link_raw: i64 = 2 * backlinks.iter().map(|l| l.strength).sum::<i64>()
                + outbound.iter().map(|l| l.strength).sum::<i64>();
            let link_score = (link_raw as f64 / defaults::LINK_SCORE_DIVISOR).min(1.0);

            let combined_score =
                defaults::FTS_WEIGHT * fts_score + defaults::LINK_WEIGHT * link_score;

            results.push(SearchResult {
                uid: hit.uid,
                title: hit.title,
                category: hit.category,
                project: hit.project,
                tags: hit.tags,
                snippet: hit.snippet,
                fts_score,
                link_score,
                combined_score,
                outbound: outbound.into_iter().map(|l| l.uid).collect(),
            });
        }

        // Combined score descending; outbound-link count breaks ties.
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.outbound.len().cmp(&a.outbound.len()))
        });

        let total_results = results.len();
        let offset = options.offset.max(0) as usize;
        let limit = options.limit.max(0) as usize;
        let page: Vec<SearchResult> = results.into_iter().skip(offset).take(limit).collect();

        let processing_ms = processing_started.elapsed().as_millis() as u64;
        let metrics = SearchMetrics {
            query_ms,
            processing_ms,
            total_ms: started.elapsed().as_millis() as u64,
            total_results,
            returned_results: page.len(),
            cache_hit: false,
        };
        tracing::debug!(
            result_count = metrics.returned_results,
            duration_ms = metrics.total_ms,
            "hybrid search complete"
        );
        Ok((page, metrics, total_results))
    }

    /// Bounded BFS over the graph, resolving the start note by UID.
    pub async fn connected(
        &self,
        start: &Uid,
        options: &ConnectedOptions,
    ) -> Result<Vec<crate::graph::ConnectedNode>> {
        self.graph.connected(start, options).await
    }

    /// Engine-wide maintenance: FTS merge plus database vacuum/analyze.
    pub async fn optimize(&self) -> Result<()> {
        self.fts.optimize().await?;
        self.db.optimize().await
    }

    /// Store and graph statistics in one snapshot.
    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            database: self.db.stats().await?,
            graph: self.graph.stats().await?,
        })
    }

    /// Database-level integrity check.
    pub async fn check_integrity(&self) -> Result<bool> {
        self.db.check_integrity().await
    }
}

/// Combined statistics of the index store and the link graph.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub database: crate::manager::DatabaseStats,
    pub graph: crate::graph::GraphStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::DbOptions;
    use mementa_core::NoteHeader;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn engine(dir: &TempDir) -> SearchEngine {
        let db = Database::open(&dir.path().join("index.db"), DbOptions::default())
            .await
            .unwrap();
        SearchEngine::new(db)
    }

    fn note(title: &str, body: &str) -> Note {
        Note {
            path: PathBuf::from(format!("/vault/{}.md", title.replace(' ', "-"))),
            header: NoteHeader::new(title),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_index_note_populates_all_tables() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let target = note("Target", "plain");
        engine.index_note(&target).await.unwrap();

        let mut source = note("Source", "mentions nothing yet");
        source.header.links = vec![target.header.id.clone()];
        engine.index_note(&source).await.unwrap();

        // notes row
        let stats = engine.database().stats().await.unwrap();
        assert_eq!(stats.note_count, 2);
        // fts row
        let (hits, _, _) = engine
            .search("mentions", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        // graph row, from header-declared links
        let backlinks = engine.graph().backlinks(&target.header.id, 10).await.unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].uid, source.header.id);
        assert_eq!(backlinks[0].strength, 1);
    }

    #[tokio::test]
    async fn test_double_index_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let n = note("Once", "same content");

        engine.index_note(&n).await.unwrap();
        engine.index_note(&n).await.unwrap();

        let stats = engine.database().stats().await.unwrap();
        assert_eq!(stats.note_count, 1);
        let (hits, _, _) = engine
            .search("content", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_picks_up_header_link_changes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let target = note("Target", "t");
        engine.index_note(&target).await.unwrap();

        let mut source = note("Source", "body stays identical");
        engine.index_note(&source).await.unwrap();
        assert!(engine
            .graph()
            .backlinks(&target.header.id, 10)
            .await
            .unwrap()
            .is_empty());

        // Same body, new header link: must not be skipped as fresh.
        source.header.links = vec![target.header.id.clone()];
        engine.index_note(&source).await.unwrap();
        assert_eq!(
            engine
                .graph()
                .backlinks(&target.header.id, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_remove_note_clears_every_table_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let target = note("Target", "t");
        let mut source = note("Source", "searchable body");
        source.header.links = vec![target.header.id.clone()];
        engine.index_note(&target).await.unwrap();
        engine.index_note(&source).await.unwrap();

        engine.remove_note(&source.header.id).await.unwrap();
        engine.remove_note(&source.header.id).await.unwrap(); // no-op

        assert_eq!(engine.database().stats().await.unwrap().note_count, 1);
        let (hits, _, _) = engine
            .search("searchable", &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert!(engine
            .graph()
            .backlinks(&target.header.id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_batch_index_reports_per_note_failures() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let good = note("Good", "fine");
        let other = note("Other", "fine too");
        // Duplicate file_path with a different uid violates the UNIQUE
        // constraint and must fail only that note.
        let mut clash = note("Clash", "boom");
        clash.path = good.path.clone();

        let report = engine
            .batch_index(&[good.clone(), other, clash])
            .await
            .unwrap();
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(engine.database().stats().await.unwrap().note_count, 2);
    }

    #[tokio::test]
    async fn test_hybrid_ranking_prefers_linked_notes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        // X and Y with identical bodies (equal FTS score); X gets links.
        let x = note("X note", "hybrid ranking corpus");
        let y = note("Y note", "hybrid ranking corpus");
        let n1 = note("N1", "n1");
        let n2 = note("N2", "n2");
        let n3 = note("N3", "n3");
        let fan = note("Fan", "fan");

        engine.index_note(&n1).await.unwrap();
        engine.index_note(&n2).await.unwrap();
        engine.index_note(&n3).await.unwrap();
        engine.index_note(&y).await.unwrap();

        let mut x = x;
        x.header.links = vec![
            n1.header.id.clone(),
            n2.header.id.clone(),
            n3.header.id.clone(),
        ];
        engine.index_note(&x).await.unwrap();

        let mut fan = fan;
        fan.header.links = vec![x.header.id.clone()];
        engine.index_note(&fan).await.unwrap();

        let (results, metrics, total) = engine
            .search("hybrid", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(metrics.returned_results, 2);
        assert_eq!(results[0].uid, x.header.id);
        assert_eq!(results[1].uid, y.header.id);
        assert!(results[0].link_score > results[1].link_score);
        assert_eq!(results[0].outbound.len(), 3);

        // link_raw for X: 2*1 (backlink from fan) + 3*1 (outbound) = 5.
        assert!((results[0].link_score - 5.0 / 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_empty_query_gives_metrics() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        engine.index_note(&note("Any", "body")).await.unwrap();

        let (results, metrics, total) = engine
            .search("", &SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(total, 0);
        assert_eq!(metrics.returned_results, 0);
    }

    #[tokio::test]
    async fn test_uid_for_path() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let n = note("Pathed", "x");
        engine.index_note(&n).await.unwrap();

        let uid = engine
            .uid_for_path(&n.path.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(uid.as_ref(), Some(&n.header.id));
        assert!(engine.uid_for_path("/vault/nope.md").await.unwrap().is_none());
    }
}
