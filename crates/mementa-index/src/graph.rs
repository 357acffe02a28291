//! Directed link graph over the `links` table.
//!
//! All graph state lives in the database; traversal keeps only a visited set
//! and a queue in memory, so cycles and back-edges cost nothing. Edges are
//! recomputed atomically per source note: delete everything the note points
//! at, then insert the current set.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, Sqlite, Transaction};

use mementa_core::{defaults, Error, LinkKind, Result, Uid};

use crate::manager::Database;

/// One stored edge, joined with the peer note's title.
#[derive(Debug, Clone, Serialize)]
pub struct GraphLink {
    /// The note on the other end of the edge.
    pub uid: Uid,
    pub title: String,
    pub kind: LinkKind,
    pub strength: i64,
    pub last_seen_at: DateTime<Utc>,
}

/// Traversal direction for [`LinkGraph::connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl std::str::FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            other => Err(Error::InvalidRequest(format!(
                "unknown direction: {other:?}"
            ))),
        }
    }
}

/// Options for bounded BFS traversal.
#[derive(Debug, Clone)]
pub struct ConnectedOptions {
    pub depth: u32,
    pub limit: usize,
    pub direction: Direction,
}

impl Default for ConnectedOptions {
    fn default() -> Self {
        ConnectedOptions {
            depth: defaults::CONNECTED_DEPTH,
            limit: defaults::CONNECTED_LIMIT,
            direction: Direction::Both,
        }
    }
}

/// One node reached by traversal.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedNode {
    pub uid: Uid,
    pub title: String,
    pub depth: u32,
    /// `decay^depth` relative to the start node's 1.0.
    pub score: f64,
}

/// A note with no inbound links.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanNote {
    pub uid: Uid,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-target aggregate for [`GraphStats`].
#[derive(Debug, Clone, Serialize)]
pub struct TopTarget {
    pub uid: Uid,
    pub title: String,
    pub inbound_count: i64,
    pub total_strength: i64,
}

/// Aggregate statistics of the link graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_links: i64,
    pub distinct_sources: i64,
    pub distinct_targets: i64,
    pub top_targets: Vec<TopTarget>,
}

/// Link graph repository.
#[derive(Debug, Clone)]
pub struct LinkGraph {
    db: Database,
}

impl LinkGraph {
    pub fn new(db: Database) -> Self {
        LinkGraph { db }
    }

    /// Replace the outgoing edge set of `source` in one transaction.
    ///
    /// Strength is the number of textual mentions of the target in `body`,
    /// floored at 1 and capped at [`defaults::LINK_STRENGTH_CAP`].
    pub async fn update_links(&self, source: &Uid, body: &str, targets: &[Uid]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        self.update_links_tx(&mut tx, source, body, targets).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Transaction-aware variant of [`Self::update_links`].
    pub async fn update_links_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        source: &Uid,
        body: &str,
        targets: &[Uid],
    ) -> Result<()> {
        sqlx::query("DELETE FROM links WHERE source_uid = ?1")
            .bind(source.as_str())
            .execute(&mut **tx)
            .await?;

        let now = Utc::now();
        let mut seen = HashSet::new();
        for target in targets {
            if target == source || !seen.insert(target) {
                continue;
            }
            let mentions = count_mentions(body, target.as_str()) as i64;
            let strength = mentions.max(1).min(defaults::LINK_STRENGTH_CAP);
            sqlx::query(
                "INSERT INTO links (source_uid, target_uid, kind, strength, created_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(source_uid, target_uid, kind)
                 DO UPDATE SET strength = excluded.strength, last_seen_at = excluded.last_seen_at",
            )
            .bind(source.as_str())
            .bind(target.as_str())
            .bind(LinkKind::Internal.as_str())
            .bind(strength)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Inbound links of `target`, strongest and freshest first. Joined to
    /// `notes` so edges from since-deleted sources never surface.
    pub async fn backlinks(&self, target: &Uid, limit: i64) -> Result<Vec<GraphLink>> {
        let rows = sqlx::query(
            "SELECT l.source_uid AS peer, n.title, l.kind, l.strength, l.last_seen_at
             FROM links l
             JOIN notes n ON n.uid = l.source_uid
             WHERE l.target_uid = ?1
             ORDER BY l.strength DESC, l.last_seen_at DESC
             LIMIT ?2",
        )
        .bind(target.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_link).collect()
    }

    /// Outbound links of `source`, symmetric to [`Self::backlinks`].
    pub async fn outbound(&self, source: &Uid, limit: i64) -> Result<Vec<GraphLink>> {
        let rows = sqlx::query(
            "SELECT l.target_uid AS peer, n.title, l.kind, l.strength, l.last_seen_at
             FROM links l
             JOIN notes n ON n.uid = l.target_uid
             WHERE l.source_uid = ?1
             ORDER BY l.strength DESC, l.last_seen_at DESC
             LIMIT ?2",
        )
        .bind(source.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(row_to_link).collect()
    }

    /// Bounded breadth-first traversal from `start`.
    ///
    /// Each node is scored `decay^depth` (the start node scores 1.0); the
    /// visited set prevents revisits, results are sorted score-descending
    /// with BFS insertion order as the stable tie-break, and the list is
    /// truncated to `limit`.
    pub async fn connected(
        &self,
        start: &Uid,
        options: &ConnectedOptions,
    ) -> Result<Vec<ConnectedNode>> {
        let start_title = self.note_title(start).await?;

        let mut visited: HashSet<Uid> = HashSet::new();
        visited.insert(start.clone());
        let mut results = vec![ConnectedNode {
            uid: start.clone(),
            title: start_title.unwrap_or_default(),
            depth: 0,
            score: 1.0,
        }];

        let mut queue: VecDeque<(Uid, u32, f64)> = VecDeque::new();
        queue.push_back((start.clone(), 0, 1.0));

        while let Some((uid, depth, score)) = queue.pop_front() {
            if depth >= options.depth {
                continue;
            }
            let next_depth = depth + 1;
            let next_score = score * defaults::CONNECTED_DECAY;

            for (peer, title) in self.neighbors(&uid, options.direction).await? {
                if !visited.insert(peer.clone()) {
                    continue;
                }
                results.push(ConnectedNode {
                    uid: peer.clone(),
                    title,
                    depth: next_depth,
                    score: next_score,
                });
                queue.push_back((peer, next_depth, next_score));
            }
        }

        // Stable sort keeps BFS insertion order among equal scores.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(options.limit);
        Ok(results)
    }

    async fn neighbors(&self, uid: &Uid, direction: Direction) -> Result<Vec<(Uid, String)>> {
        let sql = match direction {
            Direction::Outgoing => {
                "SELECT l.target_uid AS peer, n.title
                 FROM links l JOIN notes n ON n.uid = l.target_uid
                 WHERE l.source_uid = ?1
                 ORDER BY l.strength DESC, l.last_seen_at DESC"
            }
            Direction::Incoming => {
                "SELECT l.source_uid AS peer, n.title
                 FROM links l JOIN notes n ON n.uid = l.source_uid
                 WHERE l.target_uid = ?1
                 ORDER BY l.strength DESC, l.last_seen_at DESC"
            }
            Direction::Both => {
                "SELECT peer, title FROM (
                     SELECT l.target_uid AS peer, n.title, l.strength, l.last_seen_at
                     FROM links l JOIN notes n ON n.uid = l.target_uid
                     WHERE l.source_uid = ?1
                     UNION
                     SELECT l.source_uid AS peer, n.title, l.strength, l.last_seen_at
                     FROM links l JOIN notes n ON n.uid = l.source_uid
                     WHERE l.target_uid = ?1
                 ) ORDER BY strength DESC, last_seen_at DESC"
            }
        };
        let rows = sqlx::query(sql)
            .bind(uid.as_str())
            .fetch_all(self.db.pool())
            .await?;

        let mut peers = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("peer");
            match Uid::parse(&raw) {
                Ok(peer) => peers.push((peer, row.get("title"))),
                Err(_) => {
                    tracing::warn!(uid = %raw, "graph row with malformed uid");
                }
            }
        }
        Ok(peers)
    }

    async fn note_title(&self, uid: &Uid) -> Result<Option<String>> {
        let row = sqlx::query("SELECT title FROM notes WHERE uid = ?1")
            .bind(uid.as_str())
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|r| r.get("title")))
    }

    /// Notes with no inbound links, most recently updated first.
    pub async fn orphans(&self, limit: i64) -> Result<Vec<OrphanNote>> {
        let rows = sqlx::query(
            "SELECT n.uid, n.title, n.updated_at
             FROM notes n
             WHERE NOT EXISTS (
                 SELECT 1 FROM links l
                 JOIN notes s ON s.uid = l.source_uid
                 WHERE l.target_uid = n.uid
             )
             ORDER BY n.updated_at DESC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        let mut orphans = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("uid");
            let Ok(uid) = Uid::parse(&raw) else {
                continue;
            };
            orphans.push(OrphanNote {
                uid,
                title: row.get("title"),
                updated_at: row.get("updated_at"),
            });
        }
        Ok(orphans)
    }

    /// Delete every edge touching `uid`, in both directions.
    pub async fn remove_links(&self, uid: &Uid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        self.remove_links_tx(&mut tx, uid).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_links_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        uid: &Uid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM links WHERE source_uid = ?1 OR target_uid = ?1")
            .bind(uid.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Totals plus the most-linked targets.
    pub async fn stats(&self) -> Result<GraphStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(DISTINCT source_uid) AS sources,
                    COUNT(DISTINCT target_uid) AS targets
             FROM links",
        )
        .fetch_one(self.db.pool())
        .await?;
        let total_links: i64 = row.get("total");
        let distinct_sources: i64 = row.get("sources");
        let distinct_targets: i64 = row.get("targets");

        let rows = sqlx::query(
            "SELECT l.target_uid, n.title,
                    COUNT(*) AS inbound, SUM(l.strength) AS strength
             FROM links l
             JOIN notes n ON n.uid = l.target_uid
             GROUP BY l.target_uid
             ORDER BY inbound DESC, strength DESC
             LIMIT 10",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut top_targets = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("target_uid");
            let Ok(uid) = Uid::parse(&raw) else {
                continue;
            };
            top_targets.push(TopTarget {
                uid,
                title: row.get("title"),
                inbound_count: row.get("inbound"),
                total_strength: row.get("strength"),
            });
        }

        Ok(GraphStats {
            total_links,
            distinct_sources,
            distinct_targets,
            top_targets,
        })
    }
}

fn row_to_link(row: sqlx::sqlite::SqliteRow) -> Result<GraphLink> {
    let raw: String = row.get("peer");
    let uid = Uid::parse(&raw)?;
    let kind_raw: String = row.get("kind");
    Ok(GraphLink {
        uid,
        title: row.get("title"),
        kind: kind_raw.parse()?,
        strength: row.get("strength"),
        last_seen_at: row.get("last_seen_at"),
    })
}

/// Occurrence counting shared with the vault layer's definition.
fn count_mentions(body: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    body.match_indices(needle).count()
}
