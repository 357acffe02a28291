//! Session contexts and the association hook.
//!
//! Each session holds a bounded, ordered set of recently referenced note
//! UIDs, kept in memory only: sessions die on explicit reset or process
//! shutdown. Associative search reweights hybrid results by how much of the
//! session's recent history sits in each candidate's immediate graph
//! neighborhood.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tokio::sync::Mutex;

use mementa_core::{defaults, Result, Uid};
use mementa_index::{ConnectedOptions, SearchEngine, SearchOptions};

/// Options for [`SessionStore::associate`].
#[derive(Debug, Clone, Copy)]
pub struct AssociateOptions {
    pub limit: usize,
    /// Blend weight of session affinity against the hybrid score.
    pub strength: f64,
}

impl Default for AssociateOptions {
    fn default() -> Self {
        AssociateOptions {
            limit: defaults::ASSOCIATE_LIMIT,
            strength: defaults::ASSOCIATE_STRENGTH,
        }
    }
}

/// One association result: a hybrid hit reweighted by session affinity.
#[derive(Debug, Clone, Serialize)]
pub struct AssociatedHit {
    pub uid: Uid,
    pub title: String,
    pub snippet: String,
    pub hybrid_score: f64,
    /// Share of the session's recent UIDs found in this candidate's
    /// depth-1 neighborhood.
    pub affinity: f64,
    pub blended_score: f64,
}

/// In-memory session registry. Mutation is guarded by a single mutex.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, VecDeque<Uid>>>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Recent UIDs of a session, oldest first. `None` for unknown sessions.
    pub async fn get(&self, session_id: &str) -> Option<Vec<Uid>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|recent| recent.iter().cloned().collect())
    }

    /// Create the session when missing and return its recent UIDs.
    pub async fn ensure(&self, session_id: &str) -> Vec<Uid> {
        self.sessions
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .iter()
            .cloned()
            .collect()
    }

    /// Drop a session. Returns whether it existed.
    pub async fn reset(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    /// Record a referenced UID, moving repeats to the freshest slot and
    /// evicting the oldest beyond capacity.
    pub async fn record(&self, session_id: &str, uid: Uid) {
        let mut sessions = self.sessions.lock().await;
        let recent = sessions.entry(session_id.to_string()).or_default();
        recent.retain(|u| u != &uid);
        recent.push_back(uid);
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Hybrid search reweighted by session affinity.
    ///
    /// A missing session is created empty, in which case results fall back
    /// to pure hybrid ordering scaled by `1 - strength`.
    pub async fn associate(
        &self,
        engine: &SearchEngine,
        session_id: &str,
        query: &str,
        options: AssociateOptions,
    ) -> Result<Vec<AssociatedHit>> {
        let recent = self.ensure(session_id).await;

        // Oversample seeds so affinity can promote lower-ranked hybrids.
        let seed_limit = (options.limit.max(1) * 4).max(20) as i64;
        let (seeds, _, _) = engine
            .search(
                query,
                &SearchOptions {
                    limit: seed_limit,
                    ..SearchOptions::default()
                },
            )
            .await?;

        let mut hits = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let affinity = if recent.is_empty() {
                0.0
            } else {
                let neighborhood = engine
                    .connected(
                        &seed.uid,
                        &ConnectedOptions {
                            depth: 1,
                            limit: defaults::CONNECTED_LIMIT,
                            ..ConnectedOptions::default()
                        },
                    )
                    .await?;
                let neighbor_set: HashSet<Uid> =
                    neighborhood.into_iter().map(|n| n.uid).collect();
                let overlap = recent
                    .iter()
                    .filter(|uid| neighbor_set.contains(*uid))
                    .count();
                overlap as f64 / recent.len() as f64
            };

            let blended_score =
                (1.0 - options.strength) * seed.combined_score + options.strength * affinity;
            hits.push(AssociatedHit {
                uid: seed.uid,
                title: seed.title,
                snippet: seed.snippet,
                hybrid_score: seed.combined_score,
                affinity,
                blended_score,
            });
        }

        hits.sort_by(|a, b| {
            b.blended_score
                .partial_cmp(&a.blended_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(options.limit);
        Ok(hits)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(defaults::SESSION_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mementa_core::generate_uid;

    #[tokio::test]
    async fn test_get_missing_session() {
        let store = SessionStore::default();
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_record_orders_and_dedups() {
        let store = SessionStore::default();
        let a = generate_uid();
        let b = generate_uid();

        store.record("s", a.clone()).await;
        store.record("s", b.clone()).await;
        store.record("s", a.clone()).await; // moves a to freshest

        let recent = store.get("s").await.unwrap();
        assert_eq!(recent, vec![b, a]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = SessionStore::new(3);
        let uids: Vec<_> = (0..5).map(|_| generate_uid()).collect();
        for uid in &uids {
            store.record("s", uid.clone()).await;
        }

        let recent = store.get("s").await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent, uids[2..].to_vec());
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SessionStore::default();
        store.record("s", generate_uid()).await;
        assert!(store.reset("s").await);
        assert!(!store.reset("s").await);
        assert!(store.get("s").await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_creates_empty_session() {
        let store = SessionStore::default();
        assert!(store.ensure("fresh").await.is_empty());
        assert!(store.get("fresh").await.is_some());
        assert_eq!(store.session_count().await, 1);
    }
}
