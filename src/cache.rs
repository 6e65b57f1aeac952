use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    course::{Block, Step},
    utils::now,
};

pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What a piece of generated content was produced for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationTarget {
    NextStep {
        index: usize,
        lesson_id: Option<String>,
    },
    LessonBlocks {
        section_id: String,
        lesson_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GeneratedUnit {
    Step(Step),
    Blocks(Vec<Block>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregeneratedContent {
    pub target: GenerationTarget,
    pub unit: GeneratedUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub course_id: String,
    pub user_id: String,
}

impl CacheKey {
    pub fn new(course_id: &str, user_id: &str) -> Self {
        Self {
            course_id: course_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content: PregeneratedContent,
    version: u64,
    created_at: OffsetDateTime,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, at: Instant) -> bool {
        at > self.expires_at
    }
}

/// TTL cache of speculatively generated content, one live entry per (course, user).
///
/// Entries are single use: whoever serves one deletes it.
#[derive(Debug)]
pub struct PregenerationCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    version: AtomicU64,
}

impl Default for PregenerationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PregenerationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            version: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Hands out a version newer than every version handed out before.
    pub fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Unexpired content for the key. The entry is left in place.
    pub fn get(&self, course_id: &str, user_id: &str) -> Option<PregeneratedContent> {
        let entry = self.entries.get(&CacheKey::new(course_id, user_id))?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.content.clone())
    }

    pub fn has(&self, course_id: &str, user_id: &str) -> bool {
        self.entries
            .get(&CacheKey::new(course_id, user_id))
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }

    /// When the live entry for the key was written
    pub fn created_at(&self, course_id: &str, user_id: &str) -> Option<OffsetDateTime> {
        let entry = self.entries.get(&CacheKey::new(course_id, user_id))?;
        (!entry.is_expired(Instant::now())).then_some(entry.created_at)
    }

    /// Stores content under a fresh version, replacing whatever was there.
    pub fn set(&self, course_id: &str, user_id: &str, content: PregeneratedContent) {
        let version = self.next_version();
        self.set_versioned(course_id, user_id, content, version);
    }

    /// Stores content unless a newer version is already stored. Returns whether it was written.
    pub fn set_versioned(
        &self,
        course_id: &str,
        user_id: &str,
        content: PregeneratedContent,
        version: u64,
    ) -> bool {
        let entry = CacheEntry {
            content,
            version,
            created_at: now(),
            expires_at: Instant::now() + self.ttl,
        };
        match self.entries.entry(CacheKey::new(course_id, user_id)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version > version {
                    debug!(
                        "discarding stale content for course {} (version {} < {})",
                        course_id,
                        version,
                        occupied.get().version
                    );
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        true
    }

    pub fn delete(&self, course_id: &str, user_id: &str) -> bool {
        self.entries
            .remove(&CacheKey::new(course_id, user_id))
            .is_some()
    }

    /// Drops every expired entry and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let at = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(at));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Periodically purges expired entries. The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("purged {} expired pregenerated entries", purged);
                }
            }
        })
    }
}
