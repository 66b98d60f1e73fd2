//! Bounded conversation memory with summarize-then-compact

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::MemoryContext;
use super::store::ConversationStore;
use super::summarizer::Summarizer;
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::metrics::METRICS;

/// Per-user view of the conversation store that keeps history bounded
pub struct ConversationMemory {
    store: ConversationStore,
    summarizer: Arc<dyn Summarizer>,
    max_history_rows: usize,
    keep_recent_rows: usize,
    summary_max_tokens: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationMemory {
    pub fn new(store: ConversationStore, summarizer: Arc<dyn Summarizer>, config: &MemoryConfig) -> Self {
        Self {
            store,
            summarizer,
            max_history_rows: config.max_history_rows,
            keep_recent_rows: config.keep_recent_rows,
            summary_max_tokens: config.summary_max_tokens,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the user's summary and recent turns, compacting when history is too long
    pub async fn load(&self, user_id: &str) -> Result<MemoryContext> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let count = self.store.count(user_id).await?;
        let summary = self.store.summary(user_id).await?;

        if count <= self.max_history_rows {
            let messages = self.store.history(user_id).await?;
            return Ok(MemoryContext {
                summary,
                messages,
                compacted: false,
            });
        }

        let mut rows = self.store.history(user_id).await?;
        let split = rows.len().saturating_sub(self.keep_recent_rows);
        let kept = rows.split_off(split);
        let older = rows;

        let through_id = match older.last() {
            Some(last) => last.id,
            None => {
                return Ok(MemoryContext {
                    summary,
                    messages: kept,
                    compacted: false,
                })
            }
        };

        debug!(
            "Compacting {} of {} rows for user {}",
            older.len(),
            count,
            user_id
        );

        match self
            .summarizer
            .summarize(summary.as_deref(), &older, self.summary_max_tokens)
            .await
        {
            Ok(new_summary) => {
                let removed = self.store.compact(user_id, &new_summary, through_id).await?;
                METRICS.memory_compactions.inc();
                info!("Compacted {} rows for user {}", removed, user_id);
                Ok(MemoryContext {
                    summary: Some(new_summary),
                    messages: kept,
                    compacted: true,
                })
            }
            Err(e) => {
                warn!("Summarization failed for user {}, keeping full history: {}", user_id, e);
                let mut all = older;
                all.extend(kept);
                let start = all.len().saturating_sub(self.max_history_rows);
                Ok(MemoryContext {
                    summary,
                    messages: all.split_off(start),
                    compacted: false,
                })
            }
        }
    }

    /// Drop the user's rows and summary
    pub async fn clear(&self, user_id: &str) -> Result<usize> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let removed = self.store.clear(user_id).await?;
        // Only the map and this call hold the mutex: nobody is queued on it
        self.locks.remove_if(user_id, |_, held| Arc::strong_count(held) == 2);
        Ok(removed)
    }
}
