//! Process-wide memoized knowledge base.
//!
//! The knowledge base is built at most once per process (or per explicit
//! reset) and shared by every session. Concurrent first callers wait on the
//! same in-flight build and observe the same outcome, errors included.
//! [`KnowledgeCache::reset`] swaps in a fresh cell; a build already running
//! finishes for the callers that joined it.

use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::error::SyncError;
use crate::progress::SyncProgressReporter;
use crate::sync::{build_knowledge_base, KnowledgeBase, SyncOptions};
use crate::traits::DocumentStore;

/// Result of one knowledge-base build, shared by all callers.
pub type KnowledgeOutcome = Result<KnowledgeBase, SyncError>;

struct Slot {
    generation: u64,
    cell: Arc<OnceCell<Arc<KnowledgeOutcome>>>,
}

pub struct KnowledgeCache {
    slot: RwLock<Slot>,
}

impl Default for KnowledgeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                generation: 0,
                cell: Arc::new(OnceCell::new()),
            }),
        }
    }

    /// Return the memoized outcome, running `build` if nothing is cached.
    ///
    /// Only one `build` runs per generation; other callers await it.
    pub async fn get_or_build<F, Fut>(&self, build: F) -> Arc<KnowledgeOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = KnowledgeOutcome>,
    {
        let (generation, cell) = self.current();
        cell.get_or_init(|| async move {
            tracing::info!(generation, "building knowledge base");
            Arc::new(build().await)
        })
        .await
        .clone()
    }

    /// Build from the configured documents directory, or reuse the cached
    /// outcome.
    pub async fn load(
        &self,
        config: &Config,
        store: &dyn DocumentStore,
        progress: &dyn SyncProgressReporter,
    ) -> Arc<KnowledgeOutcome> {
        let options = SyncOptions::from(&config.sync);
        self.get_or_build(|| async move {
            build_knowledge_base(&config.documents.dir, store, &options, progress).await
        })
        .await
    }

    /// The cached outcome, if a build has completed in this generation.
    pub fn peek(&self) -> Option<Arc<KnowledgeOutcome>> {
        self.current().1.get().cloned()
    }

    /// Forget the cached outcome. The next [`get_or_build`](Self::get_or_build)
    /// builds again.
    pub fn reset(&self) -> u64 {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.generation += 1;
        slot.cell = Arc::new(OnceCell::new());
        tracing::info!(generation = slot.generation, "knowledge base reset");
        slot.generation
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    fn current(&self) -> (u64, Arc<OnceCell<Arc<KnowledgeOutcome>>>) {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        (slot.generation, slot.cell.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncReport;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn kb(tag: &str) -> KnowledgeBase {
        KnowledgeBase {
            documents: vec![crate::models::RemoteDocument {
                id: format!("files/{}", tag),
                display_name: format!("{}.pdf", tag),
                mime_type: crate::models::PDF_MIME.to_string(),
                uri: format!("mem://{}", tag),
                state: crate::models::FileState::Active,
            }],
            report: SyncReport::default(),
        }
    }

    #[tokio::test]
    async fn builds_once_and_memoizes() {
        let cache = KnowledgeCache::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let out = cache
                .get_or_build(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(kb("a"))
                })
                .await;
            assert!(out.is_ok());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let cache = Arc::new(KnowledgeCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(|| async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(kb("shared"))
                    })
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(outcomes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn errors_are_memoized_until_reset() {
        let cache = KnowledgeCache::new();
        let first = cache
            .get_or_build(|| async {
                Err(SyncError::NoDocumentsFound {
                    dir: PathBuf::from("tailieu"),
                })
            })
            .await;
        assert!(first.is_err());

        let second = cache.get_or_build(|| async { Ok(kb("late")) }).await;
        assert!(second.is_err());

        cache.reset();
        let third = cache.get_or_build(|| async { Ok(kb("late")) }).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn reset_forces_rebuild() {
        let cache = KnowledgeCache::new();
        assert!(cache.peek().is_none());

        cache.get_or_build(|| async { Ok(kb("v1")) }).await;
        assert!(cache.peek().is_some());
        assert_eq!(cache.generation(), 0);

        assert_eq!(cache.reset(), 1);
        assert!(cache.peek().is_none());

        let out = cache.get_or_build(|| async { Ok(kb("v2")) }).await;
        let names = (*out).as_ref().unwrap().names();
        assert_eq!(names, vec!["v2.pdf"]);
    }

    #[tokio::test]
    async fn load_syncs_configured_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("luat_thue.pdf"), b"%PDF-1.4").unwrap();
        let mut config = Config::default();
        config.documents.dir = dir.path().to_path_buf();
        config.sync.upload_delay_ms = 0;

        let store = crate::memory::InMemoryDocumentStore::new();
        let cache = KnowledgeCache::new();
        let progress = crate::progress::NoProgress;

        let first = cache.load(&config, &store, &progress).await;
        let second = cache.load(&config, &store, &progress).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((*first).as_ref().unwrap().names(), vec!["luat_thue.pdf"]);
        assert_eq!(store.upload_count(), 1);
    }
}
