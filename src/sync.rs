//! Knowledge-base synchronization.
//!
//! Reconciles the local statute directory with the documents the provider
//! already holds, uploading only what is missing and waiting for each upload
//! to finish processing:
//!
//! ```text
//!  scan dir ──▶ list remote ──▶ for each local PDF:
//!                                 remote Active   → reuse
//!                                 remote Pending  → wait
//!                                 missing/Failed  → upload → wait
//! ```
//!
//! Failures are contained per file. A listing failure degrades to an empty
//! listing; upload, processing and timeout failures skip the file. The build
//! only fails when there are no local PDFs or when nothing became ready.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::documents::scan_pdf_dir;
use crate::error::{ProviderError, SyncError};
use crate::models::{FileState, LocalDocument, RemoteDocument, PDF_MIME};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::retry::{poll_until, PollConfig, PollError, PollStatus};
use crate::traits::DocumentStore;

/// Timing knobs for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub poll: PollConfig,
    /// Pause between successive uploads.
    pub upload_delay: Duration,
}

impl From<&SyncConfig> for SyncOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            poll: PollConfig::from(cfg),
            upload_delay: cfg.upload_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Documents already present remotely.
    pub reused: usize,
    pub uploaded: usize,
    /// False when the remote listing failed and everything was uploaded.
    pub listing_available: bool,
    pub skipped: Vec<SkippedDocument>,
}

/// The set of ready remote documents a conversation is seeded with.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBase {
    pub documents: Vec<RemoteDocument>,
    pub report: SyncReport,
}

impl KnowledgeBase {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.documents
            .iter()
            .map(|d| d.display_name.as_str())
            .collect()
    }
}

/// Scan `dir` and synchronize every PDF found there.
pub async fn build_knowledge_base(
    dir: &Path,
    store: &dyn DocumentStore,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<KnowledgeBase, SyncError> {
    let local = scan_pdf_dir(dir)?;
    info!(dir = %dir.display(), files = local.len(), "building knowledge base");
    synchronize(store, &local, options, progress).await
}

/// Make every document in `local` available remotely.
///
/// Returns one `Active` handle per distinct display name, in `local` order.
pub async fn synchronize(
    store: &dyn DocumentStore,
    local: &[LocalDocument],
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<KnowledgeBase, SyncError> {
    progress.report(SyncProgressEvent::Discovered { total: local.len() });

    let mut report = SyncReport {
        listing_available: true,
        ..SyncReport::default()
    };

    let remote = match store.list().await {
        Ok(listing) => index_by_name(listing),
        Err(e) => {
            warn!(error = %SyncError::ListingUnavailable(e), "uploading every document");
            report.listing_available = false;
            HashMap::new()
        }
    };

    let mut seen = HashSet::new();
    let mut documents = Vec::new();
    let mut uploads = 0usize;

    for (i, doc) in local.iter().enumerate() {
        if !seen.insert(doc.name.as_str()) {
            let err = SyncError::DuplicateName {
                name: doc.name.clone(),
            };
            skip(&mut report, progress, &doc.name, &err);
            continue;
        }

        let outcome = match remote.get(doc.name.as_str()) {
            Some(handle) if handle.state == FileState::Active => {
                debug!(name = %doc.name, id = %handle.id, "reusing remote document");
                progress.report(SyncProgressEvent::Reusing {
                    name: doc.name.clone(),
                });
                report.reused += 1;
                Ok(handle.clone())
            }
            Some(handle) if handle.state == FileState::Pending => {
                progress.report(SyncProgressEvent::Waiting {
                    name: doc.name.clone(),
                });
                let ready = wait_until_ready(store, handle, &options.poll).await;
                if ready.is_ok() {
                    report.reused += 1;
                }
                ready
            }
            _ => {
                if uploads > 0 && !options.upload_delay.is_zero() {
                    tokio::time::sleep(options.upload_delay).await;
                }
                uploads += 1;
                progress.report(SyncProgressEvent::Uploading {
                    name: doc.name.clone(),
                    n: i + 1,
                    total: local.len(),
                });
                let ready = upload_document(store, doc, options, progress).await;
                if ready.is_ok() {
                    report.uploaded += 1;
                }
                ready
            }
        };

        match outcome {
            Ok(handle) => {
                progress.report(SyncProgressEvent::Ready {
                    name: doc.name.clone(),
                });
                documents.push(handle);
            }
            Err(err) => skip(&mut report, progress, &doc.name, &err),
        }
    }

    progress.report(SyncProgressEvent::Finished {
        ready: documents.len(),
        skipped: report.skipped.len(),
    });

    if documents.is_empty() {
        return Err(SyncError::EmptyKnowledgeBase {
            skipped: report.skipped.iter().map(|s| s.name.clone()).collect(),
        });
    }

    info!(
        ready = documents.len(),
        reused = report.reused,
        uploaded = report.uploaded,
        skipped = report.skipped.len(),
        "knowledge base ready"
    );
    Ok(KnowledgeBase { documents, report })
}

/// Upload one local file and wait for it to become ready.
async fn upload_document(
    store: &dyn DocumentStore,
    doc: &LocalDocument,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<RemoteDocument, SyncError> {
    let bytes = doc.read_bytes().map_err(|source| SyncError::Io {
        path: doc.path.clone(),
        source,
    })?;

    let handle = store
        .upload(bytes, &doc.name, PDF_MIME)
        .await
        .map_err(|source| SyncError::UploadFailed {
            name: doc.name.clone(),
            source,
        })?;
    debug!(name = %doc.name, id = %handle.id, state = ?handle.state, "uploaded");

    match handle.state {
        FileState::Active => Ok(handle),
        FileState::Failed => Err(SyncError::ProcessingFailed {
            name: doc.name.clone(),
        }),
        FileState::Pending => {
            progress.report(SyncProgressEvent::Waiting {
                name: doc.name.clone(),
            });
            wait_until_ready(store, &handle, &options.poll).await
        }
    }
}

/// Poll `handle` until it leaves `Pending`.
///
/// `Active` → the refreshed handle. `Failed` → [`SyncError::ProcessingFailed`].
/// Timeout → [`SyncError::ProcessingTimeout`]. Provider errors while
/// polling → [`SyncError::UploadFailed`].
pub async fn wait_until_ready(
    store: &dyn DocumentStore,
    handle: &RemoteDocument,
    poll: &PollConfig,
) -> Result<RemoteDocument, SyncError> {
    let id = handle.id.as_str();
    let name = handle.display_name.as_str();

    let result = poll_until(poll, || async move {
        let current = store.get(id).await?;
        Ok::<_, ProviderError>(match current.state {
            FileState::Pending => PollStatus::Pending,
            FileState::Active | FileState::Failed => PollStatus::Done(current),
        })
    })
    .await;

    match result {
        Ok(current) if current.state == FileState::Active => Ok(current),
        Ok(_) => Err(SyncError::ProcessingFailed {
            name: name.to_string(),
        }),
        Err(PollError::TimedOut { waited }) => Err(SyncError::ProcessingTimeout {
            name: name.to_string(),
            waited,
        }),
        Err(PollError::Failed(source)) => Err(SyncError::UploadFailed {
            name: name.to_string(),
            source,
        }),
    }
}

/// Map display name → handle. With several handles per name the most
/// usable state wins (`Active`, then `Pending`, then `Failed`); ties keep
/// the first listed.
fn index_by_name(listing: Vec<RemoteDocument>) -> HashMap<String, RemoteDocument> {
    let mut index: HashMap<String, RemoteDocument> = HashMap::new();
    for handle in listing {
        match index.get(&handle.display_name) {
            Some(existing) if rank(existing.state) >= rank(handle.state) => {}
            _ => {
                index.insert(handle.display_name.clone(), handle);
            }
        }
    }
    index
}

fn rank(state: FileState) -> u8 {
    match state {
        FileState::Active => 2,
        FileState::Pending => 1,
        FileState::Failed => 0,
    }
}

fn skip(
    report: &mut SyncReport,
    progress: &dyn SyncProgressReporter,
    name: &str,
    err: &SyncError,
) {
    warn!(name, error = %err, "skipping document");
    progress.report(SyncProgressEvent::Skipped {
        name: name.to_string(),
        reason: err.to_string(),
    });
    report.skipped.push(SkippedDocument {
        name: name.to_string(),
        reason: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use crate::progress::tests::RecordingProgress;
    use crate::progress::NoProgress;
    use std::path::PathBuf;

    fn fast() -> SyncOptions {
        SyncOptions {
            poll: PollConfig::fixed(Duration::from_millis(2), Duration::from_millis(200)),
            upload_delay: Duration::ZERO,
        }
    }

    fn local(names: &[&str]) -> (tempfile::TempDir, Vec<LocalDocument>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = names
            .iter()
            .map(|n| {
                let path = tmp.path().join(n);
                std::fs::write(&path, format!("%PDF {}", n)).unwrap();
                LocalDocument {
                    path,
                    name: n.to_string(),
                }
            })
            .collect();
        (tmp, docs)
    }

    fn handle(id: &str, name: &str, state: FileState) -> RemoteDocument {
        RemoteDocument {
            id: id.into(),
            display_name: name.into(),
            mime_type: PDF_MIME.into(),
            uri: format!("mem://{}", id),
            state,
        }
    }

    #[tokio::test]
    async fn uploads_everything_into_empty_store() {
        let store = InMemoryDocumentStore::new().ready_after(2);
        let (_tmp, docs) = local(&["luat_thue_tncn.pdf", "luat_thue_gtgt.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();

        assert_eq!(store.upload_count(), 2);
        assert_eq!(kb.len(), 2);
        assert!(kb.documents.iter().all(|d| d.is_ready()));
        assert_eq!(kb.report.uploaded, 2);
        assert_eq!(kb.report.reused, 0);
    }

    #[tokio::test]
    async fn reuses_existing_documents() {
        let store = InMemoryDocumentStore::new()
            .with_existing("luat_thue_tncn.pdf")
            .with_existing("luat_thue_gtgt.pdf");
        let (_tmp, docs) = local(&["luat_thue_tncn.pdf", "luat_thue_gtgt.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();

        assert_eq!(store.upload_count(), 0);
        assert_eq!(kb.report.reused, 2);
        assert_eq!(kb.len(), 2);
    }

    #[tokio::test]
    async fn waits_on_remote_pending_without_reupload() {
        let store = InMemoryDocumentStore::new()
            .ready_after(1)
            .with_pending("luat_moi.pdf");
        let (_tmp, docs) = local(&["luat_moi.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.upload_count(), 0);
        assert_eq!(kb.names(), vec!["luat_moi.pdf"]);
    }

    #[tokio::test]
    async fn failed_remote_copy_is_uploaded_again() {
        let store = InMemoryDocumentStore::new().with_failed("luat_moi.pdf");
        let (_tmp, docs) = local(&["luat_moi.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.upload_count(), 1);
        assert_eq!(kb.len(), 1);
    }

    #[tokio::test]
    async fn stuck_document_is_skipped_and_others_load() {
        let store = InMemoryDocumentStore::new().never_ready("cham.pdf");
        let (_tmp, docs) = local(&["a.pdf", "cham.pdf", "z.pdf"]);
        let rec = RecordingProgress::default();

        let kb = synchronize(&store, &docs, &fast(), &rec).await.unwrap();

        assert_eq!(kb.names(), vec!["a.pdf", "z.pdf"]);
        assert_eq!(kb.report.skipped.len(), 1);
        assert_eq!(kb.report.skipped[0].name, "cham.pdf");
        assert!(kb.report.skipped[0].reason.contains("still processing"));
        let events = rec.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncProgressEvent::Skipped { name, .. } if name == "cham.pdf")));
    }

    #[tokio::test]
    async fn upload_failure_is_contained() {
        let store = InMemoryDocumentStore::new().fail_upload("hong.pdf");
        let (_tmp, docs) = local(&["hong.pdf", "tot.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(kb.names(), vec!["tot.pdf"]);
        assert!(kb.report.skipped[0].reason.contains("failed to upload"));
    }

    #[tokio::test]
    async fn processing_failure_is_contained() {
        let store = InMemoryDocumentStore::new().fail_processing("hong.pdf");
        let (_tmp, docs) = local(&["hong.pdf", "tot.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(kb.names(), vec!["tot.pdf"]);
        assert!(kb.report.skipped[0].reason.contains("marked"));
    }

    #[tokio::test]
    async fn listing_failure_degrades_to_upload_everything() {
        let store = InMemoryDocumentStore::new()
            .with_existing("a.pdf")
            .fail_listing();
        let (_tmp, docs) = local(&["a.pdf", "b.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.upload_count(), 2);
        assert!(!kb.report.listing_available);
        assert_eq!(kb.len(), 2);
    }

    #[tokio::test]
    async fn nothing_ready_is_empty_knowledge_base() {
        let store = InMemoryDocumentStore::new()
            .fail_upload("a.pdf")
            .never_ready("b.pdf");
        let (_tmp, docs) = local(&["a.pdf", "b.pdf"]);

        let err = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap_err();
        match err {
            SyncError::EmptyKnowledgeBase { skipped } => assert_eq!(skipped, vec!["a.pdf", "b.pdf"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_local_names_keep_the_first() {
        let store = InMemoryDocumentStore::new();
        let (_tmp, mut docs) = local(&["a.pdf"]);
        docs.push(LocalDocument {
            path: PathBuf::from("/elsewhere/a.pdf"),
            name: "a.pdf".into(),
        });

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(kb.len(), 1);
        assert_eq!(store.upload_count(), 1);
        assert!(kb.report.skipped[0].reason.contains("shares its display name"));
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped() {
        let store = InMemoryDocumentStore::new();
        let (_tmp, mut docs) = local(&["a.pdf"]);
        docs.push(LocalDocument {
            path: PathBuf::from("/definitely/not/here.pdf"),
            name: "here.pdf".into(),
        });

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(kb.names(), vec!["a.pdf"]);
        assert_eq!(kb.report.skipped[0].name, "here.pdf");
    }

    #[tokio::test]
    async fn upload_delay_separates_uploads() {
        let store = InMemoryDocumentStore::new();
        let (_tmp, docs) = local(&["a.pdf", "b.pdf", "c.pdf"]);
        let options = SyncOptions {
            upload_delay: Duration::from_millis(30),
            ..fast()
        };

        let started = std::time::Instant::now();
        synchronize(&store, &docs, &options, &NoProgress)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn index_prefers_active_handles() {
        let index = index_by_name(vec![
            handle("files/1", "a.pdf", FileState::Failed),
            handle("files/2", "a.pdf", FileState::Active),
            handle("files/3", "a.pdf", FileState::Active),
            handle("files/4", "b.pdf", FileState::Pending),
            handle("files/5", "b.pdf", FileState::Failed),
        ]);
        assert_eq!(index["a.pdf"].id, "files/2");
        assert_eq!(index["b.pdf"].id, "files/4");
    }

    #[test]
    fn index_prefers_pending_over_failed() {
        let index = index_by_name(vec![
            handle("files/1", "a.pdf", FileState::Failed),
            handle("files/2", "a.pdf", FileState::Pending),
        ]);
        assert_eq!(index["a.pdf"].id, "files/2");
    }

    #[tokio::test]
    async fn pending_copy_listed_after_failed_one_is_awaited() {
        let store = InMemoryDocumentStore::new()
            .ready_after(1)
            .with_failed("a.pdf")
            .with_pending("a.pdf");
        let (_tmp, docs) = local(&["a.pdf"]);

        let kb = synchronize(&store, &docs, &fast(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.upload_count(), 0);
        assert_eq!(kb.names(), vec!["a.pdf"]);
    }
}
