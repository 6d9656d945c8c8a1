// Background persistence for the source cache.
//
// The read path never awaits a store write. Jobs go onto an unbounded
// channel drained by one spawned worker; failures are logged and dropped.
// Every job is safe to replay: inserts pre-check the URL and domain
// aggregates are rebuilt from all rows.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gamescribe_common::config::DomainSettings;

use crate::cleaner::{CleanRequest, ContentCleaner};
use crate::domain_quality::compute_domain_quality;
use crate::error::Result;
use crate::exclusion::ExclusionSet;
use crate::model::{DomainQuality, NewSourceContent};
use crate::store::SourceStore;

#[derive(Debug)]
pub enum WriteJob {
    /// Insert a row (unless present) and recompute its domain.
    Store(NewSourceContent),
    /// Record cache hits.
    Touch(Vec<String>),
    /// Score relevance for a legacy row, then recompute its domain.
    RepairRelevance { domain: String, request: CleanRequest },
    /// Resolves once every earlier job has been processed.
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable handle for enqueueing writes.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriteQueue {
    pub fn enqueue(&self, job: WriteJob) {
        if self.tx.send(job).is_err() {
            warn!("Source cache writer has stopped; dropping write");
        }
    }

    /// Wait for every job enqueued so far to finish.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(WriteJob::Flush(done_tx));
        let _ = done_rx.await;
    }
}

/// The worker side. Owns everything a job needs.
pub struct BackgroundWriter {
    store: Arc<dyn SourceStore>,
    cleaner: Option<Arc<dyn ContentCleaner>>,
    exclusions: Arc<ExclusionSet>,
    settings: DomainSettings,
}

impl BackgroundWriter {
    pub fn new(
        store: Arc<dyn SourceStore>,
        cleaner: Option<Arc<dyn ContentCleaner>>,
        exclusions: Arc<ExclusionSet>,
        settings: DomainSettings,
    ) -> Self {
        Self {
            store,
            cleaner,
            exclusions,
            settings,
        }
    }

    /// Spawn the worker. It exits after every `WriteQueue` clone is dropped.
    pub fn spawn(self) -> (WriteQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (WriteQueue { tx }, handle)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
        let mut processed = 0u64;
        while let Some(job) = rx.recv().await {
            match job {
                WriteJob::Flush(done) => {
                    let _ = done.send(());
                }
                job => {
                    if let Err(e) = self.handle(job).await {
                        warn!(error = %e, "Source cache write failed");
                    }
                    processed += 1;
                }
            }
        }
        info!(processed, "Source cache writer stopped");
    }

    async fn handle(&self, job: WriteJob) -> Result<()> {
        match job {
            WriteJob::Store(row) => {
                let inserted = self.store.insert_if_absent(&row).await?;
                if inserted {
                    debug!(url = row.url.as_str(), stub = row.stub, "Stored source");
                    self.refresh_domain(&row.domain).await?;
                }
            }
            WriteJob::Touch(urls) => {
                self.store.touch(&urls).await?;
            }
            WriteJob::RepairRelevance { domain, request } => {
                let Some(cleaner) = &self.cleaner else {
                    return Ok(());
                };
                let relevance = cleaner.score_relevance(&request).await?;
                self.store.update_relevance(&request.url, relevance).await?;
                info!(url = request.url.as_str(), relevance, "Repaired legacy relevance score");
                self.refresh_domain(&domain).await?;
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
        Ok(())
    }

    async fn refresh_domain(&self, domain: &str) -> Result<DomainQuality> {
        refresh_domain(self.store.as_ref(), &self.exclusions, &self.settings, domain).await
    }
}

/// Rebuild a domain's quality record from every stored row, persist it, and
/// update the in-memory exclusion set.
pub async fn refresh_domain(
    store: &dyn SourceStore,
    exclusions: &ExclusionSet,
    settings: &DomainSettings,
    domain: &str,
) -> Result<DomainQuality> {
    let aggregate = store.domain_aggregate(domain).await?;
    let providers = store.provider_stats(domain).await?;
    let quality = compute_domain_quality(domain, &aggregate, &providers, settings, Utc::now());

    store.upsert_domain_quality(&quality).await?;
    exclusions.apply(&quality);

    debug!(
        domain,
        tier = %quality.tier,
        samples = quality.total_samples,
        excluded = quality.is_excluded,
        "Domain quality recomputed"
    );
    Ok(quality)
}
