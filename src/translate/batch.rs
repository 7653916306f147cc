//! Batch translation with a rolling concurrency window.
//!
//! Every document is fingerprinted and checked against the cache first; only
//! misses reach the provider. At most `concurrency` jobs are in flight, and a
//! finished job immediately admits the next pending one. A failed job never
//! stops its siblings, and `completed` advances exactly once per job.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{fingerprint, TranslationCache};
use super::{TranslateError, TranslationProvider};
use crate::document::Document;
use crate::events::{BatchEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Translating,
    Done,
    Failed,
}

/// Whether a fresh translation made it into the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheWrite {
    Stored,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    CacheHit { text: String },
    Translated { text: String, cache_write: CacheWrite },
    Failed { reason: String },
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Failed { .. } => JobState::Failed,
            _ => JobState::Done,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            JobOutcome::CacheHit { text } | JobOutcome::Translated { text, .. } => Some(text),
            JobOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub document_id: String,
    pub state: JobState,
    pub outcome: JobOutcome,
    pub elapsed_ms: f64,
}

/// Final state of a batch. `jobs` are in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub jobs: Vec<JobReport>,
    pub completed: usize,
    pub total: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.state == JobState::Done).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|j| j.state == JobState::Failed).count()
    }

    pub fn cache_hits(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::CacheHit { .. }))
            .count()
    }

    pub fn job(&self, document_id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.document_id == document_id)
    }
}

pub struct BatchTranslator {
    cache: Arc<TranslationCache>,
    provider: Arc<dyn TranslationProvider>,
    concurrency: NonZeroUsize,
}

impl BatchTranslator {
    pub fn new(
        cache: Arc<TranslationCache>,
        provider: Arc<dyn TranslationProvider>,
        concurrency: NonZeroUsize,
    ) -> Self {
        Self {
            cache,
            provider,
            concurrency,
        }
    }

    /// Run every document to `Done` or `Failed`. Resolves with
    /// `completed == total`; an empty input resolves at once with `0/0`.
    ///
    /// Cancelling `cancel` abandons in-flight provider calls and fails the
    /// jobs that have not reached the provider yet; cache hits still resolve.
    pub async fn run(
        &self,
        documents: Vec<Document>,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let total = documents.len();
        let start = Instant::now();
        let completed = AtomicUsize::new(0);

        events.send(BatchEvent::Started { batch_id, total });
        info!(
            %batch_id,
            total,
            concurrency = self.concurrency.get(),
            provider = self.provider.name(),
            "batch started"
        );

        let completed_ref = &completed;
        let mut jobs: Vec<(usize, JobReport)> = stream::iter(documents.into_iter().enumerate())
            .map(|(index, document)| async move {
                let report = self.run_job(document, events, cancel).await;
                let done = completed_ref.fetch_add(1, Ordering::SeqCst) + 1;
                events.send(BatchEvent::Progress {
                    completed: done,
                    total,
                });
                (index, report)
            })
            .buffer_unordered(self.concurrency.get())
            .collect()
            .await;

        jobs.sort_by_key(|(index, _)| *index);
        let report = BatchReport {
            batch_id,
            jobs: jobs.into_iter().map(|(_, job)| job).collect(),
            completed: completed.load(Ordering::SeqCst),
            total,
        };

        events.send(BatchEvent::Finished {
            completed: report.completed,
            total,
            failed: report.failed(),
        });
        info!(
            %batch_id,
            completed = report.completed,
            cache_hits = report.cache_hits(),
            failed = report.failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch finished"
        );

        report
    }

    async fn run_job(
        &self,
        document: Document,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> JobReport {
        let start = Instant::now();
        let digest = fingerprint(&document.text);

        let outcome = if let Some(text) = self.cache.lookup_async(&document.id, &digest).await {
            JobOutcome::CacheHit { text }
        } else if cancel.is_cancelled() {
            JobOutcome::Failed {
                reason: TranslateError::Cancelled.to_string(),
            }
        } else {
            events.send(BatchEvent::JobTranslating {
                document_id: document.id.clone(),
            });
            debug!(document_id = %document.id, "translating");

            let result = tokio::select! {
                result = self.provider.translate(&document.text) => result,
                _ = cancel.cancelled() => Err(TranslateError::Cancelled),
            };

            match result {
                Ok(text) => {
                    let cache_write = match self
                        .cache
                        .store_async(&document.id, &digest, &document.text, &text)
                        .await
                    {
                        Ok(()) => CacheWrite::Stored,
                        Err(e) => {
                            warn!(document_id = %document.id, error = %e, "failed to persist translation");
                            CacheWrite::Failed(e.to_string())
                        }
                    };
                    JobOutcome::Translated { text, cache_write }
                }
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "translation failed");
                    JobOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        match &outcome {
            JobOutcome::Failed { reason } => events.send(BatchEvent::JobFailed {
                document_id: document.id.clone(),
                error: reason.clone(),
            }),
            other => events.send(BatchEvent::JobDone {
                document_id: document.id.clone(),
                cached: matches!(other, JobOutcome::CacheHit { .. }),
            }),
        }

        JobReport {
            document_id: document.id,
            state: outcome.state(),
            outcome,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, null_sender};
    use crate::translate::store::{CacheEntry, CacheError, CacheStats, CacheStore, MemoryStore};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    #[derive(Default)]
    struct MockProvider {
        delay: Duration,
        delays: HashMap<String, Duration>,
        fail_on: HashSet<String>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockProvider {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TranslationProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-1"
        }

        fn translate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);

                let delay = self.delays.get(text).copied().unwrap_or(self.delay);
                tokio::time::sleep(delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.fail_on.contains(text) {
                    Err(TranslateError::ApiError(format!("unexpected status 500: {text}")))
                } else {
                    Ok(format!("T({text})"))
                }
            }
            .boxed()
        }
    }

    /// Reads work, writes always fail (quota exceeded).
    #[derive(Default)]
    struct FullStore(MemoryStore);

    impl CacheStore for FullStore {
        fn get(&self, document_id: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.0.get(document_id)
        }
        fn put(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, document_id: &str) -> Result<bool, CacheError> {
            self.0.remove(document_id)
        }
        fn clear(&self) -> Result<usize, CacheError> {
            self.0.clear()
        }
        fn stats(&self) -> Result<CacheStats, CacheError> {
            self.0.stats()
        }
    }

    fn docs(names: &[&str]) -> Vec<Document> {
        names
            .iter()
            .map(|n| Document::new(format!("/docs/{n}.md"), *n))
            .collect()
    }

    fn memory_cache() -> Arc<TranslationCache> {
        Arc::new(TranslationCache::new(Arc::new(MemoryStore::new())))
    }

    fn translator(
        cache: Arc<TranslationCache>,
        provider: Arc<MockProvider>,
        limit: usize,
    ) -> BatchTranslator {
        BatchTranslator::new(cache, provider, NonZeroUsize::new(limit).unwrap())
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        let provider = Arc::new(MockProvider::default());
        let (tx, mut rx) = channel();
        let report = translator(memory_cache(), provider.clone(), 3)
            .run(Vec::new(), &tx, &CancellationToken::new())
            .await;

        assert_eq!((report.completed, report.total), (0, 0));
        assert!(report.jobs.is_empty());
        assert_eq!(provider.calls(), 0);

        let events = rx.drain();
        assert!(matches!(events[0], BatchEvent::Started { total: 0, .. }));
        assert_eq!(
            events[1],
            BatchEvent::Finished {
                completed: 0,
                total: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn all_cache_hits_make_no_provider_calls() {
        let cache = memory_cache();
        let batch = docs(&["a", "b", "c"]);
        for doc in &batch {
            cache
                .store(&doc.id, &fingerprint(&doc.text), &doc.text, "cached")
                .unwrap();
        }

        let provider = Arc::new(MockProvider::default());
        let report = translator(cache, provider.clone(), 2)
            .run(batch, &null_sender(), &CancellationToken::new())
            .await;

        assert_eq!(provider.calls(), 0);
        assert_eq!(report.cache_hits(), 3);
        assert_eq!(report.completed, 3);
        assert!(report.jobs.iter().all(|j| j.outcome.text() == Some("cached")));
    }

    #[tokio::test]
    async fn in_flight_calls_never_exceed_the_limit() {
        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(20)));
        let names: Vec<String> = (0..10).map(|i| format!("doc{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = translator(memory_cache(), provider.clone(), 3)
            .run(docs(&names), &null_sender(), &CancellationToken::new())
            .await;

        assert_eq!(report.completed, 10);
        assert_eq!(provider.calls(), 10);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn limit_above_input_size_fans_out_fully() {
        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(20)));
        let report = translator(memory_cache(), provider.clone(), 10)
            .run(docs(&["a", "b", "c", "d"]), &null_sender(), &CancellationToken::new())
            .await;

        assert_eq!(report.completed, 4);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn finished_job_admits_the_next_one_immediately() {
        let mut provider = MockProvider::with_delay(Duration::from_millis(10));
        provider
            .delays
            .insert("slow".to_string(), Duration::from_millis(250));
        let provider = Arc::new(provider);
        let (tx, mut rx) = channel();

        translator(memory_cache(), provider, 2)
            .run(
                docs(&["slow", "f1", "f2", "f3", "f4"]),
                &tx,
                &CancellationToken::new(),
            )
            .await;

        let finished: Vec<String> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::JobDone { document_id, .. } => Some(document_id),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 5);
        // The fast jobs cycle through the second slot while "slow" holds the first.
        assert_eq!(finished.last().map(String::as_str), Some("/docs/slow.md"));
    }

    #[tokio::test]
    async fn progress_counts_every_job_once() {
        let mut provider = MockProvider::with_delay(Duration::from_millis(5));
        provider.fail_on.insert("b".to_string());
        let (tx, mut rx) = channel();

        let report = translator(memory_cache(), Arc::new(provider), 2)
            .run(docs(&["a", "b", "c", "d", "e"]), &tx, &CancellationToken::new())
            .await;

        let progress: Vec<(usize, usize)> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { completed, total } => Some((completed, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (1..=5).map(|c| (c, 5)).collect::<Vec<_>>());
        assert_eq!(report.completed, report.total);
    }

    #[tokio::test]
    async fn failures_are_isolated_to_their_jobs() {
        let mut provider = MockProvider::with_delay(Duration::from_millis(5));
        provider.fail_on.insert("A".to_string());
        provider.fail_on.insert("C".to_string());
        let cache = memory_cache();
        let (tx, mut rx) = channel();

        let report = translator(cache.clone(), Arc::new(provider), 2)
            .run(docs(&["A", "B", "C", "D"]), &tx, &CancellationToken::new())
            .await;

        assert_eq!(report.completed, 4);
        assert_eq!(report.total, 4);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 2);

        for id in ["/docs/A.md", "/docs/C.md"] {
            let job = report.job(id).unwrap();
            assert_eq!(job.state, JobState::Failed);
            match &job.outcome {
                JobOutcome::Failed { reason } => assert!(reason.contains("500")),
                other => panic!("expected failure, got {other:?}"),
            }
        }
        for (id, text) in [("/docs/B.md", "B"), ("/docs/D.md", "D")] {
            assert_eq!(report.job(id).unwrap().state, JobState::Done);
            assert_eq!(
                cache.lookup(id, &fingerprint(text)).as_deref(),
                Some(format!("T({text})").as_str())
            );
        }
        assert_eq!(cache.stats().unwrap().entries, 2);
        assert!(cache.lookup("/docs/A.md", &fingerprint("A")).is_none());

        let events = rx.drain();
        assert_eq!(
            events.last(),
            Some(&BatchEvent::Finished {
                completed: 4,
                total: 4,
                failed: 2
            })
        );
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(1)));
        let cache = memory_cache();
        let t = translator(cache, provider.clone(), 3);

        t.run(docs(&["a", "b"]), &null_sender(), &CancellationToken::new())
            .await;
        let again = t
            .run(docs(&["a", "b"]), &null_sender(), &CancellationToken::new())
            .await;

        assert_eq!(provider.calls(), 2);
        assert_eq!(again.cache_hits(), 2);
    }

    #[tokio::test]
    async fn failed_cache_write_still_completes_the_job() {
        let provider = Arc::new(MockProvider::default());
        let cache = Arc::new(TranslationCache::new(Arc::new(FullStore::default())));

        let report = translator(cache, provider, 1)
            .run(docs(&["a"]), &null_sender(), &CancellationToken::new())
            .await;

        let job = &report.jobs[0];
        assert_eq!(job.state, JobState::Done);
        match &job.outcome {
            JobOutcome::Translated { text, cache_write } => {
                assert_eq!(text, "T(a)");
                assert!(matches!(cache_write, CacheWrite::Failed(_)));
            }
            other => panic!("expected translation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_resolves_every_job() {
        let provider = Arc::new(MockProvider::with_delay(Duration::from_secs(30)));
        let cache = memory_cache();
        let hit = Document::new("/docs/hit.md", "hit");
        cache
            .store(&hit.id, &fingerprint(&hit.text), &hit.text, "cached")
            .unwrap();

        let mut batch = docs(&["a", "b", "c"]);
        batch.push(hit);
        let cancel = CancellationToken::new();
        let t = translator(cache, provider.clone(), 1);
        let events = null_sender();

        let (report, _) = tokio::join!(t.run(batch, &events, &cancel), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        assert_eq!(report.completed, 4);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.cache_hits(), 1);
        assert_eq!(provider.calls(), 1);
        assert!(report.jobs.iter().filter(|j| j.state == JobState::Failed).all(|j| {
            j.outcome
                == JobOutcome::Failed {
                    reason: TranslateError::Cancelled.to_string(),
                }
        }));
    }
}
