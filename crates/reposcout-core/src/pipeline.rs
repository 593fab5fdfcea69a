//! Request pipeline: intake queue, validation, dispatch and shutdown drain.
//!
//! ```text
//! listener ──submit──▶ [bounded queue] ──▶ validate ──▶ dispatch ──▶ respond
//!                                            │             │
//!                                            └─ 4xx        ├─ cache hit
//!                                                          └─ upstream search, cache write
//! ```
//!
//! The loop pulls one handle at a time, but only after a worker permit is
//! free, so at most `workers` requests are resolved concurrently and a full
//! queue pushes back on the listener. Each accepted request runs in its own
//! task; a slow upstream call for one topic never delays a cache hit for
//! another.
//!
//! The cache lock is never held across the upstream call. Two concurrent
//! misses on the same topic therefore both go upstream and both write the
//! cache; the second write wins.
//!
//! Once [`Termination`] is raised the intake refuses new handles, handles still
//! queued are answered with 503, and requests already being resolved run to
//! completion before [`Pipeline::finished`] returns.

use crate::cache::TopicCache;
use crate::request::{Delivery, RequestHandle};
use crate::responder;
use crate::termination::Termination;
use crate::types::RepoSummary;
use crate::upstream::RepoSearch;
use crate::validator::{WorkItem, validate};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

const RATE_LIMIT_UNKNOWN: u64 = u64::MAX;

/// How a validated request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the cache without an upstream call.
    CacheHit,
    /// Fetched upstream, cached, then served.
    Fetched,
    /// Upstream failed; a gateway error was sent and nothing was cached.
    Failed,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
        }
    }
}

/// Resolved payload paired with the handle it answers.
#[derive(Debug)]
pub struct ResultEnvelope {
    pub handle: RequestHandle,
    pub repos: Vec<RepoSummary>,
}

impl ResultEnvelope {
    /// Send the repositories as `200 application/json`.
    pub fn respond(self) -> Delivery {
        responder::respond_json(self.handle, &self.repos)
    }
}

/// Resolves validated requests against the cache and the upstream search.
pub struct Dispatcher {
    cache: Arc<TopicCache>,
    search: Arc<dyn RepoSearch>,
    rate_limit_remaining: AtomicU64,
}

impl Dispatcher {
    pub fn new(cache: Arc<TopicCache>, search: Arc<dyn RepoSearch>) -> Self {
        Self {
            cache,
            search,
            rate_limit_remaining: AtomicU64::new(RATE_LIMIT_UNKNOWN),
        }
    }

    pub const fn cache(&self) -> &Arc<TopicCache> {
        &self.cache
    }

    /// Most recent `X-RateLimit-Remaining` seen from upstream, if any.
    pub fn rate_limit_remaining(&self) -> Option<u32> {
        match self.rate_limit_remaining.load(Ordering::Relaxed) {
            RATE_LIMIT_UNKNOWN => None,
            value => u32::try_from(value).ok(),
        }
    }

    /// Answer `item` from the cache, or fetch, cache and answer it.
    ///
    /// Always consumes the handle with exactly one response. Failed fetches are
    /// not cached, so the next request for the topic tries upstream again.
    pub async fn dispatch(&self, item: WorkItem) -> Outcome {
        let (handle, topic) = item.into_parts();
        let request_id = handle.id();

        if let Some(repos) = self.cache.read(&topic).await {
            debug!(request_id, topic = %topic, count = repos.len(), "cache hit");
            ResultEnvelope { handle, repos }.respond();
            return Outcome::CacheHit;
        }

        match self.search.search(&topic).await {
            Ok(page) => {
                if let Some(remaining) = page.rate_limit_remaining {
                    self.rate_limit_remaining
                        .store(u64::from(remaining), Ordering::Relaxed);
                }

                let repos: Vec<RepoSummary> =
                    page.items.into_iter().map(RepoSummary::from).collect();
                info!(request_id, topic = %topic, count = repos.len(), "fetched from upstream");

                self.cache.write(topic, repos.clone()).await;
                ResultEnvelope { handle, repos }.respond();
                Outcome::Fetched
            },
            Err(e) => {
                warn!(
                    request_id,
                    topic = %topic,
                    category = e.category(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "upstream search failed"
                );
                responder::respond_upstream_error(handle, &e);
                Outcome::Failed
            },
        }
    }
}

/// Submission side of the pipeline queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Intake {
    tx: mpsc::Sender<RequestHandle>,
    termination: Termination,
}

impl Intake {
    /// Queue `handle` for resolution, waiting while the queue is full.
    ///
    /// After termination the handle is handed back untouched and the caller
    /// is expected to answer it with [`responder::respond_unavailable`].
    pub async fn submit(&self, handle: RequestHandle) -> Result<(), RequestHandle> {
        if self.termination.is_raised() {
            return Err(handle);
        }
        self.tx.send(handle).await.map_err(|refused| refused.0)
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cache_hits: u64,
    pub fetched: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Handles still queued at termination and answered with 503.
    pub refused: u64,
    /// Tasks that panicked or were cancelled before answering.
    pub aborted: u64,
}

impl RunSummary {
    fn record(&mut self, joined: Result<Outcome, JoinError>) {
        match joined {
            Ok(Outcome::CacheHit) => self.cache_hits += 1,
            Ok(Outcome::Fetched) => self.fetched += 1,
            Ok(Outcome::Failed) => self.failed += 1,
            Err(e) => {
                error!(error = %e, "request task did not complete");
                self.aborted += 1;
            },
        }
    }

    /// Requests that reached a response through validation or dispatch.
    pub const fn resolved(&self) -> u64 {
        self.cache_hits + self.fetched + self.failed + self.rejected
    }
}

/// A running pipeline.
pub struct Pipeline {
    intake: Intake,
    task: JoinHandle<RunSummary>,
}

impl Pipeline {
    /// Start the pipeline loop on the current runtime.
    ///
    /// `workers` and `queue_depth` must both be at least 1.
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        termination: Termination,
        workers: usize,
        queue_depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let intake = Intake {
            tx,
            termination: termination.clone(),
        };
        let task = tokio::spawn(run(dispatcher, termination, rx, workers.max(1)));
        Self { intake, task }
    }

    pub fn intake(&self) -> Intake {
        self.intake.clone()
    }

    /// Wait for the loop to stop and in-flight requests to drain.
    ///
    /// The loop stops when termination is raised, or when every [`Intake`]
    /// clone has been dropped.
    pub async fn finished(self) -> RunSummary {
        drop(self.intake);
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "pipeline loop did not complete");
                RunSummary::default()
            },
        }
    }
}

async fn run(
    dispatcher: Arc<Dispatcher>,
    termination: Termination,
    mut rx: mpsc::Receiver<RequestHandle>,
    workers: usize,
) -> RunSummary {
    let permits = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();
    let mut summary = RunSummary::default();
    let shutdown = termination.raised();
    tokio::pin!(shutdown);

    debug!(workers, "pipeline started");

    loop {
        let permit = tokio::select! {
            biased;
            () = &mut shutdown => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let handle = tokio::select! {
            biased;
            () = &mut shutdown => break,
            received = rx.recv() => match received {
                Some(handle) => handle,
                None => break,
            },
        };

        while let Some(joined) = in_flight.try_join_next() {
            summary.record(joined);
        }

        match validate(handle) {
            Ok(item) => {
                let span = info_span!("request", request_id = item.handle().id(), topic = item.topic());
                let dispatcher = Arc::clone(&dispatcher);
                in_flight.spawn(
                    async move {
                        let _permit = permit;
                        let outcome = dispatcher.dispatch(item).await;
                        debug!(outcome = outcome.as_str(), "request resolved");
                        outcome
                    }
                    .instrument(span),
                );
            },
            Err(rejected) => {
                debug!(
                    request_id = rejected.handle.id(),
                    reason = rejected.rejection.reason(),
                    "request rejected"
                );
                rejected.respond();
                summary.rejected += 1;
            },
        }
    }

    rx.close();
    while let Some(handle) = rx.recv().await {
        responder::respond_unavailable(handle);
        summary.refused += 1;
    }

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "draining in-flight requests");
    }
    while let Some(joined) = in_flight.join_next().await {
        summary.record(joined);
    }

    info!(
        cache_hits = summary.cache_hits,
        fetched = summary.fetched,
        failed = summary.failed,
        rejected = summary.rejected,
        refused = summary.refused,
        aborted = summary.aborted,
        "pipeline stopped"
    );
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::SharedLruCache;
    use crate::request::{PendingReply, Reply};
    use crate::types::{RepoItem, SearchPage};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use http::{Method, StatusCode};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Canned upstream that counts calls per topic.
    #[derive(Default)]
    struct FakeSearch {
        calls: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        failing: Vec<String>,
        // Calls block until a permit is added, when set.
        gate: Option<Arc<Semaphore>>,
        // Topics that wait on `gate`; empty means every topic does.
        gated: Vec<String>,
    }

    impl FakeSearch {
        fn calls_for(&self, topic: &str) -> usize {
            self.calls.lock().unwrap().get(topic).copied().unwrap_or(0)
        }
    }

    fn item(name: &str, stars: u64) -> RepoItem {
        RepoItem {
            name: name.to_string(),
            description: None,
            html_url: format!("https://github.com/example/{name}"),
            stargazers_count: stars,
            forks_count: 1,
        }
    }

    #[async_trait]
    impl RepoSearch for FakeSearch {
        async fn search(&self, topic: &str) -> Result<SearchPage> {
            *self.calls.lock().unwrap().entry(topic.to_string()).or_default() += 1;
            self.total.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                if self.gated.is_empty() || self.gated.iter().any(|t| t == topic) {
                    gate.acquire().await.unwrap().forget();
                }
            }
            if self.failing.iter().any(|t| t == topic) {
                return Err(Error::Upstream {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(SearchPage {
                items: vec![
                    item(&format!("{topic}-1"), 30),
                    item(&format!("{topic}-2"), 10),
                    item(&format!("{topic}-3"), 20),
                ],
                rate_limit_remaining: Some(42),
            })
        }
    }

    fn dispatcher(capacity: usize, search: Arc<FakeSearch>) -> Arc<Dispatcher> {
        let cache = Arc::new(SharedLruCache::new(capacity).unwrap());
        Arc::new(Dispatcher::new(cache, search))
    }

    fn get(topic: &str) -> (RequestHandle, PendingReply) {
        RequestHandle::new(Method::GET, format!("/?topic={topic}"))
    }

    async fn reply_of(pending: PendingReply) -> Reply {
        tokio::time::timeout(Duration::from_secs(5), pending.wait())
            .await
            .unwrap()
            .unwrap()
    }

    fn names(reply: &Reply) -> Vec<String> {
        let repos: Vec<RepoSummary> = serde_json::from_slice(&reply.body).unwrap();
        repos.into_iter().map(|r| r.name).collect()
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let search = Arc::new(FakeSearch::default());
        let dispatcher = dispatcher(4, Arc::clone(&search));

        let (handle, pending) = get("go");
        let outcome = dispatcher.dispatch(validate(handle).unwrap()).await;
        assert_eq!(outcome, Outcome::Fetched);
        let first = reply_of(pending).await;
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(names(&first), ["go-1", "go-2", "go-3"]);

        let (handle, pending) = get("go");
        let outcome = dispatcher.dispatch(validate(handle).unwrap()).await;
        assert_eq!(outcome, Outcome::CacheHit);
        let second = reply_of(pending).await;
        assert_eq!(second.body, first.body);

        assert_eq!(search.calls_for("go"), 1);
        assert_eq!(dispatcher.rate_limit_remaining(), Some(42));
    }

    #[tokio::test]
    async fn test_least_recent_topic_is_evicted() {
        let search = Arc::new(FakeSearch::default());
        let dispatcher = dispatcher(2, Arc::clone(&search));

        for topic in ["a", "b", "c", "a"] {
            let (handle, pending) = get(topic);
            dispatcher.dispatch(validate(handle).unwrap()).await;
            reply_of(pending).await;
        }

        assert_eq!(search.calls_for("a"), 2);
        assert_eq!(search.calls_for("b"), 1);
        assert_eq!(search.calls_for("c"), 1);
        assert!(!dispatcher.cache().contains(&"b".to_string()).await);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let search = Arc::new(FakeSearch {
            failing: vec!["broken".to_string()],
            ..FakeSearch::default()
        });
        let dispatcher = dispatcher(4, Arc::clone(&search));

        for _ in 0..2 {
            let (handle, pending) = get("broken");
            let outcome = dispatcher.dispatch(validate(handle).unwrap()).await;
            assert_eq!(outcome, Outcome::Failed);
            assert_eq!(reply_of(pending).await.status, StatusCode::BAD_GATEWAY);
        }

        assert_eq!(search.calls_for("broken"), 2);
        assert!(dispatcher.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_pipeline_rejects_without_upstream_call() {
        let search = Arc::new(FakeSearch::default());
        let termination = Termination::new();
        let pipeline = Pipeline::spawn(dispatcher(4, Arc::clone(&search)), termination, 4, 16);
        let intake = pipeline.intake();

        let (handle, pending) = RequestHandle::new(Method::POST, "/?topic=go");
        intake.submit(handle).await.unwrap();
        let reply = reply_of(pending).await;
        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);

        let (handle, pending) = RequestHandle::new(Method::GET, "/?nope=1");
        intake.submit(handle).await.unwrap();
        assert_eq!(reply_of(pending).await.status, StatusCode::BAD_REQUEST);

        drop(intake);
        let summary = pipeline.finished().await;
        assert_eq!(summary.rejected, 2);
        assert_eq!(search.total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_concurrent_requests() {
        let search = Arc::new(FakeSearch {
            failing: vec!["bad".to_string()],
            ..FakeSearch::default()
        });
        let pipeline = Pipeline::spawn(
            dispatcher(8, Arc::clone(&search)),
            Termination::new(),
            8,
            16,
        );
        let intake = pipeline.intake();

        let mut pending = Vec::new();
        for topic in ["good", "bad", "other"] {
            let (handle, reply) = get(topic);
            intake.submit(handle).await.unwrap();
            pending.push(reply);
        }

        let statuses: Vec<_> = futures::future::join_all(pending.into_iter().map(reply_of))
            .await
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            [StatusCode::OK, StatusCode::BAD_GATEWAY, StatusCode::OK]
        );

        drop(intake);
        let summary = pipeline.finished().await;
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_termination_refuses_queued_and_drains_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let search = Arc::new(FakeSearch {
            gate: Some(Arc::clone(&gate)),
            ..FakeSearch::default()
        });
        let termination = Termination::new();
        // One worker: the first request occupies it, the second stays queued.
        let pipeline = Pipeline::spawn(
            dispatcher(4, Arc::clone(&search)),
            termination.clone(),
            1,
            16,
        );
        let intake = pipeline.intake();

        let (first, first_reply) = get("slow");
        intake.submit(first).await.unwrap();
        while search.total.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (queued, queued_reply) = get("queued");
        intake.submit(queued).await.unwrap();

        termination.raise();
        assert_eq!(
            reply_of(queued_reply).await.status,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let (late, late_reply) = get("late");
        let refused = intake.submit(late).await.unwrap_err();
        responder::respond_unavailable(refused);
        assert_eq!(
            reply_of(late_reply).await.status,
            StatusCode::SERVICE_UNAVAILABLE
        );

        // The in-flight request still completes normally.
        gate.add_permits(1);
        assert_eq!(reply_of(first_reply).await.status, StatusCode::OK);

        let summary = pipeline.finished().await;
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.refused, 1);
        assert_eq!(search.calls_for("queued"), 0);
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrent_upstream_calls() {
        let gate = Arc::new(Semaphore::new(0));
        let search = Arc::new(FakeSearch {
            gate: Some(Arc::clone(&gate)),
            ..FakeSearch::default()
        });
        let pipeline = Pipeline::spawn(
            dispatcher(8, Arc::clone(&search)),
            Termination::new(),
            2,
            16,
        );
        let intake = pipeline.intake();

        let mut pending = Vec::new();
        for topic in ["t1", "t2", "t3", "t4"] {
            let (handle, reply) = get(topic);
            intake.submit(handle).await.unwrap();
            pending.push(reply);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(search.total.load(Ordering::SeqCst), 2);

        gate.add_permits(4);
        for reply in futures::future::join_all(pending.into_iter().map(reply_of)).await {
            assert_eq!(reply.status, StatusCode::OK);
        }
        assert_eq!(search.total.load(Ordering::SeqCst), 4);

        drop(intake);
        let summary = pipeline.finished().await;
        assert_eq!(summary.fetched, 4);
    }

    #[tokio::test]
    async fn test_slow_topic_does_not_block_unrelated_topic() {
        let gate = Arc::new(Semaphore::new(0));
        let search = Arc::new(FakeSearch {
            gate: Some(Arc::clone(&gate)),
            gated: vec!["slow".to_string()],
            ..FakeSearch::default()
        });
        let pipeline = Pipeline::spawn(
            dispatcher(4, Arc::clone(&search)),
            Termination::new(),
            4,
            16,
        );
        let intake = pipeline.intake();

        let (handle, warm) = get("cached");
        intake.submit(handle).await.unwrap();
        assert_eq!(reply_of(warm).await.status, StatusCode::OK);

        let (handle, slow_reply) = get("slow");
        intake.submit(handle).await.unwrap();
        let slow = tokio::spawn(slow_reply.wait());
        while search.calls_for("slow") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // A cold fetch and a cache hit both complete while "slow" is stuck upstream.
        let (handle, fast_reply) = get("fast");
        intake.submit(handle).await.unwrap();
        let (handle, hit_reply) = get("cached");
        intake.submit(handle).await.unwrap();

        let fast = tokio::time::timeout(Duration::from_secs(1), fast_reply.wait())
            .await
            .expect("unrelated fetch waited on the blocked topic")
            .unwrap();
        assert_eq!(fast.status, StatusCode::OK);
        assert_eq!(names(&fast), ["fast-1", "fast-2", "fast-3"]);

        let hit = tokio::time::timeout(Duration::from_secs(1), hit_reply.wait())
            .await
            .expect("cache hit waited on the blocked topic")
            .unwrap();
        assert_eq!(hit.status, StatusCode::OK);

        assert!(!slow.is_finished());

        gate.add_permits(1);
        let slow = tokio::time::timeout(Duration::from_secs(5), slow)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(slow.status, StatusCode::OK);

        drop(intake);
        let summary = pipeline.finished().await;
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(search.calls_for("cached"), 1);
    }

    #[tokio::test]
    async fn test_summary_counts_tasks_that_never_answered() {
        let mut summary = RunSummary::default();

        let cancelled = tokio::spawn(std::future::pending::<Outcome>());
        cancelled.abort();
        summary.record(cancelled.await);

        let panicked: std::result::Result<Outcome, JoinError> =
            tokio::spawn(async { panic!("task blew up") }).await;
        summary.record(panicked);

        summary.record(Ok(Outcome::Fetched));

        assert_eq!(summary.aborted, 2);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.resolved(), 1);
    }
}
