//! Async job poller for vendors that answer with a job handle.
//!
//! ```text
//! Submitted -> Polling -> Succeeded | Failed | Canceled | TimedOut
//! ```
//!
//! The first status fetch happens immediately. While the job runs, the wait between
//! fetches grows geometrically with jitter and is capped at
//! [`PollerConfig::max_interval`]. The whole sequence is bounded by
//! [`PollerConfig::max_duration`]; exceeding it is a fatal [`LLMError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, LLMError};
use crate::stream::{ChatStream, ChunkContext, StreamEvent, finalize_stream};
use crate::types::{ChatChunk, FinishReason, JobStatus, PredictionJob};

/// Fetches the current snapshot of a vendor job.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn fetch(&self, job_id: &str) -> Result<PredictionJob, LLMError>;
}

/// Poll timing and failure thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Growth factor applied to the base interval after each wait. Values below 1 are treated as 1.
    pub multiplier: f64,
    /// Upper bound of the random fraction added on top of the base interval, within `0.0..=1.0`.
    pub jitter: f64,
    /// Wall-clock ceiling measured from submission.
    pub max_duration: Duration,
    /// Deadline for a single status fetch.
    pub attempt_timeout: Duration,
    /// Consecutive transient failures tolerated before giving up.
    pub max_consecutive_errors: u32,
    /// Attempts mapped linearly onto the 5–50% progress range.
    pub linear_progress_attempts: u32,
    /// Fixed RNG seed for reproducible jitter.
    pub seed: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(1000),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
            jitter: 0.1,
            max_duration: Duration::from_secs(600),
            attempt_timeout: Duration::from_secs(30),
            max_consecutive_errors: 5,
            linear_progress_attempts: 10,
            seed: None,
        }
    }
}

/// Non-decreasing, capped, jittered interval sequence.
#[derive(Debug)]
pub struct Backoff {
    base: f64,
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    rng: StdRng,
}

impl Backoff {
    pub fn new(config: &PollerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            base: config.initial_interval.as_secs_f64(),
            current: Duration::ZERO,
            max: config.max_interval.max(config.initial_interval),
            multiplier: if config.multiplier.is_finite() {
                config.multiplier.max(1.0)
            } else {
                1.0
            },
            jitter: if config.jitter.is_finite() {
                config.jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            rng,
        }
    }

    /// Returns the next wait and grows the base for the following one.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1.0 + self.rng.random_range(0.0..=self.jitter);
        let candidate = Duration::try_from_secs_f64(self.base * factor).unwrap_or(self.max);
        self.current = candidate.max(self.current).min(self.max);
        self.base = (self.base * self.multiplier).min(self.max.as_secs_f64());
        self.current
    }

    /// Jumps straight to the maximum interval.
    pub fn saturate(&mut self) {
        self.current = self.max;
        self.base = self.max.as_secs_f64();
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Progress percentage after `attempt` fetches (1-based).
///
/// The first `linear_attempts` fetches map linearly onto 5–50%; later ones
/// approach 95% logarithmically. Never reaches 100.
pub fn progress_for_attempt(attempt: u32, linear_attempts: u32) -> f32 {
    let linear = linear_attempts.max(1);
    if attempt <= linear {
        return 5.0 + 45.0 * attempt as f32 / linear as f32;
    }
    let extra = f64::from(attempt - linear);
    let x = (1.0 + extra).ln();
    (50.0 + 45.0 * x / (x + 2.0)).min(95.0) as f32
}

/// Outcome of one poll step.
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Running { job: PredictionJob, progress: f32 },
    Succeeded(PredictionJob),
}

/// One polling sequence for one job.
pub struct PollSession<S: ?Sized> {
    source: Arc<S>,
    config: PollerConfig,
    job_id: String,
    cancel: CancellationToken,
    started: Instant,
    deadline: Instant,
    backoff: Backoff,
    attempt: u32,
    consecutive_errors: u32,
    progress: f32,
    forced_delay: Option<Duration>,
    finished: bool,
}

impl<S: JobSource + ?Sized> PollSession<S> {
    fn new(source: Arc<S>, config: PollerConfig, job_id: String, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        let backoff = Backoff::new(&config);
        Self {
            deadline: started + config.max_duration,
            source,
            job_id,
            cancel,
            started,
            backoff,
            attempt: 0,
            consecutive_errors: 0,
            progress: 0.0,
            forced_delay: None,
            finished: false,
            config,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn aborted(&self) -> LLMError {
        LLMError::Aborted {
            message: format!("polling of job {} was cancelled", self.job_id),
        }
    }

    fn timed_out(&self) -> LLMError {
        LLMError::Timeout {
            message: format!(
                "job {} did not finish within {:?}",
                self.job_id, self.config.max_duration
            ),
            elapsed: self.started.elapsed(),
        }
    }

    fn fail(&mut self, err: LLMError) -> Result<PollUpdate, LLMError> {
        self.finished = true;
        Err(err)
    }

    /// Waits (except before the first fetch), fetches once and classifies the result.
    ///
    /// Returns only on a terminal outcome or on a still-running snapshot; transient
    /// errors and rate limits are absorbed until their thresholds.
    pub async fn next_update(&mut self) -> Result<PollUpdate, LLMError> {
        if self.finished {
            return Err(LLMError::validation(format!(
                "polling of job {} already finished",
                self.job_id
            )));
        }
        let provider = self.source.provider();
        loop {
            if self.attempt > 0 {
                let delay = match self.forced_delay.take() {
                    Some(delay) => delay,
                    None => self.backoff.next_delay(),
                };
                let wake = (Instant::now() + delay).min(self.deadline);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        let err = self.aborted();
                        return self.fail(err);
                    }
                    _ = sleep_until(wake) => {}
                }
            }
            if self.cancel.is_cancelled() {
                let err = self.aborted();
                return self.fail(err);
            }
            let now = Instant::now();
            if now >= self.deadline {
                warn!(provider, job_id = %self.job_id, attempts = self.attempt, "job polling timed out");
                let err = self.timed_out();
                return self.fail(err);
            }

            self.attempt += 1;
            let attempt_timeout = self.config.attempt_timeout.min(self.deadline - now);
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let err = self.aborted();
                    return self.fail(err);
                }
                result = timeout(attempt_timeout, self.source.fetch(&self.job_id)) => result,
            };
            let result = fetched.unwrap_or_else(|_| {
                Err(LLMError::Timeout {
                    message: format!("status fetch for job {} timed out", self.job_id),
                    elapsed: attempt_timeout,
                })
            });

            match result {
                Ok(job) => {
                    self.consecutive_errors = 0;
                    debug!(provider, job_id = %job.id, status = ?job.status, attempt = self.attempt, "job polled");
                    match job.status {
                        JobStatus::Succeeded => {
                            info!(provider, job_id = %job.id, attempts = self.attempt, "job succeeded");
                            self.finished = true;
                            return Ok(PollUpdate::Succeeded(job));
                        }
                        JobStatus::Failed | JobStatus::Canceled => {
                            info!(provider, job_id = %job.id, status = ?job.status, "job ended without result");
                            let message = job.error.clone().unwrap_or_else(|| {
                                if job.status == JobStatus::Canceled {
                                    "job was canceled upstream".to_string()
                                } else {
                                    "job failed without an error message".to_string()
                                }
                            });
                            return self.fail(LLMError::UpstreamJobFailed {
                                provider,
                                job_id: job.id,
                                message,
                            });
                        }
                        JobStatus::Starting | JobStatus::Processing => {
                            let progress =
                                progress_for_attempt(self.attempt, self.config.linear_progress_attempts);
                            self.progress = self.progress.max(progress);
                            return Ok(PollUpdate::Running {
                                job,
                                progress: self.progress,
                            });
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::RateLimited => {
                    let hint = match &err {
                        LLMError::RateLimit { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    self.backoff.saturate();
                    let delay = hint.map_or(self.backoff.max(), |hint| hint.max(self.backoff.max()));
                    self.forced_delay = Some(delay);
                    debug!(provider, job_id = %self.job_id, delay_ms = delay.as_millis() as u64, "poll rate limited");
                }
                Err(err) if err.is_transient() => {
                    self.consecutive_errors += 1;
                    warn!(
                        provider,
                        job_id = %self.job_id,
                        consecutive_errors = self.consecutive_errors,
                        error = %err,
                        "transient poll failure"
                    );
                    if self.consecutive_errors > self.config.max_consecutive_errors {
                        return self.fail(err);
                    }
                }
                Err(err) => return self.fail(err),
            }
        }
    }
}

/// Drives [`PollSession`]s against one [`JobSource`].
pub struct JobPoller<S: ?Sized> {
    source: Arc<S>,
    config: PollerConfig,
}

impl<S: ?Sized> Clone for JobPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        }
    }
}

impl<S: JobSource + ?Sized + 'static> JobPoller<S> {
    pub fn new(source: Arc<S>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Starts a session for `job_id`. The wall clock starts now.
    pub fn session(&self, job_id: impl Into<String>, cancel: CancellationToken) -> PollSession<S> {
        PollSession::new(
            Arc::clone(&self.source),
            self.config.clone(),
            job_id.into(),
            cancel,
        )
    }

    /// Polls until the job reaches a terminal state.
    ///
    /// `progress` receives a non-decreasing percentage after every running snapshot
    /// and exactly `100.0` on success.
    pub async fn poll(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<PredictionJob, LLMError> {
        let mut session = self.session(job_id, cancel.clone());
        loop {
            match session.next_update().await? {
                PollUpdate::Running { progress: pct, .. } => {
                    if let Some(report) = progress {
                        report(pct);
                    }
                }
                PollUpdate::Succeeded(job) => {
                    if let Some(report) = progress {
                        report(100.0);
                    }
                    return Ok(job);
                }
            }
        }
    }

    /// Polls in a background task and yields simulated chunks.
    ///
    /// Every running snapshot whose accumulated text grew yields a chunk with the new
    /// suffix; success yields the remainder plus a `stop` chunk. A snapshot that
    /// rewrites already streamed text is logged; only its bytes past the streamed
    /// length are forwarded. Chunks pass through a
    /// bounded channel. Dropping the stream cancels the task at its next wait or fetch.
    pub fn poll_stream(
        &self,
        job_id: impl Into<String>,
        context: ChunkContext,
        cancel: CancellationToken,
    ) -> ChatStream {
        let (tx, rx) = mpsc::channel::<Result<ChatChunk, LLMError>>(16);
        let task_token = cancel.child_token();
        let guard = task_token.clone().drop_guard();
        let mut session = self.session(job_id, task_token);

        tokio::spawn(async move {
            let mut context = context;
            let mut sent = String::new();
            loop {
                let update = session.next_update().await;
                let (job, done) = match update {
                    Ok(PollUpdate::Running { job, .. }) => (job, false),
                    Ok(PollUpdate::Succeeded(job)) => (job, true),
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                let text = job.output_text();
                let mut events = Vec::new();
                if !text.starts_with(sent.as_str()) {
                    warn!(
                        job_id = %session.job_id(),
                        sent = sent.len(),
                        received = text.len(),
                        "job output rewrote text that was already streamed"
                    );
                }
                if let Some(delta) = snapshot_delta(&sent, &text) {
                    events.push(StreamEvent::Text(delta.to_string()));
                }
                if text.len() >= sent.len() {
                    sent = text;
                }
                if done {
                    events.push(StreamEvent::Finish(FinishReason::Stop));
                }
                if let Some(chunk) = context.build_chunk(events) {
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!(job_id = %session.job_id(), "stream consumer went away");
                        return;
                    }
                }
                if done {
                    return;
                }
            }
        });

        let receiver = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        });
        finalize_stream(Box::pin(receiver))
    }
}

/// Part of `text` not yet covered by `sent`, starting at a char boundary.
fn snapshot_delta<'a>(sent: &str, text: &'a str) -> Option<&'a str> {
    let rest = match text.strip_prefix(sent) {
        Some(rest) => rest,
        None => {
            let mut start = sent.len().min(text.len());
            while !text.is_char_boundary(start) {
                start += 1;
            }
            &text[start..]
        }
    };
    (!rest.is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::StreamExt;
    use serde_json::json;

    struct Scripted {
        responses: Mutex<VecDeque<Result<PredictionJob, LLMError>>>,
        fallback: JobStatus,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<Result<PredictionJob, LLMError>>, fallback: JobStatus) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobSource for Scripted {
        fn provider(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, job_id: &str) -> Result<PredictionJob, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(PredictionJob::new(job_id, self.fallback)))
        }
    }

    fn running(output: Option<serde_json::Value>) -> Result<PredictionJob, LLMError> {
        let mut job = PredictionJob::new("job-1", JobStatus::Processing);
        job.output = output;
        Ok(job)
    }

    fn config() -> PollerConfig {
        PollerConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.2,
            max_duration: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(5),
            max_consecutive_errors: 2,
            linear_progress_attempts: 3,
            seed: Some(7),
        }
    }

    #[test]
    fn backoff_is_non_decreasing_capped_and_reproducible() {
        let cfg = config();
        let mut a = Backoff::new(&cfg);
        let mut b = Backoff::new(&cfg);
        let first: Vec<Duration> = (0..20).map(|_| a.next_delay()).collect();
        let second: Vec<Duration> = (0..20).map(|_| b.next_delay()).collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] <= w[1]));
        assert!(first.iter().all(|d| *d <= cfg.max_interval));
        assert!(first[0] >= cfg.initial_interval);
        assert_eq!(*first.last().unwrap(), cfg.max_interval);

        // Before saturating, each wait is at most base * (1 + jitter); bases double
        // from 100ms, so the sum of the first four waits is below 1.2 * 1500ms.
        let before_max: Duration = first.iter().take(4).sum();
        assert!(before_max <= Duration::from_millis(1800), "{before_max:?}");
    }

    #[test]
    fn extreme_settings_stay_within_max_interval() {
        let cfg = PollerConfig {
            initial_interval: Duration::from_secs(u64::MAX / 2),
            max_interval: Duration::from_secs(u64::MAX / 2),
            multiplier: 1e300,
            jitter: 1e300,
            ..config()
        };
        let mut backoff = Backoff::new(&cfg);
        for _ in 0..5 {
            assert!(backoff.next_delay() <= cfg.max_interval);
        }

        let cfg = PollerConfig {
            multiplier: f64::INFINITY,
            jitter: f64::NAN,
            ..config()
        };
        let mut backoff = Backoff::new(&cfg);
        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], cfg.initial_interval);
        assert!(delays.iter().all(|d| *d <= cfg.max_interval));
    }

    #[test]
    fn progress_is_monotone_and_below_hundred() {
        let values: Vec<f32> = (1..200).map(|n| progress_for_attempt(n, 10)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!((progress_for_attempt(10, 10) - 50.0).abs() < f32::EPSILON);
        assert!(values.iter().all(|v| *v >= 5.0 && *v <= 95.0));
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_is_immediate_and_success_returns_job() {
        let mut done = PredictionJob::new("job-1", JobStatus::Succeeded);
        done.output = Some(json!("ok"));
        let source = Scripted::new(vec![running(None), running(None), Ok(done)], JobStatus::Processing);
        let poller = JobPoller::new(source.clone(), config());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let report = move |pct: f32| sink.lock().unwrap().push(pct);
        let job = poller
            .poll("job-1", &CancellationToken::new(), Some(&report))
            .await
            .expect("job");

        assert_eq!(job.output_text(), "ok");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(*seen.last().unwrap(), 100.0);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_job_times_out() {
        let source = Scripted::new(Vec::new(), JobStatus::Processing);
        let poller = JobPoller::new(source, config());
        let started = Instant::now();
        match poller.poll("job-1", &CancellationToken::new(), None).await {
            Err(LLMError::Timeout { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_upstream_failure() {
        let mut failed = PredictionJob::new("job-1", JobStatus::Failed);
        failed.error = Some("CUDA out of memory".into());
        let source = Scripted::new(vec![running(None), Ok(failed)], JobStatus::Processing);
        let poller = JobPoller::new(source, config());
        match poller.poll("job-1", &CancellationToken::new(), None).await {
            Err(LLMError::UpstreamJobFailed { message, job_id, .. }) => {
                assert_eq!(message, "CUDA out of memory");
                assert_eq!(job_id, "job-1");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_tolerated_until_threshold() {
        let flaky = || Err(LLMError::transport("scripted", "connection reset"));
        let done = Ok(PredictionJob::new("job-1", JobStatus::Succeeded));
        let source = Scripted::new(vec![flaky(), flaky(), running(None), flaky(), done], JobStatus::Processing);
        let poller = JobPoller::new(source, config());
        assert!(poller.poll("job-1", &CancellationToken::new(), None).await.is_ok());

        let source = Scripted::new(vec![flaky(), flaky(), flaky()], JobStatus::Processing);
        let poller = JobPoller::new(source.clone(), config());
        let err = poller
            .poll("job-1", &CancellationToken::new(), None)
            .await
            .expect_err("threshold");
        assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_forces_maximum_interval() {
        let limited = Err(LLMError::RateLimit {
            provider: "scripted",
            message: "slow down".into(),
            retry_after: None,
        });
        let done = Ok(PredictionJob::new("job-1", JobStatus::Succeeded));
        let source = Scripted::new(vec![limited, done], JobStatus::Processing);
        let poller = JobPoller::new(source, config());
        let started = Instant::now();
        poller
            .poll("job-1", &CancellationToken::new(), None)
            .await
            .expect("job");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let source = Scripted::new(Vec::new(), JobStatus::Processing);
        let poller = JobPoller::new(source.clone(), config());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });
        let err = poller.poll("job-1", &token, None).await.expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Canceled);
        let calls = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stream_emits_growing_output_once() {
        let mut done = PredictionJob::new("job-1", JobStatus::Succeeded);
        done.output = Some(json!(["Hel", "lo", " world"]));
        let source = Scripted::new(
            vec![
                running(None),
                running(Some(json!(["Hel"]))),
                running(Some(json!(["Hel", "lo"]))),
                running(Some(json!(["Hel", "lo"]))),
                Ok(done),
            ],
            JobStatus::Processing,
        );
        let poller = JobPoller::new(source, config());
        let chunks: Vec<_> = poller
            .poll_stream("job-1", ChunkContext::new("pred", 1, "alias"), CancellationToken::new())
            .collect()
            .await;

        let text: String = chunks
            .iter()
            .map(|c| c.as_ref().expect("chunk").text_delta())
            .collect();
        assert_eq!(text, "Hello world");
        let finishes = chunks
            .iter()
            .filter(|c| c.as_ref().map(|c| c.finish_reason().is_some()).unwrap_or(false))
            .count();
        assert_eq!(finishes, 1);
    }

    #[test]
    fn snapshot_delta_handles_rewrites() {
        assert_eq!(snapshot_delta("", "Hel"), Some("Hel"));
        assert_eq!(snapshot_delta("Hel", "Hello"), Some("lo"));
        assert_eq!(snapshot_delta("Hello", "Hello"), None);
        assert_eq!(snapshot_delta("Hello", "Help me out"), Some(" me out"));
        assert_eq!(snapshot_delta("Hello", "Hi"), None);
        // "é" spans bytes 1..3; the delta starts after it.
        assert_eq!(snapshot_delta("ab", "aé!"), Some("!"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stream_survives_rewritten_output() {
        let mut done = PredictionJob::new("job-2", JobStatus::Succeeded);
        done.output = Some(json!(["Goodbye", " now"]));
        let source = Scripted::new(
            vec![
                running(Some(json!(["Hello"]))),
                running(Some(json!(["Goodbye"]))),
                Ok(done),
            ],
            JobStatus::Processing,
        );
        let poller = JobPoller::new(source, config());
        let chunks: Vec<_> = poller
            .poll_stream("job-2", ChunkContext::new("pred", 1, "alias"), CancellationToken::new())
            .collect()
            .await;

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.as_ref().expect("chunk").text_delta())
            .filter(|t| !t.is_empty())
            .collect();
        assert_eq!(texts, vec!["Hello", "ye", " now"]);
        let last = chunks.last().expect("last").as_ref().expect("chunk");
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    }
}
