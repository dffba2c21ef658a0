//! Resource readiness polling
//!
//! Repeatedly queries a resource field until it equals an expected value,
//! the timeout elapses, or the query itself fails. A failing query is never
//! retried: "not ready yet" and "cannot ask" are different answers.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cluster::{ResourceQuerier, ResourceQuery};
use crate::error::QueryError;

/// Terminal state of a poll loop
#[derive(Debug)]
pub enum PollOutcome {
    /// The field matched; carries the normalized output
    Ready(String),
    /// The field never matched within the timeout
    TimedOut,
    /// The query failed and polling stopped
    QueryFailed(QueryError),
}

impl PollOutcome {
    /// Convert into a `Result` for callers that halt on anything but `Ready`
    pub fn into_result(self, query: &ResourceQuery, timeout: Duration) -> Result<String, WaitError> {
        match self {
            PollOutcome::Ready(output) => Ok(output),
            PollOutcome::TimedOut => Err(WaitError::TimedOut {
                what: query.to_string(),
                expected: query.expected.clone(),
                timeout,
            }),
            PollOutcome::QueryFailed(err) => Err(WaitError::Query(err)),
        }
    }
}

/// A poll loop that did not reach the expected state
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("condition not reached within {timeout:?}: {what} never became {expected:?}")]
    TimedOut {
        what: String,
        expected: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Timeout and retry interval for a poll loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
        }
    }
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_secs(timeout_secs: u64, interval_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(interval_secs),
        )
    }
}

impl fmt::Display for PollSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeout {}s, interval {}s",
            self.timeout.as_secs_f64(),
            self.interval.as_secs_f64()
        )
    }
}

/// Poller bound to a querier and default settings
pub struct ReadinessPoller<'a, Q: ResourceQuerier + ?Sized> {
    querier: &'a Q,
    settings: PollSettings,
}

impl<'a, Q: ResourceQuerier + ?Sized> ReadinessPoller<'a, Q> {
    pub fn new(querier: &'a Q, settings: PollSettings) -> Self {
        Self { querier, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll with the configured settings
    pub async fn wait(&self, query: &ResourceQuery) -> PollOutcome {
        wait_until_ready(
            self.querier,
            query,
            self.settings.timeout,
            self.settings.interval,
        )
        .await
    }

    /// Poll and turn anything but `Ready` into an error
    pub async fn wait_ready(&self, query: &ResourceQuery) -> Result<String, WaitError> {
        self.wait(query)
            .await
            .into_result(query, self.settings.timeout)
    }
}

/// Poll `query` until its field equals `query.expected`
///
/// Attempts are made at 0, `interval`, 2×`interval`, … and the loop gives up
/// on the first wake-up at or past `timeout`.
pub async fn wait_until_ready<Q: ResourceQuerier + ?Sized>(
    querier: &Q,
    query: &ResourceQuery,
    timeout: Duration,
    interval: Duration,
) -> PollOutcome {
    let start = Instant::now();
    let mut attempt = 0u32;

    info!(
        "Waiting until {} is {:?} (timeout: {:?})",
        query, query.expected, timeout
    );

    loop {
        attempt += 1;

        let raw = match querier
            .query_resource_field(&query.kind, &query.selector, query.field_query.as_deref())
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Query for {} failed on attempt {}: {}", query, attempt, e);
                return PollOutcome::QueryFailed(e);
            }
        };

        let output = normalize_output(&raw);
        debug!("Attempt {}: {} = {:?}", attempt, query, output);

        if output == query.expected {
            info!(
                "{} reached {:?} after {} attempt(s)",
                query, query.expected, attempt
            );
            return PollOutcome::Ready(output.to_string());
        }

        sleep(interval).await;

        if start.elapsed() >= timeout {
            warn!(
                "Timeout waiting for {} to be {:?} after {} attempt(s)",
                query, query.expected, attempt
            );
            return PollOutcome::TimedOut;
        }
    }
}

/// Strip whitespace and one layer of matching quotes
///
/// `-o=jsonpath='{...}'` passed without a shell leaves the quotes in the output.
pub fn normalize_output(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Selector;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted answers, then repeats `fallback` forever
    struct ScriptedQuerier {
        script: Mutex<VecDeque<Result<String, QueryError>>>,
        fallback: String,
        calls: AtomicUsize,
    }

    impl ScriptedQuerier {
        fn new(script: Vec<Result<String, QueryError>>, fallback: &str) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: fallback.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn always(value: &str) -> Self {
            Self::new(Vec::new(), value)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceQuerier for ScriptedQuerier {
        async fn query_resource_field(
            &self,
            _kind: &str,
            _selector: &Selector,
            _field_query: Option<&str>,
        ) -> Result<String, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn running_query() -> ResourceQuery {
        ResourceQuery::phase("pod", "pod-a", "Running")
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_attempt_without_sleeping() {
        let querier = ScriptedQuerier::always("Running");
        let start = Instant::now();

        let outcome = wait_until_ready(&querier, &running_query(), secs(10), secs(1)).await;

        assert!(matches!(outcome, PollOutcome::Ready(ref out) if out == "Running"));
        assert_eq!(querier.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        let querier = ScriptedQuerier::new(
            vec![Ok("Pending".to_string()), Ok("Pending".to_string())],
            "\"Running\"",
        );
        let start = Instant::now();

        let outcome = wait_until_ready(&querier, &running_query(), secs(10), secs(1)).await;

        assert!(matches!(outcome, PollOutcome::Ready(ref out) if out == "Running"));
        assert_eq!(querier.calls(), 3);
        assert_eq!(start.elapsed(), secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_exactly_three_attempts() {
        let querier = ScriptedQuerier::always("Pending");
        let start = Instant::now();

        let outcome = wait_until_ready(&querier, &running_query(), secs(5), secs(2)).await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(querier.calls(), 3);
        assert!(start.elapsed() >= secs(5));
        assert!(start.elapsed() <= secs(5) + secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_attempt_lower_bound() {
        for (timeout, interval) in [(10, 1), (9, 3), (4, 2), (7, 5)] {
            let querier = ScriptedQuerier::always("Scheduling");
            let start = Instant::now();

            let outcome =
                wait_until_ready(&querier, &running_query(), secs(timeout), secs(interval)).await;

            assert!(matches!(outcome, PollOutcome::TimedOut));
            assert!(querier.calls() as u64 >= timeout / interval);
            assert!(start.elapsed() >= secs(timeout));
            assert!(start.elapsed() <= secs(timeout + interval));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_is_not_retried() {
        let querier = ScriptedQuerier::new(
            vec![
                Ok("Pending".to_string()),
                Ok("Pending".to_string()),
                Err(QueryError::NotFound {
                    kind: "pod".to_string(),
                    selector: "name pod-a".to_string(),
                }),
            ],
            "Running",
        );

        let outcome = wait_until_ready(&querier, &running_query(), secs(60), secs(1)).await;

        assert!(matches!(
            outcome,
            PollOutcome::QueryFailed(QueryError::NotFound { .. })
        ));
        assert_eq!(querier.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_label_fails_fast() {
        let querier = ScriptedQuerier::new(
            vec![Err(QueryError::Ambiguous {
                kind: "pod".to_string(),
                selector: "label app=x".to_string(),
                count: 2,
            })],
            "Running",
        );
        let query = ResourceQuery::by_label("pod", "app=x", "Running").field("{.status.phase}");

        let outcome = wait_until_ready(&querier, &query, secs(10), secs(1)).await;

        assert!(matches!(
            outcome,
            PollOutcome::QueryFailed(QueryError::Ambiguous { count: 2, .. })
        ));
        assert_eq!(querier.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_quoted_output_matches() {
        let querier = ScriptedQuerier::always("'Running'");

        let outcome = wait_until_ready(&querier, &running_query(), secs(10), secs(1)).await;

        assert!(matches!(outcome, PollOutcome::Ready(ref out) if out == "Running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_expectation() {
        let query = ResourceQuery::by_name("pod", "pod-a", "").field("{.status.reason}");

        let querier = ScriptedQuerier::always("''");
        let outcome = wait_until_ready(&querier, &query, secs(3), secs(1)).await;
        assert!(matches!(outcome, PollOutcome::Ready(ref out) if out.is_empty()));

        let querier = ScriptedQuerier::always("Evicted");
        let outcome = wait_until_ready(&querier, &query, secs(3), secs(1)).await;
        assert!(matches!(outcome, PollOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_substring_does_not_match() {
        let querier = ScriptedQuerier::always("Running Running");

        let outcome = wait_until_ready(&querier, &running_query(), secs(2), secs(1)).await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_wait_ready_reports_timeout() {
        let querier = ScriptedQuerier::always("Pending");
        let poller = ReadinessPoller::new(&querier, PollSettings::from_secs(3, 1));

        let err = poller.wait_ready(&running_query()).await.unwrap_err();

        assert!(matches!(err, WaitError::TimedOut { .. }));
        assert!(err.to_string().starts_with("condition not reached within 3s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_wait_ready_returns_output() {
        let querier = ScriptedQuerier::always("Running\n");
        let poller = ReadinessPoller::new(&querier, PollSettings::default());

        let output = tokio_test::assert_ok!(poller.wait_ready(&running_query()).await);
        assert_eq!(output, "Running");
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("'Running'"), "Running");
        assert_eq!(normalize_output("\"Running\"\n"), "Running");
        assert_eq!(normalize_output("  Running  "), "Running");
        assert_eq!(normalize_output("''"), "");
        assert_eq!(normalize_output("'Running\""), "'Running\"");
        assert_eq!(normalize_output("''Running''"), "'Running'");
        assert_eq!(normalize_output("'"), "'");
    }

    #[test]
    fn test_poll_settings_display() {
        assert_eq!(
            PollSettings::from_secs(300, 5).to_string(),
            "timeout 300s, interval 5s"
        );
    }
}
