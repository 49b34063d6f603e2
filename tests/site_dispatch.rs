//! Concurrent per-site dispatch with a scripted operation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use fedcloud_cli::dispatch::{
    DispatchOptions, RetryConfig, SiteDispatcher, SiteOperation, SiteOutcome,
};
use fedcloud_cli::error::{FederationError, SiteError, TransportErrorKind};

#[derive(Debug, Clone)]
enum Step {
    Succeed(Duration),
    Missing,
    Unreachable,
    /// Unreachable on the first call only.
    Flaky,
    Panic,
    Hang,
}

/// Plays back a fixed behaviour per site and records concurrency.
#[derive(Default)]
struct Scripted {
    script: HashMap<String, Step>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Scripted {
    fn new(steps: &[(&str, Step)]) -> Self {
        Self {
            script: steps
                .iter()
                .map(|(site, step)| (site.to_string(), step.clone()))
                .collect(),
            ..Self::default()
        }
    }

    fn sites(&self) -> Vec<String> {
        let mut sites: Vec<String> = self.script.keys().cloned().collect();
        sites.sort();
        sites
    }
}

fn unreachable(site: &str) -> SiteError {
    SiteError::Federation(FederationError::Transport {
        kind: TransportErrorKind::Connect,
        url: format!("https://{}.example:5000/v3", site.to_lowercase()),
        message: "connection refused".to_string(),
    })
}

#[async_trait]
impl SiteOperation for Scripted {
    type Output = String;

    async fn run(&self, site: &str) -> Result<String, SiteError> {
        let step = self
            .script
            .get(site)
            .cloned()
            .unwrap_or(Step::Succeed(Duration::ZERO));
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = match step {
            Step::Succeed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(format!("{} done", site))
            }
            Step::Missing => Err(SiteError::MissingResource(format!(
                "VO vo.access.egi.eu not found on site {}",
                site
            ))),
            Step::Unreachable => Err(unreachable(site)),
            Step::Flaky if call == 0 => Err(unreachable(site)),
            Step::Flaky => Ok(format!("{} done", site)),
            Step::Panic => panic!("corrupted state at {}", site),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".to_string())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn dispatcher(max_workers: usize, site_timeout: Option<Duration>) -> SiteDispatcher {
    SiteDispatcher::new(DispatchOptions {
        max_workers,
        site_timeout,
        retry: RetryConfig::none(),
    })
}

#[tokio::test]
async fn test_mixed_outcomes() {
    let operation = Arc::new(Scripted::new(&[
        ("A", Step::Succeed(Duration::ZERO)),
        ("B", Step::Missing),
        ("C", Step::Unreachable),
    ]));
    let report = dispatcher(30, None).dispatch(&operation.sites(), operation.clone()).await;

    assert_eq!(report.len(), 3);
    assert_eq!(
        report.outcome("A"),
        Some(&SiteOutcome::Succeeded {
            result: "A done".to_string()
        })
    );
    assert!(report.outcome("B").unwrap().is_missing_resource());
    assert!(matches!(
        report.outcome("C"),
        Some(SiteOutcome::TransportError {
            kind: TransportErrorKind::Connect,
            ..
        })
    ));

    let visible: Vec<&str> = report.visible(true).iter().map(|r| r.site.as_str()).collect();
    assert_eq!(visible, vec!["A", "C"]);
    assert_eq!(report.visible(false).len(), 3);
    assert_eq!(report.missing_count(), 1);
    assert_eq!(report.succeeded_count(), 1);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_all_failed_exit_code() {
    let operation = Arc::new(Scripted::new(&[("A", Step::Missing), ("B", Step::Unreachable)]));
    let report = dispatcher(2, None).dispatch(&operation.sites(), operation.clone()).await;
    assert!(!report.any_succeeded());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_timed_out_site_still_reports() {
    let mut steps: Vec<(String, Step)> = (0..8)
        .map(|i| (format!("SITE-{}", i), Step::Succeed(Duration::from_millis(10))))
        .collect();
    steps.push(("SLOW".to_string(), Step::Hang));
    let steps: Vec<(&str, Step)> = steps.iter().map(|(s, step)| (s.as_str(), step.clone())).collect();
    let operation = Arc::new(Scripted::new(&steps));

    let started = Instant::now();
    let report = dispatcher(4, Some(Duration::from_millis(200)))
        .dispatch(&operation.sites(), operation.clone())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.len(), 9);
    assert_eq!(report.succeeded_count(), 8);
    assert!(matches!(
        report.outcome("SLOW"),
        Some(SiteOutcome::TransportError {
            kind: TransportErrorKind::Timeout,
            ..
        })
    ));
}

#[tokio::test]
async fn test_worker_bound_is_respected() {
    let steps: Vec<(String, Step)> = (0..12)
        .map(|i| (format!("SITE-{:02}", i), Step::Succeed(Duration::from_millis(40))))
        .collect();
    let steps: Vec<(&str, Step)> = steps.iter().map(|(s, step)| (s.as_str(), step.clone())).collect();
    let operation = Arc::new(Scripted::new(&steps));

    let report = dispatcher(3, None).dispatch(&operation.sites(), operation.clone()).await;

    assert_eq!(report.succeeded_count(), 12);
    let peak = operation.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "{} operations ran at once", peak);
    assert!(peak >= 2, "sites did not run concurrently");
}

#[tokio::test]
async fn test_sites_run_in_parallel() {
    let steps: Vec<(String, Step)> = (0..5)
        .map(|i| (format!("SITE-{}", i), Step::Succeed(Duration::from_millis(200))))
        .collect();
    let steps: Vec<(&str, Step)> = steps.iter().map(|(s, step)| (s.as_str(), step.clone())).collect();
    let operation = Arc::new(Scripted::new(&steps));

    let started = Instant::now();
    let report = dispatcher(5, None).dispatch(&operation.sites(), operation.clone()).await;
    let elapsed = started.elapsed();

    assert_eq!(report.succeeded_count(), 5);
    // the slowest site, not the sum of all of them
    assert!(elapsed < Duration::from_millis(800), "took {:?}", elapsed);
    assert!(report.get("SITE-0").unwrap().elapsed >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_panicking_site_is_isolated() {
    let operation = Arc::new(Scripted::new(&[
        ("BROKEN", Step::Panic),
        ("FINE", Step::Succeed(Duration::from_millis(20))),
    ]));
    let report = dispatcher(2, None).dispatch(&operation.sites(), operation.clone()).await;

    assert!(report.outcome("FINE").unwrap().is_success());
    match report.outcome("BROKEN") {
        Some(SiteOutcome::Unexpected { message }) => {
            assert!(message.contains("corrupted state at BROKEN"), "{}", message)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_results_stream_in_completion_order() {
    let operation = Arc::new(Scripted::new(&[
        ("A-SLOW", Step::Succeed(Duration::from_millis(300))),
        ("B-FAST", Step::Succeed(Duration::ZERO)),
        ("C-MISSING", Step::Missing),
    ]));

    let mut seen = Vec::new();
    let report = dispatcher(3, None)
        .dispatch_streaming(&operation.sites(), operation.clone(), |site_report| {
            seen.push(site_report.site.clone())
        })
        .await;

    assert_eq!(seen.len(), 3);
    assert_eq!(seen.last().map(String::as_str), Some("A-SLOW"));
    assert_eq!(report.len(), 3);
}

#[tokio::test]
async fn test_duplicate_sites_run_once() {
    let operation = Arc::new(Scripted::new(&[("A", Step::Succeed(Duration::ZERO))]));
    let sites = vec!["A".to_string(), "A".to_string()];
    let report = dispatcher(2, None).dispatch(&sites, operation.clone()).await;

    assert_eq!(report.len(), 1);
    assert_eq!(operation.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried_from_scratch() {
    let operation = Arc::new(Scripted::new(&[("A", Step::Flaky)]));
    let dispatcher = SiteDispatcher::new(DispatchOptions {
        max_workers: 1,
        site_timeout: None,
        retry: RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..RetryConfig::default()
        },
    });

    let report = dispatcher.dispatch(&operation.sites(), operation.clone()).await;

    assert!(report.outcome("A").unwrap().is_success());
    assert_eq!(operation.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_site_list() {
    let operation = Arc::new(Scripted::default());
    let report = dispatcher(4, None).dispatch(&[], operation).await;
    assert!(report.is_empty());
    assert_eq!(report.exit_code(), 1);
}
