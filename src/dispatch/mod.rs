//! Concurrent fan-out of one operation over many sites.
//!
//! Every requested site yields exactly one [`SiteReport`], whatever happens to
//! its worker. Failures at one site never affect another.

pub mod retry;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, warn};
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub use retry::{RetryConfig, RetryPolicy};

use crate::config::Config;
use crate::error::{CatalogError, FederationError, SiteError, TransportErrorKind};

/// Work to run once per site.
#[async_trait]
pub trait SiteOperation: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn run(&self, site: &str) -> Result<Self::Output, SiteError>;
}

/// Protocol-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    NoUsableProtocol,
    ScopingFailed,
    ProjectListing,
    InvalidEndpoint,
    Registry,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolErrorKind::NoUsableProtocol => "no usable federation protocol",
            ProtocolErrorKind::ScopingFailed => "scoping failed",
            ProtocolErrorKind::ProjectListing => "project listing failed",
            ProtocolErrorKind::InvalidEndpoint => "invalid endpoint",
            ProtocolErrorKind::Registry => "site registry error",
        };
        f.write_str(name)
    }
}

/// How one site's operation ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SiteOutcome<T> {
    Succeeded { result: T },
    MissingResource { message: String },
    CommandError { code: i32, message: String },
    ProtocolError { kind: ProtocolErrorKind, message: String },
    TransportError { kind: TransportErrorKind, message: String },
    Unexpected { message: String },
}

impl<T> SiteOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, SiteOutcome::Succeeded { .. })
    }

    pub fn is_missing_resource(&self) -> bool {
        matches!(self, SiteOutcome::MissingResource { .. })
    }

    /// Human-readable failure description, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            SiteOutcome::Succeeded { .. } => None,
            SiteOutcome::MissingResource { message } | SiteOutcome::Unexpected { message } => {
                Some(message.clone())
            }
            SiteOutcome::CommandError { code, message } => {
                Some(format!("exit code {}: {}", code, message))
            }
            SiteOutcome::ProtocolError { kind, message } => Some(format!("{}: {}", kind, message)),
            SiteOutcome::TransportError { kind, message } => Some(format!("{}: {}", kind, message)),
        }
    }
}

impl<T> From<SiteError> for SiteOutcome<T> {
    fn from(error: SiteError) -> Self {
        let message = error.to_string();
        match error {
            SiteError::MissingResource(message) => SiteOutcome::MissingResource { message },
            SiteError::Command { code, message } => SiteOutcome::CommandError { code, message },
            SiteError::Federation(FederationError::Transport { kind, .. }) => {
                SiteOutcome::TransportError { kind, message }
            }
            SiteError::Federation(FederationError::NoUsableProtocol { .. }) => {
                SiteOutcome::ProtocolError {
                    kind: ProtocolErrorKind::NoUsableProtocol,
                    message,
                }
            }
            SiteError::Federation(FederationError::ScopingFailed { .. }) => SiteOutcome::ProtocolError {
                kind: ProtocolErrorKind::ScopingFailed,
                message,
            },
            SiteError::Federation(FederationError::ProjectListing { .. }) => {
                SiteOutcome::ProtocolError {
                    kind: ProtocolErrorKind::ProjectListing,
                    message,
                }
            }
            SiteError::Federation(FederationError::InvalidEndpoint(_)) => SiteOutcome::ProtocolError {
                kind: ProtocolErrorKind::InvalidEndpoint,
                message,
            },
            SiteError::Catalog(CatalogError::Transport { .. }) => SiteOutcome::TransportError {
                kind: TransportErrorKind::Request,
                message,
            },
            SiteError::Catalog(_) => SiteOutcome::ProtocolError {
                kind: ProtocolErrorKind::Registry,
                message,
            },
            SiteError::Other(error) => SiteOutcome::Unexpected {
                message: format!("{:#}", error),
            },
        }
    }
}

/// One site's outcome and how long its pipeline ran.
#[derive(Debug, Clone, Serialize)]
pub struct SiteReport<T> {
    pub site: String,
    #[serde(flatten)]
    pub outcome: SiteOutcome<T>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Complete result of a dispatch, keyed by site.
#[derive(Debug, Clone)]
pub struct DispatchReport<T> {
    reports: HashMap<String, SiteReport<T>>,
}

impl<T> DispatchReport<T> {
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn get(&self, site: &str) -> Option<&SiteReport<T>> {
        self.reports.get(site)
    }

    pub fn outcome(&self, site: &str) -> Option<&SiteOutcome<T>> {
        self.reports.get(site).map(|report| &report.outcome)
    }

    /// Reports to show, ordered by site. Missing-resource outcomes are left
    /// out when `suppress_missing` is set; they are still counted.
    pub fn visible(&self, suppress_missing: bool) -> Vec<&SiteReport<T>> {
        let mut visible: Vec<_> = self
            .reports
            .values()
            .filter(|report| !(suppress_missing && report.outcome.is_missing_resource()))
            .collect();
        visible.sort_by(|a, b| a.site.cmp(&b.site));
        visible
    }

    pub fn succeeded_count(&self) -> usize {
        self.reports
            .values()
            .filter(|report| report.outcome.is_success())
            .count()
    }

    pub fn missing_count(&self) -> usize {
        self.reports
            .values()
            .filter(|report| report.outcome.is_missing_resource())
            .count()
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded_count() > 0
    }

    /// Process exit code: 0 when at least one site succeeded.
    pub fn exit_code(&self) -> i32 {
        if self.any_succeeded() { 0 } else { 1 }
    }

    pub fn into_reports(self) -> HashMap<String, SiteReport<T>> {
        self.reports
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_workers: usize,
    /// Bound on one site's whole pipeline, retries included.
    pub site_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.max_workers,
            site_timeout: (config.site_timeout > 0).then(|| config.site_timeout()),
            retry: RetryConfig::from_config(config),
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 30,
            site_timeout: None,
            retry: RetryConfig::none(),
        }
    }
}

/// Runs a [`SiteOperation`] over many sites with a bounded number of
/// concurrent workers.
#[derive(Debug, Clone)]
pub struct SiteDispatcher {
    workers: Arc<Semaphore>,
    options: DispatchOptions,
}

impl SiteDispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        let permits = options.max_workers.max(1);
        Self {
            workers: Arc::new(Semaphore::new(permits)),
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(DispatchOptions::from_config(config))
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run `operation` at every site and wait for all of them.
    pub async fn dispatch<O>(&self, sites: &[String], operation: Arc<O>) -> DispatchReport<O::Output>
    where
        O: SiteOperation,
    {
        self.dispatch_streaming(sites, operation, |_| {}).await
    }

    /// Like [`dispatch`](Self::dispatch), calling `on_complete` for each site
    /// as soon as it reports, in completion order.
    pub async fn dispatch_streaming<O, F>(
        &self,
        sites: &[String],
        operation: Arc<O>,
        mut on_complete: F,
    ) -> DispatchReport<O::Output>
    where
        O: SiteOperation,
        F: FnMut(&SiteReport<O::Output>),
    {
        let mut pending: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();

        for site in sites {
            if !pending.insert(site.clone()) {
                debug!("Site {} requested twice, running it once", site);
                continue;
            }
            tasks.spawn(run_site(
                site.clone(),
                operation.clone(),
                self.workers.clone(),
                self.options.site_timeout,
                RetryPolicy::new(self.options.retry.clone()),
            ));
        }
        debug!(
            "Dispatching to {} sites with at most {} workers",
            pending.len(),
            self.options.max_workers
        );

        let mut reports = HashMap::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    pending.remove(&report.site);
                    on_complete(&report);
                    reports.insert(report.site.clone(), report);
                }
                Err(error) => warn!("Site worker terminated abnormally: {}", error),
            }
        }

        for site in pending {
            let report = SiteReport {
                outcome: SiteOutcome::Unexpected {
                    message: "site worker terminated without reporting".to_string(),
                },
                site,
                elapsed: Duration::ZERO,
            };
            on_complete(&report);
            reports.insert(report.site.clone(), report);
        }

        DispatchReport { reports }
    }
}

async fn run_site<O>(
    site: String,
    operation: Arc<O>,
    workers: Arc<Semaphore>,
    site_timeout: Option<Duration>,
    retry: RetryPolicy,
) -> SiteReport<O::Output>
where
    O: SiteOperation,
{
    let Ok(_permit) = workers.acquire_owned().await else {
        return SiteReport {
            site,
            outcome: SiteOutcome::Unexpected {
                message: "worker pool closed".to_string(),
            },
            elapsed: Duration::ZERO,
        };
    };

    let started = Instant::now();
    let outcome = {
        let operation: &O = &operation;
        let name = site.as_str();
        let pipeline = AssertUnwindSafe(retry.execute(name, move || operation.run(name))).catch_unwind();

        let finished = match site_timeout {
            Some(limit) => tokio::time::timeout(limit, pipeline).await.ok(),
            None => Some(pipeline.await),
        };

        match finished {
            None => SiteOutcome::TransportError {
                kind: TransportErrorKind::Timeout,
                message: format!("no result within {}s", site_timeout.unwrap_or_default().as_secs()),
            },
            Some(Err(panic)) => SiteOutcome::Unexpected {
                message: panic_message(panic.as_ref()),
            },
            Some(Ok(Ok(output))) => SiteOutcome::Succeeded { result: output },
            Some(Ok(Err(error))) => SiteOutcome::from(error),
        }
    };
    log_outcome(&site, &outcome);

    SiteReport {
        site,
        outcome,
        elapsed: started.elapsed(),
    }
}

fn log_outcome<T>(site: &str, outcome: &SiteOutcome<T>) {
    match outcome {
        SiteOutcome::Succeeded { .. } => debug!("{}: succeeded", site),
        SiteOutcome::MissingResource { message } => debug!("{}: {}", site, message),
        other => warn!(
            "{}: {}",
            site,
            other.error_message().unwrap_or_default()
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("operation panicked: {}", message)
    } else {
        "operation panicked".to_string()
    }
}
