//! Container healthcheck execution and status recording.
//!
//! A healthcheck is a command executed inside the running container:
//! exit code 0 means healthy, anything else counts as a failed attempt.
//! The loop sleeps through `start_period`, then retries up to `retries`
//! times with `interval` between attempts. Results land in a
//! [`HealthMonitor`] that `service_healthy` waiters poll.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::capability::ContainerHandle;
use crate::error::{Error, Result};
use crate::manifest::{Command, Healthcheck};
use crate::types::parse_duration;

/// Recorded health of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthState {
    /// No check has finished yet
    #[default]
    Unknown,
    /// The last check loop passed
    Healthy,
    /// The last check loop exhausted its retries
    Unhealthy,
}

/// Fully resolved healthcheck settings with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckSettings {
    /// Command executed inside the container
    pub test: Vec<String>,
    /// Delay between attempts
    pub interval: Duration,
    /// Per-attempt execution timeout
    pub timeout: Duration,
    /// Attempts before the service is declared unhealthy
    pub retries: u32,
    /// Grace period before the first attempt
    pub start_period: Duration,
}

impl HealthcheckSettings {
    /// Resolve manifest settings, or `None` when the check is disabled
    /// or has no test command.
    pub fn resolve(check: &Healthcheck) -> Option<Self> {
        if check.disable {
            return None;
        }
        let test = normalize_test(check.test.as_ref()?);
        if test.is_empty() {
            return None;
        }
        Some(Self {
            test,
            interval: check
                .interval
                .as_deref()
                .map(parse_duration)
                .unwrap_or(Duration::from_secs(30)),
            timeout: check
                .timeout
                .as_deref()
                .map(parse_duration)
                .unwrap_or(Duration::from_secs(30)),
            retries: check.retries.unwrap_or(3),
            start_period: check
                .start_period
                .as_deref()
                .map(parse_duration)
                .unwrap_or(Duration::ZERO),
        })
    }

    /// Upper bound on how long the whole loop may take
    pub fn deadline(&self) -> Duration {
        self.start_period + self.interval * self.retries
    }
}

/// Normalize a manifest test command to an argv.
///
/// A string is split on spaces; a list is used verbatim after stripping
/// the compose-style `CMD` marker. `CMD-SHELL` wraps the remainder in a
/// shell invocation.
fn normalize_test(test: &Command) -> Vec<String> {
    let argv = test.as_argv();
    match argv.first().map(String::as_str) {
        Some("CMD") => argv[1..].to_vec(),
        Some("CMD-SHELL") => vec!["sh".into(), "-c".into(), argv[1..].join(" ")],
        _ => argv,
    }
}

/// Shared record of service health, polled by `service_healthy` waiters
#[derive(Default, Clone)]
pub struct HealthMonitor {
    statuses: Arc<Mutex<BTreeMap<String, HealthState>>>,
}

/// How often waiters re-read the recorded status
const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl HealthMonitor {
    /// Create an empty monitor
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a check loop
    pub async fn record(&self, service: &str, state: HealthState) {
        self.statuses
            .lock()
            .await
            .insert(service.to_string(), state);
    }

    /// The last recorded state of a service
    pub async fn status(&self, service: &str) -> HealthState {
        self.statuses
            .lock()
            .await
            .get(service)
            .copied()
            .unwrap_or_default()
    }

    /// Run the check loop against a running container and record the
    /// outcome.
    pub async fn run(
        &self,
        service: &str,
        handle: &dyn ContainerHandle,
        settings: &HealthcheckSettings,
    ) -> Result<()> {
        if settings.start_period > Duration::ZERO {
            debug!(service, "healthcheck start period");
            sleep(settings.start_period).await;
        }

        let env = BTreeMap::new();
        for attempt in 1..=settings.retries {
            let exec = handle.exec(&settings.test, &env);
            let passed = match timeout(settings.timeout, exec).await {
                Ok(Ok(0)) => true,
                Ok(Ok(code)) => {
                    debug!(service, attempt, code, "healthcheck attempt failed");
                    false
                }
                Ok(Err(err)) => {
                    debug!(service, attempt, error = %err, "healthcheck exec error");
                    false
                }
                Err(_) => {
                    debug!(service, attempt, "healthcheck attempt timed out");
                    false
                }
            };

            if passed {
                info!(service, attempt, "healthcheck passed");
                self.record(service, HealthState::Healthy).await;
                return Ok(());
            }
            if attempt < settings.retries {
                sleep(settings.interval).await;
            }
        }

        warn!(service, retries = settings.retries, "healthcheck failed");
        self.record(service, HealthState::Unhealthy).await;
        Err(Error::Unhealthy {
            service: service.to_string(),
        })
    }

    /// Block until the service records healthy, or fail on an unhealthy
    /// record or the deadline.
    pub async fn wait_healthy(&self, service: &str, deadline: Duration) -> Result<()> {
        let until = Instant::now() + deadline;
        loop {
            match self.status(service).await {
                HealthState::Healthy => return Ok(()),
                HealthState::Unhealthy => {
                    return Err(Error::Unhealthy {
                        service: service.to_string(),
                    })
                }
                HealthState::Unknown => {}
            }
            if Instant::now() >= until {
                return Err(Error::HealthcheckTimeout {
                    service: service.to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}
