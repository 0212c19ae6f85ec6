use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use mainserver_api::{HealthCheck, HealthOutcome};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

pub const DEFAULT_TRY_INTERVAL: Duration = Duration::from_millis(3000);
/// Shortest delay between two checks; smaller intervals are raised to this.
pub const MIN_TRY_INTERVAL: Duration = Duration::from_millis(1);
pub const CHECKING_MESSAGE: &str = "Checking server availability...";

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("availability gate stopped before the server became ready")]
    Stopped,
    #[error(transparent)]
    Api(#[from] mainserver_api::ApiError),
}

/// Where the gate is in its check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Checking,
    Ready { version: String },
    Unavailable { message: String },
}

impl Status {
    pub fn is_ready(&self) -> bool {
        matches!(self, Status::Ready { .. })
    }

    /// Text shown in place of the application while not ready.
    pub fn message(&self) -> Option<&str> {
        match self {
            Status::Idle | Status::Checking => Some(CHECKING_MESSAGE),
            Status::Unavailable { message } => Some(message),
            Status::Ready { .. } => None,
        }
    }
}

pub fn unavailable_message(retry_in: Duration) -> String {
    format!(
        "Server is not available. Retrying in {}...",
        humanize(retry_in)
    )
}

fn humanize(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis % 1000 == 0 {
        match millis / 1000 {
            1 => "1 second".to_string(),
            secs => format!("{secs} seconds"),
        }
    } else if millis == 1 {
        "1 millisecond".to_string()
    } else if millis < 1000 {
        format!("{millis} milliseconds")
    } else {
        format!("{:.1} seconds", interval.as_secs_f64())
    }
}

/// Blocks readiness until the backend answers its health check.
///
/// `start` runs at most one polling task: it checks, publishes the result on
/// a watch channel and, when unhealthy, sleeps for `try_interval` before
/// checking again. `Ready` is terminal. Dropping the gate cancels the task.
pub struct AvailabilityGate<C> {
    checker: Arc<C>,
    try_interval: Duration,
    status: watch::Sender<Status>,
    cancel: CancellationToken,
}

impl<C: HealthCheck + 'static> AvailabilityGate<C> {
    /// Create an idle gate. A zero `try_interval` is raised to
    /// [`MIN_TRY_INTERVAL`].
    pub fn new(checker: C, try_interval: Duration) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            checker: Arc::new(checker),
            try_interval: try_interval.max(MIN_TRY_INTERVAL),
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Begin polling. Returns `false` without doing anything unless the gate
    /// is still idle, so a second call never starts a second cycle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let started = self.status.send_if_modified(|status| {
            if *status == Status::Idle {
                *status = Status::Checking;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("availability gate already started");
            return false;
        }

        info!(
            try_interval_ms = self.try_interval.as_millis() as u64,
            "checking server availability"
        );
        tokio::spawn(poll_until_ready(
            Arc::clone(&self.checker),
            self.try_interval,
            self.status.clone(),
            self.cancel.clone(),
        ));
        true
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Wait until the backend is ready and return its version. Fails only
    /// when the gate is stopped before it became ready.
    pub async fn ready(&self) -> Result<String, GateError> {
        let mut status = self.status.subscribe();
        tokio::select! {
            biased;
            ready = status.wait_for(Status::is_ready) => {
                match &*ready.map_err(|_| GateError::Stopped)? {
                    Status::Ready { version } => Ok(version.clone()),
                    _ => Err(GateError::Stopped),
                }
            }
            _ = self.cancel.cancelled() => Err(GateError::Stopped),
        }
    }

    /// Stop polling. A pending retry or in-flight check is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl<C> Drop for AvailabilityGate<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_until_ready<C: HealthCheck>(
    checker: Arc<C>,
    try_interval: Duration,
    status: watch::Sender<Status>,
    cancel: CancellationToken,
) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        status.send_if_modified(|s| {
            let changed = *s != Status::Checking;
            *s = Status::Checking;
            changed
        });

        let outcome = tokio::select! {
            outcome = check(checker.as_ref()) => outcome,
            _ = cancel.cancelled() => {
                debug!(attempt, "availability check cancelled");
                return;
            }
        };

        if let HealthOutcome::Healthy { version } = outcome {
            info!(attempt, %version, "server is available");
            metrics::set_ready(true);
            status.send_replace(Status::Ready { version });
            return;
        }

        warn!(
            attempt,
            %outcome,
            retry_in_ms = try_interval.as_millis() as u64,
            "server is not available"
        );
        status.send_replace(Status::Unavailable {
            message: unavailable_message(try_interval),
        });

        tokio::select! {
            _ = tokio::time::sleep(try_interval) => {}
            _ = cancel.cancelled() => {
                debug!(attempt, "availability retry cancelled");
                return;
            }
        }
    }
}

/// One health check. Errors and panics inside the checker both count as
/// unhealthy so the loop never stalls.
async fn check<C: HealthCheck>(checker: &C) -> HealthOutcome {
    let started = Instant::now();
    let outcome = match AssertUnwindSafe(checker.is_alive()).catch_unwind().await {
        Ok(result) => HealthOutcome::from(result),
        Err(_) => HealthOutcome::TransportError("health check panicked".into()),
    };
    metrics::observe_check(outcome.label(), started.elapsed().as_secs_f64());
    outcome
}
