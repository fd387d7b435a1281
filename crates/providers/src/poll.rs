//! Bounded exponential-backoff polling of remote jobs.
//!
//! [`poll_until_settled`] keeps asking a provider for a job's status until
//! it reaches a terminal state. The loop ends after
//! [`PollConfig::max_attempts`] polls or once [`PollConfig::max_elapsed`]
//! of wall-clock time has passed, whichever comes first. A poll request
//! that hangs is cut off at the wall-clock deadline as well.
//!
//! [`retry_transient`] applies the same bounds to one-shot calls such as
//! submissions and downloads.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ProviderError;

/// Remote job state as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl RemoteStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// One poll response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJob {
    pub handle: String,
    pub status: RemoteStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

/// Tunable bounds for the poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay after the first poll.
    pub initial_delay: Duration,
    /// Upper bound on the delay between polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each poll.
    pub multiplier: f64,
    /// Maximum number of status requests.
    pub max_attempts: u32,
    /// Absolute wall-clock budget for the whole loop.
    pub max_elapsed: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 30,
            max_elapsed: Duration::from_secs(30 * 60),
        }
    }
}

/// Calculate the next backoff delay, clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Poll `check` until the remote job settles.
///
/// Returns the final [`RemoteJob`] on success. A remote failure maps to
/// [`ProviderError::JobFailed`], a cancellation to
/// [`ProviderError::Canceled`]. Transient request errors use up an attempt
/// and are retried; any other error ends the loop immediately.
pub async fn poll_until_settled<F, Fut>(
    handle: &str,
    config: &PollConfig,
    mut check: F,
) -> Result<RemoteJob, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RemoteJob, ProviderError>>,
{
    let started = Instant::now();
    let deadline = started + config.max_elapsed;
    let mut delay = config.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match tokio::time::timeout_at(deadline, check()).await {
            Err(_) => {
                tracing::warn!(handle, attempts, "Poll request outlived the wall-clock budget");
                break;
            }
            Ok(Ok(job)) => match job.status {
                RemoteStatus::Succeeded => {
                    tracing::debug!(handle, attempts, "Remote job succeeded");
                    return Ok(job);
                }
                RemoteStatus::Failed => {
                    return Err(ProviderError::JobFailed {
                        handle: handle.to_string(),
                        message: job
                            .error
                            .unwrap_or_else(|| "provider reported failure".to_string()),
                    });
                }
                RemoteStatus::Canceled => {
                    return Err(ProviderError::Canceled {
                        handle: handle.to_string(),
                    });
                }
                RemoteStatus::Starting | RemoteStatus::Processing => {}
            },
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!(handle, attempts, error = %e, "Transient poll failure, retrying");
            }
            Ok(Err(e)) => return Err(e),
        }

        if attempts >= config.max_attempts {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        tracing::trace!(
            handle,
            attempts,
            delay_ms = delay.min(remaining).as_millis() as u64,
            "Remote job not settled, backing off"
        );
        tokio::time::sleep(delay.min(remaining)).await;
        delay = next_delay(delay, config);
    }

    Err(ProviderError::PollTimeout {
        handle: handle.to_string(),
        attempts,
        elapsed_secs: started.elapsed().as_secs(),
    })
}

/// Run `op` until it succeeds or fails with a non-transient error.
///
/// Transient failures are retried on the poll backoff schedule, within the
/// same attempt and wall-clock bounds. When the bounds run out the last
/// transient error is returned; a call still hanging at the deadline
/// yields [`ProviderError::PollTimeout`].
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    config: &PollConfig,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let started = Instant::now();
    let deadline = started + config.max_elapsed;
    let mut delay = config.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match tokio::time::timeout_at(deadline, op()).await {
            Err(_) => {
                return Err(ProviderError::PollTimeout {
                    handle: what.to_string(),
                    attempts,
                    elapsed_secs: started.elapsed().as_secs(),
                })
            }
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_transient() => e,
            Ok(Err(e)) => return Err(e),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if attempts >= config.max_attempts || remaining.is_zero() {
            tracing::warn!(what, attempts, error = %err, "Giving up on transient failures");
            return Err(err);
        }

        tracing::warn!(
            what,
            attempts,
            delay_ms = delay.min(remaining).as_millis() as u64,
            error = %err,
            "Transient provider failure, retrying"
        );
        tokio::time::sleep(delay.min(remaining)).await;
        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn job(status: RemoteStatus) -> RemoteJob {
        RemoteJob {
            handle: "pred-1".into(),
            status,
            output_url: (status == RemoteStatus::Succeeded).then(|| "https://cdn/out".into()),
            error: (status == RemoteStatus::Failed).then(|| "boom".into()),
        }
    }

    /// Reports `Processing` for the first `pending_polls` calls, then `last`.
    fn scripted(
        pending_polls: u32,
        last: RemoteStatus,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<RemoteJob, ProviderError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let check = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = if n < pending_polls {
                RemoteStatus::Processing
            } else {
                last
            };
            std::future::ready(Ok(job(status)))
        };
        (calls, check)
    }

    #[test]
    fn backoff_sequence_doubles_and_caps() {
        let config = PollConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for &secs in &expected {
            assert_eq!(delay.as_secs(), secs);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_success_after_backing_off() {
        let (calls, check) = scripted(2, RemoteStatus::Succeeded);
        let start = Instant::now();

        let result = poll_until_settled("pred-1", &PollConfig::default(), check)
            .await
            .unwrap();

        assert_eq!(result.output_url.as_deref(), Some("https://cdn/out"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_attempt_cap() {
        let (calls, check) = scripted(u32::MAX, RemoteStatus::Succeeded);

        let err = poll_until_settled("pred-1", &PollConfig::default(), check)
            .await
            .unwrap_err();

        assert_matches!(err, ProviderError::PollTimeout { attempts: 30, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_wall_clock_cap() {
        let config = PollConfig {
            max_attempts: 1_000,
            max_elapsed: Duration::from_secs(10),
            ..PollConfig::default()
        };
        let (calls, check) = scripted(u32::MAX, RemoteStatus::Succeeded);
        let start = Instant::now();

        let err = poll_until_settled("pred-1", &config, check).await.unwrap_err();

        // Polls at t = 0, 1, 3, 7 and a final one at the 10 s deadline.
        assert_matches!(err, ProviderError::PollTimeout { attempts: 5, elapsed_secs: 10, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_is_cut_off_at_deadline() {
        let config = PollConfig {
            max_elapsed: Duration::from_secs(5),
            ..PollConfig::default()
        };
        let start = Instant::now();

        let err = poll_until_settled("pred-1", &config, || {
            std::future::pending::<Result<RemoteJob, ProviderError>>()
        })
        .await
        .unwrap_err();

        assert_matches!(err, ProviderError::PollTimeout { attempts: 1, .. });
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_and_cancel_are_terminal() {
        let (_, check) = scripted(1, RemoteStatus::Failed);
        let err = poll_until_settled("pred-1", &PollConfig::default(), check)
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::JobFailed { message, .. } if message == "boom");

        let (_, check) = scripted(0, RemoteStatus::Canceled);
        let err = poll_until_settled("pred-1", &PollConfig::default(), check)
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Canceled { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let check = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < 2 {
                Err(ProviderError::Api {
                    status: 502,
                    body: "bad gateway".into(),
                })
            } else {
                Ok(job(RemoteStatus::Succeeded))
            })
        };

        let result = poll_until_settled("pred-1", &PollConfig::default(), check).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_end_the_loop() {
        let (calls, mut inner) = scripted(0, RemoteStatus::Succeeded);
        let check = move || {
            let _ = inner();
            std::future::ready(Err::<RemoteJob, _>(ProviderError::Api {
                status: 401,
                body: "unauthorized".into(),
            }))
        };

        let err = poll_until_settled("pred-1", &PollConfig::default(), check)
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Api { status: 401, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn bad_gateway() -> ProviderError {
        ProviderError::Api {
            status: 502,
            body: "bad gateway".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_call_recovers_from_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let value = retry_transient("submit", &PollConfig::default(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n == 0 { Err(bad_gateway()) } else { Ok("pred-9") })
        })
        .await
        .unwrap();

        assert_eq!(value, "pred-9");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_call_keeps_last_error_when_bounds_run_out() {
        let config = PollConfig {
            max_attempts: 3,
            ..PollConfig::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retry_transient("download", &config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<(), _>(bad_gateway()))
        })
        .await
        .unwrap_err();

        assert_matches!(err, ProviderError::Api { status: 502, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_call_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retry_transient("submit", &PollConfig::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<(), _>(ProviderError::Api {
                status: 422,
                body: "invalid input".into(),
            }))
        })
        .await
        .unwrap_err();

        assert_matches!(err, ProviderError::Api { status: 422, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
