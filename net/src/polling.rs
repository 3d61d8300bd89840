use crate::errors::ClientError;
use log::*;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a participant polls the coordinator and how it retries failed calls.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Time between two polls that returned nothing new.
    pub poll_interval: Duration,
    /// Give up waiting after this many empty polls.
    pub max_polls: u32,
    /// Consecutive transient failures tolerated before giving up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Random extra delay, as a fraction of the current backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: 720,
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn backoff_with_jitter(&self, delay: Duration) -> Duration {
        let jitter_range = (delay.as_millis() as f64 * self.jitter) as u64;
        let jitter = if jitter_range > 0 { rand::rng().random_range(0..jitter_range) } else { 0 };
        delay + Duration::from_millis(jitter)
    }

    fn next_backoff(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.backoff_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_backoff)
    }
}

pub enum PollResult<T> {
    Ready(T),
    Pending,
}

/// Calls `poll_fn` until it returns [`PollResult::Ready`].
///
/// Pending results are retried every `poll_interval`, up to `max_polls` times. Transient errors are retried with
/// exponential backoff, up to `max_retries` consecutive failures. Fatal errors and cancellation end the loop
/// immediately.
pub async fn poll_until<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut poll_fn: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollResult<T>, ClientError>>,
{
    let mut polls = 0u32;
    let mut failures = 0u32;
    let mut backoff = policy.initial_backoff;
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let wait = match poll_fn().await {
            Ok(PollResult::Ready(value)) => return Ok(value),
            Ok(PollResult::Pending) => {
                failures = 0;
                backoff = policy.initial_backoff;
                polls += 1;
                if polls >= policy.max_polls {
                    return Err(ClientError::PollsExhausted(what.to_string()));
                }
                trace!("Still waiting for {what} ({polls}/{})", policy.max_polls);
                policy.poll_interval
            }
            Err(e) if e.is_transient() => {
                failures += 1;
                if failures > policy.max_retries {
                    return Err(ClientError::RetriesExhausted { attempts: failures, last: Box::new(e) });
                }
                let wait = policy.backoff_with_jitter(backoff);
                warn!("Transient error while waiting for {what} (attempt {failures}). Retrying in {wait:?}. {e}");
                backoff = policy.next_backoff(backoff);
                wait
            }
            Err(e) => return Err(e),
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Runs a single request, retrying transient failures with the policy's backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    poll_until(policy, cancel, what, || {
        let fut = call();
        async move { fut.await.map(PollResult::Ready) }
    })
    .await
}
