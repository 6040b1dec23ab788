//! Backoff for idempotent transport reads (listing, message history).
//!
//! Creating a conversation, sending and deleting are never retried: a
//! retried create could leave an orphan conversation on the server.

mod policy;

pub use policy::RetryPolicy;

use crate::error::TransportError;
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Why a failed read is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transient {
    /// The request never got an answer (connect error, timeout).
    Network,
    /// 408 or 429.
    Throttled,
    /// Any 5xx.
    Server,
}

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::Throttled => "throttled",
            Self::Server => "server",
        })
    }
}

/// One scheduled retry, reported before the delay starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// The attempt that just failed, 1-based.
    pub attempt: u32,
    pub delay: Duration,
    pub cause: Transient,
}

/// Delay requested by a `Retry-After` header, as seconds or an HTTP date.
/// A date in the past means "now".
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => httpdate::parse_http_date(raw)
            .ok()
            .map(|when| when.duration_since(SystemTime::now()).unwrap_or_default()),
    }
}

/// The transient cause of `err` and any delay the server asked for, or
/// `None` when retrying would fail the same way (4xx, malformed body).
pub fn transient(err: &TransportError) -> Option<(Transient, Option<Duration>)> {
    match err {
        TransportError::Status {
            status: 408 | 429,
            retry_after,
            ..
        } => Some((Transient::Throttled, *retry_after)),
        TransportError::Status {
            status: 500..,
            retry_after,
            ..
        } => Some((Transient::Server, *retry_after)),
        TransportError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            Some((Transient::Network, None))
        }
        _ => None,
    }
}

/// Run `read` until it succeeds, fails for good, or `policy` runs out of
/// attempts. `read` gets the 1-based attempt number. A server-requested
/// delay replaces the computed backoff.
pub async fn retry_read<T, Read, Fut, OnRetry>(
    policy: &RetryPolicy,
    mut read: Read,
    mut on_retry: OnRetry,
) -> Result<T, TransportError>
where
    Read: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    OnRetry: FnMut(RetryAttempt),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match read(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some((cause, requested)) = transient(&err).filter(|_| attempt < max_attempts) else {
            return Err(err);
        };

        let delay = policy.with_jitter(requested.unwrap_or_else(|| policy.backoff_delay(attempt)));
        on_retry(RetryAttempt {
            attempt,
            delay,
            cause,
        });
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
