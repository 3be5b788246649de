//! Blocking HTTP fetcher with a fixed header profile and linear-backoff retries.

use crate::model::FetchResult;
use crate::resolver::error::{ClientBuildError, ResolveError, TransportError};
use crate::resolver::headers::{default_profile, merged, DEFAULT_USER_AGENT};
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;
/// Default number of attempts (initial plus retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay; the n-th retry waits n times this.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Granularity of cancellation checks while backing off.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// The network seam. `get` performs exactly one request; retries belong to [Fetcher].
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, headers: &HeaderMap) -> Result<FetchResult, TransportError>;
}

/// [HttpTransport] over a blocking reqwest client.
#[derive(Debug)]
pub struct ReqwestTransport {
    inner: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { inner })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, headers: &HeaderMap) -> Result<FetchResult, TransportError> {
        let response = self.inner.get(url).headers(headers.clone()).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(FetchResult { status, body })
    }
}

/// Shared cancellation flag. Honored before each attempt and during backoff.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stateless retrying fetcher. Safe to share between concurrent resolutions.
pub struct Fetcher {
    transport: Box<dyn HttpTransport>,
    profile: HeaderMap,
    max_attempts: u32,
    base_delay: Duration,
    cancel: Option<CancelFlag>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("profile", &self.profile)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Fetcher over reqwest with the default profile, timeout, and retry policy.
    pub fn new() -> Result<Self, ClientBuildError> {
        Self::builder().build()
    }

    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// GET with the default profile and configured attempt count.
    pub fn get(&self, url: &str) -> Result<FetchResult, ResolveError> {
        self.fetch(url, &HeaderMap::new(), self.max_attempts)
    }

    /// GET with `extra_headers` layered over the default profile, retrying transient
    /// failures (timeouts, connection errors, HTTP 5xx, HTTP 429) up to `max_attempts` times.
    ///
    /// The n-th retry waits `n * base_delay`. Other statuses are returned to the caller
    /// unchanged. A request that can never succeed (e.g. an unparseable URL) fails on the
    /// first attempt. Otherwise the last failure is surfaced after the last attempt.
    pub fn fetch(
        &self,
        url: &str,
        extra_headers: &HeaderMap,
        max_attempts: u32,
    ) -> Result<FetchResult, ResolveError> {
        let max_attempts = max_attempts.max(1);
        let headers = merged(&self.profile, extra_headers);
        let mut last_err: Option<TransportError> = None;
        for attempt in 1..=max_attempts {
            if self.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            let failure = match self.transport.get(url, &headers) {
                Ok(result) if is_retryable_status(result.status) => TransportError::Status {
                    status: result.status,
                },
                Ok(result) => {
                    debug!(url, status = result.status, attempt, "fetched");
                    return Ok(result);
                }
                Err(e) if !e.is_transient() => {
                    warn!(url, attempt, error = %e, "fetch failed permanently");
                    return Err(ResolveError::Transport {
                        url: url.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => e,
            };
            warn!(url, attempt, max_attempts, error = %failure, "fetch attempt failed");
            last_err = Some(failure);
            if attempt < max_attempts {
                self.backoff(self.base_delay * attempt)?;
            }
        }
        Err(ResolveError::Transport {
            url: url.to_string(),
            attempts: max_attempts,
            source: last_err
                .unwrap_or_else(|| TransportError::Other("no attempt was made".to_string())),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    fn backoff(&self, delay: Duration) -> Result<(), ResolveError> {
        let Some(cancel) = &self.cancel else {
            std::thread::sleep(delay);
            return Ok(());
        };
        let until = Instant::now() + delay;
        loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(CANCEL_POLL));
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Builder for [Fetcher] with optional User-Agent, timeout, retry, and transport settings.
pub struct FetcherBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    max_attempts: u32,
    base_delay: Duration,
    cancel: Option<CancelFlag>,
    transport: Option<Box<dyn HttpTransport>>,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            cancel: None,
            transport: None,
        }
    }
}

impl FetcherBuilder {
    /// Set a custom User-Agent. If not set, a mobile browser default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set request timeout in seconds. Default 30. Ignored with a custom transport.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set number of attempts per fetch (default 3, minimum 1).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the linear backoff unit (default 1s).
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replace the reqwest transport (e.g. with a scripted stub).
    pub fn transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn build(self) -> Result<Fetcher, ClientBuildError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let profile = default_profile(&user_agent)?;
        let transport = match self.transport {
            Some(t) => t,
            None => Box::new(ReqwestTransport::new(Duration::from_secs(
                self.timeout_secs,
            ))?),
        };
        Ok(Fetcher {
            transport,
            profile,
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            cancel: self.cancel,
        })
    }
}
