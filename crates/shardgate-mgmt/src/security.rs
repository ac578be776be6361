use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const MAX_FAILURES: u32 = 5;
const FAILURE_WINDOW: Duration = Duration::from_secs(60);
const LOCKOUT: Duration = Duration::from_secs(60);

struct RateLimitEntry {
    failures: u32,
    first_failure: Instant,
    locked_until: Option<Instant>,
}

/// Locks out client addresses after repeated failed authentications.
///
/// Stale entries are dropped on every recorded failure, so the map stays
/// bounded by the clients that failed within the last window.
pub struct AuthRateLimiter {
    inner: Mutex<HashMap<String, RateLimitEntry>>,
    max_failures: u32,
    window: Duration,
    lockout: Duration,
}

impl AuthRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(MAX_FAILURES, FAILURE_WINDOW, LOCKOUT)
    }

    pub fn with_limits(max_failures: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_failures,
            window,
            lockout,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a failure and returns whether `ip` is now locked out.
    pub fn record_failure(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.entries();
        inner.retain(|_, entry| self.is_live(entry, now));
        let entry = inner.entry(ip.to_string()).or_insert(RateLimitEntry {
            failures: 0,
            first_failure: now,
            locked_until: None,
        });
        if entry.first_failure + self.window < now {
            entry.failures = 0;
            entry.first_failure = now;
        }
        entry.failures += 1;
        if entry.failures >= self.max_failures {
            entry.locked_until = Some(now + self.lockout);
            tracing::warn!(target: "audit", ip, failures = entry.failures, "client locked out after failed authentications");
        }
        entry.locked_until.is_some()
    }

    pub fn is_rate_limited(&self, ip: &str) -> bool {
        self.entries()
            .get(ip)
            .and_then(|entry| entry.locked_until)
            .map(|locked_until| locked_until > Instant::now())
            .unwrap_or(false)
    }

    /// Drops entries whose window and lockout have both passed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries().retain(|_, entry| self.is_live(entry, now));
    }

    /// Number of clients currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries().len()
    }

    fn is_live(&self, entry: &RateLimitEntry, now: Instant) -> bool {
        entry.first_failure + self.window > now || entry.locked_until.map(|t| t > now).unwrap_or(false)
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn security_headers_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::header::{HeaderName, HeaderValue};

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("strict-transport-security", "max-age=31536000; includeSubDomains"),
        ("cache-control", "no-store"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}
