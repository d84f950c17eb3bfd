use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::RateLimitSettings;
use crate::error::AuthError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    /// Exact request paths subject to admission control; everything else bypasses it.
    pub protected_paths: Vec<String>,
    /// Windows idle for longer than `idle_eviction_factor * window` are dropped by `sweep`.
    pub idle_eviction_factor: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::seconds(60),
            protected_paths: vec!["/api/auth/login".to_string(), "/api/auth/register".to_string()],
            idle_eviction_factor: 2,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            window: Duration::seconds(settings.window_secs),
            protected_paths: settings.protected_paths.clone(),
            idle_eviction_factor: settings.idle_eviction_factor.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    /// The endpoint is not rate limited.
    Bypassed,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Denied { .. })
    }
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    started_at: DateTime<Utc>,
}

impl RateWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self { count: 0, started_at: now }
    }
}

/// Fixed-window attempt counter keyed by client identity and endpoint.
///
/// Windows live in a sharded map. A check-and-increment holds only its own
/// shard, so clients on other shards never wait on each other.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_protected(&self, endpoint: &str) -> bool {
        let endpoint = normalize(endpoint);
        self.config
            .protected_paths
            .iter()
            .any(|path| normalize(path) == endpoint)
    }

    pub fn admit(&self, client_identity: &str, endpoint: &str) -> Admission {
        if !self.is_protected(endpoint) {
            return Admission::Bypassed;
        }

        let key = format!("{}:{}", client_identity, normalize(endpoint));
        let now = self.clock.now();

        let admission = {
            let mut window = self
                .windows
                .entry(key)
                .or_insert_with(|| RateWindow::new(now));
            self.count(&mut window, now)
        };

        if let Admission::Denied { retry_after } = admission {
            warn!(
                client = %client_identity,
                endpoint = %endpoint,
                retry_after_secs = retry_after.num_seconds(),
                "Rate limit exceeded"
            );
        }
        admission
    }

    /// Like [`admit`](Self::admit) but turns a denial into `AuthError::RateLimited`.
    pub fn check(&self, client_identity: &str, endpoint: &str) -> Result<Admission> {
        match self.admit(client_identity, endpoint) {
            Admission::Denied { retry_after } => {
                let millis = retry_after.num_milliseconds().max(0) as u64;
                Err(AuthError::RateLimited {
                    retry_after_secs: ((millis + 999) / 1000).max(1),
                }
                .into())
            }
            admission => Ok(admission),
        }
    }

    fn count(&self, window: &mut RateWindow, now: DateTime<Utc>) -> Admission {
        if now - window.started_at > self.config.window {
            window.count = 0;
            window.started_at = now;
        }

        if window.count >= self.config.max_attempts {
            return Admission::Denied {
                retry_after: window.started_at + self.config.window - now,
            };
        }

        window.count += 1;
        Admission::Allowed {
            remaining: self.config.max_attempts - window.count,
        }
    }

    /// Windows idle for longer than this are dropped by [`sweep`](Self::sweep).
    fn max_idle_ms(&self) -> i64 {
        self.config
            .window
            .num_milliseconds()
            .saturating_mul(i64::from(self.config.idle_eviction_factor))
    }

    /// Drops idle windows; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let max_idle_ms = self.max_idle_ms();

        let before = self.windows.len();
        self.windows
            .retain(|_, window| (now - window.started_at).num_milliseconds() <= max_idle_ms);
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Swept idle rate limit windows");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Client identity used as the rate-limit key.
///
/// The first `X-Forwarded-For` entry wins when trusted. That header is client
/// controlled, so trust it only behind a proxy that overwrites it.
pub fn client_identity(forwarded_for: Option<&str>, peer_addr: Option<&str>, trust_forwarded_for: bool) -> String {
    let forwarded = forwarded_for
        .filter(|_| trust_forwarded_for)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());

    forwarded
        .or(peer_addr)
        .unwrap_or("unknown")
        .to_string()
}
