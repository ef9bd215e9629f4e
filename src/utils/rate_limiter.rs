use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Requests admitted per identity within one window.
pub const RATE_LIMIT: usize = 15;

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Request timestamps for one client identity, oldest first.
#[derive(Debug, Default)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.timestamps.len()
    }
}

/// Sliding-window admission control keyed by client identity.
///
/// Each identity owns its own lock; the map is only touched to find or
/// create a window, so distinct clients never wait on each other.
pub struct RateLimiter {
    windows: DashMap<String, Arc<Mutex<RateWindow>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit or reject a request from `key`. Rejected attempts are not recorded.
    pub async fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now()).await
    }

    pub async fn admit_at(&self, key: &str, now: Instant) -> bool {
        let window = self.window_for(key);
        let mut window = window.lock().await;
        window.prune(now, self.window);

        if window.len() >= self.limit {
            warn!(
                event = "rate_limit_rejected",
                client = %key,
                in_window = window.len(),
                limit = self.limit,
                "Client exceeded request rate"
            );
            return false;
        }

        window.timestamps.push_back(now);
        debug!(
            event = "rate_limit_admitted",
            client = %key,
            in_window = window.len(),
            "Request admitted"
        );
        true
    }

    /// Requests currently counted against `key`, without recording one.
    pub async fn usage(&self, key: &str) -> usize {
        self.usage_at(key, Instant::now()).await
    }

    pub async fn usage_at(&self, key: &str, now: Instant) -> usize {
        let Some(window) = self.windows.get(key).map(|entry| Arc::clone(entry.value())) else {
            return 0;
        };
        let mut window = window.lock().await;
        window.prune(now, self.window);
        window.len()
    }

    /// Drop windows that have fully aged out. Windows in use are left alone.
    ///
    /// A window whose `Arc` is held outside the map belongs to an admission
    /// that has not locked it yet. `retain` holds the shard write lock, so the
    /// count cannot grow while it is checked.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            if Arc::strong_count(window) > 1 {
                return true;
            }
            match window.try_lock() {
                Ok(mut guard) => {
                    guard.prune(now, self.window);
                    guard.len() > 0
                }
                Err(_) => true,
            }
        });
        before.saturating_sub(self.windows.len())
    }

    /// Periodically sweep idle windows for the lifetime of the process.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = self.sweep_at(Instant::now());
            if removed > 0 {
                debug!(
                    event = "rate_limit_sweep",
                    removed = removed,
                    remaining = self.windows.len(),
                    "Dropped idle rate windows"
                );
            }
        }
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<RateWindow>> {
        if let Some(entry) = self.windows.get(key) {
            return Arc::clone(entry.value());
        }
        Arc::clone(self.windows.entry(key.to_string()).or_default().value())
    }
}

/// Rate limiter for the analysis endpoints
pub fn create_request_rate_limiter() -> RateLimiter {
    // 15 requests per rolling minute per client
    RateLimiter::new(RATE_LIMIT, RATE_WINDOW)
}
