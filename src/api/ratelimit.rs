/// Per-IP, per-route sliding-window rate limiting

use chrono::Utc;
use dashmap::DashMap;

const WINDOW_SECONDS: i64 = 60;
/// Hard bound on tracked keys; the oldest-looking entries are shed once it
/// is exceeded so a scan cannot grow the map without limit.
const MAX_KEYS: usize = 10_000;

#[derive(Default)]
pub struct RateLimiter {
    requests: DashMap<String, Vec<i64>>,
}

pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_seconds: i64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request and decide it. Window state is kept per
    /// `(route, client)` key.
    pub fn check(&self, route: &str, client: &str, max_per_window: u32) -> RateDecision {
        self.check_at(route, client, max_per_window, Utc::now().timestamp())
    }

    fn check_at(&self, route: &str, client: &str, max_per_window: u32, now: i64) -> RateDecision {
        if self.requests.len() > MAX_KEYS {
            self.shed(now);
        }

        let key = format!("{route}:{client}");
        let mut entry = self.requests.entry(key).or_default();
        entry.retain(|t| now - *t < WINDOW_SECONDS);

        if entry.len() >= max_per_window as usize {
            let oldest = entry.first().copied().unwrap_or(now);
            return RateDecision {
                allowed: false,
                retry_after_seconds: (WINDOW_SECONDS - (now - oldest)).max(1),
            };
        }

        entry.push(now);
        RateDecision {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    fn shed(&self, now: i64) {
        self.requests
            .retain(|_, times| times.iter().any(|t| now - *t < WINDOW_SECONDS));
        if self.requests.len() > MAX_KEYS {
            self.requests.clear();
        }
    }
}
