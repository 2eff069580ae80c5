use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

const DEFAULT_RATE_LIMIT_MS: u64 = 500;

/// Last access time and minimum spacing for one external service
struct ServiceLimit {
    last_access: Instant,
    minimum_delay_ms: u64,
}

/// Ensures calls to external services keep a minimum spacing.
///
/// Limits are enforced by blocking the calling thread, so this is meant
/// to be used from the blocking pool (the ureq client paths), never from
/// an async task directly.
pub struct RateLimiter {
    services: HashMap<String, ServiceLimit>,
}

static RATE_LIMITER: Lazy<Mutex<RateLimiter>> = Lazy::new(|| Mutex::new(RateLimiter::new()));

impl RateLimiter {
    fn new() -> Self {
        RateLimiter {
            services: HashMap::new(),
        }
    }

    fn register_service(&mut self, service_name: &str, minimum_delay_ms: u64) {
        let service_limit = ServiceLimit {
            last_access: Instant::now() - Duration::from_millis(minimum_delay_ms),
            minimum_delay_ms,
        };
        self.services.insert(service_name.to_string(), service_limit);
        debug!(
            "Registered rate limit for service '{}': {} ms",
            service_name, minimum_delay_ms
        );
    }

    fn next_delay(&mut self, service_name: &str) -> Duration {
        let now = Instant::now();
        let service_limit = self
            .services
            .entry(service_name.to_string())
            .or_insert_with(|| ServiceLimit {
                last_access: now - Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
                minimum_delay_ms: DEFAULT_RATE_LIMIT_MS,
            });

        let elapsed_ms = now.duration_since(service_limit.last_access).as_millis() as u64;
        let delay = if elapsed_ms < service_limit.minimum_delay_ms {
            Duration::from_millis(service_limit.minimum_delay_ms - elapsed_ms)
        } else {
            Duration::ZERO
        };
        service_limit.last_access = now + delay;
        delay
    }
}

/// Register a rate limit for a named service
pub fn register_service(service_name: &str, minimum_delay_ms: u64) {
    RATE_LIMITER.lock().register_service(service_name, minimum_delay_ms);
}

/// Block the current thread until the service's minimum spacing has
/// elapsed. Unregistered services get a 500 ms default.
pub fn rate_limit(service_name: &str) {
    let delay = RATE_LIMITER.lock().next_delay(service_name);
    if !delay.is_zero() {
        debug!(
            "Rate limiting service '{}': sleeping for {} ms",
            service_name,
            delay.as_millis()
        );
        std::thread::sleep(delay);
    }
}
