use std::time::Duration;

use log::debug;

use crate::constants::NETCHECK_TIMEOUT_SECS;

/// Endpoints tried in order; the first 200 wins.
const PROBE_URLS: [&str; 2] = ["https://httpbin.org/status/200", "https://www.google.com"];

/// Best-effort internet reachability check. Blocking; see [`probe`] for
/// the async wrapper. Never returns an error, only false.
pub fn is_online(timeout: Duration) -> bool {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout(timeout)
        .build();

    for url in PROBE_URLS {
        match agent.get(url).call() {
            Ok(response) if response.status() == 200 => return true,
            Ok(response) => {
                debug!("Probe {} answered {}", url, response.status());
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
            }
        }
    }

    false
}

/// Abstraction over connectivity so the engine can be driven by a
/// scripted probe in tests.
#[async_trait::async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn up(&self) -> bool;
}

/// Production probe: runs [`is_online`] on the blocking pool with the
/// default deadline.
pub struct HttpProbe;

#[async_trait::async_trait]
impl NetworkProbe for HttpProbe {
    async fn up(&self) -> bool {
        let timeout = Duration::from_secs(NETCHECK_TIMEOUT_SECS);
        match tokio::task::spawn_blocking(move || is_online(timeout)).await {
            Ok(result) => result,
            Err(_) => false,
        }
    }
}
