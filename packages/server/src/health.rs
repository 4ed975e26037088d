use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::state::JobPublisher;

/// Cache lifetime while the broker answers.
const TTL_HEALTHY: Duration = Duration::from_secs(30);
/// Shorter lifetime while degraded, so recovery is noticed quickly.
const TTL_DEGRADED: Duration = Duration::from_secs(5);
/// Bound on one liveness probe.
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Anything that can answer a broker liveness probe.
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    async fn probe(&self, timeout: Duration) -> bool;
}

#[async_trait]
impl BrokerProbe for Arc<dyn JobPublisher> {
    async fn probe(&self, timeout: Duration) -> bool {
        self.ping(timeout).await
    }
}

struct HealthCache {
    is_alive: Option<bool>,
    checked_at: Option<Instant>,
}

/// Cached broker-liveness state behind `/health`.
///
/// The probe runs at most once per TTL window; in between, requests answer
/// from cache in microseconds. The clock is monotonic, so wall-clock jumps
/// cannot invalidate the cache early.
pub struct HealthMonitor {
    probe: Box<dyn BrokerProbe>,
    cache: Mutex<HealthCache>,
}

impl HealthMonitor {
    pub fn new(probe: impl BrokerProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            cache: Mutex::new(HealthCache {
                is_alive: None,
                checked_at: None,
            }),
        }
    }

    /// Cached broker liveness; refreshes only when the TTL expired.
    pub async fn is_alive(&self) -> bool {
        let mut cache = self.cache.lock().await;

        if let (Some(alive), Some(checked_at)) = (cache.is_alive, cache.checked_at) {
            let ttl = if alive { TTL_HEALTHY } else { TTL_DEGRADED };
            if checked_at.elapsed() < ttl {
                debug!(alive, "Health cache vigente");
                return alive;
            }
        }

        let alive = self.probe.probe(PING_TIMEOUT).await;
        cache.is_alive = Some(alive);
        cache.checked_at = Some(Instant::now());
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingProbe {
        pings: Arc<AtomicU32>,
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrokerProbe for CountingProbe {
        async fn probe(&self, _timeout: Duration) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn monitor(alive: bool) -> (HealthMonitor, Arc<AtomicU32>, Arc<AtomicBool>) {
        let pings = Arc::new(AtomicU32::new(0));
        let flag = Arc::new(AtomicBool::new(alive));
        let monitor = HealthMonitor::new(CountingProbe {
            pings: Arc::clone(&pings),
            alive: Arc::clone(&flag),
        });
        (monitor, pings, flag)
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_result_is_cached_for_30s() {
        let (monitor, pings, _) = monitor(true);

        assert!(monitor.is_alive().await);
        assert!(monitor.is_alive().await);
        assert_eq!(pings.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(monitor.is_alive().await);
        assert_eq!(pings.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(monitor.is_alive().await);
        assert_eq!(pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_rechecks_after_5s() {
        let (monitor, pings, alive) = monitor(false);

        assert!(!monitor.is_alive().await);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!monitor.is_alive().await);
        assert_eq!(pings.load(Ordering::SeqCst), 1);

        // Broker comes back; the short TTL notices within seconds.
        alive.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(monitor.is_alive().await);
        assert_eq!(pings.load(Ordering::SeqCst), 2);
    }
}
