// Per-IP connection admission: caps concurrent connections and throttles the
// rate of new connection attempts. Consulted before the socket upgrade completes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MAX_PER_IP: u32 = 5;
const ATTEMPT_INTERVAL: Duration = Duration::from_millis(200);
const IDLE_SWEEP_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    last_attempt: Instant,
}

pub struct ConnectionLimiter {
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl ConnectionLimiter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Admits a new connection attempt from `ip`, recording it on success.
    pub async fn try_admit(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(ip).or_insert(Entry {
            count: 0,
            last_attempt: now - ATTEMPT_INTERVAL,
        });

        if entry.count >= MAX_PER_IP {
            return false;
        }
        if now.saturating_duration_since(entry.last_attempt) < ATTEMPT_INTERVAL {
            return false;
        }

        entry.count += 1;
        entry.last_attempt = now;
        true
    }

    pub async fn on_disconnect(&self, ip: IpAddr) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&ip) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Drops entries that have been idle (no attempts, zero current count) for
    /// longer than the sweep threshold. Run periodically by a dedicated task.
    pub async fn sweep(&self, now: Instant) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| {
            entry.count > 0 || now.saturating_duration_since(entry.last_attempt) <= IDLE_SWEEP_AFTER
        });
    }
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[tokio::test]
    async fn admits_up_to_cap_respecting_attempt_interval() {
        let limiter = ConnectionLimiter::new();
        let mut now = Instant::now();
        for _ in 0..MAX_PER_IP {
            assert!(limiter.try_admit(ip(), now).await);
            now += ATTEMPT_INTERVAL;
        }
        assert!(!limiter.try_admit(ip(), now).await);
    }

    #[tokio::test]
    async fn rejects_attempts_too_close_together() {
        let limiter = ConnectionLimiter::new();
        let now = Instant::now();
        assert!(limiter.try_admit(ip(), now).await);
        assert!(!limiter.try_admit(ip(), now + Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn disconnect_frees_a_slot() {
        let limiter = ConnectionLimiter::new();
        let mut now = Instant::now();
        for _ in 0..MAX_PER_IP {
            limiter.try_admit(ip(), now).await;
            now += ATTEMPT_INTERVAL;
        }
        limiter.on_disconnect(ip()).await;
        assert!(limiter.try_admit(ip(), now).await);
    }
}
