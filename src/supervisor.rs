//! Connection supervisor (C5): liveness map and rate-limited reconnect loop.
//!
//! This is the only path that heals downed endpoints. Polling workers never
//! reconnect; they only check liveness and skip their cycle if down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Eip,
    Snmp,
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub kind: EndpointKind,
    pub device_id: u32,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    pub connected: bool,
    pub last_check: DateTime<Utc>,
    pub message: String,
}

const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Keyed liveness map, mutex-protected, shared between the polling engine
/// (reads only) and the supervisor (reads and writes).
#[derive(Default)]
pub struct LivenessMap {
    inner: Mutex<HashMap<EndpointKey, Liveness>>,
}

impl LivenessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: EndpointKey, connected: bool, message: impl Into<String>) {
        self.inner.lock().unwrap().insert(
            key,
            Liveness { connected, last_check: Utc::now(), message: message.into() },
        );
    }

    pub fn is_connected(&self, key: EndpointKey) -> bool {
        self.inner.lock().unwrap().get(&key).map(|l| l.connected).unwrap_or(false)
    }

    pub fn get(&self, key: EndpointKey) -> Option<Liveness> {
        self.inner.lock().unwrap().get(&key).cloned()
    }

    pub fn down_endpoints(&self) -> Vec<EndpointKey> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, v)| !v.connected)
            .map(|(k, _)| *k)
            .collect()
    }
}

/// Per-key reconnect-attempt cooldown, separate from the liveness map since
/// it tracks "last attempted", not "last known state".
#[derive(Default)]
struct ReconnectCooldown {
    last_attempt: Mutex<HashMap<EndpointKey, Instant>>,
}

impl ReconnectCooldown {
    fn should_attempt(&self, key: EndpointKey) -> bool {
        let mut last_attempt = self.last_attempt.lock().unwrap();
        match last_attempt.get(&key) {
            Some(last) if last.elapsed() < RECONNECT_INTERVAL => false,
            _ => {
                last_attempt.insert(key, Instant::now());
                true
            }
        }
    }
}

/// Drives a 10-second reconnect tick. The caller supplies a `reconnect`
/// closure invoked once per down, cooldown-eligible endpoint; its `Result`
/// return is the connect attempt's outcome.
pub struct Supervisor {
    liveness: Arc<LivenessMap>,
    cooldown: ReconnectCooldown,
    stop: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(liveness: Arc<LivenessMap>) -> Self {
        Self { liveness, cooldown: ReconnectCooldown::default(), stop: Arc::new(AtomicBool::new(false)) }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs the tick loop until `stop` is set. `reconnect` receives the
    /// endpoint key and must attempt to reconnect it, returning `Ok(())` on
    /// success.
    pub fn run(&self, reconnect: impl Fn(EndpointKey) -> crate::error::Result<()>) {
        info!("connection supervisor started");
        while !self.stop.load(Ordering::SeqCst) {
            for key in self.liveness.down_endpoints() {
                if !self.cooldown.should_attempt(key) {
                    continue;
                }
                match reconnect(key) {
                    Ok(()) => {
                        self.liveness.set(key, true, "reconnected");
                        info!("reconnected endpoint {key:?}");
                    }
                    Err(e) => {
                        debug!("reconnect failed for {key:?}: {e}");
                    }
                }
            }
            sleep_in_ticks(TICK_INTERVAL, &self.stop);
        }
        info!("connection supervisor stopped");
    }
}

/// Sleeps up to `total`, but wakes early (and returns) as soon as `stop` is
/// set, so shutdown doesn't have to wait out a full tick.
pub(crate) fn sleep_in_ticks(total: Duration, stop: &AtomicBool) {
    const STEP: Duration = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    while waited < total && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(STEP);
        waited += STEP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_endpoints_excludes_connected() {
        let map = LivenessMap::new();
        let up = EndpointKey { kind: EndpointKind::Eip, device_id: 1 };
        let down = EndpointKey { kind: EndpointKind::Snmp, device_id: 2 };
        map.set(up, true, "ok");
        map.set(down, false, "timeout");
        let downed = map.down_endpoints();
        assert_eq!(downed, vec![down]);
    }

    #[test]
    fn unknown_endpoint_defaults_to_disconnected() {
        let map = LivenessMap::new();
        assert!(!map.is_connected(EndpointKey { kind: EndpointKind::Mqtt, device_id: 99 }));
    }

    #[test]
    fn cooldown_blocks_immediate_retry() {
        let cooldown = ReconnectCooldown::default();
        let key = EndpointKey { kind: EndpointKind::Eip, device_id: 1 };
        assert!(cooldown.should_attempt(key));
        assert!(!cooldown.should_attempt(key));
    }
}
