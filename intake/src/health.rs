//! Health broadcaster: tracks default-processor reachability and pushes
//! conflated state updates to subscribers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::watch;

/// The default processor is considered critical once its cumulative
/// down-time across the process lifetime exceeds this threshold. Matches
/// the reference lineage's own constant.
pub const CRITICAL_THRESHOLD_MS: i64 = 39_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub health: bool,
    pub critical: bool,
}

impl HealthState {
    fn pack(self) -> u8 {
        (self.health as u8) | ((self.critical as u8) << 1)
    }

    fn unpack(bits: u8) -> Self {
        Self {
            health: bits & 0b01 != 0,
            critical: bits & 0b10 != 0,
        }
    }
}

struct Inner {
    state: HealthState,
    last_down: Option<OffsetDateTime>,
    accumulated_down_ms: i64,
}

pub struct HealthBroadcaster {
    inner: Mutex<Inner>,
    tx: watch::Sender<HealthState>,
}

impl HealthBroadcaster {
    pub fn new() -> Arc<Self> {
        let initial = HealthState {
            health: true,
            critical: false,
        };
        let (tx, _rx) = watch::channel(initial);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: initial,
                last_down: None,
                accumulated_down_ms: 0,
            }),
            tx,
        })
    }

    /// Depth-1 conflated subscription: the receiver always holds only the
    /// most recently broadcast state.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.tx.subscribe()
    }

    /// Called by a worker after each attempt against the default
    /// processor. Tracks cumulative down-time and flips `critical`
    /// permanently once it crosses the threshold, even after recovery.
    pub fn report(&self, success: bool) {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock().unwrap();

        let candidate_down = if !success {
            let last_down = *inner.last_down.get_or_insert(now);
            inner.accumulated_down_ms + (now - last_down).whole_milliseconds() as i64
        } else if let Some(last_down) = inner.last_down.take() {
            inner.accumulated_down_ms += (now - last_down).whole_milliseconds() as i64;
            inner.accumulated_down_ms
        } else {
            inner.accumulated_down_ms
        };

        let new_critical = candidate_down > CRITICAL_THRESHOLD_MS;
        let new_state = HealthState {
            health: success,
            critical: new_critical,
        };

        if inner.state == new_state {
            return;
        }

        inner.state = new_state;
        // The watch sender's `send` never fails here: the broadcaster
        // owns the sender for its whole lifetime, so there is always at
        // least the implicit receiver kept alive by `Arc<Self>` holders.
        let _ = self.tx.send(new_state);
        tracing::info!(health = new_state.health, critical = new_state.critical, "health state changed");
    }
}

/// A worker-local, lock-free snapshot of the broadcaster's state, kept
/// current by a dedicated background task per worker: each worker reads
/// its own slot lock-free, via a single atomic load.
pub struct LocalHealth {
    bits: Arc<AtomicU8>,
}

impl LocalHealth {
    /// Spawns the reader task and returns a handle for lock-free reads.
    pub fn spawn(mut rx: watch::Receiver<HealthState>) -> Self {
        let bits = Arc::new(AtomicU8::new(rx.borrow().pack()));
        let bits_writer = bits.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow();
                bits_writer.store(state.pack(), Ordering::Relaxed);
            }
        });
        Self { bits }
    }

    pub fn get(&self) -> HealthState {
        HealthState::unpack(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flapping_under_threshold_never_goes_critical() {
        let hb = HealthBroadcaster::new();
        hb.report(false);
        std::thread::sleep(Duration::from_millis(20));
        hb.report(true);
        let inner = hb.inner.lock().unwrap();
        assert!(!inner.state.critical);
    }

    #[test]
    fn critical_is_monotonic_even_after_recovery() {
        let hb = HealthBroadcaster::new();
        {
            // Fabricate a long down-time without sleeping in the test.
            let mut inner = hb.inner.lock().unwrap();
            inner.last_down = Some(OffsetDateTime::now_utc() - time::Duration::milliseconds(40_000));
        }
        hb.report(false);
        assert!(hb.inner.lock().unwrap().state.critical);

        hb.report(true);
        assert!(
            hb.inner.lock().unwrap().state.critical,
            "critical must never clear on recovery"
        );
    }

    #[test]
    fn no_state_change_means_no_broadcast() {
        let hb = HealthBroadcaster::new();
        let mut rx = hb.subscribe();
        rx.borrow_and_update();
        hb.report(true); // already healthy and non-critical: no-op
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn subscribers_see_conflated_latest_state() {
        let hb = HealthBroadcaster::new();
        let local = LocalHealth::spawn(hb.subscribe());
        assert!(local.get().health);

        hb.report(false);
        hb.report(false);
        hb.report(false);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!local.get().health);
    }
}
