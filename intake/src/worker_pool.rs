//! Worker pool: fixed-size pool of workers implementing the
//! retry/failover state machine against the health broadcaster.

use crate::health::{HealthBroadcaster, LocalHealth};
use crate::payment::Handler;
use crate::queue::JobHandle;
use crate::store::Store;
use crate::upstream::{Processor, UpstreamClient};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

const GATED_POLL_MS: u64 = 1;
const RETRY_BACKOFF_MS: u64 = 10;

enum State {
    Gated,
    TryDefault,
    TryFallback,
    Persist(Handler),
    Done,
}

pub struct WorkerDeps {
    pub upstream: Arc<UpstreamClient>,
    pub store: Arc<Store>,
    pub health: Arc<HealthBroadcaster>,
}

/// Spawns `receivers.len()` workers. Worker 0 is the static sentinel —
/// the only worker that keeps probing the default processor during an
/// outage; the rest (followers) wait in GATED until the sentinel's
/// probing flips the shared health state.
pub fn spawn_workers(receivers: Vec<mpsc::Receiver<JobHandle>>, deps: WorkerDeps) {
    for (id, rx) in receivers.into_iter().enumerate() {
        let is_sentinel = id == 0;
        let health_rx = deps.health.subscribe();
        let deps = WorkerDeps {
            upstream: deps.upstream.clone(),
            store: deps.store.clone(),
            health: deps.health.clone(),
        };
        tokio::spawn(worker_loop(id, is_sentinel, rx, health_rx, deps));
    }
}

async fn worker_loop(
    id: usize,
    is_sentinel: bool,
    mut rx: mpsc::Receiver<JobHandle>,
    health_rx: tokio::sync::watch::Receiver<crate::health::HealthState>,
    deps: WorkerDeps,
) {
    let local = LocalHealth::spawn(health_rx);
    tracing::info!(worker = id, sentinel = is_sentinel, "worker started");

    while let Some(mut job) = rx.recv().await {
        job.requested_at = Some(OffsetDateTime::now_utc());
        process(&mut job, id, is_sentinel, &local, &deps).await;
    }

    tracing::info!(worker = id, "worker shutting down: channel closed");
}

async fn process(job: &mut JobHandle, id: usize, is_sentinel: bool, local: &LocalHealth, deps: &WorkerDeps) {
    let mut state = if is_sentinel {
        State::TryDefault
    } else {
        State::Gated
    };

    loop {
        state = match state {
            State::Gated => {
                let mut snapshot = local.get();
                while !snapshot.health && !snapshot.critical {
                    tokio::time::sleep(Duration::from_millis(GATED_POLL_MS)).await;
                    snapshot = local.get();
                }
                State::TryDefault
            }

            State::TryDefault => {
                match deps.upstream.post_payment(Processor::Default, job).await {
                    Ok(()) => {
                        if is_sentinel {
                            deps.health.report(true);
                        }
                        State::Persist(Handler::Default)
                    }
                    Err(e) => {
                        tracing::debug!(worker = id, error = %e, "default processor call failed");
                        deps.health.report(false);
                        if local.get().critical {
                            State::TryFallback
                        } else if is_sentinel {
                            tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                            State::TryDefault
                        } else {
                            State::Gated
                        }
                    }
                }
            }

            State::TryFallback => {
                match deps.upstream.post_payment(Processor::Fallback, job).await {
                    Ok(()) => State::Persist(Handler::Fallback),
                    Err(e) => {
                        tracing::debug!(worker = id, error = %e, "fallback processor call failed");
                        tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                        State::TryDefault
                    }
                }
            }

            State::Persist(handler) => {
                if let Err(e) = deps
                    .store
                    .insert_payment(&job.correlation_id, job.amount, handler, job.requested_at())
                    .await
                {
                    // The payment was already accepted upstream; losing
                    // the audit row is reported but never blocks
                    // progress.
                    tracing::error!(worker = id, error = %e, correlation_id = %job.correlation_id, "failed to persist payment");
                }
                State::Done
            }

            State::Done => break,
        };
    }

    job.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;
    use tokio::sync::watch;

    #[tokio::test]
    async fn follower_gates_until_health_or_critical_flips() {
        let (tx, rx) = watch::channel(HealthState {
            health: false,
            critical: false,
        });
        let local = LocalHealth::spawn(rx);
        assert!(!local.get().health && !local.get().critical);

        let waiter = tokio::spawn({
            let local_bits = local;
            async move {
                let mut snapshot = local_bits.get();
                while !snapshot.health && !snapshot.critical {
                    tokio::time::sleep(Duration::from_millis(GATED_POLL_MS)).await;
                    snapshot = local_bits.get();
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send(HealthState {
            health: true,
            critical: false,
        })
        .unwrap();

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("gate must release once health turns true")
            .unwrap();
    }
}
