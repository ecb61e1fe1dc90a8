//! Background housekeeping tasks.
//!
//! DESIGN
//! ======
//! Three loops run beside request handling:
//! - daily reset: sleeps until the global quota's `reset_at`, then resets it
//!   (the lazy path in the rate limiter may have beaten it there; both are
//!   idempotent) and lifts any primary park.
//! - rate-limit sweep: drops per-user windows older than `stale_after`.
//! - conversation sweep: evicts idle conversations and prunes per-user
//!   locks nobody holds.
//!
//! All three stop on one watch-channel signal. [`BackgroundTasks::shutdown`]
//! sends it and joins every task.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::conversation::ConversationStore;
use crate::rate_limit::RateLimiter;
use crate::services::responder::Responder;

/// Upper bound on one daily-reset sleep, so clock changes are noticed.
const MAX_RESET_SLEEP: Duration = Duration::from_secs(3600);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn all housekeeping loops. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(responder: Arc<Responder>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rate_limiter = responder.rate_limiter().clone();
        let conversations = responder.conversations().clone();

        info!(
            rate_sweep_secs = rate_limiter.config().sweep_interval.as_secs(),
            conversation_sweep_secs = conversations.config().sweep_interval.as_secs(),
            "background tasks starting"
        );

        let handles = vec![
            tokio::spawn(daily_reset_loop(Arc::clone(&responder), shutdown_rx.clone())),
            tokio::spawn(rate_limit_sweep_loop(rate_limiter, shutdown_rx.clone())),
            tokio::spawn(conversation_sweep_loop(conversations, responder, shutdown_rx)),
        ];

        Self { shutdown_tx, handles }
    }

    /// Signal every loop to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }
}

/// Wait for the shutdown signal. Returns immediately if the sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn until_reset(rate_limiter: &RateLimiter, now: OffsetDateTime) -> Duration {
    let remaining = rate_limiter.global_reset_at() - now;
    Duration::try_from(remaining)
        .unwrap_or(Duration::ZERO)
        .min(MAX_RESET_SLEEP)
}

async fn daily_reset_loop(responder: Arc<Responder>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let wait = until_reset(responder.rate_limiter(), OffsetDateTime::now_utc());
        tokio::select! {
            () = stopped(&mut shutdown) => break,
            () = tokio::time::sleep(wait) => {}
        }
        let previous = responder.rate_limiter().global_request_count();
        if responder.rate_limiter().reset_global_if_due() {
            responder.clear_primary_cooldown();
            info!(previous, next_reset = %responder.rate_limiter().global_reset_at(), "daily quota reset");
        }
    }
}

async fn rate_limit_sweep_loop(rate_limiter: RateLimiter, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(rate_limiter.config().sweep_interval.max(MIN_SWEEP_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                let removed = rate_limiter.sweep_stale();
                if removed > 0 {
                    info!(removed, "rate limiter: swept stale users");
                }
            }
        }
    }
}

async fn conversation_sweep_loop(
    conversations: ConversationStore,
    responder: Arc<Responder>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(conversations.config().sweep_interval.max(MIN_SWEEP_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                let expired = conversations.sweep_expired();
                let locks = responder.prune_idle_locks();
                if expired > 0 || locks > 0 {
                    info!(expired, locks, "conversations: swept idle state");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
