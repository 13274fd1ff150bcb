//! `quorum serve`: the long-running side of the lifecycle.
//!
//! Runs three things side by side until Ctrl-C:
//!
//! - the task worker, polling for due auto-resolve tasks;
//! - the reminder sweep, on the `remind-cron` schedule;
//! - the expiration sweep, on the `expire-cron` schedule.

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::Config,
    engine::Engine,
    scheduler,
    storage::Storage,
    tasks::{Task, Worker},
};

pub(super) async fn run(
    engine: &Engine,
    storage: Storage,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Result<(), String> {
    let remind_schedule = scheduler::parse(&config.remind_cron)?;
    let expire_schedule = scheduler::parse(&config.expire_cron)?;

    let worker = Worker::new(storage, clock)
        .with_lease(config.task_lease)
        .register(Task::AUTO_RESOLVE, Arc::new(engine.clone()))
        .spawn(config.poll_interval());

    let reminders = {
        let engine = engine.clone();
        scheduler::spawn("reminder-sweep", remind_schedule, move || {
            if let Err(e) = engine.sweep_potentially_resolved() {
                tracing::error!(error = %e, "reminder sweep failed");
            }
        })
    };
    let expiration = {
        let engine = engine.clone();
        scheduler::spawn("expiration-sweep", expire_schedule, move || {
            if let Err(e) = engine.expire_stale() {
                tracing::error!(error = %e, "expiration sweep failed");
            }
        })
    };

    tracing::info!(
        remind_cron = %config.remind_cron,
        expire_cron = %config.expire_cron,
        poll_interval = %config.poll_interval,
        grace_period = %engine.settings().grace_period,
        "serving; press Ctrl-C to stop"
    );
    let signal = tokio::signal::ctrl_c().await;

    tracing::info!("shutting down");
    for handle in [worker, reminders, expiration] {
        handle.abort();
        // A cancelled task reports a JoinError; that is the expected outcome here.
        let _ = handle.await;
    }
    signal.map_err(|e| format!("failed to listen for Ctrl-C: {e}"))
}
