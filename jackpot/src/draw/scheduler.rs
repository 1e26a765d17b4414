//! Background task that draws due jackpots and finishes stuck draws.
//!
//! Any number of schedulers may run against one store; the draw claim
//! guarantees each jackpot is drawn once.

use super::{engine::DrawEngine, models::DrawOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::interval};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub poll_interval: Duration,
    /// How long a draw may sit in `drawing` before it is resumed
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    /// Read `DRAW_POLL_INTERVAL_SECS` and `DRAW_STALE_AFTER_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| v > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            poll_interval: secs("DRAW_POLL_INTERVAL_SECS", defaults.poll_interval),
            stale_after: secs("DRAW_STALE_AFTER_SECS", defaults.stale_after),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub drawn: usize,
    pub already_drawn: usize,
    pub resumed: usize,
    pub failed: usize,
}

/// Periodic draw runner
#[derive(Clone)]
pub struct DrawScheduler {
    engine: DrawEngine,
    config: SchedulerConfig,
}

impl DrawScheduler {
    pub fn new(engine: DrawEngine, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Draw everything due at `now`, then resume draws stuck since before
    /// `now - stale_after`. Errors are logged and counted, never returned.
    pub async fn run_once(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.engine.due_jackpots(now).await {
            Ok(due) => {
                for jackpot_id in due {
                    match self.engine.execute_draw(jackpot_id).await {
                        Ok(DrawOutcome::Completed(_)) => report.drawn += 1,
                        Ok(DrawOutcome::AlreadyDrawn) => report.already_drawn += 1,
                        Err(e) => {
                            report.failed += 1;
                            log::error!("Scheduled draw of jackpot {jackpot_id} failed: {e}");
                        }
                    }
                }
            }
            Err(e) => log::error!("Failed to list due jackpots: {e}"),
        }

        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        match self.engine.stale_draws(now - stale_after).await {
            Ok(stale) => {
                for jackpot_id in stale {
                    match self.engine.resume_draw(jackpot_id).await {
                        Ok(DrawOutcome::Completed(_)) => report.resumed += 1,
                        Ok(DrawOutcome::AlreadyDrawn) => report.already_drawn += 1,
                        Err(e) => {
                            report.failed += 1;
                            log::error!("Resuming draw of jackpot {jackpot_id} failed: {e}");
                        }
                    }
                }
            }
            Err(e) => log::error!("Failed to list stale draws: {e}"),
        }

        if report != TickReport::default() {
            log::info!(
                "Draw tick: {} drawn, {} resumed, {} already drawn, {} failed",
                report.drawn,
                report.resumed,
                report.already_drawn,
                report.failed
            );
        }
        report
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!(
                "Draw scheduler starting (every {:?}, stale after {:?})",
                self.config.poll_interval,
                self.config.stale_after
            );
            let mut ticker = interval(self.config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            log::info!("Draw scheduler stopped");
        })
    }
}
