//! The poll loop.
//!
//! A [`Scheduler`] runs one check cycle immediately and then one per
//! interval. It alternates between two states:
//!
//! ```text
//!   Idle ──tick──▶ Checking ──cycle done──▶ Idle
//! ```
//!
//! Cycles never overlap: a cycle that outlasts the interval delays the next
//! tick instead of queueing a burst. A failed cycle is logged and the next
//! tick is the retry. Shutdown is observed between cycles only, so an
//! in-flight cycle (including an interactive re-authorization) always runs
//! to completion.
//!
//! ```no_run
//! use report_bot::{BotConfig, ReportBot, Scheduler};
//! use std::sync::Arc;
//!
//! # async fn example() -> report_bot::Result<()> {
//! let config = BotConfig::from_env()?;
//! let interval = config.polling.interval;
//! let bot = Arc::new(ReportBot::google(config)?);
//!
//! let handle = Scheduler::new(bot, interval).spawn();
//! tokio::signal::ctrl_c().await.ok();
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::bot::CycleReport;
use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Shortest interval the loop will tick at.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// One unit of periodic work.
pub trait PollTask: Send + Sync {
    /// Runs a single cycle to completion.
    fn run_cycle(&self) -> BoxFuture<'_, Result<CycleReport>>;
}

/// What the poll loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// A cycle is in progress.
    Checking,
}

/// Runs a [`PollTask`] on a fixed interval.
pub struct Scheduler {
    task: Arc<dyn PollTask>,
    interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler. Intervals below [`MIN_INTERVAL`] are raised to it.
    #[must_use]
    pub fn new(task: Arc<dyn PollTask>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(requested = ?interval, using = ?MIN_INTERVAL, "Poll interval too short, clamping");
        }
        Self {
            task,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Starts the loop on the current tokio runtime.
    ///
    /// Dropping the returned handle without calling
    /// [`SchedulerHandle::shutdown`] also stops the loop after the current
    /// cycle, but does not wait for it.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);

        let join = tokio::spawn(self.run(shutdown_rx, state_tx));

        SchedulerHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            join,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, state: watch::Sender<PollState>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Scheduler started");

        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            cycle += 1;
            state.send_replace(PollState::Checking);

            let outcome = self
                .task
                .run_cycle()
                .instrument(info_span!("Scheduler::cycle", cycle))
                .await;

            match outcome {
                Ok(report) => debug!(cycle, ?report, "Cycle finished"),
                Err(e) => error!(
                    cycle,
                    error = %e,
                    category = %e.category(),
                    retryable = e.is_retryable(),
                    "Check cycle failed, waiting for next tick"
                ),
            }

            state.send_replace(PollState::Idle);
        }

        info!(cycles = cycle, "Scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Control handle for a spawned [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<PollState>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Returns the loop's current state.
    #[must_use]
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Returns `true` once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the loop after the in-flight cycle, if any, and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "Scheduler task did not exit cleanly");
        }
    }
}
