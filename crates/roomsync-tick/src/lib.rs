//! Fixed-interval tickers for roomsync.
//!
//! A room runs two independent loops: the simulation (world rules) and the
//! state synchronizer (patches to clients). Each gets its own [`Ticker`]
//! with its own interval; nothing assumes the two rates are equal or even
//! related.
//!
//! # Disabled tickers
//!
//! An interval of zero disables the ticker: [`Ticker::wait_for_tick`] pends
//! forever, and the other `select!` branches keep running.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         info = sim_ticker.wait_for_tick() => {
//!             simulation.tick(&mut state, info.elapsed);
//!             sim_ticker.record_tick_end();
//!         }
//!         _ = patch_ticker.wait_for_tick() => {
//!             synchronizer.tick(&mut state, &clients);
//!             patch_ticker.record_tick_end();
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence. The next tick fires at its originally
    /// scheduled time, which may already be in the past.
    Drop,
}

/// Configuration for one [`Ticker`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. [`Duration::ZERO`] disables the ticker.
    pub interval: Duration,
    /// Late-tick handling.
    pub policy: TickPolicy,
    /// Fraction of the interval (0.0–1.0) after which a `warn!` is emitted
    /// for slow tick work.
    pub budget_warn_threshold: f64,
    /// Upper bound of a random delay added to the *first* tick only, so
    /// that loops started at the same instant don't fire in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            initial_jitter: Duration::from_millis(2),
        }
    }
}

impl TickConfig {
    /// A config with the given interval and default settings otherwise.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Sets the initial jitter. Tests use `Duration::ZERO` for exact timing.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    pub fn with_policy(mut self, policy: TickPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn validated(mut self) -> Self {
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// `None` when the ticker is disabled.
    pub fn tick_duration(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`Ticker::wait_for_tick`] each time it fires.
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// The configured interval.
    pub dt: Duration,
    /// Time actually elapsed since the previous tick fired (or since the
    /// ticker was created, for the first tick). Equal to `dt` plus any
    /// lateness.
    pub elapsed: Duration,
    /// `true` if the tick fired more than 10% of an interval late.
    pub late: bool,
    /// Whole intervals that were skipped because of lateness
    /// (always 0 under [`TickPolicy::Drop`]).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// A fixed-interval timer meant to live inside an actor's `select!` loop.
pub struct Ticker {
    config: TickConfig,
    tick_duration: Option<Duration>,
    tick_count: u64,
    next_tick: Option<TokioInstant>,
    last_fired: TokioInstant,
    /// Wall-clock start of the current tick's work, consumed by
    /// `record_tick_end`.
    work_start: Option<Instant>,
}

impl Ticker {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();
        let now = TokioInstant::now();

        let next_tick = tick_duration.map(|d| {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_micros() as u64;
                Duration::from_micros(rand::rng().random_range(0..max.max(1)))
            };
            now + d + jitter
        });

        match tick_duration {
            None => debug!("ticker created disabled"),
            Some(d) => debug!(
                interval_ms = d.as_secs_f64() * 1000.0,
                policy = ?config.policy,
                "ticker created"
            ),
        }

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick,
            last_fired: now,
            work_start: None,
        }
    }

    /// Waits until the next tick is due.
    ///
    /// Cancel-safe: if the future is dropped before it resolves (another
    /// `select!` branch won), no tick is consumed.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, dur) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(dur)) => (next, dur),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.work_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let late = late_by > dur / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if late {
                    ticks_skipped = (late_by.as_nanos() / dur.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "tick late, skipping ahead"
                        );
                    }
                }
                now + dur
            }
            TickPolicy::Drop => {
                if late {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick late, keeping original schedule"
                    );
                }
                next + dur
            }
        });

        let elapsed = now.saturating_duration_since(self.last_fired);
        self.last_fired = now;

        trace!(tick = self.tick_count, late, "tick fired");

        TickInfo {
            tick: self.tick_count,
            dt: dur,
            elapsed,
            late,
            ticks_skipped,
        }
    }

    /// Marks the end of the work done for the current tick and warns if it
    /// used more than `budget_warn_threshold` of the interval.
    ///
    /// A no-op if no tick is in progress.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.work_start.take() else {
            return;
        };
        let Some(budget) = self.tick_duration else {
            return;
        };

        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "tick work approaching interval"
            );
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.tick_duration.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}
