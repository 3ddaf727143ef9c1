//! Collection cadence: [`Schedule`] plus the [`Ticker`] abstraction that
//! turns it into cycle triggers.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::clock::SharedClock;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default collection cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default delay before the first cycle after startup.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Errors building the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl CollectorError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "collector_config",
            Self::Scheduler(_) => "scheduler_error",
        }
    }
}

/// Schedule for collection cycles.
///
/// Supports both fixed interval and cron-based scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between cycle starts.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses standard cron syntax: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Interval(DEFAULT_INTERVAL)
    }
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, CollectorError> {
        let expr = expr.as_ref().trim();
        parse_cron(expr)?;
        Ok(Self::Cron(expr.to_string()))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule, CollectorError> {
    cron::Schedule::from_str(expr)
        .map_err(|e| CollectorError::Config(format!("invalid cron expression: {e}")))
}

/// Source of cycle triggers.
///
/// `tick` resolves when the next cycle should start, or returns `false` when
/// no further cycles will come.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker driven by a [`Schedule`].
///
/// Fires once after the initial delay, then per schedule. Interval ticks are
/// anchored to the previous fire time; a cycle that overruns its slot fires
/// the next one immediately without bursting.
pub struct ScheduleTicker {
    plan: TickPlan,
    initial_delay: Duration,
    clock: SharedClock,
    next_fire: Option<Instant>,
}

enum TickPlan {
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl std::fmt::Debug for ScheduleTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plan = match &self.plan {
            TickPlan::Interval(d) => format!("every {d:?}"),
            TickPlan::Cron(s) => format!("cron: {s}"),
        };
        f.debug_struct("ScheduleTicker")
            .field("plan", &plan)
            .field("initial_delay", &self.initial_delay)
            .finish_non_exhaustive()
    }
}

impl ScheduleTicker {
    /// # Errors
    /// Returns `CollectorError::Config` for an invalid cron expression.
    pub fn new(
        schedule: &Schedule,
        initial_delay: Duration,
        clock: SharedClock,
    ) -> Result<Self, CollectorError> {
        let plan = match schedule {
            Schedule::Interval(d) => TickPlan::Interval((*d).max(MIN_INTERVAL)),
            Schedule::Cron(expr) => TickPlan::Cron(Box::new(parse_cron(expr)?)),
        };
        Ok(Self {
            plan,
            initial_delay,
            clock,
            next_fire: None,
        })
    }

    /// Delay from now until the next cron fire time, or `None` if the
    /// expression has no future occurrence.
    fn until_next_cron(&self, schedule: &cron::Schedule) -> Option<Duration> {
        let now = self.clock.now();
        let next = schedule.after(&now).next()?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

#[async_trait]
impl Ticker for ScheduleTicker {
    async fn tick(&mut self) -> bool {
        let now = Instant::now();
        let target = match (&self.plan, self.next_fire) {
            (_, None) => now + self.initial_delay,
            (TickPlan::Interval(_), Some(at)) => at.max(now),
            (TickPlan::Cron(schedule), Some(_)) => match self.until_next_cron(schedule) {
                Some(wait) => now + wait,
                None => {
                    tracing::warn!("Cron schedule has no further fire times");
                    return false;
                }
            },
        };

        tokio::time::sleep_until(target).await;
        self.next_fire = Some(match &self.plan {
            TickPlan::Interval(period) => target + *period,
            TickPlan::Cron(_) => target,
        });
        true
    }
}

/// Channel-driven ticker: every trigger sent is one cycle.
///
/// Ends when all [`ManualTrigger`]s are dropped.
#[derive(Debug)]
pub struct ManualTicker {
    rx: mpsc::Receiver<()>,
}

/// Sending half of a [`ManualTicker`].
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    tx: mpsc::Sender<()>,
}

impl ManualTicker {
    pub fn channel(buffer: usize) -> (ManualTrigger, ManualTicker) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ManualTrigger { tx }, ManualTicker { rx })
    }
}

impl ManualTrigger {
    /// Request one cycle. Returns `false` if the ticker is gone.
    pub async fn trigger(&self) -> bool {
        self.tx.send(()).await.is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected {expected:?}, got {elapsed:?}"
        );
    }

    #[test]
    fn test_schedule_interval_minimum() {
        let schedule = Schedule::interval(Duration::from_millis(100));
        assert_eq!(schedule, Schedule::Interval(MIN_INTERVAL));
    }

    #[test]
    fn test_schedule_cron_valid() {
        let schedule = Schedule::cron("0 */5 * * * *").unwrap();
        assert_eq!(schedule, Schedule::Cron("0 */5 * * * *".to_string()));
        assert_eq!(schedule.to_string(), "cron: 0 */5 * * * *");
    }

    #[test]
    fn test_schedule_cron_invalid() {
        let err = Schedule::cron("not a cron").unwrap_err();
        assert!(err.to_string().contains("invalid cron"));
        assert_eq!(err.kind(), "collector_config");
    }

    #[test]
    fn test_default_schedule_is_five_minutes() {
        assert_eq!(Schedule::default().to_string(), "every 5m");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_fires_after_initial_delay_then_per_interval() {
        let schedule = Schedule::interval(Duration::from_secs(300));
        let mut ticker =
            ScheduleTicker::new(&schedule, Duration::from_secs(10), SystemClock::shared()).unwrap();
        let start = Instant::now();

        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::from_secs(10));

        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::from_secs(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_does_not_burst_after_overrun() {
        let schedule = Schedule::interval(Duration::from_secs(60));
        let mut ticker =
            ScheduleTicker::new(&schedule, Duration::ZERO, SystemClock::shared()).unwrap();
        let start = Instant::now();

        assert!(ticker.tick().await);
        // Simulate a cycle that takes three slots.
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::from_secs(180));
        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_ticker_waits_for_next_fire_time() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 2, 30).unwrap());
        let schedule = Schedule::cron("0 */5 * * * *").unwrap();
        let mut ticker = ScheduleTicker::new(&schedule, Duration::ZERO, clock).unwrap();
        let start = Instant::now();

        // Initial run.
        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::ZERO);

        // 00:02:30 -> 00:05:00.
        assert!(ticker.tick().await);
        assert_elapsed(start, Duration::from_secs(150));
    }

    #[tokio::test]
    async fn test_manual_ticker() {
        let (trigger, mut ticker) = ManualTicker::channel(4);
        assert!(trigger.trigger().await);
        assert!(ticker.tick().await);
        drop(trigger);
        assert!(!ticker.tick().await);
    }
}
