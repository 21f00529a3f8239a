//! Periodic timer with self-healing schedule entries.
//!
//! Handlers are registered once; the schedule entry (`next_run`) for each is
//! separate state that can go missing (cleared by an operator, lost on a
//! restore). Every tick re-creates missing entries before firing due ones, so
//! a registered handler can never silently stop running.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use recalc_core::Clock;

/// Timer callback.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    interval: Duration,
    handler: TimerHandler,
}

/// Schedule entry of one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
}

/// Timer error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TimerError {
    #[error("no handler registered for schedule: {0}")]
    UnknownSchedule(String),
    #[error("invalid interval for schedule {0}: must be greater than zero")]
    InvalidInterval(String),
    #[error("timer lock poisoned")]
    Poisoned,
}

pub struct PeriodicTimer {
    clock: Arc<dyn Clock>,
    registrations: RwLock<BTreeMap<String, Registration>>,
    schedule: Mutex<BTreeMap<String, ScheduleEntry>>,
}

impl std::fmt::Debug for PeriodicTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTimer")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl PeriodicTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            registrations: RwLock::new(BTreeMap::new()),
            schedule: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register (or replace) a handler and schedule its first run one
    /// `interval` from now.
    pub fn register<F>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        handler: F,
    ) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            return Err(TimerError::InvalidInterval(name));
        }

        self.registrations
            .write()
            .map_err(|_| TimerError::Poisoned)?
            .insert(
                name.clone(),
                Registration {
                    interval,
                    handler: Arc::new(handler),
                },
            );

        self.ensure(&name, self.clock.now())?;
        info!(schedule = %name, interval_secs = interval.as_secs(), "periodic handler registered");
        Ok(())
    }

    /// Create the schedule entry for `name` if it is missing.
    ///
    /// Returns `true` when an entry was (re)created.
    pub fn ensure(&self, name: &str, now: DateTime<Utc>) -> Result<bool, TimerError> {
        let interval = self
            .registrations
            .read()
            .map_err(|_| TimerError::Poisoned)?
            .get(name)
            .map(|r| r.interval)
            .ok_or_else(|| TimerError::UnknownSchedule(name.to_string()))?;

        let mut schedule = self.schedule()?;
        if schedule.contains_key(name) {
            return Ok(false);
        }

        schedule.insert(
            name.to_string(),
            ScheduleEntry {
                interval,
                next_run: after(now, interval),
            },
        );
        Ok(true)
    }

    /// Drop the schedule entry for `name`, keeping its handler registered.
    pub fn unschedule(&self, name: &str) -> Result<bool, TimerError> {
        Ok(self.schedule()?.remove(name).is_some())
    }

    pub fn entry(&self, name: &str) -> Result<Option<ScheduleEntry>, TimerError> {
        Ok(self.schedule()?.get(name).copied())
    }

    /// Heal missing entries, then fire every handler due at `now`.
    ///
    /// Returns the names of the handlers that fired.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>, TimerError> {
        let names: Vec<String> = self
            .registrations
            .read()
            .map_err(|_| TimerError::Poisoned)?
            .keys()
            .cloned()
            .collect();

        for name in &names {
            if self.ensure(name, now)? {
                info!(schedule = %name, "missing schedule entry re-created");
            }
        }

        let due: Vec<String> = {
            let mut schedule = self.schedule()?;
            schedule
                .iter_mut()
                .filter(|(_, entry)| entry.next_run <= now)
                .map(|(name, entry)| {
                    entry.next_run = after(now, entry.interval);
                    name.clone()
                })
                .collect()
        };

        for name in &due {
            let handler = self
                .registrations
                .read()
                .map_err(|_| TimerError::Poisoned)?
                .get(name)
                .map(|r| r.handler.clone());

            if let Some(handler) = handler {
                debug!(schedule = %name, "firing periodic handler");
                if panic::catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                    error!(schedule = %name, "periodic handler panicked");
                }
            }
        }

        Ok(due)
    }

    /// Run the timer on a background thread, ticking every `tick_interval`.
    pub fn spawn(self: Arc<Self>, tick_interval: Duration) -> std::io::Result<TimerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("periodic-timer".to_string())
            .spawn(move || timer_loop(self, tick_interval, shutdown_rx))?;

        Ok(TimerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    fn schedule(&self) -> Result<MutexGuard<'_, BTreeMap<String, ScheduleEntry>>, TimerError> {
        self.schedule.lock().map_err(|_| TimerError::Poisoned)
    }
}

fn after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Handle to stop a spawned timer.
#[derive(Debug)]
pub struct TimerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl TimerHandle {
    /// Request shutdown and wait for the timer thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn timer_loop(timer: Arc<PeriodicTimer>, tick_interval: Duration, shutdown_rx: mpsc::Receiver<()>) {
    info!("periodic timer started");

    loop {
        if let Err(e) = timer.tick(timer.clock.now()) {
            error!(error = %e, "periodic timer tick failed");
        }

        match shutdown_rx.recv_timeout(tick_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!("periodic timer stopped");
}
