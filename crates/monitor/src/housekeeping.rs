//! Wall-clock chores that run beside the pipeline: the daily map reset and
//! periodic metrics snapshots.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::{monitor::Monitor, pipeline::telemetry};

const TICK: Duration = Duration::from_secs(1);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Fires once per local calendar date change.
#[derive(Debug, Clone, Copy)]
pub struct DailyTrigger {
    day: NaiveDate,
}

impl DailyTrigger {
    pub fn new(today: NaiveDate) -> Self {
        Self { day: today }
    }

    /// True the first time a later date is observed.
    pub fn observe(&mut self, today: NaiveDate) -> bool {
        if today > self.day {
            self.day = today;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chores {
    pub new_day: bool,
    pub flush_metrics: bool,
}

/// Decides which chores are due on a tick.
#[derive(Debug)]
pub struct Housekeeper {
    day: DailyTrigger,
    flush_every: Duration,
    last_flush: Instant,
}

impl Housekeeper {
    pub fn new(today: NaiveDate, flush_every: Duration, now: Instant) -> Self {
        Self {
            day: DailyTrigger::new(today),
            flush_every,
            last_flush: now,
        }
    }

    pub fn due(&mut self, today: NaiveDate, now: Instant) -> Chores {
        let new_day = self.day.observe(today);
        let flush_metrics = now.saturating_duration_since(self.last_flush) >= self.flush_every;
        if flush_metrics {
            self.last_flush = now;
        }
        Chores {
            new_day,
            flush_metrics,
        }
    }
}

/// Run the housekeeping ticker until `running` clears. Metrics are flushed
/// one last time on the way out.
pub fn spawn_housekeeping(
    monitor: Arc<Monitor>,
    flush_every: Duration,
    running: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("housekeeping", move || {
        let mut housekeeper = Housekeeper::new(Local::now().date_naive(), flush_every, Instant::now());
        let mut next_tick = Instant::now() + TICK;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next_tick {
                thread::sleep(SLEEP_SLICE.min(next_tick - now));
                continue;
            }
            next_tick = now + TICK;

            let chores = housekeeper.due(Local::now().date_naive(), now);
            if chores.new_day {
                info!("Clearing dots for the new day.");
                monitor.clear_map_dots();
            }
            if chores.flush_metrics {
                flush(&monitor);
            }
        }
        flush(&monitor);
        debug!("housekeeping stopped");
    })
}

fn flush(monitor: &Monitor) {
    match monitor.persist_metrics() {
        Ok(path) => debug!("metrics written to {}", path.display()),
        Err(err) => warn!("failed to persist metrics: {err}"),
    }
}
