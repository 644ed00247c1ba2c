//! FILENAME: olap-engine/src/scheduler.rs
//! Cooperative scheduling for rebuilds.
//!
//! The engine never spawns threads or timers. It keeps at most one pending
//! task with a due time, read from an injected [`Clock`], and the host runs
//! it by calling `run_pending`. Production hosts use [`SystemClock`] and
//! [`run_until_idle`]; tests use [`ManualClock`] and move time by hand.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::engine::PivotEngine;
use crate::error::Result;

/// Delay between `invalidate` and the rebuild it schedules.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(10);

/// Delay before a yielded scan resumes.
pub const CONTINUATION_DELAY: Duration = Duration::from_millis(10);

/// Records processed between time checks.
pub const BATCH_SIZE: usize = 1000;

/// Scan time allowed per scheduling tick.
pub const TIME_BUDGET: Duration = Duration::from_millis(100);

/// Limits for one slice of a chunked scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBudget {
    pub batch_size: usize,
    /// A zero budget yields after every batch.
    pub time_budget: Duration,
}

impl Default for ScanBudget {
    fn default() -> Self {
        ScanBudget {
            batch_size: BATCH_SIZE,
            time_budget: TIME_BUDGET,
        }
    }
}

// ============================================================================
// CLOCKS
// ============================================================================

/// Monotonic time source. `now` is measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Blocks (or, for fake clocks, jumps) until `deadline`.
    fn sleep_until(&self, deadline: Duration);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

/// Runs scheduled work until nothing is pending.
pub fn run_until_idle(engine: &mut PivotEngine) -> Result<()> {
    while let Some(deadline) = engine.next_deadline() {
        engine.clock().sleep_until(deadline);
        engine.run_pending()?;
    }
    Ok(())
}
