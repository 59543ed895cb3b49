//! Time source abstraction.
//!
//! Registration timestamps are the FIFO key for the waitlist, so the engine
//! takes its notion of "now" from a `Clock` instead of calling `Utc::now()`
//! directly. Tests pin time with `FixedClock`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Wraps another clock and guarantees strictly increasing readings.
///
/// Readings are truncated to microseconds, the precision Postgres
/// `timestamptz` keeps. If the inner clock stalls or steps backwards at that
/// precision, the reading is bumped one microsecond past the previous one.
#[derive(Debug)]
pub struct MonotonicClock<C> {
    inner: C,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> DateTime<Utc> {
        let reading = self.inner.now().trunc_subsecs(6);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let next = match *last {
            Some(prev) if reading <= prev => prev + Duration::microseconds(1),
            _ => reading,
        };
        *last = Some(next);
        next
    }
}
