//! Wall-clock source for log timestamps and lock-record age.

use chrono::{DateTime, Local};

/// Supplies the current local time.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to a fixed instant.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}
