//! Time source
//!
//! Expiry and device windows are always compared against an injected
//! clock, never against a status column.

use chrono::{DateTime, Utc};

/// Source of "now"
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
