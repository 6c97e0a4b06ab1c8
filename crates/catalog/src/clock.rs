//! Wall-clock access and timestamp encoding.
//!
//! Timestamps are persisted as Unix nanoseconds in `INTEGER` columns.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcDateTime};

pub type ClockHandle = Arc<dyn Clock>;

pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> UtcDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the catalog.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<UtcDateTime>>,
}
impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, now: UtcDateTime) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}
impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn to_nanos(timestamp: UtcDateTime) -> Result<i64> {
    i64::try_from(timestamp.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_nanos(nanos: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn format(timestamp: UtcDateTime) -> Result<String> {
    OffsetDateTime::from(timestamp).format(&Rfc3339).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

/// `true` while `now` is strictly before `issued + ttl`.
pub(crate) fn within_ttl(issued: UtcDateTime, ttl: Duration, now: UtcDateTime) -> bool {
    now < issued + ttl
}
