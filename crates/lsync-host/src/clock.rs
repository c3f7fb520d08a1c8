use chrono::{DateTime, SecondsFormat, Utc};

/// Source of the wall-clock timestamps stamped onto new records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// ISO-8601 UTC with millisecond precision, e.g. `2024-10-01T12:00:00.000Z`.
    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
