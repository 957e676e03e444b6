// libs/consultation-cell/src/clock.rs
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

use crate::models::ConsultationError;

/// Time source behind every scheduling decision. Injected so the sweeper and
/// lifecycle guards can be exercised at fixed instants in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock plus the clinic's fixed civil timezone (WIB, UTC+7 by default).
/// Every schedule entering the system is normalized to UTC here; clinic-local
/// time is only ever produced for display and notifications.
#[derive(Clone)]
pub struct ClinicClock {
    clock: Arc<dyn Clock>,
    tz: FixedOffset,
}

impl ClinicClock {
    pub fn new(clock: Arc<dyn Clock>, utc_offset_hours: i32) -> Self {
        let clamped = utc_offset_hours.clamp(-23, 23);
        // In range after clamping, east_opt cannot fail.
        let tz = FixedOffset::east_opt(clamped * 3600).unwrap();
        Self { clock, tz }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.tz)
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.tz)
    }

    /// Parses an ISO-8601 timestamp with explicit offset and normalizes it to
    /// UTC. Malformed input is rejected before anything is written.
    pub fn parse_schedule(&self, raw: &str) -> Result<DateTime<Utc>, ConsultationError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|e| ConsultationError::InvalidSchedule(format!("{}: {}", raw, e)))
    }
}
