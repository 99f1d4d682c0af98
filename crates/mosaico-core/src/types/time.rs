use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Sentinel value to represent the positive unbounded timestamp
const TIMESTAMP_UB_POS_SENTINEL: i64 = i64::MAX;
/// Sentinel value to represent the negative unbounded timestamp
const TIMESTAMP_UB_NEG_SENTINEL: i64 = i64::MIN;

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("nanoseconds must be in [0, 1e9), got {0}")]
    NanosecOutOfRange(i64),
}

/// Timestamp format used by mosaico, nanosecond units since the Unix epoch.
///
/// The unbounded sentinels mark half-open time ranges on the wire and double
/// as the "no row peeked" value of an exhausted topic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Returns the current system time as a nanosecond-precision UTC timestamp.
    ///
    /// # Panics
    ///
    /// This function will panic if the system clock is set to a time prior to the
    /// Unix Epoch (January 1, 1970).
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect(
                "unable to retrieve system time from unix epoch, the Beatles are still together?",
            )
            .as_nanos() as i64;
        Self(now)
    }

    pub fn is_unbounded_pos(&self) -> bool {
        self.0 == TIMESTAMP_UB_POS_SENTINEL
    }

    pub fn is_unbounded_neg(&self) -> bool {
        self.0 == TIMESTAMP_UB_NEG_SENTINEL
    }

    pub fn is_unbounded(&self) -> bool {
        self.is_unbounded_pos() || self.is_unbounded_neg()
    }

    /// Returns a positive unbounded timestamp value
    pub fn unbounded_pos() -> Self {
        Self(TIMESTAMP_UB_POS_SENTINEL)
    }

    /// Returns a negative unbounded timestamp value
    pub fn unbounded_neg() -> Self {
        Self(TIMESTAMP_UB_NEG_SENTINEL)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unbounded_pos() {
            return write!(f, "+unbounded");
        } else if self.is_unbounded_neg() {
            return write!(f, "-unbounded");
        }
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<Timestamp> for DateTime {
    fn from(value: Timestamp) -> Self {
        Self(chrono::DateTime::<chrono::Utc>::from_timestamp_nanos(
            value.0,
        ))
    }
}

/// High-precision split-second time: integer seconds plus an unsigned
/// sub-second nanosecond component, as used by the acquisition header.
///
/// Keeping the two components separate avoids the precision loss of packing
/// a full nanosecond epoch into a 64-bit float.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    sec: i64,
    nanosec: u32,
}

impl Time {
    /// Builds a `Time`, rejecting nanosecond components outside `[0, 1e9)`.
    pub fn new(sec: i64, nanosec: i64) -> Result<Self, TimeError> {
        if !(0..NANOS_PER_SEC).contains(&nanosec) {
            return Err(TimeError::NanosecOutOfRange(nanosec));
        }
        Ok(Self {
            sec,
            nanosec: nanosec as u32,
        })
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nanosec(&self) -> u32 {
        self.nanosec
    }

    /// Builds a `Time` from float seconds since the epoch.
    ///
    /// Negative inputs borrow from the seconds component so the nanosecond
    /// part stays unsigned (`-1.5` becomes `sec = -2, nanosec = 5e8`).
    pub fn from_float(ftime: f64) -> Self {
        let sec = ftime.floor();
        let mut nanosec = ((ftime - sec) * 1e9).round() as i64;
        let mut sec = sec as i64;

        // Rounding may push the fractional part to a full second
        if nanosec >= NANOS_PER_SEC {
            sec += 1;
            nanosec = 0;
        }

        Self {
            sec,
            nanosec: nanosec as u32,
        }
    }

    pub fn from_nanoseconds(total_nanoseconds: i64) -> Self {
        Self {
            sec: total_nanoseconds.div_euclid(NANOS_PER_SEC),
            nanosec: total_nanoseconds.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_milliseconds(total_milliseconds: i64) -> Self {
        Self {
            sec: total_milliseconds.div_euclid(1_000),
            nanosec: (total_milliseconds.rem_euclid(1_000) * 1_000_000) as u32,
        }
    }

    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self::from_nanoseconds(dt.timestamp_nanos_opt().unwrap_or_default())
    }

    /// Returns the current system time (UTC).
    pub fn now() -> Self {
        Self::from_datetime(chrono::Utc::now())
    }

    /// Converts to float seconds. Precision loss possible beyond ~2^52 ns.
    pub fn to_float(&self) -> f64 {
        self.sec as f64 + self.nanosec as f64 * 1e-9
    }

    /// Converts to total nanoseconds. Exact for the whole i64 range.
    pub fn to_nanoseconds(&self) -> i64 {
        self.sec.wrapping_mul(NANOS_PER_SEC).wrapping_add(self.nanosec as i64)
    }

    pub fn to_milliseconds(&self) -> i64 {
        self.sec * 1_000 + (self.nanosec / 1_000_000) as i64
    }

    pub fn to_datetime(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::from_timestamp_nanos(self.to_nanoseconds())
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nanosec)
    }
}

/// `DateTime` format used by mosaico
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime(chrono::DateTime<chrono::Utc>);

impl DateTime {
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Parses the RFC 3339 / ISO 8601 creation instants returned by the
    /// `*_system_info` actions.
    pub fn parse(value: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&chrono::Utc)))
    }

    pub fn inner(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DateTime {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
