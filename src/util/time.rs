//! Wire representation of file timestamps
// (c) 2025 Ross Younger
//!
//! Timestamps travel as a signed seconds / unsigned nanoseconds pair relative
//! to the Unix epoch. Sub-second precision is preserved; times before the
//! epoch use a negative seconds value with nanoseconds counting forwards.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Splits a `SystemTime` into its wire parts.
#[allow(clippy::cast_possible_wrap)] // u64 seconds overflow i64 in year 292 billion
pub(crate) fn to_parts(t: SystemTime) -> (i64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            // Before the epoch: carry the nanoseconds so they still count forwards.
            let d = e.duration();
            let mut secs = -(d.as_secs() as i64);
            let mut nanos = d.subsec_nanos();
            if nanos > 0 {
                secs -= 1;
                nanos = NANOS_PER_SEC - nanos;
            }
            (secs, nanos)
        }
    }
}

/// Reassembles a `SystemTime` from its wire parts.
pub(crate) fn from_parts(secs: i64, nanos: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}

/// Serde adaptor for `#[serde(with = ...)]` on `SystemTime` fields.
pub(crate) mod wire {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::SystemTime;

    #[derive(Serialize, Deserialize)]
    struct Instant {
        secs: i64,
        nanos: u32,
    }

    pub(crate) fn serialize<S: Serializer>(t: &SystemTime, ser: S) -> Result<S::Ok, S::Error> {
        let (secs, nanos) = super::to_parts(*t);
        Instant { secs, nanos }.serialize(ser)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SystemTime, D::Error> {
        let i = Instant::deserialize(de)?;
        Ok(super::from_parts(i.secs, i.nanos))
    }
}
