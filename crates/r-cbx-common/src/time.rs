//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Conversions between the whole-second durations carried on the UI wire and
//! the signed [`TimeDelta`] used internally. Negative spans are legal and are
//! passed through untouched.

use chrono::TimeDelta;

/// Largest magnitude, in seconds, representable by [`TimeDelta`].
pub const MAX_WIRE_SECS: i64 = i64::MAX / 1_000;

/// Convert a whole-second wire value into a duration, saturating at the
/// representable range.
pub fn duration_from_wire_secs(secs: i64) -> TimeDelta {
    TimeDelta::seconds(secs.clamp(-MAX_WIRE_SECS, MAX_WIRE_SECS))
}

/// Convert a floating point wire value into a duration. The fractional part is
/// truncated toward zero; NaN maps to zero.
pub fn duration_from_wire_value(value: f64) -> TimeDelta {
    // `as` saturates on overflow and maps NaN to 0.
    duration_from_wire_secs(value.trunc() as i64)
}

/// Convert a duration into whole seconds for the wire, truncating toward zero.
pub fn duration_to_wire_secs(duration: TimeDelta) -> i64 {
    duration.num_seconds()
}
