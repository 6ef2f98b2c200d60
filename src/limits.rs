use crate::model::Ms;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 256;
pub const MAX_ATTRIBUTES: usize = 64;
pub const MAX_ATTRIBUTE_LEN: usize = 1024;

/// Alternatives returned for a conflicted booking.
pub const MAX_ALTERNATIVES: usize = 5;

/// Unix epoch; nothing is booked before 1970.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single reservation may not span more than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_CHANNEL_LEN: usize = 128;
pub const MAX_LISTEN_CHANNELS: usize = 256;
