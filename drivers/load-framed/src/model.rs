//! Wire-level constants for the framed-binary electronic load: command
//! codes, data-field offsets within a frame's 22-byte payload, the
//! bitrate fallback list used during scan, and the fixed sample-rate
//! table.

/// Command codes. Chosen consistently between request and response
/// builders in this driver; the protocol itself does not standardize
/// these across vendors, so the exact values are this driver's own.
pub const CMD_GET_MODEL_INFO: u8 = 0x30;
pub const CMD_GET_LOAD_LIMITS: u8 = 0x31;
pub const CMD_GET_STATUS: u8 = 0x32;
pub const CMD_SET_PARAM: u8 = 0x33;

/// Parameter ids used with `CMD_SET_PARAM`'s first data byte.
pub const PARAM_CURRENT_LIMIT: u8 = 1;
pub const PARAM_VOLTAGE_TARGET: u8 = 2;
pub const PARAM_ENABLED: u8 = 3;
pub const PARAM_OVP_THRESHOLD: u8 = 4;
pub const PARAM_OVP_ENABLED: u8 = 5;
pub const PARAM_OCP_THRESHOLD: u8 = 6;
pub const PARAM_OCP_ENABLED: u8 = 7;

/// `get-model-info` response payload layout within the 22 data bytes.
pub const MODEL_NAME_OFFSET: usize = 0;
pub const MODEL_NAME_LEN: usize = 5;
pub const SERIAL_OFFSET: usize = 7;
pub const SERIAL_LEN: usize = 9;
pub const FIRMWARE_OFFSET: usize = 16;

/// `get-load-limits` response payload layout: five little-endian u32
/// fields, scaled the same way as the live measurements.
pub const LIMITS_MAX_CURRENT_OFFSET: usize = 0;
pub const LIMITS_MAX_VOLTAGE_OFFSET: usize = 4;
pub const LIMITS_MIN_VOLTAGE_OFFSET: usize = 8;
pub const LIMITS_MAX_POWER_OFFSET: usize = 12;
pub const LIMITS_MAX_RESISTANCE_OFFSET: usize = 16;

/// `get-status` response payload layout: one status byte followed by
/// three little-endian u32 scaled readings.
pub const STATUS_BYTE_OFFSET: usize = 0;
pub const STATUS_VOLTAGE_OFFSET: usize = 1;
pub const STATUS_CURRENT_OFFSET: usize = 5;
pub const STATUS_POWER_OFFSET: usize = 9;

/// Scaling divisors (§4.5.2): voltage/1000, current/10000, power/1000.
pub const VOLTAGE_DIVISOR: f64 = 1_000.0;
pub const CURRENT_DIVISOR: f64 = 10_000.0;
pub const POWER_DIVISOR: f64 = 1_000.0;

/// Bitrates tried in order during `scan`, most to least likely.
pub const BITRATE_FALLBACK: &[u32] = &[9600, 38400, 19200, 4800];

/// The fixed sample-rate table in Hz; `config_list(samplerate)`
/// enumerates the subset at or below the link's safe maximum.
pub const SAMPLE_RATE_TABLE: &[u64] = &[1, 2, 5, 10, 15, 20, 30, 40, 50, 60];

/// Derives the safe maximum sample rate for a link running at
/// `bitrate`, per §4.5.2: `bitrate * 15 / 9600`, capped at 60 Hz.
pub fn safe_max_sample_rate(bitrate: u32) -> u64 {
    let derived = (bitrate as u64 * 15) / 9600;
    derived.min(60)
}

/// The subset of [`SAMPLE_RATE_TABLE`] at or below `max_rate`.
pub fn allowed_sample_rates(max_rate: u64) -> Vec<u64> {
    SAMPLE_RATE_TABLE.iter().copied().filter(|&r| r <= max_rate).collect()
}
