//! The error kinds every driver and the session pipeline report through.
//!
//! The variant set mirrors the error kinds enumerated for the framework:
//! `generic`, `invalid-arg`, `io`, `not-applicable`, `device-closed`,
//! `timeout`, `checksum`, `samplerate`, `channel-group`, and
//! `unsupported-device`. There is no `ok` variant; success is `Ok(())`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Catch-all for conditions that don't fit a more specific kind.
    #[error("{0}")]
    Generic(String),

    /// A caller-supplied argument (key, value, index, channel group) was malformed.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A transport-level failure: a broken serial link, a USB stall, or a
    /// remote device reporting a protocol error.
    #[error("i/o error: {0}")]
    Io(String),

    /// The key is not recognized by this driver.
    #[error("key not applicable to this driver")]
    NotApplicable,

    /// The addressed device is not in the `active` state.
    #[error("device is not open")]
    DeviceClosed,

    /// A blocking transport read or transfer exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A framed-binary packet failed its checksum.
    #[error("checksum mismatch")]
    Checksum,

    /// The requested sample rate is not achievable on the current link.
    #[error("unsupported sample rate")]
    Samplerate,

    /// The channel group argument does not apply to the given key or device.
    #[error("invalid channel group")]
    ChannelGroup,

    /// `scan` found a device this driver cannot drive (identification
    /// succeeded but the model/protocol version is unsupported).
    #[error("unsupported device")]
    UnsupportedDevice,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<tokio_serial::Error> for Error {
    fn from(e: tokio_serial::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => Error::Timeout,
            other => Error::Io(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Generic(e.to_string())
    }
}
