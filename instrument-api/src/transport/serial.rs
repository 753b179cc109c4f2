//! The serial endpoint: a blocking-shaped read with a per-byte timeout
//! derived from the link bitrate, a blocking write, flush, and
//! open/close, built on `tokio-serial`.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, trace};

use crate::{Error, Result};

/// A parsed `serialcomm` string: `<bitrate>/<bits><parity><stop>[/flow=<0|1>][/rts=<0|1>][/dtr=<0|1>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub bitrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub rts: Option<bool>,
    pub dtr: Option<bool>,
}

impl SerialSettings {
    /// Bits on the wire per byte, including the start bit, the parity
    /// bit (if any) and the stop bit(s). Used to derive byte-times.
    pub fn bits_per_byte(&self) -> u32 {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = if matches!(self.parity, Parity::None) { 0 } else { 1 };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        1 + data + parity + stop
    }

    pub fn byte_time(&self) -> Duration {
        Duration::from_secs_f64(self.bits_per_byte() as f64 / self.bitrate as f64)
    }

    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split('/');

        let bitrate: u32 = parts
            .next()
            .ok_or_else(|| Error::InvalidArg(String::from("empty serialcomm string")))?
            .parse()
            .map_err(|_| Error::InvalidArg(format!("bad bitrate in {spec}")))?;

        let frame = parts
            .next()
            .ok_or_else(|| Error::InvalidArg(format!("missing data/parity/stop in {spec}")))?;
        let mut chars = frame.chars();
        let data_bits = match chars.next() {
            Some('5') => DataBits::Five,
            Some('6') => DataBits::Six,
            Some('7') => DataBits::Seven,
            Some('8') => DataBits::Eight,
            _ => return Err(Error::InvalidArg(format!("bad data bits in {spec}"))),
        };
        let parity = match chars.next() {
            Some('n') | Some('N') => Parity::None,
            Some('e') | Some('E') => Parity::Even,
            Some('o') | Some('O') => Parity::Odd,
            _ => return Err(Error::InvalidArg(format!("bad parity in {spec}"))),
        };
        let stop_bits = match chars.next() {
            Some('1') => StopBits::One,
            Some('2') => StopBits::Two,
            _ => return Err(Error::InvalidArg(format!("bad stop bits in {spec}"))),
        };

        let mut flow_control = FlowControl::None;
        let mut rts = None;
        let mut dtr = None;

        for opt in parts {
            let (k, v) = opt
                .split_once('=')
                .ok_or_else(|| Error::InvalidArg(format!("malformed option {opt} in {spec}")))?;
            match k {
                "flow" => {
                    flow_control = match v {
                        "0" => FlowControl::None,
                        "1" => FlowControl::Hardware,
                        _ => return Err(Error::InvalidArg(format!("bad flow value in {spec}"))),
                    }
                }
                "rts" => rts = Some(v == "1"),
                "dtr" => dtr = Some(v == "1"),
                _ => return Err(Error::InvalidArg(format!("unknown option {k} in {spec}"))),
            }
        }

        Ok(SerialSettings {
            bitrate,
            data_bits,
            parity,
            stop_bits,
            flow_control,
            rts,
            dtr,
        })
    }
}

/// An idle threshold of roughly three byte-times, used by `read_chars`
/// to decide a variable-length response has finished arriving.
const IDLE_BYTE_TIMES: u32 = 3;

/// Anything that can stand in for a serial link: a real
/// `tokio_serial::SerialStream` in production, or an in-memory duplex
/// pipe in tests.
pub trait SerialIo: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> SerialIo for T {}

pub struct SerialEndpoint {
    path: String,
    settings: SerialSettings,
    port: Option<Box<dyn SerialIo>>,
    mock: bool,
}

impl SerialEndpoint {
    pub fn new(path: impl Into<String>, settings: SerialSettings) -> Self {
        SerialEndpoint { path: path.into(), settings, port: None, mock: false }
    }

    /// Builds an endpoint already "open" over a caller-supplied
    /// transport, bypassing the real `tokio-serial` open call. Used by
    /// driver tests to script canned responses through an in-memory
    /// duplex pipe (see `tokio::io::duplex`).
    pub fn with_io(path: impl Into<String>, settings: SerialSettings, io: Box<dyn SerialIo>) -> Self {
        SerialEndpoint { path: path.into(), settings, port: Some(io), mock: true }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn settings(&self) -> SerialSettings {
        self.settings
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// True for an endpoint built with [`SerialEndpoint::with_io`]. A
    /// driver uses this to decide whether "closing" after a scan probe
    /// should drop the transport (real hardware) or keep the same
    /// in-memory pipe alive for a subsequent `dev_open` (tests).
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn open(&mut self) -> Result<()> {
        let builder = tokio_serial::new(&self.path, self.settings.bitrate)
            .data_bits(self.settings.data_bits)
            .parity(self.settings.parity)
            .stop_bits(self.settings.stop_bits)
            .flow_control(self.settings.flow_control);

        let mut stream = builder.open_native_async()?;

        if let Some(rts) = self.settings.rts {
            stream.write_request_to_send(rts)?;
        }
        if let Some(dtr) = self.settings.dtr {
            stream.write_data_terminal_ready(dtr)?;
        }

        debug!(path = %self.path, bitrate = self.settings.bitrate, "serial port opened");
        self.port = Some(Box::new(stream));
        Ok(())
    }

    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialIo>> {
        self.port.as_mut().ok_or(Error::DeviceClosed)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.port_mut()?.write_all(buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.port_mut()?.flush().await?;
        Ok(())
    }

    /// Reads up to `count` bytes. `timeout` of `Duration::ZERO` means
    /// "compute a default from the expected byte count and the link
    /// bitrate." Returns early, with whatever has arrived so far, if an
    /// inter-byte idle period exceeds roughly three byte-times after at
    /// least one byte has arrived -- this is what lets a probe read a
    /// variable-length response without knowing its exact size. If no
    /// bytes arrive within the initial timeout the result is an empty,
    /// non-error buffer.
    pub async fn read_chars(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>> {
        let settings = self.settings;
        let overall_timeout = if timeout.is_zero() {
            settings.byte_time() * (count as u32).max(1) + Duration::from_millis(50)
        } else {
            timeout
        };
        let idle_timeout = settings.byte_time() * IDLE_BYTE_TIMES;

        let port = self.port_mut()?;
        let mut out = Vec::with_capacity(count);
        let deadline = Instant::now() + overall_timeout;
        let mut byte = [0u8; 1];

        loop {
            if out.len() >= count {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_byte_budget = if out.is_empty() { remaining } else { idle_timeout.min(remaining) };

            if per_byte_budget.is_zero() {
                break;
            }

            match tokio::time::timeout(per_byte_budget, port.read_exact(&mut byte)).await {
                Ok(Ok(_)) => out.push(byte[0]),
                Ok(Err(e)) => return Err(Error::from(e)),
                Err(_elapsed) => {
                    trace!(got = out.len(), wanted = count, "read_chars idle timeout");
                    break;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spec() {
        let s = SerialSettings::parse("115200/8n1/flow=1").unwrap();
        assert_eq!(s.bitrate, 115_200);
        assert_eq!(s.data_bits, DataBits::Eight);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.stop_bits, StopBits::One);
        assert_eq!(s.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn parses_minimal_spec() {
        let s = SerialSettings::parse("1200/7e1").unwrap();
        assert_eq!(s.bitrate, 1200);
        assert_eq!(s.data_bits, DataBits::Seven);
        assert_eq!(s.parity, Parity::Even);
    }

    #[test]
    fn rejects_bad_bitrate() {
        assert!(SerialSettings::parse("abc/8n1").is_err());
    }

    #[test]
    fn bits_per_byte_accounts_for_parity_and_stop() {
        let s = SerialSettings::parse("9600/8e2").unwrap();
        assert_eq!(s.bits_per_byte(), 1 + 8 + 1 + 2);
    }

    #[tokio::test]
    async fn read_chars_returns_early_on_short_reply() {
        let settings = SerialSettings::parse("115200/8n1").unwrap();
        let (client, mut server) = tokio::io::duplex(64);
        let mut endpoint = SerialEndpoint::with_io("mock", settings, Box::new(client));

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(b"OK\r\n").await.unwrap();
        });

        let out = endpoint.read_chars(64, Duration::from_millis(50)).await.unwrap();
        assert_eq!(out, b"OK\r\n");
    }

    #[tokio::test]
    async fn read_chars_returns_empty_when_nothing_arrives() {
        let settings = SerialSettings::parse("115200/8n1").unwrap();
        let (client, _server) = tokio::io::duplex(64);
        let mut endpoint = SerialEndpoint::with_io("mock", settings, Box::new(client));

        let out = endpoint.read_chars(16, Duration::from_millis(20)).await.unwrap();
        assert!(out.is_empty());
    }
}
