//! The framed-binary wire format (§4.5.2, §6): a 26-byte fixed packet
//! with a one-byte preamble, address, command, 22 data bytes, and a
//! trailing checksum. Both requests and responses use the same layout;
//! a response additionally may use its command byte as a status code
//! (`0x80` success, or one of the four `io`-reportable failure codes).

use instrument_api::{Error, Result};

pub const PREAMBLE: u8 = 0xAA;
pub const FRAME_LEN: usize = 26;
pub const DATA_LEN: usize = 22;
pub const BROADCAST_ADDR: u8 = 255;

/// Response status codes that appear in place of an echoed command byte
/// when a request did not succeed.
pub const STATUS_OK: u8 = 0x80;
pub const STATUS_BAD_CHECKSUM: u8 = 0x90;
pub const STATUS_INVALID_PARAM: u8 = 0xA0;
pub const STATUS_UNKNOWN_COMMAND: u8 = 0xB0;
pub const STATUS_INVALID_COMMAND: u8 = 0xC0;

/// One 26-byte framed-binary packet, already validated (checksum
/// checked) if it came from `parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub addr: u8,
    pub cmd: u8,
    pub data: [u8; DATA_LEN],
}

impl Frame {
    pub fn new(addr: u8, cmd: u8, data: [u8; DATA_LEN]) -> Self {
        Frame { addr, cmd, data }
    }

    pub fn request(addr: u8, cmd: u8) -> Self {
        Frame::new(addr, cmd, [0u8; DATA_LEN])
    }

    /// The 8-bit arithmetic sum of bytes 0..25 of a would-be frame,
    /// computed directly from the fields rather than from an assembled
    /// buffer.
    fn checksum_of(addr: u8, cmd: u8, data: &[u8; DATA_LEN]) -> u8 {
        let mut sum = PREAMBLE.wrapping_add(addr).wrapping_add(cmd);
        for &b in data {
            sum = sum.wrapping_add(b);
        }
        sum
    }

    pub fn checksum(&self) -> u8 {
        Frame::checksum_of(self.addr, self.cmd, &self.data)
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0] = PREAMBLE;
        out[1] = self.addr;
        out[2] = self.cmd;
        out[3..25].copy_from_slice(&self.data);
        out[25] = self.checksum();
        out
    }

    /// Parses and validates a full 26-byte frame. Rejects a short
    /// buffer, a wrong preamble, or a bad checksum -- testable property
    /// #3.
    pub fn parse(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() != FRAME_LEN {
            return Err(Error::Io(format!(
                "framed-binary packet must be {FRAME_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != PREAMBLE {
            return Err(Error::Io(format!("bad preamble {:#04x}", bytes[0])));
        }

        let addr = bytes[1];
        let cmd = bytes[2];
        let mut data = [0u8; DATA_LEN];
        data.copy_from_slice(&bytes[3..25]);

        let expected = Frame::checksum_of(addr, cmd, &data);
        if bytes[25] != expected {
            return Err(Error::Checksum);
        }

        Ok(Frame { addr, cmd, data })
    }

    /// Interprets this frame as a reply to a request that used
    /// `expected_cmd`. A status byte of `STATUS_OK` (or an echo of
    /// `expected_cmd`, for devices that just mirror the command back)
    /// is success; the four documented failure codes map to `io`
    /// errors.
    pub fn check_response(&self, expected_cmd: u8) -> Result<()> {
        match self.cmd {
            STATUS_OK => Ok(()),
            c if c == expected_cmd => Ok(()),
            STATUS_BAD_CHECKSUM => Err(Error::Io(String::from("device reported checksum failure"))),
            STATUS_INVALID_PARAM => Err(Error::Io(String::from("device reported invalid parameter"))),
            STATUS_UNKNOWN_COMMAND => Err(Error::Io(String::from("device reported unknown command"))),
            STATUS_INVALID_COMMAND => Err(Error::Io(String::from("device reported invalid command"))),
            other => Err(Error::Io(format!("unexpected response status {other:#04x}"))),
        }
    }
}

/// Little-endian helpers for packing/unpacking multi-byte integer
/// fields inside a frame's 22-byte data payload.
pub fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

pub fn put_le_u32(data: &mut [u8; DATA_LEN], offset: usize, v: u32) {
    data[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}
