//! The transport layer (component C): a serial endpoint and a USB
//! endpoint sharing the same open/close/read/write lifecycle shape so
//! drivers can be written against whichever one their instrument family
//! uses.

pub mod serial;
pub mod usb;

pub use serial::{SerialEndpoint, SerialSettings};
pub use usb::{UsbEndpoint, UsbFilter};

/// A stable identifier for a connection, used to detect two drivers
/// racing to claim the same transport and to label devices for the
/// `conn` configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnIdent {
    Serial(String),
    Usb { bus: u8, address: u8 },
}

impl std::fmt::Display for ConnIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnIdent::Serial(path) => write!(f, "{path}"),
            ConnIdent::Usb { bus, address } => write!(f, "{bus}.{address}"),
        }
    }
}

/// Parses the `"VID.PID"` or `"VID.PID/bus.addr"` connection hint format
/// used to scope a USB `scan`.
pub fn parse_usb_hint(hint: &str) -> crate::Result<UsbFilter> {
    let (ids, port) = match hint.split_once('/') {
        Some((ids, port)) => (ids, Some(port)),
        None => (hint, None),
    };

    let (vid, pid) = ids.split_once('.').ok_or_else(|| {
        crate::Error::InvalidArg(format!("malformed USB connection hint: {hint}"))
    })?;
    let vid = u16::from_str_radix(vid, 16)
        .map_err(|_| crate::Error::InvalidArg(format!("bad vendor id: {vid}")))?;
    let pid = u16::from_str_radix(pid, 16)
        .map_err(|_| crate::Error::InvalidArg(format!("bad product id: {pid}")))?;

    let port_path = match port {
        Some(p) => {
            let (bus, addr) = p.split_once('.').ok_or_else(|| {
                crate::Error::InvalidArg(format!("malformed bus.addr: {p}"))
            })?;
            let bus: u8 = bus
                .parse()
                .map_err(|_| crate::Error::InvalidArg(format!("bad bus: {bus}")))?;
            let addr: u8 = addr
                .parse()
                .map_err(|_| crate::Error::InvalidArg(format!("bad address: {addr}")))?;
            Some((bus, addr))
        }
        None => None,
    };

    Ok(UsbFilter { vendor_id: vid, product_id: pid, port_path })
}
