//! The driver contract (component D): the polymorphic interface every
//! device driver exposes to the framework, plus the device/channel/
//! channel-group data model (component part of §3) that contract calls
//! operate on.
//!
//! The original design expresses this as a vtable of function pointers
//! plus an opaque `priv` pointer. Here it is a capability set: an
//! `async_trait` object (`dyn Driver`) holding all ten operations, with
//! each driver's per-instance state kept entirely behind that boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::packet::FeedSink;
use crate::transport::ConnIdent;
use crate::value::Value;
use crate::Result;

/// Configuration handed to a driver at `init`, one TOML table per driver
/// instance as configured in the daemon's config file.
pub type DriverConfig = toml::value::Table;

/// A stable handle to a device owned by exactly one driver. Opaque
/// outside the driver; the driver is free to use it as an index into its
/// own device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// A stable handle to a channel group, scoped to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    Logic,
    Analog,
    DigitalPod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub index: usize,
    pub kind: ChannelType,
    pub name: String,
    pub enabled: bool,
}

/// An ordered, non-empty set of channel indices sharing configuration.
/// Construction rejects an empty set so the "may have zero channel
/// groups" case is represented by an empty `Vec<ChannelGroup>`, never a
/// degenerate group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub id: GroupId,
    pub name: String,
    pub channels: Vec<usize>,
}

impl ChannelGroup {
    pub fn new(id: GroupId, name: impl Into<String>, channels: Vec<usize>) -> Result<Self> {
        if channels.is_empty() {
            return Err(crate::Error::InvalidArg(String::from(
                "a channel group must contain at least one channel",
            )));
        }
        Ok(ChannelGroup { id, name: name.into(), channels })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Initializing,
    Inactive,
    Active,
    Stopping,
    Error,
}

/// The public snapshot of a device instance as seen by the framework and
/// the frontend -- identity, lifecycle status, and its (immutable,
/// post-open) channel topology. The transport handle and any
/// driver-private context are not exposed here; they live behind the
/// `Driver` trait object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub vendor: String,
    pub model: String,
    pub version: String,
    pub serial_number: Option<String>,
    #[serde(skip_serializing, skip_deserializing)]
    pub conn: Option<ConnIdentOwned>,
    pub status: DeviceStatus,
    pub channels: Vec<Channel>,
    pub channel_groups: Vec<ChannelGroup>,
    /// When `scan` produced this instance. Informational only -- the
    /// framework never reasons about it -- but the kind of thing a
    /// frontend listing devices wants to show, and the reason this
    /// workspace keeps `chrono` in its dependency stack.
    pub scanned_at: chrono::DateTime<chrono::Utc>,
}

/// `ConnIdent` stored for display/equality purposes on a `DeviceInfo`
/// snapshot; not serialized since it's a transport-layer detail.
pub type ConnIdentOwned = ConnIdent;

/// Options passed to `scan`: a connection hint (`conn=...`) and, for
/// serial devices, a `serialcomm` string. Both are optional; a driver
/// that requires one for its bus type rejects a scan missing it with
/// `invalid-arg`.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub conn: Option<String>,
    pub serialcomm: Option<String>,
}

impl ScanOptions {
    /// Parses `key=value` pairs such as `"conn=/dev/ttyUSB0"` the way the
    /// daemon's config loader hands them to a driver's `scan`.
    pub fn parse(options: &str) -> Self {
        let mut out = ScanOptions::default();
        for pair in options.split_whitespace() {
            if let Some((k, v)) = pair.split_once('=') {
                match k {
                    "conn" => out.conn = Some(v.to_string()),
                    "serialcomm" => out.serialcomm = Some(v.to_string()),
                    _ => {}
                }
            }
        }
        out
    }
}

/// Every driver implements `Driver`. Variants of the capability set --
/// serial-based vs USB-based -- share this single trait and differ only
/// in what they do with the transport leaf internally.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The driver's stable short name, long name, and protocol version.
    fn descriptor(&self) -> &'static DriverDescriptor;

    /// One-shot per process. Allocates the driver-level context holding
    /// the device list. Calling this more than once on the same driver
    /// instance is a caller error; drivers are not required to detect it.
    async fn init(&self) -> Result<()>;

    /// Releases everything `init` allocated. Implicitly calls
    /// `dev_clear`.
    async fn cleanup(&self) -> Result<()>;

    /// Inspects the bus(es) and produces a list of inactive device
    /// instances, appending to the driver's in-memory device list.
    async fn scan(&self, options: ScanOptions) -> Result<Vec<DeviceId>>;

    /// Returns the driver's current in-memory device list. Pure.
    fn dev_list(&self) -> Vec<DeviceInfo>;

    /// Opens the transport for `dev`. An already-active device is an
    /// error.
    async fn dev_open(&self, dev: DeviceId) -> Result<()>;

    /// Closes the transport for `dev`. Idempotent: closing an already
    /// inactive device returns `Ok(())`.
    async fn dev_close(&self, dev: DeviceId) -> Result<()>;

    /// Frees all device instances belonging to this driver, closing any
    /// that are still open first.
    async fn dev_clear(&self) -> Result<()>;

    async fn config_get(&self, key: Key, dev: DeviceId, group: Option<GroupId>) -> Result<Value>;

    async fn config_set(
        &self,
        key: Key,
        value: Value,
        dev: DeviceId,
        group: Option<GroupId>,
    ) -> Result<()>;

    async fn config_list(&self, key: Key, dev: DeviceId, group: Option<GroupId>) -> Result<Value>;

    /// Starts an acquisition. `sink` is the channel through which the
    /// driver pushes the data-feed packet stream to the frontend.
    async fn acquisition_start(&self, dev: DeviceId, sink: FeedSink) -> Result<()>;

    /// Requests that the acquisition on `dev` stop. Must tolerate being
    /// called re-entrantly from inside a data callback: in that case it
    /// marks a pending-stop flag and returns, and the event loop performs
    /// the actual teardown at its next iteration.
    async fn acquisition_stop(&self, dev: DeviceId) -> Result<()>;
}

/// Immutable metadata describing a supported protocol family. Exactly
/// one exists per driver in the registry, created at process init and
/// alive for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct DriverDescriptor {
    pub name: &'static str,
    pub long_name: &'static str,
    pub protocol_version: u32,
}

/// A reference-counted handle to a driver, as stored in the process-wide
/// registry (§14 of the expanded spec).
pub type DriverHandle = Arc<dyn Driver>;
