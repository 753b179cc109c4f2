//! The session pipeline (§4.6, §5): the process-wide invariant that
//! exactly one session may drive a given device at a time, and the
//! per-session lifecycle that starts acquisitions and tears them down
//! in an orderly way on `stop`.
//!
//! Grounded in the daemon's `core::State::run` select loop: a session
//! here plays the same role `State` does there, holding a table of live
//! devices and reacting to a stop signal instead of a request channel,
//! since this framework's "requests" are direct `Driver` trait calls
//! rather than messages routed through a core task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::Notify;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use instrument_api::driver::{DeviceId, DriverHandle};
use instrument_api::packet::FeedSink;
use instrument_api::{Error, Result};

/// Process-wide set of `(driver name, device id)` pairs currently
/// claimed by a session. A transport handle belongs to exactly one
/// device instance (§5), and a device instance belongs to exactly one
/// session; this table is the process-global lock that enforces the
/// second half of that rule across sessions running in separate host
/// threads.
static CLAIMED: OnceLock<Mutex<HashSet<(&'static str, DeviceId)>>> = OnceLock::new();

fn claims() -> &'static Mutex<HashSet<(&'static str, DeviceId)>> {
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A held claim on one device. Dropping it releases the device so
/// another session may claim it.
struct DeviceClaim {
    driver: DriverHandle,
    driver_name: &'static str,
    dev: DeviceId,
}

impl DeviceClaim {
    fn take(driver: DriverHandle, dev: DeviceId) -> Result<Self> {
        let name = driver.descriptor().name;
        let mut table = claims().lock().expect("device claim table lock poisoned");
        if !table.insert((name, dev)) {
            return Err(Error::Generic(format!(
                "device {dev:?} on driver {name} is already claimed by another session"
            )));
        }
        Ok(DeviceClaim { driver, driver_name: name, dev })
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        claims().lock().expect("device claim table lock poisoned").remove(&(self.driver_name, self.dev));
    }
}

/// One session: a named, single-threaded-cooperative owner of zero or
/// more active device acquisitions. Per §5, a process may host several
/// of these concurrently, each typically pinned to its own host thread.
pub struct Session {
    name: String,
    active: Vec<DeviceClaim>,
    stop_requested: Arc<Notify>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Session { name: name.into(), active: Vec::new(), stop_requested: Arc::new(Notify::new()) }
    }

    /// Claims `dev`, opens it, and starts its acquisition feeding
    /// `sink`. On any failure after the claim is taken, the claim is
    /// released before returning the error.
    pub async fn start_device(&mut self, driver: DriverHandle, dev: DeviceId, sink: FeedSink) -> Result<()> {
        let claim = DeviceClaim::take(Arc::clone(&driver), dev)?;

        if let Err(e) = driver.dev_open(dev).await {
            drop(claim);
            return Err(e);
        }
        if let Err(e) = driver.acquisition_start(dev, sink).await {
            let _ = driver.dev_close(dev).await;
            drop(claim);
            return Err(e);
        }

        info!(session = %self.name, device = dev.0, driver = claim.driver_name, "acquisition started");
        self.active.push(claim);
        Ok(())
    }

    /// Blocks until `request_stop` is called from another task, logging
    /// inside the session's own span the way the daemon's core task runs
    /// inside `info_span!("core")`.
    pub async fn run(&self) {
        async {
            info!(session = %self.name, "session running");
            self.stop_requested.notified().await;
            info!(session = %self.name, "stop requested, exiting run loop");
        }
        .instrument(info_span!("session", name = %self.name))
        .await
    }

    /// Wakes a concurrently-running `run()`. Idempotent: calling it more
    /// than once, or with no `run()` in flight, is harmless.
    pub fn request_stop(&self) {
        self.stop_requested.notify_waiters();
    }

    /// Stops every active device's acquisition and releases its claim.
    /// Tolerant of individual driver failures: a failure on one device
    /// does not prevent the rest from being torn down.
    pub async fn stop(&mut self) {
        for claim in self.active.drain(..) {
            if let Err(e) = claim.driver.acquisition_stop(claim.dev).await {
                warn!(session = %self.name, device = claim.dev.0, ?e, "acquisition_stop failed during session shutdown");
            }
            let _ = claim.driver.dev_close(claim.dev).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use instrument_api::driver::{
        ChannelGroup, DeviceInfo, DeviceStatus, Driver, DriverDescriptor, GroupId, ScanOptions,
    };
    use instrument_api::key::Key;
    use instrument_api::value::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DESC: DriverDescriptor =
        DriverDescriptor { name: "session-test-driver", long_name: "test", protocol_version: 1 };

    struct StubDriver {
        started: AtomicBool,
        stopped: AtomicBool,
    }

    impl StubDriver {
        fn new() -> Arc<Self> {
            Arc::new(StubDriver { started: AtomicBool::new(false), stopped: AtomicBool::new(false) })
        }
    }

    #[async_trait]
    impl Driver for StubDriver {
        fn descriptor(&self) -> &'static DriverDescriptor {
            &DESC
        }
        async fn init(&self) -> Result<()> {
            Ok(())
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
        async fn scan(&self, _options: ScanOptions) -> Result<Vec<DeviceId>> {
            Ok(vec![DeviceId(0)])
        }
        fn dev_list(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                id: DeviceId(0),
                vendor: "stub".into(),
                model: "stub".into(),
                version: "1".into(),
                serial_number: None,
                conn: None,
                status: DeviceStatus::Inactive,
                channels: vec![],
                channel_groups: vec![ChannelGroup::new(GroupId(0), "g", vec![0]).unwrap()],
                scanned_at: chrono::Utc::now(),
            }]
        }
        async fn dev_open(&self, _dev: DeviceId) -> Result<()> {
            Ok(())
        }
        async fn dev_close(&self, _dev: DeviceId) -> Result<()> {
            Ok(())
        }
        async fn dev_clear(&self) -> Result<()> {
            Ok(())
        }
        async fn config_get(&self, _key: Key, _dev: DeviceId, _group: Option<GroupId>) -> Result<Value> {
            Err(Error::NotApplicable)
        }
        async fn config_set(&self, _key: Key, _value: Value, _dev: DeviceId, _group: Option<GroupId>) -> Result<()> {
            Err(Error::NotApplicable)
        }
        async fn config_list(&self, _key: Key, _dev: DeviceId, _group: Option<GroupId>) -> Result<Value> {
            Err(Error::NotApplicable)
        }
        async fn acquisition_start(&self, _dev: DeviceId, _sink: FeedSink) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn acquisition_stop(&self, _dev: DeviceId) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_second_session_cannot_claim_an_already_claimed_device() {
        let driver: DriverHandle = StubDriver::new();
        let sink: FeedSink = Arc::new(|_| {});

        let mut session_a = Session::new("a");
        session_a.start_device(Arc::clone(&driver), DeviceId(42), Arc::clone(&sink)).await.unwrap();

        let mut session_b = Session::new("b");
        let err = session_b.start_device(Arc::clone(&driver), DeviceId(42), sink).await.unwrap_err();
        assert!(matches!(err, Error::Generic(_)));

        session_a.stop().await;

        // once released, a fresh claim succeeds again
        let mut session_c = Session::new("c");
        let sink2: FeedSink = Arc::new(|_| {});
        session_c.start_device(driver, DeviceId(42), sink2).await.unwrap();
        session_c.stop().await;
    }

    #[tokio::test]
    async fn stop_tears_down_every_active_device() {
        let driver = StubDriver::new();
        let handle: DriverHandle = Arc::clone(&driver) as DriverHandle;
        let sink: FeedSink = Arc::new(|_| {});

        let mut session = Session::new("solo");
        session.start_device(handle, DeviceId(7), sink).await.unwrap();
        assert!(driver.started.load(Ordering::SeqCst));

        session.stop().await;
        assert!(driver.stopped.load(Ordering::SeqCst));
        assert!(session.active.is_empty());
    }
}
