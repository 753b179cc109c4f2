//! The process-wide driver registry (§5, and §14 of the expanded spec).
//!
//! Driver descriptors and handles are registered once at process init
//! and live for the process's lifetime. `scan`/`dev_list` only need read
//! access to this table; opening or closing a device contends on that
//! driver's own internal state, never on the registry itself, so
//! unrelated drivers never block each other.

use std::sync::{OnceLock, RwLock};

use crate::driver::DriverHandle;

static REGISTRY: OnceLock<RwLock<Vec<DriverHandle>>> = OnceLock::new();

fn table() -> &'static RwLock<Vec<DriverHandle>> {
    REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

/// Registers a driver. Calling this twice for a driver with the same
/// `descriptor().name` is a logic error in the daemon's startup code;
/// the registry does not attempt to detect it beyond what a linear scan
/// of names below would reveal to a caller that checks first.
pub fn register(driver: DriverHandle) {
    table().write().expect("driver registry lock poisoned").push(driver);
}

/// Looks up a registered driver by its stable short name.
pub fn lookup(name: &str) -> Option<DriverHandle> {
    table()
        .read()
        .expect("driver registry lock poisoned")
        .iter()
        .find(|d| d.descriptor().name == name)
        .cloned()
}

/// Returns every registered driver, in registration order.
pub fn all() -> Vec<DriverHandle> {
    table().read().expect("driver registry lock poisoned").clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DeviceId, DeviceInfo, Driver, DriverDescriptor, ScanOptions};
    use crate::key::Key;
    use crate::packet::FeedSink;
    use crate::value::Value;
    use async_trait::async_trait;

    struct NoopDriver;

    const DESC: DriverDescriptor = DriverDescriptor {
        name: "registry-test-noop",
        long_name: "Registry test no-op driver",
        protocol_version: 1,
    };

    #[async_trait]
    impl Driver for NoopDriver {
        fn descriptor(&self) -> &'static DriverDescriptor {
            &DESC
        }
        async fn init(&self) -> crate::Result<()> {
            Ok(())
        }
        async fn cleanup(&self) -> crate::Result<()> {
            Ok(())
        }
        async fn scan(&self, _options: ScanOptions) -> crate::Result<Vec<DeviceId>> {
            Ok(vec![])
        }
        fn dev_list(&self) -> Vec<DeviceInfo> {
            vec![]
        }
        async fn dev_open(&self, _dev: DeviceId) -> crate::Result<()> {
            Ok(())
        }
        async fn dev_close(&self, _dev: DeviceId) -> crate::Result<()> {
            Ok(())
        }
        async fn dev_clear(&self) -> crate::Result<()> {
            Ok(())
        }
        async fn config_get(
            &self,
            _key: Key,
            _dev: DeviceId,
            _group: Option<crate::driver::GroupId>,
        ) -> crate::Result<Value> {
            Err(crate::Error::NotApplicable)
        }
        async fn config_set(
            &self,
            _key: Key,
            _value: Value,
            _dev: DeviceId,
            _group: Option<crate::driver::GroupId>,
        ) -> crate::Result<()> {
            Err(crate::Error::NotApplicable)
        }
        async fn config_list(
            &self,
            _key: Key,
            _dev: DeviceId,
            _group: Option<crate::driver::GroupId>,
        ) -> crate::Result<Value> {
            Err(crate::Error::NotApplicable)
        }
        async fn acquisition_start(&self, _dev: DeviceId, _sink: FeedSink) -> crate::Result<()> {
            Ok(())
        }
        async fn acquisition_stop(&self, _dev: DeviceId) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_then_lookup_finds_driver_by_name() {
        register(std::sync::Arc::new(NoopDriver));
        assert!(lookup("registry-test-noop").is_some());
        assert!(lookup("does-not-exist").is_none());
    }
}
