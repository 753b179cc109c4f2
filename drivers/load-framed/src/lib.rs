//! A framed-binary electronic-load driver (§4.5.2): fixed 26-byte
//! packets over serial, bitrate-fallback identification, a decoded
//! status-bit mirror, and a polling acquisition loop that emits V/I/P
//! triples at a sample rate bounded by the link's bitrate.

mod frame;
mod model;
mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tracing::{debug, warn};

use instrument_api::driver::{
    Channel, ChannelGroup, ChannelType, DeviceId, DeviceInfo, DeviceStatus, Driver,
    DriverDescriptor, GroupId, ScanOptions,
};
use instrument_api::key::Key;
use instrument_api::packet::{DataPacket, FeedSink, MeasurementQuantity, SampleFlags, Unit};
use instrument_api::transport::serial::SerialIo;
use instrument_api::transport::{ConnIdent, SerialEndpoint, SerialSettings};
use instrument_api::value::Value;
use instrument_api::{Error, Result};

use frame::Frame;
use model::*;
use state::LoadState;

const DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    name: "load-framed",
    long_name: "Framed-binary electronic load driver",
    protocol_version: 1,
};

const FRAME_TIMEOUT: Duration = Duration::from_millis(300);

/// Channel indices within the device's single channel group.
const CH_VOLTAGE: usize = 0;
const CH_CURRENT: usize = 1;
const CH_POWER: usize = 2;

struct DeviceSlot {
    id: DeviceId,
    addr: u8,
    bitrate: u32,
    info: StdMutex<DeviceInfo>,
    port: TokioMutex<SerialEndpoint>,
    state: TokioMutex<LoadState>,
    stop_requested: AtomicBool,
    stopped: Notify,
}

impl DeviceSlot {
    async fn exchange(&self, cmd: u8, data: [u8; frame::DATA_LEN]) -> Result<Frame> {
        let mut port = self.port.lock().await;
        let request = Frame::new(self.addr, cmd, data);
        port.write_all(&request.to_bytes()).await?;
        port.flush().await?;

        let reply = port.read_chars(frame::FRAME_LEN, FRAME_TIMEOUT).await?;
        let reply = Frame::parse(&reply)?;
        reply.check_response(cmd)?;
        Ok(reply)
    }

    async fn set_param(&self, param: u8, scaled: u32) -> Result<()> {
        let mut data = [0u8; frame::DATA_LEN];
        data[0] = param;
        frame::put_le_u32(&mut data, 1, scaled);
        self.exchange(CMD_SET_PARAM, data).await?;
        Ok(())
    }
}

fn decode_status_frame(reply: &Frame) -> (state::StatusBits, state::Measurements) {
    let status = state::StatusBits(reply.data[STATUS_BYTE_OFFSET]);
    let measurements = state::Measurements {
        voltage: frame::le_u32(&reply.data, STATUS_VOLTAGE_OFFSET) as f64 / VOLTAGE_DIVISOR,
        current: frame::le_u32(&reply.data, STATUS_CURRENT_OFFSET) as f64 / CURRENT_DIVISOR,
        power: frame::le_u32(&reply.data, STATUS_POWER_OFFSET) as f64 / POWER_DIVISOR,
    };
    (status, measurements)
}

fn decode_limits(reply: &Frame) -> state::LoadLimits {
    state::LoadLimits {
        max_current: frame::le_u32(&reply.data, LIMITS_MAX_CURRENT_OFFSET) as f64 / CURRENT_DIVISOR,
        max_voltage: frame::le_u32(&reply.data, LIMITS_MAX_VOLTAGE_OFFSET) as f64 / VOLTAGE_DIVISOR,
        min_voltage: frame::le_u32(&reply.data, LIMITS_MIN_VOLTAGE_OFFSET) as f64 / VOLTAGE_DIVISOR,
        max_power: frame::le_u32(&reply.data, LIMITS_MAX_POWER_OFFSET) as f64 / POWER_DIVISOR,
        max_resistance: frame::le_u32(&reply.data, LIMITS_MAX_RESISTANCE_OFFSET) as f64,
    }
}

/// Parses a `get-model-info` reply's model name / barcode-serial /
/// firmware fields (§4.5.2's fixed byte ranges).
fn parse_model_info(reply: &Frame) -> (String, Option<String>, String) {
    let name = String::from_utf8_lossy(&reply.data[MODEL_NAME_OFFSET..MODEL_NAME_OFFSET + MODEL_NAME_LEN])
        .trim_end_matches('\0')
        .to_string();
    let serial_bytes = &reply.data[SERIAL_OFFSET..SERIAL_OFFSET + SERIAL_LEN];
    let serial_raw = String::from_utf8_lossy(serial_bytes).trim_end_matches('\0').to_string();
    let serial = if serial_raw.is_empty() { None } else { Some(serial_raw) };
    let firmware = format!(
        "{}.{}",
        reply.data[FIRMWARE_OFFSET],
        reply.data[FIRMWARE_OFFSET + 1]
    );
    (name, serial, firmware)
}

/// The wire format's `get-model-info` reply has no separate vendor
/// field (§4.5.2 lists only a model name, a barcode-serial, and
/// firmware bytes), so the decoded model name stands in for both the
/// `vendor` and `model` fields of [`DeviceInfo`].
fn build_device_info(id: DeviceId, model_name: String, serial_number: Option<String>, version: String, conn: ConnIdent) -> DeviceInfo {
    let channels = vec![
        Channel { index: CH_VOLTAGE, kind: ChannelType::Analog, name: String::from("V"), enabled: true },
        Channel { index: CH_CURRENT, kind: ChannelType::Analog, name: String::from("I"), enabled: true },
        Channel { index: CH_POWER, kind: ChannelType::Analog, name: String::from("P"), enabled: true },
    ];
    let channel_groups = vec![ChannelGroup::new(
        GroupId(0),
        "LOAD1",
        vec![CH_VOLTAGE, CH_CURRENT, CH_POWER],
    )
    .expect("a load's channel group always has 3 channels")];

    DeviceInfo {
        id,
        vendor: model_name.clone(),
        model: model_name,
        version,
        serial_number,
        conn: Some(conn),
        status: DeviceStatus::Inactive,
        channels,
        channel_groups,
        scanned_at: chrono::Utc::now(),
    }
}

pub struct LoadFramedDriver {
    devices: StdRwLock<Vec<Arc<DeviceSlot>>>,
    mock_ports: StdMutex<HashMap<String, Box<dyn SerialIo>>>,
}

impl Default for LoadFramedDriver {
    fn default() -> Self {
        LoadFramedDriver { devices: StdRwLock::new(Vec::new()), mock_ports: StdMutex::new(HashMap::new()) }
    }
}

impl LoadFramedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only hook, same shape as `ScpiScopeDriver::inject_mock_port`:
    /// pre-registers an in-memory transport so `scan` talks to a
    /// scripted reply sequence instead of real hardware.
    pub fn inject_mock_port(&self, conn: impl Into<String>, io: Box<dyn SerialIo>) {
        self.mock_ports.lock().expect("mock port map lock poisoned").insert(conn.into(), io);
    }

    fn take_mock(&self, conn: &str) -> Option<Box<dyn SerialIo>> {
        self.mock_ports.lock().expect("mock port map lock poisoned").remove(conn)
    }

    fn slot(&self, dev: DeviceId) -> Result<Arc<DeviceSlot>> {
        self.devices
            .read()
            .expect("device list lock poisoned")
            .iter()
            .find(|d| d.id == dev)
            .cloned()
            .ok_or_else(|| Error::InvalidArg(format!("unknown device {dev:?}")))
    }

    /// Tries each bitrate in [`BITRATE_FALLBACK`] in order, sending a
    /// broadcast `get-model-info` frame and waiting for a reply.
    /// Returns the opened port, the bitrate that worked, and the
    /// identification reply.
    async fn identify(&self, conn: &str) -> Result<(SerialEndpoint, u32, Frame)> {
        for &bitrate in BITRATE_FALLBACK {
            let settings = SerialSettings::parse(&format!("{bitrate}/8n1"))?;
            let mut port = match self.take_mock(conn) {
                Some(io) => SerialEndpoint::with_io(conn, settings, io),
                None => {
                    let mut p = SerialEndpoint::new(conn, settings);
                    p.open()?;
                    p
                }
            };

            let request = Frame::request(frame::BROADCAST_ADDR, CMD_GET_MODEL_INFO);
            if port.write_all(&request.to_bytes()).await.is_err() {
                continue;
            }
            let _ = port.flush().await;

            let reply = match port.read_chars(frame::FRAME_LEN, FRAME_TIMEOUT).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };

            if let Ok(parsed) = Frame::parse(&reply) {
                if parsed.check_response(CMD_GET_MODEL_INFO).is_ok() {
                    return Ok((port, bitrate, parsed));
                }
            }

            if !port.is_mock() {
                port.close();
            }
        }

        Err(Error::Io(String::from("no electronic load responded at any fallback bitrate")))
    }
}

#[async_trait]
impl Driver for LoadFramedDriver {
    fn descriptor(&self) -> &'static DriverDescriptor {
        &DESCRIPTOR
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.dev_clear().await
    }

    async fn scan(&self, options: ScanOptions) -> Result<Vec<DeviceId>> {
        let conn = options
            .conn
            .ok_or_else(|| Error::InvalidArg(String::from("load-framed scan requires conn=<serial path>")))?;

        let (mut port, bitrate, idn_reply) = self.identify(&conn).await?;
        let (model_name, serial_number, version) = parse_model_info(&idn_reply);
        let addr = idn_reply.addr;

        let limits_request = Frame::request(addr, CMD_GET_LOAD_LIMITS);
        port.write_all(&limits_request.to_bytes()).await?;
        port.flush().await?;
        let raw = port.read_chars(frame::FRAME_LEN, FRAME_TIMEOUT).await?;
        let limits_reply = Frame::parse(&raw)?;
        limits_reply.check_response(CMD_GET_LOAD_LIMITS)?;
        let limits = decode_limits(&limits_reply);

        let safe_max = safe_max_sample_rate(bitrate);
        let mut state = LoadState::new(safe_max);
        state.limits = limits;

        let mut devices = self.devices.write().expect("device list lock poisoned");
        let id = DeviceId(devices.len() as u32);
        let info = build_device_info(id, model_name, serial_number, version, ConnIdent::Serial(conn));

        devices.push(Arc::new(DeviceSlot {
            id,
            addr,
            bitrate,
            info: StdMutex::new(info),
            port: TokioMutex::new(port),
            state: TokioMutex::new(state),
            stop_requested: AtomicBool::new(false),
            stopped: Notify::new(),
        }));

        Ok(vec![id])
    }

    fn dev_list(&self) -> Vec<DeviceInfo> {
        self.devices
            .read()
            .expect("device list lock poisoned")
            .iter()
            .map(|d| d.info.lock().expect("device info lock poisoned").clone())
            .collect()
    }

    async fn dev_open(&self, dev: DeviceId) -> Result<()> {
        let slot = self.slot(dev)?;
        {
            let info = slot.info.lock().expect("device info lock poisoned");
            if info.status == DeviceStatus::Active {
                return Err(Error::Generic(String::from("device already active")));
            }
        }
        {
            let mut port = slot.port.lock().await;
            if !port.is_open() {
                port.open()?;
            }
        }
        let reply = slot.exchange(CMD_GET_STATUS, [0u8; frame::DATA_LEN]).await?;
        let (status, measurements) = decode_status_frame(&reply);
        {
            let mut state = slot.state.lock().await;
            state.status = status;
            state.measurements = measurements;
        }
        slot.info.lock().expect("device info lock poisoned").status = DeviceStatus::Active;
        debug!(device = dev.0, addr = slot.addr, "load-framed device opened");
        Ok(())
    }

    async fn dev_close(&self, dev: DeviceId) -> Result<()> {
        let slot = self.slot(dev)?;
        let inactive = slot.info.lock().expect("device info lock poisoned").status != DeviceStatus::Active;
        if inactive {
            return Ok(());
        }
        let _ = self.acquisition_stop(dev).await;
        slot.port.lock().await.close();
        slot.info.lock().expect("device info lock poisoned").status = DeviceStatus::Inactive;
        Ok(())
    }

    async fn dev_clear(&self) -> Result<()> {
        let ids: Vec<DeviceId> =
            self.devices.read().expect("device list lock poisoned").iter().map(|d| d.id).collect();
        for id in ids {
            self.dev_close(id).await?;
        }
        self.devices.write().expect("device list lock poisoned").clear();
        Ok(())
    }

    async fn config_get(&self, key: Key, dev: DeviceId, group: Option<GroupId>) -> Result<Value> {
        let slot = self.slot(dev)?;
        if group.is_some() {
            return Err(Error::ChannelGroup);
        }
        let state = slot.state.lock().await;
        match key {
            Key::Voltage => Ok(Value::F64(state.measurements.voltage)),
            Key::Current => Ok(Value::F64(state.measurements.current)),
            Key::VoltageTarget => Ok(Value::F64(state.voltage_target)),
            Key::CurrentLimit => Ok(Value::F64(state.current_limit)),
            Key::Enabled => Ok(Value::Bool(state.status.output_enabled())),
            Key::Regulation => Ok(Value::String(state.regulation_mode().to_string())),
            Key::OverVoltageProtectionEnabled => Ok(Value::Bool(state.status.ovp_active())),
            Key::OverVoltageProtectionThreshold => Ok(Value::F64(state.ovp_threshold)),
            Key::OverCurrentProtectionEnabled => Ok(Value::Bool(state.status.ocp_enabled())),
            Key::OverCurrentProtectionThreshold => Ok(Value::F64(state.ocp_threshold)),
            Key::Samplerate => Ok(Value::U64(state.samplerate)),
            Key::LimitSamples => Ok(Value::U64(state.limit_samples.unwrap_or(0))),
            Key::LimitMsec => Ok(Value::U64(state.limit_msec.unwrap_or(0))),
            _ => Err(Error::NotApplicable),
        }
    }

    async fn config_set(&self, key: Key, value: Value, dev: DeviceId, group: Option<GroupId>) -> Result<()> {
        let slot = self.slot(dev)?;
        if group.is_some() {
            return Err(Error::ChannelGroup);
        }
        match key {
            Key::VoltageTarget => {
                let v = value.as_f64()?;
                slot.set_param(PARAM_VOLTAGE_TARGET, (v * VOLTAGE_DIVISOR) as u32).await?;
                slot.state.lock().await.voltage_target = v;
                Ok(())
            }
            Key::CurrentLimit => {
                let v = value.as_f64()?;
                slot.set_param(PARAM_CURRENT_LIMIT, (v * CURRENT_DIVISOR) as u32).await?;
                slot.state.lock().await.current_limit = v;
                Ok(())
            }
            Key::Enabled => {
                let en = value.as_bool()?;
                slot.set_param(PARAM_ENABLED, en as u32).await?;
                let mut state = slot.state.lock().await;
                state.status = state::StatusBits(if en {
                    state.status.0 | 0b0100_0000
                } else {
                    state.status.0 & !0b0100_0000
                });
                Ok(())
            }
            Key::OverVoltageProtectionThreshold => {
                let v = value.as_f64()?;
                slot.set_param(PARAM_OVP_THRESHOLD, (v * VOLTAGE_DIVISOR) as u32).await?;
                slot.state.lock().await.ovp_threshold = v;
                Ok(())
            }
            Key::OverVoltageProtectionEnabled => {
                let en = value.as_bool()?;
                slot.set_param(PARAM_OVP_ENABLED, en as u32).await?;
                Ok(())
            }
            Key::OverCurrentProtectionThreshold => {
                let v = value.as_f64()?;
                slot.set_param(PARAM_OCP_THRESHOLD, (v * CURRENT_DIVISOR) as u32).await?;
                slot.state.lock().await.ocp_threshold = v;
                Ok(())
            }
            Key::OverCurrentProtectionEnabled => {
                let en = value.as_bool()?;
                slot.set_param(PARAM_OCP_ENABLED, en as u32).await?;
                Ok(())
            }
            Key::Samplerate => {
                let rate = value.as_u64()?;
                let state_lock = slot.state.lock().await;
                let max = state_lock.safe_max_samplerate;
                drop(state_lock);
                if !allowed_sample_rates(max).contains(&rate) {
                    return Err(Error::Samplerate);
                }
                slot.state.lock().await.samplerate = rate;
                Ok(())
            }
            Key::LimitSamples => {
                slot.state.lock().await.limit_samples = Some(value.as_u64()?);
                Ok(())
            }
            Key::LimitMsec => {
                slot.state.lock().await.limit_msec = Some(value.as_u64()?);
                Ok(())
            }
            _ => Err(Error::NotApplicable),
        }
    }

    async fn config_list(&self, key: Key, dev: DeviceId, _group: Option<GroupId>) -> Result<Value> {
        let slot = self.slot(dev)?;
        match key {
            Key::Samplerate => {
                let max = slot.state.lock().await.safe_max_samplerate;
                Ok(Value::ArrayU64(allowed_sample_rates(max)))
            }
            Key::Regulation => {
                Ok(Value::ArrayString(vec!["CC".into(), "CV".into(), "CW".into(), "CR".into()]))
            }
            _ => Err(Error::NotApplicable),
        }
    }

    async fn acquisition_start(&self, dev: DeviceId, sink: FeedSink) -> Result<()> {
        let slot = self.slot(dev)?;
        {
            let info = slot.info.lock().expect("device info lock poisoned");
            if info.status != DeviceStatus::Active {
                return Err(Error::DeviceClosed);
            }
        }

        let (samplerate, limit_samples, limit_msec) = {
            let state = slot.state.lock().await;
            (state.samplerate.max(1), state.limit_samples, state.limit_msec)
        };
        let poll_interval = Duration::from_millis((1000 / samplerate).max(1));

        sink(DataPacket::Header);
        slot.stop_requested.store(false, Ordering::SeqCst);

        let slot = Arc::clone(&slot);
        tokio::spawn(async move {
            let mut limiter = instrument_api::limiter::Limiter::new(limit_samples, limit_msec);
            let mut ticker = tokio::time::interval(poll_interval);
            let mut prev_status = slot.state.lock().await.status;

            loop {
                ticker.tick().await;
                if slot.stop_requested.load(Ordering::SeqCst) {
                    break;
                }

                match slot.exchange(CMD_GET_STATUS, [0u8; frame::DATA_LEN]).await {
                    Ok(reply) => {
                        let (status, measurements) = decode_status_frame(&reply);
                        {
                            let mut state = slot.state.lock().await;
                            state.status = status;
                            state.measurements = measurements;
                        }

                        if status.changed_since(prev_status) & 0b0100_0000 != 0 {
                            sink(DataPacket::Meta(instrument_api::packet::Meta {
                                key: Key::Enabled,
                                value: Value::Bool(status.output_enabled()),
                            }));
                        }
                        if status.channel1_current_mode() != prev_status.channel1_current_mode() {
                            sink(DataPacket::Meta(instrument_api::packet::Meta {
                                key: Key::Regulation,
                                value: Value::String(
                                    if status.channel1_current_mode() { "CC" } else { "CV" }.to_string(),
                                ),
                            }));
                        }
                        prev_status = status;

                        sink(DataPacket::FrameBegin { channel: CH_VOLTAGE });
                        sink(DataPacket::Analog {
                            num_samples: 1,
                            channels: vec![CH_VOLTAGE, CH_CURRENT, CH_POWER],
                            mq: MeasurementQuantity::Voltage,
                            unit: Unit::Volt,
                            flags: SampleFlags::DC,
                            encoding_digits: 4,
                            data: vec![measurements.voltage, measurements.current, measurements.power],
                        });
                        sink(DataPacket::FrameEnd { channel: CH_POWER });

                        if limiter.submit(3) {
                            break;
                        }
                    }
                    Err(e) => warn!(?e, "load-framed status poll failed"),
                }
            }

            sink(DataPacket::End);
            slot.stopped.notify_waiters();
        });

        Ok(())
    }

    async fn acquisition_stop(&self, dev: DeviceId) -> Result<()> {
        let slot = self.slot(dev)?;
        slot.stop_requested.store(true, Ordering::SeqCst);
        let _ = tokio::time::timeout(Duration::from_millis(500), slot.stopped.notified()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_model_info_trims_trailing_nuls() {
        let mut data = [0u8; frame::DATA_LEN];
        data[0..5].copy_from_slice(b"DL303");
        data[SERIAL_OFFSET..SERIAL_OFFSET + 9].copy_from_slice(b"SN12345\0\0");
        data[FIRMWARE_OFFSET] = 1;
        data[FIRMWARE_OFFSET + 1] = 20;
        let reply = Frame::new(1, CMD_GET_MODEL_INFO, data);
        let (name, serial, fw) = parse_model_info(&reply);
        assert_eq!(name, "DL303");
        assert_eq!(serial.as_deref(), Some("SN12345"));
        assert_eq!(fw, "1.20");
    }

    #[test]
    fn decode_status_frame_scales_readings() {
        let mut data = [0u8; frame::DATA_LEN];
        data[STATUS_BYTE_OFFSET] = 0b0100_0001;
        frame::put_le_u32(&mut data, STATUS_VOLTAGE_OFFSET, 5_000);
        frame::put_le_u32(&mut data, STATUS_CURRENT_OFFSET, 20_000);
        frame::put_le_u32(&mut data, STATUS_POWER_OFFSET, 100_000);
        let reply = Frame::new(1, CMD_GET_STATUS, data);
        let (status, m) = decode_status_frame(&reply);
        assert!(status.output_enabled());
        assert!(status.channel1_current_mode());
        assert!((m.voltage - 5.0).abs() < 1e-9);
        assert!((m.current - 2.0).abs() < 1e-9);
        assert!((m.power - 100.0).abs() < 1e-9);
    }
}
