//! A SCPI-over-serial oscilloscope driver (§4.5.1): device
//! identification via `*IDN?`, a per-model dialect table, a state
//! mirror kept in lockstep with the device, and a polling acquisition
//! loop that cycles through the enabled analog channels and digital
//! pods.

mod dialect;
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

use dialect::{Arg, CommandKind};
use model::Model;
use state::ScopeState;

const DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    name: "scpi-scope",
    long_name: "SCPI-over-serial oscilloscope driver",
    protocol_version: 1,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

enum Target {
    Analog(usize),
    Pod(usize),
}

struct DeviceSlot {
    id: DeviceId,
    model: &'static Model,
    info: StdMutex<DeviceInfo>,
    port: TokioMutex<SerialEndpoint>,
    state: TokioMutex<ScopeState>,
    stop_requested: AtomicBool,
    stopped: Notify,
}

impl DeviceSlot {
    async fn send_command(&self, kind: CommandKind, args: &[Arg<'_>]) -> Result<()> {
        let mut port = self.port.lock().await;
        let cmd = dialect::build(kind, args);
        port.write_all(cmd.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await
    }

    async fn query_raw(
        &self,
        kind: CommandKind,
        args: &[Arg<'_>],
        count: usize,
        timeout: Duration,
    ) -> Result<String> {
        let mut port = self.port.lock().await;
        let cmd = dialect::build(kind, args);
        port.write_all(cmd.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await?;
        let resp = port.read_chars(count, timeout).await?;
        Ok(String::from_utf8_lossy(&resp).trim().to_string())
    }

    async fn query(&self, kind: CommandKind, args: &[Arg<'_>]) -> Result<String> {
        self.query_raw(kind, args, 128, DEFAULT_QUERY_TIMEOUT).await
    }

    async fn send_command_opc(&self, kind: CommandKind, args: &[Arg<'_>]) -> Result<()> {
        self.send_command(kind, args).await?;
        let resp = self.query(CommandKind::OpcQuery, &[]).await?;
        if resp != "1" {
            return Err(Error::Io(format!("unexpected *OPC? reply: {resp}")));
        }
        Ok(())
    }

    fn target_of(&self, group: Option<GroupId>) -> Result<Target> {
        let idx = group.ok_or(Error::ChannelGroup)?.0 as usize;
        let n = self.model.analog_channels;
        if idx < n {
            Ok(Target::Analog(idx))
        } else if idx < n + self.model.digital_pods {
            Ok(Target::Pod(idx - n))
        } else {
            Err(Error::ChannelGroup)
        }
    }
}

/// Parses a `vendor,model,serial,firmware` `*IDN?` reply.
fn parse_idn(reply: &str) -> Result<(String, String, Option<String>, String)> {
    let mut parts = reply.trim().splitn(4, ',');
    let vendor = parts.next().ok_or_else(|| Error::Io(String::from("empty *IDN? reply")))?;
    let model = parts
        .next()
        .ok_or_else(|| Error::Io(String::from("*IDN? reply missing model field")))?;
    let serial = parts.next().unwrap_or("");
    let firmware = parts.next().unwrap_or("").trim();
    let serial = if serial.is_empty() || serial == "0" { None } else { Some(serial.to_string()) };
    Ok((vendor.to_string(), model.to_string(), serial, firmware.to_string()))
}

fn build_device_info(
    id: DeviceId,
    vendor: String,
    model: &'static Model,
    serial_number: Option<String>,
    firmware: String,
    conn: ConnIdent,
) -> DeviceInfo {
    let mut channels = Vec::new();
    let mut channel_groups = Vec::new();

    for i in 0..model.analog_channels {
        channels.push(Channel { index: i, kind: ChannelType::Analog, name: format!("CH{}", i + 1), enabled: false });
        channel_groups.push(
            ChannelGroup::new(GroupId(i as u32), format!("CH{}", i + 1), vec![i])
                .expect("single-channel group is always non-empty"),
        );
    }

    let n = model.analog_channels;
    for pod in 0..model.digital_pods {
        let base = n + pod * 8;
        let mut lines = Vec::with_capacity(8);
        for line in 0..8 {
            let idx = base + line;
            channels.push(Channel {
                index: idx,
                kind: ChannelType::Logic,
                name: format!("D{line}"),
                enabled: false,
            });
            lines.push(idx);
        }
        channel_groups.push(
            ChannelGroup::new(GroupId((n + pod) as u32), format!("POD{}", pod + 1), lines)
                .expect("a pod always has 8 lines"),
        );
    }

    DeviceInfo {
        id,
        vendor,
        model: model.name.to_string(),
        version: firmware,
        serial_number,
        conn: Some(conn),
        status: DeviceStatus::Inactive,
        channels,
        channel_groups,
        scanned_at: chrono::Utc::now(),
    }
}

pub struct ScpiScopeDriver {
    devices: StdRwLock<Vec<Arc<DeviceSlot>>>,
    mock_ports: StdMutex<HashMap<String, Box<dyn SerialIo>>>,
}

impl Default for ScpiScopeDriver {
    fn default() -> Self {
        ScpiScopeDriver { devices: StdRwLock::new(Vec::new()), mock_ports: StdMutex::new(HashMap::new()) }
    }
}

impl ScpiScopeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only hook: pre-registers an in-memory transport for a given
    /// connection path so `scan`/`dev_open` talk to it instead of
    /// opening real hardware. Lets the driver contract be exercised
    /// against scripted SCPI replies (see this crate's `tests/`).
    pub fn inject_mock_port(&self, conn: impl Into<String>, io: Box<dyn SerialIo>) {
        self.mock_ports.lock().expect("mock port map lock poisoned").insert(conn.into(), io);
    }

    fn open_transport(&self, conn: &str, settings: SerialSettings) -> Result<SerialEndpoint> {
        if let Some(io) = self.mock_ports.lock().expect("mock port map lock poisoned").remove(conn) {
            return Ok(SerialEndpoint::with_io(conn, settings, io));
        }
        let mut port = SerialEndpoint::new(conn, settings);
        port.open()?;
        Ok(port)
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

    async fn refresh_state(&self, slot: &DeviceSlot) -> Result<()> {
        let tb = slot.query(CommandKind::GetTimebase, &[]).await?;
        let tb_val: f64 = tb.parse().map_err(|_| Error::Io(format!("bad timebase reply: {tb}")))?;
        let tb_idx = closest_index(model::TIMEBASE_TABLE, tb_val);

        let n = slot.model.analog_channels;
        let mut vdiv_idx = Vec::with_capacity(n);
        let mut coupling_idx = Vec::with_capacity(n);
        for ch in 1..=n {
            let v = slot.query(CommandKind::GetVdiv, &[Arg::Int(ch as i64)]).await?;
            let v: f64 = v.parse().map_err(|_| Error::Io(format!("bad vdiv reply: {v}")))?;
            vdiv_idx.push(closest_index(model::VDIV_TABLE, v));

            let c = slot.query(CommandKind::GetCoupling, &[Arg::Int(ch as i64)]).await?;
            let idx = model::COUPLING_OPTIONS.iter().position(|&s| s == c).unwrap_or(2);
            coupling_idx.push(idx);
        }

        let trig_src = slot.query(CommandKind::GetTriggerSource, &[]).await?;
        let trig_idx = slot.model.trigger_sources.iter().position(|&s| s == trig_src).unwrap_or(0);

        let trig_slope = slot.query(CommandKind::GetTriggerSlope, &[]).await?;
        let slope_idx = usize::from(trig_slope != "NEG");

        let hpos = slot.query(CommandKind::GetHorizTriggerPos, &[]).await?;
        let hpos: f64 = hpos.parse().unwrap_or(0.0);

        let enabled = slot.state.lock().await.enabled_analog_channels();
        let srate = if let Some(&ch) = enabled.first() {
            let pts = slot.query(CommandKind::GetSampleRatePoints, &[Arg::Int((ch + 1) as i64)]).await?;
            let pts: f64 = pts.parse().map_err(|_| Error::Io(format!("bad sample-rate-points reply: {pts}")))?;
            pts / (tb_val * model::GRID_DIVS_X as f64)
        } else {
            let srate = slot.query(CommandKind::GetSamplerate, &[]).await?;
            srate.parse().unwrap_or(0.0)
        };

        let mut state = slot.state.lock().await;
        state.timebase_index = tb_idx;
        for (i, idx) in vdiv_idx.into_iter().enumerate() {
            state.analog[i].vdiv_index = idx;
        }
        for (i, idx) in coupling_idx.into_iter().enumerate() {
            state.analog[i].coupling_index = idx;
        }
        state.trigger_source_index = trig_idx;
        state.trigger_slope_index = slope_idx;
        state.horiz_trigger_pos = hpos;
        state.sample_rate = srate;
        Ok(())
    }
}

fn closest_index(table: &[(u64, u64)], value: f64) -> usize {
    table
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (a.0 as f64 / a.1 as f64 - value).abs();
            let db = (b.0 as f64 / b.1 as f64 - value).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn parse_f64_csv(s: &str) -> Vec<f64> {
    s.split(',').filter_map(|tok| tok.trim().parse::<f64>().ok()).collect()
}

#[async_trait]
impl Driver for ScpiScopeDriver {
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
        let conn = options.conn.ok_or_else(|| {
            Error::InvalidArg(String::from("scpi-scope scan requires conn=<serial path>"))
        })?;
        let serialcomm = options.serialcomm.unwrap_or_else(|| String::from("9600/8n1"));
        let settings = SerialSettings::parse(&serialcomm)?;

        let mut port = self.open_transport(&conn, settings)?;
        port.write_all(dialect::build(CommandKind::GetIdn, &[]).as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await?;
        let reply = port.read_chars(256, DEFAULT_QUERY_TIMEOUT).await?;
        if !port.is_mock() {
            port.close();
        }

        let reply = String::from_utf8_lossy(&reply);
        let (vendor, model_name, serial, firmware) = parse_idn(&reply)?;
        let model = model::lookup(&model_name).ok_or(Error::UnsupportedDevice)?;

        let mut devices = self.devices.write().expect("device list lock poisoned");
        let id = DeviceId(devices.len() as u32);
        let info = build_device_info(id, vendor, model, serial, firmware, ConnIdent::Serial(conn));

        devices.push(Arc::new(DeviceSlot {
            id,
            model,
            info: StdMutex::new(info),
            port: TokioMutex::new(port),
            state: TokioMutex::new(ScopeState::new(model.analog_channels, model.digital_pods)),
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
        self.refresh_state(&slot).await?;
        slot.info.lock().expect("device info lock poisoned").status = DeviceStatus::Active;
        debug!(device = dev.0, "scpi-scope device opened");
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
        let ids: Vec<DeviceId> = self
            .devices
            .read()
            .expect("device list lock poisoned")
            .iter()
            .map(|d| d.id)
            .collect();
        for id in ids {
            self.dev_close(id).await?;
        }
        self.devices.write().expect("device list lock poisoned").clear();
        Ok(())
    }

    async fn config_get(&self, key: Key, dev: DeviceId, group: Option<GroupId>) -> Result<Value> {
        let slot = self.slot(dev)?;
        let state = slot.state.lock().await;
        match key {
            Key::Timebase => model::timebase_value(state.timebase_index),
            Key::Vdiv => {
                let Target::Analog(ch) = slot.target_of(group)? else {
                    return Err(Error::ChannelGroup);
                };
                model::vdiv_value(state.analog[ch].vdiv_index)
            }
            Key::Coupling => {
                let Target::Analog(ch) = slot.target_of(group)? else {
                    return Err(Error::ChannelGroup);
                };
                Ok(Value::String(model::COUPLING_OPTIONS[state.analog[ch].coupling_index].to_string()))
            }
            Key::TriggerSource => {
                Ok(Value::String(slot.model.trigger_sources[state.trigger_source_index].to_string()))
            }
            Key::TriggerSlope => Ok(Value::U64(state.trigger_slope_index as u64)),
            Key::HorizTriggerPos => Ok(Value::F64(state.horiz_trigger_pos)),
            Key::Samplerate => Ok(Value::U64(state.sample_rate as u64)),
            Key::LimitSamples => Ok(Value::U64(state.limit_samples.unwrap_or(0))),
            Key::LimitMsec => Ok(Value::U64(state.limit_msec.unwrap_or(0))),
            Key::LimitFrames => Ok(Value::U64(state.limit_frames.unwrap_or(0))),
            Key::Enabled => match slot.target_of(group)? {
                Target::Analog(ch) => Ok(Value::Bool(state.analog[ch].enabled)),
                Target::Pod(pod) => Ok(Value::Bool(state.pod_enabled[pod])),
            },
            _ => Err(Error::NotApplicable),
        }
    }

    async fn config_set(
        &self,
        key: Key,
        value: Value,
        dev: DeviceId,
        group: Option<GroupId>,
    ) -> Result<()> {
        let slot = self.slot(dev)?;
        match key {
            Key::Timebase => {
                let r = value.as_rational()?;
                let idx = model::find_rational(model::TIMEBASE_TABLE, r.num, r.den)
                    .ok_or_else(|| Error::InvalidArg(String::from("timebase not in the model's table")))?;
                slot.send_command_opc(CommandKind::SetTimebase, &[Arg::Float(r.as_f64())]).await?;
                slot.state.lock().await.timebase_index = idx;
                Ok(())
            }
            Key::Vdiv => {
                let Target::Analog(ch) = slot.target_of(group)? else {
                    return Err(Error::ChannelGroup);
                };
                let r = value.as_rational()?;
                let idx = model::find_rational(model::VDIV_TABLE, r.num, r.den)
                    .ok_or_else(|| Error::InvalidArg(String::from("vdiv not in the model's table")))?;
                slot.send_command_opc(CommandKind::SetVdiv, &[Arg::Int((ch + 1) as i64), Arg::Float(r.as_f64())])
                    .await?;
                slot.state.lock().await.analog[ch].vdiv_index = idx;
                Ok(())
            }
            Key::Coupling => {
                let Target::Analog(ch) = slot.target_of(group)? else {
                    return Err(Error::ChannelGroup);
                };
                let s = value.as_str()?;
                let idx = model::COUPLING_OPTIONS
                    .iter()
                    .position(|&c| c == s)
                    .ok_or_else(|| Error::InvalidArg(format!("unknown coupling {s}")))?;
                slot.send_command_opc(CommandKind::SetCoupling, &[Arg::Int((ch + 1) as i64), Arg::Str(s)])
                    .await?;
                slot.state.lock().await.analog[ch].coupling_index = idx;
                Ok(())
            }
            Key::TriggerSource => {
                let s = value.as_str()?;
                let idx = slot
                    .model
                    .trigger_sources
                    .iter()
                    .position(|&c| c == s)
                    .ok_or_else(|| Error::InvalidArg(format!("unknown trigger source {s}")))?;
                slot.send_command_opc(CommandKind::SetTriggerSource, &[Arg::Str(s)]).await?;
                slot.state.lock().await.trigger_source_index = idx;
                Ok(())
            }
            Key::TriggerSlope => {
                let v = value.as_u64()?;
                if v > 1 {
                    return Err(Error::InvalidArg(String::from("trigger-slope must be 0 or 1")));
                }
                let token = if v == 0 { "NEG" } else { "POS" };
                slot.send_command_opc(CommandKind::SetTriggerSlope, &[Arg::Str(token)]).await?;
                slot.state.lock().await.trigger_slope_index = v as usize;
                Ok(())
            }
            Key::HorizTriggerPos => {
                let f = value.as_f64()?;
                if !(-0.5..=0.5).contains(&f) {
                    return Err(Error::InvalidArg(String::from("horiz-trigger-pos out of range")));
                }
                slot.send_command_opc(CommandKind::SetHorizTriggerPos, &[Arg::Float(f)]).await?;
                slot.state.lock().await.horiz_trigger_pos = f;
                Ok(())
            }
            Key::Enabled => {
                let enable = value.as_bool()?;
                match slot.target_of(group)? {
                    Target::Analog(ch) => {
                        slot.send_command_opc(
                            CommandKind::SetAnalogChannelState,
                            &[Arg::Int((ch + 1) as i64), Arg::Int(enable as i64)],
                        )
                        .await?;
                        slot.state.lock().await.analog[ch].enabled = enable;
                    }
                    Target::Pod(pod) => {
                        slot.send_command_opc(
                            CommandKind::SetPodState,
                            &[Arg::Int((pod + 1) as i64), Arg::Int(enable as i64)],
                        )
                        .await?;
                        let mut state = slot.state.lock().await;
                        state.pod_enabled[pod] = enable;
                        for line in &mut state.digital_enabled[pod * 8..pod * 8 + 8] {
                            *line = enable;
                        }
                    }
                }
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
            Key::LimitFrames => {
                slot.state.lock().await.limit_frames = Some(value.as_u64()?);
                Ok(())
            }
            _ => Err(Error::NotApplicable),
        }
    }

    async fn config_list(&self, key: Key, dev: DeviceId, _group: Option<GroupId>) -> Result<Value> {
        let slot = self.slot(dev)?;
        match key {
            Key::Timebase => Ok(Value::ArrayRational(
                model::TIMEBASE_TABLE
                    .iter()
                    .map(|&(n, d)| instrument_api::value::Rational::new(n, d))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Key::Vdiv => Ok(Value::ArrayRational(
                model::VDIV_TABLE
                    .iter()
                    .map(|&(n, d)| instrument_api::value::Rational::new(n, d))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Key::Coupling => Ok(Value::ArrayString(
                model::COUPLING_OPTIONS.iter().map(|s| s.to_string()).collect(),
            )),
            Key::TriggerSource => {
                Ok(Value::ArrayString(slot.model.trigger_sources.iter().map(|s| s.to_string()).collect()))
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

        let (enabled_analog, enabled_pods, limit_samples, limit_msec, limit_frames) = {
            let state = slot.state.lock().await;
            (
                state.enabled_analog_channels(),
                state.enabled_pods(),
                state.limit_samples,
                state.limit_msec,
                state.limit_frames,
            )
        };

        if enabled_analog.is_empty() && enabled_pods.is_empty() {
            return Err(Error::InvalidArg(String::from("no channels enabled")));
        }

        if slot.model.analog_channels >= 4
            && slot.model.digital_pods >= 1
            && enabled_pods.contains(&0)
            && enabled_analog.contains(&2)
        {
            return Err(Error::InvalidArg(String::from(
                "pod 1 cannot run together with analog channel 3",
            )));
        }

        let n_analog = slot.model.analog_channels;
        let mut order: Vec<usize> = enabled_analog.clone();
        order.extend(enabled_pods.iter().map(|&p| n_analog + p));

        sink(DataPacket::Header);
        slot.stop_requested.store(false, Ordering::SeqCst);

        let slot = Arc::clone(&slot);
        tokio::spawn(async move {
            let mut limiter = instrument_api::limiter::Limiter::new(limit_samples, limit_msec);
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            let mut cycle = 0usize;
            let mut frame_count: u64 = 0;

            loop {
                ticker.tick().await;
                if slot.stop_requested.load(Ordering::SeqCst) {
                    break;
                }

                let channel = order[cycle];
                if channel < n_analog {
                    match slot.query_raw(CommandKind::GetAnalogData, &[Arg::Int((channel + 1) as i64)], 4096, POLL_INTERVAL)
                        .await
                    {
                        Ok(reply) => {
                            let samples = parse_f64_csv(&reply);
                            sink(DataPacket::FrameBegin { channel });
                            sink(DataPacket::Analog {
                                num_samples: samples.len() as u32,
                                channels: vec![channel],
                                mq: MeasurementQuantity::Voltage,
                                unit: Unit::Volt,
                                flags: SampleFlags::DC,
                                encoding_digits: 6,
                                data: samples.clone(),
                            });
                            sink(DataPacket::FrameEnd { channel });
                            limiter.submit(samples.len() as u64);
                        }
                        Err(e) => warn!(?e, channel, "analog data query failed"),
                    }
                } else {
                    let pod = channel - n_analog;
                    match slot.query_raw(CommandKind::GetLogicData, &[Arg::Int((pod + 1) as i64)], 4096, POLL_INTERVAL)
                        .await
                    {
                        Ok(reply) => {
                            let bytes: Vec<u8> = reply.bytes().collect();
                            sink(DataPacket::FrameBegin { channel });
                            sink(DataPacket::Logic { length: bytes.len() as u32, unit_size: 1, bytes: bytes.clone() });
                            sink(DataPacket::FrameEnd { channel });
                            limiter.submit(bytes.len() as u64);
                        }
                        Err(e) => warn!(?e, channel, "logic data query failed"),
                    }
                }

                cycle = (cycle + 1) % order.len();
                if cycle == 0 {
                    frame_count += 1;
                    if let Some(lf) = limit_frames {
                        if frame_count >= lf {
                            break;
                        }
                    }
                }

                if limiter.should_stop() {
                    break;
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
    fn parse_idn_splits_vendor_model_serial_firmware() {
        let (vendor, model, serial, firmware) = parse_idn("HAMEG,HMO1024,0,01.400").unwrap();
        assert_eq!(vendor, "HAMEG");
        assert_eq!(model, "HMO1024");
        assert_eq!(serial, None);
        assert_eq!(firmware, "01.400");
    }

    #[test]
    fn parse_idn_keeps_nonzero_serial() {
        let (_, _, serial, _) = parse_idn("HAMEG,HMO1024,SN123,01.400").unwrap();
        assert_eq!(serial.as_deref(), Some("SN123"));
    }

    #[test]
    fn closest_index_picks_nearest_table_entry() {
        let idx = closest_index(model::TIMEBASE_TABLE, 0.00105);
        assert_eq!(model::TIMEBASE_TABLE[idx], (1, 1_000));
    }
}
