//! Scenario 6 (conflict rejection): on a 4-analog-channel device with a
//! digital pod, enabling the pod together with analog channel 3 must
//! fail `acquisition_start` with `invalid-arg` and must not emit
//! `df-header`.

use std::sync::{Arc, Mutex};

use instrument_api::driver::{Driver, ScanOptions};
use instrument_api::key::Key;
use instrument_api::packet::DataPacket;
use instrument_api::value::Value;
use instrument_api::Error;
use scpi_scope::ScpiScopeDriver;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

async fn run_script(server: tokio::io::DuplexStream, replies: Vec<&'static str>) {
    let (read_half, mut write_half) = tokio::io::split(server);
    let mut lines = BufReader::new(read_half).lines();
    let mut replies = replies.into_iter();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().ends_with('?') {
            if let Some(reply) = replies.next() {
                let _ = write_half.write_all(reply.as_bytes()).await;
                let _ = write_half.write_all(b"\n").await;
            }
        }
    }
}

fn dev_open_replies() -> Vec<&'static str> {
    vec![
        "HAMEG,HMO1024,0,01.400",
        "2.000000E-9",
        "1.000000E-3",
        "DC",
        "1.000000E-3",
        "DC",
        "1.000000E-3",
        "DC",
        "1.000000E-3",
        "DC",
        "CH1",
        "POS",
        "0.0",
        "1000000",
    ]
}

#[tokio::test]
async fn pod_and_channel_3_together_is_rejected_at_start() {
    let (client, server) = tokio::io::duplex(4096);
    let driver = ScpiScopeDriver::new();
    driver.inject_mock_port("/dev/ttyUSB0", Box::new(client));

    let mut replies = dev_open_replies();
    replies.push("1"); // *OPC? after enabling the pod
    replies.push("1"); // *OPC? after enabling channel 3
    tokio::spawn(run_script(server, replies));

    let ids = driver
        .scan(ScanOptions { conn: Some(String::from("/dev/ttyUSB0")), serialcomm: None })
        .await
        .unwrap();
    let dev = ids[0];
    driver.dev_open(dev).await.unwrap();

    let info = driver.dev_list().into_iter().next().unwrap();
    let pod_group = info.channel_groups.iter().find(|g| g.name == "POD1").unwrap().id;
    let ch3_group = info.channel_groups.iter().find(|g| g.name == "CH3").unwrap().id;

    driver.config_set(Key::Enabled, Value::Bool(true), dev, Some(pod_group)).await.unwrap();
    driver.config_set(Key::Enabled, Value::Bool(true), dev, Some(ch3_group)).await.unwrap();

    let seen: Arc<Mutex<Vec<DataPacket>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let sink = Arc::new(move |p: DataPacket| seen2.lock().unwrap().push(p));

    let result = driver.acquisition_start(dev, sink).await;
    assert!(matches!(result, Err(Error::InvalidArg(_))));
    assert!(seen.lock().unwrap().is_empty());
}
