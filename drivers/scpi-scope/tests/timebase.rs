//! Scenario 3 (timebase set/get): with the device active, `config_set`
//! sends a scaled `:TIM:SCAL` command and waits for `*OPC?`, after which
//! `config_get` returns the value that was set.

use instrument_api::driver::{Driver, ScanOptions};
use instrument_api::key::Key;
use instrument_api::value::Value;
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

/// `*IDN?`, then the ten getters `dev_open`'s state-mirror refresh
/// issues for a 4-channel device (timebase, 4x(vdiv, coupling),
/// trigger-source, trigger-slope, horiz-trigger-pos, samplerate), then
/// one `*OPC?` per `config_set` call below.
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
async fn timebase_set_then_get_round_trips() {
    let (client, server) = tokio::io::duplex(4096);
    let driver = ScpiScopeDriver::new();
    driver.inject_mock_port("/dev/ttyUSB0", Box::new(client));

    let mut replies = dev_open_replies();
    replies.push("1"); // *OPC? after the timebase set

    tokio::spawn(run_script(server, replies));

    let ids = driver
        .scan(ScanOptions { conn: Some(String::from("/dev/ttyUSB0")), serialcomm: None })
        .await
        .unwrap();
    let dev = ids[0];
    driver.dev_open(dev).await.unwrap();

    let target = Value::rational(1, 1_000).unwrap();
    driver.config_set(Key::Timebase, target.clone(), dev, None).await.unwrap();

    let got = driver.config_get(Key::Timebase, dev, None).await.unwrap();
    assert_eq!(got, target);
}
