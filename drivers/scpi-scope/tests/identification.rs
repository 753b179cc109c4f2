//! Scenario 1 (oscilloscope identification): a mocked serial port whose
//! `*IDN?` reply identifies a HAMEG HMO1024, expecting `scan` to find
//! one device with four analog channels, one digital pod, and the
//! model's trigger-source list.

use instrument_api::driver::{ChannelType, Driver, ScanOptions};
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

#[tokio::test]
async fn identifies_hmo1024_over_mocked_serial() {
    let (client, server) = tokio::io::duplex(1024);
    let driver = ScpiScopeDriver::new();
    driver.inject_mock_port("/dev/ttyUSB0", Box::new(client));

    tokio::spawn(run_script(server, vec!["HAMEG,HMO1024,0,01.400"]));

    let ids = driver
        .scan(ScanOptions { conn: Some(String::from("/dev/ttyUSB0")), serialcomm: None })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let devices = driver.dev_list();
    let info = &devices[0];
    assert_eq!(info.vendor, "HAMEG");
    assert_eq!(info.model, "HMO1024");

    let analog = info.channels.iter().filter(|c| matches!(c.kind, ChannelType::Analog)).count();
    let logic = info.channels.iter().filter(|c| matches!(c.kind, ChannelType::Logic)).count();
    assert_eq!(analog, 4);
    assert_eq!(logic, 8);
    assert_eq!(info.channel_groups.len(), 5);
}
