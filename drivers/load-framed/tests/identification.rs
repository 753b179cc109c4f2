//! Scan identification: a mocked serial port replies to a broadcast
//! `get-model-info` frame, and `scan` must find one device carrying
//! the decoded model name and channel group.

use instrument_api::driver::Driver;
use instrument_api::driver::ScanOptions;
use load_framed::LoadFramedDriver;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const FRAME_LEN: usize = 26;
const DATA_LEN: usize = 22;

fn checksum(addr: u8, cmd: u8, data: &[u8; DATA_LEN]) -> u8 {
    let mut sum = 0xAAu8.wrapping_add(addr).wrapping_add(cmd);
    for &b in data {
        sum = sum.wrapping_add(b);
    }
    sum
}

fn build_frame(addr: u8, cmd: u8, data: [u8; DATA_LEN]) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = 0xAA;
    out[1] = addr;
    out[2] = cmd;
    out[3..25].copy_from_slice(&data);
    out[25] = checksum(addr, cmd, &data);
    out
}

async fn run_script(mut server: tokio::io::DuplexStream) {
    // get-model-info (broadcast, addr 255) -> reply from unit addr 1
    let mut req = [0u8; FRAME_LEN];
    server.read_exact(&mut req).await.unwrap();
    let mut model_data = [0u8; DATA_LEN];
    model_data[0..5].copy_from_slice(b"DL303");
    model_data[7..16].copy_from_slice(b"SN000111\0");
    model_data[16] = 2;
    model_data[17] = 5;
    server.write_all(&build_frame(1, 0x30, model_data)).await.unwrap();

    // get-load-limits
    let mut req2 = [0u8; FRAME_LEN];
    server.read_exact(&mut req2).await.unwrap();
    server.write_all(&build_frame(1, 0x31, [0u8; DATA_LEN])).await.unwrap();
}

#[tokio::test]
async fn identifies_load_over_mocked_serial() {
    let (client, server) = tokio::io::duplex(4096);
    let driver = LoadFramedDriver::new();
    driver.inject_mock_port("/dev/ttyUSB0", Box::new(client));

    tokio::spawn(run_script(server));

    let ids = driver
        .scan(ScanOptions { conn: Some(String::from("/dev/ttyUSB0")), serialcomm: None })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let devices = driver.dev_list();
    let info = &devices[0];
    assert_eq!(info.model, "DL303");
    assert_eq!(info.serial_number.as_deref(), Some("SN000111"));
    assert_eq!(info.channel_groups.len(), 1);
    assert_eq!(info.channels.len(), 3);
}
