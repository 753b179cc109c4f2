//! Scenario 4: a status reply with a valid preamble, address, and
//! command but a corrupted checksum must be dropped, not treated as a
//! sample.

use instrument_api::driver::{Driver, ScanOptions};
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

async fn serve_identification(server: &mut tokio::io::DuplexStream) {
    let mut req = [0u8; FRAME_LEN];
    server.read_exact(&mut req).await.unwrap();
    let mut model_data = [0u8; DATA_LEN];
    model_data[0..5].copy_from_slice(b"DL303");
    server.write_all(&build_frame(1, 0x30, model_data)).await.unwrap();

    let mut req2 = [0u8; FRAME_LEN];
    server.read_exact(&mut req2).await.unwrap();
    server.write_all(&build_frame(1, 0x31, [0u8; DATA_LEN])).await.unwrap();
}

#[tokio::test]
async fn corrupted_checksum_on_status_poll_is_reported() {
    let (client, mut server) = tokio::io::duplex(4096);
    let driver = LoadFramedDriver::new();
    driver.inject_mock_port("/dev/ttyUSB0", Box::new(client));

    let handle = tokio::spawn(async move {
        serve_identification(&mut server).await;

        // get-status with a valid frame otherwise, checksum off by one
        let mut req = [0u8; FRAME_LEN];
        server.read_exact(&mut req).await.unwrap();
        let mut bad = build_frame(1, 0x32, [0u8; DATA_LEN]);
        bad[25] = bad[25].wrapping_add(1);
        server.write_all(&bad).await.unwrap();
        server
    });

    let ids = driver
        .scan(ScanOptions { conn: Some(String::from("/dev/ttyUSB0")), serialcomm: None })
        .await
        .unwrap();
    let dev = ids[0];

    let err = driver.dev_open(dev).await.unwrap_err();
    assert!(matches!(err, instrument_api::Error::Checksum));

    handle.await.unwrap();
}
