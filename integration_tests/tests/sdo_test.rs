use std::time::Duration;

use assertables::assert_ge;
use drivelink_common::{
    constants::{object_ids, values::status},
    sdo::SdoWidth,
};
use tokio::time::Instant;

use integration_tests::prelude::*;
use integration_tests::sim_drive::ABORT_READ_ONLY;

use serial_test::serial;

const NODE_ID: u8 = 3;

fn drive_on_bus(settings: Option<DriveSettings>) -> (SimBus, std::sync::Arc<SimDrive>) {
    let node = NodeId::new(NODE_ID).unwrap();
    let mut bus = SimBus::new();
    let drive = SimDrive::new(node, settings.unwrap_or_else(|| DriveSettings::new(node)));
    drive.set_mode(DriveMode::Canopen);
    bus.add_device(drive.clone());
    (bus, drive)
}

#[serial]
#[tokio::test]
async fn test_write_then_read_back() {
    let (mut bus, drive) = drive_on_bus(None);
    let mut client = get_sdo_client(&mut bus, NODE_ID);

    client
        .write_u32(object_ids::PROFILE_ACCELERATION, 0, 1000)
        .await
        .unwrap();
    client.write_u8(object_ids::MODE_OF_OPERATION, 0, 1).await.unwrap();
    assert_eq!(Some(1000), drive.register(object_ids::PROFILE_ACCELERATION, 0));

    assert_eq!(
        1000,
        client
            .read_u32(object_ids::PROFILE_ACCELERATION, 0)
            .await
            .unwrap()
    );
    assert_eq!(1, client.read_u8(object_ids::MODE_OF_OPERATION, 0).await.unwrap());
    assert_eq!(
        status::SERVO_READY,
        client.read_u16(object_ids::STATUS_WORD, 0).await.unwrap()
    );
}

#[serial]
#[tokio::test]
async fn test_abort_is_returned() {
    let node = NodeId::new(NODE_ID).unwrap();
    let mut settings = DriveSettings::new(node);
    settings.abort_objects = vec![object_ids::BRAKE];
    let (mut bus, _drive) = drive_on_bus(Some(settings));
    let mut client = get_sdo_client(&mut bus, NODE_ID);

    let result = client.write_u8(object_ids::BRAKE, 0, 3).await;
    assert_eq!(
        Err(SdoClientError::ServerAbort {
            index: object_ids::BRAKE,
            sub: 0,
            abort_code: ABORT_READ_ONLY,
        }),
        result
    );
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_silent_node_times_out() {
    let (mut bus, drive) = drive_on_bus(None);
    drive.set_mode(DriveMode::Off);
    let mut client = get_sdo_client(&mut bus, NODE_ID);

    let start = Instant::now();
    let result = client
        .request_read(
            object_ids::STATUS_WORD,
            0,
            SdoWidth::U16,
            Duration::from_millis(6000),
        )
        .await;
    assert_eq!(
        Err(SdoClientError::NoResponse {
            index: object_ids::STATUS_WORD,
            sub: 0
        }),
        result
    );
    assert_ge!(start.elapsed(), Duration::from_millis(6000));
}

#[serial]
#[tokio::test]
async fn test_send_write_does_not_wait() {
    let (mut bus, drive) = drive_on_bus(None);
    let mut client = get_sdo_client(&mut bus, NODE_ID);

    client.send_write(object_ids::NODE_ID, 0, 5u8).await.unwrap();
    assert_eq!(Some(5), drive.register(object_ids::NODE_ID, 0));
}
