use std::sync::{Arc, Mutex};
use std::time::Duration;

use assertables::{assert_ge, assert_le, assert_lt};
use drivelink_common::constants::{object_ids, values::SAVE_CMD};
use tokio::time::Instant;

use integration_tests::prelude::*;

use serial_test::serial;

const NODE_ID: u8 = 3;

fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn node() -> NodeId {
    NodeId::new(NODE_ID).unwrap()
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_node_id_change_path() {
    init_logging();
    let mut config = BringupConfig::new(node());
    config.path.final_stage = FinalStage::ChangeNodeId {
        new_id: 5,
        settle_ms: 1000,
    };
    let mut rig = TestRig::new(config, DriveSettings::new(node()));
    let mut logger = BusLogger::new(rig.bus.new_receiver(), node());

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let cb_outcomes = outcomes.clone();
    rig.machine
        .set_completion_callback(Box::new(move |o| cb_outcomes.lock().unwrap().push(o)));

    let start = Instant::now();
    let outcome = rig.machine.run().await;
    logger.print();

    assert_eq!(BringupOutcome::Success, outcome);
    assert_eq!(vec![BringupOutcome::Success], *outcomes.lock().unwrap());
    assert_eq!(BringupState::Init, rig.machine.state());
    assert_eq!(Some(0x0102), rig.machine.bootloader_version());

    assert_eq!(vec![5], rig.drive.writes_to(object_ids::NODE_ID));
    assert_eq!(vec![SAVE_CMD], rig.drive.writes_to(object_ids::SAVE_OBJECTS));
    assert_eq!(1, rig.drive.resets());
    assert_eq!(DriveMode::Bootloader, rig.drive.mode());
    assert_ge!(start.elapsed(), Duration::from_millis(1000));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_invalid_new_node_id_skips_change() {
    init_logging();
    let mut config = BringupConfig::new(node());
    config.path.final_stage = FinalStage::ChangeNodeId {
        new_id: 0x80,
        settle_ms: 1000,
    };
    let mut rig = TestRig::new(config, DriveSettings::new(node()));

    // The change is abandoned, but the drive is still reset
    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert!(rig.drive.writes().is_empty());
    assert_eq!(1, rig.drive.resets());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_missing_heartbeat_fails_at_state_timeout() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut rig = TestRig::new(config, DriveSettings::new(node()));
    rig.drive.set_mode(DriveMode::Off);

    let start = Instant::now();
    let outcome = rig.machine.run().await;
    let elapsed = start.elapsed();

    assert_eq!(BringupOutcome::Failed, outcome);
    // Never before the deadline, and within a couple of ticks after it
    assert_ge!(elapsed, Duration::from_millis(5000));
    assert_le!(elapsed, Duration::from_millis(5030));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_missing_version_reply_fails() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut settings = DriveSettings::new(node());
    settings.answer_version = false;
    let mut rig = TestRig::new(config, settings);

    let start = Instant::now();
    assert_eq!(BringupOutcome::Failed, rig.machine.run().await);
    assert_ge!(start.elapsed(), Duration::from_millis(5000));
    assert_eq!(None, rig.machine.bootloader_version());
    // Activation was never sent
    assert_eq!(DriveMode::Bootloader, rig.drive.mode());
    assert_eq!(0, rig.drive.resets());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_direct_activation_path() {
    init_logging();
    let mut config = BringupConfig::new(node());
    config.path.version_check = false;
    config.path.await_activation_ack = false;
    let mut settings = DriveSettings::new(node());
    settings.answer_version = false;
    settings.ack_activation = false;
    let mut rig = TestRig::new(config, settings);

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(None, rig.machine.bootloader_version());
    assert_eq!(1, rig.drive.resets());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_replies_on_other_cob_id_are_accepted() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut settings = DriveSettings::new(node());
    settings.reply_cob_id = drivelink_common::CanId::std(0x7E5);
    let mut rig = TestRig::new(config, settings);

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(Some(0x0102), rig.machine.bootloader_version());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_sdo_check_and_refused_brake_release() {
    init_logging();
    let mut config = BringupConfig::new(node());
    config.path.check_sdo = true;
    config.path.release_brake = true;
    let mut settings = DriveSettings::new(node());
    settings.abort_objects = vec![object_ids::BRAKE];
    let mut rig = TestRig::new(config, settings);

    // A refused brake release is logged, not fatal
    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(
        vec![
            (object_ids::CONTROL_WORD, 0),
            (object_ids::STATUS_WORD, 0),
            (object_ids::MODE_OF_OPERATION, 0),
            (object_ids::TARGET_POSITION, 0),
        ],
        rig.drive.reads()
    );
    assert_eq!(None, rig.drive.register(object_ids::BRAKE, 0));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_rejected_transmit_fails_without_waiting() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut rig = TestRig::with_send_mode(config, DriveSettings::new(node()), SendMode::Reject);

    let start = Instant::now();
    assert_eq!(BringupOutcome::Failed, rig.machine.run().await);
    // Only the wait for the first heartbeat, no response deadline
    assert_lt!(start.elapsed(), Duration::from_millis(500));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_stalled_transmit_times_out() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut rig = TestRig::with_send_mode(config, DriveSettings::new(node()), SendMode::Stall);

    let start = Instant::now();
    assert_eq!(BringupOutcome::Failed, rig.machine.run().await);
    let elapsed = start.elapsed();
    assert_ge!(elapsed, Duration::from_millis(500));
    assert_lt!(elapsed, Duration::from_millis(1000));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_machine_can_run_again() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut rig = TestRig::new(config, DriveSettings::new(node()));

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    // The reset put the drive back in its bootloader, so the whole sequence repeats
    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(2, rig.drive.resets());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_reset_does_not_reach_other_nodes() {
    init_logging();
    let config = BringupConfig::new(node());
    let mut rig = TestRig::new(config, DriveSettings::new(node()));

    // A second node on the bus which obeys the NMT broadcast
    let other = NodeId::new(4).unwrap();
    let mut settings = DriveSettings::new(other);
    settings.nmt_cob_id = drivelink_common::CanId::std(0);
    let bystander = SimDrive::new(other, settings);
    bystander.set_mode(DriveMode::Canopen);
    rig.bus.add_device(bystander.clone());

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(1, rig.drive.resets());
    assert_eq!(0, bystander.resets());
    assert_eq!(DriveMode::Canopen, bystander.mode());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_reset_on_broadcast_nmt_cob_id() {
    init_logging();
    let mut config = BringupConfig::new(node());
    config.nmt_cob_id = Some(0);
    let mut settings = DriveSettings::new(node());
    settings.nmt_cob_id = drivelink_common::CanId::std(0);
    let mut rig = TestRig::new(config, settings);

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);
    assert_eq!(1, rig.drive.resets());
    assert_eq!(DriveMode::Bootloader, rig.drive.mode());
}
