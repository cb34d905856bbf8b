use std::sync::{Arc, Mutex};
use std::time::Duration;

use assertables::{assert_ge, assert_le};
use drivelink_common::constants::{
    object_ids,
    values::{control, mode},
};
use tokio::time::Instant;

use integration_tests::prelude::*;

use serial_test::serial;

fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn node() -> NodeId {
    NodeId::new(3).unwrap()
}

fn motion_config(mode: MotionMode) -> BringupConfig {
    let mut config = BringupConfig::new(node());
    config.path.final_stage = FinalStage::Motion;
    config.motion.mode = mode;
    config
}

/// Time of the last write of `value` to `index`
fn write_time(drive: &SimDrive, index: u16, value: u32) -> Instant {
    drive
        .writes()
        .iter()
        .rev()
        .find(|w| w.index == index && w.value == value)
        .map(|w| w.time)
        .expect("write not found")
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_position_move_completes() {
    init_logging();
    let config = motion_config(MotionMode::Position);
    let mut rig = TestRig::new(config, DriveSettings::new(node()));
    let mut logger = BusLogger::new(rig.bus.new_receiver(), node());

    let outcome = rig.machine.run().await;
    logger.print();

    assert_eq!(BringupOutcome::Success, outcome);
    let drive = &rig.drive;
    assert_eq!(vec![3], drive.writes_to(object_ids::BRAKE));
    assert_eq!(
        vec![mode::PROFILE_POSITION as u32],
        drive.writes_to(object_ids::MODE_OF_OPERATION)
    );
    assert_eq!(vec![1000], drive.writes_to(object_ids::PROFILE_ACCELERATION));
    assert_eq!(vec![1000], drive.writes_to(object_ids::PROFILE_DECELERATION));
    assert_eq!(vec![5000], drive.writes_to(object_ids::PROFILE_VELOCITY));
    assert_eq!(vec![0xC000], drive.writes_to(object_ids::TARGET_POSITION));
    assert_eq!(
        vec![0x80, 0x06, 0x07, 0x0F, 0x5F],
        drive.writes_to(object_ids::CONTROL_WORD)
    );

    // The move takes 3 s from the start control word; polling ends soon after
    let started = write_time(drive, object_ids::CONTROL_WORD, 0x5F);
    let reset = drive.resets();
    assert_eq!(1, reset);
    assert_ge!(Instant::now() - started, Duration::from_millis(3000));
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_position_move_times_out() {
    init_logging();
    let mut config = motion_config(MotionMode::Position);
    config.motion.control_step_delay_ms = 0;
    let mut settings = DriveSettings::new(node());
    settings.move_duration = None;
    let mut rig = TestRig::new(config, settings);

    let failed_at = Arc::new(Mutex::new(None));
    let cb_failed_at = failed_at.clone();
    rig.machine.set_completion_callback(Box::new(move |o| {
        if o == BringupOutcome::Failed {
            *cb_failed_at.lock().unwrap() = Some(Instant::now());
        }
    }));

    assert_eq!(BringupOutcome::Failed, rig.machine.run().await);

    let started = write_time(&rig.drive, object_ids::CONTROL_WORD, 0x5F);
    let failed_at = failed_at.lock().unwrap().expect("callback not called");
    let window = failed_at - started;
    assert_ge!(window, Duration::from_millis(15000));
    assert_le!(window, Duration::from_millis(15100));

    // A quick stop is the last thing written, and the drive is not reset
    let control_words = rig.drive.writes_to(object_ids::CONTROL_WORD);
    assert_eq!(Some(&(control::QUICK_STOP as u32)), control_words.last());
    assert_eq!(0, rig.drive.resets());
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_servo_not_ready_aborts_before_moving() {
    init_logging();
    let config = motion_config(MotionMode::Position);
    let mut settings = DriveSettings::new(node());
    settings.servo_ready = false;
    let mut rig = TestRig::new(config, settings);

    assert_eq!(BringupOutcome::Failed, rig.machine.run().await);
    assert!(rig.drive.writes_to(object_ids::TARGET_POSITION).is_empty());
    assert_eq!(
        vec![control::QUICK_STOP as u32],
        rig.drive.writes_to(object_ids::CONTROL_WORD)
    );
}

#[serial]
#[tokio::test(start_paused = true)]
async fn test_speed_run_stops_after_dwell() {
    init_logging();
    let config = motion_config(MotionMode::Speed);
    let mut rig = TestRig::new(config, DriveSettings::new(node()));

    assert_eq!(BringupOutcome::Success, rig.machine.run().await);

    let drive = &rig.drive;
    assert_eq!(
        vec![mode::PROFILE_VELOCITY as u32],
        drive.writes_to(object_ids::MODE_OF_OPERATION)
    );
    assert_eq!(vec![1000], drive.writes_to(object_ids::SPEED_ACCELERATION));
    assert_eq!(vec![1000], drive.writes_to(object_ids::SPEED_DECELERATION));
    // 1 m at 9000 units per metre, scaled by 1.5
    assert_eq!(vec![13500, 0], drive.writes_to(object_ids::TARGET_VELOCITY));

    let running = write_time(drive, object_ids::CONTROL_WORD, 0x0F);
    let stopped = write_time(drive, object_ids::TARGET_VELOCITY, 0);
    assert_ge!(stopped - running, Duration::from_millis(19000));
    assert_eq!(1, drive.resets());
}
