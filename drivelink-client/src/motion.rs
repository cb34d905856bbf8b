//! The motion sequence run once a drive is in CANopen mode
//!
//! Every step is an SDO write through the [`SdoClient`]. A write which is not acknowledged is
//! logged and the sequence carries on; only a transmit failure ends it early. Completion is
//! detected by a fixed dwell in speed mode, or by polling the status word in position mode.
use std::time::Duration;

use drivelink_common::{
    constants::{
        object_ids,
        values::{control, mode, status, BRAKE_RELEASE},
    },
    nmt::{NmtCommand, NmtCommandCmd},
    sdo::{SdoValue, SdoWidth},
    traits::{AsyncCanReceiver, AsyncCanSender},
    CanId, NodeId,
};
use tokio::time::Instant;

use crate::{
    config::{MotionConfig, MotionMode},
    deadline::Deadline,
    error::{ActivationError, MotionAbortSnafu},
    sdo_client::SdoClient,
};

type Result<T> = std::result::Result<T, ActivationError>;

/// Runs the motion sequence against one drive
#[derive(Debug)]
pub struct MotionSequencer<'a, S, R> {
    sdo: &'a mut SdoClient<S, R>,
    node_id: NodeId,
    nmt_cob_id: CanId,
    config: &'a MotionConfig,
    sdo_timeout: Duration,
}

impl<'a, S: AsyncCanSender, R: AsyncCanReceiver> MotionSequencer<'a, S, R> {
    /// Create a sequencer
    ///
    /// `sdo_timeout` bounds each individual SDO exchange. The NMT start command is sent on
    /// `nmt_cob_id`.
    pub fn new(
        sdo: &'a mut SdoClient<S, R>,
        node_id: NodeId,
        nmt_cob_id: CanId,
        config: &'a MotionConfig,
        sdo_timeout: Duration,
    ) -> Self {
        Self {
            sdo,
            node_id,
            nmt_cob_id,
            config,
            sdo_timeout,
        }
    }

    /// Run the whole sequence
    ///
    /// On a [`ActivationError::MotionAbort`] a quick stop is attempted if configured. The brake
    /// is left released.
    pub async fn run(&mut self) -> Result<()> {
        log::info!("Starting {:?} mode motion on node {}", self.config.mode, self.node_id);
        let result = match self.config.mode {
            MotionMode::Position => self.run_position().await,
            MotionMode::Speed => self.run_speed().await,
        };

        if let Err(e) = &result {
            log::error!("Motion sequence failed: {e}");
            if matches!(e, ActivationError::MotionAbort { .. }) && self.config.quick_stop_on_abort {
                self.quick_stop().await;
            }
        }
        result
    }

    async fn run_position(&mut self) -> Result<()> {
        self.prepare(mode::PROFILE_POSITION).await?;

        if self.config.require_servo_ready {
            self.check_servo_ready().await?;
        }

        self.write_step(
            object_ids::PROFILE_ACCELERATION,
            self.config.acceleration,
            "acceleration",
        )
        .await?;
        self.write_step(
            object_ids::PROFILE_DECELERATION,
            self.config.deceleration,
            "deceleration",
        )
        .await?;
        self.write_step(object_ids::PROFILE_VELOCITY, self.config.max_speed, "max speed")
            .await?;
        self.write_step(
            object_ids::TARGET_POSITION,
            self.config.target_position,
            "target position",
        )
        .await?;

        self.enable().await?;
        self.control_word(self.config.start_control_word).await?;

        self.wait_target_reached().await
    }

    async fn run_speed(&mut self) -> Result<()> {
        self.prepare(mode::PROFILE_VELOCITY).await?;

        self.write_step(
            object_ids::SPEED_ACCELERATION,
            self.config.acceleration,
            "acceleration",
        )
        .await?;
        self.write_step(
            object_ids::SPEED_DECELERATION,
            self.config.deceleration,
            "deceleration",
        )
        .await?;
        let speed = self.config.target_speed();
        log::info!(
            "Target speed {speed} for {} m",
            self.config.distance_m
        );
        self.write_step(object_ids::TARGET_VELOCITY, speed, "target speed")
            .await?;

        self.enable().await?;

        tokio::time::sleep(self.config.dwell()).await;

        self.write_step(object_ids::TARGET_VELOCITY, 0i32, "stop").await?;
        log::info!("Speed mode motion complete");
        Ok(())
    }

    /// Steps shared by both modes: NMT start, brake release and mode selection
    async fn prepare(&mut self, mode: u8) -> Result<()> {
        if self.config.nmt_start {
            let cmd = NmtCommand {
                cmd: NmtCommandCmd::Start,
                node: self.node_id.raw(),
            };
            self.sdo
                .transmit(cmd.to_can_message(self.nmt_cob_id))
                .await?;
            log::info!("NMT start sent to node {}", self.node_id);
        }
        self.write_step(object_ids::BRAKE, BRAKE_RELEASE, "brake release")
            .await?;
        self.write_step(object_ids::MODE_OF_OPERATION, mode, "mode of operation")
            .await
    }

    async fn check_servo_ready(&mut self) -> Result<()> {
        let word = match self
            .sdo
            .request_read(object_ids::STATUS_WORD, 0, SdoWidth::U16, self.sdo_timeout)
            .await
        {
            Ok(word) => word as u16,
            Err(e) if e.is_transmit_error() => return Err(e.into()),
            Err(e) => {
                return MotionAbortSnafu {
                    reason: format!("status word unreadable: {e}"),
                }
                .fail()
            }
        };
        if word & status::SERVO_READY == 0 {
            return MotionAbortSnafu {
                reason: format!("servo not ready (status word 0x{word:04X})"),
            }
            .fail();
        }
        log::info!("Servo ready (status word 0x{word:04X})");
        Ok(())
    }

    async fn enable(&mut self) -> Result<()> {
        for word in control::ENABLE_SEQUENCE {
            self.control_word(word).await?;
        }
        Ok(())
    }

    async fn control_word(&mut self, word: u16) -> Result<()> {
        self.write_step(object_ids::CONTROL_WORD, word, "control word")
            .await?;
        tokio::time::sleep(self.config.control_step_delay()).await;
        Ok(())
    }

    async fn wait_target_reached(&mut self) -> Result<()> {
        let deadline = Deadline::arm(self.config.completion_window());
        loop {
            // Never let a single read run past the window
            let timeout = deadline.remaining().min(self.sdo_timeout);
            match self
                .sdo
                .request_read(object_ids::STATUS_WORD, 0, SdoWidth::U16, timeout)
                .await
            {
                Ok(word) if word as u16 & status::TARGET_REACHED != 0 => {
                    log::info!(
                        "Target reached after {} ms",
                        deadline.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Ok(_) => (),
                Err(e) if e.is_transmit_error() => return Err(e.into()),
                Err(e) => log::warn!("Status word poll failed: {e}"),
            }

            if deadline.expired() {
                return MotionAbortSnafu {
                    reason: format!(
                        "target not reached within {} ms",
                        deadline.timeout().as_millis()
                    ),
                }
                .fail();
            }
            let next_poll = Instant::now() + self.config.poll_interval();
            let give_up = deadline.instant() + Duration::from_millis(1);
            tokio::time::sleep_until(next_poll.min(give_up)).await;
        }
    }

    /// Write one parameter; only transmit failures are returned
    async fn write_step(
        &mut self,
        index: u16,
        value: impl Into<SdoValue>,
        what: &str,
    ) -> Result<()> {
        let value = value.into();
        match self
            .sdo
            .request_write(index, 0, value, self.sdo_timeout)
            .await
        {
            Ok(()) => {
                log::info!("Set {what} (0x{index:04X}) = {}", value.as_u32() as i32);
                Ok(())
            }
            Err(e) if e.is_transmit_error() => {
                log::error!("Failed to send {what}: {e}");
                Err(e.into())
            }
            Err(e) => {
                log::warn!("Setting {what} (0x{index:04X}) not confirmed: {e}");
                Ok(())
            }
        }
    }

    async fn quick_stop(&mut self) {
        log::warn!("Sending quick stop to node {}", self.node_id);
        if let Err(e) = self
            .sdo
            .send_write(object_ids::CONTROL_WORD, 0, control::QUICK_STOP)
            .await
        {
            log::error!("Quick stop failed: {e}");
        }
    }
}
