//! Bring-up configuration
//!
//! A [`BringupConfig`] is loaded from a TOML file and selects the path the state machine takes,
//! the timing of every wait, and the motion parameters.
//!
//! # An example TOML file
//!
//! ```toml
//! node_id = 3
//!
//! [path]
//! version_check = true
//! await_activation_ack = true
//! check_sdo = true
//!
//! [path.final_stage]
//! kind = "motion"
//!
//! [motion]
//! mode = "position"
//! target_position = 0xC000
//! completion_window_ms = 15000
//! ```
//!
//! Every timing value is in milliseconds and has a default, so a minimal file only needs
//! `node_id`.
use std::time::Duration;

use drivelink_common::{messages::CanId, messages::SDO_RESP_BASE, NodeId};

/// Largest standard (11-bit) COB-ID
const MAX_STD_COB_ID: u16 = 0x7FF;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};

/// Error returned when loading a config fails
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// An IO error occured while reading the file
    #[snafu(display("IO error: {source}"))]
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// An error occured in the TOML parser
    #[snafu(display("Toml parse error: {source}"))]
    TomlParsing {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
    /// A COB-ID does not fit in a standard 11-bit identifier
    #[snafu(display("Invalid {name}: 0x{value:X} is not an 11-bit COB-ID"))]
    InvalidCobId {
        /// Parameter name
        name: &'static str,
        /// The configured value
        value: u16,
    },
    /// A motion parameter has an unusable value
    #[snafu(display("Invalid motion parameter {name}: {reason}"))]
    InvalidMotionParameter {
        /// Parameter name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

fn default_state_timeout_ms() -> u64 {
    5000
}
fn default_sdo_timeout_ms() -> u64 {
    6000
}
fn default_transmit_timeout_ms() -> u64 {
    500
}
fn default_tick_interval_ms() -> u64 {
    10
}
fn default_sdo_response_base() -> u16 {
    SDO_RESP_BASE
}
fn default_true() -> bool {
    true
}

/// Top level bring-up configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BringupConfig {
    /// Address of the drive
    pub node_id: NodeId,
    /// COB-ID for raw bootloader commands. Defaults to the node ID itself.
    #[serde(default)]
    pub command_cob_id: Option<u16>,
    /// COB-ID for the NMT start and reset commands. Defaults to the command COB-ID; set it to 0
    /// for drives which listen on the standard NMT broadcast.
    #[serde(default)]
    pub nmt_cob_id: Option<u16>,
    /// Base for the SDO response COB-ID, for drives which do not use 0x580
    #[serde(default = "default_sdo_response_base")]
    pub sdo_response_base: u16,
    /// Deadline for each wait state
    #[serde(default = "default_state_timeout_ms")]
    pub state_timeout_ms: u64,
    /// Deadline for each SDO exchange
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u64,
    /// Deadline for the transport to accept a frame
    #[serde(default = "default_transmit_timeout_ms")]
    pub transmit_timeout_ms: u64,
    /// Period between state machine ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// The stages to run
    #[serde(default)]
    pub path: BringupPath,
    /// Motion parameters, used when the final stage is `motion`
    #[serde(default)]
    pub motion: MotionConfig,
}

impl BringupConfig {
    /// Create a config with default settings for a node
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            command_cob_id: None,
            nmt_cob_id: None,
            sdo_response_base: default_sdo_response_base(),
            state_timeout_ms: default_state_timeout_ms(),
            sdo_timeout_ms: default_sdo_timeout_ms(),
            transmit_timeout_ms: default_transmit_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            path: BringupPath::default(),
            motion: MotionConfig::default(),
        }
    }

    /// Try to read a config from a file
    pub fn load(config_path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(&config_path).context(IoSnafu)?;
        Self::load_from_str(&config_str)
    }

    /// Try to read a config from a &str
    pub fn load_from_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: BringupConfig = toml::from_str(config_str).context(TomlParsingSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let cob_ids = [
            ("command_cob_id", self.command_cob_id),
            ("nmt_cob_id", self.nmt_cob_id),
            // The highest node's response must still fit
            (
                "sdo_response_base",
                Some(self.sdo_response_base.saturating_add(NodeId::MAX as u16)),
            ),
        ];
        for (name, value) in cob_ids {
            if let Some(value) = value.filter(|v| *v > MAX_STD_COB_ID) {
                return InvalidCobIdSnafu { name, value }.fail();
            }
        }
        self.motion.validate()
    }

    /// The COB-ID raw bootloader commands are sent on
    pub fn command_cob_id(&self) -> CanId {
        CanId::Std(self.command_cob_id.unwrap_or(self.node_id.raw() as u16))
    }

    /// The COB-ID NMT commands are sent on
    pub fn nmt_cob_id(&self) -> CanId {
        match self.nmt_cob_id {
            Some(id) => CanId::Std(id),
            None => self.command_cob_id(),
        }
    }

    /// The COB-ID SDO responses are expected on
    pub fn sdo_response_cob_id(&self) -> CanId {
        self.node_id
            .sdo_response_id_with_base(self.sdo_response_base)
    }

    /// Deadline for each wait state
    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    /// Deadline for each SDO exchange
    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(self.sdo_timeout_ms)
    }

    /// Deadline for the transport to accept a frame
    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms)
    }

    /// Period between state machine ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Selects the optional stages of the bring-up sequence
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BringupPath {
    /// Query the bootloader version and wait for the reply before activating
    #[serde(default = "default_true")]
    pub version_check: bool,
    /// Wait for the bootloader to acknowledge activation
    #[serde(default = "default_true")]
    pub await_activation_ack: bool,
    /// Read back the drive's control registers for diagnostics
    #[serde(default)]
    pub check_sdo: bool,
    /// Release the holding brake as a separate stage
    #[serde(default)]
    pub release_brake: bool,
    /// The stage run before the final reset
    #[serde(default)]
    pub final_stage: FinalStage,
}

impl Default for BringupPath {
    fn default() -> Self {
        Self {
            version_check: true,
            await_activation_ack: true,
            check_sdo: false,
            release_brake: false,
            final_stage: FinalStage::None,
        }
    }
}

fn default_settle_ms() -> u64 {
    1000
}

/// The last stage before the soft reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalStage {
    /// Go straight to the reset
    #[default]
    None,
    /// Assign a new node ID and store it on the drive
    ChangeNodeId {
        /// The new address; validated when the stage runs
        new_id: u8,
        /// Delay before issuing the change
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    /// Run the motion sequence
    Motion,
}

/// Operating mode for the motion sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionMode {
    /// Profile position mode: move to a target and wait for "target reached"
    #[default]
    Position,
    /// Profile velocity mode: run at a speed for a fixed time, then stop
    Speed,
}

/// Motion parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MotionConfig {
    /// Operating mode
    pub mode: MotionMode,
    /// Send NMT start-operational before the sequence
    pub nmt_start: bool,
    /// Acceleration time constant
    pub acceleration: u32,
    /// Deceleration time constant
    pub deceleration: u32,
    /// Position mode: maximum profile speed
    pub max_speed: u32,
    /// Position mode: target position in encoder counts
    pub target_position: i32,
    /// Position mode: require the servo ready bit before moving
    pub require_servo_ready: bool,
    /// Position mode: control word which starts the move after enabling
    pub start_control_word: u16,
    /// Position mode: status word poll period
    pub poll_interval_ms: u64,
    /// Position mode: time allowed for the move to complete
    pub completion_window_ms: u64,
    /// Speed mode: distance to travel, in metres
    pub distance_m: f32,
    /// Speed mode: drive speed units per metre
    pub conversion_factor: f32,
    /// Speed mode: multiplier applied to the converted speed
    pub speed_scale: f32,
    /// Speed mode: time to run before stopping
    pub dwell_ms: u64,
    /// Delay after each control word write
    pub control_step_delay_ms: u64,
    /// Send a quick stop if the sequence is aborted
    pub quick_stop_on_abort: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            mode: MotionMode::Position,
            nmt_start: true,
            acceleration: 1000,
            deceleration: 1000,
            max_speed: 5000,
            target_position: 0xC000,
            require_servo_ready: true,
            start_control_word: 0x005F,
            poll_interval_ms: 100,
            completion_window_ms: 15000,
            distance_m: 1.0,
            conversion_factor: 9000.0,
            speed_scale: 1.5,
            dwell_ms: 19000,
            control_step_delay_ms: 2000,
            quick_stop_on_abort: true,
        }
    }
}

impl MotionConfig {
    /// Target speed for speed mode, in drive units
    pub fn target_speed(&self) -> i32 {
        (self.distance_m * self.conversion_factor * self.speed_scale) as i32
    }

    /// Status word poll period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Time allowed for a position move
    pub fn completion_window(&self) -> Duration {
        Duration::from_millis(self.completion_window_ms)
    }

    /// Speed mode run time
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Delay after each control word write
    pub fn control_step_delay(&self) -> Duration {
        Duration::from_millis(self.control_step_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == MotionMode::Position && self.poll_interval_ms == 0 {
            return InvalidMotionParameterSnafu {
                name: "poll_interval_ms",
                reason: "must be greater than zero",
            }
            .fail();
        }
        if !self.target_speed_in_range() {
            return InvalidMotionParameterSnafu {
                name: "distance_m",
                reason: format!(
                    "converted speed {} does not fit the target velocity object",
                    self.distance_m * self.conversion_factor * self.speed_scale
                ),
            }
            .fail();
        }
        Ok(())
    }

    fn target_speed_in_range(&self) -> bool {
        let speed = self.distance_m * self.conversion_factor * self.speed_scale;
        speed.is_finite() && speed >= i32::MIN as f32 && speed <= i32::MAX as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_minimal_config_defaults() {
        let config = BringupConfig::load_from_str("node_id = 3").unwrap();
        assert_eq!(config.node_id.raw(), 3);
        assert_eq!(config.command_cob_id(), CanId::Std(3));
        assert_eq!(config.nmt_cob_id(), CanId::Std(3));
        assert_eq!(config.sdo_response_cob_id(), CanId::Std(0x583));
        assert_eq!(config.state_timeout(), Duration::from_millis(5000));
        assert_eq!(config.sdo_timeout(), Duration::from_millis(6000));
        assert_eq!(config.transmit_timeout(), Duration::from_millis(500));
        assert!(config.path.version_check);
        assert_eq!(config.path.final_stage, FinalStage::None);
    }

    #[test]
    fn test_full_config() {
        const TOML: &str = r#"
            node_id = 0x10
            command_cob_id = 0x7F0
            sdo_response_base = 0x500

            [path]
            version_check = false
            await_activation_ack = false
            check_sdo = true

            [path.final_stage]
            kind = "change_node_id"
            new_id = 0x11

            [motion]
            mode = "speed"
            distance_m = 2.0
            conversion_factor = 9000.0
            speed_scale = 1.5
        "#;
        let config = BringupConfig::load_from_str(TOML).unwrap();
        assert_eq!(config.command_cob_id(), CanId::Std(0x7F0));
        assert_eq!(config.nmt_cob_id(), CanId::Std(0x7F0));
        assert_eq!(config.sdo_response_cob_id(), CanId::Std(0x510));
        assert!(!config.path.version_check);
        assert_eq!(
            config.path.final_stage,
            FinalStage::ChangeNodeId {
                new_id: 0x11,
                settle_ms: 1000
            }
        );
        assert_eq!(config.motion.mode, MotionMode::Speed);
        assert_eq!(config.motion.target_speed(), 27000);
    }

    #[test]
    fn test_invalid_node_id_rejected() {
        let err = BringupConfig::load_from_str("node_id = 200").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParsing { .. }));
        assert_contains!(err.to_string(), "Invalid node ID");
    }

    #[test]
    fn test_broadcast_nmt_cob_id() {
        let config = BringupConfig::load_from_str("node_id = 3\nnmt_cob_id = 0").unwrap();
        assert_eq!(config.command_cob_id(), CanId::Std(3));
        assert_eq!(config.nmt_cob_id(), CanId::Std(0));
    }

    #[test]
    fn test_cob_ids_must_fit_11_bits() {
        let err = BringupConfig::load_from_str("node_id = 3\ncommand_cob_id = 0x800").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidCobId {
                name: "command_cob_id",
                value: 0x800
            }
        ));
        assert_contains!(err.to_string(), "0x800");

        let err = BringupConfig::load_from_str("node_id = 3\nnmt_cob_id = 0xFFFF").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCobId { name: "nmt_cob_id", .. }));

        // 0x780 + 0x7F overflows the standard range
        let err = BringupConfig::load_from_str("node_id = 3\nsdo_response_base = 0x780").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCobId { name: "sdo_response_base", .. }));

        let config = BringupConfig::load_from_str("node_id = 3\ncommand_cob_id = 0x7FF").unwrap();
        assert_eq!(config.command_cob_id(), CanId::Std(0x7FF));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = BringupConfig::load_from_str("node_id = 3\nnode = 4").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParsing { .. }));
    }
}
