pub mod sim_bus;
pub mod sim_drive;
pub mod utils;

pub mod prelude {
    pub use super::sim_bus::{BusDevice, SendMode, SimBus, SimBusReceiver, SimBusSender};
    pub use super::sim_drive::{DriveMode, DriveSettings, RecordedWrite, SimDrive};
    pub use super::utils::{get_sdo_client, BusLogger, TestRig};
    pub use drivelink_client::{
        BringupConfig, BringupOutcome, BringupState, FinalStage, MotionMode, SdoClientError,
    };
    pub use drivelink_common::NodeId;
}
