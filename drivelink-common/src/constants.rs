//! Constants defining drive objects and special values
//!
//!

/// Object indices used during bring-up and motion
pub mod object_ids {
    /// Store parameters command object
    pub const SAVE_OBJECTS: u16 = 0x1010;
    /// Manufacturer specific node ID object
    pub const NODE_ID: u16 = 0x2026;
    /// Manufacturer specific brake control object
    pub const BRAKE: u16 = 0x2058;
    /// Manufacturer specific acceleration time used in velocity mode
    pub const SPEED_ACCELERATION: u16 = 0x201C;
    /// Manufacturer specific deceleration time used in velocity mode
    pub const SPEED_DECELERATION: u16 = 0x201D;
    /// Control word
    pub const CONTROL_WORD: u16 = 0x6040;
    /// Status word
    pub const STATUS_WORD: u16 = 0x6041;
    /// Modes of operation
    pub const MODE_OF_OPERATION: u16 = 0x6060;
    /// Target position
    pub const TARGET_POSITION: u16 = 0x607A;
    /// Profile velocity (maximum speed while positioning)
    pub const PROFILE_VELOCITY: u16 = 0x6081;
    /// Profile acceleration
    pub const PROFILE_ACCELERATION: u16 = 0x6083;
    /// Profile deceleration
    pub const PROFILE_DECELERATION: u16 = 0x6084;
    /// Target velocity
    pub const TARGET_VELOCITY: u16 = 0x60FF;
}

/// Special values written to drive objects
pub mod values {
    /// Signature written to 0x1010 to store parameters ("save" in ASCII, little-endian)
    pub const SAVE_CMD: u32 = u32::from_le_bytes(*b"save");

    /// Written to the brake object to release the holding brake
    pub const BRAKE_RELEASE: u8 = 0x03;

    /// Modes of operation values
    pub mod mode {
        /// Profile position mode
        pub const PROFILE_POSITION: u8 = 1;
        /// Profile velocity mode
        pub const PROFILE_VELOCITY: u8 = 3;
    }

    /// Control word values
    pub mod control {
        /// Quick stop
        pub const QUICK_STOP: u16 = 0x0002;
        /// Shutdown, ready to switch on
        pub const PREPARE: u16 = 0x0006;
        /// Switch on
        pub const SWITCH_ON: u16 = 0x0007;
        /// Enable operation
        pub const ENABLE: u16 = 0x000F;
        /// Fault reset
        pub const CLEAR_FAULT: u16 = 0x0080;
        /// Enable operation with a new, immediate, relative set-point
        pub const START_RELATIVE_MOVE: u16 = 0x005F;

        /// The enabling sequence, in order
        pub const ENABLE_SEQUENCE: [u16; 4] = [CLEAR_FAULT, PREPARE, SWITCH_ON, ENABLE];
    }

    /// Status word bits
    pub mod status {
        /// Ready to switch on
        pub const SERVO_READY: u16 = 0x0001;
        /// Set in profile position mode once the target is reached
        pub const TARGET_REACHED: u16 = 0x0004;
    }
}
