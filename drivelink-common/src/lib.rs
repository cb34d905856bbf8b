//! Common functionality shared among the drivelink crates.
//!
//! Contains the frame types, SDO codec and bootloader protocol definitions, along with the
//! [`EventMailbox`] used to hand received frames from a receive context to the bring-up state
//! machine. Most users will use it through the re-export in `drivelink-client`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod bootloader;
pub mod constants;
pub mod mailbox;
pub mod messages;
pub mod nmt;
pub mod node_id;
pub mod sdo;
pub mod traits;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::{open_socketcan, SocketCanReceiver, SocketCanSender};

pub use mailbox::EventMailbox;
pub use messages::{CanError, CanId, CanMessage};
pub use node_id::NodeId;
