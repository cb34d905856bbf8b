//! A library for bringing up CANopen motor drives from their bootloader
//!
//! The [`BringupMachine`] takes a drive from its bootloader into CANopen mode, optionally
//! reassigns its node ID or runs a motion sequence, and resets it. Individual object accesses use
//! the [`SdoClient`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use drivelink_client::{
//!     common::{
//!         traits::{AsyncCanReceiver, AsyncCanSender},
//!         EventMailbox, NodeId,
//!     },
//!     BringupConfig, BringupMachine, BringupOutcome, Dispatcher,
//! };
//!
//! async fn bring_up(
//!     tx: impl AsyncCanSender,
//!     rx: impl AsyncCanReceiver + 'static,
//! ) -> BringupOutcome {
//!     let config = BringupConfig::new(NodeId::new(3).unwrap());
//!     let mbox = Arc::new(EventMailbox::new(config.node_id, config.sdo_response_cob_id()));
//!     let (_dispatcher, sdo_rx) = Dispatcher::spawn(rx, mbox.clone());
//!     let mut machine = BringupMachine::new(config, mbox, tx, sdo_rx);
//!     machine.run().await
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

mod bringup;
pub mod config;
mod deadline;
mod dispatcher;
mod error;
mod motion;
mod sdo_client;
#[cfg(test)]
mod test_utils;

pub use bringup::{BringupMachine, BringupOutcome, BringupState, CompletionCallback};
pub use config::{BringupConfig, BringupPath, FinalStage, MotionConfig, MotionMode};
pub use deadline::Deadline;
pub use dispatcher::{dispatch_frame, Dispatcher, DispatcherClosed, SdoResponseReceiver};
pub use error::ActivationError;
pub use motion::MotionSequencer;
pub use sdo_client::{SdoClient, SdoClientError};

pub use drivelink_common as common;

#[cfg(feature = "socketcan")]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use drivelink_common::open_socketcan;
