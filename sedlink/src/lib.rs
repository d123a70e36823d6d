//! Link-layer liveness and coordinated sleep for IEEE 802.15.4 Thread
//! meshes.
//!
//! A sleepy end device keeps its radio off most of the time; the parent and
//! the child each run a small set of time-driven state machines to keep the
//! link demonstrably alive and to land frames in the short windows when the
//! peer is actually listening:
//!
//! - [`supervision::ChildSupervisor`] (parent side) emits keep-alive frames
//!   to children that have seen no downlink traffic within their
//!   supervision interval.
//! - [`supervision::SupervisionListener`] (child side) watches for loss of
//!   contact with the parent and triggers recovery.
//! - [`csl::EnhCslSender`] (peripheral side) schedules queued messages into
//!   the parent's CSL receive windows, carrying retry state, frame counter
//!   and key id across attempts.
//! - [`wakeup::WakeupTxScheduler`] (central side) emits a microsecond-paced
//!   wake-up frame burst, and [`wakeup_coords::WakeupCoordTable`]
//!   (peripheral side) rejects replayed wake-ups.
//!
//! Everything runs in a single event-loop context: the embedding drives
//! [`node::Node::poll`] from its timer queue and forwards the radio
//! callbacks synchronously.

#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
pub(crate) mod utils;

pub use sedlink_frame as frame;

pub mod config;
pub mod constants;
pub mod csl;
pub mod message;
pub mod neighbors;
pub mod node;
pub mod notifier;
pub mod supervision;
pub mod time;
pub mod timer;
pub mod traits;
pub mod wakeup;
pub mod wakeup_coords;

/// Subsystem-level error kinds.
///
/// The transmission kinds (`NoAck`, `ChannelAccessFailure`, `Abort`) arrive
/// through the sent-frame callbacks; the rest surface from the public
/// operations that can fail.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// MAC transmission was not acknowledged.
    NoAck,
    /// The channel could not be accessed in time.
    ChannelAccessFailure,
    /// The transmission was aborted before it went out.
    Abort,
    /// A replayed or out-of-order secured frame.
    Security,
    /// A bounded resource is full.
    NoBufs,
    /// The operation does not apply in the current state.
    InvalidState,
    /// The message type is not supported on this path.
    NotImplemented,
}
