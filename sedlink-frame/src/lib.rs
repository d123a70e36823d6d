//! Frame field contracts for the `sedlink` link-liveness subsystem.
//!
//! This crate models the parts of an IEEE 802.15.4 frame that the liveness
//! and coordinated-sleep state machines read and write: addressing, MAC
//! sequence numbers, the security fields carried across retransmissions,
//! the tx-delay scheduling pair consumed by the radio, and the wake-up
//! information elements (Rendezvous Time and Connection).
//!
//! Frames are typed records, not byte buffers. Serialization to and from the
//! air interface is the responsibility of the radio driver; the contract
//! here is which fields exist and what the scheduler is allowed to touch.
//!
//! - [`Address`]: absent, short, or extended MAC address.
//! - [`TxFrame`]: an outgoing frame under construction.
//! - [`TxFrames`]: the frame pool handed to a frame-request callback.
//! - [`RxFrame`]: the fields of a received frame that replay detection
//!   needs.

#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

mod addressing;
mod frames;

pub use addressing::{Address, Addresses, LinkAddresses};
pub use frames::{ConnectionIe, FrameKind, RendezvousTimeIe, RxFrame, TxFrame, TxFrames};

/// Maximum MAC payload carried by a single [`TxFrame`].
pub const MAX_FRAME_PAYLOAD: usize = 127;

/// A frame-model error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error;

/// A frame-model result.
pub type Result<T> = core::result::Result<T, Error>;
