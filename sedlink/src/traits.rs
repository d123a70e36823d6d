//! Platform and stack seams.
//!
//! The liveness subsystem does not own the clock, the MAC scheduler or the
//! MLE role machine; it talks to them through these traits. Implement them
//! for your platform and hand the implementations to
//! [`Node::new`](crate::node::Node::new).

use crate::time::Instant;

/// Monotonic time sources.
///
/// The scheduler clock drives timers; the radio clock timestamps received
/// frames and schedules delayed transmissions. The two may be distinct
/// oscillators but are assumed to drift negligibly over a few seconds.
pub trait Clock {
    /// Scheduler time, in microseconds.
    fn now(&self) -> Instant;

    /// Radio time, in microseconds.
    fn radio_now(&self) -> u64;

    /// Wall-uptime in whole seconds, used for coarse aging.
    fn now_in_secs(&self) -> u32 {
        self.now().as_secs() as u32
    }
}

/// Requests into the MAC transmit scheduler.
///
/// Both requests are asynchronous at the system level: the MAC answers
/// later by invoking the corresponding frame-request callback
/// ([`csl::EnhCslSender::handle_frame_request`](crate::csl::EnhCslSender::handle_frame_request)
/// or
/// [`wakeup::WakeupTxScheduler::prepare_wakeup_frame`](crate::wakeup::WakeupTxScheduler::prepare_wakeup_frame))
/// from the same event-loop context.
pub trait Mac {
    /// Ask the MAC to run a CSL transmission `delay_ms` from now.
    fn request_enh_csl_frame_transmission(&mut self, delay_ms: u32);

    /// Ask the MAC to fetch and transmit the next wake-up frame.
    fn request_wakeup_frame_transmission(&mut self);
}

/// Role queries and recovery requests into the MLE state machine.
pub trait Mle {
    /// MLE operation is disabled entirely.
    fn is_disabled(&self) -> bool;

    /// The device is currently attached as a child.
    fn is_child(&self) -> bool;

    /// This central currently has an attached CSL peripheral child.
    fn is_csl_peripheral_present(&self) -> bool;

    /// This peripheral is currently tracking a CSL central.
    fn is_csl_central_present(&self) -> bool;

    /// Send a Child Update Request to the parent.
    fn send_child_update_request(&mut self);

    /// Re-attach with a Child ID Request short enough to avoid
    /// fragmentation.
    fn request_shorter_child_id_request(&mut self);

    /// Tear the attachment down and restart it.
    fn become_detached(&mut self);
}
