//! Enhanced CSL transmission to a synchronized parent.
//!
//! A CSL peripheral spends almost all of its time with the radio off; its
//! parent samples the channel on a fixed period and the peripheral must
//! land every queued frame inside one of those receive windows. The
//! [`EnhCslSender`] binds the head of the forwarder's send queue to the
//! parent, computes the next window from the parent's period, phase and
//! last-heard timestamp, and asks the MAC for a delayed transmission.
//!
//! Retry accounting lives on the peer record: a retransmitted frame reuses
//! the previous data sequence number, and, unless the frame carries a CSL
//! IE of its own, the previous frame counter and key id. Too many
//! unacknowledged attempts mark the peer unsynchronized and detach.
//!
//! There is at most one CSL-synchronized peer; any message in the send
//! queue not marked for direct transmission is presumed to belong to it.

use sedlink_frame::{Address, Addresses, LinkAddresses, TxFrame, TxFrames};

use crate::constants::{
    bus_tx_time_us, BUS_FRAME_DATA_LENGTH, FRAME_PAYLOAD_CAPACITY, FRAME_PREPARATION_GUARD_US,
    US_PER_TEN_SYMBOLS,
};
use crate::message::{IpCounters, Message, MessageId, MessageKind, MessageSubKind, SendQueue};
use crate::neighbors::{Neighbor, NeighborTable};
use crate::traits::{Clock, Mac, Mle};
use crate::{config, info, note, Error};

/// Carry-over from frame preparation to the sent-frame callback.
#[derive(Debug, Default, Clone, Copy)]
struct FrameContext {
    message_next_offset: u16,
}

/// Computes the delay until the next CSL transmit window of `neighbor`,
/// requiring at least `ahead_us` of slack before the window opens.
///
/// Returns `(delay, delay_from_last_rx)`: the first is the time from now
/// until the transmission must be requested, the second the window start
/// relative to the neighbor's last-heard radio timestamp (the radio
/// schedules against that base).
pub fn next_csl_transmission_delay(
    neighbor: &Neighbor,
    radio_now: u64,
    ahead_us: u32,
) -> (u32, u32) {
    let period_us = neighbor.csl.csl_period() as u64 * US_PER_TEN_SYMBOLS as u64;
    debug_assert!(period_us > 0);

    let first_tx_window = neighbor.csl.last_rx_timestamp()
        + neighbor.csl.csl_phase() as u64 * US_PER_TEN_SYMBOLS as u64;
    let mut next_tx_window = radio_now - (radio_now % period_us) + (first_tx_window % period_us);

    while next_tx_window < radio_now + ahead_us as u64 {
        next_tx_window += period_us;
    }

    let delay_from_last_rx = (next_tx_window - neighbor.csl.last_rx_timestamp()) as u32;
    let delay = (next_tx_window - radio_now - ahead_us as u64) as u32;
    (delay, delay_from_last_rx)
}

/// Peripheral-side scheduler for indirect transmissions into the parent's
/// CSL windows.
#[derive(Debug)]
pub struct EnhCslSender {
    /// Peer of the transmission currently fired at the MAC, if any.
    csl_tx_neigh: Option<u8>,
    /// Message latched by the MAC for the in-flight transmission.
    csl_tx_message: Option<MessageId>,
    /// Lead time needed between requesting a transmission and the window,
    /// covering scheduling overhead plus the bus transfer of a full frame.
    frame_request_ahead_us: u32,
    frame_context: FrameContext,
}

impl EnhCslSender {
    pub fn new(bus_speed_hz: u32) -> Self {
        Self {
            csl_tx_neigh: None,
            csl_tx_message: None,
            frame_request_ahead_us: config::CSL_REQUEST_AHEAD_US
                + bus_tx_time_us(BUS_FRAME_DATA_LENGTH, bus_speed_hz),
            frame_context: FrameContext::default(),
        }
    }

    pub fn frame_request_ahead_us(&self) -> u32 {
        self.frame_request_ahead_us
    }

    /// Bind a queued message to the neighbor for CSL delivery and schedule
    /// the next window.
    pub fn add_message<const N: usize, const Q: usize>(
        &mut self,
        message: MessageId,
        neighbor_index: u8,
        neighbors: &mut NeighborTable<N>,
        queue: &SendQueue<Q>,
        mle: &impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
    ) -> Result<(), Error> {
        {
            let neighbor = neighbors
                .get_mut(neighbor_index)
                .ok_or(Error::InvalidState)?;

            if neighbor.csl.indirect_message().is_none() {
                neighbor.csl.set_indirect_message(Some(message));
                neighbor.csl.set_indirect_fragment_offset(0);
            }
            neighbor.csl.increment_indirect_message_count();
        }

        self.reschedule(neighbors, queue, mle, clock, mac);
        Ok(())
    }

    /// Drop every queued message bound for the neighbor and reset its
    /// retry state.
    pub fn clear_all_messages<const N: usize, const Q: usize>(
        &mut self,
        neighbor_index: u8,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
        mle: &impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
    ) {
        {
            let Some(neighbor) = neighbors.get_mut(neighbor_index) else {
                return;
            };
            if neighbor.csl.indirect_message_count() == 0 {
                return;
            }

            neighbor.csl.set_indirect_message(None);
            neighbor.csl.reset_indirect_message_count();
            neighbor.csl.reset_tx_attempts();
        }

        let ids: heapless::Vec<MessageId, Q> = queue.iter().map(Message::id).collect();
        for id in ids {
            queue.remove_if_no_pending_tx(id, neighbors);
        }

        self.update(neighbors, queue, mle, clock, mac);
    }

    /// Re-evaluate scheduling after queue or peer changes. If the MAC has
    /// already latched a frame for a message that is no longer current, the
    /// in-flight transmission is disowned and the sent-frame callback
    /// drives the next step; the MAC is never cancelled synchronously.
    pub fn update<const N: usize, const Q: usize>(
        &mut self,
        neighbors: &mut NeighborTable<N>,
        queue: &SendQueue<Q>,
        mle: &impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
    ) {
        if self.csl_tx_message.is_none() {
            self.reschedule(neighbors, queue, mle, clock, mac);
        } else if let Some(index) = self.csl_tx_neigh {
            let current = neighbors.get(index).and_then(|n| n.csl.indirect_message());
            if current != self.csl_tx_message {
                self.csl_tx_neigh = None;
                self.frame_context.message_next_offset = 0;
            }
        }
    }

    /// Pick the CSL peer, bind a message if none is bound, and request the
    /// next transmit window from the MAC.
    fn reschedule<const N: usize, const Q: usize>(
        &mut self,
        neighbors: &mut NeighborTable<N>,
        queue: &SendQueue<Q>,
        mle: &impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
    ) {
        self.csl_tx_neigh = neighbors.csl_peer(mle.is_csl_central_present());
        let Some(index) = self.csl_tx_neigh else {
            return;
        };
        let Some(neighbor) = neighbors.get_mut(index) else {
            return;
        };

        if neighbor.csl.indirect_message_count() == 0 {
            return;
        }

        if neighbor.csl.indirect_message().is_none() {
            if let Some(message) = queue.iter().find(|m| !m.is_direct_transmission()) {
                neighbor.csl.set_indirect_message(Some(message.id()));
                neighbor.csl.set_indirect_fragment_offset(0);
            }
        }

        if neighbor.csl.indirect_message().is_none() {
            // A positive counter with nothing in the queue means messages
            // were dequeued without notifying the sender; repair the
            // counter so scheduling recovers.
            neighbor.csl.reset_indirect_message_count();
            return;
        }

        if !neighbor.csl.is_csl_synchronized() {
            return;
        }

        let (delay, _) =
            next_csl_transmission_delay(neighbor, clock.radio_now(), self.frame_request_ahead_us);
        mac.request_enh_csl_frame_transmission(delay / 1000);
    }

    /// Fill the frame with the next fragment of the message, addressed for
    /// the neighbor. Returns the message offset after this fragment.
    fn prepare_data_frame(
        frame: &mut TxFrame,
        neighbor: &Neighbor,
        message: &Message,
        local: &LinkAddresses,
    ) -> u16 {
        let addresses = Addresses {
            source: local.source(),
            destination: match message.link_local_destination() {
                Some(iid) => Address::from_link_local_iid(iid),
                None => Address::Extended(neighbor.ext_addr()),
            },
        };

        frame.prepare_data(addresses, local.pan_id);
        if message.is_link_security_enabled() {
            frame.enable_security();
        }

        let offset = neighbor.csl.indirect_fragment_offset();
        let end = message.len().min(offset + FRAME_PAYLOAD_CAPACITY);
        // The fragment is bounded by FRAME_PAYLOAD_CAPACITY, below the
        // frame's payload capacity.
        let _ = frame.set_payload(&message.data()[offset as usize..end as usize]);

        // Intentionally not setting the frame pending bit even if more
        // messages are queued.

        end
    }

    fn prepare_frame_for_neighbor<const Q: usize>(
        &mut self,
        frame: &mut TxFrame,
        neighbor: &Neighbor,
        queue: &SendQueue<Q>,
        local: &LinkAddresses,
    ) -> Result<(), Error> {
        let message_id = neighbor.csl.indirect_message().ok_or(Error::InvalidState)?;
        let message = queue.get(message_id).ok_or(Error::InvalidState)?;

        match message.kind() {
            MessageKind::Ip6 => {
                self.frame_context.message_next_offset =
                    Self::prepare_data_frame(frame, neighbor, message, local);

                if message.sub_kind() == MessageSubKind::MleChildIdRequest
                    && message.is_link_security_enabled()
                {
                    note!("child id request requires fragmentation, aborting tx");
                    self.frame_context.message_next_offset = message.len();
                    return Err(Error::Abort);
                }

                Ok(())
            }
            _ => Err(Error::NotImplemented),
        }
    }

    /// MAC callback: produce the frame for the previously requested CSL
    /// transmission, or `None` when the window can no longer be met.
    pub fn handle_frame_request<'a, const N: usize, const Q: usize>(
        &mut self,
        frames: &'a mut TxFrames,
        neighbors: &NeighborTable<N>,
        queue: &SendQueue<Q>,
        clock: &impl Clock,
        local: &LinkAddresses,
    ) -> Option<&'a mut TxFrame> {
        let index = self.csl_tx_neigh?;
        let neighbor = neighbors.get(index)?;
        if !neighbor.csl.is_csl_synchronized() {
            return None;
        }

        let frame = frames.tx_frame_mut();
        frame.clear();

        if self
            .prepare_frame_for_neighbor(frame, neighbor, queue, local)
            .is_err()
        {
            return None;
        }
        self.csl_tx_message = neighbor.csl.indirect_message();

        if neighbor.csl.tx_attempts() > 0 {
            // A retransmission to a sleepy neighbor must carry the same
            // data sequence number, frame counter and key id as the
            // previous attempt. A frame containing a CSL IE is the
            // exception: it must be refreshed and re-secured.
            frame.set_is_a_retransmission(true);
            frame.set_sequence(neighbor.csl.indirect_dsn());

            if frame.security_enabled() && !frame.is_csl_ie_present() {
                frame.set_frame_counter(neighbor.csl.indirect_frame_counter());
                frame.set_key_id(neighbor.csl.indirect_key_id());
            }
        } else {
            frame.set_is_a_retransmission(false);
        }

        // Recompute with zero lead so a slightly late MAC operation does
        // not miss an otherwise reachable window.
        let (delay, tx_delay) = next_csl_transmission_delay(neighbor, clock.radio_now(), 0);
        if delay > self.frame_request_ahead_us + FRAME_PREPARATION_GUARD_US {
            return None;
        }

        frame.set_tx_delay(tx_delay);
        // Only the low half of the timestamp is needed as the delay base.
        frame.set_tx_delay_base_time(neighbor.csl.last_rx_timestamp() as u32);
        frame.set_csma_ca_enabled(false);

        Some(frame)
    }

    /// MAC callback: the transmission finished with `status`.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_sent_frame<const N: usize, const Q: usize>(
        &mut self,
        frame: &TxFrame,
        status: Result<(), Error>,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
        mle: &mut impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
        counters: &mut IpCounters,
    ) {
        self.csl_tx_message = None;

        // A disowned transmission: `update` already moved on and the
        // reschedule happened (or will happen) elsewhere.
        let Some(index) = self.csl_tx_neigh.take() else {
            return;
        };

        self.handle_sent_frame_to(frame, status, index, neighbors, queue, mle, clock, mac, counters);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_sent_frame_to<const N: usize, const Q: usize>(
        &mut self,
        frame: &TxFrame,
        status: Result<(), Error>,
        index: u8,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
        mle: &mut impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
        counters: &mut IpCounters,
    ) {
        match status {
            Ok(()) => {
                if let Some(neighbor) = neighbors.get_mut(index) {
                    neighbor.csl.reset_tx_attempts();
                }
            }
            Err(error @ (Error::NoAck | Error::ChannelAccessFailure | Error::Abort)) => {
                if error == Error::NoAck {
                    debug_assert!(!frame.security_enabled() || frame.is_header_updated());

                    let Some(neighbor) = neighbors.get_mut(index) else {
                        return;
                    };
                    neighbor.csl.increment_tx_attempts();
                    info!(
                        "csl tx to neighbor {} failed, attempt {}/{}",
                        neighbor.rloc16(),
                        neighbor.csl.tx_attempts(),
                        neighbor.csl.effective_max_tx_attempts()
                    );

                    if neighbor.csl.tx_attempts() >= neighbor.csl.effective_max_tx_attempts() {
                        // The peer stopped listening where we expected it
                        // to; consider it out of sync and re-attach.
                        neighbor.csl.set_csl_synchronized(false);
                        neighbor.csl.reset_tx_attempts();

                        let message = neighbor.csl.indirect_message();
                        neighbor.csl.set_indirect_message(None);

                        if let Some(id) = message {
                            if queue.get(id).map(|m| m.kind()) == Some(MessageKind::Ip6) {
                                counters.tx_failure += 1;
                            }
                            queue.remove_if_no_pending_tx(id, neighbors);
                        }

                        mle.become_detached();
                        return;
                    }
                }

                // Soft failure: the message is kept until its own attempt
                // budget runs out. Save the sequence number and security
                // material so the next attempt is a faithful replay.
                if !frame.is_empty() {
                    let Some(neighbor) = neighbors.get_mut(index) else {
                        return;
                    };
                    neighbor.csl.set_indirect_dsn(frame.sequence());

                    if frame.security_enabled() && frame.is_header_updated() {
                        neighbor.csl.set_indirect_frame_counter(frame.frame_counter());
                        neighbor.csl.set_indirect_key_id(frame.key_id());
                    }
                }

                let secured_child_id_request = neighbors
                    .get(index)
                    .and_then(|n| n.csl.indirect_message())
                    .and_then(|id| queue.get(id))
                    .map(|m| {
                        m.kind() == MessageKind::Ip6
                            && m.sub_kind() == MessageSubKind::MleChildIdRequest
                            && m.is_link_security_enabled()
                    })
                    .unwrap_or(false);

                if secured_child_id_request {
                    // A secured Child ID Request never fits a single CSL
                    // frame; finish it here and ask MLE for a shorter one.
                    self.handle_sent_to_neighbor(
                        frame, Err(error), index, neighbors, queue, mle, clock, mac, counters,
                    );
                    mle.request_shorter_child_id_request();
                }

                self.reschedule(neighbors, queue, mle, clock, mac);
                return;
            }
            Err(_) => {
                debug_assert!(false, "unexpected tx completion error");
                return;
            }
        }

        self.handle_sent_to_neighbor(
            frame,
            Ok(()),
            index,
            neighbors,
            queue,
            mle,
            clock,
            mac,
            counters,
        );
    }

    /// Advance or finish the indirect message after a transmission.
    #[allow(clippy::too_many_arguments)]
    fn handle_sent_to_neighbor<const N: usize, const Q: usize>(
        &mut self,
        frame: &TxFrame,
        status: Result<(), Error>,
        index: u8,
        neighbors: &mut NeighborTable<N>,
        queue: &mut SendQueue<Q>,
        mle: &impl Mle,
        clock: &impl Clock,
        mac: &mut impl Mac,
        counters: &mut IpCounters,
    ) {
        let next_offset = self.frame_context.message_next_offset;
        let message = neighbors.get(index).and_then(|n| n.csl.indirect_message());

        if let Some(id) = message {
            let (length, kind) = match queue.get(id) {
                Some(m) => (m.len(), m.kind()),
                None => (0, MessageKind::Ip6),
            };

            if next_offset < length {
                if let Some(neighbor) = neighbors.get_mut(index) {
                    neighbor.csl.set_indirect_fragment_offset(next_offset);
                }
                self.reschedule(neighbors, queue, mle, clock, mac);
                return;
            }

            // The indirect transfer of this message is done.
            if let Some(neighbor) = neighbors.get_mut(index) {
                neighbor.csl.set_indirect_message(None);
                neighbor.link_mut().add_message_tx_status(true);
                neighbor.csl.decrement_indirect_message_count();

                if !frame.is_empty() {
                    info!(
                        "indirect message {} to neighbor {} done",
                        id,
                        neighbor.rloc16()
                    );
                }
            }

            if kind == MessageKind::Ip6 {
                match status {
                    Ok(()) => counters.tx_success += 1,
                    Err(_) => counters.tx_failure += 1,
                }
            }

            queue.remove_if_no_pending_tx(id, neighbors);
        }

        self.reschedule(neighbors, queue, mle, clock, mac);
    }
}
