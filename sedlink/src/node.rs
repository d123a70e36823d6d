//! Top-level wiring of the liveness subsystem.
//!
//! A [`Node`] owns the platform implementations ([`Clock`], [`Mac`],
//! [`Mle`]), the shared state (neighbor table, send queue, counters) and
//! the component state machines, and routes every external entry point to
//! the right component with the collaborators it needs. Components never
//! hold references to each other; the `Node` is the single owner and the
//! borrows live only for the duration of a call.
//!
//! The embedding drives three things:
//! - `poll(now)` from its timer queue (use `poll_at()` to sleep exactly
//!   long enough),
//! - the MAC callbacks (`handle_frame_request`, `handle_sent_frame`,
//!   `prepare_wakeup_frame`) from the radio glue,
//! - the receive path (`handle_received_frame`, `record_csl_frame`,
//!   `detect_wakeup_replay`) and stack events (`handle_notifier_events`).

use sedlink_frame::{Address, LinkAddresses, RxFrame, TxFrame, TxFrames};

use crate::csl::EnhCslSender;
use crate::message::{IpCounters, Message, MessageId, SendQueue};
use crate::neighbors::{Neighbor, NeighborTable};
use crate::notifier::Events;
use crate::supervision::{ChildSupervisor, SupervisionListener};
use crate::time::Instant;
use crate::traits::{Clock, Mac, Mle};
use crate::wakeup::WakeupTxScheduler;
use crate::wakeup_coords::WakeupCoordTable;
use crate::{config, Error};

pub struct Node<C: Clock, M: Mac, L: Mle, const N: usize, const Q: usize> {
    clock: C,
    mac: M,
    mle: L,
    local: LinkAddresses,
    rx_on_when_idle: bool,
    pub neighbors: NeighborTable<N>,
    pub send_queue: SendQueue<Q>,
    pub counters: IpCounters,
    supervisor: ChildSupervisor,
    listener: SupervisionListener,
    csl_sender: EnhCslSender,
    wakeup: WakeupTxScheduler,
    wakeup_coords: WakeupCoordTable<{ config::MAX_WAKEUP_COORDS }>,
}

impl<C: Clock, M: Mac, L: Mle, const N: usize, const Q: usize> Node<C, M, L, N, Q> {
    pub fn new(clock: C, mac: M, mle: L, local: LinkAddresses, bus_speed_hz: u32) -> Self {
        Self {
            clock,
            mac,
            mle,
            local,
            rx_on_when_idle: true,
            neighbors: NeighborTable::new(),
            send_queue: SendQueue::new(),
            counters: IpCounters::default(),
            supervisor: ChildSupervisor::new(),
            listener: SupervisionListener::new(),
            csl_sender: EnhCslSender::new(bus_speed_hz),
            wakeup: WakeupTxScheduler::new(bus_speed_hz),
            wakeup_coords: WakeupCoordTable::new(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    pub fn mle(&self) -> &L {
        &self.mle
    }

    pub fn mle_mut(&mut self) -> &mut L {
        &mut self.mle
    }

    pub fn local(&self) -> &LinkAddresses {
        &self.local
    }

    pub fn rx_on_when_idle(&self) -> bool {
        self.rx_on_when_idle
    }

    pub fn set_rx_on_when_idle(&mut self, on: bool) {
        self.rx_on_when_idle = on;
    }

    pub fn supervisor(&self) -> &ChildSupervisor {
        &self.supervisor
    }

    pub fn listener(&self) -> &SupervisionListener {
        &self.listener
    }

    pub fn wakeup(&self) -> &WakeupTxScheduler {
        &self.wakeup
    }

    /// Run every due timer. Call at (or after) `poll_at()`.
    pub fn poll(&mut self, now: Instant) {
        self.supervisor
            .poll(now, &self.mle, &mut self.neighbors, &mut self.send_queue);
        self.listener.poll(now, &mut self.mle, self.rx_on_when_idle);
        self.wakeup.poll(now, &mut self.mac);
    }

    /// The earliest armed timer across the subsystem.
    pub fn poll_at(&self) -> Option<Instant> {
        [
            self.supervisor.poll_at(),
            self.listener.poll_at(),
            self.wakeup.poll_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Forward stack notifier events.
    pub fn handle_notifier_events(&mut self, events: Events, now: Instant) {
        self.supervisor
            .handle_notifier_events(events, now, &self.mle, &self.neighbors);
    }

    /// Note a downlink emission to the child, resetting its supervision
    /// accrual.
    pub fn update_on_send(&mut self, child_index: u8) {
        if let Some(child) = self.neighbors.get_mut(child_index) {
            self.supervisor.update_on_send(child);
        }
    }

    /// Resolve the destination child of a supervision message.
    pub fn supervision_destination(&self, message: &Message) -> Option<&Neighbor> {
        ChildSupervisor::get_destination(message, &self.neighbors)
    }

    pub fn start_supervision_listener(&mut self, now: Instant) {
        self.listener.start(now, &self.mle, self.rx_on_when_idle);
    }

    pub fn stop_supervision_listener(&mut self) {
        self.listener.stop();
    }

    pub fn set_supervision_interval(&mut self, interval: u16) {
        self.listener.set_interval(interval, &mut self.mle);
    }

    pub fn set_supervision_timeout(&mut self, timeout: u16, now: Instant) {
        self.listener
            .set_timeout(timeout, now, &self.mle, self.rx_on_when_idle);
    }

    /// Feed a received frame into the supervision watchdog.
    pub fn handle_received_frame(&mut self, source: &Address, is_secure: bool, now: Instant) {
        self.listener.update_on_receive(
            source,
            is_secure,
            now,
            &self.mle,
            &self.neighbors,
            self.rx_on_when_idle,
        );
    }

    /// Note a received frame carrying a CSL IE from `source`. Returns
    /// `false` for a link-layer duplicate.
    pub fn record_csl_frame(
        &mut self,
        source: &Address,
        sequence: u8,
        radio_timestamp: u64,
        now: Instant,
    ) -> bool {
        match self.neighbors.find_index(source) {
            Some(index) => self
                .neighbors
                .get_mut(index)
                .map(|n| n.csl.record_csl_frame(sequence, radio_timestamp, now))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Queue a message for CSL delivery to the parent.
    pub fn add_csl_message(&mut self, message: Message) -> Result<MessageId, Error> {
        let peer = self
            .neighbors
            .csl_peer(self.mle.is_csl_central_present())
            .ok_or(Error::InvalidState)?;

        let id = self.send_queue.push(message)?;
        self.csl_sender.add_message(
            id,
            peer,
            &mut self.neighbors,
            &self.send_queue,
            &self.mle,
            &self.clock,
            &mut self.mac,
        )?;
        Ok(id)
    }

    /// Drop all messages queued for the CSL peer.
    pub fn clear_csl_messages(&mut self) {
        let Some(peer) = self.neighbors.csl_peer(self.mle.is_csl_central_present()) else {
            return;
        };
        self.csl_sender.clear_all_messages(
            peer,
            &mut self.neighbors,
            &mut self.send_queue,
            &self.mle,
            &self.clock,
            &mut self.mac,
        );
    }

    /// Re-evaluate CSL scheduling after queue or peer changes.
    pub fn update_csl_tx(&mut self) {
        self.csl_sender.update(
            &mut self.neighbors,
            &self.send_queue,
            &self.mle,
            &self.clock,
            &mut self.mac,
        );
    }

    /// MAC callback: produce the frame for a requested CSL transmission.
    pub fn handle_frame_request<'a>(&mut self, frames: &'a mut TxFrames) -> Option<&'a mut TxFrame> {
        self.csl_sender.handle_frame_request(
            frames,
            &self.neighbors,
            &self.send_queue,
            &self.clock,
            &self.local,
        )
    }

    /// MAC callback: a CSL transmission finished.
    pub fn handle_sent_frame(&mut self, frame: &TxFrame, status: Result<(), Error>) {
        self.csl_sender.handle_sent_frame(
            frame,
            status,
            &mut self.neighbors,
            &mut self.send_queue,
            &mut self.mle,
            &self.clock,
            &mut self.mac,
            &mut self.counters,
        );
    }

    /// Start a wake-up sequence to `target`.
    pub fn wake_up(
        &mut self,
        target: [u8; 8],
        interval_us: u16,
        duration_ms: u16,
    ) -> Result<(), Error> {
        self.wakeup.wake_up(target, interval_us, duration_ms, &self.clock)
    }

    pub fn stop_wakeup(&mut self) {
        self.wakeup.stop();
    }

    /// MAC callback: produce the next wake-up frame.
    pub fn prepare_wakeup_frame<'a>(&mut self, frames: &'a mut TxFrames) -> Option<&'a mut TxFrame> {
        self.wakeup.prepare_wakeup_frame(frames, &self.clock, &self.local)
    }

    /// Check a received wake-up frame for replay and record it.
    pub fn detect_wakeup_replay(&mut self, frame: &RxFrame) -> Result<(), Error> {
        self.wakeup_coords.detect_replay(frame, self.clock.now_in_secs())
    }

    /// Forget all trusted wake-up coordinators.
    pub fn clear_wakeup_coords(&mut self) {
        self.wakeup_coords.clear();
    }
}
