//! Wake-up frame burst scheduling (CSL central side).
//!
//! Bringing a deep-sleep peripheral onto a CSL schedule starts with a burst
//! of wake-up frames at a fixed microsecond cadence, long enough that the
//! peripheral's sparse sniffing is guaranteed to overlap one of them. Each
//! frame tells the peripheral when to answer (Rendezvous Time IE) and how
//! to retry its link establishment (Connection IE).
//!
//! The burst is paced by a microsecond timer armed ahead of each
//! transmission by the request lead time; the next frame is armed from
//! within [`WakeupTxScheduler::prepare_wakeup_frame`] itself, because on a
//! radio co-processor the transmit-done callback arrives too late to keep
//! the cadence.

use sedlink_frame::{Address, ConnectionIe, LinkAddresses, RendezvousTimeIe, TxFrame, TxFrames};

use crate::constants::{
    bus_tx_time_us, OCTET_DURATION_US, PARENT_REQUEST_LENGTH, US_PER_TEN_SYMBOLS,
    WAKEUP_FRAME_DATA_LENGTH, WAKEUP_FRAME_LENGTH,
};
use crate::time::{Duration, Instant};
use crate::timer::Timer;
use crate::traits::{Clock, Mac};
use crate::{config, info, Error};

/// Emits one bounded wake-up sequence at a time.
#[derive(Debug)]
pub struct WakeupTxScheduler {
    /// Extended address of the device being woken.
    target: [u8; 8],
    /// Point in time when the next transmission occurs.
    tx_time: Instant,
    /// Point in time when the wake-up sequence is over.
    tx_end_time: Instant,
    /// Interval between consecutive wake-up frames, in microseconds.
    interval_us: u16,
    /// How far ahead of `tx_time` the MAC operation must be requested.
    tx_request_ahead_us: u32,
    timer: Timer,
    sequence_ongoing: bool,
}

impl WakeupTxScheduler {
    pub fn new(bus_speed_hz: u32) -> Self {
        Self {
            target: [0; 8],
            tx_time: Instant::ZERO,
            tx_end_time: Instant::ZERO,
            interval_us: 0,
            tx_request_ahead_us: config::CSL_REQUEST_AHEAD_US
                + bus_tx_time_us(WAKEUP_FRAME_DATA_LENGTH, bus_speed_hz),
            timer: Timer::new(),
            sequence_ongoing: false,
        }
    }

    /// Start a wake-up sequence to `target`, one frame every `interval_us`
    /// for `duration_ms`. Only one sequence may run at a time.
    pub fn wake_up(
        &mut self,
        target: [u8; 8],
        interval_us: u16,
        duration_ms: u16,
        clock: &impl Clock,
    ) -> Result<(), Error> {
        if self.sequence_ongoing {
            return Err(Error::InvalidState);
        }

        let now = clock.now();
        self.target = target;
        self.tx_time = now + Duration::from_us(self.tx_request_ahead_us as i64);
        self.tx_end_time = self.tx_time
            + Duration::from_ms(duration_ms as i64)
            + Duration::from_us(interval_us as i64);
        self.interval_us = interval_us;
        self.sequence_ongoing = true;

        info!("started wake-up sequence to {}", Address::Extended(target));

        self.schedule_next(true, clock);
        Ok(())
    }

    /// Abort the sequence.
    pub fn stop(&mut self) {
        self.sequence_ongoing = false;
        self.timer.stop();
    }

    pub fn is_sequence_ongoing(&self) -> bool {
        self.sequence_ongoing
    }

    /// End of the wake-up sequence.
    pub fn tx_end_time(&self) -> Instant {
        self.tx_end_time
    }

    /// How long this device listens for a link-establishment message after
    /// the last wake-up frame.
    pub fn connection_window_us(&self) -> u32 {
        self.interval_us as u32
            * config::CONNECTION_RETRY_INTERVAL as u32
            * config::CONNECTION_RETRY_COUNT as u32
    }

    pub fn poll_at(&self) -> Option<Instant> {
        self.timer.fire_time()
    }

    /// Drive the pacing timer; a due tick asks the MAC to fetch the next
    /// wake-up frame via [`Self::prepare_wakeup_frame`].
    pub fn poll(&mut self, now: Instant, mac: &mut impl Mac) {
        if self.timer.poll(now) {
            mac.request_wakeup_frame_transmission();
        }
    }

    /// MAC callback: produce the next wake-up frame, scheduled at the
    /// precomputed radio time. Arms the following frame before returning.
    pub fn prepare_wakeup_frame<'a>(
        &mut self,
        frames: &'a mut TxFrames,
        clock: &impl Clock,
        local: &LinkAddresses,
    ) -> Option<&'a mut TxFrame> {
        if !self.sequence_ongoing {
            return None;
        }

        // Bridge the scheduler clock to the radio clock; the two drift
        // negligibly over a burst of a few seconds.
        let radio_tx_us = clock.radio_now() as i64 + (self.tx_time - clock.now()).as_us();

        let frame = frames.tx_frame_mut();
        if frame
            .generate_wakeup_frame(
                local.pan_id,
                Address::Extended(self.target),
                Address::Extended(local.ext_addr),
            )
            .is_err()
        {
            return None;
        }

        frame.set_tx_delay_base_time(0);
        frame.set_tx_delay(radio_tx_us as u32);
        frame.set_csma_ca_enabled(false);
        frame.set_max_csma_backoffs(0);
        frame.set_max_frame_retries(0);

        // Rendezvous Time is the gap between the end of this wake-up frame
        // and the start of the receiver's reply. Aim the expected Parent
        // Request at the middle of the empty slot in the next interval.
        let interval_us = self.interval_us as u32;
        let rendezvous_us = interval_us
            .saturating_sub((WAKEUP_FRAME_LENGTH + PARENT_REQUEST_LENGTH) * OCTET_DURATION_US)
            / 2
            + interval_us;
        frame.set_rendezvous_time_ie(RendezvousTimeIe {
            rendezvous_time: (rendezvous_us / US_PER_TEN_SYMBOLS) as u16,
            wake_up_interval: (interval_us / US_PER_TEN_SYMBOLS) as u16,
        });
        frame.set_connection_ie(ConnectionIe {
            retry_interval: config::CONNECTION_RETRY_INTERVAL,
            retry_count: config::CONNECTION_RETRY_COUNT,
        });

        // Arm the next frame right away instead of waiting for the
        // transmit-done callback; the co-processor path is too slow to keep
        // the cadence otherwise.
        self.schedule_next(false, clock);

        Some(frame)
    }

    fn schedule_next(&mut self, first_frame: bool, clock: &impl Clock) {
        if !first_frame {
            // Advance to the next wake-up frame, catching up if late.
            let next = self.tx_time + Duration::from_us(self.interval_us as i64);
            let earliest = clock.now() + Duration::from_us(self.tx_request_ahead_us as i64);
            self.tx_time = next.max(earliest);
        }

        // This runs either at the start of the sequence or right after a
        // frame was handed to the MAC, so no frame is pending here and
        // ending the sequence is just dropping the flag.
        if self.tx_time >= self.tx_end_time {
            self.sequence_ongoing = false;
            info!("stopped wake-up sequence");
            return;
        }

        self.timer
            .fire_at(self.tx_time - Duration::from_us(self.tx_request_ahead_us as i64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::{MockClock, MockMac};

    const TARGET: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

    fn local() -> LinkAddresses {
        LinkAddresses {
            pan_id: 0xface,
            short_addr: 0x1c00,
            ext_addr: [0xcc; 8],
        }
    }

    #[test]
    fn only_one_sequence_at_a_time() {
        let clock = MockClock::new();
        let mut scheduler = WakeupTxScheduler::new(0);

        scheduler.wake_up(TARGET, 10_000, 20, &clock).unwrap();
        assert_eq!(
            scheduler.wake_up(TARGET, 10_000, 20, &clock),
            Err(Error::InvalidState)
        );

        scheduler.stop();
        assert!(!scheduler.is_sequence_ongoing());
        scheduler.wake_up(TARGET, 10_000, 20, &clock).unwrap();
    }

    #[test]
    fn burst_paces_frames_and_stops_on_schedule() {
        let clock = MockClock::new();
        clock.set_radio_offset_us(500_000);
        let mut mac = MockMac::default();
        let mut frames = TxFrames::new();
        let mut scheduler = WakeupTxScheduler::new(0);

        // Lead time with no bus is the configured base: 2000 us. First
        // frame at 2000, end at 2000 + 20_000 + 10_000 = 32_000.
        scheduler.wake_up(TARGET, 10_000, 20, &clock).unwrap();
        assert_eq!(scheduler.tx_end_time(), Instant::from_us(32_000));

        let mut tx_delays = std::vec::Vec::new();
        while scheduler.is_sequence_ongoing() {
            let fire = scheduler.poll_at().expect("armed while ongoing");
            clock.set_now_us(fire.as_us());
            scheduler.poll(fire, &mut mac);

            let frame = scheduler
                .prepare_wakeup_frame(&mut frames, &clock, &local())
                .expect("ongoing sequence yields a frame");
            tx_delays.push(frame.tx_delay());
        }

        assert_eq!(mac.wakeup_requests, 3);
        assert_eq!(
            tx_delays,
            std::vec![502_000, 512_000, 522_000],
            "frames land on the radio clock at the 10 ms cadence"
        );
        assert!(
            scheduler
                .prepare_wakeup_frame(&mut frames, &clock, &local())
                .is_none(),
            "no frames after the sequence ends"
        );
    }

    #[test]
    fn frame_carries_rendezvous_and_connection_ies() {
        let clock = MockClock::new();
        let mut frames = TxFrames::new();
        let mut scheduler = WakeupTxScheduler::new(0);
        scheduler.wake_up(TARGET, 10_000, 20, &clock).unwrap();

        let frame = scheduler
            .prepare_wakeup_frame(&mut frames, &clock, &local())
            .unwrap();

        assert_eq!(frame.destination(), Address::Extended(TARGET));
        assert_eq!(frame.source(), Address::Extended([0xcc; 8]));
        assert!(!frame.csma_ca_enabled());
        assert_eq!(frame.max_csma_backoffs(), 0);
        assert_eq!(frame.max_frame_retries(), 0);
        assert_eq!(frame.tx_delay_base_time(), 0);

        // (10_000 - 132 * 32) / 2 + 10_000 = 12_888 us -> 80 ten-symbol
        // units.
        let rendezvous = frame.rendezvous_time_ie().unwrap();
        assert_eq!(rendezvous.rendezvous_time, 80);
        assert_eq!(rendezvous.wake_up_interval, 62);

        let connection = frame.connection_ie().unwrap();
        assert_eq!(connection.retry_interval, config::CONNECTION_RETRY_INTERVAL);
        assert_eq!(connection.retry_count, config::CONNECTION_RETRY_COUNT);
    }

    #[test]
    fn late_poll_catches_up() {
        let clock = MockClock::new();
        let mut frames = TxFrames::new();
        let mut scheduler = WakeupTxScheduler::new(0);
        scheduler.wake_up(TARGET, 10_000, 100, &clock).unwrap();

        // The event loop stalls well past the second frame's slot.
        clock.set_now_us(50_000);
        scheduler
            .prepare_wakeup_frame(&mut frames, &clock, &local())
            .unwrap();

        // Next tx is pushed to now + lead rather than a slot in the past.
        assert_eq!(scheduler.poll_at(), Some(Instant::from_us(50_000)));
    }

    #[test]
    fn connection_window() {
        let clock = MockClock::new();
        let mut scheduler = WakeupTxScheduler::new(0);
        scheduler.wake_up(TARGET, 10_000, 20, &clock).unwrap();
        assert_eq!(
            scheduler.connection_window_us(),
            10_000
                * config::CONNECTION_RETRY_INTERVAL as u32
                * config::CONNECTION_RETRY_COUNT as u32
        );
    }
}
