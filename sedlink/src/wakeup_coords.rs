//! Trusted wake-up coordinator table (CSL peripheral side).
//!
//! A wake-up frame commands a device to abandon its schedule and
//! re-attach, so a recorded one must not work twice. For every coordinator
//! this device has accepted a wake-up from, the table remembers the highest
//! key sequence and frame counter seen; a frame that does not advance that
//! pair is a replay.

use heapless::Vec;
use sedlink_frame::RxFrame;

use crate::{config, info, warn, Error};

/// One trusted wake-up coordinator.
#[derive(Debug, Clone, Copy)]
pub struct WakeupCoord {
    ext_addr: [u8; 8],
    key_sequence: u32,
    frame_counter: u32,
    last_updated: u32,
}

impl WakeupCoord {
    pub fn ext_addr(&self) -> [u8; 8] {
        self.ext_addr
    }

    pub fn key_sequence(&self) -> u32 {
        self.key_sequence
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    /// Seconds timestamp of the last accepted wake-up.
    pub fn last_updated(&self) -> u32 {
        self.last_updated
    }
}

/// Bounded anti-replay cache, keyed by extended address.
#[derive(Debug, Default)]
pub struct WakeupCoordTable<const N: usize> {
    coords: Vec<WakeupCoord, N>,
}

impl<const N: usize> WakeupCoordTable<N> {
    pub fn new() -> Self {
        Self { coords: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn clear(&mut self) {
        self.coords.clear();
    }

    pub fn get(&self, ext_addr: [u8; 8]) -> Option<&WakeupCoord> {
        self.coords.iter().find(|c| c.ext_addr == ext_addr)
    }

    /// Check a received wake-up frame against the table and record it.
    ///
    /// A frame from a known coordinator must carry a key sequence at least
    /// as new as the recorded one, and with an equal key sequence a
    /// strictly greater frame counter. An unknown coordinator is admitted
    /// if a slot is free, possibly after evicting an aged-out entry.
    pub fn detect_replay(&mut self, frame: &RxFrame, now_s: u32) -> Result<(), Error> {
        let Some(ext_addr) = frame.src_addr().extended() else {
            // Wake-up frames always carry extended addresses.
            return Err(Error::Security);
        };
        let key_sequence = u32::from_be_bytes(frame.key_source());
        let frame_counter = frame.frame_counter();

        let index = match self.coords.iter().position(|c| c.ext_addr == ext_addr) {
            Some(index) => {
                let coord = &self.coords[index];
                if key_sequence < coord.key_sequence
                    || (key_sequence == coord.key_sequence
                        && frame_counter <= coord.frame_counter)
                {
                    warn!(
                        "received replayed wake-up with source address {}",
                        frame.src_addr()
                    );
                    return Err(Error::Security);
                }
                index
            }
            None => {
                self.evict(now_s);
                let fresh = WakeupCoord {
                    ext_addr,
                    key_sequence: 0,
                    frame_counter: 0,
                    last_updated: 0,
                };
                if self.coords.push(fresh).is_err() {
                    info!("received a wake-up frame while the coordinator table was full");
                    return Err(Error::NoBufs);
                }
                self.coords.len() - 1
            }
        };

        let coord = &mut self.coords[index];
        coord.key_sequence = key_sequence;
        coord.frame_counter = frame_counter;
        coord.last_updated = now_s;
        Ok(())
    }

    /// Remove the single oldest entry that has aged past the eviction
    /// threshold, if any.
    fn evict(&mut self, now_s: u32) {
        if now_s <= config::WAKEUP_COORD_EVICT_AGE {
            return;
        }
        let mut oldest_updated = now_s - config::WAKEUP_COORD_EVICT_AGE;
        let mut oldest: Option<usize> = None;

        for (index, coord) in self.coords.iter().enumerate() {
            if coord.last_updated < oldest_updated {
                oldest_updated = coord.last_updated;
                oldest = Some(index);
            }
        }

        if let Some(index) = oldest {
            info!(
                "evicting wake-up coordinator {}",
                sedlink_frame::Address::Extended(self.coords[index].ext_addr)
            );
            self.coords.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sedlink_frame::Address;

    const COORD_A: [u8; 8] = [0xa; 8];
    const COORD_B: [u8; 8] = [0xb; 8];

    fn wakeup(ext: [u8; 8], key_sequence: u32, frame_counter: u32) -> RxFrame {
        RxFrame::new(Address::Extended(ext), 0)
            .with_security(key_sequence.to_be_bytes(), frame_counter)
    }

    #[test]
    fn fresh_coordinator_is_recorded() {
        let mut table = WakeupCoordTable::<4>::new();
        table.detect_replay(&wakeup(COORD_A, 5, 100), 1000).unwrap();

        let coord = table.get(COORD_A).unwrap();
        assert_eq!(coord.key_sequence(), 5);
        assert_eq!(coord.frame_counter(), 100);
        assert_eq!(coord.last_updated(), 1000);
    }

    #[test]
    fn equal_counter_is_a_replay() {
        let mut table = WakeupCoordTable::<4>::new();
        table.detect_replay(&wakeup(COORD_A, 5, 100), 1000).unwrap();

        assert_eq!(
            table.detect_replay(&wakeup(COORD_A, 5, 100), 1001),
            Err(Error::Security)
        );
        // The stored entry is untouched by the rejected frame.
        let coord = table.get(COORD_A).unwrap();
        assert_eq!(coord.frame_counter(), 100);
        assert_eq!(coord.last_updated(), 1000);
    }

    #[test]
    fn monotonic_pairs_are_accepted() {
        let mut table = WakeupCoordTable::<4>::new();
        table.detect_replay(&wakeup(COORD_A, 5, 100), 1000).unwrap();

        // Same key sequence, greater counter.
        table.detect_replay(&wakeup(COORD_A, 5, 101), 1001).unwrap();
        // Newer key sequence resets the counter requirement.
        table.detect_replay(&wakeup(COORD_A, 6, 3), 1002).unwrap();
        // Going back in key sequence is a replay.
        assert_eq!(
            table.detect_replay(&wakeup(COORD_A, 5, 999), 1003),
            Err(Error::Security)
        );
    }

    #[test]
    fn full_table_reports_no_bufs() {
        let mut table = WakeupCoordTable::<1>::new();
        table.detect_replay(&wakeup(COORD_A, 1, 1), 100).unwrap();
        assert_eq!(
            table.detect_replay(&wakeup(COORD_B, 1, 1), 100),
            Err(Error::NoBufs)
        );
    }

    #[test]
    fn aged_entry_is_evicted_for_a_newcomer() {
        let mut table = WakeupCoordTable::<1>::new();
        table.detect_replay(&wakeup(COORD_A, 1, 1), 100).unwrap();

        let later = 100 + config::WAKEUP_COORD_EVICT_AGE + 1;
        table.detect_replay(&wakeup(COORD_B, 1, 1), later).unwrap();
        assert!(table.get(COORD_A).is_none());
        assert!(table.get(COORD_B).is_some());
    }

    #[test]
    fn short_source_is_rejected() {
        let mut table = WakeupCoordTable::<4>::new();
        let frame = RxFrame::new(Address::Short(0x1234), 0).with_security([0; 4], 1);
        assert_eq!(table.detect_replay(&frame, 100), Err(Error::Security));
    }

    #[test]
    fn clear_drops_everything() {
        let mut table = WakeupCoordTable::<4>::new();
        table.detect_replay(&wakeup(COORD_A, 1, 1), 100).unwrap();
        table.clear();
        assert!(table.is_empty());
    }
}
