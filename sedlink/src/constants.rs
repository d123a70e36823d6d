#![allow(dead_code)]

//! Protocol-derived constants for the 2.4 GHz O-QPSK PHY.

/// Symbol duration at 62.5 ksymbol/s.
pub const SYMBOL_DURATION_US: u32 = 16;

/// Ten symbols, the base unit of CSL phase and period fields.
pub const US_PER_TEN_SYMBOLS: u32 = 10 * SYMBOL_DURATION_US;

/// Air time of one octet at 250 kbit/s.
pub const OCTET_DURATION_US: u32 = 32;

/// Guard added when checking whether a CSL frame can still be prepared in
/// time for its window.
pub const FRAME_PREPARATION_GUARD_US: u32 = 1500;

/// Length of a wake-up frame on air, including SHR and PHR.
pub const WAKEUP_FRAME_LENGTH: u32 = 54;

/// Length of the Parent Request a woken device answers with, including SHR
/// and PHR. Together with [`WAKEUP_FRAME_LENGTH`] this sizes the rendezvous
/// gap between wake-up frames.
pub const PARENT_REQUEST_LENGTH: u32 = 78;

/// Transport-level size of a wake-up frame on the radio co-processor bus.
/// Determined experimentally; larger than the air length because of
/// transport framing and metadata.
pub const WAKEUP_FRAME_DATA_LENGTH: u32 = 100;

/// Transport-level size of the longest data frame on the bus.
pub const BUS_FRAME_DATA_LENGTH: u32 = 150;

/// MAC payload budget of a single secured data frame: 127 octets minus the
/// MHR with extended addressing, the MIC and the FCS. Messages longer than
/// this are fragmented across CSL windows.
pub const FRAME_PAYLOAD_CAPACITY: u16 = 88;

/// Time needed to push `octets` over a bus running at `bus_speed_hz`,
/// rounded up. Zero when the bus speed is unknown, in which case the
/// scheduling lead time falls back to its configured base.
pub const fn bus_tx_time_us(octets: u32, bus_speed_hz: u32) -> u32 {
    if bus_speed_hz == 0 {
        0
    } else {
        (octets * 8 * 1_000_000 + bus_speed_hz - 1) / bus_speed_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_symbols() {
        assert_eq!(US_PER_TEN_SYMBOLS, 160);
    }

    #[test]
    fn bus_time_rounds_up() {
        // 150 octets at 1 MHz: 1200 bits -> 1200 us exactly.
        assert_eq!(bus_tx_time_us(150, 1_000_000), 1200);
        // One extra Hz shy of even division rounds up.
        assert_eq!(bus_tx_time_us(150, 999_999), 1201);
        assert_eq!(bus_tx_time_us(150, 0), 0);
    }
}
