#![allow(dead_code)]

//! User-configurable defaults. Embeddings that need different values fork
//! this module the same way they would a board configuration header.

use crate::time::Duration;

/// Default maximum number of CSL-triggered transmission attempts before the
/// peer is considered out of sync. A per-neighbor override takes precedence
/// when non-zero.
pub const ENH_CSL_MAX_TX_ATTEMPTS: u8 = 4;

/// Base lead time for requesting a scheduled transmission from the radio,
/// before accounting for bus transfer time.
pub const CSL_REQUEST_AHEAD_US: u32 = 2000;

/// Capacity of the trusted wake-up coordinator table.
pub const MAX_WAKEUP_COORDS: usize = 8;

/// Age in seconds after which a wake-up coordinator entry may be evicted to
/// make room for a new one.
pub const WAKEUP_COORD_EVICT_AGE: u32 = 600;

/// Connection IE: how many wake-up intervals apart the woken device should
/// space its link-establishment retries.
pub const CONNECTION_RETRY_INTERVAL: u8 = 2;

/// Connection IE: how many link-establishment attempts the woken device
/// should make.
pub const CONNECTION_RETRY_COUNT: u8 = 4;

/// Default supervision interval a child asks its parent for, in supervision
/// units (seconds, or 100 ms under a wake-up-capable central).
pub const SUPERVISION_DEFAULT_INTERVAL: u16 = 129;

/// Default supervision timeout on the child side, in seconds.
pub const SUPERVISION_DEFAULT_TIMEOUT: u16 = 190;

/// Supervision interval used while synchronized to a wake-up-capable
/// central, in 100 ms units.
pub const WOR_INTERVAL: u16 = 10;

/// Supervision timeout used while synchronized to a wake-up-capable
/// central, in 100 ms units.
pub const WOR_TIMEOUT: u16 = 40;

/// Supervisor tick period when supervision units are seconds.
pub const SUPERVISION_TICK_PERIOD: Duration = Duration::from_ms(1000);

/// Supervisor tick period when supervision units are 100 ms, i.e. when a
/// CSL peripheral is attached.
pub const SUPERVISION_TICK_PERIOD_WOR: Duration = Duration::from_ms(100);
