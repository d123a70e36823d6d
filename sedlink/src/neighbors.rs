//! Neighbor and child state.
//!
//! One record covers both directions of the parent-child relationship: the
//! parent side uses the supervision fields of its children, the child side
//! uses the CSL peer fields of its parent. Records live in fixed slots so
//! that a slot index is a stable child index, which is what supervision
//! messages carry as their payload.

use sedlink_frame::Address;

use crate::config;
use crate::message::MessageId;
use crate::time::Instant;

#[derive(Debug, PartialEq, Eq)]
pub enum TableError {
    Full,
}

/// Attachment state of a table entry.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NeighborState {
    /// Still attaching (e.g. a parent candidate mid-handshake).
    #[default]
    Pending,
    /// Fully attached.
    Valid,
}

/// Per-link transmit disposition counts, fed by the indirect completion
/// path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    tx_success: u32,
    tx_total: u32,
}

impl LinkStats {
    pub fn add_message_tx_status(&mut self, success: bool) {
        self.tx_total += 1;
        if success {
            self.tx_success += 1;
        }
    }

    pub fn tx_success(&self) -> u32 {
        self.tx_success
    }

    pub fn tx_total(&self) -> u32 {
        self.tx_total
    }
}

/// CSL peer scheduling state: where the peer's receive windows are, and the
/// retry bookkeeping of the message currently bound for it.
#[derive(Debug, Default, Clone)]
pub struct CslPeerInfo {
    synchronized: bool,
    /// Sampled-listening period in units of 10 symbols.
    period: u16,
    /// Offset of the next sample start, in units of 10 symbols.
    phase: u16,
    /// Radio timestamp of the last frame that carried a CSL IE.
    last_rx_timestamp: u64,
    /// Scheduler time when a CSL IE was last heard.
    last_heard: Option<Instant>,
    tx_attempts: u8,
    /// Per-peer override; zero falls back to the configured default.
    max_tx_attempts: u8,
    prev_sn: u8,
    prev_sn_valid: bool,
    indirect_message: Option<MessageId>,
    indirect_fragment_offset: u16,
    indirect_dsn: u8,
    indirect_frame_counter: u32,
    indirect_key_id: u8,
    indirect_message_count: u16,
}

impl CslPeerInfo {
    /// A peer is schedulable only when it is both marked synchronized and
    /// has announced a non-zero period.
    pub fn is_csl_synchronized(&self) -> bool {
        self.synchronized && self.period > 0
    }

    pub fn set_csl_synchronized(&mut self, synchronized: bool) {
        self.synchronized = synchronized;
    }

    pub fn csl_period(&self) -> u16 {
        self.period
    }

    pub fn set_csl_period(&mut self, period: u16) {
        self.period = period;
    }

    pub fn csl_phase(&self) -> u16 {
        self.phase
    }

    pub fn set_csl_phase(&mut self, phase: u16) {
        self.phase = phase;
    }

    pub fn last_rx_timestamp(&self) -> u64 {
        self.last_rx_timestamp
    }

    pub fn last_heard(&self) -> Option<Instant> {
        self.last_heard
    }

    /// Note a received frame carrying a CSL IE. Returns `false` when the
    /// sequence number repeats the previous frame (a link-layer duplicate);
    /// timestamps are refreshed either way.
    pub fn record_csl_frame(&mut self, sequence: u8, radio_timestamp: u64, now: Instant) -> bool {
        self.last_rx_timestamp = radio_timestamp;
        self.last_heard = Some(now);

        let duplicate = self.prev_sn_valid && self.prev_sn == sequence;
        self.prev_sn = sequence;
        self.prev_sn_valid = true;
        !duplicate
    }

    pub fn tx_attempts(&self) -> u8 {
        self.tx_attempts
    }

    pub fn increment_tx_attempts(&mut self) {
        self.tx_attempts += 1;
    }

    pub fn reset_tx_attempts(&mut self) {
        self.tx_attempts = 0;
    }

    /// The attempt limit in force: the per-peer override when set, the
    /// configured default otherwise.
    pub fn effective_max_tx_attempts(&self) -> u8 {
        if self.max_tx_attempts != 0 {
            self.max_tx_attempts
        } else {
            config::ENH_CSL_MAX_TX_ATTEMPTS
        }
    }

    pub fn set_max_tx_attempts(&mut self, attempts: u8) {
        self.max_tx_attempts = attempts;
    }

    pub fn reset_max_tx_attempts(&mut self) {
        self.max_tx_attempts = 0;
    }

    pub fn indirect_message(&self) -> Option<MessageId> {
        self.indirect_message
    }

    pub fn set_indirect_message(&mut self, message: Option<MessageId>) {
        self.indirect_message = message;
    }

    pub fn indirect_fragment_offset(&self) -> u16 {
        self.indirect_fragment_offset
    }

    pub fn set_indirect_fragment_offset(&mut self, offset: u16) {
        self.indirect_fragment_offset = offset;
    }

    pub fn indirect_dsn(&self) -> u8 {
        self.indirect_dsn
    }

    pub fn set_indirect_dsn(&mut self, dsn: u8) {
        self.indirect_dsn = dsn;
    }

    pub fn indirect_frame_counter(&self) -> u32 {
        self.indirect_frame_counter
    }

    pub fn set_indirect_frame_counter(&mut self, frame_counter: u32) {
        self.indirect_frame_counter = frame_counter;
    }

    pub fn indirect_key_id(&self) -> u8 {
        self.indirect_key_id
    }

    pub fn set_indirect_key_id(&mut self, key_id: u8) {
        self.indirect_key_id = key_id;
    }

    pub fn indirect_message_count(&self) -> u16 {
        self.indirect_message_count
    }

    pub fn increment_indirect_message_count(&mut self) {
        self.indirect_message_count += 1;
    }

    pub fn decrement_indirect_message_count(&mut self) {
        debug_assert!(self.indirect_message_count > 0);
        self.indirect_message_count = self.indirect_message_count.saturating_sub(1);
    }

    pub fn reset_indirect_message_count(&mut self) {
        self.indirect_message_count = 0;
    }
}

/// A neighboring device: a child on the parent side, the parent (or a
/// parent candidate) on the child side.
#[derive(Debug, Clone)]
pub struct Neighbor {
    ext_addr: [u8; 8],
    rloc16: u16,
    state: NeighborState,
    rx_on_when_idle: bool,
    /// Supervision units since the last downlink to this child; zero means
    /// supervision is disabled.
    supervision_interval: u16,
    units_since_last_supervision: u16,
    link: LinkStats,
    pub csl: CslPeerInfo,
}

impl Neighbor {
    pub fn new(ext_addr: [u8; 8], rloc16: u16) -> Self {
        Self {
            ext_addr,
            rloc16,
            state: NeighborState::Pending,
            rx_on_when_idle: true,
            supervision_interval: 0,
            units_since_last_supervision: 0,
            link: LinkStats::default(),
            csl: CslPeerInfo::default(),
        }
    }

    pub fn ext_addr(&self) -> [u8; 8] {
        self.ext_addr
    }

    pub fn rloc16(&self) -> u16 {
        self.rloc16
    }

    pub fn state(&self) -> NeighborState {
        self.state
    }

    pub fn set_state(&mut self, state: NeighborState) {
        self.state = state;
    }

    pub fn is_state_valid(&self) -> bool {
        self.state == NeighborState::Valid
    }

    pub fn rx_on_when_idle(&self) -> bool {
        self.rx_on_when_idle
    }

    pub fn set_rx_on_when_idle(&mut self, on: bool) {
        self.rx_on_when_idle = on;
    }

    pub fn supervision_interval(&self) -> u16 {
        self.supervision_interval
    }

    pub fn set_supervision_interval(&mut self, interval: u16) {
        self.supervision_interval = interval;
    }

    pub fn units_since_last_supervision(&self) -> u16 {
        self.units_since_last_supervision
    }

    pub fn increment_units_since_last_supervision(&mut self) {
        self.units_since_last_supervision = self.units_since_last_supervision.saturating_add(1);
    }

    pub fn reset_units_since_last_supervision(&mut self) {
        self.units_since_last_supervision = 0;
    }

    pub fn link(&self) -> &LinkStats {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkStats {
        &mut self.link
    }

    /// Whether the given MAC address identifies this neighbor.
    pub fn matches(&self, address: &Address) -> bool {
        match address {
            Address::Short(rloc16) => *rloc16 == self.rloc16,
            Address::Extended(ext) => *ext == self.ext_addr,
            Address::Absent => false,
        }
    }
}

/// Fixed-slot neighbor table. Slot indices are stable for the lifetime of
/// an entry and double as child indices.
#[derive(Debug)]
pub struct NeighborTable<const N: usize> {
    slots: [Option<Neighbor>; N],
    parent: Option<u8>,
    parent_candidate: Option<u8>,
}

impl<const N: usize> Default for NeighborTable<N> {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            parent: None,
            parent_candidate: None,
        }
    }
}

impl<const N: usize> NeighborTable<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a neighbor into the first free slot, returning its index.
    pub fn add(&mut self, neighbor: Neighbor) -> Result<u8, TableError> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(neighbor);
                return Ok(index as u8);
            }
        }
        Err(TableError::Full)
    }

    pub fn remove(&mut self, index: u8) -> Option<Neighbor> {
        if self.parent == Some(index) {
            self.parent = None;
        }
        if self.parent_candidate == Some(index) {
            self.parent_candidate = None;
        }
        self.slots.get_mut(index as usize)?.take()
    }

    pub fn get(&self, index: u8) -> Option<&Neighbor> {
        self.slots.get(index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut Neighbor> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    pub fn find(&self, address: &Address) -> Option<&Neighbor> {
        self.iter().find(|(_, n)| n.matches(address)).map(|(_, n)| n)
    }

    pub fn find_index(&self, address: &Address) -> Option<u8> {
        self.iter().find(|(_, n)| n.matches(address)).map(|(i, _)| i)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Neighbor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (i as u8, n)))
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.slots = core::array::from_fn(|_| None);
        self.parent = None;
        self.parent_candidate = None;
    }

    /// Whether the entry at `index` is a child (occupied and not the parent
    /// or parent candidate).
    pub fn is_child(&self, index: u8) -> bool {
        self.get(index).is_some()
            && self.parent != Some(index)
            && self.parent_candidate != Some(index)
    }

    /// Whether at least one child is in the valid state.
    pub fn has_valid_children(&self) -> bool {
        self.iter()
            .any(|(i, n)| self.is_child(i) && n.is_state_valid())
    }

    pub fn parent_index(&self) -> Option<u8> {
        self.parent
    }

    pub fn set_parent(&mut self, index: Option<u8>) {
        self.parent = index;
    }

    pub fn parent(&self) -> Option<&Neighbor> {
        self.get(self.parent?)
    }

    pub fn parent_candidate_index(&self) -> Option<u8> {
        self.parent_candidate
    }

    pub fn set_parent_candidate(&mut self, index: Option<u8>) {
        self.parent_candidate = index;
    }

    /// Whether the address identifies the current parent.
    pub fn is_parent_address(&self, address: &Address) -> bool {
        self.parent().map(|p| p.matches(address)).unwrap_or(false)
    }

    /// The peer CSL transmissions go to: the parent when fully attached,
    /// else the parent candidate while a wake-up-capable central is
    /// mid-handshake.
    pub fn csl_peer(&self, central_present: bool) -> Option<u8> {
        match self.parent {
            Some(index) if self.get(index).map(Neighbor::is_state_valid).unwrap_or(false) => {
                Some(index)
            }
            _ if central_present => self.parent_candidate,
            _ => None,
        }
    }
}
