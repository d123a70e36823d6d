//! Outgoing and incoming frame models.

use heapless::Vec;

use super::{Address, Addresses, Error, Result, MAX_FRAME_PAYLOAD};

/// The kind of MAC frame being built.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    #[default]
    Data,
    WakeUp,
}

/// Rendezvous Time header IE: the gap between the end of a wake-up frame
/// and the expected start of the receiver's reply, plus the interval at
/// which wake-up frames repeat. Both in units of 10 symbols.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RendezvousTimeIe {
    pub rendezvous_time: u16,
    pub wake_up_interval: u16,
}

/// Connection header IE: how often and how many times the woken device
/// should retry its link-establishment request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionIe {
    pub retry_interval: u8,
    pub retry_count: u8,
}

/// Length of fc + seq + dst pan + two extended addresses.
const MHR_EXTENDED_LEN: u16 = 21;
/// Header IE descriptor plus a two-octet content field.
const SHORT_IE_LEN: u16 = 4;

/// An outgoing MAC frame under construction.
///
/// The sequence number of a fresh transmission is assigned by the MAC; a
/// retransmission carries the sequence saved from the previous attempt.
/// Writing security material into the header marks the header as updated,
/// which is what allows the frame counter and key id to be carried over to
/// the next attempt.
#[derive(Debug, Clone, Default)]
pub struct TxFrame {
    kind: FrameKind,
    length: u16,
    sequence: u8,
    pan_id: u16,
    source: Address,
    destination: Address,
    payload: Vec<u8, MAX_FRAME_PAYLOAD>,
    security_enabled: bool,
    header_updated: bool,
    frame_counter: u32,
    key_id: u8,
    is_a_retransmission: bool,
    csl_ie_present: bool,
    rendezvous_time_ie: Option<RendezvousTimeIe>,
    connection_ie: Option<ConnectionIe>,
    tx_delay: u32,
    tx_delay_base_time: u32,
    csma_ca_enabled: bool,
    max_csma_backoffs: u8,
    max_frame_retries: u8,
}

impl TxFrame {
    /// Reset the frame to an empty state, ready for reuse.
    pub fn clear(&mut self) {
        *self = Self::default();
        self.csma_ca_enabled = true;
    }

    /// Whether the frame has been prepared at all.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Total frame length bookkeeping (header plus payload).
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Prepare the frame as a data frame with the given addressing.
    pub fn prepare_data(&mut self, addresses: Addresses, pan_id: u16) {
        self.clear();
        self.kind = FrameKind::Data;
        self.source = addresses.source;
        self.destination = addresses.destination;
        self.pan_id = pan_id;
        self.length = MHR_EXTENDED_LEN;
    }

    /// Prepare the frame as a wake-up frame. Wake-up frames address both
    /// ends by extended address; anything else is refused.
    pub fn generate_wakeup_frame(
        &mut self,
        pan_id: u16,
        destination: Address,
        source: Address,
    ) -> Result<()> {
        if destination.extended().is_none() || source.extended().is_none() {
            return Err(Error);
        }

        self.clear();
        self.kind = FrameKind::WakeUp;
        self.pan_id = pan_id;
        self.destination = destination;
        self.source = source;
        self.length = MHR_EXTENDED_LEN;
        Ok(())
    }

    /// Replace the payload with the given fragment. The fragment must fit
    /// the MAC payload budget of a single frame.
    pub fn set_payload(&mut self, fragment: &[u8]) -> Result<()> {
        self.length -= self.payload.len() as u16;
        self.payload.clear();
        self.payload
            .extend_from_slice(fragment)
            .map_err(|_| Error)?;
        self.length += self.payload.len() as u16;
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    pub fn pan_id(&self) -> u16 {
        self.pan_id
    }

    pub fn source(&self) -> Address {
        self.source
    }

    pub fn destination(&self) -> Address {
        self.destination
    }

    pub fn security_enabled(&self) -> bool {
        self.security_enabled
    }

    pub fn enable_security(&mut self) {
        self.security_enabled = true;
    }

    /// Whether the MAC has written valid security material into the header.
    pub fn is_header_updated(&self) -> bool {
        self.header_updated
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn set_frame_counter(&mut self, frame_counter: u32) {
        self.frame_counter = frame_counter;
        self.header_updated = true;
    }

    pub fn key_id(&self) -> u8 {
        self.key_id
    }

    pub fn set_key_id(&mut self, key_id: u8) {
        self.key_id = key_id;
        self.header_updated = true;
    }

    pub fn is_a_retransmission(&self) -> bool {
        self.is_a_retransmission
    }

    pub fn set_is_a_retransmission(&mut self, retransmission: bool) {
        self.is_a_retransmission = retransmission;
    }

    /// Whether the frame carries a CSL header IE. A retransmitted frame
    /// with a CSL IE must be refreshed and re-secured rather than replayed
    /// with the old frame counter.
    pub fn is_csl_ie_present(&self) -> bool {
        self.csl_ie_present
    }

    pub fn set_csl_ie_present(&mut self, present: bool) {
        self.csl_ie_present = present;
    }

    pub fn rendezvous_time_ie(&self) -> Option<RendezvousTimeIe> {
        self.rendezvous_time_ie
    }

    pub fn set_rendezvous_time_ie(&mut self, ie: RendezvousTimeIe) {
        if self.rendezvous_time_ie.is_none() {
            self.length += SHORT_IE_LEN;
        }
        self.rendezvous_time_ie = Some(ie);
    }

    pub fn connection_ie(&self) -> Option<ConnectionIe> {
        self.connection_ie
    }

    pub fn set_connection_ie(&mut self, ie: ConnectionIe) {
        if self.connection_ie.is_none() {
            self.length += SHORT_IE_LEN;
        }
        self.connection_ie = Some(ie);
    }

    /// Transmission delay relative to [`Self::tx_delay_base_time`], in
    /// microseconds of radio time.
    pub fn tx_delay(&self) -> u32 {
        self.tx_delay
    }

    pub fn set_tx_delay(&mut self, delay: u32) {
        self.tx_delay = delay;
    }

    /// Base of the transmission delay: the low 32 bits of a radio
    /// timestamp, or zero to schedule against the radio's own clock.
    pub fn tx_delay_base_time(&self) -> u32 {
        self.tx_delay_base_time
    }

    pub fn set_tx_delay_base_time(&mut self, base: u32) {
        self.tx_delay_base_time = base;
    }

    pub fn csma_ca_enabled(&self) -> bool {
        self.csma_ca_enabled
    }

    pub fn set_csma_ca_enabled(&mut self, enabled: bool) {
        self.csma_ca_enabled = enabled;
    }

    pub fn max_csma_backoffs(&self) -> u8 {
        self.max_csma_backoffs
    }

    pub fn set_max_csma_backoffs(&mut self, backoffs: u8) {
        self.max_csma_backoffs = backoffs;
    }

    pub fn max_frame_retries(&self) -> u8 {
        self.max_frame_retries
    }

    pub fn set_max_frame_retries(&mut self, retries: u8) {
        self.max_frame_retries = retries;
    }
}

/// The frame pool handed to a frame-request callback.
///
/// A multi-radio build would hold one frame per radio link; this build has
/// the single IEEE 802.15.4 frame.
#[derive(Debug, Default)]
pub struct TxFrames {
    frame: TxFrame,
}

impl TxFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_frame_mut(&mut self) -> &mut TxFrame {
        &mut self.frame
    }
}

/// The fields of a received frame consumed by wake-up replay detection.
#[derive(Debug, Clone, Copy)]
pub struct RxFrame {
    src_addr: Address,
    security_enabled: bool,
    key_source: [u8; 4],
    frame_counter: u32,
    sequence: u8,
}

impl RxFrame {
    pub fn new(src_addr: Address, sequence: u8) -> Self {
        Self {
            src_addr,
            security_enabled: false,
            key_source: [0; 4],
            frame_counter: 0,
            sequence,
        }
    }

    /// Attach the security fields carried by the auxiliary header.
    pub fn with_security(mut self, key_source: [u8; 4], frame_counter: u32) -> Self {
        self.security_enabled = true;
        self.key_source = key_source;
        self.frame_counter = frame_counter;
        self
    }

    pub fn src_addr(&self) -> Address {
        self.src_addr
    }

    pub fn security_enabled(&self) -> bool {
        self.security_enabled
    }

    /// The key source octets, most significant first.
    pub fn key_source(&self) -> [u8; 4] {
        self.key_source
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_frame_is_empty() {
        let mut frame = TxFrame::default();
        frame.prepare_data(
            Addresses {
                source: Address::Short(0x2400),
                destination: Address::Extended([1; 8]),
            },
            0xface,
        );
        assert!(!frame.is_empty());

        frame.clear();
        assert!(frame.is_empty());
        assert!(frame.csma_ca_enabled());
    }

    #[test]
    fn payload_replaces_and_tracks_length() {
        let mut frame = TxFrame::default();
        frame.prepare_data(
            Addresses {
                source: Address::Short(0x2400),
                destination: Address::Extended([1; 8]),
            },
            0xface,
        );
        let base = frame.length();

        frame.set_payload(&[0u8; 40]).unwrap();
        assert_eq!(frame.length(), base + 40);

        frame.set_payload(&[0u8; 10]).unwrap();
        assert_eq!(frame.length(), base + 10);
        assert_eq!(frame.payload().len(), 10);
    }

    #[test]
    fn security_material_marks_header_updated() {
        let mut frame = TxFrame::default();
        frame.prepare_data(
            Addresses {
                source: Address::Short(0x2400),
                destination: Address::Extended([1; 8]),
            },
            0xface,
        );
        frame.enable_security();
        assert!(!frame.is_header_updated());

        frame.set_frame_counter(77);
        frame.set_key_id(2);
        assert!(frame.is_header_updated());
        assert_eq!(frame.frame_counter(), 77);
    }

    #[test]
    fn wakeup_frame_requires_extended_addresses() {
        let mut frame = TxFrame::default();
        assert!(frame
            .generate_wakeup_frame(0xface, Address::Short(0x1234), Address::Extended([2; 8]))
            .is_err());

        frame
            .generate_wakeup_frame(0xface, Address::Extended([1; 8]), Address::Extended([2; 8]))
            .unwrap();
        assert_eq!(frame.kind(), FrameKind::WakeUp);
        assert!(!frame.is_empty());
    }

    #[test]
    fn ie_length_counted_once() {
        let mut frame = TxFrame::default();
        frame
            .generate_wakeup_frame(0xface, Address::Extended([1; 8]), Address::Extended([2; 8]))
            .unwrap();
        let base = frame.length();

        frame.set_rendezvous_time_ie(RendezvousTimeIe {
            rendezvous_time: 100,
            wake_up_interval: 63,
        });
        frame.set_rendezvous_time_ie(RendezvousTimeIe {
            rendezvous_time: 101,
            wake_up_interval: 63,
        });
        assert_eq!(frame.length(), base + 4);
    }
}
