//! In-memory representation of a classic CAN frame as exchanged with the link.
use crate::protocol::transport::can_id::CanId;
use embassy_time::Instant;
use embedded_can::Id;

/// Classic CAN payload size.
pub const CAN_MAX_DLEN: usize = 8;

/// Origin of a frame relative to this device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Received from another node on the bus.
    Rx,
    /// Built locally, not yet confirmed by the link.
    Tx,
    /// Bus-level confirmation that a frame we submitted went out.
    TxEcho,
}

#[derive(Clone, Debug)]
/// Raw frame as read from, or written to, the CAN link.
pub struct CanFrame {
    /// 11-bit or 29-bit identifier.
    pub id: CanId,
    /// Payload buffer. Bytes past `len` are meaningless.
    pub data: [u8; CAN_MAX_DLEN],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
    /// Bus number on multi-bus interfaces.
    pub bus: u8,
    pub direction: Direction,
    /// Link receive time, or build time for outbound frames.
    pub timestamp: Instant,
}

impl CanFrame {
    /// Build an outbound frame. Returns `None` when `payload` exceeds eight bytes.
    pub fn new(id: CanId, payload: &[u8]) -> Option<Self> {
        if payload.len() > CAN_MAX_DLEN {
            return None;
        }
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            data,
            len: payload.len(),
            bus: 0,
            direction: Direction::Tx,
            timestamp: Instant::from_ticks(0),
        })
    }

    /// Valid payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    /// `true` when the frame confirms one of our own transmissions.
    #[inline]
    pub fn is_echo(&self) -> bool {
        self.direction == Direction::TxEcho
    }

    /// Same identifier and same payload bytes, ignoring direction and timestamp.
    /// This is how an echo is correlated with the frame that was sent.
    pub fn same_wire_content(&self, other: &CanFrame) -> bool {
        self.id == other.id && self.payload() == other.payload()
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        CanFrame::new(CanId::from(id.into()), data)
    }

    /// Remote frames play no part in ISO-TP.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id.into()
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}
