//! ISO 15765-2 (ISO-TP) support: carries diagnostic payloads of up to 4095
//! bytes across successive classic CAN frames.
//!
//! Frame layout, with `prefix` = 1 when extended addressing puts a target
//! address byte in front of the PCI, else 0:
//!
//! ```text
//! 0x0L             single frame, L = length (1..=7-prefix)
//! 0x1L LL          first frame, 12-bit total length, 6-prefix data bytes
//! 0x2S             consecutive frame, S = sequence 1..15,0,1.., 7-prefix data bytes
//! 0x3F BS ST       flow control: status, block size, separation time
//! ```
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;

/// Largest payload the 12-bit first-frame length field can announce.
pub const MAX_ISOTP_PAYLOAD: usize = 4095;

/// Byte used to fill padded frames unless the channel configures another.
pub const DEFAULT_PAD_BYTE: u8 = 0x00;

pub mod pci;
pub mod reassembler;
pub mod segmenter;

//==================================================================================ADDRESSING
/// Arbitration id plus optional extended-addressing target byte.
///
/// `ext_addr = Some(_)` selects extended (5-byte, prefixed) addressing: every
/// frame then starts with that byte before the PCI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsoTpAddress {
    pub id: CanId,
    pub ext_addr: Option<u8>,
}

impl IsoTpAddress {
    /// Normal addressing: the PCI is the first data byte.
    pub const fn normal(id: CanId) -> Self {
        Self { id, ext_addr: None }
    }

    /// Extended addressing: `ext_addr` precedes the PCI in every frame.
    pub const fn extended(id: CanId, ext_addr: u8) -> Self {
        Self {
            id,
            ext_addr: Some(ext_addr),
        }
    }

    /// Number of addressing bytes in front of the PCI (0 or 1).
    #[inline]
    pub fn prefix_len(&self) -> usize {
        usize::from(self.ext_addr.is_some())
    }

    /// Payload bytes a single frame can carry.
    #[inline]
    pub fn single_frame_capacity(&self) -> usize {
        7 - self.prefix_len()
    }

    /// Payload bytes carried by a first frame.
    #[inline]
    pub fn first_frame_capacity(&self) -> usize {
        6 - self.prefix_len()
    }

    /// Payload bytes carried by a full consecutive frame.
    #[inline]
    pub fn consecutive_capacity(&self) -> usize {
        7 - self.prefix_len()
    }
}

/// Per-message transmit options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxFlags {
    /// Fill every frame up to eight bytes with the channel pad byte.
    pub padding: bool,
}

impl TxFlags {
    pub const PADDED: TxFlags = TxFlags { padding: true };
}

/// Bytes of `frame` after the addressing prefix, or `None` when the frame is
/// too short to carry anything but the prefix.
pub fn frame_body(frame: &CanFrame, prefix_len: usize) -> Option<&[u8]> {
    let payload = frame.payload();
    if payload.len() <= prefix_len {
        None
    } else {
        Some(&payload[prefix_len..])
    }
}
