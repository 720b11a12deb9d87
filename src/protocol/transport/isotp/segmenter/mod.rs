//! CAN frame generator for ISO-TP messages. Builds the frame sequence (single
//! frame, or first frame followed by consecutive frames) from an application
//! payload.
use alloc::vec::Vec;

use super::pci::Pci;
use super::{IsoTpAddress, TxFlags, DEFAULT_PAD_BYTE, MAX_ISOTP_PAYLOAD};
use crate::error::SegmentError;
use crate::protocol::transport::can_frame::{CanFrame, CAN_MAX_DLEN};

#[derive(Debug, Clone)]
/// Shared parameters for all frames composing one ISO-TP message.
pub struct IsoTpSegmenter<'a> {
    address: IsoTpAddress,
    flags: TxFlags,
    pad_byte: u8,
    payload: &'a [u8],
}

/// Iterator returning frames one by one as they are encoded.
pub struct FrameIterator<'a> {
    segmenter: IsoTpSegmenter<'a>,
    bytes_sent: usize,
    sequence: u8,
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = CanFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.segmenter.payload;
        let address = self.segmenter.address;
        if self.bytes_sent >= payload.len() {
            return None;
        }

        let prefix = address.prefix_len();
        let mut data = [self.segmenter.pad_byte; CAN_MAX_DLEN];
        if let Some(ext_addr) = address.ext_addr {
            data[0] = ext_addr;
        }

        let (pci, chunk) = if payload.len() <= address.single_frame_capacity() {
            (
                Pci::Single {
                    len: payload.len() as u8,
                },
                payload.len(),
            )
        } else if self.bytes_sent == 0 {
            (
                Pci::First {
                    total_len: payload.len() as u16,
                },
                address.first_frame_capacity(),
            )
        } else {
            let remaining = payload.len() - self.bytes_sent;
            let pci = Pci::Consecutive {
                sequence: self.sequence,
            };
            self.sequence = (self.sequence + 1) & 0x0F;
            (pci, remaining.min(address.consecutive_capacity()))
        };

        let header = pci.encode(&mut data[prefix..]);
        let start = prefix + header;
        data[start..start + chunk]
            .copy_from_slice(&payload[self.bytes_sent..self.bytes_sent + chunk]);
        self.bytes_sent += chunk;

        let used = start + chunk;
        let len = if self.segmenter.flags.padding {
            CAN_MAX_DLEN
        } else {
            used
        };

        CanFrame::new(address.id, &data[..len])
    }
}

impl<'a> IsoTpSegmenter<'a> {
    /// Create an encoder for `payload` towards `address`, unpadded by default.
    pub fn new(address: IsoTpAddress, payload: &'a [u8]) -> Self {
        Self {
            address,
            flags: TxFlags::default(),
            pad_byte: DEFAULT_PAD_BYTE,
            payload,
        }
    }

    pub fn with_flags(mut self, flags: TxFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Byte written into unused positions of padded frames.
    pub fn with_pad_byte(mut self, pad_byte: u8) -> Self {
        self.pad_byte = pad_byte;
        self
    }

    /// Reject payloads the 12-bit length field cannot describe.
    pub fn validate(&self) -> Result<(), SegmentError> {
        let len = self.payload.len();
        if len == 0 || len > MAX_ISOTP_PAYLOAD {
            return Err(SegmentError::InvalidLength { len });
        }
        Ok(())
    }

    /// `true` when the payload needs a first frame and flow control.
    pub fn is_multi_frame(&self) -> bool {
        self.payload.len() > self.address.single_frame_capacity()
    }

    /// Number of frames the message occupies on the wire.
    pub fn frame_count(&self) -> usize {
        if !self.is_multi_frame() {
            return 1;
        }
        let rest = self.payload.len() - self.address.first_frame_capacity();
        1 + rest.div_ceil(self.address.consecutive_capacity())
    }

    /// Start the iteration; each call to `next` yields the next frame.
    pub fn build(self) -> Result<FrameIterator<'a>, SegmentError> {
        self.validate()?;
        Ok(FrameIterator {
            segmenter: self,
            bytes_sent: 0,
            sequence: 1,
        })
    }

    /// Compute the complete frame list eagerly, before any byte goes out.
    pub fn segment(self) -> Result<Vec<CanFrame>, SegmentError> {
        self.validate()?;
        let mut frames = Vec::with_capacity(self.frame_count());
        frames.extend(self.build()?);
        Ok(frames)
    }
}
