//! Protocol Control Information: the ISO-TP header decoded once at the receive
//! boundary so downstream code matches on a tagged enum instead of re-testing
//! the high nibble.
use crate::error::PciError;
use crate::protocol::transport::{MAX_SEPARATION_MS, ST_MIN_MICROS_FIRST, ST_MIN_MICROS_LAST};
use embassy_time::Duration;

/// Flow-control status nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStatus {
    /// Clear to send: resume consecutive frames.
    ContinueToSend,
    /// Receiver busy: keep stalling until another flow-control frame arrives.
    Wait,
    /// Receiver cannot take the message: abort the transfer.
    Overflow,
}

impl FlowStatus {
    const fn nibble(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }
}

/// Decoded ISO-TP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pci {
    Single { len: u8 },
    First { total_len: u16 },
    Consecutive { sequence: u8 },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    },
}

impl Pci {
    /// Decode the header at the start of `body` (frame payload after the
    /// addressing prefix). Length fields are checked against what the frame
    /// actually carries.
    pub fn decode(body: &[u8]) -> Result<Pci, PciError> {
        let first = *body.first().ok_or(PciError::Empty)?;
        match first >> 4 {
            0x0 => {
                let len = (first & 0x0F) as usize;
                if len == 0 || len > body.len() - 1 {
                    return Err(PciError::InvalidLength { len });
                }
                Ok(Pci::Single { len: len as u8 })
            }
            0x1 => {
                if body.len() < 2 {
                    return Err(PciError::Truncated {
                        needed: 2,
                        available: body.len(),
                    });
                }
                let total_len = (((first & 0x0F) as u16) << 8) | body[1] as u16;
                // Zero is the escape for 32-bit lengths, beyond a 4095-byte engine.
                if total_len == 0 {
                    return Err(PciError::InvalidLength { len: 0 });
                }
                Ok(Pci::First { total_len })
            }
            0x2 => Ok(Pci::Consecutive {
                sequence: first & 0x0F,
            }),
            0x3 => {
                if body.len() < 3 {
                    return Err(PciError::Truncated {
                        needed: 3,
                        available: body.len(),
                    });
                }
                let status = match first & 0x0F {
                    0 => FlowStatus::ContinueToSend,
                    1 => FlowStatus::Wait,
                    2 => FlowStatus::Overflow,
                    status => return Err(PciError::ReservedFlowStatus { status }),
                };
                Ok(Pci::FlowControl {
                    status,
                    block_size: body[1],
                    st_min: body[2],
                })
            }
            nibble => Err(PciError::ReservedFrameType { nibble }),
        }
    }

    /// Write the header bytes into `out` and return how many were written.
    ///
    /// `out` must hold at least three bytes.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        match *self {
            Pci::Single { len } => {
                out[0] = len & 0x0F;
                1
            }
            Pci::First { total_len } => {
                out[0] = 0x10 | ((total_len >> 8) as u8 & 0x0F);
                out[1] = (total_len & 0xFF) as u8;
                2
            }
            Pci::Consecutive { sequence } => {
                out[0] = 0x20 | (sequence & 0x0F);
                1
            }
            Pci::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                out[0] = 0x30 | status.nibble();
                out[1] = block_size;
                out[2] = st_min;
                3
            }
        }
    }
}

//==================================================================================SEPARATION_TIME
/// Minimum gap between consecutive frames requested by an `STmin` byte.
///
/// `0x00..=0x7F` are milliseconds, `0xF1..=0xF9` are 100..900 µs; every other
/// value is reserved and read as the 127 ms maximum.
pub fn separation_from_st_min(st_min: u8) -> Duration {
    match st_min {
        0x00..=0x7F => Duration::from_millis(st_min as u64),
        ST_MIN_MICROS_FIRST..=ST_MIN_MICROS_LAST => {
            Duration::from_micros((st_min - 0xF0) as u64 * 100)
        }
        _ => Duration::from_millis(MAX_SEPARATION_MS),
    }
}

/// Inverse of [`separation_from_st_min`]: sub-millisecond gaps round up to the
/// next 100 µs unit, anything above 127 ms clamps to 127 ms.
pub fn st_min_from_separation(separation: Duration) -> u8 {
    let micros = separation.as_micros();
    if micros == 0 {
        0
    } else if micros <= 900 {
        0xF0 + micros.div_ceil(100) as u8
    } else {
        (micros.div_ceil(1000)).min(MAX_SEPARATION_MS) as u8
    }
}
