//! Pass-through diagnostic API: a device multiplexing logical channels over one
//! CAN link, per-channel filters, the transmission scheduler and the receive
//! dispatcher that keep ISO-TP transfers moving.
use alloc::vec::Vec;
use embassy_time::Instant;

use crate::protocol::transport::can_id::{CanId, IdWidth};
use crate::protocol::transport::isotp::{IsoTpAddress, TxFlags};

pub mod channel;
pub mod device;
pub mod dispatcher;
pub mod filter;
pub mod outbound;
pub mod scheduler;

/// Transport protocol served by a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Raw CAN frames, at most eight data bytes per message.
    Can,
    /// ISO 15765-2 segmented messages.
    Iso15765,
}

/// Which identifier widths a channel carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdAcceptance {
    #[default]
    Standard,
    Extended,
    Both,
}

impl IdAcceptance {
    pub fn accepts(&self, width: IdWidth) -> bool {
        matches!(
            (self, width),
            (IdAcceptance::Both, _)
                | (IdAcceptance::Standard, IdWidth::Standard)
                | (IdAcceptance::Extended, IdWidth::Extended)
        )
    }
}

/// Flags supplied when connecting a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    pub ids: IdAcceptance,
}

/// Handle of a connected channel. Carries a generation so a handle kept past
/// `disconnect` never reaches the channel that later reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelId {
    pub(crate) index: u8,
    pub(crate) generation: u16,
}

impl ChannelId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

//==================================================================================MESSAGES
/// What a message read from a channel represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Complete message received from the bus.
    Received,
    /// A multi-frame transfer towards us has started; `data` is empty.
    FirstFrame { total_len: u16 },
    /// One of our writes finished on the bus; `data` is empty.
    TxDone,
    /// Copy of one of our completed writes (channel loopback enabled).
    TxLoopback,
}

/// Message handed to the application by `read`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassThruMsg {
    pub protocol: Protocol,
    pub kind: MessageKind,
    /// Originating address for received data, destination for our own writes.
    pub address: IsoTpAddress,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

impl PassThruMsg {
    /// `true` for indications about this device's own transmissions.
    pub fn is_transmit(&self) -> bool {
        matches!(self.kind, MessageKind::TxDone | MessageKind::TxLoopback)
    }

    /// `true` for the start-of-transfer notification.
    pub fn is_first_frame(&self) -> bool {
        matches!(self.kind, MessageKind::FirstFrame { .. })
    }

    /// Arbitration id the message is tagged with.
    pub fn id(&self) -> CanId {
        self.address.id
    }
}

/// Message submitted by `write`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxMessage {
    pub protocol: Protocol,
    /// Destination id and, for extended addressing, target address byte.
    pub address: IsoTpAddress,
    pub flags: TxFlags,
    pub data: Vec<u8>,
}

impl TxMessage {
    /// ISO-TP message with normal addressing.
    pub fn isotp(id: CanId, data: &[u8]) -> Self {
        Self {
            protocol: Protocol::Iso15765,
            address: IsoTpAddress::normal(id),
            flags: TxFlags::default(),
            data: data.to_vec(),
        }
    }

    /// Raw CAN frame.
    pub fn can(id: CanId, data: &[u8]) -> Self {
        Self {
            protocol: Protocol::Can,
            address: IsoTpAddress::normal(id),
            flags: TxFlags::default(),
            data: data.to_vec(),
        }
    }

    pub fn with_address(mut self, address: IsoTpAddress) -> Self {
        self.address = address;
        self
    }

    pub fn with_flags(mut self, flags: TxFlags) -> Self {
        self.flags = flags;
        self
    }
}
