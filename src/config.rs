//! Device and channel configuration.
//!
//! `DeviceConfig` is fixed when the device is opened. `ChannelConfig` starts
//! from the connect arguments and is then tuned through
//! [`Device::get_config`](crate::protocol::passthru::device::Device::get_config) /
//! [`Device::set_config`](crate::protocol::passthru::device::Device::set_config),
//! the equivalent of the pass-through GET_CONFIG / SET_CONFIG ioctls.
use crate::error::PassThruError;
use crate::protocol::transport::isotp::pci::separation_from_st_min;
use crate::protocol::transport::isotp::DEFAULT_PAD_BYTE;
use embassy_time::Duration;

/// Channels multiplexed over one device.
pub const MAX_CHANNELS: usize = 4;

/// Bus speeds a channel may be connected at (bit/s).
pub const SUPPORTED_BAUD_RATES: [u32; 4] = [125_000, 250_000, 500_000, 1_000_000];

/// `*_TX` pacing override value meaning "use what the remote flow control says".
pub const USE_REMOTE_PACING: u32 = 0xFFFF;

//==================================================================================DEVICE
/// Where the scheduler learns that a submitted frame has reached the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TxEchoSource {
    /// Wait for the link to hand the frame back as a
    /// [`Direction::TxEcho`](crate::protocol::transport::can_frame::Direction::TxEcho).
    #[default]
    Link,
    /// Treat a successful `send` as the echo, for links that cannot loop back.
    OnSubmit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub tx_echo: TxEchoSource,
    /// Bus number stamped on every outbound frame.
    pub bus: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tx_echo: TxEchoSource::Link,
            bus: 0,
        }
    }
}

//==================================================================================CHANNEL
/// Tunable channel parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigParam {
    /// Bus speed in bit/s; fixed at connect time.
    DataRate,
    /// Echo completed transmissions back into the channel's read queue (0/1).
    Loopback,
    /// Block size advertised in the flow-control frames this device sends.
    Iso15765BlockSize,
    /// `STmin` byte advertised in the flow-control frames this device sends.
    Iso15765StMin,
    /// Block size used when sending, overriding the remote's
    /// ([`USE_REMOTE_PACING`] disables the override).
    Iso15765BlockSizeTx,
    /// `STmin` byte used when sending, overriding the remote's
    /// ([`USE_REMOTE_PACING`] disables the override).
    Iso15765StMinTx,
    /// Byte used to fill padded frames.
    PadByte,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub data_rate: u32,
    pub loopback: bool,
    pub block_size: u8,
    pub st_min: u8,
    pub block_size_tx: u32,
    pub st_min_tx: u32,
    pub pad_byte: u8,
}

impl ChannelConfig {
    /// Defaults for a channel connected at `data_rate`.
    pub const fn new(data_rate: u32) -> Self {
        Self {
            data_rate,
            loopback: false,
            block_size: 0,
            st_min: 0,
            block_size_tx: USE_REMOTE_PACING,
            st_min_tx: USE_REMOTE_PACING,
            pad_byte: DEFAULT_PAD_BYTE,
        }
    }

    pub fn get(&self, param: ConfigParam) -> u32 {
        match param {
            ConfigParam::DataRate => self.data_rate,
            ConfigParam::Loopback => self.loopback as u32,
            ConfigParam::Iso15765BlockSize => self.block_size as u32,
            ConfigParam::Iso15765StMin => self.st_min as u32,
            ConfigParam::Iso15765BlockSizeTx => self.block_size_tx,
            ConfigParam::Iso15765StMinTx => self.st_min_tx,
            ConfigParam::PadByte => self.pad_byte as u32,
        }
    }

    /// Apply one parameter; the configuration is untouched when `value` is rejected.
    pub fn set(&mut self, param: ConfigParam, value: u32) -> Result<(), PassThruError> {
        match param {
            ConfigParam::DataRate if value == self.data_rate => {}
            ConfigParam::DataRate => return Err(PassThruError::InvalidIoctlValue),
            ConfigParam::Loopback => {
                self.loopback = match value {
                    0 => false,
                    1 => true,
                    _ => return Err(PassThruError::InvalidIoctlValue),
                }
            }
            ConfigParam::Iso15765BlockSize => self.block_size = byte(value)?,
            ConfigParam::Iso15765StMin => self.st_min = byte(value)?,
            ConfigParam::Iso15765BlockSizeTx => self.block_size_tx = byte_or_remote(value)?,
            ConfigParam::Iso15765StMinTx => self.st_min_tx = byte_or_remote(value)?,
            ConfigParam::PadByte => self.pad_byte = byte(value)?,
        }
        Ok(())
    }

    /// Block size forced on outbound transfers, if any.
    pub fn block_size_override(&self) -> Option<u8> {
        (self.block_size_tx != USE_REMOTE_PACING).then_some(self.block_size_tx as u8)
    }

    /// Separation time forced on outbound transfers, if any.
    pub fn separation_override(&self) -> Option<Duration> {
        (self.st_min_tx != USE_REMOTE_PACING).then(|| separation_from_st_min(self.st_min_tx as u8))
    }
}

fn byte(value: u32) -> Result<u8, PassThruError> {
    u8::try_from(value).map_err(|_| PassThruError::InvalidIoctlValue)
}

fn byte_or_remote(value: u32) -> Result<u32, PassThruError> {
    if value == USE_REMOTE_PACING || value <= 0xFF {
        Ok(value)
    } else {
        Err(PassThruError::InvalidIoctlValue)
    }
}
