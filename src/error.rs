//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (identifier construction,
//! wire decoding, segmentation, pass-through API validation, runner shutdown).
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors that can occur while building an 11-bit or 29-bit CAN identifier.
pub enum CanIdError {
    /// Value does not fit the 11-bit standard range.
    #[error("Standard identifier out of range: {id:#x}")]
    StandardOutOfRange { id: u32 },
    /// Value does not fit the 29-bit extended range.
    #[error("Extended identifier out of range: {id:#x}")]
    ExtendedOutOfRange { id: u32 },
}

//==================================================================================PCI_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Failures while decoding the ISO-TP protocol control information of a frame.
pub enum PciError {
    /// No byte left after the addressing prefix.
    #[error("Empty ISO-TP frame body")]
    Empty,
    /// The frame is shorter than its PCI type requires.
    #[error("Truncated ISO-TP frame -> needed: {needed}, available: {available}")]
    Truncated { needed: usize, available: usize },
    /// High nibble 0x4..=0xF is not an ISO-TP frame type.
    #[error("Reserved frame type nibble {nibble:#x}")]
    ReservedFrameType { nibble: u8 },
    /// Flow-control status other than continue, wait, or overflow.
    #[error("Reserved flow status {status}")]
    ReservedFlowStatus { status: u8 },
    /// Declared length is zero or cannot be carried by the frame.
    #[error("Invalid declared length {len}")]
    InvalidLength { len: usize },
}

//==================================================================================SEGMENT_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised before an outbound payload is cut into frames.
pub enum SegmentError {
    /// Payload is empty or larger than the 12-bit ISO-TP length field allows.
    #[error("Payload length {len} outside 1..=4095")]
    InvalidLength { len: usize },
}

//==================================================================================PASSTHRU_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Synchronous rejections returned by the pass-through API.
///
/// [`PassThruError::code`] maps every variant onto the status code a J2534
/// shim reports to the application.
pub enum PassThruError {
    /// Channel handle is unknown or was disconnected.
    #[error("Invalid channel id")]
    InvalidChannelId,
    /// Protocol is not served by this device.
    #[error("Invalid protocol id")]
    InvalidProtocolId,
    /// Configuration value rejected for this parameter.
    #[error("Invalid ioctl value")]
    InvalidIoctlValue,
    /// Connect or message flags are inconsistent.
    #[error("Invalid flags")]
    InvalidFlags,
    /// Device was closed; every channel is gone.
    #[error("Device not connected")]
    DeviceClosed,
    /// Blocking write did not finish before the caller's timeout.
    #[error("Timeout")]
    Timeout,
    /// Message length or addressing outside the protocol's legal bounds.
    #[error("Invalid message")]
    InvalidMsg,
    /// A fixed resource pool (filter slots, channels) is exhausted.
    #[error("Exceeded limit")]
    ExceededLimit,
    /// Message protocol does not match the channel protocol.
    #[error("Message protocol id mismatch")]
    MsgProtocolId,
    /// Filter handle is unknown on this channel.
    #[error("Invalid filter id")]
    InvalidFilterId,
    /// Multi-frame write without a flow-control filter for its destination.
    #[error("No flow control filter for destination")]
    NoFlowControl,
    /// Identical mask/pattern pair already registered on the channel.
    #[error("Filter not unique")]
    NotUnique,
    /// Requested bus speed is not supported.
    #[error("Invalid baudrate")]
    InvalidBaudrate,
}

impl PassThruError {
    /// Numeric status code, following the SAE J2534 numbering.
    pub const fn code(&self) -> u32 {
        match self {
            PassThruError::InvalidChannelId => 0x02,
            PassThruError::InvalidProtocolId => 0x03,
            PassThruError::InvalidIoctlValue => 0x05,
            PassThruError::InvalidFlags => 0x06,
            PassThruError::DeviceClosed => 0x08,
            PassThruError::Timeout => 0x09,
            PassThruError::InvalidMsg => 0x0A,
            PassThruError::ExceededLimit => 0x0C,
            PassThruError::MsgProtocolId => 0x15,
            PassThruError::InvalidFilterId => 0x16,
            PassThruError::NoFlowControl => 0x17,
            PassThruError::NotUnique => 0x18,
            PassThruError::InvalidBaudrate => 0x19,
        }
    }
}

impl From<SegmentError> for PassThruError {
    fn from(_: SegmentError) -> Self {
        PassThruError::InvalidMsg
    }
}

impl From<CanIdError> for PassThruError {
    fn from(_: CanIdError) -> Self {
        PassThruError::InvalidMsg
    }
}

//==================================================================================RUN_ERROR
#[derive(Debug, Error)]
/// Reasons a device runner stops before the device is closed.
pub enum DeviceRunError<E: core::fmt::Debug> {
    /// The link stopped delivering frames.
    #[error("CAN link receive error: {0:?}")]
    Receive(E),
}
