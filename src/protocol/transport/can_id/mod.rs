//! Creation and inspection of the 11-bit ("standard") and 29-bit ("extended")
//! CAN identifiers carried by ISO-TP traffic.
use crate::error::CanIdError;
use embedded_can::{ExtendedId, Id, StandardId};

/// Highest value representable by an 11-bit identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Highest value representable by a 29-bit identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

//==================================================================================CAN_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Validated CAN identifier. The addressing width travels with the value, so an
/// id can never be compared against a pattern of the other width by accident.
pub struct CanId(Id);

/// Width of a CAN identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdWidth {
    /// 11-bit identifier.
    Standard,
    /// 29-bit identifier.
    Extended,
}

impl CanId {
    /// Builds an 11-bit identifier.
    pub fn standard(id: u16) -> Result<Self, CanIdError> {
        StandardId::new(id)
            .map(|id| CanId(Id::Standard(id)))
            .ok_or(CanIdError::StandardOutOfRange { id: id as u32 })
    }

    /// Builds a 29-bit identifier.
    pub fn extended(id: u32) -> Result<Self, CanIdError> {
        ExtendedId::new(id)
            .map(|id| CanId(Id::Extended(id)))
            .ok_or(CanIdError::ExtendedOutOfRange { id })
    }

    /// Builds an identifier of the requested width from its raw value.
    pub fn from_raw(raw: u32, width: IdWidth) -> Result<Self, CanIdError> {
        match width {
            IdWidth::Standard if raw > MAX_STANDARD_ID => {
                Err(CanIdError::StandardOutOfRange { id: raw })
            }
            IdWidth::Standard => Self::standard(raw as u16),
            IdWidth::Extended => Self::extended(raw),
        }
    }

    /// Raw numeric value, right-aligned.
    pub fn raw(&self) -> u32 {
        match self.0 {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// Identifier width.
    pub fn width(&self) -> IdWidth {
        match self.0 {
            Id::Standard(_) => IdWidth::Standard,
            Id::Extended(_) => IdWidth::Extended,
        }
    }

    /// `true` for 29-bit identifiers.
    pub fn is_extended(&self) -> bool {
        self.width() == IdWidth::Extended
    }
}

impl From<Id> for CanId {
    fn from(id: Id) -> Self {
        CanId(id)
    }
}

impl From<StandardId> for CanId {
    fn from(id: StandardId) -> Self {
        CanId(Id::Standard(id))
    }
}

impl From<ExtendedId> for CanId {
    fn from(id: ExtendedId) -> Self {
        CanId(Id::Extended(id))
    }
}

impl From<CanId> for Id {
    fn from(id: CanId) -> Self {
        id.0
    }
}
