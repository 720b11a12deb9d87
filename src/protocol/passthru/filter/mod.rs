//! Per-channel message filters held in a fixed arena of slots.
//!
//! Flow-control filters are the only way a multi-frame transfer is accepted:
//! each one pairs an inbound id pattern with the id our flow-control replies
//! (and our own writes) go to, and owns the reassembler of the single
//! conversation allowed on it. Pass and block filters gate raw delivery.
use crate::error::PassThruError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::isotp::reassembler::Reassembler;
use crate::protocol::transport::isotp::{IsoTpAddress, TxFlags};

/// Filter slots available on every channel.
pub const MAX_FILTERS_PER_CHANNEL: usize = 10;

//==================================================================================FILTER_SPEC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Pass,
    Block,
    FlowControl,
}

/// Bits of the identifier (and of the extended-addressing byte) that must
/// equal the pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterMask {
    pub id: u32,
    pub ext_addr: u8,
}

impl FilterMask {
    /// Every identifier and address bit must match.
    pub const EXACT: FilterMask = FilterMask {
        id: 0x1FFF_FFFF,
        ext_addr: 0xFF,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub mask: FilterMask,
    /// Inbound id to match; `ext_addr` selects extended addressing.
    pub pattern: IsoTpAddress,
    /// Where flow-control replies go. Required for flow-control filters only.
    pub flow_control: Option<IsoTpAddress>,
    /// Padding applied to the flow-control frames sent for this filter.
    pub flags: TxFlags,
}

impl FilterSpec {
    pub fn pass(mask: FilterMask, pattern: IsoTpAddress) -> Self {
        Self {
            kind: FilterKind::Pass,
            mask,
            pattern,
            flow_control: None,
            flags: TxFlags::default(),
        }
    }

    pub fn block(mask: FilterMask, pattern: IsoTpAddress) -> Self {
        Self {
            kind: FilterKind::Block,
            ..Self::pass(mask, pattern)
        }
    }

    /// Exact-match flow-control filter: traffic from `pattern` is reassembled,
    /// flow control (and our writes) go to `flow_control`.
    pub fn flow_control(pattern: IsoTpAddress, flow_control: IsoTpAddress, flags: TxFlags) -> Self {
        Self {
            kind: FilterKind::FlowControl,
            mask: FilterMask::EXACT,
            pattern,
            flow_control: Some(flow_control),
            flags,
        }
    }

    pub fn with_mask(mut self, mask: FilterMask) -> Self {
        self.mask = mask;
        self
    }

    /// Structural checks that do not depend on the channel.
    pub fn validate(&self) -> Result<(), PassThruError> {
        match (self.kind, self.flow_control) {
            (FilterKind::FlowControl, None) => Err(PassThruError::InvalidMsg),
            (FilterKind::FlowControl, Some(reply))
                if reply.ext_addr.is_some() != self.pattern.ext_addr.is_some() =>
            {
                Err(PassThruError::InvalidMsg)
            }
            (FilterKind::Pass | FilterKind::Block, Some(_)) => Err(PassThruError::InvalidMsg),
            _ => Ok(()),
        }
    }

    /// Identity used for uniqueness: the (mask, pattern) pair.
    fn same_identity(&self, other: &FilterSpec) -> bool {
        self.mask == other.mask && self.pattern == other.pattern
    }

    /// `true` when `frame` carries an id (and address byte) selected by this filter.
    pub fn matches(&self, frame: &CanFrame) -> bool {
        if frame.id.width() != self.pattern.id.width() {
            return false;
        }
        if (frame.id.raw() & self.mask.id) != (self.pattern.id.raw() & self.mask.id) {
            return false;
        }
        match self.pattern.ext_addr {
            None => true,
            Some(expected) => frame
                .payload()
                .first()
                .is_some_and(|&byte| (byte & self.mask.ext_addr) == (expected & self.mask.ext_addr)),
        }
    }
}

//==================================================================================FILTER_TABLE
/// Index of a filter slot on its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilterId(pub(crate) u8);

impl FilterId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct FilterSlot {
    spec: FilterSpec,
    reassembler: Reassembler,
}

/// Fixed arena of filter slots. A slot is reusable only once removed.
#[derive(Debug)]
pub struct FilterTable {
    slots: [Option<FilterSlot>; MAX_FILTERS_PER_CHANNEL],
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Register a filter in the lowest free slot.
    pub fn insert(&mut self, spec: FilterSpec) -> Result<FilterId, PassThruError> {
        spec.validate()?;
        if self.iter().any(|(_, live)| live.same_identity(&spec)) {
            return Err(PassThruError::NotUnique);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PassThruError::ExceededLimit)?;
        self.slots[index] = Some(FilterSlot {
            spec,
            reassembler: Reassembler::new(),
        });
        Ok(FilterId(index as u8))
    }

    /// Free a slot. Its conversation, if any, is dropped with it.
    pub fn remove(&mut self, id: FilterId) -> Result<FilterSpec, PassThruError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::take)
            .map(|slot| slot.spec)
            .ok_or(PassThruError::InvalidFilterId)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn get(&self, id: FilterId) -> Option<&FilterSpec> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|slot| &slot.spec)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live filters in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (FilterId, &FilterSpec)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (FilterId(index as u8), &slot.spec)))
    }

    /// Flow-control filter whose reply address is `destination`: the filter a
    /// write towards `destination` is paced by.
    pub fn flow_control_for(&self, destination: &IsoTpAddress) -> Option<FilterId> {
        self.iter()
            .find(|(_, spec)| {
                spec.kind == FilterKind::FlowControl && spec.flow_control.as_ref() == Some(destination)
            })
            .map(|(id, _)| id)
    }

    /// First flow-control filter selecting `frame`.
    pub fn matching_flow_control(&self, frame: &CanFrame) -> Option<FilterId> {
        self.iter()
            .find(|(_, spec)| spec.kind == FilterKind::FlowControl && spec.matches(frame))
            .map(|(id, _)| id)
    }

    /// Raw gating: some pass filter selects `frame` and no block filter does.
    /// Returns the selecting pass filter.
    pub fn passing(&self, frame: &CanFrame) -> Option<FilterId> {
        let blocked = self
            .iter()
            .any(|(_, spec)| spec.kind == FilterKind::Block && spec.matches(frame));
        if blocked {
            return None;
        }
        self.iter()
            .find(|(_, spec)| spec.kind == FilterKind::Pass && spec.matches(frame))
            .map(|(id, _)| id)
    }

    pub fn reassembler_mut(&mut self, id: FilterId) -> Option<&mut Reassembler> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.reassembler)
    }
}
