//! Logical channel state: protocol, configuration, filter slots and the FIFO of
//! outbound segmented messages. The inbound queue lives next to it in the
//! device slot so readers never contend with filter or send bookkeeping.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::filter::{FilterId, FilterKind, FilterSpec, FilterTable};
use super::outbound::{PacingOverride, SegmentedMessage};
use super::{ConnectFlags, Protocol, TxMessage};
use crate::config::ChannelConfig;
use crate::error::PassThruError;
use crate::protocol::transport::can_frame::{CanFrame, CAN_MAX_DLEN};
use crate::protocol::transport::isotp::segmenter::IsoTpSegmenter;

/// Outcome of removing queued messages.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub tickets: Vec<u32>,
    /// The message at the head of the queue was among the removed ones.
    pub head_removed: bool,
}

#[derive(Debug)]
pub struct ChannelState {
    pub(crate) protocol: Protocol,
    pub(crate) flags: ConnectFlags,
    pub(crate) config: ChannelConfig,
    pub(crate) filters: FilterTable,
    tx_queue: VecDeque<SegmentedMessage>,
    next_ticket: u32,
}

impl ChannelState {
    pub fn new(protocol: Protocol, flags: ConnectFlags, data_rate: u32) -> Self {
        Self {
            protocol,
            flags,
            config: ChannelConfig::new(data_rate),
            filters: FilterTable::new(),
            tx_queue: VecDeque::new(),
            next_ticket: 0,
        }
    }

    //==================================================================================FILTERS
    pub fn start_filter(&mut self, spec: FilterSpec) -> Result<FilterId, PassThruError> {
        if self.protocol == Protocol::Can && spec.kind == FilterKind::FlowControl {
            return Err(PassThruError::InvalidMsg);
        }
        self.filters.insert(spec)
    }

    /// Remove a filter together with every queued send it paces.
    pub fn stop_filter(&mut self, id: FilterId) -> Result<Drained, PassThruError> {
        self.filters.remove(id)?;
        Ok(self.drain_where(|message| message.filter == Some(id)))
    }

    pub fn clear_filters(&mut self) -> Drained {
        self.filters.clear();
        self.drain_where(|message| message.filter.is_some())
    }

    //==================================================================================TRANSMIT
    /// Validate a write and compute its complete frame list.
    pub fn prepare_write(&mut self, message: &TxMessage) -> Result<SegmentedMessage, PassThruError> {
        if message.protocol != self.protocol {
            return Err(PassThruError::MsgProtocolId);
        }
        if !self.flags.ids.accepts(message.address.id.width()) {
            return Err(PassThruError::InvalidMsg);
        }

        let (frames, filter) = match self.protocol {
            Protocol::Can => {
                if message.address.ext_addr.is_some() || message.data.len() > CAN_MAX_DLEN {
                    return Err(PassThruError::InvalidMsg);
                }
                let frame = CanFrame::new(message.address.id, &message.data)
                    .ok_or(PassThruError::InvalidMsg)?;
                (alloc::vec![frame], None)
            }
            Protocol::Iso15765 => {
                let segmenter = IsoTpSegmenter::new(message.address, &message.data)
                    .with_flags(message.flags)
                    .with_pad_byte(self.config.pad_byte);
                segmenter.validate()?;
                let filter = if segmenter.is_multi_frame() {
                    Some(
                        self.filters
                            .flow_control_for(&message.address)
                            .ok_or(PassThruError::NoFlowControl)?,
                    )
                } else {
                    None
                };
                (segmenter.segment()?, filter)
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        Ok(SegmentedMessage::new(
            ticket,
            message.protocol,
            message.address,
            message.data.clone(),
            frames,
            filter,
        ))
    }

    /// Append to the send FIFO. Returns `true` when the message is now the
    /// head and must be scheduled.
    pub fn enqueue(&mut self, message: SegmentedMessage) -> bool {
        self.tx_queue.push_back(message);
        self.tx_queue.len() == 1
    }

    pub fn head(&self) -> Option<&SegmentedMessage> {
        self.tx_queue.front()
    }

    /// Head of the send FIFO, only when it carries `ticket`.
    pub fn head_with_ticket(&mut self, ticket: u32) -> Option<&mut SegmentedMessage> {
        self.tx_queue
            .front_mut()
            .filter(|message| message.ticket == ticket)
    }

    /// Head of the send FIFO, only when paced by `filter`.
    pub fn head_on_filter(&mut self, filter: FilterId) -> Option<&mut SegmentedMessage> {
        self.tx_queue
            .front_mut()
            .filter(|message| message.filter == Some(filter))
    }

    pub fn pop_head(&mut self) -> Option<SegmentedMessage> {
        self.tx_queue.pop_front()
    }

    pub fn is_pending(&self, ticket: u32) -> bool {
        self.tx_queue.iter().any(|message| message.ticket == ticket)
    }

    pub fn pending_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Drop every queued write.
    pub fn clear_tx(&mut self) -> Drained {
        self.drain_where(|_| true)
    }

    fn drain_where(&mut self, mut remove: impl FnMut(&SegmentedMessage) -> bool) -> Drained {
        let head_ticket = self.tx_queue.front().map(|message| message.ticket);
        let mut drained = Drained::default();
        self.tx_queue.retain(|message| {
            if remove(message) {
                drained.tickets.push(message.ticket);
                false
            } else {
                true
            }
        });
        drained.head_removed = head_ticket.is_some_and(|ticket| drained.tickets.contains(&ticket));
        drained
    }

    pub fn pacing_override(&self) -> PacingOverride {
        PacingOverride {
            block_size: self.config.block_size_override(),
            separation: self.config.separation_override(),
        }
    }
}
