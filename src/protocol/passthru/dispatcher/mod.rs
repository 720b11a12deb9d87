//! Receive dispatcher: the only reader of the link. Every frame is classified
//! once, either as the echo of one of our sends or as bus traffic routed to
//! each connected channel's filters.
use alloc::vec::Vec;
use core::fmt::Debug;
use futures_util::{future::select, future::Either, pin_mut};

use super::channel::ChannelState;
use super::device::Device;
use super::filter::{FilterSpec, FilterTable};
use super::outbound::FlowOutcome;
use super::{ChannelId, MessageKind, PassThruMsg, Protocol};
use crate::config::ChannelConfig;
use crate::error::DeviceRunError;
use crate::protocol::transport::can_frame::{CanFrame, Direction, CAN_MAX_DLEN};
use crate::protocol::transport::isotp::pci::{FlowStatus, Pci};
use crate::protocol::transport::isotp::reassembler::ProcessResult;
use crate::protocol::transport::isotp::{frame_body, IsoTpAddress};
use crate::protocol::transport::traits::can_link::LinkReceiver;
use crate::protocol::transport::traits::link_clock::LinkClock;

/// Dispatcher worker owning the receive half of the link.
pub struct Dispatcher<'d, C: LinkClock, R: LinkReceiver> {
    device: &'d Device<C>,
    rx: R,
}

impl<'d, C, R> Dispatcher<'d, C, R>
where
    C: LinkClock,
    R: LinkReceiver,
    R::Error: Debug,
{
    pub(crate) fn new(device: &'d Device<C>, rx: R) -> Self {
        Self { device, rx }
    }

    /// Run until the device is closed. A receive error ends the worker.
    pub async fn run(mut self) -> Result<(), DeviceRunError<R::Error>> {
        let device = self.device;
        loop {
            if device.is_closed() {
                return Ok(());
            }

            let received = {
                let recv_future = self.rx.recv();
                let stop_future = device.dispatcher_stop.wait();
                pin_mut!(recv_future);
                pin_mut!(stop_future);
                match select(recv_future, stop_future).await {
                    Either::Left((result, _)) => Some(result),
                    Either::Right(_) => None,
                }
            };

            match received {
                None => return Ok(()),
                Some(Err(err)) => return Err(DeviceRunError::Receive(err)),
                // A close racing with the receive wins: the frame is dropped.
                Some(Ok(_)) if device.is_closed() => return Ok(()),
                Some(Ok(frame)) => device.dispatch(frame),
            }
        }
    }
}

/// Work left for after the channel lock is released.
enum Followup {
    None,
    Resume(u32),
    Stall(u32),
    Abort(u32),
    Reply(CanFrame),
}

impl<C: LinkClock> Device<C> {
    /// Route one frame read from the link.
    pub(crate) fn dispatch(&self, frame: CanFrame) {
        match frame.direction {
            Direction::TxEcho => {
                let consumed = self
                    .schedule
                    .lock(|schedule| schedule.borrow_mut().consume_echo(&frame));
                match consumed {
                    Some((channel, ticket)) => self.on_echo(channel, ticket),
                    None => {
                        #[cfg(feature = "defmt")]
                        defmt::trace!("Unclaimed echo for {=u32:#x}", frame.id.raw());
                        self.route_to_channels(&frame);
                    }
                }
            }
            Direction::Tx => {}
            Direction::Rx => self.route_to_channels(&frame),
        }
    }

    /// Offer a frame to the filters of every channel.
    fn route_to_channels(&self, frame: &CanFrame) {
        for index in 0..self.channels.len() {
            self.dispatch_to_channel(index, frame);
        }
    }

    fn dispatch_to_channel(&self, index: usize, frame: &CanFrame) {
        let slot = &self.channels[index];
        let mut delivered = Vec::new();
        let (channel, followup) = slot.state.lock(|state| {
            let mut state = state.borrow_mut();
            let channel = ChannelId {
                index: index as u8,
                generation: state.generation,
            };
            let followup = match state.channel.as_mut() {
                Some(live) if live.flags.ids.accepts(frame.id.width()) => match live.protocol {
                    Protocol::Can => {
                        if live.filters.passing(frame).is_some() {
                            delivered.push(PassThruMsg {
                                protocol: Protocol::Can,
                                kind: MessageKind::Received,
                                address: IsoTpAddress::normal(frame.id),
                                data: frame.payload().to_vec(),
                                timestamp: frame.timestamp,
                            });
                        }
                        Followup::None
                    }
                    Protocol::Iso15765 => route_isotp(live, frame, &mut delivered),
                },
                _ => Followup::None,
            };
            (channel, followup)
        });

        for message in delivered {
            slot.push_inbound(message);
        }

        match followup {
            Followup::None => {}
            Followup::Resume(ticket) => self.schedule_send(channel, ticket, self.clock().now()),
            Followup::Stall(ticket) => self
                .schedule
                .lock(|schedule| schedule.borrow_mut().cancel_ready(channel, Some(ticket))),
            Followup::Abort(ticket) => self.abort_send(channel, ticket),
            Followup::Reply(reply) => {
                self.schedule
                    .lock(|schedule| schedule.borrow_mut().push_control(reply));
                self.scheduler_wake.signal(());
            }
        }
    }
}

/// ISO 15765 routing: frames selected by a flow-control filter drive its
/// conversation (or the send it paces); anything else may still be delivered
/// as a single frame through the pass filters.
fn route_isotp(live: &mut ChannelState, frame: &CanFrame, delivered: &mut Vec<PassThruMsg>) -> Followup {
    let Some(filter) = live.filters.matching_flow_control(frame) else {
        if let Some(message) = passing_single_frame(&live.filters, frame) {
            delivered.push(message);
        }
        return Followup::None;
    };
    let Some(spec) = live.filters.get(filter).copied() else {
        return Followup::None;
    };
    let prefix_len = spec.pattern.prefix_len();
    let Some(body) = frame_body(frame, prefix_len) else {
        return Followup::None;
    };
    let Ok(pci) = Pci::decode(body) else {
        #[cfg(feature = "defmt")]
        defmt::trace!("Undecodable frame from {=u32:#x}", frame.id.raw());
        return Followup::None;
    };

    if let Pci::FlowControl {
        status,
        block_size,
        st_min,
    } = pci
    {
        let overrides = live.pacing_override();
        let Some(head) = live.head_on_filter(filter) else {
            return Followup::None;
        };
        let ticket = head.ticket();
        return match head.on_flow_control(status, block_size, st_min, overrides) {
            FlowOutcome::Resume => Followup::Resume(ticket),
            FlowOutcome::Stall => Followup::Stall(ticket),
            FlowOutcome::Abort => Followup::Abort(ticket),
            FlowOutcome::Stay | FlowOutcome::Ignored => Followup::None,
        };
    }

    let Some(reassembler) = live.filters.reassembler_mut(filter) else {
        return Followup::None;
    };
    let source = source_address(&spec, frame);
    match reassembler.process(pci, body, prefix_len, frame.timestamp) {
        ProcessResult::Started { total_len } => {
            #[cfg(feature = "defmt")]
            defmt::debug!(
                "Transfer of {} bytes started on filter {}",
                total_len,
                filter.index()
            );
            delivered.push(PassThruMsg {
                protocol: Protocol::Iso15765,
                kind: MessageKind::FirstFrame { total_len },
                address: source,
                data: Vec::new(),
                timestamp: frame.timestamp,
            });
            flow_control_reply(&spec, &live.config).map_or(Followup::None, Followup::Reply)
        }
        ProcessResult::MessageComplete(message) => {
            delivered.push(PassThruMsg {
                protocol: Protocol::Iso15765,
                kind: MessageKind::Received,
                address: source,
                data: message.payload,
                timestamp: frame.timestamp,
            });
            Followup::None
        }
        ProcessResult::Discarded => {
            #[cfg(feature = "defmt")]
            defmt::warn!("Conversation dropped on filter {}", filter.index());
            Followup::None
        }
        ProcessResult::Ignored | ProcessResult::FragmentConsumed => Followup::None,
    }
}

/// Address a received frame came from: its id plus, with extended addressing,
/// the address byte it carried.
fn source_address(spec: &FilterSpec, frame: &CanFrame) -> IsoTpAddress {
    match spec.pattern.ext_addr {
        Some(_) => IsoTpAddress {
            id: frame.id,
            ext_addr: frame.payload().first().copied(),
        },
        None => IsoTpAddress::normal(frame.id),
    }
}

/// Clear-to-send frame answering a first frame received on `spec`.
fn flow_control_reply(spec: &FilterSpec, config: &ChannelConfig) -> Option<CanFrame> {
    let target = spec.flow_control?;
    let prefix = target.prefix_len();
    let mut data = [config.pad_byte; CAN_MAX_DLEN];
    if let Some(ext_addr) = target.ext_addr {
        data[0] = ext_addr;
    }
    let header = Pci::FlowControl {
        status: FlowStatus::ContinueToSend,
        block_size: config.block_size,
        st_min: config.st_min,
    }
    .encode(&mut data[prefix..]);
    let len = if spec.flags.padding {
        CAN_MAX_DLEN
    } else {
        prefix + header
    };
    CanFrame::new(target.id, &data[..len])
}

/// Unmatched traffic on an ISO 15765 channel: a single frame selected by a
/// pass filter is delivered as a complete message.
fn passing_single_frame(filters: &FilterTable, frame: &CanFrame) -> Option<PassThruMsg> {
    let spec = filters.get(filters.passing(frame)?)?;
    let body = frame_body(frame, spec.pattern.prefix_len())?;
    let Ok(Pci::Single { len }) = Pci::decode(body) else {
        return None;
    };
    Some(PassThruMsg {
        protocol: Protocol::Iso15765,
        kind: MessageKind::Received,
        address: source_address(spec, frame),
        data: body[1..1 + len as usize].to_vec(),
        timestamp: frame.timestamp,
    })
}
