//! Outbound segmented message: the frame list computed once at submission plus
//! the cursor and pacing state that advance as echoes and flow-control frames
//! come back from the bus.
use alloc::vec::Vec;
use embassy_time::Duration;

use super::filter::FilterId;
use super::Protocol;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::isotp::pci::{separation_from_st_min, FlowStatus};
use crate::protocol::transport::isotp::IsoTpAddress;

/// What the scheduler must do once the frame in flight has been echoed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Every frame is on the bus: the message leaves the queue.
    Retired,
    /// Stall until the receiver sends flow control.
    AwaitFlowControl,
    /// Schedule the next frame after `delay`.
    Next { delay: Duration },
}

/// Effect of a flow-control frame on the message bound to its filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Not waiting for flow control and nothing to change.
    Ignored,
    /// Unlocked: schedule the next consecutive frame now.
    Resume,
    /// Pacing updated or still waiting; scheduling is unchanged.
    Stay,
    /// Receiver asked to wait in the middle of a burst: drop the pending
    /// schedule entry until the next flow-control frame.
    Stall,
    /// Receiver refused the transfer.
    Abort,
}

/// Channel-level overrides applied on top of the remote's flow control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacingOverride {
    pub block_size: Option<u8>,
    pub separation: Option<Duration>,
}

#[derive(Debug)]
pub struct SegmentedMessage {
    pub(crate) ticket: u32,
    pub(crate) protocol: Protocol,
    pub(crate) address: IsoTpAddress,
    /// Kept whole for the loopback copy.
    pub(crate) payload: Vec<u8>,
    frames: Vec<CanFrame>,
    cursor: usize,
    in_flight: bool,
    /// Flow-control filter pacing the transfer (multi-frame only).
    pub(crate) filter: Option<FilterId>,
    awaiting_flow_control: bool,
    /// Clear-to-send seen while the first frame was still in flight.
    early_clear_to_send: bool,
    /// Frames left in the current block; `None` means unlimited.
    block_remaining: Option<u8>,
    separation: Duration,
}

impl SegmentedMessage {
    pub fn new(
        ticket: u32,
        protocol: Protocol,
        address: IsoTpAddress,
        payload: Vec<u8>,
        frames: Vec<CanFrame>,
        filter: Option<FilterId>,
    ) -> Self {
        Self {
            ticket,
            protocol,
            address,
            payload,
            frames,
            cursor: 0,
            in_flight: false,
            filter,
            awaiting_flow_control: false,
            early_clear_to_send: false,
            block_remaining: None,
            separation: Duration::from_ticks(0),
        }
    }

    pub fn ticket(&self) -> u32 {
        self.ticket
    }

    /// Frame the cursor points at, if any is left.
    pub fn current_frame(&self) -> Option<&CanFrame> {
        self.frames.get(self.cursor)
    }

    /// Frames already confirmed on the bus.
    pub fn frames_sent(&self) -> usize {
        self.cursor
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_awaiting_flow_control(&self) -> bool {
        self.awaiting_flow_control
    }

    /// Take the current frame for submission to the link.
    pub fn take_frame(&mut self) -> Option<CanFrame> {
        if self.in_flight || self.awaiting_flow_control {
            return None;
        }
        let frame = self.frames.get(self.cursor)?.clone();
        self.in_flight = true;
        Some(frame)
    }

    /// The link confirmed the frame in flight.
    pub fn on_echo(&mut self) -> Advance {
        self.in_flight = false;
        self.cursor += 1;
        if self.cursor >= self.frames.len() {
            return Advance::Retired;
        }
        if self.cursor == 1 {
            if core::mem::take(&mut self.early_clear_to_send) {
                return Advance::Next {
                    delay: Duration::from_ticks(0),
                };
            }
            // First frame out: nothing more until the receiver answers.
            self.awaiting_flow_control = true;
            return Advance::AwaitFlowControl;
        }
        if let Some(remaining) = self.block_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.awaiting_flow_control = true;
            }
        }
        if self.awaiting_flow_control {
            Advance::AwaitFlowControl
        } else {
            Advance::Next {
                delay: self.separation,
            }
        }
    }

    /// Apply a flow-control frame received on the message's filter. The latest
    /// frame replaces block size and separation outright.
    pub fn on_flow_control(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
        overrides: PacingOverride,
    ) -> FlowOutcome {
        // Single frames and transfers whose first frame is not out yet.
        if self.frames.len() <= 1 || (self.cursor == 0 && !self.in_flight) {
            return FlowOutcome::Ignored;
        }
        if self.cursor == 0 {
            // The receiver answered before the first frame's echo: the echo
            // picks the answer up.
            return match status {
                FlowStatus::Overflow => FlowOutcome::Abort,
                FlowStatus::Wait => {
                    self.early_clear_to_send = false;
                    FlowOutcome::Stay
                }
                FlowStatus::ContinueToSend => {
                    self.apply_pacing(block_size, st_min, overrides);
                    self.early_clear_to_send = true;
                    FlowOutcome::Stay
                }
            };
        }
        match status {
            FlowStatus::Overflow => FlowOutcome::Abort,
            FlowStatus::Wait if self.awaiting_flow_control => FlowOutcome::Stay,
            FlowStatus::Wait => {
                self.awaiting_flow_control = true;
                FlowOutcome::Stall
            }
            FlowStatus::ContinueToSend => {
                self.apply_pacing(block_size, st_min, overrides);
                if self.awaiting_flow_control {
                    self.awaiting_flow_control = false;
                    if self.in_flight {
                        // A Wait stalled the burst while this frame was out;
                        // its echo reschedules.
                        FlowOutcome::Stay
                    } else {
                        FlowOutcome::Resume
                    }
                } else {
                    FlowOutcome::Stay
                }
            }
        }
    }

    fn apply_pacing(&mut self, block_size: u8, st_min: u8, overrides: PacingOverride) {
        let block_size = overrides.block_size.unwrap_or(block_size);
        self.block_remaining = (block_size != 0).then_some(block_size);
        self.separation = overrides
            .separation
            .unwrap_or_else(|| separation_from_st_min(st_min));
    }

    /// Separation to observe before the next consecutive frame.
    pub fn separation(&self) -> Duration {
        self.separation
    }
}
