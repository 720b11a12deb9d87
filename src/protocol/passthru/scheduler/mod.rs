//! Transmission scheduler: a time-ordered list of "ready at T" sends, the queue
//! of frames waiting for their bus echo, and the worker that drains both.
//!
//! The worker sleeps on the device wake signal or on the head expiry, whichever
//! comes first. Each pass sends pending flow-control replies first, then the
//! frame of the oldest due entry.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt::Debug;
use embassy_time::{Duration, Instant};
use futures_util::{future::select, pin_mut};

use super::device::Device;
use super::ChannelId;
use crate::config::TxEchoSource;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_link::LinkSender;
use crate::protocol::transport::traits::link_clock::LinkClock;

//==================================================================================SCHEDULE
/// One segmented message ready to put its next frame on the bus at `expiry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScheduleEntry {
    pub channel: ChannelId,
    pub ticket: u32,
    pub expiry: Instant,
}

/// Frame submitted to the link whose echo has not been seen yet.
#[derive(Clone, Debug)]
pub(crate) struct EchoEntry {
    pub channel: ChannelId,
    pub ticket: u32,
    pub frame: CanFrame,
}

/// Shared scheduling state, guarded by the device.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    /// Sorted by expiry; equal expiries keep insertion order.
    ready: Vec<ScheduleEntry>,
    awaiting_echo: VecDeque<EchoEntry>,
    /// Flow-control replies, sent ahead of any data frame.
    control: VecDeque<CanFrame>,
}

impl Schedule {
    pub const fn new() -> Self {
        Self {
            ready: Vec::new(),
            awaiting_echo: VecDeque::new(),
            control: VecDeque::new(),
        }
    }

    /// Insert in expiry order. Returns `true` when the entry became the head,
    /// meaning the worker must recompute its sleep.
    pub fn insert(&mut self, entry: ScheduleEntry) -> bool {
        let position = self
            .ready
            .iter()
            .position(|queued| queued.expiry > entry.expiry)
            .unwrap_or(self.ready.len());
        self.ready.insert(position, entry);
        position == 0
    }

    /// Remove and return the head if it has expired.
    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduleEntry> {
        match self.ready.first() {
            Some(head) if head.expiry <= now => Some(self.ready.remove(0)),
            _ => None,
        }
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.ready.first().map(|entry| entry.expiry)
    }

    pub fn push_echo(&mut self, entry: EchoEntry) {
        self.awaiting_echo.push_back(entry);
    }

    /// Match an echo against the oldest outstanding send. Only the head is
    /// considered: the link echoes frames in submission order.
    pub fn consume_echo(&mut self, echo: &CanFrame) -> Option<(ChannelId, u32)> {
        let head = self.awaiting_echo.front()?;
        if !head.frame.same_wire_content(echo) {
            return None;
        }
        self.awaiting_echo
            .pop_front()
            .map(|entry| (entry.channel, entry.ticket))
    }

    /// Drop ready entries of `channel`, restricted to one ticket when given.
    pub fn cancel_ready(&mut self, channel: ChannelId, ticket: Option<u32>) {
        self.ready.retain(|entry| {
            entry.channel != channel || ticket.is_some_and(|ticket| entry.ticket != ticket)
        });
    }

    /// Drop every trace of `channel` (or of one of its tickets): ready entries
    /// and outstanding echoes.
    pub fn cancel(&mut self, channel: ChannelId, ticket: Option<u32>) {
        self.cancel_ready(channel, ticket);
        self.awaiting_echo.retain(|entry| {
            entry.channel != channel || ticket.is_some_and(|ticket| entry.ticket != ticket)
        });
    }

    pub fn push_control(&mut self, frame: CanFrame) {
        self.control.push_back(frame);
    }

    pub fn pop_control(&mut self) -> Option<CanFrame> {
        self.control.pop_front()
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.awaiting_echo.clear();
        self.control.clear();
    }

    #[cfg(test)]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    #[cfg(test)]
    pub fn echo_len(&self) -> usize {
        self.awaiting_echo.len()
    }
}

//==================================================================================WORKER
/// Frame taken from a due entry, ready for the link.
#[derive(Debug)]
pub(crate) struct OutboundJob {
    pub channel: ChannelId,
    pub ticket: u32,
    pub frame: CanFrame,
}

/// Scheduler worker owning the transmit half of the link.
pub struct Scheduler<'d, C: LinkClock, T: LinkSender> {
    device: &'d Device<C>,
    tx: T,
}

impl<'d, C, T> Scheduler<'d, C, T>
where
    C: LinkClock,
    T: LinkSender,
    T::Error: Debug,
{
    pub(crate) fn new(device: &'d Device<C>, tx: T) -> Self {
        Self { device, tx }
    }

    /// Run until the device is closed. Link send failures never stop the
    /// worker: the affected message is retired without notice.
    pub async fn run(mut self) {
        let device = self.device;
        loop {
            if device.is_closed() {
                return;
            }

            if let Some(frame) = device.next_control_frame() {
                #[cfg(feature = "defmt")]
                defmt::trace!("Sending flow control to {=u32:#x}", frame.id.raw());
                if let Err(_err) = self.tx.send(&frame).await {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("Flow control frame rejected by the link");
                }
                continue;
            }

            let now = device.clock().now();
            if let Some(job) = device.take_due_frame(now) {
                #[cfg(feature = "defmt")]
                defmt::trace!(
                    "Sending frame on channel {}, ticket {}",
                    job.channel.index,
                    job.ticket
                );
                match self.tx.send(&job.frame).await {
                    Ok(()) => {
                        if device.config().tx_echo == TxEchoSource::OnSubmit {
                            device.on_echo(job.channel, job.ticket);
                        }
                    }
                    Err(_err) => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!(
                            "Link refused frame of ticket {}: message dropped",
                            job.ticket
                        );
                        device.abort_send(job.channel, job.ticket);
                    }
                }
                continue;
            }

            let wake = device.scheduler_wake.wait();
            pin_mut!(wake);
            match device.next_expiry() {
                Some(expiry) => {
                    let sleep = expiry
                        .checked_duration_since(now)
                        .unwrap_or(Duration::from_ticks(0));
                    let delay = device.clock().delay(sleep);
                    pin_mut!(delay);
                    select(wake, delay).await;
                }
                None => wake.await,
            }
        }
    }
}
