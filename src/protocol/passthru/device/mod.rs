//! Pass-through device: channels multiplexed over one CAN link, plus the two
//! workers (receive dispatcher, transmission scheduler) the host must drive.
//!
//! ```text
//!  application ──connect/write/read──► Device ◄──── shared by reference ────┐
//!                                        │                                  │
//!                     runners(tx, rx) ───┴──► Dispatcher (owns rx)          │
//!                                         └──► Scheduler  (owns tx) ────────┘
//! ```
//!
//! All shared state sits behind critical-section mutexes: one per channel for
//! its filters and send queue, one per channel for its inbound queue, and one
//! for the device-wide schedule. Locks are held only for short synchronous
//! sections, never across an `.await`.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::Debug;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use futures_util::{future::select, future::Either, pin_mut};

use super::channel::{ChannelState, Drained};
use super::dispatcher::Dispatcher;
use super::filter::{FilterId, FilterSpec};
use super::outbound::{Advance, SegmentedMessage};
use super::scheduler::{EchoEntry, OutboundJob, Schedule, ScheduleEntry, Scheduler};
use super::{ChannelId, ConnectFlags, MessageKind, PassThruMsg, Protocol, TxMessage};
use crate::config::{ConfigParam, DeviceConfig, TxEchoSource, MAX_CHANNELS, SUPPORTED_BAUD_RATES};
use crate::error::{DeviceRunError, PassThruError};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_link::{LinkReceiver, LinkSender};
use crate::protocol::transport::traits::link_clock::LinkClock;

/// Longest single sleep of a blocking read or write before it re-checks its
/// condition. Wake signals are single-consumer, so concurrent callers on one
/// channel fall back on this.
const WAIT_SLICE: Duration = Duration::from_millis(10);

//==================================================================================SLOTS
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) generation: u16,
    pub(crate) channel: Option<ChannelState>,
}

pub(crate) struct ChannelSlot {
    pub(crate) state: Mutex<CriticalSectionRawMutex, RefCell<SlotState>>,
    inbound: Mutex<CriticalSectionRawMutex, RefCell<VecDeque<PassThruMsg>>>,
    rx_ready: Signal<CriticalSectionRawMutex, ()>,
    tx_progress: Signal<CriticalSectionRawMutex, ()>,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SlotState::default())),
            inbound: Mutex::new(RefCell::new(VecDeque::new())),
            rx_ready: Signal::new(),
            tx_progress: Signal::new(),
        }
    }

    pub(crate) fn push_inbound(&self, message: PassThruMsg) {
        self.inbound
            .lock(|inbound| inbound.borrow_mut().push_back(message));
        self.rx_ready.signal(());
    }
}

//==================================================================================DEVICE
/// An open pass-through device.
pub struct Device<C: LinkClock> {
    config: DeviceConfig,
    clock: C,
    pub(crate) channels: [ChannelSlot; MAX_CHANNELS],
    pub(crate) schedule: Mutex<CriticalSectionRawMutex, RefCell<Schedule>>,
    pub(crate) scheduler_wake: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) dispatcher_stop: Signal<CriticalSectionRawMutex, ()>,
    closed: AtomicBool,
}

/// Both workers of a device, ready to be spawned or joined by the host.
pub struct DeviceRunners<'d, C, T, R>
where
    C: LinkClock,
    T: LinkSender,
    R: LinkReceiver,
{
    pub dispatcher: Dispatcher<'d, C, R>,
    pub scheduler: Scheduler<'d, C, T>,
}

impl<C: LinkClock> Device<C> {
    /// Open the device. Nothing moves until the runners are driven.
    pub fn new(config: DeviceConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            channels: core::array::from_fn(|_| ChannelSlot::new()),
            schedule: Mutex::new(RefCell::new(Schedule::new())),
            scheduler_wake: Signal::new(),
            dispatcher_stop: Signal::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Split the link between the two workers.
    pub fn runners<T, R>(&self, tx: T, rx: R) -> DeviceRunners<'_, C, T, R>
    where
        T: LinkSender,
        R: LinkReceiver,
    {
        DeviceRunners {
            dispatcher: Dispatcher::new(self, rx),
            scheduler: Scheduler::new(self, tx),
        }
    }

    /// Drive both workers until the device is closed or the link fails.
    pub async fn run<T, R>(&self, tx: T, rx: R) -> Result<(), DeviceRunError<R::Error>>
    where
        T: LinkSender,
        T::Error: Debug,
        R: LinkReceiver,
        R::Error: Debug,
    {
        let DeviceRunners {
            dispatcher,
            scheduler,
        } = self.runners(tx, rx);
        let dispatcher = dispatcher.run();
        let scheduler = scheduler.run();
        pin_mut!(dispatcher);
        pin_mut!(scheduler);
        match select(dispatcher, scheduler).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => Ok(()),
        }
    }

    /// Close the device: every channel is torn down, both workers exit
    /// without handling another frame, later calls fail with `DeviceClosed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("Closing pass-through device");
        for slot in &self.channels {
            slot.state.lock(|state| state.borrow_mut().channel = None);
            slot.inbound.lock(|inbound| inbound.borrow_mut().clear());
            slot.rx_ready.signal(());
            slot.tx_progress.signal(());
        }
        self.schedule.lock(|schedule| schedule.borrow_mut().clear());
        self.scheduler_wake.signal(());
        self.dispatcher_stop.signal(());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    //==================================================================================CHANNELS
    /// Connect a channel at `baud_rate` bit/s.
    pub fn connect(
        &self,
        protocol: Protocol,
        flags: ConnectFlags,
        baud_rate: u32,
    ) -> Result<ChannelId, PassThruError> {
        self.ensure_open()?;
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(PassThruError::InvalidBaudrate);
        }
        for (index, slot) in self.channels.iter().enumerate() {
            let connected = slot.state.lock(|state| {
                let mut state = state.borrow_mut();
                if state.channel.is_some() {
                    return None;
                }
                state.generation = state.generation.wrapping_add(1);
                state.channel = Some(ChannelState::new(protocol, flags, baud_rate));
                Some(state.generation)
            });
            if let Some(generation) = connected {
                slot.inbound.lock(|inbound| inbound.borrow_mut().clear());
                #[cfg(feature = "defmt")]
                defmt::debug!("Channel {} connected at {} bit/s", index, baud_rate);
                return Ok(ChannelId {
                    index: index as u8,
                    generation,
                });
            }
        }
        Err(PassThruError::ExceededLimit)
    }

    /// Tear a channel down: its queued sends and conversations are dropped
    /// and its unread messages discarded.
    pub fn disconnect(&self, channel: ChannelId) -> Result<(), PassThruError> {
        self.with_channel(channel, |_| Ok(()))?;
        let slot = &self.channels[channel.index()];
        slot.state.lock(|state| state.borrow_mut().channel = None);
        self.schedule
            .lock(|schedule| schedule.borrow_mut().cancel(channel, None));
        slot.inbound.lock(|inbound| inbound.borrow_mut().clear());
        slot.rx_ready.signal(());
        slot.tx_progress.signal(());
        Ok(())
    }

    //==================================================================================FILTERS
    pub fn start_filter(&self, channel: ChannelId, spec: FilterSpec) -> Result<FilterId, PassThruError> {
        self.with_channel(channel, |state| state.start_filter(spec))
    }

    /// Remove a filter, aborting its conversation and the sends it paces.
    pub fn stop_filter(&self, channel: ChannelId, filter: FilterId) -> Result<(), PassThruError> {
        let drained = self.with_channel(channel, |state| state.stop_filter(filter))?;
        self.after_drain(channel, drained);
        Ok(())
    }

    pub fn clear_filters(&self, channel: ChannelId) -> Result<(), PassThruError> {
        let drained = self.with_channel(channel, |state| Ok(state.clear_filters()))?;
        self.after_drain(channel, drained);
        Ok(())
    }

    //==================================================================================TRANSMIT
    /// Queue a message for transmission.
    ///
    /// With a zero `timeout` the call returns once the message is queued.
    /// Otherwise it waits until the message has left the queue, or fails with
    /// `Timeout` while the message stays queued.
    pub async fn write(
        &self,
        channel: ChannelId,
        message: &TxMessage,
        timeout: Duration,
    ) -> Result<(), PassThruError> {
        let (ticket, is_head) = self.with_channel(channel, |state| {
            let segmented = state.prepare_write(message)?;
            let ticket = segmented.ticket();
            Ok((ticket, state.enqueue(segmented)))
        })?;
        if is_head {
            self.schedule_send(channel, ticket, self.clock.now());
        }
        if timeout == Duration::from_ticks(0) {
            return Ok(());
        }

        let deadline = self.clock.now().checked_add(timeout);
        let slot = &self.channels[channel.index()];
        loop {
            if !self.with_channel(channel, |state| Ok(state.is_pending(ticket)))? {
                return Ok(());
            }
            let Some(slice) = self.remaining_slice(deadline) else {
                return Err(PassThruError::Timeout);
            };
            let progress = slot.tx_progress.wait();
            let delay = self.clock.delay(slice);
            pin_mut!(progress);
            pin_mut!(delay);
            select(progress, delay).await;
        }
    }

    /// Drop every queued write of the channel.
    pub fn clear_tx_buffer(&self, channel: ChannelId) -> Result<(), PassThruError> {
        let drained = self.with_channel(channel, |state| Ok(state.clear_tx()))?;
        self.after_drain(channel, drained);
        Ok(())
    }

    //==================================================================================RECEIVE
    /// Take up to `max` queued messages without waiting.
    pub fn try_read(&self, channel: ChannelId, max: usize) -> Result<Vec<PassThruMsg>, PassThruError> {
        self.with_channel(channel, |_| Ok(()))?;
        let slot = &self.channels[channel.index()];
        Ok(slot.inbound.lock(|inbound| {
            let mut inbound = inbound.borrow_mut();
            let count = max.min(inbound.len());
            inbound.drain(..count).collect()
        }))
    }

    /// Take up to `max` messages, waiting at most `timeout` for the first one.
    /// An elapsed timeout yields an empty batch.
    pub async fn read(
        &self,
        channel: ChannelId,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<PassThruMsg>, PassThruError> {
        let batch = self.try_read(channel, max)?;
        if !batch.is_empty() || max == 0 || timeout == Duration::from_ticks(0) {
            return Ok(batch);
        }

        let deadline = self.clock.now().checked_add(timeout);
        let slot = &self.channels[channel.index()];
        loop {
            let Some(slice) = self.remaining_slice(deadline) else {
                return Ok(Vec::new());
            };
            let ready = slot.rx_ready.wait();
            let delay = self.clock.delay(slice);
            pin_mut!(ready);
            pin_mut!(delay);
            select(ready, delay).await;

            let batch = self.try_read(channel, max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    pub fn clear_rx_buffer(&self, channel: ChannelId) -> Result<(), PassThruError> {
        self.with_channel(channel, |_| Ok(()))?;
        self.channels[channel.index()]
            .inbound
            .lock(|inbound| inbound.borrow_mut().clear());
        Ok(())
    }

    //==================================================================================CONFIG
    pub fn get_config(&self, channel: ChannelId, param: ConfigParam) -> Result<u32, PassThruError> {
        self.with_channel(channel, |state| Ok(state.config.get(param)))
    }

    pub fn set_config(
        &self,
        channel: ChannelId,
        param: ConfigParam,
        value: u32,
    ) -> Result<(), PassThruError> {
        self.with_channel(channel, |state| state.config.set(param, value))
    }

    //==================================================================================INTERNALS
    fn ensure_open(&self) -> Result<(), PassThruError> {
        if self.is_closed() {
            Err(PassThruError::DeviceClosed)
        } else {
            Ok(())
        }
    }

    /// Run `f` on a live channel, validating the handle.
    pub(crate) fn with_channel<R>(
        &self,
        channel: ChannelId,
        f: impl FnOnce(&mut ChannelState) -> Result<R, PassThruError>,
    ) -> Result<R, PassThruError> {
        self.ensure_open()?;
        let slot = self
            .channels
            .get(channel.index())
            .ok_or(PassThruError::InvalidChannelId)?;
        slot.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.generation != channel.generation {
                return Err(PassThruError::InvalidChannelId);
            }
            match state.channel.as_mut() {
                Some(live) => f(live),
                None => Err(PassThruError::InvalidChannelId),
            }
        })
    }

    /// Time left until `deadline`, capped to one wait slice; `None` once
    /// elapsed. A deadline past the clock range never elapses.
    fn remaining_slice(&self, deadline: Option<Instant>) -> Option<Duration> {
        match deadline {
            Some(deadline) => deadline
                .checked_duration_since(self.clock.now())
                .filter(|left| *left > Duration::from_ticks(0))
                .map(|left| left.min(WAIT_SLICE)),
            None => Some(WAIT_SLICE),
        }
    }

    /// Make `(channel, ticket)` eligible for its next frame at `at`.
    pub(crate) fn schedule_send(&self, channel: ChannelId, ticket: u32, at: Instant) {
        let new_head = self.schedule.lock(|schedule| {
            schedule.borrow_mut().insert(ScheduleEntry {
                channel,
                ticket,
                expiry: at,
            })
        });
        if new_head {
            self.scheduler_wake.signal(());
        }
    }

    /// Cancel the schedule entries of drained messages and start the new head.
    fn after_drain(&self, channel: ChannelId, drained: Drained) {
        if drained.tickets.is_empty() {
            return;
        }
        self.schedule.lock(|schedule| {
            let mut schedule = schedule.borrow_mut();
            for ticket in &drained.tickets {
                schedule.cancel(channel, Some(*ticket));
            }
        });
        if drained.head_removed {
            self.start_next(channel);
        }
        self.channels[channel.index()].tx_progress.signal(());
    }

    /// Schedule the head of the send queue, if any, right away.
    fn start_next(&self, channel: ChannelId) {
        let next = self
            .with_channel(channel, |state| Ok(state.head().map(SegmentedMessage::ticket)))
            .ok()
            .flatten();
        if let Some(ticket) = next {
            self.schedule_send(channel, ticket, self.clock.now());
        }
    }

    //==================================================================================WORKER HOOKS
    pub(crate) fn next_control_frame(&self) -> Option<CanFrame> {
        self.schedule
            .lock(|schedule| schedule.borrow_mut().pop_control())
            .map(|frame| frame.with_bus(self.config.bus).with_timestamp(self.clock.now()))
    }

    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        self.schedule.lock(|schedule| schedule.borrow().next_expiry())
    }

    /// Pop due entries until one still refers to a live message, and take its
    /// frame. Stale entries (cancelled or superseded sends) are skipped.
    pub(crate) fn take_due_frame(&self, now: Instant) -> Option<OutboundJob> {
        loop {
            let entry = self
                .schedule
                .lock(|schedule| schedule.borrow_mut().pop_due(now))?;
            let frame = self
                .with_channel(entry.channel, |state| {
                    Ok(state
                        .head_with_ticket(entry.ticket)
                        .and_then(SegmentedMessage::take_frame))
                })
                .ok()
                .flatten();
            let Some(frame) = frame else {
                continue;
            };
            let frame = frame.with_bus(self.config.bus).with_timestamp(now);
            if self.config.tx_echo == TxEchoSource::Link {
                self.schedule.lock(|schedule| {
                    schedule.borrow_mut().push_echo(EchoEntry {
                        channel: entry.channel,
                        ticket: entry.ticket,
                        frame: frame.clone(),
                    })
                });
            }
            return Some(OutboundJob {
                channel: entry.channel,
                ticket: entry.ticket,
                frame,
            });
        }
    }

    /// The frame in flight for `(channel, ticket)` is on the bus.
    pub(crate) fn on_echo(&self, channel: ChannelId, ticket: u32) {
        let now = self.clock.now();
        let advance = self
            .with_channel(channel, |state| {
                Ok(state.head_with_ticket(ticket).map(SegmentedMessage::on_echo))
            })
            .ok()
            .flatten();
        match advance {
            Some(Advance::Retired) => self.retire_head(channel, ticket, now),
            Some(Advance::Next { delay }) => {
                let at = now.checked_add(delay).unwrap_or(now);
                self.schedule_send(channel, ticket, at);
            }
            Some(Advance::AwaitFlowControl) | None => {}
        }
    }

    /// Remove a fully sent message and queue its transmit indications.
    fn retire_head(&self, channel: ChannelId, ticket: u32, now: Instant) {
        let retired = self
            .with_channel(channel, |state| {
                if state.head_with_ticket(ticket).is_none() {
                    return Ok(None);
                }
                let loopback = state.config.loopback;
                Ok(state.pop_head().map(|message| (message, loopback)))
            })
            .ok()
            .flatten();
        let Some((message, loopback)) = retired else {
            return;
        };
        #[cfg(feature = "defmt")]
        defmt::debug!("Ticket {} sent on channel {}", ticket, channel.index);

        let slot = &self.channels[channel.index()];
        slot.push_inbound(PassThruMsg {
            protocol: message.protocol,
            kind: MessageKind::TxDone,
            address: message.address,
            data: Vec::new(),
            timestamp: now,
        });
        if loopback {
            slot.push_inbound(PassThruMsg {
                protocol: message.protocol,
                kind: MessageKind::TxLoopback,
                address: message.address,
                data: message.payload,
                timestamp: now,
            });
        }
        slot.tx_progress.signal(());
        self.start_next(channel);
    }

    /// Drop the message at the head of the queue without notice, as for a
    /// refused frame or a flow-control overflow.
    pub(crate) fn abort_send(&self, channel: ChannelId, ticket: u32) {
        self.schedule
            .lock(|schedule| schedule.borrow_mut().cancel(channel, Some(ticket)));
        let removed = self
            .with_channel(channel, |state| {
                Ok(state.head_with_ticket(ticket).is_some() && state.pop_head().is_some())
            })
            .unwrap_or(false);
        if removed {
            #[cfg(feature = "defmt")]
            defmt::warn!("Ticket {} aborted on channel {}", ticket, channel.index);
            self.channels[channel.index()].tx_progress.signal(());
            self.start_next(channel);
        }
    }
}
