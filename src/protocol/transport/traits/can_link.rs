//! Minimal abstraction for an asynchronous CAN link, split in two halves so the
//! receive dispatcher and the transmission scheduler can own one each. Allows
//! the library to plug into various implementations (embedded HAL, USB adapter
//! driver, SocketCAN, in-memory test doubles).
use crate::protocol::transport::can_frame::CanFrame;
use core::future::Future;

/// Transmit half of the link.
pub trait LinkSender {
    type Error: core::fmt::Debug;
    /// Submit a frame to the bus. Asynchronous to accommodate non-blocking drivers.
    ///
    /// Returning `Ok` means the driver accepted the frame; when the device runs
    /// with [`TxEchoSource::Link`](crate::config::TxEchoSource::Link) the link
    /// must later deliver the same frame back through [`LinkReceiver::recv`]
    /// with [`Direction::TxEcho`](crate::protocol::transport::can_frame::Direction::TxEcho).
    fn send<'a>(
        &'a mut self,
        frame: &'a CanFrame,
    ) -> impl Future<Output = Result<(), Self::Error>> + 'a;
}

/// Receive half of the link.
pub trait LinkReceiver {
    type Error: core::fmt::Debug;
    /// Retrieve the next available frame, bus traffic and transmit echoes alike.
    /// Asynchronously waits until data arrives.
    fn recv<'a>(&'a mut self) -> impl Future<Output = Result<CanFrame, Self::Error>> + 'a;
}
