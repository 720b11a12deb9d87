// Test doubles: an in-memory CAN link that echoes our own transmissions, a
// scripted ECU on the other end of the bus, and a tokio-backed clock.
use korri_isotp::protocol::transport::{
    can_frame::{CanFrame, Direction},
    can_id::CanId,
    traits::{
        can_link::{LinkReceiver, LinkSender},
        link_clock::LinkClock,
    },
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Time an ECU waits for a frame before the test fails.
#[allow(dead_code)]
pub const FRAME_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Debug)]
pub struct LinkClosed;

/// Transmit half handed to the device. Every accepted frame reaches the ECU
/// and, when echo is enabled, comes back to the device as `TxEcho`.
pub struct MockTx {
    to_ecu: mpsc::UnboundedSender<CanFrame>,
    to_device: mpsc::UnboundedSender<CanFrame>,
    echo: bool,
    refuse: bool,
    /// Time `send` keeps running after the frame is on the bus.
    settle: Option<std::time::Duration>,
}

#[allow(dead_code)]
impl MockTx {
    /// Make the link reject every frame.
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Return from `send` only `millis` after the frame reached the bus.
    pub fn settling(mut self, millis: u64) -> Self {
        self.settle = Some(std::time::Duration::from_millis(millis));
        self
    }
}

impl LinkSender for MockTx {
    type Error = LinkClosed;

    async fn send<'a>(&'a mut self, frame: &'a CanFrame) -> Result<(), Self::Error> {
        if self.refuse {
            return Err(LinkClosed);
        }
        self.to_ecu
            .send(frame.clone().with_direction(Direction::Rx))
            .map_err(|_| LinkClosed)?;
        if self.echo {
            self.to_device
                .send(frame.clone().with_direction(Direction::TxEcho))
                .map_err(|_| LinkClosed)?;
        }
        if let Some(settle) = self.settle {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }
}

/// Receive half handed to the device: ECU traffic and echoes, in bus order.
pub struct MockRx {
    rx: mpsc::UnboundedReceiver<CanFrame>,
}

impl LinkReceiver for MockRx {
    type Error = LinkClosed;

    async fn recv(&mut self) -> Result<CanFrame, Self::Error> {
        self.rx.recv().await.ok_or(LinkClosed)
    }
}

/// Remote node scripted by the test.
pub struct Ecu {
    to_device: mpsc::UnboundedSender<CanFrame>,
    from_device: mpsc::UnboundedReceiver<CanFrame>,
}

#[allow(dead_code)]
impl Ecu {
    /// Put a frame on the bus towards the device.
    pub fn send(&self, id: CanId, payload: &[u8]) {
        let frame = CanFrame::new(id, payload)
            .expect("test frames fit in eight bytes")
            .with_direction(Direction::Rx);
        self.to_device.send(frame).expect("device link is open");
    }

    /// Next frame the device put on the bus.
    pub async fn recv(&mut self) -> CanFrame {
        timeout(FRAME_TIMEOUT, self.from_device.recv())
            .await
            .expect("device sent nothing in time")
            .expect("device link is open")
    }

    /// Next frame and the moment it was seen.
    pub async fn recv_timed(&mut self) -> (CanFrame, tokio::time::Instant) {
        let frame = self.recv().await;
        (frame, tokio::time::Instant::now())
    }

    /// Assert the device stays quiet for `millis`.
    pub async fn expect_silence(&mut self, millis: u64) {
        let waited = timeout(
            std::time::Duration::from_millis(millis),
            self.from_device.recv(),
        )
        .await;
        if let Ok(Some(frame)) = waited {
            panic!("unexpected frame {:x?} on {:#x}", frame.payload(), frame.id.raw());
        }
    }
}

/// Receive half whose link is already gone: the first `recv` fails.
#[allow(dead_code)]
pub fn unplugged_receiver() -> MockRx {
    let (_, rx) = mpsc::unbounded_channel();
    MockRx { rx }
}

/// Wire a device link and its ECU together.
pub fn create_link(echo: bool) -> (MockTx, MockRx, Ecu) {
    let (device_tx, device_rx) = mpsc::unbounded_channel();
    let (ecu_tx, ecu_rx) = mpsc::unbounded_channel();
    let tx = MockTx {
        to_ecu: ecu_tx,
        to_device: device_tx.clone(),
        echo,
        refuse: false,
        settle: None,
    };
    let rx = MockRx { rx: device_rx };
    let ecu = Ecu {
        to_device: device_tx,
        from_device: ecu_rx,
    };
    (tx, rx, ecu)
}

/// Clock counting microseconds since its creation on tokio's timer.
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl LinkClock for TokioClock {
    fn now(&self) -> embassy_time::Instant {
        embassy_time::Instant::from_micros(self.origin.elapsed().as_micros() as u64)
    }

    async fn delay<'a>(&'a self, duration: embassy_time::Duration) {
        tokio::time::sleep(std::time::Duration::from_micros(duration.as_micros())).await;
    }
}
