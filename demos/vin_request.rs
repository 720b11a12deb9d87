//! # VIN request
//!
//! Reads the vehicle identification number (UDS `ReadDataByIdentifier`
//! 0xF190) from a simulated engine ECU over an in-memory CAN link:
//! - Connect an ISO 15765 channel and install a flow-control filter
//! - Write a single-frame request
//! - Read the first-frame indication, then the reassembled 20-byte response
//!
//! ```bash
//! cargo run --example vin_request
//! ```

use embassy_time::Duration;
use korri_isotp::config::DeviceConfig;
use korri_isotp::protocol::passthru::device::Device;
use korri_isotp::protocol::passthru::filter::FilterSpec;
use korri_isotp::protocol::passthru::{ConnectFlags, MessageKind, Protocol, TxMessage};
use korri_isotp::protocol::transport::can_frame::{CanFrame, Direction};
use korri_isotp::protocol::transport::can_id::CanId;
use korri_isotp::protocol::transport::isotp::segmenter::IsoTpSegmenter;
use korri_isotp::protocol::transport::isotp::{IsoTpAddress, TxFlags};
use korri_isotp::protocol::transport::traits::can_link::{LinkReceiver, LinkSender};
use korri_isotp::protocol::transport::traits::link_clock::LinkClock;
use tokio::sync::mpsc;

const TESTER: u16 = 0x7E0;
const ENGINE: u16 = 0x7E8;
const VIN: &[u8; 17] = b"WVWZZZ1KZAW000001";

// ======================================================================
// In-memory link
// ======================================================================
#[derive(Debug)]
struct Unplugged;

struct BusTx {
    to_ecu: mpsc::UnboundedSender<CanFrame>,
    echo: mpsc::UnboundedSender<CanFrame>,
}

impl LinkSender for BusTx {
    type Error = Unplugged;

    async fn send<'a>(&'a mut self, frame: &'a CanFrame) -> Result<(), Self::Error> {
        self.to_ecu
            .send(frame.clone().with_direction(Direction::Rx))
            .map_err(|_| Unplugged)?;
        self.echo
            .send(frame.clone().with_direction(Direction::TxEcho))
            .map_err(|_| Unplugged)
    }
}

struct BusRx(mpsc::UnboundedReceiver<CanFrame>);

impl LinkReceiver for BusRx {
    type Error = Unplugged;

    async fn recv(&mut self) -> Result<CanFrame, Self::Error> {
        self.0.recv().await.ok_or(Unplugged)
    }
}

struct TokioClock(tokio::time::Instant);

impl LinkClock for TokioClock {
    fn now(&self) -> embassy_time::Instant {
        embassy_time::Instant::from_micros(self.0.elapsed().as_micros() as u64)
    }

    async fn delay<'a>(&'a self, duration: Duration) {
        tokio::time::sleep(std::time::Duration::from_micros(duration.as_micros())).await;
    }
}

// ======================================================================
// Simulated engine ECU: answers 22 F1 90 with a segmented 62 F1 90 <VIN>
// ======================================================================
async fn engine_ecu(
    mut from_tester: mpsc::UnboundedReceiver<CanFrame>,
    to_tester: mpsc::UnboundedSender<CanFrame>,
) {
    let tester = CanId::standard(TESTER).unwrap();
    let engine = IsoTpAddress::normal(CanId::standard(ENGINE).unwrap());

    while let Some(request) = from_tester.recv().await {
        if request.id != tester || request.payload().get(..4) != Some(&[0x03, 0x22, 0xF1, 0x90]) {
            continue;
        }

        let mut response = vec![0x62, 0xF1, 0x90];
        response.extend_from_slice(VIN);
        let frames = IsoTpSegmenter::new(engine, &response)
            .with_flags(TxFlags::PADDED)
            .segment()
            .unwrap();

        let (first, rest) = frames.split_first().unwrap();
        to_tester.send(first.clone()).unwrap();
        // Wait for the tester's flow control before the consecutive frames.
        while let Some(frame) = from_tester.recv().await {
            if frame.payload().first().is_some_and(|pci| pci & 0xF0 == 0x30) {
                println!("   ECU   <- flow control {:02X?}", frame.payload());
                break;
            }
        }
        for frame in rest {
            to_tester.send(frame.clone()).unwrap();
        }
    }
}

#[tokio::main]
async fn main() {
    println!("=== korri-isotp VIN request ===\n");

    let (device_tx, device_rx) = mpsc::unbounded_channel();
    let (ecu_tx, ecu_rx) = mpsc::unbounded_channel();
    tokio::spawn(engine_ecu(ecu_rx, device_tx.clone()));

    let device = Device::new(
        DeviceConfig::default(),
        TokioClock(tokio::time::Instant::now()),
    );
    let link_tx = BusTx {
        to_ecu: ecu_tx,
        echo: device_tx,
    };
    let link_rx = BusRx(device_rx);

    // ======================================================================
    // 1. Channel and flow-control filter
    // ======================================================================
    println!("1. Connecting an ISO 15765 channel at 500 kbit/s");
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .expect("fresh device has free channels");
    device
        .start_filter(
            channel,
            FilterSpec::flow_control(
                IsoTpAddress::normal(CanId::standard(ENGINE).unwrap()),
                IsoTpAddress::normal(CanId::standard(TESTER).unwrap()),
                TxFlags::default(),
            ),
        )
        .expect("filter is valid");

    let session = async {
        // ==================================================================
        // 2. Request
        // ==================================================================
        println!("2. Writing ReadDataByIdentifier F190");
        let request = TxMessage::isotp(CanId::standard(TESTER).unwrap(), &[0x22, 0xF1, 0x90]);
        device
            .write(channel, &request, Duration::from_millis(500))
            .await
            .expect("request sent");

        // ==================================================================
        // 3. Response
        // ==================================================================
        println!("3. Reading the response");
        loop {
            let messages = device
                .read(channel, 4, Duration::from_secs(1))
                .await
                .expect("channel open");
            if messages.is_empty() {
                println!("   no response within 1 s");
                return;
            }
            for message in messages {
                match message.kind {
                    MessageKind::TxDone => println!("   request confirmed on the bus"),
                    MessageKind::FirstFrame { total_len } => {
                        println!("   response started: {} bytes announced", total_len)
                    }
                    MessageKind::Received => {
                        let vin = String::from_utf8_lossy(&message.data[3..]);
                        println!("   VIN: {}\n", vin);
                        return;
                    }
                    other => println!("   {:?}", other),
                }
            }
        }
    };

    tokio::select! {
        result = device.run(link_tx, link_rx) => println!("device stopped: {:?}", result),
        _ = session => {}
    }
    device.close();
    println!("=== done ===");
}
