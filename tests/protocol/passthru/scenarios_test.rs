mod helpers {
    include!("../../helpers/mod.rs");
}

use embassy_time::Duration;
use helpers::{create_link, TokioClock};
use korri_isotp::config::DeviceConfig;
use korri_isotp::protocol::passthru::device::Device;
use korri_isotp::protocol::passthru::filter::FilterSpec;
use korri_isotp::protocol::passthru::{ChannelId, ConnectFlags, MessageKind, Protocol, TxMessage};
use korri_isotp::protocol::transport::can_id::CanId;
use korri_isotp::protocol::transport::isotp::pci::Pci;
use korri_isotp::protocol::transport::isotp::reassembler::{ProcessResult, Reassembler};
use korri_isotp::protocol::transport::isotp::{frame_body, IsoTpAddress, TxFlags};

const TESTER: u16 = 0x7E0;
const ECU: u16 = 0x7E8;

fn std_id(id: u16) -> CanId {
    CanId::standard(id).unwrap()
}

fn open_channel(device: &Device<TokioClock>) -> ChannelId {
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .expect("free channel slot");
    device
        .start_filter(
            channel,
            FilterSpec::flow_control(
                IsoTpAddress::normal(std_id(ECU)),
                IsoTpAddress::normal(std_id(TESTER)),
                TxFlags::default(),
            ),
        )
        .expect("filter accepted");
    channel
}

#[tokio::test]
/// Scenario A: 19 bytes go out as FF, then two CFs once flow control arrives.
async fn multi_frame_write_waits_for_flow_control() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = open_channel(&device);
    let payload: Vec<u8> = (1..=19).collect();

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            device
                .write(channel, &TxMessage::isotp(std_id(TESTER), &payload), Duration::from_ticks(0))
                .await
                .expect("write accepted");

            let first = ecu.recv().await;
            assert_eq!(first.id, std_id(TESTER));
            assert_eq!(first.payload(), &[0x10, 0x13, 1, 2, 3, 4, 5, 6]);
            ecu.expect_silence(50).await;

            ecu.send(std_id(ECU), &[0x30, 0x00, 0x00]);
            assert_eq!(ecu.recv().await.payload(), &[0x21, 7, 8, 9, 10, 11, 12, 13]);
            assert_eq!(ecu.recv().await.payload(), &[0x22, 14, 15, 16, 17, 18, 19]);

            let messages = device
                .read(channel, 10, Duration::from_secs(1))
                .await
                .expect("channel open");
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].kind, MessageKind::TxDone);
            assert_eq!(messages[0].id(), std_id(TESTER));
        } => {}
    }
}

#[tokio::test]
/// Scenario B: five bytes fit one frame and complete on its echo.
async fn single_frame_write_completes_on_echo() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = open_channel(&device);

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            device
                .write(
                    channel,
                    &TxMessage::isotp(std_id(TESTER), &[0x22, 0xF1, 0x90, 0x00, 0x01]),
                    Duration::from_secs(1),
                )
                .await
                .expect("write completes within the timeout");

            assert_eq!(ecu.recv().await.payload(), &[0x05, 0x22, 0xF1, 0x90, 0x00, 0x01]);
            let messages = device
                .read(channel, 10, Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_transmit());
            ecu.expect_silence(50).await;
        } => {}
    }
}

#[tokio::test]
/// Scenario C: a single frame arriving before any consecutive frame replaces
/// the started transfer; late frames of the old one are dropped.
async fn single_frame_preempts_transfer() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = open_channel(&device);

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            ecu.send(std_id(ECU), &[0x10, 0x13, 0x62, 0xF1, 0x90, 0x57, 0x30, 0x4C]);
            let reply = ecu.recv().await;
            assert_eq!(reply.id, std_id(TESTER));
            assert_eq!(reply.payload(), &[0x30, 0x00, 0x00]);

            ecu.send(std_id(ECU), &[0x06, 0x62, 0xF1, 0x8C, 0x41, 0x42, 0x43]);
            ecu.send(std_id(ECU), &[0x21, 0x30, 0x30, 0x30, 0x5A, 0x5A, 0x5A, 0x33]);

            let messages = device
                .read(channel, 10, Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(messages[0].kind, MessageKind::FirstFrame { total_len: 19 });
            let mut received = messages;
            if received.len() == 1 {
                received.extend(device.read(channel, 10, Duration::from_secs(1)).await.unwrap());
            }
            assert_eq!(received.len(), 2);
            assert_eq!(received[1].kind, MessageKind::Received);
            assert_eq!(received[1].data, [0x62, 0xF1, 0x8C, 0x41, 0x42, 0x43]);

            let late = device
                .read(channel, 10, Duration::from_millis(100))
                .await
                .unwrap();
            assert!(late.is_empty());
        } => {}
    }
}

#[tokio::test]
/// Scenario D: a short consecutive frame while bytes remain kills the
/// transfer; the frames that would have completed it change nothing.
async fn short_consecutive_frame_discards_transfer() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = open_channel(&device);

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            ecu.send(std_id(ECU), &[0x10, 0x13, 1, 2, 3, 4, 5, 6]);
            ecu.recv().await;
            ecu.send(std_id(ECU), &[0x21, 7, 8, 9]);
            ecu.send(std_id(ECU), &[0x21, 7, 8, 9, 10, 11, 12, 13]);
            ecu.send(std_id(ECU), &[0x22, 14, 15, 16, 17, 18, 19]);

            let messages = device
                .read(channel, 10, Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_first_frame());

            let rest = device
                .read(channel, 10, Duration::from_millis(150))
                .await
                .unwrap();
            assert!(rest.is_empty(), "no partial or late message: {:?}", rest);
        } => {}
    }
}

#[tokio::test]
/// A maximum-size response is reassembled whole for every addressing mode.
async fn long_response_reassembled_in_all_addressing_modes() {
    let tester_ext = CanId::extended(0x18DA_10F1).unwrap();
    let ecu_ext = CanId::extended(0x18DA_F110).unwrap();
    let pairs = [
        (IsoTpAddress::normal(std_id(ECU)), IsoTpAddress::normal(std_id(TESTER))),
        (
            IsoTpAddress::extended(std_id(0x6F1), 0xF1),
            IsoTpAddress::extended(std_id(0x6F1), 0x10),
        ),
        (IsoTpAddress::normal(ecu_ext), IsoTpAddress::normal(tester_ext)),
        (
            IsoTpAddress::extended(ecu_ext, 0xF1),
            IsoTpAddress::extended(tester_ext, 0x10),
        ),
    ];

    for (ecu_address, tester_address) in pairs {
        let device = Device::new(DeviceConfig::default(), TokioClock::new());
        let (tx, rx, mut ecu) = create_link(true);
        let flags = ConnectFlags {
            ids: korri_isotp::protocol::passthru::IdAcceptance::Both,
        };
        let channel = device
            .connect(Protocol::Iso15765, flags, 500_000)
            .unwrap();
        device
            .start_filter(
                channel,
                FilterSpec::flow_control(ecu_address, tester_address, TxFlags::PADDED),
            )
            .unwrap();

        let payload: Vec<u8> = (0..4095u32).map(|i| (i % 251) as u8).collect();
        let frames = korri_isotp::protocol::transport::isotp::segmenter::IsoTpSegmenter::new(
            ecu_address,
            &payload,
        )
        .with_flags(TxFlags::PADDED)
        .segment()
        .unwrap();

        tokio::select! {
            result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
            _ = async {
                let (first, rest) = frames.split_first().unwrap();
                ecu.send(first.id, first.payload());
                let reply = ecu.recv().await;
                assert_eq!(reply.id, tester_address.id);
                let prefix = tester_address.prefix_len();
                assert_eq!(reply.payload().len(), 8, "padded per filter flags");
                assert_eq!(&reply.payload()[prefix..prefix + 3], &[0x30, 0x00, 0x00]);
                if let Some(ext) = tester_address.ext_addr {
                    assert_eq!(reply.payload()[0], ext);
                }
                for frame in rest {
                    ecu.send(frame.id, frame.payload());
                }

                let mut messages = Vec::new();
                while messages.len() < 2 {
                    let batch = device
                        .read(channel, 10, Duration::from_secs(2))
                        .await
                        .unwrap();
                    assert!(!batch.is_empty(), "transfer never completed");
                    messages.extend(batch);
                }
                assert_eq!(messages[0].kind, MessageKind::FirstFrame { total_len: 4095 });
                assert_eq!(messages[1].kind, MessageKind::Received);
                assert_eq!(messages[1].address, ecu_address);
                assert_eq!(messages[1].data, payload);
            } => {}
        }
    }
}

#[tokio::test]
/// Unpadded writes of every frame shape arrive whole at the peer.
async fn written_payloads_reassemble_at_peer() {
    for len in [1usize, 7, 8, 62] {
        let device = Device::new(DeviceConfig::default(), TokioClock::new());
        let (tx, rx, mut ecu) = create_link(true);
        let channel = open_channel(&device);
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let request = TxMessage::isotp(std_id(TESTER), &payload);

        tokio::select! {
            result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
            _ = async {
                device
                    .write(channel, &request, Duration::from_ticks(0))
                    .await
                    .expect("write accepted");

                let mut peer = Reassembler::new();
                let mut wire_bytes = 0;
                let received = loop {
                    let frame = ecu.recv().await;
                    assert_eq!(frame.id, std_id(TESTER));
                    wire_bytes += frame.payload().len();
                    let body = frame_body(&frame, 0).expect("frame carries a PCI");
                    let pci = Pci::decode(body).expect("valid PCI");
                    match peer.process(pci, body, 0, frame.timestamp) {
                        ProcessResult::Started { total_len } => {
                            assert_eq!(total_len as usize, len);
                            ecu.send(std_id(ECU), &[0x30, 0x00, 0x00]);
                        }
                        ProcessResult::FragmentConsumed => {}
                        ProcessResult::MessageComplete(message) => break message.payload,
                        other => panic!("length {}: unexpected {:?}", len, other),
                    }
                };
                assert_eq!(received, payload, "length {}", len);

                // Unpadded: one PCI byte per frame, two for the first frame.
                let frames = if len <= 7 { 1 } else { 1 + (len - 6).div_ceil(7) };
                let pci_bytes = if len <= 7 { 1 } else { frames + 1 };
                assert_eq!(wire_bytes, len + pci_bytes, "length {}", len);

                let messages = device
                    .read(channel, 10, Duration::from_secs(1))
                    .await
                    .expect("channel open");
                assert_eq!(messages.len(), 1, "length {}", len);
                assert_eq!(messages[0].kind, MessageKind::TxDone);
                ecu.expect_silence(30).await;
            } => {}
        }
    }
}
