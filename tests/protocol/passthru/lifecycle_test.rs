mod helpers {
    include!("../../helpers/mod.rs");
}

use embassy_time::Duration;
use helpers::{create_link, unplugged_receiver, TokioClock};
use korri_isotp::config::{ConfigParam, DeviceConfig};
use korri_isotp::error::{DeviceRunError, PassThruError};
use korri_isotp::protocol::passthru::device::Device;
use korri_isotp::protocol::passthru::filter::{FilterMask, FilterSpec};
use korri_isotp::protocol::passthru::{ConnectFlags, MessageKind, Protocol, TxMessage};
use korri_isotp::protocol::transport::can_id::CanId;
use korri_isotp::protocol::transport::isotp::{IsoTpAddress, TxFlags};

fn std_id(id: u16) -> CanId {
    CanId::standard(id).unwrap()
}

fn ecu_filter() -> FilterSpec {
    FilterSpec::flow_control(
        IsoTpAddress::normal(std_id(0x7E8)),
        IsoTpAddress::normal(std_id(0x7E0)),
        TxFlags::default(),
    )
}

#[tokio::test]
/// Closing stops both workers and fails every later call.
async fn close_stops_runners() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .unwrap();
    device.start_filter(channel, ecu_filter()).unwrap();

    let body = async {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        device.close();
        // Frames arriving after close are never handled.
        ecu.send(std_id(0x7E8), &[0x10, 0x20, 1, 2, 3, 4, 5, 6]);
        std::future::pending::<()>().await;
    };
    tokio::select! {
        result = device.run(tx, rx) => assert!(result.is_ok()),
        _ = body => unreachable!(),
    }

    ecu.expect_silence(50).await;
    assert_eq!(device.try_read(channel, 10), Err(PassThruError::DeviceClosed));
    assert_eq!(
        device
            .write(channel, &TxMessage::isotp(std_id(0x7E0), &[0x3E]), Duration::from_ticks(0))
            .await,
        Err(PassThruError::DeviceClosed)
    );
}

#[tokio::test]
/// A blocking read waiting on a channel is released by close.
async fn close_releases_blocked_read() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .unwrap();

    let read = device.read(channel, 1, Duration::from_secs(5));
    let close = async {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        device.close();
    };
    let (result, ()) = tokio::join!(read, close);
    assert_eq!(result, Err(PassThruError::DeviceClosed));
}

#[tokio::test]
/// An elapsed read timeout yields an empty batch.
async fn read_timeout_returns_empty() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .unwrap();
    let started = tokio::time::Instant::now();
    let messages = device
        .read(channel, 4, Duration::from_millis(40))
        .await
        .unwrap();
    assert!(messages.is_empty());
    assert!(started.elapsed() >= std::time::Duration::from_millis(35));
    assert!(device.read(channel, 0, Duration::from_secs(5)).await.unwrap().is_empty());
}

#[tokio::test]
/// The dispatcher stops with an error once the link receive half fails.
async fn receive_failure_ends_run() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, _, _ecu) = create_link(true);
    let result = device.run(tx, unplugged_receiver()).await;
    assert!(matches!(result, Err(DeviceRunError::Receive(_))));
}

#[tokio::test]
/// Removing the filter of a stalled send aborts it; disconnect frees the slot.
async fn stop_filter_and_disconnect() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .unwrap();
    let filter = device.start_filter(channel, ecu_filter()).unwrap();

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            let request = TxMessage::isotp(std_id(0x7E0), &[0x31; 20]);
            let write = device.write(channel, &request, Duration::from_secs(2));
            let teardown = async {
                assert_eq!(ecu.recv().await.payload()[0], 0x10);
                device.stop_filter(channel, filter).unwrap();
            };
            let (written, ()) = tokio::join!(write, teardown);
            assert_eq!(written, Ok(()));

            ecu.send(std_id(0x7E8), &[0x30, 0x00, 0x00]);
            ecu.expect_silence(50).await;
            assert!(device.try_read(channel, 10).unwrap().is_empty());

            device.disconnect(channel).unwrap();
            assert_eq!(
                device.get_config(channel, ConfigParam::DataRate),
                Err(PassThruError::InvalidChannelId)
            );
            assert_eq!(device.disconnect(channel), Err(PassThruError::InvalidChannelId));
        } => {}
    }
}

#[tokio::test]
/// Raw CAN channels deliver frames selected by a pass filter and not blocked.
async fn raw_can_pass_and_block() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, mut ecu) = create_link(true);
    let channel = device
        .connect(Protocol::Can, ConnectFlags::default(), 500_000)
        .unwrap();
    let wide = FilterMask {
        id: 0x700,
        ext_addr: 0,
    };
    device
        .start_filter(channel, FilterSpec::pass(wide, IsoTpAddress::normal(std_id(0x700))))
        .unwrap();
    device
        .start_filter(
            channel,
            FilterSpec::block(FilterMask::EXACT, IsoTpAddress::normal(std_id(0x7DF))),
        )
        .unwrap();

    tokio::select! {
        result = device.run(tx, rx) => panic!("device stopped: {:?}", result),
        _ = async {
            ecu.send(std_id(0x7DF), &[0x02, 0x01, 0x00]);
            ecu.send(std_id(0x600), &[0x01]);
            ecu.send(std_id(0x7E8), &[0x10, 0x14, 0x49, 0x02, 0x01, 0x31, 0x44, 0x34]);

            let messages = device.read(channel, 10, Duration::from_secs(1)).await.unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].kind, MessageKind::Received);
            assert_eq!(messages[0].id(), std_id(0x7E8));
            assert_eq!(messages[0].data.len(), 8);

            // Raw writes go out as-is and complete on their echo.
            device
                .write(channel, &TxMessage::can(std_id(0x7DF), &[0x02, 0x3E, 0x80]), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(ecu.recv().await.payload(), &[0x02, 0x3E, 0x80]);
            // No flow control is ever sent on a raw channel.
            ecu.expect_silence(50).await;
        } => {}
    }
}

#[tokio::test]
/// A frame the link refuses is dropped without a completion notice.
async fn refused_frame_is_dropped() {
    let device = Device::new(DeviceConfig::default(), TokioClock::new());
    let (tx, rx, _ecu) = create_link(true);
    let channel = device
        .connect(Protocol::Iso15765, ConnectFlags::default(), 500_000)
        .unwrap();

    tokio::select! {
        result = device.run(tx.refusing(), rx) => panic!("device stopped: {:?}", result),
        _ = async {
            let written = device
                .write(channel, &TxMessage::isotp(std_id(0x7DF), &[0x01, 0x00]), Duration::from_secs(1))
                .await;
            assert_eq!(written, Ok(()));
            assert!(device.read(channel, 10, Duration::from_millis(50)).await.unwrap().is_empty());
        } => {}
    }
}
