mod common;

use std::{error::Error, time::Duration};

use ds4link::{
    config::SessionConfig,
    drivers::dualshock4::{
        calibration::AxisOrdering,
        codec::{parse_output, OutputRequest, Transport},
        crc,
        driver::DriverError,
        event::{BinaryInput, ButtonEvent, Event},
        session::{ReportingMode, SessionError},
        transport::TransportError,
    },
    input::manager::{Manager, ManagerError},
};
use tokio::sync::mpsc;

use common::{calibration_report, full_report, reduced_report, wait_for, MockTransport};

fn config() -> SessionConfig {
    SessionConfig::new(AxisOrdering::Grouped)
}

#[tokio::test]
async fn test_bluetooth_controller_lifecycle() -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config());
    let (reader, writer, device) =
        MockTransport::pair(Some(calibration_report(Transport::Bluetooth)));
    let (events_tx, mut events_rx) = mpsc::channel(64);
    manager.attach("bt0", Transport::Bluetooth, reader, writer, Some(events_tx))?;

    // The calibration read is issued before any report is read
    assert!(wait_for(|| !device.feature_requests.lock().unwrap().is_empty()).await);
    assert_eq!(*device.feature_requests.lock().unwrap(), vec![(0x05, 41)]);

    device.send(reduced_report());
    device.send(full_report(Transport::Bluetooth, |_, _| ()));
    assert!(
        wait_for(|| {
            manager
                .snapshot("bt0")
                .is_some_and(|s| s.mode == ReportingMode::FullReporting)
        })
        .await
    );

    // Press cross
    device.send(full_report(Transport::Bluetooth, |buf, offset| {
        buf[offset + 4] = 0x20 | 0x08;
    }));
    let event = events_rx.recv().await.ok_or("no event")?;
    assert_eq!(
        event,
        Event::Button(ButtonEvent::Cross(BinaryInput { pressed: true }))
    );

    manager.set_output("bt0", OutputRequest::lightbar(0, 0, 255))?;
    assert!(
        wait_for(|| {
            device.writes().iter().any(|w| {
                parse_output(w, Transport::Bluetooth).is_ok_and(|r| r.led_blue == 255)
            })
        })
        .await
    );
    for write in device.writes() {
        assert_eq!(write.len(), 78);
        assert!(crc::verify(crc::OUTPUT_PREFIX, &write));
    }

    let snapshot = manager.detach("bt0").await?;
    assert_eq!(snapshot.id, "bt0");
    assert_eq!(snapshot.mode, ReportingMode::FullReporting);
    assert_eq!(snapshot.reports_received, 3);
    assert!(manager.devices().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_crc_failures_stop_the_driver() -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config());
    let (reader, writer, device) = MockTransport::pair(None);
    manager.attach("bt1", Transport::Bluetooth, reader, writer, None)?;

    for _ in 0..10 {
        let mut report = full_report(Transport::Bluetooth, |_, _| ());
        report[30] ^= 0xFF;
        device.send(report);
    }

    assert!(wait_for(|| manager.snapshot("bt1").is_some_and(|s| s.disconnect_requested)).await);
    let mut reaped = Vec::new();
    for _ in 0..400 {
        reaped = manager.reap().await;
        if !reaped.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(reaped.len(), 1);
    let (id, result) = reaped.remove(0);
    assert_eq!(id, "bt1");
    assert!(matches!(
        result,
        Err(DriverError::Session(SessionError::CrcThresholdExceeded {
            count: 10
        }))
    ));

    Ok(())
}

#[tokio::test]
async fn test_reconnect_creates_new_session() -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config());
    let (reader, writer, device) = MockTransport::pair(Some(calibration_report(Transport::Usb)));
    manager.attach("usb0", Transport::Usb, reader, writer, None)?;

    device.send(full_report(Transport::Usb, |_, _| ()));
    assert!(
        wait_for(|| {
            manager
                .snapshot("usb0")
                .is_some_and(|s| s.mode == ReportingMode::FullReporting)
        })
        .await
    );

    // A second attach while the device is running is refused
    let (reader, writer, _second) = MockTransport::pair(None);
    let result = manager.attach("usb0", Transport::Usb, reader, writer, None);
    assert!(matches!(result, Err(ManagerError::AlreadyAttached(_))));

    // Unplug
    drop(device);
    let mut reaped = Vec::new();
    for _ in 0..400 {
        reaped = manager.reap().await;
        if !reaped.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(reaped.len(), 1);
    assert!(matches!(
        reaped[0].1,
        Err(DriverError::Transport(TransportError::Disconnected))
    ));

    // Plug back in
    let (reader, writer, device) = MockTransport::pair(Some(calibration_report(Transport::Usb)));
    manager.attach("usb0", Transport::Usb, reader, writer, None)?;
    let snapshot = manager.snapshot("usb0").ok_or("missing snapshot")?;
    assert_eq!(snapshot.mode, ReportingMode::AwaitingCalibration);
    assert_eq!(snapshot.reports_received, 0);
    assert_eq!(snapshot.crc_failure_count, 0);

    manager.detach("usb0").await?;
    drop(device);

    Ok(())
}

#[tokio::test]
async fn test_keep_alive_writes() -> Result<(), Box<dyn Error>> {
    let mut config = config();
    config.keep_alive_interval_ms = 40;
    let mut manager = Manager::new(config);
    let (reader, writer, device) = MockTransport::pair(Some(calibration_report(Transport::Usb)));
    manager.attach("usb1", Transport::Usb, reader, writer, None)?;

    // Nothing is written while waiting for calibration
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(device.writes().is_empty());

    device.send(full_report(Transport::Usb, |_, _| ()));
    assert!(wait_for(|| device.writes().len() >= 3).await);
    for write in device.writes() {
        assert_eq!(write.len(), 32);
        assert_eq!(write[0], 0x05);
    }

    manager.detach("usb1").await?;

    Ok(())
}

#[tokio::test]
async fn test_latest_output_wins() -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config());
    let (reader, writer, device) = MockTransport::pair(None);
    manager.attach("usb2", Transport::Usb, reader, writer, None)?;

    for i in 0..=100u8 {
        manager.set_output("usb2", OutputRequest::rumble(i, 0))?;
    }
    assert!(
        wait_for(|| {
            device
                .writes()
                .last()
                .and_then(|w| parse_output(w, Transport::Usb).ok())
                .is_some_and(|r| r.rumble_strong == 100)
        })
        .await
    );
    // Older requests may have been skipped but never written after newer ones
    let strengths: Vec<u8> = device
        .writes()
        .iter()
        .filter_map(|w| parse_output(w, Transport::Usb).ok())
        .map(|r| r.rumble_strong)
        .collect();
    assert!(strengths.windows(2).all(|w| w[0] <= w[1]));

    let result = manager.set_output("missing", OutputRequest::default());
    assert!(matches!(result, Err(ManagerError::NotFound(_))));

    manager.detach("usb2").await?;

    Ok(())
}

#[tokio::test]
async fn test_snapshots_cover_all_devices() -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config());
    let (reader, writer, usb) = MockTransport::pair(Some(calibration_report(Transport::Usb)));
    manager.attach("usb3", Transport::Usb, reader, writer, None)?;
    let (reader, writer, bt) =
        MockTransport::pair(Some(calibration_report(Transport::Bluetooth)));
    manager.attach("bt2", Transport::Bluetooth, reader, writer, None)?;

    usb.send(full_report(Transport::Usb, |_, _| ()));
    bt.send(reduced_report());
    assert!(
        wait_for(|| {
            let snapshots = manager.snapshots();
            snapshots[0].reports_received == 1 && snapshots[1].reports_received == 1
        })
        .await
    );

    // Each device reports its own session, ordered by id
    let snapshots = manager.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].id, "bt2");
    assert_eq!(snapshots[0].transport, Transport::Bluetooth);
    assert_eq!(snapshots[0].mode, ReportingMode::AwaitingCalibration);
    assert_eq!(snapshots[1].id, "usb3");
    assert_eq!(snapshots[1].transport, Transport::Usb);
    assert_eq!(snapshots[1].mode, ReportingMode::FullReporting);
    assert_eq!(manager.devices(), vec!["bt2".to_string(), "usb3".to_string()]);

    manager.detach("bt2").await?;
    manager.detach("usb3").await?;
    assert!(manager.snapshots().is_empty());

    Ok(())
}
