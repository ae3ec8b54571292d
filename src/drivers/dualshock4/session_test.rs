use std::{
    error::Error,
    time::{Duration, Instant},
};

use crate::{
    config::SessionConfig,
    drivers::dualshock4::{
        calibration::{AxisOrdering, CalibrationError},
        codec::{CodecError, InputReport, OutputRequest, Transport},
        codec_test::{full_report, seal},
        crc,
        session::{ConnectionSession, FeatureRequest, ReportingMode, SessionError, Transaction},
    },
};

fn session(transport: Transport) -> ConnectionSession {
    ConnectionSession::new("test", transport, &SessionConfig::new(AxisOrdering::Grouped))
}

/// Calibration report whose accelerometer X axis scales raw values by 2
fn calibration_report(transport: Transport) -> Vec<u8> {
    let (report_id, size) = match transport {
        Transport::Usb => (0x02, 37),
        Transport::Bluetooth => (0x05, 41),
    };
    let mut buf = vec![0u8; size];
    buf[0] = report_id;
    let gyro: [i16; 6] = [8640, 8640, 8640, -8640, -8640, -8640];
    for (i, value) in gyro.iter().enumerate() {
        buf[7 + i * 2..9 + i * 2].copy_from_slice(&value.to_le_bytes());
    }
    buf[19..21].copy_from_slice(&540i16.to_le_bytes());
    buf[21..23].copy_from_slice(&540i16.to_le_bytes());
    let accel: [i16; 6] = [4096, -4096, 8192, -8192, 8192, -8192];
    for (i, value) in accel.iter().enumerate() {
        buf[23 + i * 2..25 + i * 2].copy_from_slice(&value.to_le_bytes());
    }
    if transport == Transport::Bluetooth {
        crc::write_trailer(crc::FEATURE_GET_PREFIX, &mut buf);
    }
    buf
}

/// Full report with the accelerometer X axis set to the given raw value
fn report_with_accel_x(transport: Transport, accel_x: i16) -> Vec<u8> {
    let mut buf = full_report(transport);
    let offset = match transport {
        Transport::Usb => 1,
        Transport::Bluetooth => 3,
    };
    buf[offset + 18..offset + 20].copy_from_slice(&accel_x.to_le_bytes());
    seal(&mut buf, transport);
    buf
}

fn corrupted_report() -> Vec<u8> {
    let mut buf = full_report(Transport::Bluetooth);
    buf[20] ^= 0x10;
    buf
}

#[test]
fn test_calibration_requested_once() {
    let mut session = session(Transport::Bluetooth);
    assert_eq!(session.mode(), ReportingMode::AwaitingCalibration);
    assert_eq!(
        session.request_calibration(),
        Some(FeatureRequest {
            report_id: 0x05,
            length: 41
        })
    );
    assert_eq!(session.request_calibration(), None);

    let mut usb = self::session(Transport::Usb);
    assert_eq!(
        usb.request_calibration(),
        Some(FeatureRequest {
            report_id: 0x02,
            length: 37
        })
    );
}

#[test]
fn test_bluetooth_mode_switch() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Bluetooth);

    let reduced = [0x01, 0x80, 0x80, 0x80, 0x80, 0x08, 0x00, 0x00, 0x00, 0x00];
    let report = session.handle_input(&reduced)?;
    assert!(matches!(report, InputReport::Reduced(_)));
    assert_eq!(session.mode(), ReportingMode::AwaitingCalibration);

    session.request_calibration();
    session.apply_calibration(&calibration_report(Transport::Bluetooth))?;
    // Calibration is only active after the switch
    assert_eq!(session.mode(), ReportingMode::AwaitingCalibration);

    let report = session.handle_input(&report_with_accel_x(Transport::Bluetooth, 4096))?;
    assert_eq!(session.mode(), ReportingMode::FullReporting);
    let InputReport::Full(state) = report else {
        panic!("expected full report");
    };
    assert_eq!(state.motion.accel_x, 1.0);

    let trace: Vec<&Transaction> = session.history().collect();
    assert_eq!(trace.len(), 3);
    assert_eq!(trace[0], &Transaction::CalibrationRequested { report_id: 0x05 });
    assert!(matches!(trace[1], Transaction::CalibrationApplied { .. }));
    assert_eq!(trace[2], &Transaction::ModeSwitched { report_id: 0x11 });

    // Reduced reports no longer change the mode
    session.handle_input(&reduced)?;
    assert_eq!(session.mode(), ReportingMode::FullReporting);
    assert_eq!(session.request_calibration(), None);

    Ok(())
}

#[test]
fn test_unsolicited_full_report() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Usb);

    let report = session.handle_input(&report_with_accel_x(Transport::Usb, 4096))?;
    let InputReport::Full(state) = report else {
        panic!("expected full report");
    };
    // Identity calibration
    assert_eq!(state.motion.accel_x, 0.5);
    assert_eq!(session.mode(), ReportingMode::AwaitingCalibration);
    assert_eq!(session.history().count(), 0);

    session.request_calibration();
    session.apply_calibration(&calibration_report(Transport::Usb))?;
    session.handle_input(&full_report(Transport::Usb))?;
    assert_eq!(session.mode(), ReportingMode::FullReporting);

    Ok(())
}

#[test]
fn test_rejected_calibration() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Bluetooth);
    session.request_calibration();

    let mut bad_crc = calibration_report(Transport::Bluetooth);
    bad_crc[8] ^= 0x01;
    let result = session.apply_calibration(&bad_crc);
    assert!(matches!(
        result,
        Err(SessionError::Calibration(CalibrationError::CrcMismatch))
    ));

    let result = session.apply_calibration(&calibration_report(Transport::Usb));
    assert!(matches!(
        result,
        Err(SessionError::Calibration(
            CalibrationError::UnexpectedReportId(0x02)
        ))
    ));

    // The switch still happens, with identity calibration
    let report = session.handle_input(&report_with_accel_x(Transport::Bluetooth, 4096))?;
    assert_eq!(session.mode(), ReportingMode::FullReporting);
    let InputReport::Full(state) = report else {
        panic!("expected full report");
    };
    assert_eq!(state.motion.accel_x, 0.5);

    Ok(())
}

#[test]
fn test_crc_failure_threshold() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Bluetooth);
    let bad = corrupted_report();

    for i in 1..=9 {
        let err = session.handle_input(&bad).err().ok_or("expected error")?;
        assert!(matches!(
            err,
            SessionError::Codec(CodecError::CrcMismatch { .. })
        ));
        assert!(!err.is_fatal());
        assert_eq!(session.crc_failure_count(), i);
        assert!(!session.disconnect_requested());
    }

    let err = session.handle_input(&bad).err().ok_or("expected error")?;
    assert!(matches!(
        err,
        SessionError::CrcThresholdExceeded { count: 10 }
    ));
    assert!(err.is_fatal());
    assert!(session.disconnect_requested());
    assert_eq!(
        session.history().last(),
        Some(&Transaction::DisconnectRequested)
    );

    Ok(())
}

#[test]
fn test_crc_failure_count_resets() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Bluetooth);
    let bad = corrupted_report();
    let good = full_report(Transport::Bluetooth);

    for _ in 0..9 {
        assert!(session.handle_input(&bad).is_err());
    }
    session.handle_input(&good)?;
    assert_eq!(session.crc_failure_count(), 0);

    for _ in 0..9 {
        let err = session.handle_input(&bad).err().ok_or("expected error")?;
        assert!(!err.is_fatal());
    }
    assert!(!session.disconnect_requested());

    Ok(())
}

#[test]
fn test_reduced_report_keeps_crc_failure_count() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Bluetooth);
    let bad = corrupted_report();
    let reduced = [0x01, 0x80, 0x80, 0x80, 0x80, 0x08, 0x00, 0x00, 0x00, 0x00];

    for _ in 0..9 {
        assert!(session.handle_input(&bad).is_err());
    }
    // Reduced reports carry no CRC, so they do not end the run of mismatches
    session.handle_input(&reduced)?;
    assert_eq!(session.crc_failure_count(), 9);

    let err = session.handle_input(&bad).err().ok_or("expected error")?;
    assert!(matches!(
        err,
        SessionError::CrcThresholdExceeded { count: 10 }
    ));
    assert!(session.disconnect_requested());

    Ok(())
}

#[test]
fn test_malformed_reports_are_not_fatal() {
    let mut session = session(Transport::Usb);
    let err = session.handle_input(&[0x01, 0x02]).err();
    assert!(matches!(
        err,
        Some(SessionError::Codec(CodecError::TooShort { .. }))
    ));
    assert!(!err.is_some_and(|e| e.is_fatal()));
    assert_eq!(session.crc_failure_count(), 0);
}

#[test]
fn test_keep_alive_timing() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Usb);
    let start = Instant::now();
    assert!(!session.keep_alive_due(start));
    assert_eq!(session.keep_alive(start)?, None);

    session.request_calibration();
    session.apply_calibration(&calibration_report(Transport::Usb))?;
    session.handle_input(&full_report(Transport::Usb))?;

    // Nothing sent yet
    assert!(session.keep_alive_due(start));

    let request = OutputRequest::lightbar(0, 0, 64);
    let sent = session.build_output(&request, start)?;
    assert!(!session.keep_alive_due(start + Duration::from_millis(3999)));
    assert!(session.keep_alive_due(start + Duration::from_secs(4)));

    let keep_alive = session
        .keep_alive(start + Duration::from_secs(4))?
        .ok_or("expected keep-alive")?;
    assert_eq!(keep_alive, sent);
    assert!(!session.keep_alive_due(start + Duration::from_secs(5)));
    assert_eq!(
        session.history().last(),
        Some(&Transaction::KeepAliveSent { len: 32 })
    );

    Ok(())
}

#[test]
fn test_history_is_bounded() -> Result<(), Box<dyn Error>> {
    let mut config = SessionConfig::new(AxisOrdering::Paired);
    config.history_size = 2;
    let mut session = ConnectionSession::new("bounded", Transport::Usb, &config);
    let now = Instant::now();
    for _ in 0..5 {
        session.build_output(&OutputRequest::rumble(1, 2), now)?;
    }
    assert_eq!(session.history().count(), 2);
    assert_eq!(session.last_output(), &OutputRequest::rumble(1, 2));

    Ok(())
}

#[test]
fn test_snapshot_and_disconnect() -> Result<(), Box<dyn Error>> {
    let mut session = session(Transport::Usb);
    let mut buf = full_report(Transport::Usb);
    buf[30] = 0x05;
    session.handle_input(&buf)?;
    session.handle_input(&buf)?;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.id, "test");
    assert_eq!(snapshot.transport, Transport::Usb);
    assert_eq!(snapshot.mode, ReportingMode::AwaitingCalibration);
    assert_eq!(snapshot.reports_received, 2);
    assert_eq!(snapshot.power.map(|p| p.level), Some(5));

    let last = session.disconnect();
    assert_eq!(last, snapshot);

    Ok(())
}
