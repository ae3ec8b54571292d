//! Audio payload framing for the large Bluetooth reports.
//!
//! Reports 0x11-0x19 can carry encoded audio instead of (or next to) the
//! controller state. Only the framing lives here; the payload is passed
//! through untouched.
use packed_struct::prelude::*;
use thiserror::Error;

use super::{
    codec::{check_crc, parse_bluetooth_flags, CodecError},
    crc,
    hid_report::{bt_report_size, PackedBluetoothFlags, BT_HEADER_SIZE, BT_POLL_INTERVAL_MS},
};

/// Possible errors when framing audio payloads
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("report `{0:#04x}` cannot carry audio")]
    NotAudioReport(u8),
    #[error("report carries controller state")]
    CarriesControllerState,
    #[error("audio payload of {len} bytes exceeds the {max} bytes available")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("unable to pack report header: {0:?}")]
    Packing(#[from] PackingError),
}

/// Number of payload bytes a report with the given id can carry
pub fn payload_capacity(report_id: u8) -> Option<usize> {
    bt_report_size(report_id).map(|size| size - BT_HEADER_SIZE - crc::CRC_SIZE)
}

/// Return the audio payload carried by an audio-only Bluetooth input report.
/// The CRC is verified before the payload is handed out.
pub fn deframe_audio(buf: &[u8]) -> Result<&[u8], AudioError> {
    let Some(&report_id) = buf.first() else {
        return Err(CodecError::TooShort {
            expected: 1,
            actual: 0,
        }
        .into());
    };
    let Some(size) = bt_report_size(report_id) else {
        return Err(AudioError::NotAudioReport(report_id));
    };
    if buf.len() < size {
        return Err(CodecError::TooShort {
            expected: size,
            actual: buf.len(),
        }
        .into());
    }
    let buf = &buf[..size];
    check_crc(crc::INPUT_PREFIX, buf)?;

    let flags = parse_bluetooth_flags(buf)?;
    if flags.enable_hid {
        return Err(AudioError::CarriesControllerState);
    }

    Ok(&buf[BT_HEADER_SIZE..size - crc::CRC_SIZE])
}

/// Build an audio-only Bluetooth output report. The payload is zero padded to
/// the size of the report and the CRC trailer is appended.
pub fn frame_audio(report_id: u8, payload: &[u8]) -> Result<Vec<u8>, AudioError> {
    let (Some(size), Some(max)) = (bt_report_size(report_id), payload_capacity(report_id)) else {
        return Err(AudioError::NotAudioReport(report_id));
    };
    if payload.len() > max {
        return Err(AudioError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let mut buf = vec![0u8; size];
    buf[0] = report_id;
    let flags = PackedBluetoothFlags {
        enable_hid: false,
        enable_crc: true,
        poll_interval: Integer::from_primitive(BT_POLL_INTERVAL_MS),
        enable_audio: true,
        ..Default::default()
    };
    flags.pack_to_slice(&mut buf[1..BT_HEADER_SIZE])?;
    buf[BT_HEADER_SIZE..BT_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    crc::write_trailer(crc::OUTPUT_PREFIX, &mut buf);

    log::trace!(
        "Framed {} audio bytes into report {report_id:#04x}",
        payload.len()
    );
    Ok(buf)
}
