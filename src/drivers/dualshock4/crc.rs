//! CRC-32 used on Bluetooth reports.
//!
//! The checksum covers a virtual transaction byte that is never sent over the
//! air, followed by every report byte up to (but excluding) the 4-byte CRC
//! trailer. The trailer itself is stored little-endian.
use crc32fast::Hasher;

/// Prefix for device-to-host input reports
pub const INPUT_PREFIX: u8 = 0xA1;
/// Prefix for host-to-device output reports
pub const OUTPUT_PREFIX: u8 = 0xA2;
/// Prefix for feature reports read from the device
pub const FEATURE_GET_PREFIX: u8 = 0xA3;

/// Size of the CRC trailer at the end of a Bluetooth report
pub const CRC_SIZE: usize = 4;

/// Compute the CRC over the given prefix byte followed by the given bytes.
pub fn compute(prefix: u8, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[prefix]);
    hasher.update(bytes);
    hasher.finalize()
}

/// Returns the CRC stored in the last 4 bytes of the report, if the report is
/// large enough to carry one.
pub fn stored(report: &[u8]) -> Option<u32> {
    if report.len() < CRC_SIZE {
        return None;
    }
    let (_, trailer) = report.split_at(report.len() - CRC_SIZE);
    let trailer: [u8; CRC_SIZE] = trailer.try_into().ok()?;
    Some(u32::from_le_bytes(trailer))
}

/// Verify the trailing CRC of the given report. The report must include the
/// 4-byte trailer.
pub fn verify(prefix: u8, report: &[u8]) -> bool {
    let Some(expected) = stored(report) else {
        return false;
    };
    let body = &report[..report.len() - CRC_SIZE];
    compute(prefix, body) == expected
}

/// Compute the CRC over the report body and write it into the last 4 bytes of
/// the report. Reports too small to hold a trailer are left untouched.
pub fn write_trailer(prefix: u8, report: &mut [u8]) {
    if report.len() < CRC_SIZE {
        return;
    }
    let body_len = report.len() - CRC_SIZE;
    let crc = compute(prefix, &report[..body_len]);
    report[body_len..].copy_from_slice(&crc.to_le_bytes());
}
