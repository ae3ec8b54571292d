pub mod audio;
pub mod calibration;
pub mod codec;
pub mod crc;
pub mod driver;
pub mod event;
pub mod hid_report;
pub mod session;
#[cfg(test)]
pub mod session_test;
pub mod transport;
