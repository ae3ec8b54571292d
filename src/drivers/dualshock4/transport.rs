//! Byte transport to a physical controller.
//!
//! The protocol engine only needs to read input reports, write output reports
//! and read feature reports. [HidTransport] is that boundary; [HidApiTransport]
//! implements it on top of `hidapi`.
use std::ffi::CString;

use hidapi::{BusType, DeviceInfo, HidApi, HidDevice};
use thiserror::Error;

use super::{
    codec::Transport,
    hid_report::{DS4_VID, PIDS},
};

/// Time a single read waits for a report before giving control back
pub const READ_TIMEOUT_MS: i32 = 500;

/// Possible errors from a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HID error: {0}")]
    HidApi(#[from] hidapi::HidError),
    #[error("invalid device path: {0}")]
    InvalidPath(#[from] std::ffi::NulError),
    #[error("device '{path}' is not a DualShock 4: {vid:04x}:{pid:04x}")]
    UnsupportedDevice { path: String, vid: u16, pid: u16 },
    #[error("no report within the read timeout")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("transport closed")]
    Closed,
}

/// Blocking byte transport to a single device
pub trait HidTransport: Send {
    /// Read one input report into the given buffer, returning its length. A
    /// zero-length read means the device is gone.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    /// Write one output report
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
    /// Read the feature report with the given id. The returned bytes start
    /// with the report id.
    fn read_feature(&mut self, report_id: u8, length: usize) -> Result<Vec<u8>, TransportError>;
}

/// Transport backed by a hidraw device opened through `hidapi`
pub struct HidApiTransport {
    device: HidDevice,
    transport: Transport,
}

impl HidApiTransport {
    /// Open the DualShock 4 at the given hidraw path
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let c_path = CString::new(path)?;
        let api = HidApi::new()?;
        let device = api.open_path(&c_path)?;
        let info = device.get_device_info()?;
        let vid = info.vendor_id();
        let pid = info.product_id();
        if vid != DS4_VID || !PIDS.contains(&pid) {
            return Err(TransportError::UnsupportedDevice {
                path: path.to_string(),
                vid,
                pid,
            });
        }
        let transport = transport_for(&info);
        log::debug!("Opened {path} over {transport}");

        Ok(Self {
            device,
            transport,
        })
    }

    /// Link the device is connected over
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

impl HidTransport for HidApiTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let bytes_read = self.device.read_timeout(buf, READ_TIMEOUT_MS)?;
        // hidapi reports a timeout as an empty read
        if bytes_read == 0 {
            return Err(TransportError::Timeout);
        }
        Ok(bytes_read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        Ok(self.device.write(buf)?)
    }

    fn read_feature(&mut self, report_id: u8, length: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; length];
        buf[0] = report_id;
        let bytes_read = self.device.get_feature_report(&mut buf)?;
        buf.truncate(bytes_read);
        Ok(buf)
    }
}

fn transport_for(info: &DeviceInfo) -> Transport {
    match info.bus_type() {
        BusType::Bluetooth => Transport::Bluetooth,
        _ => Transport::Usb,
    }
}

/// A connected DualShock 4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub transport: Transport,
    pub serial: Option<String>,
    pub product: Option<String>,
}

/// Returns all connected DualShock 4 controllers
pub fn list_devices() -> Result<Vec<DeviceEntry>, TransportError> {
    let api = HidApi::new()?;
    let devices = api
        .device_list()
        .filter(|info| info.vendor_id() == DS4_VID && PIDS.contains(&info.product_id()))
        .map(|info| DeviceEntry {
            path: info.path().to_string_lossy().to_string(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            transport: transport_for(info),
            serial: info.serial_number().map(|s| s.to_string()),
            product: info.product_string().map(|s| s.to_string()),
        })
        .collect();

    Ok(devices)
}
