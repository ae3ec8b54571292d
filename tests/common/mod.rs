#![allow(dead_code)]

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    time::Duration,
};

use ds4link::drivers::dualshock4::{
    codec::Transport,
    crc,
    transport::{HidTransport, TransportError},
};

/// In-memory transport. Reports pushed through the sender returned by
/// [MockTransport::pair] are read back by the reader half; writes made by
/// the writer half are recorded.
pub struct MockTransport {
    reports: Option<Receiver<Vec<u8>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    calibration: Option<Vec<u8>>,
    feature_requests: Arc<Mutex<Vec<(u8, usize)>>>,
}

pub struct MockDevice {
    pub reports: Sender<Vec<u8>>,
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    pub feature_requests: Arc<Mutex<Vec<(u8, usize)>>>,
}

impl MockDevice {
    pub fn send(&self, report: Vec<u8>) {
        self.reports.send(report).expect("reader should be alive");
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().expect("lock").clone()
    }
}

impl MockTransport {
    /// Returns (reader, writer, device side)
    pub fn pair(calibration: Option<Vec<u8>>) -> (Self, Self, MockDevice) {
        let (tx, rx) = mpsc::channel();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let feature_requests = Arc::new(Mutex::new(Vec::new()));
        let reader = Self {
            reports: Some(rx),
            writes: writes.clone(),
            calibration,
            feature_requests: feature_requests.clone(),
        };
        let writer = Self {
            reports: None,
            writes: writes.clone(),
            calibration: None,
            feature_requests: feature_requests.clone(),
        };
        let device = MockDevice {
            reports: tx,
            writes,
            feature_requests,
        };
        (reader, writer, device)
    }
}

impl HidTransport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(reports) = self.reports.as_ref() else {
            return Ok(0);
        };
        match reports.recv_timeout(Duration::from_millis(20)) {
            Ok(report) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.writes.lock().expect("lock").push(buf.to_vec());
        Ok(buf.len())
    }

    fn read_feature(&mut self, report_id: u8, length: usize) -> Result<Vec<u8>, TransportError> {
        self.feature_requests
            .lock()
            .expect("lock")
            .push((report_id, length));
        self.calibration.clone().ok_or(TransportError::Disconnected)
    }
}

/// Calibration report with a 1:1 gyro scale and an accelerometer X axis that
/// scales raw values by 2
pub fn calibration_report(transport: Transport) -> Vec<u8> {
    let (report_id, size) = match transport {
        Transport::Usb => (0x02, 37),
        Transport::Bluetooth => (0x05, 41),
    };
    let mut buf = vec![0u8; size];
    buf[0] = report_id;
    // Gyro extrema, gyro speeds, accel extrema
    let values: [i16; 14] = [
        8640, 8640, 8640, -8640, -8640, -8640, 540, 540, 4096, -4096, 8192, -8192, 8192, -8192,
    ];
    for (i, value) in values.iter().enumerate() {
        let offset = 7 + i * 2;
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
    if transport == Transport::Bluetooth {
        crc::write_trailer(crc::FEATURE_GET_PREFIX, &mut buf);
    }
    buf
}

/// Full input report with centered sticks. `edit` receives the report with
/// its offset to the common block; the CRC is written afterwards.
pub fn full_report(transport: Transport, edit: impl FnOnce(&mut [u8], usize)) -> Vec<u8> {
    let (mut buf, offset) = match transport {
        Transport::Usb => {
            let mut buf = vec![0u8; 64];
            buf[0] = 0x01;
            (buf, 1)
        }
        Transport::Bluetooth => {
            let mut buf = vec![0u8; 78];
            buf[0] = 0x11;
            buf[1] = 0xC0;
            (buf, 3)
        }
    };
    buf[offset..offset + 4].copy_from_slice(&[0x80; 4]);
    buf[offset + 4] = 0x08;
    edit(&mut buf, offset);
    if transport == Transport::Bluetooth {
        crc::write_trailer(crc::INPUT_PREFIX, &mut buf);
    }
    buf
}

pub fn reduced_report() -> Vec<u8> {
    vec![0x01, 0x80, 0x80, 0x80, 0x80, 0x08, 0x00, 0x00, 0x00, 0x00]
}

/// Poll the given condition until it holds or the timeout expires
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
