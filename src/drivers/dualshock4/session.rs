//! Per-connection protocol state.
//!
//! A freshly connected DualShock 4 sends reduced reports over Bluetooth until
//! the calibration feature report is read from it. The session issues that
//! read, stores the calibration it yields and switches to full reporting on
//! the first full report that follows. It also owns the CRC failure policy and
//! decides when a keep-alive output report has to be sent.
use std::{
    collections::VecDeque,
    fmt::Display,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::config::SessionConfig;

use super::{
    calibration::{AxisOrdering, CalibrationError, CalibrationProfile},
    codec::{self, CodecError, InputReport, OutputRequest, PowerStatus, Transport},
    crc,
};

/// Possible errors while handling reports for a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Calibration(#[from] CalibrationError),
    #[error("{count} consecutive CRC failures, disconnect requested")]
    CrcThresholdExceeded { count: u32 },
}

impl SessionError {
    /// Returns true if the session can no longer be used and the transport
    /// should be disconnected.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::CrcThresholdExceeded { .. })
    }
}

/// Reporting mode of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingMode {
    AwaitingCalibration,
    FullReporting,
}

impl Display for ReportingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportingMode::AwaitingCalibration => write!(f, "AwaitingCalibration"),
            ReportingMode::FullReporting => write!(f, "FullReporting"),
        }
    }
}

#[derive(Debug, Clone)]
enum SessionState {
    AwaitingCalibration {
        /// The calibration read was issued
        requested: bool,
        /// Calibration read back from the device, if it could be parsed
        pending: Option<CalibrationProfile>,
    },
    FullReporting {
        calibration: CalibrationProfile,
    },
}

/// Feature report read the transport should perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRequest {
    pub report_id: u8,
    pub length: usize,
}

/// Protocol transactions recorded for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    CalibrationRequested { report_id: u8 },
    CalibrationApplied { profile: CalibrationProfile },
    CalibrationRejected,
    ModeSwitched { report_id: u8 },
    OutputSent { len: usize },
    KeepAliveSent { len: usize },
    CrcMismatch { count: u32 },
    DisconnectRequested,
}

/// Externally visible state of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub transport: Transport,
    pub mode: ReportingMode,
    pub crc_failure_count: u32,
    pub power: Option<PowerStatus>,
    pub reports_received: u64,
    pub disconnect_requested: bool,
}

/// Protocol state of a single connected controller. A reconnect always gets a
/// new session.
#[derive(Debug)]
pub struct ConnectionSession {
    id: String,
    transport: Transport,
    ordering: AxisOrdering,
    state: SessionState,
    crc_failure_count: u32,
    crc_failure_threshold: u32,
    keep_alive_interval: Duration,
    last_output_time: Option<Instant>,
    last_output: OutputRequest,
    power: Option<PowerStatus>,
    reports_received: u64,
    disconnect_requested: bool,
    history: VecDeque<Transaction>,
    history_size: usize,
}

impl ConnectionSession {
    pub fn new(id: impl Into<String>, transport: Transport, config: &SessionConfig) -> Self {
        let id = id.into();
        log::info!("Creating {transport} session for {id}");
        Self {
            id,
            transport,
            ordering: config.axis_ordering,
            state: SessionState::AwaitingCalibration {
                requested: false,
                pending: None,
            },
            crc_failure_count: 0,
            crc_failure_threshold: config.crc_failure_threshold.max(1),
            keep_alive_interval: config.keep_alive_interval(),
            last_output_time: None,
            last_output: OutputRequest::default(),
            power: None,
            reports_received: 0,
            disconnect_requested: false,
            history: VecDeque::with_capacity(config.history_size),
            history_size: config.history_size,
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn mode(&self) -> ReportingMode {
        match self.state {
            SessionState::AwaitingCalibration { .. } => ReportingMode::AwaitingCalibration,
            SessionState::FullReporting { .. } => ReportingMode::FullReporting,
        }
    }

    /// Calibration used to decode reports. Identity until the switch to full
    /// reporting.
    pub fn calibration(&self) -> CalibrationProfile {
        match &self.state {
            SessionState::AwaitingCalibration { .. } => CalibrationProfile::default(),
            SessionState::FullReporting { calibration } => *calibration,
        }
    }

    pub fn crc_failure_count(&self) -> u32 {
        self.crc_failure_count
    }

    /// Returns true once the session decided the transport must be closed
    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    /// Recorded protocol transactions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Transaction> {
        self.history.iter()
    }

    fn record(&mut self, transaction: Transaction) {
        if self.history_size == 0 {
            return;
        }
        if self.history.len() == self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(transaction);
    }

    /// Returns the calibration feature report read to issue, once per
    /// connection.
    pub fn request_calibration(&mut self) -> Option<FeatureRequest> {
        let SessionState::AwaitingCalibration { requested, .. } = &mut self.state else {
            return None;
        };
        if *requested {
            return None;
        }
        *requested = true;

        let layout = self.transport.layout();
        let request = FeatureRequest {
            report_id: layout.calibration_report_id,
            length: layout.calibration_report_size,
        };
        log::debug!(
            "Requesting calibration report {:#04x} from {}",
            request.report_id,
            self.id
        );
        self.record(Transaction::CalibrationRequested {
            report_id: request.report_id,
        });
        Some(request)
    }

    /// Parse the calibration feature report read from the device. It takes
    /// effect on the switch to full reporting.
    pub fn apply_calibration(&mut self, buf: &[u8]) -> Result<(), SessionError> {
        let result = self.parse_calibration(buf);
        match result {
            Ok(profile) => {
                if let SessionState::AwaitingCalibration { pending, .. } = &mut self.state {
                    *pending = Some(profile);
                    log::debug!("Calibration for {}: {profile:?}", self.id);
                    self.record(Transaction::CalibrationApplied { profile });
                } else {
                    log::warn!("Ignoring calibration for {} after mode switch", self.id);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Invalid calibration report from {}: {e}", self.id);
                self.record(Transaction::CalibrationRejected);
                Err(e.into())
            }
        }
    }

    fn parse_calibration(&self, buf: &[u8]) -> Result<CalibrationProfile, CalibrationError> {
        let layout = self.transport.layout();
        let Some(&report_id) = buf.first() else {
            return Err(CalibrationError::TooShort {
                expected: layout.calibration_report_size,
                actual: 0,
            });
        };
        if report_id != layout.calibration_report_id {
            return Err(CalibrationError::UnexpectedReportId(report_id));
        }
        if layout.has_crc {
            if buf.len() < layout.calibration_report_size {
                return Err(CalibrationError::TooShort {
                    expected: layout.calibration_report_size,
                    actual: buf.len(),
                });
            }
            let report = &buf[..layout.calibration_report_size];
            if !crc::verify(crc::FEATURE_GET_PREFIX, report) {
                return Err(CalibrationError::CrcMismatch);
            }
        }
        CalibrationProfile::parse(buf, self.ordering)
    }

    /// Decode an input report and advance the session.
    ///
    /// Malformed reports are returned as non-fatal errors. Consecutive CRC
    /// mismatches reaching the configured threshold are fatal.
    pub fn handle_input(&mut self, buf: &[u8]) -> Result<InputReport, SessionError> {
        let calibration = self.calibration();
        let mut report = match codec::parse_input(buf, self.transport, &calibration) {
            Ok(report) => report,
            Err(CodecError::CrcMismatch { expected, actual }) => {
                self.crc_failure_count += 1;
                let count = self.crc_failure_count;
                self.record(Transaction::CrcMismatch { count });
                if count >= self.crc_failure_threshold {
                    log::error!(
                        "{count} consecutive CRC failures from {}, requesting disconnect",
                        self.id
                    );
                    self.disconnect_requested = true;
                    self.record(Transaction::DisconnectRequested);
                    return Err(SessionError::CrcThresholdExceeded { count });
                }
                log::warn!(
                    "CRC mismatch from {} ({count}/{}): expected {expected:#010x}, got {actual:#010x}",
                    self.id,
                    self.crc_failure_threshold
                );
                return Err(CodecError::CrcMismatch { expected, actual }.into());
            }
            Err(e) => {
                log::debug!("Dropping malformed report from {}: {e}", self.id);
                return Err(e.into());
            }
        };

        // Only reports that went through a CRC check end a run of mismatches
        if self.transport.layout().has_crc && !matches!(report, InputReport::Reduced(_)) {
            self.crc_failure_count = 0;
        }
        self.reports_received += 1;
        self.maybe_switch_mode(&report);

        if let InputReport::Full(state) = &mut report {
            // Reports that trigger the switch were decoded before the
            // calibration was active.
            let calibration = self.calibration();
            state.motion = calibration.apply(&state.imu);
            self.power = Some(state.power);
        }

        Ok(report)
    }

    fn maybe_switch_mode(&mut self, report: &InputReport) {
        if !report.is_full_mode() {
            return;
        }
        let SessionState::AwaitingCalibration { requested, pending } = &mut self.state else {
            return;
        };
        if !*requested {
            log::trace!(
                "Full report from {} before calibration was requested",
                self.id
            );
            return;
        }
        let calibration = match pending.take() {
            Some(calibration) => calibration,
            None => {
                log::warn!(
                    "No calibration available for {}, using identity calibration",
                    self.id
                );
                CalibrationProfile::default()
            }
        };

        let report_id = report.report_id();
        log::info!(
            "{} switched to full reporting (report {report_id:#04x})",
            self.id
        );
        self.state = SessionState::FullReporting { calibration };
        self.record(Transaction::ModeSwitched { report_id });
    }

    /// Encode an application output request and remember it for keep-alive
    pub fn build_output(
        &mut self,
        request: &OutputRequest,
        now: Instant,
    ) -> Result<Vec<u8>, SessionError> {
        let buf = codec::build_output(request, self.transport)?;
        self.last_output = *request;
        self.last_output_time = Some(now);
        self.record(Transaction::OutputSent { len: buf.len() });
        Ok(buf)
    }

    /// Last output request sent to the device
    pub fn last_output(&self) -> &OutputRequest {
        &self.last_output
    }

    /// Returns true if an output report must be sent to keep the device from
    /// disconnecting on idle.
    pub fn keep_alive_due(&self, now: Instant) -> bool {
        if self.mode() != ReportingMode::FullReporting {
            return false;
        }
        match self.last_output_time {
            Some(last) => now.saturating_duration_since(last) >= self.keep_alive_interval,
            None => true,
        }
    }

    /// Re-encode the last output request if a keep-alive is due
    pub fn keep_alive(&mut self, now: Instant) -> Result<Option<Vec<u8>>, SessionError> {
        if !self.keep_alive_due(now) {
            return Ok(None);
        }
        let buf = codec::build_output(&self.last_output, self.transport)?;
        self.last_output_time = Some(now);
        log::trace!("Sending keep-alive to {}", self.id);
        self.record(Transaction::KeepAliveSent { len: buf.len() });
        Ok(Some(buf))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            transport: self.transport,
            mode: self.mode(),
            crc_failure_count: self.crc_failure_count,
            power: self.power,
            reports_received: self.reports_received,
            disconnect_requested: self.disconnect_requested,
        }
    }

    /// End the session, releasing its calibration
    pub fn disconnect(self) -> SessionSnapshot {
        log::info!(
            "Closing {} session for {} after {} reports",
            self.transport,
            self.id,
            self.reports_received
        );
        self.snapshot()
    }
}
