//! IMU calibration.
//!
//! The calibration feature report stores, per axis, a bias plus the raw
//! readings at a known positive and negative reference. From these a rational
//! scale (numerator / denominator) is derived so the raw sensor samples can be
//! converted into physical units.
use packed_struct::{prelude::*, PackedStructSlice};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codec::{ImuSample, MotionState};
use super::hid_report::PackedCalibrationReport;

/// Gyro resolution in LSB per degree/second
pub const GYRO_RES_PER_DEG_S: i32 = 16;
/// Accelerometer resolution in LSB per g
pub const ACCEL_RES_PER_G: i32 = 8192;
/// Bytes of the calibration report that carry data (report id included)
pub const CALIBRATION_DATA_SIZE: usize = 35;

/// Order of the six gyro "plus"/"minus" fields in the calibration report.
///
/// Firmware revisions and transports disagree on this and there is no reliable
/// way to detect it from the data. Picking the wrong one shows up as gyro axes
/// that are swapped, inverted or scaled wrong; switch the ordering if that is
/// observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrdering {
    /// pitch+, yaw+, roll+, pitch-, yaw-, roll-
    Grouped,
    /// pitch+, pitch-, yaw+, yaw-, roll+, roll-
    Paired,
}

impl std::str::FromStr for AxisOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grouped" => Ok(Self::Grouped),
            "paired" => Ok(Self::Paired),
            _ => Err(format!("invalid axis ordering '{s}', expected 'grouped' or 'paired'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GyroAxis {
    Pitch,
    Yaw,
    Roll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelAxis {
    X,
    Y,
    Z,
}

/// Possible errors when parsing a calibration report
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration report too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("unexpected calibration report id `{0:#04x}`")]
    UnexpectedReportId(u8),
    #[error("calibration report failed CRC check")]
    CrcMismatch,
    #[error("unable to unpack calibration report: {0:?}")]
    Packing(#[from] PackingError),
}

/// Bias and rational scale for a single axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisCalibration {
    pub bias: i32,
    pub numerator: i32,
    pub denominator: i32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self::identity(0)
    }
}

impl AxisCalibration {
    /// A 1:1 scale around the given bias
    pub fn identity(bias: i32) -> Self {
        Self {
            bias,
            numerator: 1,
            denominator: 1,
        }
    }

    /// Create a new axis calibration. A zero denominator falls back to a 1:1
    /// scale.
    pub fn new(bias: i32, numerator: i32, denominator: i32) -> Self {
        if denominator == 0 {
            log::warn!("Calibration scale {numerator}/0 is degenerate, using identity scale");
            return Self::identity(bias);
        }
        Self {
            bias,
            numerator,
            denominator,
        }
    }

    /// Returns true if this axis uses the 1:1 fallback scale
    pub fn is_identity(&self) -> bool {
        self.numerator == self.denominator
    }

    /// Apply bias and scale, returning the value in sensor LSB units
    pub fn apply(&self, raw: i16) -> f32 {
        let centered = raw as i32 - self.bias;
        centered as f32 * self.numerator as f32 / self.denominator as f32
    }
}

/// Per-device IMU calibration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationProfile {
    /// Pitch, yaw, roll
    pub gyro: [AxisCalibration; 3],
    /// X, Y, Z
    pub accel: [AxisCalibration; 3],
    /// Sum of the gyro reference speeds (deg/s)
    pub gyro_speed_2x: i32,
}

impl CalibrationProfile {
    /// Parse the calibration feature report using the given gyro field
    /// ordering. Transport framing (CRC on Bluetooth) is checked by the caller.
    pub fn parse(buf: &[u8], ordering: AxisOrdering) -> Result<Self, CalibrationError> {
        if buf.len() < CALIBRATION_DATA_SIZE {
            return Err(CalibrationError::TooShort {
                expected: CALIBRATION_DATA_SIZE,
                actual: buf.len(),
            });
        }
        let report = PackedCalibrationReport::unpack_from_slice(&buf[..CALIBRATION_DATA_SIZE])?;
        Ok(Self::from_report(&report, ordering))
    }

    /// Build the profile from an unpacked calibration report
    pub fn from_report(report: &PackedCalibrationReport, ordering: AxisOrdering) -> Self {
        let e = report.gyro_extrema();
        // (plus, minus) per axis: pitch, yaw, roll
        let extrema = match ordering {
            AxisOrdering::Grouped => [(e[0], e[3]), (e[1], e[4]), (e[2], e[5])],
            AxisOrdering::Paired => [(e[0], e[1]), (e[2], e[3]), (e[4], e[5])],
        };
        let biases = [
            report.gyro_pitch_bias.to_primitive(),
            report.gyro_yaw_bias.to_primitive(),
            report.gyro_roll_bias.to_primitive(),
        ];

        let speed_plus = report.gyro_speed_plus.to_primitive() as i32;
        let speed_minus = report.gyro_speed_minus.to_primitive() as i32;
        let gyro_speed_2x = speed_plus + speed_minus;

        let gyro = [0, 1, 2].map(|i| {
            let (plus, minus) = extrema[i];
            AxisCalibration::new(
                biases[i] as i32,
                gyro_speed_2x * GYRO_RES_PER_DEG_S,
                plus as i32 - minus as i32,
            )
        });

        let accel_extrema = [
            (report.accel_x_plus, report.accel_x_minus),
            (report.accel_y_plus, report.accel_y_minus),
            (report.accel_z_plus, report.accel_z_minus),
        ];
        let accel = accel_extrema.map(|(plus, minus)| {
            let plus = plus.to_primitive() as i32;
            let minus = minus.to_primitive() as i32;
            let range = plus - minus;
            AxisCalibration::new(plus - range / 2, 2 * ACCEL_RES_PER_G, range)
        });

        Self {
            gyro,
            accel,
            gyro_speed_2x,
        }
    }

    /// Convert a raw gyro sample into degrees/second
    pub fn apply_gyro(&self, axis: GyroAxis, raw: i16) -> f32 {
        let index = match axis {
            GyroAxis::Pitch => 0,
            GyroAxis::Yaw => 1,
            GyroAxis::Roll => 2,
        };
        self.gyro[index].apply(raw) / GYRO_RES_PER_DEG_S as f32
    }

    /// Convert a raw accelerometer sample into g
    pub fn apply_accel(&self, axis: AccelAxis, raw: i16) -> f32 {
        let index = match axis {
            AccelAxis::X => 0,
            AccelAxis::Y => 1,
            AccelAxis::Z => 2,
        };
        self.accel[index].apply(raw) / ACCEL_RES_PER_G as f32
    }

    /// Convert a full raw IMU sample
    pub fn apply(&self, imu: &ImuSample) -> MotionState {
        MotionState {
            gyro_pitch: self.apply_gyro(GyroAxis::Pitch, imu.gyro_pitch),
            gyro_yaw: self.apply_gyro(GyroAxis::Yaw, imu.gyro_yaw),
            gyro_roll: self.apply_gyro(GyroAxis::Roll, imu.gyro_roll),
            accel_x: self.apply_accel(AccelAxis::X, imu.accel_x),
            accel_y: self.apply_accel(AccelAxis::Y, imu.accel_y),
            accel_z: self.apply_accel(AccelAxis::Z, imu.accel_z),
        }
    }
}
