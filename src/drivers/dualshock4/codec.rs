//! Conversion between raw DualShock 4 report bytes and structured state.
//!
//! USB and Bluetooth reports carry the same blocks in the same order. The
//! Bluetooth reports only add two header bytes after the report id and a CRC
//! trailer, so a single parser is used for both with the block offset taken
//! from the transport's [ReportLayout].
use std::fmt::Display;

use packed_struct::{prelude::*, PackedStructSlice};
use thiserror::Error;

use super::{
    calibration::CalibrationProfile,
    crc,
    hid_report::*,
};

/// Physical link the reports travel over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Usb,
    Bluetooth,
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Usb => write!(f, "USB"),
            Transport::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Byte positions that differ between transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    /// Offset of the first block (report id and transport header included)
    pub header_size: usize,
    pub input_report_id: u8,
    pub input_report_size: usize,
    pub output_report_id: u8,
    pub output_report_size: usize,
    pub calibration_report_id: u8,
    pub calibration_report_size: usize,
    pub max_touch_frames: usize,
    /// Reports end with a CRC-32 trailer
    pub has_crc: bool,
}

const USB_LAYOUT: ReportLayout = ReportLayout {
    header_size: USB_HEADER_SIZE,
    input_report_id: INPUT_REPORT_USB,
    input_report_size: INPUT_REPORT_USB_SIZE,
    output_report_id: OUTPUT_REPORT_USB,
    output_report_size: OUTPUT_REPORT_USB_SIZE,
    calibration_report_id: FEATURE_REPORT_CALIBRATION_USB,
    calibration_report_size: FEATURE_REPORT_CALIBRATION_USB_SIZE,
    max_touch_frames: TOUCH_FRAMES_USB,
    has_crc: false,
};

const BT_LAYOUT: ReportLayout = ReportLayout {
    header_size: BT_HEADER_SIZE,
    input_report_id: INPUT_REPORT_BT,
    input_report_size: INPUT_REPORT_BT_SIZE,
    output_report_id: OUTPUT_REPORT_BT,
    output_report_size: OUTPUT_REPORT_BT_SIZE,
    calibration_report_id: FEATURE_REPORT_CALIBRATION_BT,
    calibration_report_size: FEATURE_REPORT_CALIBRATION_BT_SIZE,
    max_touch_frames: TOUCH_FRAMES_BT,
    has_crc: true,
};

impl Transport {
    pub fn layout(&self) -> &'static ReportLayout {
        match self {
            Transport::Usb => &USB_LAYOUT,
            Transport::Bluetooth => &BT_LAYOUT,
        }
    }
}

/// Possible errors when decoding or encoding reports
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("report too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("unknown report id `{report_id:#04x}` for {transport} transport")]
    UnknownReportId { report_id: u8, transport: Transport },
    #[error("CRC mismatch: report carries {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("touch coordinate ({x}, {y}) is outside of the touchpad")]
    CoordinateOutOfRange { x: u16, y: u16 },
    #[error("report announces {count} touch frames, at most {max} fit")]
    TooManyTouchFrames { count: usize, max: usize },
    #[error("unable to pack or unpack report: {0:?}")]
    Packing(#[from] PackingError),
}

/// D-pad direction, decoded from a 4-bit nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DPadDirection {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    #[default]
    Released,
}

impl DPadDirection {
    /// Values 0-7 are the compass points clockwise from north. Anything else
    /// means released.
    pub fn from_nibble(value: u8) -> Self {
        match value {
            0 => Self::North,
            1 => Self::NorthEast,
            2 => Self::East,
            3 => Self::SouthEast,
            4 => Self::South,
            5 => Self::SouthWest,
            6 => Self::West,
            7 => Self::NorthWest,
            _ => Self::Released,
        }
    }

    pub fn to_nibble(&self) -> u8 {
        match self {
            Self::North => 0,
            Self::NorthEast => 1,
            Self::East => 2,
            Self::SouthEast => 3,
            Self::South => 4,
            Self::SouthWest => 5,
            Self::West => 6,
            Self::NorthWest => 7,
            Self::Released => 8,
        }
    }

    /// Returns the pressed state of the (up, right, down, left) buttons
    pub fn as_buttons(&self) -> [bool; 4] {
        match self {
            Self::North => [true, false, false, false],
            Self::NorthEast => [true, true, false, false],
            Self::East => [false, true, false, false],
            Self::SouthEast => [false, true, true, false],
            Self::South => [false, false, true, false],
            Self::SouthWest => [false, false, true, true],
            Self::West => [false, false, false, true],
            Self::NorthWest => [true, false, false, true],
            Self::Released => [false, false, false, false],
        }
    }
}

/// Analog stick position. 0 is left/up, 128 is centered, 255 is right/down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stick {
    pub x: u8,
    pub y: u8,
}

impl Default for Stick {
    fn default() -> Self {
        Self { x: 128, y: 128 }
    }
}

/// The 14 digital buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonSet {
    pub square: bool,
    pub cross: bool,
    pub circle: bool,
    pub triangle: bool,
    pub l1: bool,
    pub r1: bool,
    pub l2: bool,
    pub r2: bool,
    pub share: bool,
    pub options: bool,
    pub l3: bool,
    pub r3: bool,
    pub ps: bool,
    pub touchpad: bool,
}

/// Sticks, buttons and triggers. Present in every input report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub left_stick: Stick,
    pub right_stick: Stick,
    pub dpad: DPadDirection,
    pub buttons: ButtonSet,
    pub l2_trigger: u8,
    pub r2_trigger: u8,
    pub frame_counter: u8,
}

impl From<&PackedControllerData> for ControllerState {
    fn from(data: &PackedControllerData) -> Self {
        Self {
            left_stick: Stick {
                x: data.joystick_l_x,
                y: data.joystick_l_y,
            },
            right_stick: Stick {
                x: data.joystick_r_x,
                y: data.joystick_r_y,
            },
            dpad: DPadDirection::from_nibble(data.dpad.to_primitive()),
            buttons: ButtonSet {
                square: data.square,
                cross: data.cross,
                circle: data.circle,
                triangle: data.triangle,
                l1: data.l1,
                r1: data.r1,
                l2: data.l2,
                r2: data.r2,
                share: data.share,
                options: data.options,
                l3: data.l3,
                r3: data.r3,
                ps: data.ps,
                touchpad: data.touchpad,
            },
            l2_trigger: data.l2_trigger,
            r2_trigger: data.r2_trigger,
            frame_counter: data.frame_counter.to_primitive(),
        }
    }
}

/// Raw, uncalibrated IMU sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImuSample {
    pub gyro_pitch: i16,
    pub gyro_yaw: i16,
    pub gyro_roll: i16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
}

/// Calibrated IMU sample. Gyro in degrees/second, accelerometer in g.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionState {
    pub gyro_pitch: f32,
    pub gyro_yaw: f32,
    pub gyro_roll: f32,
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
}

/// A single decoded touch contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchPoint {
    pub active: bool,
    pub tracking_id: u8,
    pub x: u16,
    pub y: u16,
}

impl From<&PackedTouchPoint> for TouchPoint {
    fn from(point: &PackedTouchPoint) -> Self {
        Self {
            active: point.is_touching(),
            tracking_id: point.tracking_id.to_primitive(),
            x: point.get_x(),
            y: point.get_y(),
        }
    }
}

/// One buffered touchpad sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchFrame {
    pub counter: u8,
    pub points: [TouchPoint; 2],
}

/// Battery and peripheral state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerStatus {
    /// 0-8 on battery, 0-11 while on cable
    pub level: u8,
    pub cable_connected: bool,
    pub headphones: bool,
    pub microphone: bool,
    pub extension: bool,
}

impl PowerStatus {
    /// Battery charge in percent
    pub fn battery_percent(&self) -> u8 {
        let max = if self.cable_connected { 11 } else { 8 };
        let percent = self.level as u32 * 100 / max;
        percent.min(100) as u8
    }
}

/// Decoded Bluetooth header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BluetoothFlags {
    pub enable_hid: bool,
    pub enable_crc: bool,
    pub enable_audio: bool,
    pub poll_interval: u8,
    pub raw: [u8; 2],
}

/// Full input state: sticks, buttons, triggers, IMU, touch and power
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputState {
    pub report_id: u8,
    pub controller: ControllerState,
    pub timestamp: u16,
    pub temperature: u8,
    pub imu: ImuSample,
    pub motion: MotionState,
    pub power: PowerStatus,
    pub touch_frames: Vec<TouchFrame>,
    pub extension_data: [u8; 5],
    /// Only present on Bluetooth
    pub bluetooth: Option<BluetoothFlags>,
}

impl InputState {
    /// Most recent touch frame in the report, if any
    pub fn latest_touch(&self) -> Option<&TouchFrame> {
        self.touch_frames.last()
    }
}

/// Reduced Bluetooth input: sticks, buttons and triggers only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReducedInputState {
    pub report_id: u8,
    pub controller: ControllerState,
    /// False for 9-byte reports, which end before the R2 trigger. The
    /// controller state then holds 0 for it.
    pub has_r2_trigger: bool,
}

/// Result of decoding an input report
#[derive(Debug, Clone, PartialEq)]
pub enum InputReport {
    Full(InputState),
    Reduced(ReducedInputState),
    /// Bluetooth report with the HID flag clear. It carries only audio data.
    NoState { report_id: u8, flags: BluetoothFlags },
}

impl InputReport {
    pub fn report_id(&self) -> u8 {
        match self {
            InputReport::Full(state) => state.report_id,
            InputReport::Reduced(state) => state.report_id,
            InputReport::NoState { report_id, .. } => *report_id,
        }
    }

    /// Sticks, buttons and triggers, if the report carried them
    pub fn controller(&self) -> Option<&ControllerState> {
        match self {
            InputReport::Full(state) => Some(&state.controller),
            InputReport::Reduced(state) => Some(&state.controller),
            InputReport::NoState { .. } => None,
        }
    }

    /// Returns true for reports tagged with the full-mode report id
    pub fn is_full_mode(&self) -> bool {
        !matches!(self, InputReport::Reduced(_))
    }
}

/// Wrapping difference between two report timestamps
pub fn timestamp_delta(previous: u16, current: u16) -> u16 {
    current.wrapping_sub(previous)
}

/// Convert a timestamp delta (~5.33us ticks) to microseconds
pub fn timestamp_delta_micros(delta: u16) -> u32 {
    delta as u32 * 16 / 3
}

/// Which output fields the device should apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFeatures {
    pub rumble: bool,
    pub lightbar: bool,
    pub flash: bool,
    pub volume_left: bool,
    pub volume_right: bool,
    pub volume_mic: bool,
    pub volume_speaker: bool,
}

impl OutputFeatures {
    /// Rumble, light bar and flash
    pub const STANDARD: Self = Self {
        rumble: true,
        lightbar: true,
        flash: true,
        volume_left: false,
        volume_right: false,
        volume_mic: false,
        volume_speaker: false,
    };
}

/// Desired output state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputRequest {
    /// Left, heavy motor
    pub rumble_strong: u8,
    /// Right, light motor
    pub rumble_weak: u8,
    pub led_red: u8,
    pub led_green: u8,
    pub led_blue: u8,
    /// ~10ms units
    pub flash_on: u8,
    /// ~10ms units
    pub flash_off: u8,
    pub volume_left: u8,
    pub volume_right: u8,
    pub volume_mic: u8,
    pub volume_speaker: u8,
    pub features: OutputFeatures,
}

impl OutputRequest {
    /// Request only a rumble change
    pub fn rumble(strong: u8, weak: u8) -> Self {
        Self {
            rumble_strong: strong,
            rumble_weak: weak,
            features: OutputFeatures {
                rumble: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Request only a light bar color change
    pub fn lightbar(r: u8, g: u8, b: u8) -> Self {
        Self {
            led_red: r,
            led_green: g,
            led_blue: b,
            features: OutputFeatures {
                lightbar: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl From<&OutputRequest> for PackedOutputState {
    fn from(request: &OutputRequest) -> Self {
        let features = request.features;
        Self {
            allow_speaker_volume: features.volume_speaker,
            allow_mic_volume: features.volume_mic,
            allow_volume_right: features.volume_right,
            allow_volume_left: features.volume_left,
            allow_flash: features.flash,
            allow_led_color: features.lightbar,
            allow_rumble: features.rumble,
            rumble_right: request.rumble_weak,
            rumble_left: request.rumble_strong,
            led_red: request.led_red,
            led_green: request.led_green,
            led_blue: request.led_blue,
            flash_on: request.flash_on,
            flash_off: request.flash_off,
            volume_left: request.volume_left,
            volume_right: request.volume_right,
            volume_mic: request.volume_mic,
            volume_speaker: request.volume_speaker,
            ..Default::default()
        }
    }
}

impl From<&PackedOutputState> for OutputRequest {
    fn from(state: &PackedOutputState) -> Self {
        Self {
            rumble_strong: state.rumble_left,
            rumble_weak: state.rumble_right,
            led_red: state.led_red,
            led_green: state.led_green,
            led_blue: state.led_blue,
            flash_on: state.flash_on,
            flash_off: state.flash_off,
            volume_left: state.volume_left,
            volume_right: state.volume_right,
            volume_mic: state.volume_mic,
            volume_speaker: state.volume_speaker,
            features: OutputFeatures {
                rumble: state.allow_rumble,
                lightbar: state.allow_led_color,
                flash: state.allow_flash,
                volume_left: state.allow_volume_left,
                volume_right: state.allow_volume_right,
                volume_mic: state.allow_mic_volume,
                volume_speaker: state.allow_speaker_volume,
            },
        }
    }
}

fn ensure_size(buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() < expected {
        return Err(CodecError::TooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Check the CRC trailer of a Bluetooth report
pub(crate) fn check_crc(prefix: u8, report: &[u8]) -> Result<(), CodecError> {
    ensure_size(report, crc::CRC_SIZE)?;
    let body = &report[..report.len() - crc::CRC_SIZE];
    let expected = crc::stored(report).unwrap_or_default();
    let actual = crc::compute(prefix, body);
    if expected != actual {
        return Err(CodecError::CrcMismatch { expected, actual });
    }
    Ok(())
}

/// Decode the Bluetooth header bytes of a report
pub fn parse_bluetooth_flags(buf: &[u8]) -> Result<BluetoothFlags, CodecError> {
    ensure_size(buf, BT_HEADER_SIZE)?;
    let raw = [buf[1], buf[2]];
    let flags = PackedBluetoothFlags::unpack(&raw)?;
    Ok(BluetoothFlags {
        enable_hid: flags.enable_hid,
        enable_crc: flags.enable_crc,
        enable_audio: flags.enable_audio,
        poll_interval: flags.poll_interval.to_primitive(),
        raw,
    })
}

/// Decode a raw input report.
///
/// The calibration profile is used to fill in the calibrated motion values of
/// full reports.
pub fn parse_input(
    buf: &[u8],
    transport: Transport,
    calibration: &CalibrationProfile,
) -> Result<InputReport, CodecError> {
    let Some(&report_id) = buf.first() else {
        return Err(CodecError::TooShort {
            expected: 1,
            actual: 0,
        });
    };

    match (transport, report_id) {
        (Transport::Usb, INPUT_REPORT_USB) => {
            log::trace!("Got USB input report");
            parse_full(buf, INPUT_REPORT_USB_SIZE, transport.layout(), calibration)
        }
        (Transport::Bluetooth, INPUT_REPORT_BT_REDUCED) => {
            log::trace!("Got reduced Bluetooth input report");
            parse_reduced(buf)
        }
        (Transport::Bluetooth, _) => {
            let Some(size) = bt_report_size(report_id) else {
                return Err(CodecError::UnknownReportId {
                    report_id,
                    transport,
                });
            };
            log::trace!("Got Bluetooth input report {report_id:#04x}");
            parse_full(buf, size, transport.layout(), calibration)
        }
        (Transport::Usb, _) => Err(CodecError::UnknownReportId {
            report_id,
            transport,
        }),
    }
}

fn parse_reduced(buf: &[u8]) -> Result<InputReport, CodecError> {
    ensure_size(buf, INPUT_REPORT_BT_REDUCED_MIN_SIZE)?;
    let has_r2_trigger = buf.len() >= INPUT_REPORT_BT_REDUCED_SIZE;
    let mut block = [0u8; CONTROLLER_DATA_SIZE];
    let available = (buf.len() - USB_HEADER_SIZE).min(CONTROLLER_DATA_SIZE);
    block[..available].copy_from_slice(&buf[USB_HEADER_SIZE..USB_HEADER_SIZE + available]);
    let data = PackedControllerData::unpack_from_slice(&block)?;
    Ok(InputReport::Reduced(ReducedInputState {
        report_id: buf[0],
        controller: ControllerState::from(&data),
        has_r2_trigger,
    }))
}

fn parse_full(
    buf: &[u8],
    size: usize,
    layout: &ReportLayout,
    calibration: &CalibrationProfile,
) -> Result<InputReport, CodecError> {
    ensure_size(buf, size)?;
    let buf = &buf[..size];
    let report_id = buf[0];

    let bluetooth = if layout.has_crc {
        check_crc(crc::INPUT_PREFIX, buf)?;
        let flags = parse_bluetooth_flags(buf)?;
        if !flags.enable_hid {
            log::trace!("Report {report_id:#04x} carries no controller state");
            return Ok(InputReport::NoState { report_id, flags });
        }
        Some(flags)
    } else {
        None
    };

    let offset = layout.header_size;
    let packed = PackedInputState::unpack_from_slice(&buf[offset..offset + INPUT_STATE_SIZE])?;
    let touch_frames = parse_touch_frames(&buf[offset + INPUT_STATE_SIZE..], layout)?;

    let imu = ImuSample {
        gyro_pitch: packed.gyro_pitch.to_primitive(),
        gyro_yaw: packed.gyro_yaw.to_primitive(),
        gyro_roll: packed.gyro_roll.to_primitive(),
        accel_x: packed.accel_x.to_primitive(),
        accel_y: packed.accel_y.to_primitive(),
        accel_z: packed.accel_z.to_primitive(),
    };

    Ok(InputReport::Full(InputState {
        report_id,
        controller: ControllerState::from(&packed.controller),
        timestamp: packed.timestamp,
        temperature: packed.temperature,
        motion: calibration.apply(&imu),
        imu,
        power: PowerStatus {
            level: packed.battery_level.to_primitive(),
            cable_connected: packed.plugged_cable,
            headphones: packed.plugged_headphones,
            microphone: packed.plugged_mic,
            extension: packed.plugged_extension,
        },
        touch_frames,
        extension_data: packed.extension_data,
        bluetooth,
    }))
}

/// Decode the touch section: a frame count followed by the frames
fn parse_touch_frames(buf: &[u8], layout: &ReportLayout) -> Result<Vec<TouchFrame>, CodecError> {
    let Some(&count) = buf.first() else {
        return Err(CodecError::TooShort {
            expected: 1,
            actual: 0,
        });
    };
    let count = count as usize;
    if count > layout.max_touch_frames {
        return Err(CodecError::TooManyTouchFrames {
            count,
            max: layout.max_touch_frames,
        });
    }

    let mut frames = Vec::with_capacity(count);
    for i in 0..count {
        let start = 1 + i * TOUCH_FRAME_SIZE;
        let end = start + TOUCH_FRAME_SIZE;
        ensure_size(buf, end)?;
        let packed = PackedTouchFrame::unpack_from_slice(&buf[start..end])?;
        frames.push(decode_touch_frame(&packed)?);
    }

    Ok(frames)
}

/// Decode a single touch frame, rejecting coordinates that can only come from
/// a misaligned parse.
pub fn decode_touch_frame(frame: &PackedTouchFrame) -> Result<TouchFrame, CodecError> {
    let points = [
        decode_touch_point(&frame.points[0])?,
        decode_touch_point(&frame.points[1])?,
    ];
    Ok(TouchFrame {
        counter: frame.counter,
        points,
    })
}

/// Decode a single touch contact from its packed form
pub fn decode_touch_point(point: &PackedTouchPoint) -> Result<TouchPoint, CodecError> {
    let point = TouchPoint::from(point);
    if point.x > TOUCHPAD_X_MAX || point.y > TOUCHPAD_Y_MAX {
        return Err(CodecError::CoordinateOutOfRange {
            x: point.x,
            y: point.y,
        });
    }
    Ok(point)
}

/// Decode a touch contact from its 4 raw bytes
pub fn decode_touch_bytes(bytes: [u8; TOUCH_POINT_SIZE]) -> Result<TouchPoint, CodecError> {
    let point = PackedTouchPoint::unpack(&bytes)?;
    decode_touch_point(&point)
}

/// Encode the given output request as a raw output report. Bluetooth reports
/// include the CRC trailer.
pub fn build_output(request: &OutputRequest, transport: Transport) -> Result<Vec<u8>, CodecError> {
    let layout = transport.layout();
    let mut buf = vec![0u8; layout.output_report_size];
    buf[0] = layout.output_report_id;

    if layout.has_crc {
        let flags = PackedBluetoothFlags {
            enable_hid: true,
            enable_crc: true,
            poll_interval: Integer::from_primitive(BT_POLL_INTERVAL_MS),
            ..Default::default()
        };
        flags.pack_to_slice(&mut buf[1..BT_HEADER_SIZE])?;
    }

    let offset = layout.header_size;
    let state = PackedOutputState::from(request);
    state.pack_to_slice(&mut buf[offset..offset + OUTPUT_STATE_SIZE])?;

    if layout.has_crc {
        crc::write_trailer(crc::OUTPUT_PREFIX, &mut buf);
    }

    Ok(buf)
}

/// Decode a raw output report back into the request it encodes
pub fn parse_output(buf: &[u8], transport: Transport) -> Result<OutputRequest, CodecError> {
    let layout = transport.layout();
    ensure_size(buf, layout.output_report_size)?;
    let buf = &buf[..layout.output_report_size];
    if buf[0] != layout.output_report_id {
        return Err(CodecError::UnknownReportId {
            report_id: buf[0],
            transport,
        });
    }
    if layout.has_crc {
        check_crc(crc::OUTPUT_PREFIX, buf)?;
    }

    let offset = layout.header_size;
    let state = PackedOutputState::unpack_from_slice(&buf[offset..offset + OUTPUT_STATE_SIZE])?;
    Ok(OutputRequest::from(&state))
}
