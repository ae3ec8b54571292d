//! Bit layouts of the DualShock 4 reports.
//!
//! The USB and Bluetooth reports share the same blocks. Bluetooth reports
//! carry two extra header bytes after the report id, so every block starts two
//! bytes later than on USB. The structures here describe the blocks only; the
//! codec places them at the right offset for each transport.
//!
//! Layout sources: Linux `hid-playstation.c` and the PS4 developer wiki.
use packed_struct::prelude::*;

// Device identifiers
pub const DS4_VID: u16 = 0x054c;
pub const DS4_V1_PID: u16 = 0x05c4;
pub const DS4_V2_PID: u16 = 0x09cc;
pub const DS4_DONGLE_PID: u16 = 0x0ba0;
pub const PIDS: [u16; 3] = [DS4_V1_PID, DS4_V2_PID, DS4_DONGLE_PID];

// Report ids and sizes
pub const INPUT_REPORT_USB: u8 = 0x01;
pub const INPUT_REPORT_USB_SIZE: usize = 64;
pub const INPUT_REPORT_BT_REDUCED: u8 = 0x01;
pub const INPUT_REPORT_BT_REDUCED_SIZE: usize = 10;
/// Some firmware drops the R2 trigger byte from reduced reports
pub const INPUT_REPORT_BT_REDUCED_MIN_SIZE: usize = 9;
pub const INPUT_REPORT_BT: u8 = 0x11;
pub const INPUT_REPORT_BT_SIZE: usize = 78;
pub const OUTPUT_REPORT_USB: u8 = 0x05;
pub const OUTPUT_REPORT_USB_SIZE: usize = 32;
pub const OUTPUT_REPORT_BT: u8 = 0x11;
pub const OUTPUT_REPORT_BT_SIZE: usize = 78;
pub const FEATURE_REPORT_CALIBRATION_USB: u8 = 0x02;
pub const FEATURE_REPORT_CALIBRATION_USB_SIZE: usize = 37;
pub const FEATURE_REPORT_CALIBRATION_BT: u8 = 0x05;
pub const FEATURE_REPORT_CALIBRATION_BT_SIZE: usize = 41;

/// Last report id of the Bluetooth report family. Ids above 0x11 are the
/// larger variants used to carry audio.
pub const BT_REPORT_LAST: u8 = 0x19;
/// Largest report the device can send
pub const MAX_REPORT_SIZE: usize = 547;

/// Number of header bytes before the first block (report id included)
pub const USB_HEADER_SIZE: usize = 1;
pub const BT_HEADER_SIZE: usize = 3;

// Block sizes
pub const CONTROLLER_DATA_SIZE: usize = 9;
pub const INPUT_STATE_SIZE: usize = 32;
pub const TOUCH_POINT_SIZE: usize = 4;
pub const TOUCH_FRAME_SIZE: usize = 9;
pub const OUTPUT_STATE_SIZE: usize = 22;

/// Touch frames carried by a full USB input report
pub const TOUCH_FRAMES_USB: usize = 3;
/// Touch frames carried by a full Bluetooth input report
pub const TOUCH_FRAMES_BT: usize = 4;

// Touchpad limits
pub const TOUCHPAD_X_MAX: u16 = 1919;
pub const TOUCHPAD_Y_MAX: u16 = 942;

/// Secondary flag byte the device expects in every output report
pub const OUTPUT_SECONDARY_FLAGS: u8 = 0x04;
/// Poll interval announced in Bluetooth output headers
pub const BT_POLL_INTERVAL_MS: u8 = 4;

/// Returns the size of the Bluetooth report with the given id, if the id
/// belongs to the Bluetooth report family (0x11-0x19).
pub fn bt_report_size(report_id: u8) -> Option<usize> {
    match report_id {
        0x11..=0x18 => Some(INPUT_REPORT_BT_SIZE + 64 * (report_id - INPUT_REPORT_BT) as usize),
        BT_REPORT_LAST => Some(MAX_REPORT_SIZE),
        _ => None,
    }
}

/// Sticks, buttons and triggers. This block opens every input report and is
/// all a reduced Bluetooth report carries.
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct PackedControllerData {
    // byte 0-3
    #[packed_field(bytes = "0")]
    pub joystick_l_x: u8,
    #[packed_field(bytes = "1")]
    pub joystick_l_y: u8,
    #[packed_field(bytes = "2")]
    pub joystick_r_x: u8,
    #[packed_field(bytes = "3")]
    pub joystick_r_y: u8,

    // byte 4
    #[packed_field(bits = "32")]
    pub triangle: bool,
    #[packed_field(bits = "33")]
    pub circle: bool,
    #[packed_field(bits = "34")]
    pub cross: bool,
    #[packed_field(bits = "35")]
    pub square: bool,
    #[packed_field(bits = "36..=39")]
    pub dpad: Integer<u8, packed_bits::Bits<4>>,

    // byte 5
    #[packed_field(bits = "40")]
    pub r3: bool,
    #[packed_field(bits = "41")]
    pub l3: bool,
    #[packed_field(bits = "42")]
    pub options: bool,
    #[packed_field(bits = "43")]
    pub share: bool,
    #[packed_field(bits = "44")]
    pub r2: bool,
    #[packed_field(bits = "45")]
    pub l2: bool,
    #[packed_field(bits = "46")]
    pub r1: bool,
    #[packed_field(bits = "47")]
    pub l1: bool,

    // byte 6
    #[packed_field(bits = "48..=53")]
    pub frame_counter: Integer<u8, packed_bits::Bits<6>>,
    #[packed_field(bits = "54")]
    pub touchpad: bool,
    #[packed_field(bits = "55")]
    pub ps: bool,

    // byte 7-8
    #[packed_field(bytes = "7")]
    pub l2_trigger: u8,
    #[packed_field(bytes = "8")]
    pub r2_trigger: u8,
}

impl Default for PackedControllerData {
    fn default() -> Self {
        Self {
            joystick_l_x: 128,
            joystick_l_y: 128,
            joystick_r_x: 128,
            joystick_r_y: 128,
            triangle: false,
            circle: false,
            cross: false,
            square: false,
            dpad: Integer::from_primitive(8),
            r3: false,
            l3: false,
            options: false,
            share: false,
            r2: false,
            l2: false,
            r1: false,
            l1: false,
            frame_counter: Default::default(),
            touchpad: false,
            ps: false,
            l2_trigger: 0,
            r2_trigger: 0,
        }
    }
}

/// Common input block shared by the full USB and Bluetooth input reports
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Default)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "32")]
pub struct PackedInputState {
    // byte 0-8
    #[packed_field(bytes = "0..=8")]
    pub controller: PackedControllerData,

    // byte 9-11
    #[packed_field(bytes = "9..=10", endian = "lsb")]
    pub timestamp: u16, // ~5.33us per tick, wraps
    #[packed_field(bytes = "11")]
    pub temperature: u8,

    // byte 12-23
    #[packed_field(bytes = "12..=13", endian = "lsb")]
    pub gyro_pitch: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "14..=15", endian = "lsb")]
    pub gyro_yaw: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "16..=17", endian = "lsb")]
    pub gyro_roll: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "18..=19", endian = "lsb")]
    pub accel_x: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "20..=21", endian = "lsb")]
    pub accel_y: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "22..=23", endian = "lsb")]
    pub accel_z: Integer<i16, packed_bits::Bits<16>>,

    // byte 24-28
    #[packed_field(bytes = "24..=28")]
    pub extension_data: [u8; 5],

    // byte 29
    #[packed_field(bits = "232")]
    pub plugged_extension: bool,
    #[packed_field(bits = "233")]
    pub plugged_mic: bool,
    #[packed_field(bits = "234")]
    pub plugged_headphones: bool,
    #[packed_field(bits = "235")]
    pub plugged_cable: bool,
    #[packed_field(bits = "236..=239")]
    pub battery_level: Integer<u8, packed_bits::Bits<4>>, // 0-8 on battery, 0-11 on cable

    // byte 30-31
    #[packed_field(bytes = "30")]
    pub status: u8,
    #[packed_field(bytes = "31")]
    pub _reserved: u8,
}

/// A single touch contact. Both 12-bit coordinates are split across the three
/// trailing bytes.
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "4")]
pub struct PackedTouchPoint {
    // byte 0
    // Set when no finger is touching
    #[packed_field(bits = "0")]
    pub inactive: bool,
    #[packed_field(bits = "1..=7")]
    pub tracking_id: Integer<u8, packed_bits::Bits<7>>,
    // byte 1
    #[packed_field(bytes = "1")]
    pub x_lo: u8,
    // byte 2
    #[packed_field(bits = "16..=19")]
    pub y_lo: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "20..=23")]
    pub x_hi: Integer<u8, packed_bits::Bits<4>>,
    // byte 3
    #[packed_field(bytes = "3")]
    pub y_hi: u8,
}

impl Default for PackedTouchPoint {
    fn default() -> Self {
        Self {
            inactive: true,
            tracking_id: Default::default(),
            x_lo: Default::default(),
            y_lo: Default::default(),
            x_hi: Default::default(),
            y_hi: Default::default(),
        }
    }
}

impl PackedTouchPoint {
    pub fn is_touching(&self) -> bool {
        !self.inactive
    }

    pub fn get_x(&self) -> u16 {
        let x_hi = self.x_hi.to_primitive() as u16;
        (x_hi << 8) | self.x_lo as u16
    }

    pub fn get_y(&self) -> u16 {
        let y_lo = self.y_lo.to_primitive() as u16;
        ((self.y_hi as u16) << 4) | y_lo
    }

    pub fn set_x(&mut self, x_raw: u16) {
        self.x_lo = (x_raw & 0x00FF) as u8;
        self.x_hi = Integer::from_primitive(((x_raw & 0x0F00) >> 8) as u8);
    }

    pub fn set_y(&mut self, y_raw: u16) {
        self.y_lo = Integer::from_primitive((y_raw & 0x000F) as u8);
        self.y_hi = ((y_raw & 0x0FF0) >> 4) as u8;
    }
}

/// One buffered touchpad sample: a counter and two contacts
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Default)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct PackedTouchFrame {
    #[packed_field(bytes = "0")]
    pub counter: u8,
    #[packed_field(bytes = "1..=8", element_size_bytes = "4")]
    pub points: [PackedTouchPoint; 2],
}

/// Bluetooth header bytes following the report id
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Default)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "2")]
pub struct PackedBluetoothFlags {
    // byte 0
    #[packed_field(bits = "0")]
    pub enable_hid: bool,
    #[packed_field(bits = "1")]
    pub enable_crc: bool,
    #[packed_field(bits = "2..=7")]
    pub poll_interval: Integer<u8, packed_bits::Bits<6>>,

    // byte 1
    #[packed_field(bits = "8")]
    pub enable_audio: bool,
    #[packed_field(bits = "9..=15")]
    pub audio_flags: Integer<u8, packed_bits::Bits<7>>,
}

/// Output block shared by the USB and Bluetooth output reports
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "22")]
pub struct PackedOutputState {
    // byte 0
    #[packed_field(bits = "0")]
    pub allow_speaker_volume: bool,
    #[packed_field(bits = "1")]
    pub allow_mic_volume: bool,
    #[packed_field(bits = "2")]
    pub allow_volume_right: bool,
    #[packed_field(bits = "3")]
    pub allow_volume_left: bool,
    #[packed_field(bits = "4")]
    pub _unkn_flag: bool,
    #[packed_field(bits = "5")]
    pub allow_flash: bool,
    #[packed_field(bits = "6")]
    pub allow_led_color: bool,
    #[packed_field(bits = "7")]
    pub allow_rumble: bool,

    // byte 1-2
    #[packed_field(bytes = "1")]
    pub secondary_flags: u8,
    #[packed_field(bytes = "2")]
    pub _reserved: u8,

    // byte 3-4
    #[packed_field(bytes = "3")]
    pub rumble_right: u8, // weak motor
    #[packed_field(bytes = "4")]
    pub rumble_left: u8, // strong motor

    // byte 5-9
    #[packed_field(bytes = "5")]
    pub led_red: u8,
    #[packed_field(bytes = "6")]
    pub led_green: u8,
    #[packed_field(bytes = "7")]
    pub led_blue: u8,
    #[packed_field(bytes = "8")]
    pub flash_on: u8, // ~10ms units
    #[packed_field(bytes = "9")]
    pub flash_off: u8,

    // byte 10-17
    #[packed_field(bytes = "10..=17")]
    pub extension_data: [u8; 8],

    // byte 18-21
    #[packed_field(bytes = "18")]
    pub volume_left: u8,
    #[packed_field(bytes = "19")]
    pub volume_right: u8,
    #[packed_field(bytes = "20")]
    pub volume_mic: u8,
    #[packed_field(bytes = "21")]
    pub volume_speaker: u8,
}

impl Default for PackedOutputState {
    fn default() -> Self {
        Self {
            allow_speaker_volume: false,
            allow_mic_volume: false,
            allow_volume_right: false,
            allow_volume_left: false,
            _unkn_flag: false,
            allow_flash: false,
            allow_led_color: false,
            allow_rumble: false,
            secondary_flags: OUTPUT_SECONDARY_FLAGS,
            _reserved: 0,
            rumble_right: 0,
            rumble_left: 0,
            led_red: 0,
            led_green: 0,
            led_blue: 0,
            flash_on: 0,
            flash_off: 0,
            extension_data: [0; 8],
            volume_left: 0,
            volume_right: 0,
            volume_mic: 0,
            volume_speaker: 0,
        }
    }
}

/// Calibration feature report (0x02 over USB, 0x05 over Bluetooth). The six
/// gyro extrema are stored in an order that depends on the firmware, so they
/// are kept positional here and interpreted by the calibration engine.
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq, Default)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "35")]
pub struct PackedCalibrationReport {
    #[packed_field(bytes = "0")]
    pub report_id: u8,

    // byte 1-6
    #[packed_field(bytes = "1..=2", endian = "lsb")]
    pub gyro_pitch_bias: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "3..=4", endian = "lsb")]
    pub gyro_yaw_bias: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "5..=6", endian = "lsb")]
    pub gyro_roll_bias: Integer<i16, packed_bits::Bits<16>>,

    // byte 7-18
    #[packed_field(bytes = "7..=8", endian = "lsb")]
    pub gyro_extremum_0: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "9..=10", endian = "lsb")]
    pub gyro_extremum_1: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "11..=12", endian = "lsb")]
    pub gyro_extremum_2: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "13..=14", endian = "lsb")]
    pub gyro_extremum_3: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "15..=16", endian = "lsb")]
    pub gyro_extremum_4: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "17..=18", endian = "lsb")]
    pub gyro_extremum_5: Integer<i16, packed_bits::Bits<16>>,

    // byte 19-22
    #[packed_field(bytes = "19..=20", endian = "lsb")]
    pub gyro_speed_plus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "21..=22", endian = "lsb")]
    pub gyro_speed_minus: Integer<i16, packed_bits::Bits<16>>,

    // byte 23-34
    #[packed_field(bytes = "23..=24", endian = "lsb")]
    pub accel_x_plus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "25..=26", endian = "lsb")]
    pub accel_x_minus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "27..=28", endian = "lsb")]
    pub accel_y_plus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "29..=30", endian = "lsb")]
    pub accel_y_minus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "31..=32", endian = "lsb")]
    pub accel_z_plus: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "33..=34", endian = "lsb")]
    pub accel_z_minus: Integer<i16, packed_bits::Bits<16>>,
}

impl PackedCalibrationReport {
    /// Gyro extrema in the order they appear in the report
    pub fn gyro_extrema(&self) -> [i16; 6] {
        [
            self.gyro_extremum_0.to_primitive(),
            self.gyro_extremum_1.to_primitive(),
            self.gyro_extremum_2.to_primitive(),
            self.gyro_extremum_3.to_primitive(),
            self.gyro_extremum_4.to_primitive(),
            self.gyro_extremum_5.to_primitive(),
        ]
    }
}
