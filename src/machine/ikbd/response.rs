use std::fmt;

use super::output::Delay;

/// Returned once the boot self test is complete. Only very early machines
/// shipped a 0xF0 ROM, and some programs wait for 0xF1 explicitly.
pub const IKBD_ROM_VERSION: u8 = 0xF1;

/// The two joystick ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stick {
    /// Port 0, shared with the mouse
    Zero = 0,
    /// Port 1, the default joystick port
    One = 1,
}

impl Stick {
    pub const ALL: [Stick; 2] = [Stick::Zero, Stick::One];

    pub fn index(self) -> usize {
        self as usize
    }

    fn header(self) -> u8 {
        match self {
            Stick::Zero => 0xFE,
            Stick::One => 0xFF,
        }
    }
}

/// Interrogation responses carried by a 0xF6 status packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReport {
    MouseAction(u8),
    MouseRelative,
    MouseAbsolute { max_x: u16, max_y: u16 },
    MouseKeycode { delta_x: u8, delta_y: u8 },
    MouseDisabled,
    MouseThreshold { x: u8, y: u8 },
    MouseScale { x: u8, y: u8 },
    /// Y=0 at the top (0x10) or at the bottom (0x0F)
    MouseVertical { origin_bottom: bool },
    MouseAvailable(bool),
    JoystickAuto,
    /// Any mode other than auto, monitoring included
    JoystickInterrogation,
    JoystickAvailable(bool),
}

impl StatusReport {
    /// Status byte followed by six parameter bytes, zero padded.
    fn payload(&self) -> [u8; 7] {
        match *self {
            StatusReport::MouseAction(action) => [0x07, action, 0, 0, 0, 0, 0],
            StatusReport::MouseRelative => [0x08, 0, 0, 0, 0, 0, 0],
            StatusReport::MouseAbsolute { max_x, max_y } => {
                let [x_hi, x_lo] = max_x.to_be_bytes();
                let [y_hi, y_lo] = max_y.to_be_bytes();
                [0x09, x_hi, x_lo, y_hi, y_lo, 0, 0]
            }
            StatusReport::MouseKeycode { delta_x, delta_y } => {
                [0x0A, delta_x, delta_y, 0, 0, 0, 0]
            }
            StatusReport::MouseDisabled => [0x12, 0, 0, 0, 0, 0, 0],
            StatusReport::MouseThreshold { x, y } => [0x0B, x, y, 0, 0, 0, 0],
            StatusReport::MouseScale { x, y } => [0x0C, x, y, 0, 0, 0, 0],
            StatusReport::MouseVertical { origin_bottom } => {
                [if origin_bottom { 0x0F } else { 0x10 }, 0, 0, 0, 0, 0, 0]
            }
            StatusReport::MouseAvailable(available) => {
                [if available { 0x00 } else { 0x12 }, 0, 0, 0, 0, 0, 0]
            }
            StatusReport::JoystickAuto => [0x14, 0, 0, 0, 0, 0, 0],
            StatusReport::JoystickInterrogation => [0x15, 0, 0, 0, 0, 0, 0],
            StatusReport::JoystickAvailable(available) => {
                [if available { 0x00 } else { 0x1A }, 0, 0, 0, 0, 0, 0]
            }
        }
    }
}

/// Packets sent from the IKBD to the host
#[derive(Clone, PartialEq, Eq)]
pub enum IkbdResponse {
    /// Boot complete
    RomVersion,
    /// Make (pressed) or break (released) code
    Key { code: u8, pressed: bool },
    /// Relative mouse movement, buttons in the low two header bits
    RelativeMouse { buttons: u8, dx: i8, dy: i8 },
    /// Absolute position with the button transitions since the last report
    AbsoluteMouse { buttons: u8, x: u16, y: u16 },
    /// Automatic joystick event
    Joystick { stick: Stick, state: u8 },
    /// Answer to a joystick interrogation
    JoystickInterrogate { stick0: u8, stick1: u8 },
    /// Monitoring sample: packed fire bits, then packed direction nibbles
    JoystickMonitor { fire: u8, directions: u8 },
    /// 0xF6 status packet
    Status(StatusReport),
}

impl IkbdResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            IkbdResponse::RomVersion => vec![IKBD_ROM_VERSION],
            IkbdResponse::Key { code, pressed } => {
                vec![if *pressed { *code & 0x7F } else { *code | 0x80 }]
            }
            IkbdResponse::RelativeMouse { buttons, dx, dy } => {
                vec![0xF8 | (buttons & 0x03), *dx as u8, *dy as u8]
            }
            IkbdResponse::AbsoluteMouse { buttons, x, y } => {
                let [x_hi, x_lo] = x.to_be_bytes();
                let [y_hi, y_lo] = y.to_be_bytes();
                vec![0xF7, *buttons, x_hi, x_lo, y_hi, y_lo]
            }
            IkbdResponse::Joystick { stick, state } => vec![stick.header(), *state],
            IkbdResponse::JoystickInterrogate { stick0, stick1 } => vec![0xFD, *stick0, *stick1],
            IkbdResponse::JoystickMonitor { fire, directions } => vec![*fire, *directions],
            IkbdResponse::Status(report) => {
                let mut bytes = Vec::with_capacity(8);
                bytes.push(0xF6);
                bytes.extend_from_slice(&report.payload());
                bytes
            }
        }
    }

    /// How long the real controller takes before the first byte goes out.
    pub fn delay(&self) -> Delay {
        match self {
            IkbdResponse::RomVersion => Delay::between(0, 3000),
            IkbdResponse::AbsoluteMouse { .. } => Delay::cycles(18000 - 7200),
            IkbdResponse::JoystickInterrogate { .. } => Delay::between(7500, 10000),
            IkbdResponse::Status(_) => Delay::between(7000, 7500),
            _ => Delay::NONE,
        }
    }
}

impl fmt::Debug for IkbdResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IkbdResponse::Status(report) => write!(f, "Status({report:?})")?,
            IkbdResponse::RelativeMouse { buttons, dx, dy } => {
                write!(f, "RelativeMouse(buttons={buttons:02b}, {dx:+}, {dy:+})")?
            }
            IkbdResponse::AbsoluteMouse { buttons, x, y } => {
                write!(f, "AbsoluteMouse(buttons={buttons:04b}, {x}, {y})")?
            }
            other => {
                write!(f, "{:02X?}", other.to_bytes())?;
            }
        }
        Ok(())
    }
}
