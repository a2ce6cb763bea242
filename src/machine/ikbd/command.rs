//! Host to IKBD commands.
//!
//! The command set is documented in the "Intelligent Keyboard (ikbd)
//! Protocol" appendix of the Atari ST hardware reference. Each command has a
//! fixed length that includes the command byte itself.

use super::mouse::MouseAction;

/// Which handler a command byte selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Reset,
    SetMouseAction,
    RelativeMouse,
    AbsoluteMouse,
    MouseKeycodes,
    SetMouseThreshold,
    SetMouseScale,
    InterrogateMouse,
    LoadMousePosition,
    SetYAxisDown,
    SetYAxisUp,
    Resume,
    DisableMouse,
    Pause,
    JoystickAuto,
    JoystickInterrogationMode,
    InterrogateJoystick,
    JoystickMonitoring,
    FireButtonMonitoring,
    JoystickKeycodes,
    DisableJoysticks,
    ReportMouseAction,
    ReportMouseMode,
    ReportMouseThreshold,
    ReportMouseScale,
    ReportMouseVertical,
    ReportMouseAvailability,
    ReportJoystickMode,
    ReportJoystickAvailability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub code: u8,
    /// Total length, command byte included
    pub len: usize,
    pub kind: CommandKind,
}

const fn entry(code: u8, len: usize, kind: CommandKind) -> CommandEntry {
    CommandEntry { code, len, kind }
}

/// Known commands, searched in order. Any other first byte is a NOP.
pub const COMMANDS: &[CommandEntry] = &[
    entry(0x80, 2, CommandKind::Reset),
    entry(0x07, 2, CommandKind::SetMouseAction),
    entry(0x08, 1, CommandKind::RelativeMouse),
    entry(0x09, 5, CommandKind::AbsoluteMouse),
    entry(0x0A, 3, CommandKind::MouseKeycodes),
    entry(0x0B, 3, CommandKind::SetMouseThreshold),
    entry(0x0C, 3, CommandKind::SetMouseScale),
    entry(0x0D, 1, CommandKind::InterrogateMouse),
    entry(0x0E, 6, CommandKind::LoadMousePosition),
    entry(0x0F, 1, CommandKind::SetYAxisDown),
    entry(0x10, 1, CommandKind::SetYAxisUp),
    entry(0x11, 1, CommandKind::Resume),
    entry(0x12, 1, CommandKind::DisableMouse),
    entry(0x13, 1, CommandKind::Pause),
    entry(0x14, 1, CommandKind::JoystickAuto),
    entry(0x15, 1, CommandKind::JoystickInterrogationMode),
    entry(0x16, 1, CommandKind::InterrogateJoystick),
    entry(0x17, 2, CommandKind::JoystickMonitoring),
    entry(0x18, 1, CommandKind::FireButtonMonitoring),
    entry(0x19, 7, CommandKind::JoystickKeycodes),
    entry(0x1A, 1, CommandKind::DisableJoysticks),
    // Status inquiries (the set command with the top bit set)
    entry(0x87, 1, CommandKind::ReportMouseAction),
    entry(0x88, 1, CommandKind::ReportMouseMode),
    entry(0x89, 1, CommandKind::ReportMouseMode),
    entry(0x8A, 1, CommandKind::ReportMouseMode),
    entry(0x8B, 1, CommandKind::ReportMouseThreshold),
    entry(0x8C, 1, CommandKind::ReportMouseScale),
    entry(0x8F, 1, CommandKind::ReportMouseVertical),
    entry(0x90, 1, CommandKind::ReportMouseVertical),
    entry(0x92, 1, CommandKind::ReportMouseAvailability),
    entry(0x94, 1, CommandKind::ReportJoystickMode),
    entry(0x95, 1, CommandKind::ReportJoystickMode),
    entry(0x99, 1, CommandKind::ReportJoystickMode),
    entry(0x9A, 1, CommandKind::ReportJoystickAvailability),
];

impl CommandEntry {
    /// First entry for `code`, if any.
    pub fn lookup(code: u8) -> Option<&'static CommandEntry> {
        COMMANDS.iter().find(|entry| entry.code == code)
    }
}

/// Status inquiries, answered with a 0xF6 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    MouseAction,
    MouseMode,
    MouseThreshold,
    MouseScale,
    MouseVertical,
    MouseAvailability,
    JoystickMode,
    JoystickAvailability,
}

/// Commands sent from the host to the IKBD
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IkbdCommand {
    /// 0x80 followed by the reset parameter, which must be 0x01
    Reset(u8),
    SetMouseAction(MouseAction),
    RelativeMouse,
    /// Inclusive maxima, in scaled mouse clicks
    AbsoluteMouse { max_x: u16, max_y: u16 },
    /// Mouse clicks per cursor key
    MouseKeycodes { delta_x: u8, delta_y: u8 },
    SetMouseThreshold { x: u8, y: u8 },
    SetMouseScale { x: u8, y: u8 },
    InterrogateMouse,
    LoadMousePosition { x: u16, y: u16 },
    /// Y sign +1. PS/2 mice count up the other way from ST mice, so this
    /// leaves Y=0 at the top
    SetYAxisDown,
    /// Y sign -1. PS/2 mice count up the other way from ST mice, so this
    /// puts Y=0 at the bottom
    SetYAxisUp,
    Resume,
    DisableMouse,
    Pause,
    JoystickAuto,
    JoystickInterrogationMode,
    InterrogateJoystick,
    /// Sample rate in hundredths of a second
    JoystickMonitoring { rate: u8 },
    FireButtonMonitoring,
    /// RX, RY, TX, TY, VX, VY
    JoystickKeycodes([u8; 6]),
    DisableJoysticks,
    Report(ReportKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// More parameter bytes are needed
    Incomplete,
    /// The first byte is not a command; the IKBD ignores it
    Unknown(u8),
}

impl IkbdCommand {
    /// Returns the number of bytes this command occupies
    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self {
            IkbdCommand::Reset(_) => 2,
            IkbdCommand::SetMouseAction(_) => 2,
            IkbdCommand::AbsoluteMouse { .. } => 5,
            IkbdCommand::MouseKeycodes { .. } => 3,
            IkbdCommand::SetMouseThreshold { .. } => 3,
            IkbdCommand::SetMouseScale { .. } => 3,
            IkbdCommand::LoadMousePosition { .. } => 6,
            IkbdCommand::JoystickMonitoring { .. } => 2,
            IkbdCommand::JoystickKeycodes(_) => 7,
            _ => 1,
        }
    }

    /// Build the command for a table entry from its complete byte sequence.
    fn decode(kind: CommandKind, bytes: &[u8]) -> Self {
        let word = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        match kind {
            CommandKind::Reset => IkbdCommand::Reset(bytes[1]),
            CommandKind::SetMouseAction => IkbdCommand::SetMouseAction(MouseAction::new(bytes[1])),
            CommandKind::RelativeMouse => IkbdCommand::RelativeMouse,
            CommandKind::AbsoluteMouse => IkbdCommand::AbsoluteMouse {
                max_x: word(1),
                max_y: word(3),
            },
            CommandKind::MouseKeycodes => IkbdCommand::MouseKeycodes {
                delta_x: bytes[1],
                delta_y: bytes[2],
            },
            CommandKind::SetMouseThreshold => IkbdCommand::SetMouseThreshold {
                x: bytes[1],
                y: bytes[2],
            },
            CommandKind::SetMouseScale => IkbdCommand::SetMouseScale {
                x: bytes[1],
                y: bytes[2],
            },
            CommandKind::InterrogateMouse => IkbdCommand::InterrogateMouse,
            // bytes[1] is a filler
            CommandKind::LoadMousePosition => IkbdCommand::LoadMousePosition {
                x: word(2),
                y: word(4),
            },
            CommandKind::SetYAxisDown => IkbdCommand::SetYAxisDown,
            CommandKind::SetYAxisUp => IkbdCommand::SetYAxisUp,
            CommandKind::Resume => IkbdCommand::Resume,
            CommandKind::DisableMouse => IkbdCommand::DisableMouse,
            CommandKind::Pause => IkbdCommand::Pause,
            CommandKind::JoystickAuto => IkbdCommand::JoystickAuto,
            CommandKind::JoystickInterrogationMode => IkbdCommand::JoystickInterrogationMode,
            CommandKind::InterrogateJoystick => IkbdCommand::InterrogateJoystick,
            CommandKind::JoystickMonitoring => IkbdCommand::JoystickMonitoring { rate: bytes[1] },
            CommandKind::FireButtonMonitoring => IkbdCommand::FireButtonMonitoring,
            CommandKind::JoystickKeycodes => {
                let mut params = [0; 6];
                params.copy_from_slice(&bytes[1..7]);
                IkbdCommand::JoystickKeycodes(params)
            }
            CommandKind::DisableJoysticks => IkbdCommand::DisableJoysticks,
            CommandKind::ReportMouseAction => IkbdCommand::Report(ReportKind::MouseAction),
            CommandKind::ReportMouseMode => IkbdCommand::Report(ReportKind::MouseMode),
            CommandKind::ReportMouseThreshold => IkbdCommand::Report(ReportKind::MouseThreshold),
            CommandKind::ReportMouseScale => IkbdCommand::Report(ReportKind::MouseScale),
            CommandKind::ReportMouseVertical => IkbdCommand::Report(ReportKind::MouseVertical),
            CommandKind::ReportMouseAvailability => {
                IkbdCommand::Report(ReportKind::MouseAvailability)
            }
            CommandKind::ReportJoystickMode => IkbdCommand::Report(ReportKind::JoystickMode),
            CommandKind::ReportJoystickAvailability => {
                IkbdCommand::Report(ReportKind::JoystickAvailability)
            }
        }
    }
}

impl TryFrom<&[u8]> for IkbdCommand {
    type Error = CommandError;

    /// Parse a command from the start of `value`. Bytes beyond the
    /// command's length are not looked at.
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let Some(&code) = value.first() else {
            return Err(CommandError::Incomplete);
        };
        let Some(entry) = CommandEntry::lookup(code) else {
            return Err(CommandError::Unknown(code));
        };
        if value.len() < entry.len {
            return Err(CommandError::Incomplete);
        }
        Ok(IkbdCommand::decode(entry.kind, &value[..entry.len]))
    }
}

/// Size of the IKBD's command input buffer
pub const INPUT_BUFFER_SIZE: usize = 8;

/// Holds a command and its parameters while they arrive.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    bytes: [u8; INPUT_BUFFER_SIZE],
    len: usize,
}

impl CommandBuffer {
    /// Append a byte. Returns false (and drops the byte) when full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len == INPUT_BUFFER_SIZE {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}
