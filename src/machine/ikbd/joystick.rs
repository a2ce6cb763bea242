//! Joystick report engine and the joystick ports it samples.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, trace};

use super::output::OutputBuffer;
use super::response::{IkbdResponse, StatusReport, Stick};

pub const JOY_UP: u8 = 0x01;
pub const JOY_DOWN: u8 = 0x02;
pub const JOY_LEFT: u8 = 0x04;
pub const JOY_RIGHT: u8 = 0x08;
pub const JOY_FIRE: u8 = 0x80;

/// Pin masks of a joystick wired to a GPIO port, active high after
/// inversion.
pub mod gpio {
    pub const RIGHT: u8 = 0x01;
    pub const LEFT: u8 = 0x02;
    pub const DOWN: u8 = 0x08;
    pub const FIRE: u8 = 0x10;
    pub const UP: u8 = 0x20;
}

/// Convert GPIO pin state into the IKBD joystick bitmask.
pub fn from_gpio(pins: u8) -> u8 {
    const MAP: [(u8, u8); 5] = [
        (gpio::UP, JOY_UP),
        (gpio::DOWN, JOY_DOWN),
        (gpio::LEFT, JOY_LEFT),
        (gpio::RIGHT, JOY_RIGHT),
        (gpio::FIRE, JOY_FIRE),
    ];
    MAP.iter()
        .filter(|(pin, _)| pins & pin != 0)
        .fold(0, |state, (_, bit)| state | bit)
}

/// Something that can be sampled for the current stick state.
pub trait JoystickSource {
    /// IKBD bitmask: direction bits in the low nibble, fire in bit 7
    fn read(&self, stick: Stick) -> u8;
}

/// Joystick state written by an input thread and sampled by the IKBD.
#[derive(Debug, Default)]
pub struct JoystickPorts {
    sticks: [AtomicU8; 2],
}

impl JoystickPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stick: Stick, state: u8) {
        self.sticks[stick.index()].store(state, Ordering::Relaxed);
    }

    pub fn set_gpio(&self, stick: Stick, pins: u8) {
        self.set(stick, from_gpio(pins));
    }
}

impl JoystickSource for JoystickPorts {
    fn read(&self, stick: Stick) -> u8 {
        self.sticks[stick.index()].load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoystickMode {
    Off,
    #[default]
    Auto,
    /// Sample rate in hundredths of a second
    Monitoring { rate: u8 },
}

#[derive(Debug, Default)]
pub struct Joystick {
    mode: JoystickMode,
    /// This frame's sample, after fire button aliasing
    data: [u8; 2],
    /// Last state sent in auto mode
    prev: [u8; 2],
}

impl Joystick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mode(&self) -> JoystickMode {
        self.mode
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self.mode, JoystickMode::Monitoring { .. })
    }

    pub fn set_mode(&mut self, mode: JoystickMode) {
        let mode = match mode {
            JoystickMode::Monitoring { rate: 0 } => JoystickMode::Monitoring { rate: 1 },
            mode => mode,
        };
        if self.mode != mode {
            debug!("IKBD: joystick mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Sample both sticks. Stick 0 shares its port with the mouse and reads
    /// as idle unless `read_stick0` is set.
    pub fn sample(&mut self, source: &dyn JoystickSource, read_stick0: bool) {
        self.data[Stick::One.index()] = source.read(Stick::One);
        self.data[Stick::Zero.index()] = if read_stick0 {
            source.read(Stick::Zero)
        } else {
            0
        };
    }

    #[cfg(test)]
    pub fn data(&self, stick: Stick) -> u8 {
        self.data[stick.index()]
    }

    pub fn press_fire(&mut self, stick: Stick) {
        self.data[stick.index()] |= JOY_FIRE;
    }

    /// Remove the fire button from the sample, returning whether it was down.
    pub fn take_fire(&mut self, stick: Stick) -> bool {
        let fire = self.data[stick.index()] & JOY_FIRE != 0;
        self.data[stick.index()] &= !JOY_FIRE;
        fire
    }

    /// Force the next auto report for both sticks.
    pub fn forget_sent(&mut self) {
        self.prev = [0; 2];
    }

    /// Report each stick whose state changed since it was last sent.
    pub fn send_auto(&mut self, output: &mut OutputBuffer) {
        for stick in Stick::ALL {
            let state = self.data[stick.index()];
            if state == self.prev[stick.index()] {
                continue;
            }
            let packet = IkbdResponse::Joystick { stick, state };
            trace!("IKBD: {:?}", packet);
            output.try_enqueue(&packet.to_bytes());
            // Even when dropped
            self.prev[stick.index()] = state;
        }
    }

    pub fn send_monitoring(&self, output: &mut OutputBuffer) {
        let [stick0, stick1] = self.data;
        let packet = IkbdResponse::JoystickMonitor {
            fire: ((stick0 & JOY_FIRE) >> 6) | ((stick1 & JOY_FIRE) >> 7),
            directions: ((stick0 & 0x0F) << 4) | (stick1 & 0x0F),
        };
        output.try_enqueue(&packet.to_bytes());
    }

    /// Answer a joystick interrogation with the raw port state.
    pub fn interrogate(&self, source: &dyn JoystickSource, output: &mut OutputBuffer) {
        let packet = IkbdResponse::JoystickInterrogate {
            stick0: source.read(Stick::Zero),
            stick1: source.read(Stick::One),
        };
        trace!("IKBD: {:?}", packet);
        output.try_enqueue_delayed(&packet.to_bytes(), packet.delay());
    }

    pub fn mode_report(&self) -> StatusReport {
        match self.mode {
            JoystickMode::Auto => StatusReport::JoystickAuto,
            JoystickMode::Monitoring { .. } | JoystickMode::Off => {
                StatusReport::JoystickInterrogation
            }
        }
    }

    pub fn availability_report(&self) -> StatusReport {
        StatusReport::JoystickAvailable(self.mode != JoystickMode::Off)
    }
}
