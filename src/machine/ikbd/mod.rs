//! # Atari ST IKBD emulator
//!
//! The HD6301 based "intelligent keyboard" controller of the Atari ST,
//! reproduced on the wire from PS/2 input. The protocol is described in the
//! "Intelligent Keyboard (ikbd) Protocol" document (Atari Corp., 1985), and
//! the undocumented behaviour follows what ST software is known to rely on.
//!
//! Input arrives from several threads (the serial link and the PS/2 ports)
//! as [`IkbdEvent`]s over a channel, and is applied by whoever owns the
//! [`Ikbd`], one event at a time.

use std::sync::{Arc, mpsc};
use std::time::Duration;

use bit_set::BitSet;
use tracing::{debug, trace};

pub mod command;
pub mod joystick;
pub mod mouse;
pub mod output;
pub mod reset;
pub mod response;

use command::{CommandBuffer, CommandError, IkbdCommand, ReportKind};
use joystick::{Joystick, JoystickMode, JoystickSource};
use mouse::{ButtonSource, Mouse, MouseMode};
use output::{DelayMode, OutputBuffer};
use reset::{BOOT_WINDOW, ResetState};
use response::{IkbdResponse, StatusReport, Stick};

#[derive(Debug, Clone, Copy)]
pub struct IkbdConfig {
    /// Length of the self test after a reset
    pub boot_window: Duration,
    pub delay_mode: DelayMode,
}

impl Default for IkbdConfig {
    fn default() -> Self {
        Self {
            boot_window: BOOT_WINDOW,
            delay_mode: DelayMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkbdEvent {
    /// A byte from the host ACIA
    HostByte(u8),
    /// ST scan code transition
    Key { code: u8, pressed: bool },
    /// Motion in ST screen sense (down is positive) and button levels
    Mouse {
        dx: i32,
        dy: i32,
        left: bool,
        right: bool,
    },
}

/// Queues events for the IKBD from any thread.
#[derive(Clone)]
pub struct IkbdSender {
    send: mpsc::Sender<IkbdEvent>,
}

impl IkbdSender {
    fn new(send: mpsc::Sender<IkbdEvent>) -> Self {
        Self { send }
    }

    pub fn send(&self, event: IkbdEvent) {
        _ = self.send.send(event);
    }

    pub fn send_host_byte(&self, byte: u8) {
        self.send(IkbdEvent::HostByte(byte));
    }

    pub fn send_key(&self, code: u8, pressed: bool) {
        self.send(IkbdEvent::Key { code, pressed });
    }

    pub fn send_mouse(&self, dx: i32, dy: i32, left: bool, right: bool) {
        self.send(IkbdEvent::Mouse {
            dx,
            dy,
            left,
            right,
        });
    }
}

pub struct Ikbd {
    output: OutputBuffer,
    input: CommandBuffer,
    /// ST scan codes currently held down
    keys: BitSet,
    mouse: Mouse,
    joystick: Joystick,
    boot: ResetState,
    joysticks: Arc<dyn JoystickSource + Send + Sync>,
    send: mpsc::Sender<IkbdEvent>,
    recv: mpsc::Receiver<IkbdEvent>,
}

impl Ikbd {
    /// Power on. The controller starts in its self test.
    pub fn new(config: IkbdConfig, joysticks: Arc<dyn JoystickSource + Send + Sync>) -> Self {
        let (send, recv) = mpsc::channel();
        let mut ikbd = Self {
            output: OutputBuffer::new(config.delay_mode),
            input: CommandBuffer::default(),
            keys: BitSet::with_capacity(128),
            mouse: Mouse::new(),
            joystick: Joystick::new(),
            boot: ResetState::new(config.boot_window),
            joysticks,
            send,
            recv,
        };
        ikbd.reset(true);
        ikbd
    }

    pub fn sender(&self) -> IkbdSender {
        IkbdSender::new(self.send.clone())
    }

    #[cfg(test)]
    pub fn is_booting(&self) -> bool {
        self.boot.is_booting()
    }

    #[cfg(test)]
    pub fn mouse_mode(&self) -> MouseMode {
        self.mouse.mode()
    }

    #[cfg(test)]
    pub fn joystick_mode(&self) -> JoystickMode {
        self.joystick.mode()
    }

    #[cfg(test)]
    pub fn mouse_position(&self) -> (u16, u16) {
        self.mouse.position()
    }

    #[cfg(test)]
    pub fn is_key_down(&self, code: u8) -> bool {
        self.keys.contains((code & 0x7F) as usize)
    }

    /// Run the boot ROM. A cold reset also clears the clock.
    pub fn reset(&mut self, cold: bool) {
        self.mouse.reset();
        self.joystick.reset();
        self.keys.clear();
        self.input.clear();
        self.output.clear();
        self.output.set_muted(true);
        self.boot.boot(cold);
    }

    /// Let time pass: runs the boot timer and releases deferred output.
    pub fn elapse(&mut self, dt: Duration) {
        self.output.elapse(dt);
        if self.boot.elapse(dt) {
            self.output.set_muted(false);
            let response = IkbdResponse::RomVersion;
            self.output
                .try_enqueue_delayed(&response.to_bytes(), response.delay());
        }
    }

    /// Apply every queued event.
    pub fn pump(&mut self) {
        while let Ok(event) = self.recv.try_recv() {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: IkbdEvent) {
        match event {
            IkbdEvent::HostByte(byte) => self.submit_host_byte(byte),
            IkbdEvent::Key { code, pressed } => self.on_key_transition(code, pressed),
            IkbdEvent::Mouse {
                dx,
                dy,
                left,
                right,
            } => self.on_mouse_input(dx, dy, left, right),
        }
    }

    /// Next byte for the host, if one is ready.
    pub fn pop_output(&mut self) -> Option<u8> {
        self.output.pop()
    }

    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Feed one byte from the host.
    pub fn submit_host_byte(&mut self, byte: u8) {
        if !self.input.push(byte) {
            trace!("IKBD: input buffer full, dropping {:02X}", byte);
        }

        match IkbdCommand::try_from(self.input.as_slice()) {
            Ok(command) => {
                self.input.clear();
                self.output.resume();
                self.execute(command);
            }
            Err(CommandError::Incomplete) => {}
            Err(CommandError::Unknown(code)) => {
                trace!("IKBD: unknown command {:02X}", code);
                self.input.clear();
            }
        }
    }

    pub fn execute(&mut self, command: IkbdCommand) {
        trace!("IKBD: Command {:?}", command);
        match command {
            IkbdCommand::Reset(0x01) => self.reset(false),
            IkbdCommand::Reset(param) => trace!("IKBD: reset ignored, param {:02X}", param),
            IkbdCommand::SetMouseAction(action) => self.mouse.set_action(action),
            IkbdCommand::RelativeMouse => {
                self.mouse.set_mode(MouseMode::Relative);
                self.boot.note_relative_mouse();
            }
            IkbdCommand::AbsoluteMouse { max_x, max_y } => self.mouse.set_absolute(max_x, max_y),
            IkbdCommand::MouseKeycodes { delta_x, delta_y } => {
                self.mouse.set_keycode(delta_x, delta_y)
            }
            IkbdCommand::SetMouseThreshold { x, y } => self.mouse.set_threshold(x, y),
            IkbdCommand::SetMouseScale { x, y } => self.mouse.set_scale(x, y),
            IkbdCommand::InterrogateMouse => self.mouse.interrogate(&mut self.output),
            IkbdCommand::LoadMousePosition { x, y } => self.mouse.load_position(x, y),
            IkbdCommand::SetYAxisDown => self.mouse.set_y_axis(1),
            IkbdCommand::SetYAxisUp => self.mouse.set_y_axis(-1),
            IkbdCommand::Resume => self.output.resume(),
            IkbdCommand::DisableMouse => {
                self.mouse.set_mode(MouseMode::Off);
                if self.boot.note_mouse_disabled() {
                    self.enable_both();
                }
            }
            IkbdCommand::Pause => {
                if self.boot.is_booting() {
                    trace!("IKBD: pause ignored during reset");
                } else {
                    self.output.pause();
                }
            }
            IkbdCommand::JoystickAuto => {
                self.joystick.set_mode(JoystickMode::Auto);
                self.mouse.set_mode(MouseMode::Off);
                if self.boot.joystick_auto_keeps_mouse() {
                    self.mouse.set_mode(MouseMode::Relative);
                }
                // Some games expect a report right away
                self.joystick.forget_sent();
                self.sample_joysticks();
                self.joystick.send_auto(&mut self.output);
            }
            IkbdCommand::JoystickInterrogationMode => self.joystick.set_mode(JoystickMode::Off),
            IkbdCommand::InterrogateJoystick => self
                .joystick
                .interrogate(self.joysticks.as_ref(), &mut self.output),
            IkbdCommand::JoystickMonitoring { rate } => {
                self.joystick.set_mode(JoystickMode::Monitoring { rate });
                self.mouse.set_mode(MouseMode::Off);
            }
            IkbdCommand::FireButtonMonitoring | IkbdCommand::JoystickKeycodes(_) => {
                debug!("IKBD: {:?} not implemented", command);
            }
            IkbdCommand::DisableJoysticks => {
                self.joystick.set_mode(JoystickMode::Off);
                if self.boot.note_joystick_disabled() {
                    self.enable_both();
                }
            }
            IkbdCommand::Report(kind) => self.report(kind),
        }
    }

    fn enable_both(&mut self) {
        self.mouse.set_mode(MouseMode::Relative);
        self.joystick.set_mode(JoystickMode::Auto);
    }

    fn report(&mut self, kind: ReportKind) {
        let report = match kind {
            ReportKind::MouseAction => self.mouse.action_report(),
            ReportKind::MouseMode => self.mouse.mode_report(),
            ReportKind::MouseThreshold => self.mouse.threshold_report(),
            ReportKind::MouseScale => self.mouse.scale_report(),
            ReportKind::MouseVertical => self.mouse.vertical_report(),
            ReportKind::MouseAvailability => self.mouse.availability_report(),
            ReportKind::JoystickMode => self.joystick.mode_report(),
            ReportKind::JoystickAvailability => self.joystick.availability_report(),
        };
        self.send_status(report);
    }

    fn send_status(&mut self, report: StatusReport) {
        let response = IkbdResponse::Status(report);
        trace!("IKBD: Sending {:?}", response);
        self.output
            .try_enqueue_delayed(&response.to_bytes(), response.delay());
    }

    /// A key went down or up. `code` is an ST scan code.
    pub fn on_key_transition(&mut self, code: u8, pressed: bool) {
        let code = code & 0x7F;
        if pressed {
            self.keys.insert(code as usize);
        } else {
            self.keys.remove(code as usize);
        }

        if self.joystick.is_monitoring() {
            return;
        }
        let response = IkbdResponse::Key { code, pressed };
        trace!("IKBD: {:?}", response);
        self.output.try_enqueue(&response.to_bytes());
    }

    /// Motion and button levels from the mouse.
    pub fn on_mouse_input(&mut self, dx: i32, dy: i32, left: bool, right: bool) {
        self.mouse.add_motion(dx, dy);
        self.mouse.set_left(ButtonSource::Mouse, left);
        self.mouse.set_right(ButtonSource::Mouse, right);
    }

    fn sample_joysticks(&mut self) {
        // Joystick 0 shares its port with the mouse
        let read_stick0 = self.mouse.mode() == MouseMode::Off
            || (self.boot.both_enabled() && self.mouse.mode() == MouseMode::Relative);
        self.joystick.sample(self.joysticks.as_ref(), read_stick0);
    }

    /// The right mouse button and joystick 1 fire share a line.
    fn duplicate_fire_buttons(&mut self) {
        if self.mouse.mode() == MouseMode::Off {
            if self.mouse.right().is_held_by(ButtonSource::Mouse) {
                self.joystick.press_fire(Stick::One);
            }
            if self.mouse.left().is_held_by(ButtonSource::Mouse) {
                self.joystick.press_fire(Stick::Zero);
            }
        } else {
            let fire = self.joystick.take_fire(Stick::One);
            self.mouse.set_right(ButtonSource::Joystick, fire);
        }
    }

    /// Once per host frame: automatic mouse and joystick reports.
    pub fn on_tick(&mut self) {
        if self.boot.is_booting() {
            return;
        }

        self.sample_joysticks();
        self.duplicate_fire_buttons();
        self.mouse.update_position();
        let buttons_sent_as_keys = self.mouse.on_action(&mut self.output);

        if self.joystick.is_monitoring() {
            self.joystick.send_monitoring(&mut self.output);
            self.mouse.discard_motion();
            return;
        }

        if self.joystick.mode() == JoystickMode::Auto {
            self.joystick.send_auto(&mut self.output);
        }
        if buttons_sent_as_keys {
            // No motion packets this frame, and none owed for it later
            self.mouse.discard_motion();
            return;
        }
        match self.mouse.mode() {
            MouseMode::Relative => self.mouse.send_relative(&mut self.output),
            MouseMode::Keycode => self.mouse.send_keycodes(&mut self.output),
            MouseMode::Off | MouseMode::Absolute => self.mouse.discard_motion(),
        }
        self.mouse.commit_buttons();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use super::joystick::{JOY_FIRE, JOY_LEFT, JOY_UP, JoystickPorts};
    use super::output::OUTPUT_BUFFER_SIZE;

    fn ikbd() -> (Ikbd, Arc<JoystickPorts>) {
        let ports = Arc::new(JoystickPorts::new());
        let ikbd = Ikbd::new(IkbdConfig::default(), ports.clone());
        (ikbd, ports)
    }

    /// Powered on with the self test complete and 0xF1 read.
    fn booted() -> (Ikbd, Arc<JoystickPorts>) {
        let (mut ikbd, ports) = ikbd();
        ikbd.elapse(BOOT_WINDOW);
        assert_eq!(drain(&mut ikbd), hex!("F1"));
        (ikbd, ports)
    }

    fn send(ikbd: &mut Ikbd, bytes: &[u8]) {
        for &byte in bytes {
            ikbd.submit_host_byte(byte);
        }
    }

    fn drain(ikbd: &mut Ikbd) -> Vec<u8> {
        std::iter::from_fn(|| ikbd.pop_output()).collect()
    }

    #[test]
    fn test_power_on_sends_rom_version_once() {
        let (mut ikbd, _) = ikbd();
        assert!(ikbd.is_booting());
        ikbd.on_key_transition(0x1E, true);
        ikbd.on_tick();
        assert!(drain(&mut ikbd).is_empty());

        ikbd.elapse(Duration::from_millis(30));
        assert!(drain(&mut ikbd).is_empty());
        ikbd.elapse(Duration::from_millis(40));
        assert_eq!(drain(&mut ikbd), hex!("F1"));
        ikbd.elapse(Duration::from_secs(1));
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_unknown_commands_are_silent() {
        let (mut ikbd, _) = booted();
        for byte in [0x00, 0x01, 0x1B, 0x20, 0x42, 0x7F, 0x81, 0x91, 0xF0, 0xFF] {
            ikbd.submit_host_byte(byte);
            assert!(ikbd.input.is_empty(), "{byte:02X}");
        }
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_partial_command_waits() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x0B, 0x05]);
        assert_eq!(ikbd.input.len(), 2);
        send(&mut ikbd, &[0x06]);
        assert!(ikbd.input.is_empty());
        send(&mut ikbd, &[0x8B]);
        assert_eq!(drain(&mut ikbd), hex!("F6 0B 05 06 00 00 00 00"));
    }

    #[test]
    fn test_reset_restores_defaults_and_mutes() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("09 01 40 00 C8  15"));
        assert_eq!(ikbd.mouse_mode(), MouseMode::Absolute);
        assert_eq!(ikbd.joystick_mode(), JoystickMode::Off);
        ikbd.on_key_transition(0x10, true);

        send(&mut ikbd, &hex!("80 01"));
        assert!(ikbd.is_booting());
        assert_eq!(ikbd.mouse_mode(), MouseMode::Relative);
        assert_eq!(ikbd.joystick_mode(), JoystickMode::Auto);
        assert!(!ikbd.is_key_down(0x10));
        // Pending output is gone, and nothing new gets out
        assert!(drain(&mut ikbd).is_empty());
        ikbd.on_key_transition(0x10, false);
        send(&mut ikbd, &hex!("87"));
        assert!(drain(&mut ikbd).is_empty());

        ikbd.elapse(BOOT_WINDOW);
        assert_eq!(drain(&mut ikbd), hex!("F1"));
        ikbd.elapse(BOOT_WINDOW);
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_malformed_reset_ignored() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("08 80 02"));
        assert!(!ikbd.is_booting());
        assert!(ikbd.input.is_empty());
        ikbd.on_key_transition(0x39, true);
        assert_eq!(drain(&mut ikbd), hex!("39"));
    }

    #[test]
    fn test_key_make_and_break() {
        let (mut ikbd, _) = booted();
        ikbd.on_key_transition(0x1E, true);
        assert!(ikbd.is_key_down(0x1E));
        ikbd.on_key_transition(0x1E, false);
        assert!(!ikbd.is_key_down(0x1E));
        assert_eq!(drain(&mut ikbd), hex!("1E 9E"));
    }

    #[test]
    fn test_pause_and_resume() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x13]);
        ikbd.on_key_transition(0x1E, true);
        assert!(drain(&mut ikbd).is_empty());

        // Any command resumes output
        send(&mut ikbd, &[0x0B, 0x01, 0x01]);
        ikbd.on_key_transition(0x1E, false);
        assert_eq!(drain(&mut ikbd), hex!("9E"));

        send(&mut ikbd, &[0x13, 0x11]);
        ikbd.on_key_transition(0x1F, true);
        assert_eq!(drain(&mut ikbd), hex!("1F"));
    }

    #[test]
    fn test_pause_ignored_during_reset() {
        let (mut ikbd, _) = ikbd();
        send(&mut ikbd, &[0x13]);
        ikbd.elapse(BOOT_WINDOW);
        assert_eq!(drain(&mut ikbd), hex!("F1"));
    }

    #[test]
    fn test_relative_threshold_and_convergence() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x0B, 0x08, 0x08]);
        for _ in 0..3 {
            ikbd.on_mouse_input(2, 0, false, false);
            ikbd.on_tick();
        }
        assert!(drain(&mut ikbd).is_empty());

        ikbd.on_mouse_input(2, 0, false, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("F8 08 00"));

        for _ in 0..5 {
            ikbd.on_tick();
        }
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_relative_large_motion_adds_up() {
        let (mut ikbd, _) = booted();
        for _ in 0..200 {
            ikbd.on_mouse_input(5, 0, false, false);
        }
        ikbd.on_tick();
        let bytes = drain(&mut ikbd);
        let packets: Vec<&[u8]> = bytes.chunks(3).collect();
        assert!(packets.len() > 1);
        let mut total = 0;
        for packet in &packets {
            assert_eq!(packet[0], 0xF8);
            total += packet[1] as i8 as i32;
        }
        assert_eq!(total, 1000);

        ikbd.on_tick();
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_relative_one_input_per_frame() {
        let (mut ikbd, _) = booted();
        let mut total = 0;
        for _ in 0..200 {
            ikbd.on_mouse_input(5, 0, false, false);
            ikbd.on_tick();
            let packet = drain(&mut ikbd);
            assert_eq!(packet, hex!("F8 05 00"));
            total += packet[1] as i32;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_buttons_as_keys_skip_motion() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("07 04"));
        ikbd.on_mouse_input(0, 0, true, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("74"));

        ikbd.on_mouse_input(20, 0, false, true);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("F4 75"));

        // Motion from a key frame is not owed later
        ikbd.on_tick();
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_y_axis_commands() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("10"));
        ikbd.on_mouse_input(0, 5, false, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("F8 00 FB"));

        send(&mut ikbd, &hex!("0F"));
        ikbd.on_mouse_input(0, 5, false, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("F8 00 05"));
    }

    #[test]
    fn test_absolute_position_scenario() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("09 01 40 00 C8"));
        send(&mut ikbd, &hex!("0E 00 00 50 00 64"));
        send(&mut ikbd, &hex!("0D"));
        assert_eq!(drain(&mut ikbd), hex!("F7 00 00 50 00 64"));
    }

    #[test]
    fn test_absolute_position_clamps() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("09 00 64 00 32"));
        send(&mut ikbd, &hex!("0E 00 00 0A 00 0A"));
        ikbd.on_mouse_input(-50, -50, false, false);
        ikbd.on_tick();
        assert_eq!(ikbd.mouse_position(), (0, 0));
        ikbd.on_mouse_input(1000, 1000, false, false);
        ikbd.on_tick();
        assert_eq!(ikbd.mouse_position(), (100, 50));
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_disable_both_during_reset_quirk() {
        let (mut ikbd, _) = ikbd();
        send(&mut ikbd, &[0x12, 0x1A]);
        assert_eq!(ikbd.mouse_mode(), MouseMode::Relative);
        assert_eq!(ikbd.joystick_mode(), JoystickMode::Auto);
    }

    #[test]
    fn test_disable_both_after_reset() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x12, 0x1A]);
        assert_eq!(ikbd.mouse_mode(), MouseMode::Off);
        assert_eq!(ikbd.joystick_mode(), JoystickMode::Off);
    }

    #[test]
    fn test_mouse_and_joystick_together_after_reset() {
        let (mut ikbd, ports) = ikbd();
        send(&mut ikbd, &[0x08, 0x14]);
        assert_eq!(ikbd.mouse_mode(), MouseMode::Relative);
        assert_eq!(ikbd.joystick_mode(), JoystickMode::Auto);
        ikbd.elapse(BOOT_WINDOW);
        assert_eq!(drain(&mut ikbd), hex!("F1"));

        // Joystick 0 is read alongside the mouse
        ports.set(Stick::Zero, JOY_UP);
        ikbd.on_mouse_input(3, 0, false, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("FE 01 F8 03 00"));
    }

    #[test]
    fn test_joystick_auto_after_reset_turns_mouse_off() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x08, 0x14]);
        assert_eq!(ikbd.mouse_mode(), MouseMode::Off);
    }

    #[test]
    fn test_joystick_auto_reports_immediately() {
        let (mut ikbd, ports) = booted();
        ports.set(Stick::One, JOY_LEFT);
        ports.set(Stick::Zero, JOY_UP);
        send(&mut ikbd, &[0x14]);
        assert_eq!(drain(&mut ikbd), hex!("FE 01 FF 04"));

        ikbd.on_tick();
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_joystick_fire_becomes_right_button() {
        let (mut ikbd, ports) = booted();
        ports.set(Stick::One, JOY_FIRE | JOY_UP);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("FF 01 F9 00 00"));

        ports.set(Stick::One, 0);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("FF 00 F8 00 00"));
    }

    #[test]
    fn test_mouse_buttons_become_fire_when_mouse_off() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x12]);
        ikbd.on_mouse_input(0, 0, false, true);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("FF 80"));

        ikbd.on_mouse_input(0, 0, true, false);
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("FE 80 FF 00"));
    }

    #[test]
    fn test_monitoring_mode() {
        let (mut ikbd, ports) = booted();
        send(&mut ikbd, &[0x17, 0x00]);
        assert_eq!(ikbd.mouse_mode(), MouseMode::Off);
        assert_eq!(
            ikbd.joystick_mode(),
            JoystickMode::Monitoring { rate: 1 }
        );

        ports.set(Stick::One, JOY_FIRE | JOY_LEFT);
        ikbd.on_tick();
        ikbd.on_tick();
        assert_eq!(drain(&mut ikbd), hex!("01 04 01 04"));

        // Keys are tracked but not reported
        ikbd.on_key_transition(0x39, true);
        assert!(ikbd.is_key_down(0x39));
        assert!(drain(&mut ikbd).is_empty());

        // Monitoring answers like interrogation mode
        send(&mut ikbd, &[0x94]);
        assert_eq!(drain(&mut ikbd), hex!("F6 15 00 00 00 00 00 00"));
    }

    #[test]
    fn test_interrogate_joystick() {
        let (mut ikbd, ports) = booted();
        ports.set(Stick::Zero, JOY_FIRE);
        ports.set(Stick::One, JOY_UP);
        send(&mut ikbd, &[0x15, 0x16]);
        assert_eq!(drain(&mut ikbd), hex!("FD 80 01"));

        // Interrogation mode sends nothing by itself
        ikbd.on_tick();
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_interrogation_flood_keeps_whole_packets() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &[0x15]);
        for _ in 0..200 {
            send(&mut ikbd, &[0x16]);
        }
        assert_eq!(ikbd.pending_output(), OUTPUT_BUFFER_SIZE / 3 * 3);
        let bytes = drain(&mut ikbd);
        assert!(bytes.chunks(3).all(|packet| packet == hex!("FD 00 00")));
    }

    #[test]
    fn test_unimplemented_commands_are_silent() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("18  19 01 02 03 04 05 06"));
        assert!(ikbd.input.is_empty());
        assert!(drain(&mut ikbd).is_empty());
    }

    #[test]
    fn test_status_reports() {
        let (mut ikbd, _) = booted();
        send(&mut ikbd, &hex!("88 92 9A 94 8F"));
        assert_eq!(
            drain(&mut ikbd),
            hex!(
                "F6 08 00 00 00 00 00 00"
                "F6 00 00 00 00 00 00 00"
                "F6 00 00 00 00 00 00 00"
                "F6 14 00 00 00 00 00 00"
                "F6 10 00 00 00 00 00 00"
            )
        );

        send(&mut ikbd, &hex!("0A 03 04  10  07 01  0C 02 02  89 90 87 8C"));
        assert_eq!(
            drain(&mut ikbd),
            hex!(
                "F6 0A 03 04 00 00 00 00"
                "F6 0F 00 00 00 00 00 00"
                "F6 07 01 00 00 00 00 00"
                "F6 0C 02 02 00 00 00 00"
            )
        );

        send(&mut ikbd, &hex!("12 1A  8A 92 95 9A"));
        assert_eq!(
            drain(&mut ikbd),
            hex!(
                "F6 12 00 00 00 00 00 00"
                "F6 12 00 00 00 00 00 00"
                "F6 15 00 00 00 00 00 00"
                "F6 1A 00 00 00 00 00 00"
            )
        );
    }

    #[test]
    fn test_events_through_sender() {
        let (mut ikbd, _) = booted();
        let sender = ikbd.sender();
        let thread = std::thread::spawn(move || {
            sender.send_key(0x2A, true);
            sender.send_mouse(4, -4, true, false);
            sender.send_host_byte(0x87);
        });
        thread.join().unwrap();
        ikbd.pump();
        ikbd.on_tick();
        assert_eq!(
            drain(&mut ikbd),
            hex!("2A F6 07 00 00 00 00 00 00 FA 04 FC")
        );
    }

    // Delayed responses are queued immediately unless deferred delivery is
    // configured.
    #[test]
    fn test_deferred_delivery() {
        let ports = Arc::new(JoystickPorts::new());
        let config = IkbdConfig {
            delay_mode: DelayMode::Deferred,
            ..Default::default()
        };
        let mut ikbd = Ikbd::new(config, ports);
        ikbd.elapse(BOOT_WINDOW);
        // 0xF1 has its own small delay
        ikbd.elapse(Duration::from_millis(1));
        assert_eq!(drain(&mut ikbd), hex!("F1"));

        send(&mut ikbd, &[0x16]);
        ikbd.on_key_transition(0x1E, true);
        assert!(drain(&mut ikbd).is_empty());
        ikbd.elapse(Duration::from_millis(2));
        assert_eq!(drain(&mut ikbd), hex!("FD 00 00 1E"));
    }
}
