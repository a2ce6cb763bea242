//! Boot sequence and the reset-window quirks.
//!
//! After a reset the real controller spends a while testing for stuck keys.
//! Nothing is sent in that window, and a few commands behave differently
//! while it is open. Several games rely on this:
//!
//! * 0x12 and 0x1A both received: mouse and joysticks come back on together.
//! * 0x08 then 0x14 (Barbarian), or 0x12 then 0x14 (Hammerfist): the mouse
//!   stays in relative mode next to the joystick.
//! * 0x13 is ignored (Just Bugging).

use std::time::Duration;

use tracing::debug;

/// Timer1 one-shot: 1800 counts at 7.3728 MHz / 256.
pub const BOOT_WINDOW: Duration = Duration::from_micros(62_500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    /// Self test running, output suppressed
    Booting,
    Ready,
}

#[derive(Debug)]
pub struct ResetState {
    phase: BootPhase,
    window: Duration,
    remaining: Duration,
    mouse_disabled: bool,
    joystick_disabled: bool,
    both_enabled: bool,
    mouse_enabled_during_reset: bool,
    /// Real-time clock bytes, kept across warm resets
    clock: [u8; 6],
}

impl ResetState {
    /// Power on: a cold boot with the given self test duration.
    pub fn new(window: Duration) -> Self {
        let mut state = Self {
            phase: BootPhase::Ready,
            window,
            remaining: Duration::ZERO,
            mouse_disabled: false,
            joystick_disabled: false,
            both_enabled: false,
            mouse_enabled_during_reset: false,
            clock: [0; 6],
        };
        state.boot(true);
        state
    }

    /// Clear the quirk flags and (re)arm the boot timer.
    pub fn boot(&mut self, cold: bool) {
        if cold {
            self.clock = [0; 6];
        }
        debug!("IKBD: boot ROM, cold={cold}, clock {:02X?}", self.clock);
        self.mouse_disabled = false;
        self.joystick_disabled = false;
        self.both_enabled = false;
        self.mouse_enabled_during_reset = false;
        self.phase = BootPhase::Booting;
        self.remaining = self.window;
    }

    #[cfg(test)]
    pub fn phase(&self) -> BootPhase {
        self.phase
    }

    pub fn is_booting(&self) -> bool {
        self.phase == BootPhase::Booting
    }

    /// Advance the boot timer. Returns true exactly once per boot, when the
    /// self test completes.
    pub fn elapse(&mut self, dt: Duration) -> bool {
        if self.phase != BootPhase::Booting {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(dt);
        if !self.remaining.is_zero() {
            return false;
        }
        debug!("IKBD: boot complete");
        self.phase = BootPhase::Ready;
        self.mouse_enabled_during_reset = false;
        true
    }

    #[cfg(test)]
    pub fn clock(&self) -> [u8; 6] {
        self.clock
    }

    #[cfg(test)]
    pub fn set_clock(&mut self, clock: [u8; 6]) {
        self.clock = clock;
    }

    /// Mouse and joystick 0 are both reporting because of a quirk.
    pub fn both_enabled(&self) -> bool {
        self.both_enabled
    }

    /// 0x08 received.
    pub fn note_relative_mouse(&mut self) {
        if self.is_booting() {
            self.mouse_enabled_during_reset = true;
        }
    }

    /// 0x12 received. Returns true if mouse and joystick must both be
    /// turned back on.
    pub fn note_mouse_disabled(&mut self) -> bool {
        self.mouse_disabled = true;
        self.check_disable_bug()
    }

    /// 0x1A received. Returns true if mouse and joystick must both be
    /// turned back on.
    pub fn note_joystick_disabled(&mut self) -> bool {
        self.joystick_disabled = true;
        self.check_disable_bug()
    }

    fn check_disable_bug(&mut self) -> bool {
        if self.mouse_disabled && self.joystick_disabled && self.is_booting() {
            debug!("IKBD: 0x12 and 0x1A during reset, mouse and joystick both on");
            self.both_enabled = true;
            return true;
        }
        false
    }

    /// 0x14 received. Returns true if the mouse must stay in relative mode.
    pub fn joystick_auto_keeps_mouse(&mut self) -> bool {
        if self.is_booting() && (self.mouse_enabled_during_reset || self.mouse_disabled) {
            debug!("IKBD: 0x14 during reset, mouse and joystick both on");
            self.both_enabled = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_once() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        assert!(reset.is_booting());
        assert!(!reset.elapse(Duration::from_millis(60)));
        assert!(reset.elapse(Duration::from_millis(3)));
        assert_eq!(reset.phase(), BootPhase::Ready);
        assert!(!reset.elapse(Duration::from_secs(1)));
    }

    #[test]
    fn test_reboot_rearms_timer() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.elapse(Duration::from_millis(50));
        reset.boot(false);
        assert!(!reset.elapse(Duration::from_millis(50)));
        assert!(reset.elapse(Duration::from_millis(50)));
    }

    #[test]
    fn test_cold_boot_clears_clock() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.set_clock([0x26, 0x10, 0x16, 0x12, 0x00, 0x00]);
        reset.boot(false);
        assert_eq!(reset.clock()[0], 0x26);
        reset.boot(true);
        assert_eq!(reset.clock(), [0; 6]);
    }

    #[test]
    fn test_disable_both_during_window() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        assert!(!reset.note_mouse_disabled());
        assert!(reset.note_joystick_disabled());
        assert!(reset.both_enabled());
    }

    #[test]
    fn test_disable_both_after_window() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.elapse(BOOT_WINDOW);
        assert!(!reset.note_mouse_disabled());
        assert!(!reset.note_joystick_disabled());
        assert!(!reset.both_enabled());
    }

    #[test]
    fn test_relative_then_joystick_auto() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.note_relative_mouse();
        assert!(reset.joystick_auto_keeps_mouse());

        // Forgotten once the window closes
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.note_relative_mouse();
        reset.elapse(BOOT_WINDOW);
        assert!(!reset.joystick_auto_keeps_mouse());
    }

    #[test]
    fn test_disable_mouse_then_joystick_auto() {
        let mut reset = ResetState::new(BOOT_WINDOW);
        reset.note_mouse_disabled();
        assert!(reset.joystick_auto_keeps_mouse());
        assert!(reset.both_enabled());
    }
}
