//! Mouse report engine.
//!
//! Motion arrives asynchronously from the PS/2 side and is accumulated in
//! `pending`. Once per frame it is folded into the absolute position and
//! into `delta`, the motion still owed to the host in relative or keycode
//! mode.

use std::fmt;

use tracing::{debug, trace};

use super::output::OutputBuffer;
use super::response::{IkbdResponse, StatusReport};

/// Seed for the absolute report button mask: both buttons up, so the first
/// interrogation does not report release events.
pub const ABS_PREV_BUTTONS: u8 = 0x02 | 0x08;

/// Cursor keys used in keycode mode.
const KEY_LEFT: u8 = 75;
const KEY_RIGHT: u8 = 77;
const KEY_UP: u8 = 72;
const KEY_DOWN: u8 = 80;
/// Mouse buttons reported as keys.
const KEY_LEFT_BUTTON: u8 = 0x74;
const KEY_RIGHT_BUTTON: u8 = 0x75;

/// Keycode mode gives up after this many steps per frame. A PS/2 mouse can
/// report far larger deltas than an ST mouse ever would.
const MAX_KEYCODE_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseMode {
    Off,
    #[default]
    Relative,
    Absolute,
    Keycode,
}

/// Where a button press came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSource {
    Mouse = 0x01,
    /// Joystick 1 fire, folded into the right button
    Joystick = 0x02,
}

/// A button held down by zero or more sources. Only down/up matters for
/// edge detection.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState(u8);

impl ButtonState {
    pub fn is_down(self) -> bool {
        self.0 != 0
    }

    pub fn is_held_by(self, source: ButtonSource) -> bool {
        self.0 & source as u8 != 0
    }

    pub fn set(&mut self, source: ButtonSource, down: bool) {
        if down {
            self.0 |= source as u8;
        } else {
            self.0 &= !(source as u8);
        }
    }

    fn pressed_since(self, old: ButtonState) -> bool {
        self.is_down() && !old.is_down()
    }

    fn released_since(self, old: ButtonState) -> bool {
        !self.is_down() && old.is_down()
    }
}

impl fmt::Debug for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ButtonState({:02b})", self.0)
    }
}

/// `%00000mss` mouse button action flags.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseAction(u8);

impl MouseAction {
    pub fn new(byte: u8) -> Self {
        MouseAction(byte)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// A button press forces an absolute report
    pub fn report_on_press(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// A button release forces an absolute report
    pub fn report_on_release(self) -> bool {
        self.0 & 0x02 != 0
    }

    /// Buttons are sent as key codes 0x74/0x75; the low bits are ignored
    pub fn buttons_as_keys(self) -> bool {
        self.0 & 0x04 != 0
    }
}

impl fmt::Debug for MouseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MouseAction({:02X}", self.0)?;
        if self.buttons_as_keys() {
            write!(f, "=Keys")?;
        } else if self.report_on_press() || self.report_on_release() {
            write!(f, "=Report")?;
            if self.report_on_press() {
                write!(f, "+Press")?;
            }
            if self.report_on_release() {
                write!(f, "+Release")?;
            }
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Axes<T> {
    x: T,
    y: T,
}

#[derive(Debug)]
pub struct Mouse {
    mode: MouseMode,
    action: MouseAction,
    /// Raw motion since the last frame
    pending: Axes<i32>,
    /// Motion owed to the host
    delta: Axes<i32>,
    position: Axes<i32>,
    max: Axes<u16>,
    scale: Axes<u8>,
    threshold: Axes<u8>,
    keycode_delta: Axes<u8>,
    /// +1 or -1
    y_axis: i32,
    left: ButtonState,
    right: ButtonState,
    old_left: ButtonState,
    old_right: ButtonState,
    prev_abs_buttons: u8,
}

impl Default for Mouse {
    fn default() -> Self {
        Self {
            mode: MouseMode::Relative,
            action: MouseAction::default(),
            pending: Axes { x: 0, y: 0 },
            delta: Axes { x: 0, y: 0 },
            position: Axes { x: 0, y: 0 },
            max: Axes { x: 320, y: 200 },
            scale: Axes { x: 0, y: 0 },
            threshold: Axes { x: 1, y: 1 },
            keycode_delta: Axes { x: 1, y: 1 },
            y_axis: 1,
            left: ButtonState::default(),
            right: ButtonState::default(),
            old_left: ButtonState::default(),
            old_right: ButtonState::default(),
            prev_abs_buttons: ABS_PREV_BUTTONS,
        }
    }
}

impl Mouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to power-on defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mode(&self) -> MouseMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MouseMode) {
        if self.mode != mode {
            debug!("IKBD: mouse mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    pub fn position(&self) -> (u16, u16) {
        (self.position.x as u16, self.position.y as u16)
    }

    pub fn left(&self) -> ButtonState {
        self.left
    }

    pub fn right(&self) -> ButtonState {
        self.right
    }

    /// Add PS/2 motion, already in top-origin screen sense.
    pub fn add_motion(&mut self, dx: i32, dy: i32) {
        self.pending.x = self.pending.x.saturating_add(dx);
        self.pending.y = self.pending.y.saturating_add(dy);
    }

    pub fn set_left(&mut self, source: ButtonSource, down: bool) {
        self.left.set(source, down);
    }

    pub fn set_right(&mut self, source: ButtonSource, down: bool) {
        self.right.set(source, down);
    }

    pub fn set_action(&mut self, action: MouseAction) {
        debug!("IKBD: {:?}", action);
        self.action = action;
        self.prev_abs_buttons = ABS_PREV_BUTTONS;
    }

    pub fn set_absolute(&mut self, max_x: u16, max_y: u16) {
        self.set_mode(MouseMode::Absolute);
        self.max = Axes { x: max_x, y: max_y };
    }

    pub fn set_keycode(&mut self, delta_x: u8, delta_y: u8) {
        self.set_mode(MouseMode::Keycode);
        self.keycode_delta = Axes {
            x: delta_x,
            y: delta_y,
        };
    }

    pub fn set_threshold(&mut self, x: u8, y: u8) {
        self.threshold = Axes { x, y };
    }

    pub fn set_scale(&mut self, x: u8, y: u8) {
        self.scale = Axes { x, y };
    }

    /// Y axis sign for reports and absolute motion.
    pub fn set_y_axis(&mut self, sign: i32) {
        self.y_axis = sign.signum();
    }

    /// Load a new absolute position. It is only clamped by the next update.
    pub fn load_position(&mut self, x: u16, y: u16) {
        self.position = Axes {
            x: x as i32,
            y: y as i32,
        };
    }

    /// Fold the motion of the last frame into the absolute position and the
    /// motion owed to the host.
    pub fn update_position(&mut self) {
        let dx = std::mem::take(&mut self.pending.x);
        let dy = std::mem::take(&mut self.pending.y);

        match self.mode {
            MouseMode::Relative | MouseMode::Keycode => {
                self.delta.x = self.delta.x.saturating_add(dx);
                self.delta.y = self.delta.y.saturating_add(dy);
            }
            MouseMode::Off | MouseMode::Absolute => {
                self.delta = Axes { x: dx, y: dy };
            }
        }

        let scaled = |delta: i32, scale: u8| {
            if scale > 1 {
                delta.saturating_mul(scale as i32)
            } else {
                delta
            }
        };
        self.position.x = self
            .position
            .x
            .saturating_add(scaled(dx, self.scale.x))
            .clamp(0, self.max.x as i32);
        self.position.y = self
            .position
            .y
            .saturating_add(scaled(dy.saturating_mul(self.y_axis), self.scale.y))
            .clamp(0, self.max.y as i32);
    }

    /// Forget motion that no report will consume.
    pub fn discard_motion(&mut self) {
        self.delta = Axes { x: 0, y: 0 };
    }

    /// Handle the action flags for the button edges of this frame. Returns
    /// true when the buttons went out as keys, which ends mouse reporting
    /// for the frame.
    pub fn on_action(&mut self, output: &mut OutputBuffer) -> bool {
        if self.action.buttons_as_keys() {
            self.send_buttons_as_keys(output);
            self.commit_buttons();
            return true;
        }

        let mut report = false;
        if self.action.report_on_press() {
            if self.left.pressed_since(self.old_left) {
                report = true;
                self.prev_abs_buttons = (self.prev_abs_buttons & !0x04) | 0x02;
            }
            if self.right.pressed_since(self.old_right) {
                report = true;
                self.prev_abs_buttons = (self.prev_abs_buttons & !0x01) | 0x08;
            }
        }
        if self.action.report_on_release() {
            if self.left.released_since(self.old_left) {
                report = true;
                self.prev_abs_buttons = (self.prev_abs_buttons & !0x08) | 0x01;
            }
            if self.right.released_since(self.old_right) {
                report = true;
                self.prev_abs_buttons = (self.prev_abs_buttons & !0x02) | 0x04;
            }
        }

        if report && self.mode == MouseMode::Absolute {
            trace!("IKBD: absolute report on mouse action");
            self.interrogate(output);
        }
        false
    }

    fn send_buttons_as_keys(&self, output: &mut OutputBuffer) {
        if output.free() < 2 {
            return;
        }
        for (key, now, old) in [
            (KEY_LEFT_BUTTON, self.left, self.old_left),
            (KEY_RIGHT_BUTTON, self.right, self.old_right),
        ] {
            if now.pressed_since(old) {
                output.try_enqueue(&IkbdResponse::Key { code: key, pressed: true }.to_bytes());
            } else if now.released_since(old) {
                output.try_enqueue(&IkbdResponse::Key { code: key, pressed: false }.to_bytes());
            }
        }
    }

    fn buttons_changed(&self) -> bool {
        self.left.is_down() != self.old_left.is_down()
            || self.right.is_down() != self.old_right.is_down()
    }

    /// Button state becomes the reference for the next edge detection.
    pub fn commit_buttons(&mut self) {
        self.old_left = self.left;
        self.old_right = self.right;
    }

    /// Send the motion owed in relative mode, split into as many packets as
    /// needed to stay within a signed byte per axis.
    pub fn send_relative(&mut self, output: &mut OutputBuffer) {
        loop {
            let rel_x = self.delta.x.clamp(-128, 127);
            let rel_y = self.delta.y.clamp(-128, 127);

            let over = |rel: i32, threshold: u8| {
                (rel < 0 && rel <= -(threshold as i32)) || (rel > 0 && rel >= threshold as i32)
            };
            if !over(rel_x, self.threshold.x)
                && !over(rel_y, self.threshold.y)
                && !self.buttons_changed()
            {
                break;
            }

            let mut buttons = 0;
            if self.left.is_down() {
                buttons |= 0x02;
            }
            if self.right.is_down() {
                buttons |= 0x01;
            }
            let sent_y = (rel_y * self.y_axis).clamp(-128, 127);
            let packet = IkbdResponse::RelativeMouse {
                buttons,
                dx: rel_x as i8,
                dy: sent_y as i8,
            };
            trace!("IKBD: {:?}", packet);
            output.try_enqueue(&packet.to_bytes());

            self.delta.x -= rel_x;
            self.delta.y -= sent_y * self.y_axis;
            self.commit_buttons();
        }
    }

    /// Send the motion owed in keycode mode as cursor key presses.
    pub fn send_keycodes(&mut self, output: &mut OutputBuffer) {
        let step_x = self.keycode_delta.x as i32;
        let step_y = self.keycode_delta.y as i32;
        let mut steps = 0;

        while steps < MAX_KEYCODE_STEPS
            && (self.delta.x != 0 || self.delta.y != 0 || self.buttons_changed())
        {
            let buttons_changed = self.buttons_changed();
            let mut moved = false;
            if self.delta.x != 0 {
                if self.delta.x <= -step_x {
                    send_key_stroke(output, KEY_LEFT);
                    self.delta.x += step_x;
                    moved = true;
                }
                if self.delta.x >= step_x {
                    send_key_stroke(output, KEY_RIGHT);
                    self.delta.x -= step_x;
                    moved = true;
                }
            }
            if self.delta.y != 0 {
                if self.delta.y <= -step_y {
                    send_key_stroke(output, KEY_UP);
                    self.delta.y += step_y;
                    moved = true;
                }
                if self.delta.y >= step_y {
                    send_key_stroke(output, KEY_DOWN);
                    self.delta.y -= step_y;
                    moved = true;
                }
            }
            self.send_buttons_as_keys(output);
            self.commit_buttons();
            steps += 1;

            // Less than a step left over
            if !moved && !buttons_changed {
                break;
            }
        }

        if steps == MAX_KEYCODE_STEPS {
            self.discard_motion();
        }
    }

    /// Answer an absolute position interrogation.
    pub fn interrogate(&mut self, output: &mut OutputBuffer) {
        let mut buttons = 0;
        buttons |= if self.right.is_down() { 0x01 } else { 0x02 };
        buttons |= if self.left.is_down() { 0x04 } else { 0x08 };
        let prev = self.prev_abs_buttons;
        self.prev_abs_buttons = buttons;
        buttons &= !prev;

        let (x, y) = self.position();
        let packet = IkbdResponse::AbsoluteMouse { buttons, x, y };
        trace!("IKBD: {:?}", packet);
        output.try_enqueue_delayed(&packet.to_bytes(), packet.delay());
    }

    pub fn action_report(&self) -> StatusReport {
        StatusReport::MouseAction(self.action.bits())
    }

    pub fn mode_report(&self) -> StatusReport {
        match self.mode {
            MouseMode::Relative => StatusReport::MouseRelative,
            MouseMode::Absolute => StatusReport::MouseAbsolute {
                max_x: self.max.x,
                max_y: self.max.y,
            },
            MouseMode::Keycode => StatusReport::MouseKeycode {
                delta_x: self.keycode_delta.x,
                delta_y: self.keycode_delta.y,
            },
            MouseMode::Off => StatusReport::MouseDisabled,
        }
    }

    pub fn threshold_report(&self) -> StatusReport {
        StatusReport::MouseThreshold {
            x: self.threshold.x,
            y: self.threshold.y,
        }
    }

    pub fn scale_report(&self) -> StatusReport {
        StatusReport::MouseScale {
            x: self.scale.x,
            y: self.scale.y,
        }
    }

    /// Reported in the inverted PS/2 sense, matching the axis commands.
    pub fn vertical_report(&self) -> StatusReport {
        StatusReport::MouseVertical {
            origin_bottom: self.y_axis == -1,
        }
    }

    pub fn availability_report(&self) -> StatusReport {
        StatusReport::MouseAvailable(self.mode != MouseMode::Off)
    }
}

fn send_key_stroke(output: &mut OutputBuffer, key: u8) {
    if output.free() >= 2 {
        output.try_enqueue(&[key, key | 0x80]);
    }
}
