//! PS/2 keyboard and mouse input.
//!
//! Each port is a byte stream (a device node, a FIFO or a file) read on its
//! own thread. Keyboard bytes are scan code set 2 and are translated to ST
//! scan codes. Mouse bytes are standard three byte packets.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::machine::ikbd::IkbdSender;

/// A gap this long between two bytes means the stream lost sync.
pub const PS2_RESYNC_TIMEOUT: Duration = Duration::from_millis(250);

macro_rules! def_scan_codes {
    ($name:ident { $($ps2:literal => $st:literal;)* }) => {
        fn $name(code: u8) -> Option<u8> {
            match code {
                $($ps2 => Some($st),)*
                _ => None,
            }
        }
    };
}

def_scan_codes!(st_scan_code {
    0x01 => 67; // F9
    0x03 => 63; // F5
    0x04 => 61; // F3
    0x05 => 59; // F1
    0x06 => 60; // F2
    0x07 => 97; // F12 -> Undo
    0x09 => 68; // F10
    0x0a => 66; // F8
    0x0b => 64; // F6
    0x0c => 62; // F4
    0x0d => 15; // Tab
    0x0e => 41; // `
    0x11 => 56; // Left Alt
    0x12 => 42; // Left Shift
    0x14 => 29; // Left Control
    0x15 => 16; // Q
    0x16 => 2;  // 1
    0x1a => 44; // Z
    0x1b => 31; // S
    0x1c => 30; // A
    0x1d => 17; // W
    0x1e => 3;  // 2
    0x21 => 46; // C
    0x22 => 45; // X
    0x23 => 32; // D
    0x24 => 18; // E
    0x25 => 5;  // 4
    0x26 => 4;  // 3
    0x29 => 57; // Space
    0x2a => 47; // V
    0x2b => 33; // F
    0x2c => 20; // T
    0x2d => 19; // R
    0x2e => 6;  // 5
    0x31 => 49; // N
    0x32 => 48; // B
    0x33 => 35; // H
    0x34 => 34; // G
    0x35 => 21; // Y
    0x36 => 7;  // 6
    0x3a => 50; // M
    0x3b => 36; // J
    0x3c => 22; // U
    0x3d => 8;  // 7
    0x3e => 9;  // 8
    0x41 => 51; // ,
    0x42 => 37; // K
    0x43 => 23; // I
    0x44 => 24; // O
    0x45 => 11; // 0
    0x46 => 10; // 9
    0x49 => 52; // .
    0x4a => 53; // /
    0x4b => 38; // L
    0x4c => 39; // ;
    0x4d => 25; // P
    0x4e => 12; // -
    0x52 => 40; // '
    0x54 => 26; // [
    0x55 => 13; // =
    0x58 => 58; // Caps Lock
    0x59 => 54; // Right Shift
    0x5a => 28; // Return
    0x5b => 27; // ]
    0x5d => 43; // \
    0x61 => 96; // ISO <>
    0x66 => 14; // Backspace
    0x69 => 109; // KP 1
    0x6b => 106; // KP 4
    0x6c => 103; // KP 7
    0x70 => 112; // KP 0
    0x71 => 113; // KP .
    0x72 => 110; // KP 2
    0x73 => 107; // KP 5
    0x74 => 108; // KP 6
    0x75 => 104; // KP 8
    0x76 => 1;  // Esc
    0x78 => 98; // F11 -> Help
    0x79 => 78; // KP +
    0x7a => 111; // KP 3
    0x7b => 74; // KP -
    0x7c => 102; // KP *
    0x7d => 105; // KP 9
    0x83 => 65; // F7
});

def_scan_codes!(st_extended_scan_code {
    0x11 => 56; // Right Alt
    0x14 => 29; // Right Control
    0x4a => 101; // KP /
    0x5a => 114; // KP Enter
    0x69 => 79; // End
    0x6b => 75; // Left
    0x6c => 71; // Home -> Clr/Home
    0x70 => 82; // Insert
    0x71 => 83; // Delete
    0x72 => 80; // Down
    0x74 => 77; // Right
    0x75 => 72; // Up
    0x7a => 81; // Page Down
    0x7d => 73; // Page Up
});

/// Translate a set 2 make code to an ST scan code.
pub fn translate(code: u8, extended: bool) -> Option<u8> {
    if extended {
        st_extended_scan_code(code)
    } else {
        st_scan_code(code)
    }
}

/// Turns a PS/2 byte stream into events.
pub trait Ps2Decoder {
    type Event;

    fn feed(&mut self, byte: u8) -> Option<Self::Event>;

    /// Drop any partially received sequence.
    fn resync(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// ST scan code
    pub code: u8,
    pub pressed: bool,
}

#[derive(Debug, Default)]
pub struct KeyboardDecoder {
    extended: bool,
    release: bool,
    /// Bytes left of a Pause/Break sequence
    skip: u8,
}

impl KeyboardDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ps2Decoder for KeyboardDecoder {
    type Event = KeyEvent;

    fn feed(&mut self, byte: u8) -> Option<KeyEvent> {
        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }
        match byte {
            0xE0 => self.extended = true,
            0xF0 => self.release = true,
            // Pause: E1 14 77 E1 F0 14 F0 77, no break code
            0xE1 => {
                self.resync();
                self.skip = 7;
            }
            // Self test passed, echo, ack, errors, resend
            0x00 | 0xAA | 0xEE | 0xFA | 0xFC | 0xFD | 0xFE | 0xFF => {
                trace!("PS/2 keyboard: reply {byte:02X}");
                self.resync();
            }
            code => {
                let extended = std::mem::take(&mut self.extended);
                let pressed = !std::mem::take(&mut self.release);
                let Some(code) = translate(code, extended) else {
                    trace!("PS/2 keyboard: unmapped {code:02X} extended={extended}");
                    return None;
                };
                return Some(KeyEvent { code, pressed });
            }
        }
        None
    }

    fn resync(&mut self) {
        self.extended = false;
        self.release = false;
        self.skip = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub dx: i32,
    /// Positive is down, as on the ST
    pub dy: i32,
    pub left: bool,
    pub right: bool,
}

mod packet {
    pub const LEFT: u8 = 0x01;
    pub const RIGHT: u8 = 0x02;
    pub const SYNC: u8 = 0x08;
    pub const X_SIGN: u8 = 0x10;
    pub const Y_SIGN: u8 = 0x20;
    pub const OVERFLOW: u8 = 0xC0;
}

#[derive(Debug, Default)]
pub struct MouseDecoder {
    packet: [u8; 3],
    len: usize,
}

impl MouseDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn extend(value: u8, negative: bool) -> i32 {
    if negative {
        value as i32 - 0x100
    } else {
        value as i32
    }
}

impl Ps2Decoder for MouseDecoder {
    type Event = MouseEvent;

    fn feed(&mut self, byte: u8) -> Option<MouseEvent> {
        if self.len == 0 && byte & packet::SYNC == 0 {
            trace!("PS/2 mouse: out of sync, dropped {byte:02X}");
            return None;
        }
        self.packet[self.len] = byte;
        self.len += 1;
        if self.len < self.packet.len() {
            return None;
        }
        self.len = 0;

        let [status, x, y] = self.packet;
        if status & packet::OVERFLOW != 0 {
            trace!("PS/2 mouse: overflow, dropped {:02X?}", self.packet);
            return None;
        }
        Some(MouseEvent {
            dx: extend(x, status & packet::X_SIGN != 0),
            dy: -extend(y, status & packet::Y_SIGN != 0),
            left: status & packet::LEFT != 0,
            right: status & packet::RIGHT != 0,
        })
    }

    fn resync(&mut self) {
        self.len = 0;
    }
}

/// A decoder plus the inter-byte timeout that resynchronizes it.
#[derive(Debug)]
pub struct Ps2Port<D> {
    decoder: D,
    timeout: Duration,
    last: Option<Instant>,
}

impl<D: Ps2Decoder> Ps2Port<D> {
    pub fn new(decoder: D, timeout: Duration) -> Self {
        Self {
            decoder,
            timeout,
            last: None,
        }
    }

    pub fn receive(&mut self, byte: u8, now: Instant) -> Option<D::Event> {
        if let Some(last) = self.last
            && now.saturating_duration_since(last) > self.timeout
        {
            trace!("PS/2: idle for {:?}, resync", now - last);
            self.decoder.resync();
        }
        self.last = Some(now);
        self.decoder.feed(byte)
    }
}

fn spawn_reader<D, R, F>(
    name: &'static str,
    mut input: R,
    mut port: Ps2Port<D>,
    mut deliver: F,
) -> JoinHandle<()>
where
    D: Ps2Decoder + Send + 'static,
    R: Read + Send + 'static,
    F: FnMut(D::Event) + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0; 1];
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(event) = port.receive(buf[0], Instant::now()) {
                        deliver(event);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("PS/2 {name} read failed: {e}");
                    break;
                }
            }
        }
        debug!("PS/2 {name} reader exited");
    })
}

/// Read set 2 scan codes from `path` and forward them as key transitions.
pub fn connect_keyboard(
    path: &Path,
    timeout: Duration,
    ikbd: IkbdSender,
) -> std::io::Result<JoinHandle<()>> {
    info!("Connecting PS/2 keyboard to {:?}", path);
    let file = File::open(path)?;
    let port = Ps2Port::new(KeyboardDecoder::new(), timeout);
    Ok(spawn_reader("keyboard", file, port, move |key: KeyEvent| {
        trace!("PS/2 keyboard: {key:?}");
        ikbd.send_key(key.code, key.pressed);
    }))
}

/// Read mouse packets from `path` and forward them as motion and buttons.
pub fn connect_mouse(
    path: &Path,
    timeout: Duration,
    ikbd: IkbdSender,
) -> std::io::Result<JoinHandle<()>> {
    info!("Connecting PS/2 mouse to {:?}", path);
    let file = File::open(path)?;
    let port = Ps2Port::new(MouseDecoder::new(), timeout);
    Ok(spawn_reader("mouse", file, port, move |mouse: MouseEvent| {
        trace!("PS/2 mouse: {mouse:?}");
        ikbd.send_mouse(mouse.dx, mouse.dy, mouse.left, mouse.right);
    }))
}
