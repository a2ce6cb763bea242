//! Output channel between the IKBD and the host ACIA.
//!
//! Bytes are stored in a fixed 512 byte ring. Packets are written
//! all-or-nothing: a host that keeps issuing interrogation commands without
//! reading the answers (Downfall, Fokker) must see whole packets or nothing.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

pub const OUTPUT_BUFFER_SIZE: usize = 512;
const OUTPUT_BUFFER_MASK: usize = OUTPUT_BUFFER_SIZE - 1;

/// 68000 clock used by the host to express response delays.
const CPU_HZ: u64 = 8_000_000;

/// A response delay, in 68000 cycles at 8 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delay {
    min: u32,
    max: u32,
}

impl Delay {
    pub const NONE: Delay = Delay::cycles(0);

    pub const fn cycles(cycles: u32) -> Self {
        Delay {
            min: cycles,
            max: cycles,
        }
    }

    /// A delay that varies on real hardware. We always use the midpoint.
    pub const fn between(min: u32, max: u32) -> Self {
        Delay { min, max }
    }

    pub fn as_cycles(&self) -> u32 {
        self.min + (self.max - self.min) / 2
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.as_cycles() as u64 * 1_000_000_000 / CPU_HZ)
    }
}

/// What to do with the delay attached to a delayed write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DelayMode {
    /// Bytes are queued immediately and the delay is only logged.
    #[default]
    Immediate,
    /// The first byte of a delayed packet (and everything after it) is held
    /// back from the consumer until the delay has elapsed.
    Deferred,
}

/// A hold placed on the byte at sequence number `at`.
#[derive(Debug, Clone, Copy)]
struct Gate {
    at: u64,
    remaining: Duration,
}

pub struct OutputBuffer {
    buffer: [u8; OUTPUT_BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
    paused: bool,
    muted: bool,
    mode: DelayMode,
    written: u64,
    read: u64,
    gates: VecDeque<Gate>,
}

impl OutputBuffer {
    pub fn new(mode: DelayMode) -> Self {
        Self {
            buffer: [0; OUTPUT_BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
            paused: false,
            muted: false,
            mode,
            written: 0,
            read: 0,
            gates: VecDeque::new(),
        }
    }

    /// Reset the ring pointers. The stored bytes are left as they are.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.paused = false;
        self.read = self.written;
        self.gates.clear();
    }

    pub fn len(&self) -> usize {
        self.count
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn free(&self) -> usize {
        OUTPUT_BUFFER_SIZE - self.count
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    #[cfg(test)]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// While muted (the reset window) every write is discarded.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn try_enqueue(&mut self, bytes: &[u8]) -> bool {
        self.try_enqueue_delayed(bytes, Delay::NONE)
    }

    /// Queue a whole packet, or nothing at all if it would not fit.
    pub fn try_enqueue_delayed(&mut self, bytes: &[u8], delay: Delay) -> bool {
        if self.muted {
            trace!("IKBD: resetting, dropping {:02X?}", bytes);
            return false;
        }
        if self.paused {
            trace!("IKBD: output paused, dropping {:02X?}", bytes);
            return false;
        }
        if self.free() < bytes.len() {
            trace!(
                "IKBD: output buffer full, can't send {} bytes {:02X?}",
                bytes.len(),
                bytes
            );
            return false;
        }

        if delay != Delay::NONE && !bytes.is_empty() {
            trace!(
                "IKBD: delayed packet {:02X?} ({} cycles)",
                bytes,
                delay.as_cycles()
            );
            if self.mode == DelayMode::Deferred {
                self.gates.push_back(Gate {
                    at: self.written,
                    remaining: delay.as_duration(),
                });
            }
        }

        for &byte in bytes {
            self.buffer[self.tail] = byte;
            self.tail = (self.tail + 1) & OUTPUT_BUFFER_MASK;
            self.count += 1;
            self.written += 1;
        }
        true
    }

    /// Let time pass for deferred packets.
    pub fn elapse(&mut self, dt: Duration) {
        for gate in self.gates.iter_mut() {
            gate.remaining = gate.remaining.saturating_sub(dt);
        }
    }

    /// Take the next byte for the serial link, if one is ready.
    pub fn pop(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        while let Some(gate) = self.gates.front() {
            if gate.at < self.read {
                self.gates.pop_front();
            } else if gate.at == self.read && !gate.remaining.is_zero() {
                return None;
            } else {
                break;
            }
        }

        let byte = self.buffer[self.head];
        self.head = (self.head + 1) & OUTPUT_BUFFER_MASK;
        self.count -= 1;
        self.read += 1;
        Some(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(output: &mut OutputBuffer) -> Vec<u8> {
        std::iter::from_fn(|| output.pop()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        assert!(output.try_enqueue(&[1, 2, 3]));
        assert!(output.try_enqueue(&[4]));
        assert_eq!(output.len(), 4);
        assert_eq!(drain(&mut output), vec![1, 2, 3, 4]);
        assert!(output.is_empty());
    }

    #[test]
    fn test_whole_packet_dropped_when_full() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        let filler = [0x55; OUTPUT_BUFFER_SIZE - 2];
        assert!(output.try_enqueue(&filler));
        assert_eq!(output.free(), 2);

        // A 3 byte mouse packet must not be partially written
        assert!(!output.try_enqueue(&[0xF8, 0x01, 0x01]));
        assert_eq!(output.len(), OUTPUT_BUFFER_SIZE - 2);

        assert!(output.try_enqueue(&[0xFE, 0x01]));
        assert_eq!(output.free(), 0);
        assert!(!output.try_enqueue(&[0x39]));
    }

    #[test]
    fn test_ring_wraps() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        for round in 0..3u8 {
            let packet = [round; 300];
            assert!(output.try_enqueue(&packet));
            assert_eq!(drain(&mut output), packet.to_vec());
        }
    }

    #[test]
    fn test_pause_and_mute_drop_writes() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        output.pause();
        assert!(!output.try_enqueue(&[0x1E]));
        output.resume();
        assert!(output.try_enqueue(&[0x1E]));

        output.set_muted(true);
        assert!(!output.try_enqueue(&[0x9E]));
        assert_eq!(drain(&mut output), vec![0x1E]);
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        output.try_enqueue(&[1, 2, 3]);
        output.pause();
        output.clear();
        assert!(output.is_empty());
        assert!(!output.is_paused());
        assert_eq!(output.pop(), None);
    }

    #[test]
    fn test_delay_conversion() {
        assert_eq!(Delay::cycles(8000).as_duration(), Duration::from_millis(1));
        assert_eq!(Delay::between(7000, 7500).as_cycles(), 7250);
        assert_eq!(Delay::NONE.as_duration(), Duration::ZERO);
    }

    // Delayed-transmission decision: by default the delay is ignored and
    // bytes are available immediately, like the firmware this emulates.
    #[test]
    fn test_immediate_mode_ignores_delay() {
        let mut output = OutputBuffer::new(DelayMode::Immediate);
        output.try_enqueue_delayed(&[0xF6, 0x08], Delay::cycles(80_000));
        assert_eq!(drain(&mut output), vec![0xF6, 0x08]);
    }

    // The optional deferred mode holds a delayed packet back while letting
    // earlier bytes through.
    #[test]
    fn test_deferred_mode_holds_packet() {
        let mut output = OutputBuffer::new(DelayMode::Deferred);
        output.try_enqueue(&[0x1E]);
        output.try_enqueue_delayed(&[0xFD, 0x00, 0x00], Delay::cycles(8000));

        assert_eq!(output.pop(), Some(0x1E));
        assert_eq!(output.pop(), None);

        output.elapse(Duration::from_micros(500));
        assert_eq!(output.pop(), None);

        output.elapse(Duration::from_micros(500));
        assert_eq!(drain(&mut output), vec![0xFD, 0x00, 0x00]);
    }
}
