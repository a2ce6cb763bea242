use std::time::Duration;

/// Start bit, eight data bits, stop bit.
pub const BITS_PER_BYTE: u32 = 10;

/// Limits how fast bytes leave the transmitter.
#[derive(Debug)]
pub struct BaudPacer {
    byte_time: Duration,
    credit: Duration,
}

impl BaudPacer {
    pub fn new(baud: u32) -> Self {
        Self {
            byte_time: Duration::from_secs(BITS_PER_BYTE as u64) / baud.max(1),
            credit: Duration::ZERO,
        }
    }

    pub fn byte_time(&self) -> Duration {
        self.byte_time
    }

    /// Bytes the line can carry in `dt`, given a queue of `pending`.
    pub fn drain(&mut self, dt: Duration, pending: usize) -> usize {
        self.credit += dt;
        let mut sent = 0;
        while sent < pending && self.credit >= self.byte_time {
            self.credit -= self.byte_time;
            sent += 1;
        }
        if sent < pending {
            return sent;
        }
        // Idle line: no burst later
        self.credit = self.credit.min(self.byte_time);
        sent
    }
}
