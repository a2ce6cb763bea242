use std::time::Duration;

/// Host video frame rates: PAL, NTSC and the mono monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FrameRate {
    #[default]
    #[value(name = "50")]
    Pal,
    #[value(name = "60")]
    Ntsc,
    #[value(name = "71")]
    Mono,
}

impl FrameRate {
    pub fn hz(&self) -> u32 {
        match self {
            FrameRate::Pal => 50,
            FrameRate::Ntsc => 60,
            FrameRate::Mono => 71,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.hz()
    }
}

/// Produces one vsync tick per elapsed frame period.
#[derive(Debug)]
pub struct FrameClock {
    period: Duration,
    elapsed: Duration,
    frames: u64,
}

impl FrameClock {
    pub fn new(rate: FrameRate) -> Self {
        Self {
            period: rate.period(),
            elapsed: Duration::ZERO,
            frames: 0,
        }
    }

    /// Total ticks produced so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Time until the next tick is due.
    pub fn until_next(&self) -> Duration {
        self.period.saturating_sub(self.elapsed)
    }

    /// Advance by `dt`. Returns the number of frames that ended.
    pub fn advance(&mut self, dt: Duration) -> u32 {
        self.elapsed += dt;
        let mut ticks = 0;
        while self.elapsed >= self.period {
            self.elapsed -= self.period;
            ticks += 1;
        }
        self.frames += ticks as u64;
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FrameRate::Pal, 20_000)]
    #[case(FrameRate::Ntsc, 16_666)]
    #[case(FrameRate::Mono, 14_084)]
    fn test_period(#[case] rate: FrameRate, #[case] micros: u128) {
        assert_eq!(rate.period().as_micros(), micros);
    }

    #[test]
    fn test_one_second_of_pal() {
        let mut clock = FrameClock::new(FrameRate::Pal);
        let mut ticks = 0;
        for _ in 0..1000 {
            ticks += clock.advance(Duration::from_millis(1));
        }
        assert_eq!(ticks, 50);
        assert_eq!(clock.frames(), 50);
    }

    #[test]
    fn test_catch_up_after_stall() {
        let mut clock = FrameClock::new(FrameRate::Pal);
        assert_eq!(clock.advance(Duration::from_millis(15)), 0);
        assert_eq!(clock.until_next(), Duration::from_millis(5));
        assert_eq!(clock.advance(Duration::from_millis(65)), 4);
        assert_eq!(clock.until_next(), Duration::from_millis(20));
    }
}
