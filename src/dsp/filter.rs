//! First-order recursive low-pass filter (`tone`).

use std::f64::consts::PI;

/// One-pole low-pass with the classic Csound coefficient formula:
/// `b = 2 - cos(2π·hp/sr)`, `c2 = b - √(b² - 1)`, `c1 = 1 - c2`.
#[derive(Debug, Clone)]
pub struct Tone {
    c1: f64,
    c2: f64,
    previous: f64,
    /// Cutoff the coefficients were computed for.
    cutoff: f64,
    sample_rate: f64,
}

impl Tone {
    pub fn new(sample_rate: f64) -> Self {
        Tone {
            c1: 1.0,
            c2: 0.0,
            previous: 0.0,
            cutoff: f64::NAN,
            sample_rate,
        }
    }

    /// Recompute coefficients when the half-power point moves.
    pub fn set_cutoff(&mut self, cutoff: f64) {
        if cutoff == self.cutoff {
            return;
        }
        self.cutoff = cutoff;
        let b = 2.0 - (2.0 * PI * cutoff / self.sample_rate).cos();
        self.c2 = b - (b * b - 1.0).sqrt();
        self.c1 = 1.0 - self.c2;
    }

    pub fn process(&mut self, input: f64) -> f64 {
        self.previous = self.c1 * input + self.c2 * self.previous;
        self.previous
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_passes_through() {
        let mut f = Tone::new(44100.0);
        f.set_cutoff(1000.0);
        let mut out = 0.0;
        for _ in 0..44100 {
            out = f.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-6, "DC should pass a low-pass, got {out}");
    }

    #[test]
    fn attenuates_nyquist() {
        let mut f = Tone::new(44100.0);
        f.set_cutoff(100.0);
        let mut peak: f64 = 0.0;
        for n in 0..4410 {
            let x = if n % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.process(x);
            if n > 2000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.01, "Nyquist should be attenuated, got {peak}");
    }

    #[test]
    fn zero_cutoff_blocks_signal() {
        let mut f = Tone::new(44100.0);
        f.set_cutoff(0.0);
        assert_eq!(f.process(1.0), 0.0);
        f.reset();
        assert_eq!(f.process(0.0), 0.0);
    }
}
