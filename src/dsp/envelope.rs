//! Breakpoint envelope generators: `line`, `expon`, `linseg`, `expseg`, `linen`.

/// Segment interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
struct Segment {
    steps: u64,
    /// Added (linear) or multiplied (exponential) every step.
    increment: f64,
    target: f64,
}

/// A piecewise envelope stepped once per control or audio sample.
///
/// The first call to [`Envelope::next_value`] returns the start value.
#[derive(Debug, Clone)]
pub struct Envelope {
    curve: Curve,
    segments: Vec<Segment>,
    index: usize,
    counter: u64,
    value: f64,
}

impl Envelope {
    /// Build from `value, duration, value [, duration, value …]` with
    /// durations in seconds. With `extend`, the last segment keeps its
    /// slope past its end (`line`, `expon`); otherwise the final value is
    /// held (`linseg`, `expseg`).
    pub fn new(curve: Curve, breakpoints: &[f64], step_rate: f64, extend: bool) -> Result<Self, String> {
        if breakpoints.len() < 3 || breakpoints.len() % 2 == 0 {
            return Err("envelope needs value, duration, value [, duration, value …]".into());
        }
        if curve == Curve::Exponential {
            let first = breakpoints[0];
            let values = breakpoints.iter().step_by(2);
            if values.clone().any(|v| *v == 0.0 || v.signum() != first.signum()) {
                return Err("exponential values must be non-zero and share one sign".into());
            }
        }

        let mut segments = Vec::with_capacity(breakpoints.len() / 2);
        let mut value = breakpoints[0];
        for pair in breakpoints[1..].chunks(2) {
            let (duration, target) = (pair[0], pair[1]);
            if duration < 0.0 {
                return Err(format!("negative segment duration {duration}"));
            }
            let steps = (duration * step_rate).round() as u64;
            let increment = match (curve, steps) {
                (Curve::Linear, 0) => 0.0,
                (Curve::Exponential, 0) => 1.0,
                (Curve::Linear, n) => (target - value) / n as f64,
                (Curve::Exponential, n) => (target / value).powf(1.0 / n as f64),
            };
            segments.push(Segment {
                steps,
                increment,
                target,
            });
            value = target;
        }
        if extend {
            if let Some(last) = segments.last_mut() {
                last.steps = u64::MAX;
            }
        }

        Ok(Envelope {
            curve,
            segments,
            index: 0,
            counter: 0,
            value: breakpoints[0],
        })
    }

    pub fn next_value(&mut self) -> f64 {
        let out = self.value;
        self.advance();
        out
    }

    fn advance(&mut self) {
        // Zero-length segments jump straight to their target.
        while let Some(segment) = self.segments.get(self.index) {
            if self.counter < segment.steps {
                self.value = match self.curve {
                    Curve::Linear => self.value + segment.increment,
                    Curve::Exponential => self.value * segment.increment,
                };
                self.counter += 1;
                if self.counter == segment.steps {
                    self.value = segment.target;
                    self.index += 1;
                    self.counter = 0;
                }
                return;
            }
            self.value = segment.target;
            self.index += 1;
            self.counter = 0;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.segments.len()
    }
}

/// Trapezoid gain for `linen`: linear rise, hold, linear decay ending at `dur`.
#[derive(Debug, Clone)]
pub struct Linen {
    rise: u64,
    decay_start: u64,
    decay: u64,
    counter: u64,
}

impl Linen {
    pub fn new(rise: f64, duration: f64, decay: f64, step_rate: f64) -> Result<Self, String> {
        if rise < 0.0 || decay < 0.0 {
            return Err("linen rise and decay must not be negative".into());
        }
        let rise = (rise * step_rate).round() as u64;
        let decay = (decay * step_rate).round() as u64;
        let total = (duration.max(0.0) * step_rate).round() as u64;
        Ok(Linen {
            rise,
            decay_start: total.saturating_sub(decay),
            decay,
            counter: 0,
        })
    }

    pub fn next_gain(&mut self) -> f64 {
        let n = self.counter;
        self.counter = self.counter.saturating_add(1);
        let up = if n < self.rise {
            n as f64 / self.rise as f64
        } else {
            1.0
        };
        let down = if self.decay == 0 || n < self.decay_start {
            1.0
        } else {
            (1.0 - (n - self.decay_start) as f64 / self.decay as f64).max(0.0)
        };
        up.min(down)
    }
}
