//! Function tables (GEN routines) read by the table oscillators.

use std::f64::consts::PI;

use crate::score::TableDef;

/// Size of the sine table used when an oscillator names no table.
pub const DEFAULT_SINE_SIZE: usize = 16384;

/// A generated function table with one guard point after `len` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTable {
    pub number: u32,
    data: Vec<f64>,
}

impl FunctionTable {
    /// Run the GEN routine described by `def`. Returns a message on failure.
    pub fn generate(def: &TableDef) -> Result<Self, String> {
        if def.size < 2 {
            return Err(format!("ftable {} size {} is too small", def.number, def.size));
        }
        let mut data = match def.routine.abs() {
            10 => gen10(def.size, &def.args),
            7 => gen7(def.size, &def.args)?,
            other => return Err(format!("GEN{other} is not supported")),
        };
        if def.routine > 0 {
            normalize(&mut data);
        }
        // Guard point wraps to the start for interpolating lookups.
        data.push(data[0]);
        Ok(FunctionTable {
            number: def.number,
            data,
        })
    }

    /// Single-cycle sine, used as the default oscillator waveform.
    pub fn sine() -> Self {
        let def = TableDef {
            number: 0,
            size: DEFAULT_SINE_SIZE,
            routine: 10,
            args: vec![1.0],
            span: Default::default(),
        };
        let mut data = gen10(def.size, &def.args);
        data.push(data[0]);
        FunctionTable { number: 0, data }
    }

    /// Number of points excluding the guard point.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup at normalised phase `[0, 1)` without interpolation.
    pub fn lookup(&self, phase: f64) -> f64 {
        let idx = (phase * self.len() as f64) as usize;
        self.data[idx.min(self.len() - 1)]
    }

    /// Lookup at normalised phase `[0, 1)` with linear interpolation.
    pub fn lookup_interp(&self, phase: f64) -> f64 {
        let pos = phase * self.len() as f64;
        let idx = (pos as usize).min(self.len() - 1);
        let frac = pos - idx as f64;
        let a = self.data[idx];
        let b = self.data[idx + 1];
        a + (b - a) * frac
    }

    pub fn samples(&self) -> &[f64] {
        &self.data[..self.len()]
    }
}

/// GEN10: sum of harmonic sines with the given relative strengths.
fn gen10(size: usize, strengths: &[f64]) -> Vec<f64> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / size as f64;
            strengths
                .iter()
                .enumerate()
                .filter(|(_, a)| **a != 0.0)
                .map(|(h, a)| a * ((h + 1) as f64 * phase).sin())
                .sum()
        })
        .collect()
}

/// GEN7: straight-line segments `a, n1, b, n2, c, …` with lengths in points.
fn gen7(size: usize, args: &[f64]) -> Result<Vec<f64>, String> {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err("GEN7 needs value, length, value [, length, value …]".into());
    }
    let mut data = Vec::with_capacity(size);
    let mut value = args[0];
    for pair in args[1..].chunks(2) {
        let (len, target) = (pair[0], pair[1]);
        if len < 0.0 {
            return Err("GEN7 segment lengths must not be negative".into());
        }
        let points = len.round() as usize;
        for n in 0..points {
            if data.len() == size {
                break;
            }
            data.push(value + (target - value) * n as f64 / points as f64);
        }
        value = target;
    }
    // Remaining points hold the final value.
    data.resize(size, value);
    Ok(data)
}

fn normalize(data: &mut [f64]) {
    let peak = data.iter().fold(0.0_f64, |m, &x| m.max(x.abs()));
    if peak > 0.0 {
        for x in data.iter_mut() {
            *x /= peak;
        }
    }
}
