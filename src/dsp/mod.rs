//! DSP: the built-in CSD performance engine and its unit generators.
//!
//! Everything runs in plain Rust at `f64`, one control cycle of `ksmps`
//! frames at a time, so offline rendering and WASM playback produce the
//! same samples.

pub mod engine;
pub mod envelope;
pub mod filter;
pub mod oscillator;
pub mod table;
pub mod voice;
