pub mod ast;
pub mod binding;
pub mod compiler;
pub mod config;
pub mod decoder;
pub mod diagnostic;
pub mod document;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod file;
pub mod lexer;
pub mod logging;
pub mod opcode;
pub mod parser;
pub mod render;
pub mod renderer;
pub mod score;
pub mod token;

use std::sync::Arc;

use crate::binding::EngineBinding;
use crate::dsp::engine::CsdEngine;
use crate::logging::NullLog;
use wasm_bindgen::prelude::*;

pub use crate::config::DecoderConfig;
pub use crate::decoder::{DecoderSession, FileInfo, OpenReason};
pub use crate::error::{CsdError, DecoderError, EngineError};
pub use crate::render::{encode_wav, render_document, RenderedAudio};
pub use crate::renderer::{AudioChunk, Renderer};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the csd_input_core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: compile a CSD document and return its stream parameters
/// (sample rate, control rate, channels, 0dbfs, ksmps, frames per host chunk).
#[wasm_bindgen]
pub fn csd_stream_info(source: &str) -> Result<JsValue, JsValue> {
    let mut binding = EngineBinding::new(CsdEngine::new(), Arc::new(NullLog));
    let params = binding.load(source).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    serde_wasm_bindgen::to_value(params).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render a CSD document to interleaved f32 samples in
/// `[-1, 1]` for AudioWorklet playback.
#[wasm_bindgen]
pub fn render_csd_samples(source: &str, max_seconds: f64) -> Result<Vec<f32>, JsValue> {
    let audio = render_document(source, max_seconds, Arc::new(NullLog))
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(audio.normalized().map(|s| s as f32).collect())
}

/// WASM-exposed: render a CSD document to a WAV byte array.
#[wasm_bindgen]
pub fn render_csd_wav(source: &str, max_seconds: f64) -> Result<Vec<u8>, JsValue> {
    let audio = render_document(source, max_seconds, Arc::new(NullLog))
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(encode_wav(&audio))
}

/// WASM-exposed: compile a CSD document and return a rendered error report,
/// or an empty string when it compiles.
#[wasm_bindgen]
pub fn check_csd(source: &str) -> String {
    match compiler::compile_document(source) {
        Ok(_) => String::new(),
        Err(err) => diagnostic::render_report(&err, source, "input.csd"),
    }
}
