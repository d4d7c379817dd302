//! Offline rendering: drives a decoder session to completion and encodes WAV.

use std::sync::Arc;

use serde::Serialize;

use crate::config::DecoderConfig;
use crate::decoder::{DecoderSession, OpenReason};
use crate::dsp::engine::CsdEngine;
use crate::engine::Sample;
use crate::error::DecoderError;
use crate::file::MemoryFileSource;
use crate::logging::Logger;
use crate::renderer::AudioChunk;

/// A whole performance, interleaved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub channels: u32,
    /// Full-scale level of the samples.
    pub zero_dbfs: f64,
    pub samples: Vec<Sample>,
    /// `false` when the time limit cut the performance short.
    pub completed: bool,
}

impl RenderedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Samples scaled so that `0dbfs` maps to 1.0.
    pub fn normalized(&self) -> impl Iterator<Item = f64> + '_ {
        let scale = 1.0 / self.zero_dbfs;
        self.samples.iter().map(move |s| s * scale)
    }

    /// 16-bit PCM, clipped at full scale.
    pub fn pcm_i16(&self) -> Vec<i16> {
        self.normalized()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f64).round() as i16)
            .collect()
    }
}

/// Render `text` with the built-in engine for at most `max_seconds`.
pub fn render_document(text: &str, max_seconds: f64, logger: Arc<dyn Logger>) -> Result<RenderedAudio, DecoderError> {
    render_with_config(text, max_seconds, &DecoderConfig::default(), logger)
}

pub fn render_with_config(
    text: &str,
    max_seconds: f64,
    config: &DecoderConfig,
    logger: Arc<dyn Logger>,
) -> Result<RenderedAudio, DecoderError> {
    if !(max_seconds.is_finite() && max_seconds >= 0.0) {
        return Err(DecoderError::UnsupportedFormat(format!(
            "render limit {max_seconds} s must be a finite, non-negative number"
        )));
    }
    let mut session: DecoderSession<MemoryFileSource, CsdEngine> =
        DecoderSession::new(CsdEngine::new(), config, logger);
    session.open(MemoryFileSource::new(text), "memory.csd", OpenReason::Decode)?;
    session.decode_initialize(0)?;
    let Some(params) = session.params().copied() else {
        return Err(DecoderError::UnsupportedFormat("no performance parameters".into()));
    };

    let channels = params.channels as usize;
    let max_frames = (max_seconds * params.sample_rate) as usize;
    let mut samples = Vec::new();
    let mut chunk = AudioChunk::new();
    let mut completed = false;
    while samples.len() / channels < max_frames {
        let more = session.decode_run(&mut chunk);
        samples.extend_from_slice(chunk.samples());
        if !more {
            completed = true;
            break;
        }
    }
    samples.truncate(max_frames.saturating_mul(channels));

    Ok(RenderedAudio {
        sample_rate: params.sample_rate.round() as u32,
        channels: params.channels,
        zero_dbfs: params.zero_dbfs,
        samples,
        completed,
    })
}

/// Encode rendered audio as a 16-bit PCM WAV byte buffer.
pub fn encode_wav(audio: &RenderedAudio) -> Vec<u8> {
    let pcm = audio.pcm_i16();
    let channels = audio.channels as u16;
    let sample_rate = audio.sample_rate;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (pcm.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for sample in pcm {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLog;

    const CHORD: &str = r#"<CsoundSynthesizer>
<CsOptions>
-odac
</CsOptions>
<CsInstruments>
sr = 22050
ksmps = 50
nchnls = 2
0dbfs = 32768

giSaw ftgen 0, 0, 4096, -7, -1, 4096, 1

instr 1, 2
  iamp = ampdb(p4)
  kenv linen 1, 0.01, p3, 0.05
  asig oscili iamp * kenv, cpspch(p5), giSaw
  afilt tone asig, 2000
  outs afilt, afilt * 0.5
endin
</CsInstruments>
<CsScore>
t 0 120
i1 0 1 80 8.00
i2 0 1 80 8.04
i1 + . . 8.07
e
</CsScore>
</CsoundSynthesizer>
"#;

    #[test]
    fn renders_whole_score() {
        let audio = render_document(CHORD, 10.0, Arc::new(NullLog)).unwrap();
        assert!(audio.completed);
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channels, 2);
        // Two beats at 120 bpm: 1 s = 441 cycles of 50 frames, plus one silent frame.
        assert_eq!(audio.frames(), 441 * 50 + 1);
        let left_peak = audio.samples.iter().step_by(2).fold(0.0_f64, |m, s| m.max(s.abs()));
        let right_peak = audio.samples.iter().skip(1).step_by(2).fold(0.0_f64, |m, s| m.max(s.abs()));
        assert!(left_peak > 1000.0, "left peak {left_peak}");
        assert!((right_peak - left_peak * 0.5).abs() < 1e-6 * left_peak);
    }

    #[test]
    fn time_limit_truncates() {
        let audio = render_document(CHORD, 0.25, Arc::new(NullLog)).unwrap();
        assert!(!audio.completed);
        assert_eq!(audio.frames(), 5512);
    }

    #[test]
    fn invalid_limits_are_rejected() {
        for limit in [f64::INFINITY, f64::NAN, -1.0] {
            let err = render_document(CHORD, limit, Arc::new(NullLog)).unwrap_err();
            assert!(matches!(err, DecoderError::UnsupportedFormat(_)), "{limit}");
        }
    }

    #[test]
    fn huge_limit_ends_with_the_score() {
        let audio = render_document(CHORD, 1e300, Arc::new(NullLog)).unwrap();
        assert!(audio.completed);
        assert_eq!(audio.frames(), 441 * 50 + 1);
    }

    #[test]
    fn compile_errors_surface() {
        let err = render_document("<CsoundSynthesizer><CsInstruments>\ninstr 1\nendin\n</CsInstruments><CsScore>i9 0 1</CsScore></CsoundSynthesizer>", 1.0, Arc::new(NullLog)).unwrap_err();
        assert!(matches!(err, DecoderError::CompileFailed(_)));
    }

    #[test]
    fn wav_header_valid() {
        let audio = RenderedAudio {
            sample_rate: 44100,
            channels: 2,
            zero_dbfs: 1.0,
            samples: vec![0.5, -0.5, 2.0, -2.0],
            completed: true,
        };
        let wav = encode_wav(&audio);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);
        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 8);
        assert_eq!(wav.len(), 44 + 8);

        // Clipped at full scale.
        let third = i16::from_le_bytes([wav[48], wav[49]]);
        assert_eq!(third, i16::MAX);
    }

    #[test]
    fn pcm_scales_by_zero_dbfs() {
        let audio = RenderedAudio {
            sample_rate: 8000,
            channels: 1,
            zero_dbfs: 32768.0,
            samples: vec![16384.0, -32768.0],
            completed: true,
        };
        assert_eq!(audio.pcm_i16(), vec![16384, -32767]);
    }
}
