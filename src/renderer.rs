//! Renderer: batches whole control cycles into host chunks.

use crate::binding::EngineBinding;
use crate::engine::{Sample, SynthEngine, TickStatus};

/// A block of interleaved frames handed to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames: usize,
    data: Vec<Sample>,
}

impl AudioChunk {
    pub fn new() -> Self {
        AudioChunk::default()
    }

    /// The rendered frames, `frames × channels` samples.
    pub fn samples(&self) -> &[Sample] {
        let len = (self.frames * self.channels as usize).min(self.data.len());
        &self.data[..len]
    }

    /// Allocated storage, which may exceed the rendered frames.
    pub fn storage_len(&self) -> usize {
        self.data.len()
    }
}

/// Drives an [`EngineBinding`] to fill host chunks.
pub struct Renderer<E: SynthEngine> {
    binding: EngineBinding<E>,
    /// Chunk being filled; swapped into the host chunk once complete.
    scratch: Vec<Sample>,
}

impl<E: SynthEngine> Renderer<E> {
    pub fn new(binding: EngineBinding<E>) -> Self {
        Renderer {
            binding,
            scratch: Vec::new(),
        }
    }

    pub fn binding(&self) -> &EngineBinding<E> {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut EngineBinding<E> {
        &mut self.binding
    }

    /// Fill `chunk` with whole control cycles until it holds at least
    /// frames-per-host-chunk frames.
    ///
    /// Returns `false` once the performance has ended: the final chunk
    /// carries the last cycle plus one silent frame, and every later call
    /// leaves `chunk` untouched. An engine whose output is shorter than a
    /// cycle is stopped and `chunk` is left untouched.
    pub fn render(&mut self, chunk: &mut AudioChunk) -> bool {
        if self.binding.output().is_none() {
            return false;
        }
        let Some(params) = self.binding.params().copied() else {
            return false;
        };
        let channels = params.channels as usize;
        let ksmps = params.ksmps as usize;
        let cycle_len = ksmps * channels;
        let fphc = params.frames_per_host_chunk;

        self.scratch.resize((fphc + 1) * channels, 0.0);

        let mut frames_rendered = 0;
        let mut more = true;
        loop {
            let status = self.binding.tick();
            let offset = frames_rendered * channels;
            match self.binding.output().and_then(|spout| spout.get(..cycle_len)) {
                Some(cycle) => self.scratch[offset..offset + cycle_len].copy_from_slice(cycle),
                None => {
                    self.binding.stop();
                    return false;
                }
            }
            frames_rendered += ksmps;

            if status == TickStatus::EndOfPerformance {
                let offset = frames_rendered * channels;
                self.scratch[offset..offset + channels].fill(0.0);
                frames_rendered += 1;
                self.binding.stop();
                more = false;
                break;
            }
            if frames_rendered >= fphc {
                break;
            }
        }

        std::mem::swap(&mut chunk.data, &mut self.scratch);
        chunk.sample_rate = params.sample_rate.round() as u32;
        chunk.channels = params.channels;
        chunk.frames = frames_rendered;
        more
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::binding::tests::ScriptedEngine;
    use crate::logging::NullLog;

    fn renderer(engine: ScriptedEngine) -> Renderer<ScriptedEngine> {
        let mut binding = EngineBinding::new(engine, Arc::new(NullLog));
        binding.load("script").unwrap();
        binding.start();
        Renderer::new(binding)
    }

    #[test]
    fn never_ending_score_fills_one_host_chunk() {
        let mut r = renderer(ScriptedEngine::new(44100.0, 441.0, 2, 100));
        let mut chunk = AudioChunk::new();
        assert!(r.render(&mut chunk));
        assert_eq!(chunk.frames, 600);
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.sample_rate, 44100);
        assert_eq!(chunk.storage_len(), 601 * 2);
        assert_eq!(r.binding().engine().ticks, 6);
        // Cycle n carries the value n.
        assert_eq!(chunk.samples()[0], 1.0);
        assert_eq!(chunk.samples()[599 * 2 + 1], 6.0);
    }

    #[test]
    fn end_of_performance_appends_one_silent_frame() {
        let mut engine = ScriptedEngine::new(44100.0, 441.0, 2, 100);
        engine.end_on_tick = Some(4);
        let mut r = renderer(engine);
        let mut chunk = AudioChunk::new();
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk.frames, 401);
        let samples = chunk.samples();
        assert_eq!(samples.len(), 802);
        assert_eq!(&samples[800..], &[0.0, 0.0]);
        // The final cycle is delivered in full.
        assert!(samples[600..800].iter().all(|s| *s == 4.0));
        assert!(!r.binding().is_running());

        let before = chunk.clone();
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk, before);
    }

    #[test]
    fn end_in_a_later_chunk() {
        let mut engine = ScriptedEngine::new(1000.0, 100.0, 1, 10);
        engine.end_on_tick = Some(60);
        let mut r = renderer(engine);
        let mut chunk = AudioChunk::new();
        // fphc = 520 frames = 52 ticks.
        assert!(r.render(&mut chunk));
        assert_eq!(chunk.frames, 520);
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk.frames, 8 * 10 + 1);
        assert_eq!(chunk.samples()[0], 53.0);
    }

    #[test]
    fn short_engine_output_leaves_chunk_untouched() {
        let mut engine = ScriptedEngine::new(44100.0, 441.0, 2, 100);
        engine.short_spout_on_tick = Some(8);
        let mut r = renderer(engine);
        let mut chunk = AudioChunk::new();
        assert!(r.render(&mut chunk));
        let before = chunk.clone();

        // Ticks 7 and 8 belong to the second chunk; tick 8 comes back short.
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk, before);
        assert!(!r.binding().is_running());
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk, before);
    }

    #[test]
    fn render_before_start_is_a_no_op() {
        let binding = EngineBinding::new(ScriptedEngine::new(44100.0, 441.0, 2, 100), Arc::new(NullLog));
        let mut r = Renderer::new(binding);
        let mut chunk = AudioChunk::new();
        assert!(!r.render(&mut chunk));
        assert_eq!(chunk, AudioChunk::new());
    }

    #[test]
    fn frame_counts_hold_for_many_shapes() {
        for ksmps in [1u32, 7, 32, 100, 513, 1024] {
            for channels in [1u32, 2, 6] {
                for end in [1usize, 3, 1000] {
                    let mut engine = ScriptedEngine::new(48000.0, 48000.0 / ksmps as f64, channels, ksmps);
                    engine.end_on_tick = Some(end);
                    let mut r = renderer(engine);
                    let fphc = crate::binding::frames_per_host_chunk(ksmps as usize);
                    let mut chunk = AudioChunk::new();
                    let mut total_ticks = 0;
                    loop {
                        let more = r.render(&mut chunk);
                        assert!(chunk.frames * channels as usize <= chunk.storage_len());
                        if more {
                            assert_eq!(chunk.frames, fphc);
                            total_ticks += fphc / ksmps as usize;
                        } else {
                            assert_eq!((chunk.frames - 1) % ksmps as usize, 0);
                            total_ticks += (chunk.frames - 1) / ksmps as usize;
                            let last = &chunk.samples()[(chunk.frames - 1) * channels as usize..];
                            assert!(last.iter().all(|s| *s == 0.0));
                            break;
                        }
                    }
                    assert_eq!(total_ticks, end);
                }
            }
        }
    }
}
