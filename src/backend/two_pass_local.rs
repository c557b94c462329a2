//! Two-pass local backend (spec. §4.5.1): a fast online pass for partials
//! plus a slower offline+punctuation pass for committed segments, backed
//! by `whisper-rs` for both passes (the FunASR-style `online_cache` is
//! approximated with `FullParams::set_initial_prompt`, whisper.cpp's own
//! continuation mechanism). Grounded on the teacher's
//! `backend/whisper_cpp.rs` `WhisperCppBackend::transcribe` for the
//! `WhisperContext`/`FullParams`/`state.full`/segment-iteration pattern.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use super::{Continuation, DecodeResult};
use crate::error::BackendError;
use crate::segmenter::Segment;
use crate::vad::device::Device;

/// Completed sentences kept as context for the next offline+punctuation
/// pass (spec. supplement §4.5, grounded in
/// `original_source/desktop/backend/asr/*_worker.py`'s fixed few-shot
/// prompt): a fixed-size window, not a learned context model.
const PUNCTUATION_CONTEXT_SENTENCES: usize = 2;

/// Continuation cache for the online pass: the last decoded text, reused
/// as an `initial_prompt` so the next online decode has context.
#[derive(Debug, Default)]
pub struct PromptContinuation {
    last_text: Mutex<String>,
}

impl Continuation for PromptContinuation {
    fn clear(&self) {
        self.last_text.lock().clear();
    }
}

pub struct TwoPassLocalEngine {
    context: WhisperContext,
    online_state: Mutex<WhisperState>,
    offline_state: Mutex<WhisperState>,
    online_buffer: Mutex<Vec<f32>>,
    continuation: PromptContinuation,
    sentence_history: Mutex<VecDeque<String>>,
    language: String,
    threads: i32,
    sample_rate: usize,
}

/// Frame count (at 16 kHz) accumulated before an online re-decode fires.
const ONLINE_CHUNK_SAMPLES: usize = 16_000; // 1.0s, matches MIN_AUDIO_SEC default

impl TwoPassLocalEngine {
    pub fn new(
        model_path: impl AsRef<Path>,
        language: impl Into<String>,
        threads: i32,
        sample_rate: usize,
        device: Device,
    ) -> Result<Self, BackendError> {
        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu = device != Device::Cpu;
        let model_path_str = model_path
            .as_ref()
            .to_str()
            .ok_or_else(|| BackendError::Configuration("invalid model path encoding".into()))?;
        let context = WhisperContext::new_with_params(model_path_str, ctx_params)
            .map_err(|e| BackendError::ModelNotAvailable(format!("{e:?}")))?;
        let online_state = context
            .create_state()
            .map_err(|e| BackendError::ModelNotAvailable(format!("{e:?}")))?;
        let offline_state = context
            .create_state()
            .map_err(|e| BackendError::ModelNotAvailable(format!("{e:?}")))?;

        Ok(Self {
            context,
            online_state: Mutex::new(online_state),
            offline_state: Mutex::new(offline_state),
            online_buffer: Mutex::new(Vec::new()),
            continuation: PromptContinuation::default(),
            sentence_history: Mutex::new(VecDeque::with_capacity(PUNCTUATION_CONTEXT_SENTENCES)),
            language: language.into(),
            threads,
            sample_rate,
        })
    }

    fn decode(
        &self,
        state: &mut WhisperState,
        samples: &[f32],
        beam: bool,
        initial_prompt: Option<&str>,
    ) -> Result<String, BackendError> {
        let mut params = if beam {
            FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: -1.0,
            })
        } else {
            FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
        };
        params.set_n_threads(self.threads);
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        if let Some(prompt) = initial_prompt {
            if !prompt.is_empty() {
                params.set_initial_prompt(prompt);
            }
        }

        state
            .full(params, samples)
            .map_err(|e| BackendError::InferenceError(format!("{e:?}")))?;

        let mut text = String::new();
        let n = state.full_n_segments();
        for i in 0..n {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(s) = segment.to_str() {
                    text.push_str(s);
                }
            }
        }
        Ok(text.trim().to_string())
    }

    pub async fn start(&self) -> Result<(), BackendError> {
        let _ = &self.context;
        Ok(())
    }

    pub async fn push(&self, frame: &[f32]) -> Result<Option<String>, BackendError> {
        let mut buf = self.online_buffer.lock();
        buf.extend_from_slice(frame);
        if buf.len() < ONLINE_CHUNK_SAMPLES {
            return Ok(None);
        }
        let samples = buf.clone();
        drop(buf);

        let prompt = self.continuation.last_text.lock().clone();
        let mut state = self.online_state.lock();
        let text = self.decode(&mut state, &samples, false, Some(&prompt))?;
        *self.continuation.last_text.lock() = text.clone();
        Ok(Some(text))
    }

    pub async fn commit(&self, segment: &Segment) -> Result<DecodeResult, BackendError> {
        self.online_buffer.lock().clear();
        let context = {
            let history = self.sentence_history.lock();
            history.iter().cloned().collect::<Vec<_>>().join(" ")
        };
        let mut state = self.offline_state.lock();
        let raw = self.decode(&mut state, &segment.samples, true, Some(context.as_str()))?;
        drop(state);
        // Punctuation pass: whisper.cpp already punctuates; treat raw as
        // the punctuated output (spec. §9: no separate punctuation model
        // is available in this crate's dependency set).
        self.continuation.clear();

        let (mut sentences, remainder) = crate::assembler::split_sentences(&raw, 1);
        if !remainder.is_empty() {
            sentences.push(remainder);
        }
        let mut history = self.sentence_history.lock();
        for s in sentences {
            history.push_back(s);
            while history.len() > PUNCTUATION_CONTEXT_SENTENCES {
                history.pop_front();
            }
        }
        drop(history);

        Ok(DecodeResult {
            raw_text: raw.clone(),
            punctuated_text: raw,
            is_final: true,
            per_segment_times: None,
            replica_id: None,
            latency_ms: None,
        })
    }

    pub async fn reset(&self) -> Result<(), BackendError> {
        self.online_buffer.lock().clear();
        self.continuation.clear();
        self.sentence_history.lock().clear();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_chunk_threshold_matches_min_audio_sec_default() {
        assert_eq!(ONLINE_CHUNK_SAMPLES, 16_000);
    }
}
