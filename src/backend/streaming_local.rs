//! Streaming-local backend (spec. §4.5.2): emulates streaming over a
//! non-streaming whole-utterance decoder (e.g. Whisper) by periodically
//! re-decoding a trailing window and advancing a `timestamp_offset` as
//! segments stabilize. Grounded on the teacher's `whisper_cpp.rs` for the
//! `whisper-rs` call shape; the windowing/stall bookkeeping itself has no
//! teacher counterpart (the teacher always decodes a whole pre-recorded
//! buffer) and is built directly from spec. §4.5.2 and §9's open question
//! about dropped high-`no_speech_prob` segments.

use parking_lot::Mutex;
use std::path::Path;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use super::DecodeResult;
use crate::error::BackendError;
use crate::segmenter::Segment;
use crate::vad::device::Device;

pub const DEFAULT_MIN_AUDIO_SEC: f32 = 1.0;
pub const DEFAULT_WINDOW_SEC: f32 = 8.0;
pub const DEFAULT_NO_SPEECH_THRESHOLD: f32 = 0.45;
pub const DEFAULT_SAME_OUTPUT_THRESHOLD: u32 = 7;

/// One decoded segment's view for stall-bookkeeping purposes.
#[derive(Debug, Clone, Default)]
pub struct WindowSegment {
    pub text: String,
    pub no_speech_prob: f32,
}

/// Pure decode-bookkeeping state machine: given a stream of whole-window
/// decodes (each a list of segments), decides which prefix of segments has
/// "committed" (advanced the timestamp offset) and whether the trailing
/// tail has stalled long enough to force a commit without a terminator.
#[derive(Debug, Default)]
pub struct WindowState {
    pub committed_text: String,
    last_tail: String,
    same_output_count: u32,
    no_speech_threshold: f32,
    same_output_threshold: u32,
}

impl WindowState {
    pub fn new(no_speech_threshold: f32, same_output_threshold: u32) -> Self {
        Self {
            no_speech_threshold,
            same_output_threshold,
            ..Default::default()
        }
    }

    /// Feed one whole-window decode. Returns `(delta_to_emit, stall_commit)`
    /// where `stall_commit` is `Some(tail_text)` when the tail has been
    /// identical for `same_output_threshold` consecutive calls.
    pub fn update(&mut self, segments: &[WindowSegment]) -> (String, Option<String>) {
        if segments.is_empty() {
            return (String::new(), None);
        }

        // All but the last segment: commit if confidently speech, else
        // drop (spec. §9: dropped segments are neither committed nor
        // treated as silence).
        for seg in &segments[..segments.len() - 1] {
            if seg.no_speech_prob <= self.no_speech_threshold {
                if !self.committed_text.is_empty() {
                    self.committed_text.push(' ');
                }
                self.committed_text.push_str(seg.text.trim());
            }
        }

        let tail = segments.last().unwrap().text.trim().to_string();
        let delta = crate::assembler::extract_delta(&self.last_tail, &tail);

        if tail == self.last_tail && !tail.is_empty() {
            self.same_output_count += 1;
        } else {
            self.same_output_count = 0;
        }
        self.last_tail = tail.clone();

        let stall = if self.same_output_count >= self.same_output_threshold && !tail.is_empty() {
            self.same_output_count = 0;
            self.last_tail.clear();
            if !self.committed_text.is_empty() {
                self.committed_text.push(' ');
            }
            self.committed_text.push_str(&tail);
            Some(tail)
        } else {
            None
        };

        (delta, stall)
    }

    pub fn reset(&mut self) {
        *self = WindowState::new(self.no_speech_threshold, self.same_output_threshold);
    }
}

pub struct StreamingLocalEngine {
    context: WhisperContext,
    state: Mutex<WhisperState>,
    window: Mutex<WindowState>,
    audio: Mutex<Vec<f32>>,
    pending_since_decode: Mutex<usize>,
    stall_commit: Mutex<Option<String>>,
    language: String,
    threads: i32,
    window_samples: usize,
    min_new_samples: usize,
}

impl StreamingLocalEngine {
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
        let state = context
            .create_state()
            .map_err(|e| BackendError::ModelNotAvailable(format!("{e:?}")))?;

        Ok(Self {
            context,
            state: Mutex::new(state),
            window: Mutex::new(WindowState::new(
                DEFAULT_NO_SPEECH_THRESHOLD,
                DEFAULT_SAME_OUTPUT_THRESHOLD,
            )),
            audio: Mutex::new(Vec::new()),
            pending_since_decode: Mutex::new(0),
            stall_commit: Mutex::new(None),
            language: language.into(),
            threads,
            window_samples: (DEFAULT_WINDOW_SEC * sample_rate as f32) as usize,
            min_new_samples: (DEFAULT_MIN_AUDIO_SEC * sample_rate as f32) as usize,
        })
    }

    fn decode_window(&self, samples: &[f32]) -> Result<Vec<WindowSegment>, BackendError> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(false);

        let mut state = self.state.lock();
        state
            .full(params, samples)
            .map_err(|e| BackendError::InferenceError(format!("{e:?}")))?;

        let n = state.full_n_segments();
        let mut out = Vec::with_capacity(n as usize);
        for i in 0..n {
            if let Some(segment) = state.get_segment(i) {
                let text = segment.to_str().unwrap_or_default().to_string();
                let no_speech_prob = segment.no_speech_prob();
                out.push(WindowSegment { text, no_speech_prob });
            }
        }
        Ok(out)
    }

    pub async fn start(&self) -> Result<(), BackendError> {
        let _ = &self.context;
        Ok(())
    }

    pub async fn push(&self, frame: &[f32]) -> Result<Option<String>, BackendError> {
        {
            let mut audio = self.audio.lock();
            audio.extend_from_slice(frame);
            let mut pending = self.pending_since_decode.lock();
            *pending += frame.len();
            if *pending < self.min_new_samples {
                return Ok(None);
            }
            *pending = 0;
        }

        let samples = {
            let audio = self.audio.lock();
            let start = audio.len().saturating_sub(self.window_samples);
            audio[start..].to_vec()
        };
        if samples.is_empty() {
            return Ok(None);
        }

        let segments = self.decode_window(&samples)?;
        let mut window = self.window.lock();
        let (delta, stall) = window.update(&segments);
        if let Some(tail) = stall {
            *self.stall_commit.lock() = Some(tail);
        }
        if delta.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("{}{}", window.committed_text, delta)))
        }
    }

    /// Check whether the tail has stalled (exposed separately from `push`
    /// so the session manager can force a `stable_tail` commit even when
    /// no new audio has arrived to trigger another decode). Consumes the
    /// pending stall signal, if any.
    pub fn take_stall_commit(&self) -> Option<String> {
        self.stall_commit.lock().take()
    }

    pub async fn commit(&self, _segment: &Segment) -> Result<DecodeResult, BackendError> {
        let window = self.window.lock();
        let text = window.committed_text.clone();
        drop(window);
        self.audio.lock().clear();
        *self.pending_since_decode.lock() = 0;
        self.window.lock().reset();
        self.stall_commit.lock().take();
        Ok(DecodeResult {
            raw_text: text.clone(),
            punctuated_text: text,
            is_final: true,
            per_segment_times: None,
            replica_id: None,
            latency_ms: None,
        })
    }

    pub async fn reset(&self) -> Result<(), BackendError> {
        self.audio.lock().clear();
        *self.pending_since_decode.lock() = 0;
        self.window.lock().reset();
        self.stall_commit.lock().take();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, no_speech: f32) -> WindowSegment {
        WindowSegment {
            text: text.to_string(),
            no_speech_prob: no_speech,
        }
    }

    #[test]
    fn confident_leading_segments_commit_into_committed_text() {
        let mut w = WindowState::new(0.45, 7);
        let (_delta, stall) = w.update(&[seg("hello there.", 0.1), seg("tail", 0.1)]);
        assert_eq!(w.committed_text, "hello there.");
        assert!(stall.is_none());
    }

    #[test]
    fn high_no_speech_prob_segment_is_dropped_not_committed() {
        let mut w = WindowState::new(0.45, 7);
        w.update(&[seg("noisy garbage", 0.9), seg("tail", 0.1)]);
        assert!(w.committed_text.is_empty());
    }

    #[test]
    fn identical_tail_for_threshold_calls_triggers_stall_commit() {
        let mut w = WindowState::new(0.45, 3);
        for _ in 0..2 {
            let (_d, stall) = w.update(&[seg("stuck tail", 0.1)]);
            assert!(stall.is_none());
        }
        let (_d, stall) = w.update(&[seg("stuck tail", 0.1)]);
        assert_eq!(stall, Some("stuck tail".to_string()));
    }

    #[test]
    fn changing_tail_resets_same_output_counter() {
        let mut w = WindowState::new(0.45, 2);
        w.update(&[seg("a", 0.1)]);
        w.update(&[seg("b", 0.1)]);
        let (_d, stall) = w.update(&[seg("b", 0.1)]);
        assert!(stall.is_none());
    }
}
