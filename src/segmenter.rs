//! Speech/silence segmentation state machine (spec. §4.3).
//!
//! One `Segmenter` per session. Consumes per-frame speech/silence
//! classifications plus control-channel triggers and emits ready-to-commit
//! `Segment`s. Generalizes the state transitions the teacher's `SileroVad`
//! hard-codes into one Silero-specific struct into a backend-agnostic
//! component that sits downstream of any `VoiceActivityDetector`.

use serde::{Deserialize, Serialize};

/// Why a segment was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTrigger {
    Silence,
    MaxDuration,
    ForceCommit,
    Final,
    /// streaming_local's stall-detection commit (spec. §4.5.2, §8): tail
    /// text identical across `SAME_OUTPUT_THRESHOLD` decodes with no
    /// terminator. Never produced by the `Segmenter` state machine itself.
    StableTail,
}

impl CommitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitTrigger::Silence => "silence",
            CommitTrigger::MaxDuration => "max_duration",
            CommitTrigger::ForceCommit => "force_commit",
            CommitTrigger::Final => "final",
            CommitTrigger::StableTail => "stable_tail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub samples: Vec<f32>,
    pub seq: u64,
    pub trigger: CommitTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
    TrailingSilence,
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: usize,
    /// Consecutive silent frames in TrailingSilence before a silence commit.
    pub silence_threshold_chunks: usize,
    /// Trailing-silence samples retained when entering TrailingSilence.
    pub silence_buffer_keep_frames: usize,
    /// Hard ceiling on buffered-segment duration before a forced commit.
    pub max_buffer_sec: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            silence_threshold_chunks: 2,
            silence_buffer_keep_frames: 2,
            max_buffer_sec: 5.0,
        }
    }
}

/// Per-session segmentation state machine.
pub struct Segmenter {
    config: SegmenterConfig,
    state: State,
    buffer: Vec<f32>,
    silence_chunks: usize,
    trailing_silence_frames: Vec<Vec<f32>>,
    /// Silent samples appended to `buffer` since the current trailing-silence
    /// run began, so `emit` can trim the buffer back to the kept window.
    silence_samples_appended: usize,
    seq: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            buffer: Vec::new(),
            silence_chunks: 0,
            trailing_silence_frames: Vec::new(),
            silence_samples_appended: 0,
            seq: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, State::Speaking | State::TrailingSilence)
    }

    fn max_buffer_samples(&self) -> usize {
        (self.config.max_buffer_sec * self.config.sample_rate as f32) as usize
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.trailing_silence_frames.clear();
        self.silence_chunks = 0;
        self.silence_samples_appended = 0;
    }

    /// Reset all state for a new session/reset_session, without changing `seq`.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.reset_buffer();
    }

    /// Reset including the `segment_seq` counter (brand-new session).
    pub fn reset_full(&mut self) {
        self.reset();
        self.seq = 0;
    }

    fn emit(&mut self, trigger: CommitTrigger) -> Option<Segment> {
        if self.buffer.is_empty() {
            self.reset_buffer();
            self.state = State::Idle;
            return None;
        }
        // Trim any silent tail beyond `silence_buffer_keep_frames` back to the
        // kept window; `trailing_silence_frames` already holds exactly that
        // window, so the excess is whatever was appended beyond it.
        let kept_samples: usize = self.trailing_silence_frames.iter().map(|f| f.len()).sum();
        if self.silence_samples_appended > kept_samples {
            let excess = self.silence_samples_appended - kept_samples;
            let new_len = self.buffer.len().saturating_sub(excess);
            self.buffer.truncate(new_len);
        }
        let samples = std::mem::take(&mut self.buffer);
        let seq = self.next_seq();
        self.reset_buffer();
        self.state = State::Idle;
        Some(Segment {
            samples,
            seq,
            trigger,
        })
    }

    /// Feed one classified frame through the state machine.
    ///
    /// Returns a `Segment` if this frame caused a commit (silence or
    /// max-duration trigger).
    pub fn push_frame(&mut self, frame: &[f32], is_speech: bool) -> Option<Segment> {
        if frame.is_empty() {
            return None;
        }

        match (self.state, is_speech) {
            (State::Idle, true) => {
                self.buffer.extend_from_slice(frame);
                self.state = State::Speaking;
            }
            (State::Idle, false) => {
                // drop
            }
            (State::Speaking, true) => {
                self.buffer.extend_from_slice(frame);
                self.silence_chunks = 0;
            }
            (State::Speaking, false) => {
                self.trailing_silence_frames.push(frame.to_vec());
                while self.trailing_silence_frames.len() > self.config.silence_buffer_keep_frames {
                    self.trailing_silence_frames.remove(0);
                }
                self.buffer.extend_from_slice(frame);
                self.silence_chunks = 1;
                self.silence_samples_appended = frame.len();
                self.state = State::TrailingSilence;
            }
            (State::TrailingSilence, true) => {
                self.buffer.extend_from_slice(frame);
                self.silence_chunks = 0;
                self.trailing_silence_frames.clear();
                self.silence_samples_appended = 0;
                self.state = State::Speaking;
            }
            (State::TrailingSilence, false) => {
                self.trailing_silence_frames.push(frame.to_vec());
                while self.trailing_silence_frames.len() > self.config.silence_buffer_keep_frames {
                    self.trailing_silence_frames.remove(0);
                }
                self.buffer.extend_from_slice(frame);
                self.silence_chunks += 1;
                self.silence_samples_appended += frame.len();
                if self.silence_chunks >= self.config.silence_threshold_chunks {
                    return self.emit(CommitTrigger::Silence);
                }
            }
        }

        if self.buffer.len() >= self.max_buffer_samples() {
            return self.emit(CommitTrigger::MaxDuration);
        }

        None
    }

    /// Explicit `force_commit` control message. No-op on an empty buffer.
    pub fn force_commit(&mut self) -> Option<Segment> {
        self.emit(CommitTrigger::ForceCommit)
    }

    /// streaming_local's stall-detection commit (spec. §4.5.2, §8): the
    /// unstable tail has repeated for `SAME_OUTPUT_THRESHOLD` decodes with
    /// no terminator, so the buffered audio commits without waiting for
    /// silence.
    pub fn stable_tail_commit(&mut self) -> Option<Segment> {
        self.emit(CommitTrigger::StableTail)
    }

    /// `final_chunk` flag on a streaming_chunk message.
    pub fn final_chunk(&mut self) -> Option<Segment> {
        self.emit(CommitTrigger::Final)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> Vec<f32> {
        vec![0.1; n]
    }

    #[test]
    fn silence_in_idle_produces_no_event() {
        let mut seg = Segmenter::new(SegmenterConfig::default());
        assert!(seg.push_frame(&frame(160), false).is_none());
        assert!(!seg.is_speaking());
    }

    #[test]
    fn silence_terminated_utterance_commits_with_seq_one() {
        let mut seg = Segmenter::new(SegmenterConfig {
            silence_threshold_chunks: 2,
            ..Default::default()
        });
        assert!(seg.push_frame(&frame(1600), true).is_none());
        assert!(seg.is_speaking());
        assert!(seg.push_frame(&frame(160), false).is_none());
        let commit = seg.push_frame(&frame(160), false).unwrap();
        assert_eq!(commit.trigger, CommitTrigger::Silence);
        assert_eq!(commit.seq, 1);
        assert!(!commit.samples.is_empty());
    }

    #[test]
    fn max_duration_triggers_commit_and_seq_increments() {
        let mut seg = Segmenter::new(SegmenterConfig {
            max_buffer_sec: 1.0,
            sample_rate: 16_000,
            ..Default::default()
        });
        let mut commit = None;
        for _ in 0..20 {
            if let Some(c) = seg.push_frame(&frame(1000), true) {
                commit = Some(c);
                break;
            }
        }
        let commit = commit.expect("expected a max_duration commit");
        assert_eq!(commit.trigger, CommitTrigger::MaxDuration);
        assert_eq!(commit.seq, 1);
    }

    #[test]
    fn force_commit_on_short_buffer_emits_once() {
        let mut seg = Segmenter::new(SegmenterConfig::default());
        seg.push_frame(&frame(12800), true); // 0.8s @ 16kHz
        let commit = seg.force_commit().unwrap();
        assert_eq!(commit.trigger, CommitTrigger::ForceCommit);
        assert_eq!(commit.seq, 1);
    }

    #[test]
    fn two_force_commits_with_no_audio_emit_at_most_once() {
        let mut seg = Segmenter::new(SegmenterConfig::default());
        seg.push_frame(&frame(1600), true);
        assert!(seg.force_commit().is_some());
        assert!(seg.force_commit().is_none());
    }

    #[test]
    fn reset_clears_buffer_without_emitting() {
        let mut seg = Segmenter::new(SegmenterConfig::default());
        seg.push_frame(&frame(1600), true);
        seg.reset_full();
        assert!(!seg.is_speaking());
        // next commit starts again at seq 1
        seg.push_frame(&frame(1600), true);
        let commit = seg.force_commit().unwrap();
        assert_eq!(commit.seq, 1);
    }

    #[test]
    fn empty_frame_is_a_no_op() {
        let mut seg = Segmenter::new(SegmenterConfig::default());
        assert!(seg.push_frame(&[], true).is_none());
        assert!(!seg.is_speaking());
    }
}
