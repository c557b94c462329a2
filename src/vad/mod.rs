//! Voice-activity detection gate (spec. §4.2).
//!
//! Two implementations share a single `is_speech` contract: a cheap RMS
//! energy gate and a neural FSMN-style gate delegating to an ONNX session.
//! The FSMN gate falls back to RMS for a frame on model error, logging
//! once, matching the error-handling policy in spec. §7.

pub mod device;
pub mod fsmn;
pub mod rms;

pub use device::{select_device, Device};
pub use fsmn::FsmnVad;
pub use rms::RmsVad;

/// Frame-level speech/silence classifier.
pub trait VoiceActivityDetector: Send {
    /// Classify a single audio frame as speech (`true`) or silence (`false`).
    fn is_speech(&mut self, frame: &[f32]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadKind {
    Rms,
    Fsmn,
}

impl Default for VadKind {
    fn default() -> Self {
        VadKind::Rms
    }
}
