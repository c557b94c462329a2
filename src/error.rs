//! Crate-wide error taxonomy.
//!
//! Each variant corresponds to one row of the error-handling policy table:
//! malformed control input, missing audio, backend failures, VAD fallback,
//! and remote-transport failures all get a typed home here so the boundary
//! that turns them into outbound `error` events has a single match to write.

use thiserror::Error;

/// Errors raised while decoding the wire audio format (base64 PCM16).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 audio_data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("audio_data length {0} is not a multiple of 2 bytes (PCM16)")]
    UnalignedSamples(usize),
}

/// Errors raised by a voice-activity gate.
#[derive(Debug, Error)]
pub enum VadError {
    #[error("VAD model not available: {0}")]
    ModelNotAvailable(String),

    #[error("VAD inference error: {0}")]
    InferenceError(String),
}

/// Uniform error type for transcription backends.
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    #[error("inference error: {0}")]
    InferenceError(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("backend not implemented: {0}")]
    NotImplemented(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("remote transport error: {0}")]
    Transport(String),

    #[error("remote request timed out")]
    Timeout,

    #[error("all redundant replicas failed")]
    AllReplicasFailed,
}

impl From<anyhow::Error> for BackendError {
    fn from(err: anyhow::Error) -> Self {
        BackendError::InferenceError(err.to_string())
    }
}

/// Errors raised while parsing an inbound control-channel line.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing audio_data field")]
    MissingAudioData,

    #[error("unknown request type: {0}")]
    UnknownType(String),
}

/// Top-level crate error, used by startup/config paths that need `?`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Vad(#[from] VadError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
