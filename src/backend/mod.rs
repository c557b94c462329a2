//! Uniform backend contract (spec. §4.5, §9) fronting four recognizer
//! kinds. Generalizes the teacher's `TranscriptionBackend` enum-dispatch
//! (zero-cost, one enum variant per implementation, matched in every
//! method) from a single-shot batch-transcription call to the
//! start/push/commit/reset/stop streaming contract the orchestrator
//! needs.

pub mod factory;
pub mod remote_http_race;
pub mod remote_ws;
pub mod streaming_local;
pub mod two_pass_local;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BackendError;
use crate::segmenter::Segment;

/// Which recognizer kind a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    TwoPassLocal,
    StreamingLocal,
    RemoteWs,
    RemoteHttpRace,
}

impl Default for EngineType {
    fn default() -> Self {
        EngineType::StreamingLocal
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineType::TwoPassLocal => "two_pass_local",
            EngineType::StreamingLocal => "streaming_local",
            EngineType::RemoteWs => "remote_ws",
            EngineType::RemoteHttpRace => "remote_http_race",
        };
        write!(f, "{s}")
    }
}

/// One decoded sentence/segment description within a `DecodeOutput`
/// (spec. §9's "dynamic shape-dependent decoder outputs" normalization).
#[derive(Debug, Clone, Default)]
pub struct DecodeSegment {
    pub start: f32,
    pub end: f32,
    pub text: String,
    pub no_speech_prob: f32,
}

/// Normalized view of whatever a backend's native decode call returns
/// (string, tuple, or dict in the original implementation); every adapter
/// converts its raw output to this single shape at its boundary.
#[derive(Debug, Clone, Default)]
pub struct DecodeOutput {
    pub text: String,
    pub segments: Vec<DecodeSegment>,
}

/// Output of a single backend pass (spec. §3 "Decode Result").
#[derive(Debug, Clone, Default)]
pub struct DecodeResult {
    pub raw_text: String,
    pub punctuated_text: String,
    pub is_final: bool,
    pub per_segment_times: Option<Vec<(f32, f32)>>,
    /// Which race replica produced this result (remote_http_race only).
    pub replica_id: Option<usize>,
    /// Wall-clock latency of the winning replica, in milliseconds
    /// (remote_http_race only).
    pub latency_ms: Option<u64>,
}

/// Opaque per-session continuation state handed back to a streaming
/// decoder to carry prior context forward (spec. §9). Each backend owns
/// its concrete representation; the session only ever calls `clear()`.
pub trait Continuation: Send + Sync {
    fn clear(&self);
}

/// No continuation state at all — used by backends that are stateless
/// between commits (remote_http_race: segments are fully independent).
#[derive(Debug, Default)]
pub struct NoContinuation;

impl Continuation for NoContinuation {
    fn clear(&self) {}
}

pub use factory::create_engine;
pub use remote_http_race::RemoteHttpRaceEngine;
pub use remote_ws::RemoteWsEngine;
pub use streaming_local::StreamingLocalEngine;
pub use two_pass_local::TwoPassLocalEngine;

/// The unified per-session recognizer enum. Uses enum dispatch rather
/// than a boxed trait object, matching the teacher's `TranscriptionBackend`
/// architecture.
pub enum Engine {
    TwoPassLocal(TwoPassLocalEngine),
    StreamingLocal(StreamingLocalEngine),
    RemoteWs(RemoteWsEngine),
    RemoteHttpRace(RemoteHttpRaceEngine),
}

impl Engine {
    pub fn engine_type(&self) -> EngineType {
        match self {
            Engine::TwoPassLocal(_) => EngineType::TwoPassLocal,
            Engine::StreamingLocal(_) => EngineType::StreamingLocal,
            Engine::RemoteWs(_) => EngineType::RemoteWs,
            Engine::RemoteHttpRace(_) => EngineType::RemoteHttpRace,
        }
    }

    /// One-time handshake before the first frame of a session.
    pub async fn start(&self) -> Result<(), BackendError> {
        match self {
            Engine::TwoPassLocal(e) => e.start().await,
            Engine::StreamingLocal(e) => e.start().await,
            Engine::RemoteWs(e) => e.start().await,
            Engine::RemoteHttpRace(e) => e.start().await,
        }
    }

    /// Feed new audio for the online/streaming pass, returning an updated
    /// unstable-tail view if the backend produced one this call.
    pub async fn push(&self, frame: &[f32]) -> Result<Option<String>, BackendError> {
        match self {
            Engine::TwoPassLocal(e) => e.push(frame).await,
            Engine::StreamingLocal(e) => e.push(frame).await,
            Engine::RemoteWs(e) => e.push(frame).await,
            Engine::RemoteHttpRace(e) => e.push(frame).await,
        }
    }

    /// Finalize a committed segment.
    pub async fn commit(&self, segment: &Segment) -> Result<DecodeResult, BackendError> {
        match self {
            Engine::TwoPassLocal(e) => e.commit(segment).await,
            Engine::StreamingLocal(e) => e.commit(segment).await,
            Engine::RemoteWs(e) => e.commit(segment).await,
            Engine::RemoteHttpRace(e) => e.commit(segment).await,
        }
    }

    /// Consume a pending stall-commit signal (spec. §4.5.2, §8): only
    /// `StreamingLocal` ever produces one, from its tail-stability check in
    /// `push`.
    pub fn take_stall_commit(&self) -> Option<String> {
        match self {
            Engine::StreamingLocal(e) => e.take_stall_commit(),
            _ => None,
        }
    }

    /// Drop continuation state without finalizing (`reset_session`).
    pub async fn reset(&self) -> Result<(), BackendError> {
        match self {
            Engine::TwoPassLocal(e) => e.reset().await,
            Engine::StreamingLocal(e) => e.reset().await,
            Engine::RemoteWs(e) => e.reset().await,
            Engine::RemoteHttpRace(e) => e.reset().await,
        }
    }

    /// Release any held resources (connections, tokens).
    pub async fn stop(&self) -> Result<(), BackendError> {
        match self {
            Engine::TwoPassLocal(e) => e.stop().await,
            Engine::StreamingLocal(e) => e.stop().await,
            Engine::RemoteWs(e) => e.stop().await,
            Engine::RemoteHttpRace(e) => e.stop().await,
        }
    }
}
