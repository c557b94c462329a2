//! Remote HTTP-race backend (spec. §4.5.4): encode the committed segment
//! as WAV, POST it to `PARALLEL_REQUESTS` replicas concurrently via
//! [`crate::dispatcher::race`], keep whichever responds first. Segments
//! are fully independent — no shared rate limiter or connection reuse
//! across segments, per `asr_siliconflow_worker.py`'s module docstring.
//! Does not implement `push`: this backend has no online pass, only a
//! per-segment commit (spec. §4.5.4 describes no streaming partials).

use std::time::Duration;

use serde::Deserialize;

use super::{Continuation, DecodeResult};
use crate::dispatcher::{race, RaceError};
use crate::error::BackendError;
use crate::segmenter::Segment;

pub const DEFAULT_PARALLEL_REQUESTS: usize = 2;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Default)]
pub struct NoContinuationMarker;

impl Continuation for NoContinuationMarker {
    fn clear(&self) {}
}

#[derive(Debug, Deserialize)]
struct RaceResponse {
    #[serde(default)]
    text: String,
}

pub struct RemoteHttpRaceEngine {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
    parallel_requests: usize,
    request_timeout: Duration,
}

impl RemoteHttpRaceEngine {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        parallel_requests: usize,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
            parallel_requests,
            request_timeout,
        })
    }

    pub async fn start(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// No online pass for this backend (spec. §4.5.4).
    pub async fn push(&self, _frame: &[f32]) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    pub async fn commit(&self, segment: &Segment) -> Result<DecodeResult, BackendError> {
        let wav_bytes = crate::audio_codec::encode_wav_16k_mono(&segment.samples)
            .map_err(|e| BackendError::InvalidAudio(e.to_string()))?;

        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let http = self.http.clone();

        let result = race(self.parallel_requests, self.request_timeout, move |_id| {
            let wav_bytes = wav_bytes.clone();
            let endpoint = endpoint.clone();
            let api_key = api_key.clone();
            let http = http.clone();
            async move {
                let resp = http
                    .post(&endpoint)
                    .header("Authorization", format!("Bearer {api_key}"))
                    .header("Content-Type", "audio/wav")
                    .body(wav_bytes)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                if !resp.status().is_success() {
                    return Err(format!("status {}", resp.status()));
                }
                let parsed: RaceResponse = resp.json().await.map_err(|e| e.to_string())?;
                Ok::<_, String>(parsed.text)
            }
        })
        .await;

        match result {
            Ok(won) => {
                tracing::debug!(replica_id = won.replica_id, latency_ms = won.latency_ms, "remote_http_race replica won");
                Ok(DecodeResult {
                    raw_text: won.value.clone(),
                    punctuated_text: won.value,
                    is_final: true,
                    per_segment_times: None,
                    replica_id: Some(won.replica_id),
                    latency_ms: Some(won.latency_ms),
                })
            }
            Err(RaceError::AllFailed(e)) => Err(BackendError::Transport(e)),
            Err(RaceError::Timeout) => Err(BackendError::Timeout),
        }
    }

    pub async fn reset(&self) -> Result<(), BackendError> {
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
    fn defaults_match_spec_values() {
        assert_eq!(DEFAULT_PARALLEL_REQUESTS, 2);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(3));
        assert_eq!(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs(25));
    }
}
