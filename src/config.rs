//! Runtime configuration, loaded once from the process environment
//! (spec. §6). Mirrors the teacher's `read_app_config()` pattern — read
//! once at startup, documented defaults, `tracing::warn!` (not
//! `println!`) on a missing/invalid value — but sources from
//! `std::env::var` instead of `config.toml`, since spec. §6 frames
//! configuration as "environment-like keyed settings".

use std::time::Duration;

use crate::assembler::DEFAULT_MIN_SENTENCE_CHARS;
use crate::backend::EngineType;
use crate::backend::remote_http_race::{DEFAULT_PARALLEL_REQUESTS, DEFAULT_REQUEST_TIMEOUT};
use crate::segmenter::SegmenterConfig;
use crate::vad::device::Device;
use crate::vad::VadKind;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineType,
    pub model: Option<String>,
    pub sample_rate: u32,
    pub rms_threshold: f32,
    pub vad_kind: VadKind,
    pub device: Device,
    pub silence_chunks: usize,
    pub max_buffer_sec: f32,
    pub min_sentence_chars: usize,
    pub parallel_requests: usize,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    pub secret_key: Option<String>,
    pub token_url: Option<String>,
    pub remote_ws_url: Option<String>,
    pub remote_http_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineType::default(),
            model: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            rms_threshold: crate::vad::rms::DEFAULT_RMS_THRESHOLD,
            vad_kind: VadKind::default(),
            device: Device::default(),
            silence_chunks: 2,
            max_buffer_sec: 5.0,
            min_sentence_chars: DEFAULT_MIN_SENTENCE_CHARS,
            parallel_requests: DEFAULT_PARALLEL_REQUESTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            api_key: None,
            app_id: None,
            secret_key: None,
            token_url: None,
            remote_ws_url: None,
            remote_http_endpoint: None,
        }
    }
}

impl AppConfig {
    /// `segmenter::SegmenterConfig` carries the subset of these fields
    /// the segmenter itself cares about.
    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            sample_rate: self.sample_rate as usize,
            silence_threshold_chunks: self.silence_chunks,
            silence_buffer_keep_frames: 2,
            max_buffer_sec: self.max_buffer_sec,
        }
    }

    /// Read configuration from environment variables, falling back to
    /// documented defaults and logging (via `tracing`) whenever a present
    /// value fails to parse.
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();

        if let Some(v) = env_str("ENGINE") {
            config.engine = match v.as_str() {
                "two_pass_local" => EngineType::TwoPassLocal,
                "streaming_local" => EngineType::StreamingLocal,
                "remote_ws" => EngineType::RemoteWs,
                "remote_http_race" => EngineType::RemoteHttpRace,
                other => {
                    tracing::warn!(value = other, "unknown ENGINE value, keeping default");
                    config.engine
                }
            };
        }

        config.model = env_str("MODEL");
        config.sample_rate = env_parse_or("SAMPLE_RATE", config.sample_rate);
        config.rms_threshold = env_parse_or("RMS_THRESHOLD", config.rms_threshold);
        config.silence_chunks = env_parse_or("SILENCE_CHUNKS", config.silence_chunks);
        config.max_buffer_sec = env_parse_or("MAX_BUFFER_SEC", config.max_buffer_sec);
        config.min_sentence_chars = env_parse_or("MIN_SENTENCE_CHARS", config.min_sentence_chars);
        config.parallel_requests = env_parse_or("PARALLEL_REQUESTS", config.parallel_requests);

        if let Some(secs) = env_str("REQUEST_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(v) = env_str("DEVICE") {
            config.device = match v.as_str() {
                "auto" => Device::Auto,
                "cpu" => Device::Cpu,
                "cuda" => Device::Cuda,
                "rocm" => Device::Rocm,
                "dml" => Device::Dml,
                other => {
                    tracing::warn!(value = other, "unknown DEVICE value, keeping default");
                    config.device
                }
            };
        }

        config.api_key = env_str("API_KEY");
        config.app_id = env_str("APP_ID");
        config.secret_key = env_str("SECRET_KEY");
        config.token_url = env_str("TOKEN_URL");
        config.remote_ws_url = env_str("REMOTE_WS_URL");
        config.remote_http_endpoint = env_str("REMOTE_HTTP_ENDPOINT");

        config
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_str(key) {
        Some(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(key, value = %v, "failed to parse environment value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = AppConfig::default();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.silence_chunks, 2);
        assert_eq!(config.max_buffer_sec, 5.0);
        assert_eq!(config.parallel_requests, 2);
    }

    #[test]
    fn segmenter_config_derives_from_app_config() {
        let mut config = AppConfig::default();
        config.max_buffer_sec = 20.0;
        config.silence_chunks = 3;
        let seg = config.segmenter_config();
        assert_eq!(seg.max_buffer_sec, 20.0);
        assert_eq!(seg.silence_threshold_chunks, 3);
    }
}
