//! Backend factory: construct an `Engine` from `EngineType` + `AppConfig`
//! (spec. §6). Grounded on the teacher's `create_backend`/
//! `validate_model_path` match-on-type pattern.

use std::sync::Arc;

use super::remote_ws::TokenCache;
use super::{Engine, EngineType, RemoteHttpRaceEngine, RemoteWsEngine, StreamingLocalEngine, TwoPassLocalEngine};
use crate::config::AppConfig;
use crate::error::BackendError;
use crate::vad::device::select_device;

pub async fn create_engine(config: &AppConfig) -> Result<Engine, BackendError> {
    match config.engine {
        EngineType::TwoPassLocal => {
            let model_path = config
                .model
                .as_ref()
                .ok_or_else(|| BackendError::Configuration("MODEL is required for two_pass_local".into()))?;
            let device = select_device(config.device);
            let engine = TwoPassLocalEngine::new(model_path, "en", num_cpus(), config.sample_rate as usize, device)?;
            Ok(Engine::TwoPassLocal(engine))
        }
        EngineType::StreamingLocal => {
            let model_path = config
                .model
                .as_ref()
                .ok_or_else(|| BackendError::Configuration("MODEL is required for streaming_local".into()))?;
            let device = select_device(config.device);
            let engine = StreamingLocalEngine::new(model_path, "en", num_cpus(), config.sample_rate as usize, device)?;
            Ok(Engine::StreamingLocal(engine))
        }
        EngineType::RemoteWs => {
            let ws_url = config
                .remote_ws_url
                .clone()
                .ok_or_else(|| BackendError::Configuration("remote_ws requires a websocket URL".into()))?;
            let app_id = config.app_id.clone().unwrap_or_default();
            let token_url = config
                .token_url
                .clone()
                .ok_or_else(|| BackendError::Configuration("remote_ws requires a token URL".into()))?;
            let api_key = config.api_key.clone().unwrap_or_default();
            let secret_key = config.secret_key.clone().unwrap_or_default();
            let tokens = Arc::new(TokenCache::new(token_url, api_key, secret_key));
            Ok(Engine::RemoteWs(RemoteWsEngine::new(ws_url, app_id, config.sample_rate, tokens)))
        }
        EngineType::RemoteHttpRace => {
            let endpoint = config
                .remote_http_endpoint
                .clone()
                .ok_or_else(|| BackendError::Configuration("remote_http_race requires an endpoint URL".into()))?;
            let api_key = config.api_key.clone().unwrap_or_default();
            let engine = RemoteHttpRaceEngine::new(
                endpoint,
                api_key,
                config.parallel_requests,
                config.request_timeout,
            )?;
            Ok(Engine::RemoteHttpRace(engine))
        }
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
        .min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_cpus_is_capped_at_four() {
        assert!(num_cpus() <= 4);
        assert!(num_cpus() >= 1);
    }
}
