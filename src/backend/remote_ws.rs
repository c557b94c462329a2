//! Remote WebSocket backend (spec. §4.5.3): one streaming connection per
//! session, JSON START/FINISH framing around raw PCM binary frames,
//! Baidu-style `MID_TEXT`/`FIN_TEXT`/`err_no` inbound messages, and a
//! shared OAuth-style token cache. Grounded on
//! `other_examples/.../voice-client.rs` for the `connect_async` +
//! `ws_stream.split()` + `futures_util::{SinkExt, StreamExt}` pattern,
//! and on `examples/original_source/desktop/backend/asr/asr_baidu_worker.py`
//! for the message-type naming.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Continuation, DecodeResult};
use crate::error::BackendError;
use crate::segmenter::Segment;

const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(3600);
const TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
struct StartFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    app_id: &'a str,
    sample_rate: u32,
    format: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct FinishFrame {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    err_no: i32,
}

/// Shared, lazily-refreshed OAuth-style token. `reqwest` does the fetch;
/// a single async mutex serializes refreshes across sessions (spec. §5
/// "shared resources").
pub struct TokenCache {
    http: reqwest::Client,
    token_url: String,
    api_key: String,
    secret_key: String,
    inner: AsyncMutex<Option<(String, Instant)>>,
}

impl TokenCache {
    pub fn new(token_url: impl Into<String>, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            inner: AsyncMutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<String, BackendError> {
        let mut guard = self.inner.lock().await;
        if let Some((token, expires_at)) = guard.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let resp = tokio::time::timeout(
            TOKEN_FETCH_TIMEOUT,
            self.http
                .post(&self.token_url)
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", self.api_key.as_str()),
                    ("client_secret", self.secret_key.as_str()),
                ])
                .send(),
        )
        .await
        .map_err(|_| BackendError::Timeout)?
        .map_err(|e| BackendError::Transport(e.to_string()))?;

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let expires_at = Instant::now() + Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_SAFETY_MARGIN);
        *guard = Some((parsed.access_token.clone(), expires_at));
        Ok(parsed.access_token)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// No-op continuation: the remote side owns all decoder state.
#[derive(Debug, Default)]
pub struct RemoteContinuation;

impl Continuation for RemoteContinuation {
    fn clear(&self) {}
}

pub struct RemoteWsEngine {
    ws_url: String,
    app_id: String,
    sample_rate: u32,
    tokens: Arc<TokenCache>,
    conn: AsyncMutex<Option<WsStream>>,
    latest_partial: Mutex<String>,
    segment_seq: Mutex<u64>,
}

impl RemoteWsEngine {
    pub fn new(ws_url: impl Into<String>, app_id: impl Into<String>, sample_rate: u32, tokens: Arc<TokenCache>) -> Self {
        Self {
            ws_url: ws_url.into(),
            app_id: app_id.into(),
            sample_rate,
            tokens,
            conn: AsyncMutex::new(None),
            latest_partial: Mutex::new(String::new()),
            segment_seq: Mutex::new(0),
        }
    }

    async fn ensure_connected(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Ok(());
        }
        let token = self.tokens.get().await?;
        let url = format!("{}?token={token}", self.ws_url);
        let (mut stream, _response) = connect_async(&url)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let start = StartFrame {
            kind: "START",
            app_id: &self.app_id,
            sample_rate: self.sample_rate,
            format: "pcm16",
        };
        let frame = serde_json::to_string(&start).map_err(|e| BackendError::Transport(e.to_string()))?;
        stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        *conn = Some(stream);
        Ok(())
    }

    async fn read_until_terminal(&self, stream: &mut WsStream, want_final: bool) -> Result<Option<(String, bool)>, BackendError> {
        loop {
            let next = tokio::time::timeout(WS_IDLE_TIMEOUT, stream.next())
                .await
                .map_err(|_| BackendError::Timeout)?;

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(BackendError::Transport(e.to_string())),
                None => return Ok(None),
            };

            match msg {
                Message::Text(text) => {
                    let frame: InboundFrame = match serde_json::from_str(&text) {
                        Ok(f) => f,
                        Err(_) => continue,
                    };
                    if frame.err_no != 0 {
                        tracing::warn!(err_no = frame.err_no, "remote_ws backend reported an error frame");
                        continue;
                    }
                    match frame.kind.as_str() {
                        "MID_TEXT" => {
                            *self.latest_partial.lock() = frame.result.clone();
                            if !want_final {
                                return Ok(Some((frame.result, false)));
                            }
                        }
                        "FIN_TEXT" => return Ok(Some((frame.result, true))),
                        _ => continue,
                    }
                }
                // Close frames 1005/1006 following our own FINISH are
                // expected (spec. §7), not an error.
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
    }

    pub async fn start(&self) -> Result<(), BackendError> {
        self.ensure_connected().await
    }

    pub async fn push(&self, frame: &[f32]) -> Result<Option<String>, BackendError> {
        self.ensure_connected().await?;
        let pcm = crate::audio_codec::f32_to_pcm16(frame);
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut conn = self.conn.lock().await;
        let stream = conn.as_mut().ok_or_else(|| BackendError::Transport("not connected".into()))?;
        stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        match self.read_until_terminal(stream, false).await? {
            Some((text, _is_final)) => Ok(Some(text)),
            None => Ok(None),
        }
    }

    pub async fn commit(&self, _segment: &Segment) -> Result<DecodeResult, BackendError> {
        let mut conn = self.conn.lock().await;
        let stream = conn.as_mut().ok_or_else(|| BackendError::Transport("not connected".into()))?;
        let finish = serde_json::to_string(&FinishFrame { kind: "FINISH" })
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        stream
            .send(Message::Text(finish.into()))
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let result = self.read_until_terminal(stream, true).await?;
        *conn = None; // do not restart the connection mid-utterance next time; a fresh one opens lazily

        let mut seq = self.segment_seq.lock();
        *seq += 1;
        self.latest_partial.lock().clear();

        match result {
            Some((text, true)) => Ok(DecodeResult {
                raw_text: text.clone(),
                punctuated_text: text,
                is_final: true,
                per_segment_times: None,
                replica_id: None,
                latency_ms: None,
            }),
            _ => Err(BackendError::Transport("connection closed before FIN_TEXT".into())),
        }
    }

    pub async fn reset(&self) -> Result<(), BackendError> {
        *self.conn.lock().await = None;
        self.latest_partial.lock().clear();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BackendError> {
        if let Some(mut stream) = self.conn.lock().await.take() {
            let _ = stream.close(None).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_serializes_with_uppercase_type_tag() {
        let start = StartFrame {
            kind: "START",
            app_id: "app-1",
            sample_rate: 16_000,
            format: "pcm16",
        };
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["type"], "START");
        assert_eq!(json["app_id"], "app-1");
        assert_eq!(json["sample_rate"], 16_000);
    }

    #[test]
    fn inbound_frame_defaults_err_no_and_result_when_absent() {
        let frame: InboundFrame = serde_json::from_str(r#"{"type":"MID_TEXT"}"#).unwrap();
        assert_eq!(frame.kind, "MID_TEXT");
        assert_eq!(frame.result, "");
        assert_eq!(frame.err_no, 0);
    }

    #[test]
    fn inbound_frame_parses_fin_text_with_result_and_err_no() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"FIN_TEXT","result":"hello world","err_no":0}"#).unwrap();
        assert_eq!(frame.kind, "FIN_TEXT");
        assert_eq!(frame.result, "hello world");
    }
}
