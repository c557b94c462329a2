//! Control channel: newline-delimited JSON requests read from stdin
//! (spec. §4.8). A generalization of the teacher's `ipc.rs` Unix-socket
//! request loop onto stdin, matching the prototype's
//! `backend/main.py` `WorkerBridge` message shapes (`streaming_chunk`,
//! `force_commit`, `reset_session`, `batch_file`).

use serde::Deserialize;

use crate::error::ControlError;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    StreamingChunk {
        session_id: String,
        audio_data: String,
        #[serde(default)]
        final_chunk: bool,
    },
    ForceCommit {
        session_id: String,
    },
    ResetSession {
        session_id: String,
    },
    BatchFile {
        request_id: String,
        audio_path: String,
    },
}

impl ControlRequest {
    /// Session identifier for routing, or `None` for `batch_file` requests
    /// (spec. §4.8): those carry a `request_id` instead, since a batch
    /// transcription is not tied to any live streaming session.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ControlRequest::StreamingChunk { session_id, .. }
            | ControlRequest::ForceCommit { session_id }
            | ControlRequest::ResetSession { session_id } => Some(session_id),
            ControlRequest::BatchFile { .. } => None,
        }
    }
}

/// Parse one control-channel line. An empty or whitespace-only line parses
/// to `None` rather than an error, so a reader loop can skip blank lines
/// without treating them as malformed input.
pub fn parse_line(line: &str) -> Result<Option<ControlRequest>, ControlError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    let has_audio_data = matches!(value.get("type").and_then(|t| t.as_str()), Some("streaming_chunk"))
        && value.get("audio_data").is_none();
    if has_audio_data {
        return Err(ControlError::MissingAudioData);
    }

    match serde_json::from_value::<ControlRequest>(value.clone()) {
        Ok(req) => Ok(Some(req)),
        Err(_) => {
            let type_name = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>")
                .to_string();
            Err(ControlError::UnknownType(type_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_streaming_chunk() {
        let line = r#"{"type":"streaming_chunk","session_id":"s1","audio_data":"AAA="}"#;
        let req = parse_line(line).unwrap().unwrap();
        match req {
            ControlRequest::StreamingChunk {
                session_id,
                audio_data,
                final_chunk,
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(audio_data, "AAA=");
                assert!(!final_chunk);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_force_commit_and_reset_session() {
        assert!(matches!(
            parse_line(r#"{"type":"force_commit","session_id":"s1"}"#)
                .unwrap()
                .unwrap(),
            ControlRequest::ForceCommit { .. }
        ));
        assert!(matches!(
            parse_line(r#"{"type":"reset_session","session_id":"s1"}"#)
                .unwrap()
                .unwrap(),
            ControlRequest::ResetSession { .. }
        ));
    }

    #[test]
    fn parses_batch_file_with_request_id_and_audio_path() {
        let line = r#"{"type":"batch_file","request_id":"r1","audio_path":"/tmp/in.wav"}"#;
        let req = parse_line(line).unwrap().unwrap();
        assert!(req.session_id().is_none());
        match req {
            ControlRequest::BatchFile { request_id, audio_path } => {
                assert_eq!(request_id, "r1");
                assert_eq!(audio_path, "/tmp/in.wav");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn blank_line_yields_none_not_an_error() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \n").unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_control_error() {
        assert!(matches!(
            parse_line("{not json"),
            Err(ControlError::Malformed(_))
        ));
    }

    #[test]
    fn missing_audio_data_is_reported_specifically() {
        assert!(matches!(
            parse_line(r#"{"type":"streaming_chunk","session_id":"s1"}"#),
            Err(ControlError::MissingAudioData)
        ));
    }

    #[test]
    fn unknown_type_is_reported_with_the_type_name() {
        match parse_line(r#"{"type":"frobnicate","session_id":"s1"}"#) {
            Err(ControlError::UnknownType(t)) => assert_eq!(t, "frobnicate"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
