//! Integration test for the control-channel -> event-emitter round trip
//! (SPEC_FULL.md §10): drives `control::parse_line` over an in-memory
//! duplex pipe instead of real stdio, and asserts the `events::Event`
//! stream it produces is well-formed line-delimited JSON.

use std::sync::Arc;

use asr_orchestrator::control::{self, ControlRequest};
use asr_orchestrator::events::{Event, EventEmitter, Status};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::test]
async fn parses_streaming_chunk_and_emits_matching_partial_event() {
    let (mut client, server) = tokio::io::duplex(4096);

    let mut output = Vec::new();
    let emitter = Arc::new(EventEmitter::new(&mut output));

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        match control::parse_line(&line).unwrap() {
            Some(ControlRequest::StreamingChunk { session_id, audio_data, final_chunk }) => {
                assert_eq!(session_id, "sess-1");
                assert!(!audio_data.is_empty());
                assert!(!final_chunk);
                Some(session_id)
            }
            other => panic!("expected StreamingChunk, got {other:?}"),
        }
    });

    let request = serde_json::json!({
        "type": "streaming_chunk",
        "session_id": "sess-1",
        "audio_data": "AAAA",
    });
    client.write_all(format!("{}\n", request).as_bytes()).await.unwrap();

    let session_id = server_task.await.unwrap().unwrap();

    emitter
        .emit(&Event::Partial {
            session_id,
            text: "hello".to_string(),
            full_text: "hello".to_string(),
            timestamp: 0,
            is_final: false,
            status: Status::Success,
        })
        .unwrap();

    drop(emitter);
    let line = String::from_utf8(output).unwrap();
    assert_eq!(line.lines().count(), 1);
    let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(parsed["type"], "partial");
    assert_eq!(parsed["session_id"], "sess-1");
    assert_eq!(parsed["text"], "hello");
}

#[tokio::test]
async fn blank_lines_are_ignored_and_malformed_lines_report_an_error_event() {
    assert!(control::parse_line("").unwrap().is_none());
    assert!(control::parse_line("   ").unwrap().is_none());

    let err = control::parse_line("{not json").unwrap_err();

    let mut output = Vec::new();
    {
        let emitter = EventEmitter::new(&mut output);
        emitter
            .emit(&Event::Error {
                session_id: None,
                request_id: None,
                status: "error",
                error: err.to_string(),
                trigger: None,
            })
            .unwrap();
    }
    let line = String::from_utf8(output).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(parsed["type"], "error");
    assert!(parsed["error"].as_str().unwrap().contains(""));
}

#[tokio::test]
async fn force_commit_and_reset_session_round_trip_through_parse_line() {
    let commit = control::parse_line(r#"{"type":"force_commit","session_id":"s1"}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(commit, ControlRequest::ForceCommit { session_id } if session_id == "s1"));

    let reset = control::parse_line(r#"{"type":"reset_session","session_id":"s1"}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(reset, ControlRequest::ResetSession { session_id } if session_id == "s1"));
}
