//! Outbound event protocol (spec. §4.7, §6).
//!
//! Every event is one newline-terminated JSON object written to stdout.
//! This stream must never be interleaved with diagnostics; all logging
//! goes through `tracing` to stderr instead (grounded on the teacher's
//! `ipc.rs` request/response split, generalized from a Unix socket to
//! stdout framing per the prototype's `backend/main.py` worker protocol).
//!
//! The remote-WebSocket backend's `partial_result` event keeps the
//! original Baidu-worker field name `partialText` instead of `text`/
//! `full_text` (spec. §9 open question) — client compatibility, not a
//! typo.

use std::io::{self, Write};

use serde::Serialize;

use crate::segmenter::CommitTrigger;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// One outbound message. `session_id` is flattened onto every variant so
/// clients can route events without inspecting the tag first.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Ready {
        status: &'static str,
    },
    Fatal {
        status: &'static str,
        error: String,
    },
    Partial {
        session_id: String,
        text: String,
        full_text: String,
        timestamp: i64,
        is_final: bool,
        status: Status,
    },
    /// remote_ws only: see module docs on the `partialText` field.
    PartialResult {
        session_id: String,
        #[serde(rename = "partialText")]
        partial_text: String,
    },
    SentenceComplete {
        session_id: Option<String>,
        /// Set for `batch_file` replies (spec. §4.8), where there is no
        /// live streaming session to key the event on.
        request_id: Option<String>,
        text: String,
        timestamp: i64,
        is_final: bool,
        status: Status,
        segment_seq: Option<u64>,
        trigger: CommitTriggerWire,
        audio_duration: Option<f32>,
        start_time: Option<f32>,
        end_time: Option<f32>,
        replica_id: Option<usize>,
        latency_ms: Option<u64>,
    },
    IsSpeaking {
        session_id: String,
        #[serde(rename = "isSpeaking")]
        is_speaking: bool,
    },
    LanguageDetected {
        session_id: String,
        language: String,
        language_probability: Option<f32>,
    },
    Error {
        session_id: Option<String>,
        request_id: Option<String>,
        status: &'static str,
        error: String,
        trigger: Option<CommitTriggerWire>,
    },
}

/// Serializable mirror of `segmenter::CommitTrigger`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTriggerWire {
    Silence,
    MaxDuration,
    ForceCommit,
    Final,
    StableTail,
}

impl From<CommitTrigger> for CommitTriggerWire {
    fn from(t: CommitTrigger) -> Self {
        match t {
            CommitTrigger::Silence => CommitTriggerWire::Silence,
            CommitTrigger::MaxDuration => CommitTriggerWire::MaxDuration,
            CommitTrigger::ForceCommit => CommitTriggerWire::ForceCommit,
            CommitTrigger::Final => CommitTriggerWire::Final,
            CommitTrigger::StableTail => CommitTriggerWire::StableTail,
        }
    }
}

/// Writes events as single-line JSON to an arbitrary sink, serialized
/// behind a lock so concurrent sessions never interleave partial writes.
pub struct EventEmitter<W: Write> {
    sink: parking_lot::Mutex<W>,
}

impl<W: Write> EventEmitter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: parking_lot::Mutex::new(sink),
        }
    }

    pub fn emit(&self, event: &Event) -> io::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut sink = self.sink.lock();
        sink.write_all(line.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_one_newline_terminated_json_line() {
        let mut buf = Vec::new();
        {
            let emitter = EventEmitter::new(&mut buf);
            emitter
                .emit(&Event::Ready { status: "ready" })
                .unwrap();
        }
        let s = String::from_utf8(buf).unwrap();
        assert_eq!(s.matches('\n').count(), 1);
        assert!(s.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(s.trim()).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["status"], "ready");
    }

    #[test]
    fn partial_result_keeps_camel_case_partial_text_field() {
        let mut buf = Vec::new();
        let emitter = EventEmitter::new(&mut buf);
        emitter
            .emit(&Event::PartialResult {
                session_id: "s1".to_string(),
                partial_text: "hello".to_string(),
            })
            .unwrap();
        let s = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(s.trim()).unwrap();
        assert_eq!(value["partialText"], "hello");
        assert!(value.get("partial_text").is_none());
    }

    #[test]
    fn generic_partial_event_carries_text_and_full_text() {
        let mut buf = Vec::new();
        let emitter = EventEmitter::new(&mut buf);
        emitter
            .emit(&Event::Partial {
                session_id: "s1".to_string(),
                text: " world".to_string(),
                full_text: "hello world".to_string(),
                timestamp: 1000,
                is_final: false,
                status: Status::Success,
            })
            .unwrap();
        let s = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(s.trim()).unwrap();
        assert_eq!(value["text"], " world");
        assert_eq!(value["full_text"], "hello world");
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn multiple_emits_each_produce_exactly_one_line() {
        let mut buf = Vec::new();
        let emitter = EventEmitter::new(&mut buf);
        for i in 0..3 {
            emitter
                .emit(&Event::IsSpeaking {
                    session_id: format!("s{i}"),
                    is_speaking: i % 2 == 0,
                })
                .unwrap();
        }
        let s = String::from_utf8(buf).unwrap();
        assert_eq!(s.lines().count(), 3);
    }
}
