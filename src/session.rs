//! Per-session state and the session manager (spec. §3, §4.6). Each
//! session owns a serial task reached only through a bounded mpsc
//! channel — single-writer, no cross-session locks (spec. §5) — grounded
//! on the teacher's `backend_manager.rs` command-loop pattern
//! (`mpsc::unbounded_channel` + one task owning all mutable state),
//! generalized to a bounded channel per spec. §5's backpressure
//! requirement and to one task per session rather than one global task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::assembler::TextAssembler;
use crate::backend::Engine;
use crate::config::AppConfig;
use crate::control::ControlRequest;
use crate::error::{ControlError, OrchestratorError};
use crate::events::{CommitTriggerWire, Event, EventEmitter};
use crate::ring_buffer::RingBuffer;
use crate::segmenter::{CommitTrigger, Segmenter};
use crate::vad::{FsmnVad, RmsVad, VoiceActivityDetector};

const CONTROL_CHANNEL_CAPACITY: usize = 256;

/// Commands delivered to a session's serial task.
enum SessionCommand {
    Audio { samples: Vec<f32>, final_chunk: bool },
    ForceCommit,
    Reset { done: oneshot::Sender<()> },
}

/// A live session's externally-visible handle: an mpsc sender into its
/// serial task, plus the bookkeeping the reaper needs without reaching
/// into the task itself.
struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    last_activity: Arc<Mutex<Instant>>,
}

/// Owns all live sessions. `sessions` is the only cross-session lock in
/// the system, and it is held only long enough to look up or insert a
/// handle — never across an `.await` on session work itself.
pub struct SessionManager<W: Send + Sync + 'static> {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    config: AppConfig,
    events: Arc<EventEmitter<W>>,
}

impl<W: std::io::Write + Send + Sync + 'static> SessionManager<W> {
    pub fn new(config: AppConfig, events: Arc<EventEmitter<W>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            events,
        })
    }

    /// Background idle-session reaper (spec. §4.6): sweeps every
    /// `IDLE_TIMEOUT / 4` and drops any session whose `last_activity`
    /// exceeds `IDLE_TIMEOUT`. Reaping is silent — no event (spec. §7).
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let period = manager.config.idle_timeout / 4;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                manager.reap_idle_sessions();
            }
        })
    }

    fn reap_idle_sessions(&self) {
        let timeout = self.config.idle_timeout;
        let mut sessions = self.sessions.lock();
        sessions.retain(|_id, handle| handle.last_activity.lock().elapsed() < timeout);
    }

    fn touch(&self, session_id: &str) {
        if let Some(handle) = self.sessions.lock().get(session_id) {
            *handle.last_activity.lock() = Instant::now();
        }
    }

    /// Get or create the serial task for `session_id`, returning its
    /// command sender.
    fn handle_for(self: &Arc<Self>, session_id: &str, engine: Arc<Engine>) -> mpsc::Sender<SessionCommand> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(session_id) {
            return existing.tx.clone();
        }

        let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        sessions.insert(
            session_id.to_string(),
            SessionHandle {
                tx: tx.clone(),
                last_activity: last_activity.clone(),
            },
        );
        drop(sessions);

        let session = Session::new(session_id.to_string(), self.config.clone());
        let events = self.events.clone();
        tokio::spawn(run_session_task(session, engine, rx, events));

        tx
    }

    /// Route one parsed control-channel request to its session.
    pub async fn dispatch(self: &Arc<Self>, request: ControlRequest, engine: Arc<Engine>) -> Result<(), OrchestratorError> {
        match request {
            ControlRequest::StreamingChunk {
                session_id,
                audio_data,
                final_chunk,
            } => {
                let samples = crate::audio_codec::decode_frame_to_f32(&audio_data)
                    .map_err(OrchestratorError::Codec)?;
                self.touch(&session_id);
                let tx = self.handle_for(&session_id, engine);
                let _ = tx
                    .send(SessionCommand::Audio { samples, final_chunk })
                    .await;
            }
            ControlRequest::ForceCommit { session_id } => {
                self.touch(&session_id);
                let tx = self.handle_for(&session_id, engine);
                let _ = tx.send(SessionCommand::ForceCommit).await;
            }
            ControlRequest::ResetSession { session_id } => {
                self.touch(&session_id);
                let tx = self.handle_for(&session_id, engine);
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(SessionCommand::Reset { done: done_tx }).await.is_ok() {
                    let _ = done_rx.await;
                }
            }
            ControlRequest::BatchFile { request_id, audio_path } => {
                return self.dispatch_batch_file(&request_id, &audio_path, engine).await;
            }
        }
        Ok(())
    }

    async fn dispatch_batch_file(
        self: &Arc<Self>,
        request_id: &str,
        audio_path: &str,
        engine: Arc<Engine>,
    ) -> Result<(), OrchestratorError> {
        let samples = tokio::task::spawn_blocking({
            let path = audio_path.to_string();
            move || crate::audio_codec::read_wav_16k_mono(&path)
        })
        .await
        .map_err(|e| OrchestratorError::Config(e.to_string()))?
        .map_err(OrchestratorError::Io)?;

        let sample_count = samples.len();
        let segment = crate::segmenter::Segment {
            samples,
            seq: 1,
            trigger: CommitTrigger::Final,
        };

        match engine.commit(&segment).await {
            Ok(result) => {
                let duration = sample_count as f32 / self.config.sample_rate as f32;
                emit_sentence_events(
                    &self.events,
                    None,
                    Some(request_id.to_string()),
                    &result,
                    1,
                    CommitTrigger::Final,
                    duration,
                    self.config.min_sentence_chars,
                );
            }
            Err(e) => {
                let _ = self.events.emit(&Event::Error {
                    session_id: None,
                    request_id: Some(request_id.to_string()),
                    status: "error",
                    error: e.to_string(),
                    trigger: None,
                });
            }
        }
        Ok(())
    }

    pub fn handle_control_error(&self, session_id: Option<String>, error: ControlError) {
        self.emit_error(session_id, error.to_string());
    }

    /// Emit a generic `error` event, used for dispatch failures that are
    /// not themselves a malformed-control-line `ControlError`.
    pub fn emit_error(&self, session_id: Option<String>, error: String) {
        let _ = self.events.emit(&Event::Error {
            session_id,
            request_id: None,
            status: "error",
            error,
            trigger: None,
        });
    }
}

fn now_ms() -> i64 {
    // Avoid `chrono::Utc::now()`'s wall-clock dependency in hot paths by
    // reusing the same helper everywhere timestamps are stamped.
    chrono::Utc::now().timestamp_millis()
}

/// Per-session state (spec. §3). Mutated only by this session's own
/// serial task.
pub struct Session {
    pub id: String,
    pub ring: RingBuffer,
    pub vad: Box<dyn VoiceActivityDetector>,
    pub segmenter: Segmenter,
    pub assembler: TextAssembler,
    pub sample_rate: u32,
    pub min_sentence_chars: usize,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: String, config: AppConfig) -> Self {
        let device = crate::vad::device::select_device(config.device);
        let vad: Box<dyn VoiceActivityDetector> = match config.vad_kind {
            crate::vad::VadKind::Rms => Box::new(RmsVad::new(config.rms_threshold)),
            crate::vad::VadKind::Fsmn => match config.model.as_deref() {
                Some(path) => match FsmnVad::new(path, config.sample_rate as usize, device) {
                    Ok(vad) => Box::new(vad),
                    Err(e) => {
                        tracing::warn!(error = %e, "FSMN-VAD model failed to load, using RMS instead");
                        Box::new(RmsVad::new(config.rms_threshold))
                    }
                },
                None => Box::new(RmsVad::new(config.rms_threshold)),
            },
        };

        Self {
            id,
            ring: RingBuffer::with_default_capacity(),
            vad,
            segmenter: Segmenter::new(config.segmenter_config()),
            assembler: TextAssembler::new(config.min_sentence_chars),
            sample_rate: config.sample_rate,
            min_sentence_chars: config.min_sentence_chars,
            created_at: Instant::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.segmenter.reset_full();
        self.assembler.reset();
        self.last_activity = Instant::now();
    }
}

async fn run_session_task<W: std::io::Write + Send + Sync + 'static>(
    mut session: Session,
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<SessionCommand>,
    events: Arc<EventEmitter<W>>,
) {
    let _ = engine.start().await;
    let _ = events.emit(&Event::Ready { status: "ready" });

    let mut speaking_last = false;

    while let Some(command) = rx.recv().await {
        match command {
            SessionCommand::Audio { samples, final_chunk } => {
                session.ring.append(&samples);
                for frame in samples.chunks(512.max(1)) {
                    let is_speech = session.vad.is_speech(frame);
                    if is_speech && !speaking_last {
                        let _ = events.emit(&Event::IsSpeaking {
                            session_id: session.id.clone(),
                            is_speaking: true,
                        });
                    }
                    speaking_last = is_speech;

                    let commit = if final_chunk {
                        session.segmenter.final_chunk()
                    } else {
                        session.segmenter.push_frame(frame, is_speech)
                    };

                    if let Ok(Some(decoder_view)) = engine.push(frame).await {
                        let delta = session.assembler.update_unstable(&decoder_view);
                        if !delta.is_empty() {
                            if engine.engine_type() == crate::backend::EngineType::RemoteWs {
                                let _ = events.emit(&Event::PartialResult {
                                    session_id: session.id.clone(),
                                    partial_text: session.assembler.full_text(),
                                });
                            } else {
                                let _ = events.emit(&Event::Partial {
                                    session_id: session.id.clone(),
                                    text: delta,
                                    full_text: session.assembler.full_text(),
                                    timestamp: now_ms(),
                                    is_final: false,
                                    status: crate::events::Status::Success,
                                });
                            }
                        }
                    }

                    if let Some(segment) = commit {
                        emit_commit(&session, &engine, &events, segment).await;
                    }

                    // Force a stable-tail commit (spec. §4.5.2, §8) when the
                    // streaming_local backend reports its unstable tail has
                    // stalled, even though no Segmenter trigger fired.
                    if engine.take_stall_commit().is_some() {
                        if let Some(segment) = session.segmenter.stable_tail_commit() {
                            emit_commit(&session, &engine, &events, segment).await;
                        }
                    }
                }
            }
            SessionCommand::ForceCommit => {
                if let Some(segment) = session.segmenter.force_commit() {
                    emit_commit(&session, &engine, &events, segment).await;
                }
            }
            SessionCommand::Reset { done } => {
                session.reset();
                let _ = engine.reset().await;
                let _ = done.send(());
            }
        }
    }

    let _ = engine.stop().await;
}

async fn emit_commit<W: std::io::Write + Send + Sync + 'static>(
    session: &Session,
    engine: &Arc<Engine>,
    events: &Arc<EventEmitter<W>>,
    segment: crate::segmenter::Segment,
) {
    let seq = segment.seq;
    let trigger = segment.trigger;
    let duration = segment.samples.len() as f32 / session.sample_rate as f32;
    match engine.commit(&segment).await {
        Ok(result) => {
            emit_sentence_events(
                events,
                Some(session.id.clone()),
                None,
                &result,
                seq,
                trigger,
                duration,
                session.min_sentence_chars,
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, session_id = %session.id, "backend commit failed, skipping segment");
            let _ = events.emit(&Event::Error {
                session_id: Some(session.id.clone()),
                request_id: None,
                status: "error",
                error: e.to_string(),
                trigger: Some(CommitTriggerWire::from(trigger)),
            });
        }
    }
}

/// Split a commit's punctuated text into sentences (spec. §4.5.1 point 3)
/// and emit one `sentence_complete` per sentence, each carrying a time
/// range estimated proportionally to its share of the segment's
/// characters within the segment's audio duration. A trailing remainder
/// with no terminator (e.g. a `force_commit`/`stable_tail` segment) is
/// emitted as a final sentence of its own, since no further audio follows
/// within this segment.
#[allow(clippy::too_many_arguments)]
fn emit_sentence_events<W: std::io::Write + Send + Sync + 'static>(
    events: &Arc<EventEmitter<W>>,
    session_id: Option<String>,
    request_id: Option<String>,
    result: &crate::backend::DecodeResult,
    segment_seq: u64,
    trigger: CommitTrigger,
    audio_duration: f32,
    min_sentence_chars: usize,
) {
    let (mut sentences, remainder) =
        crate::assembler::split_sentences(&result.punctuated_text, min_sentence_chars);
    if !remainder.is_empty() {
        sentences.push(remainder);
    }
    if sentences.is_empty() {
        return;
    }

    let total_chars: usize = sentences.iter().map(|s| s.chars().count()).sum::<usize>().max(1);
    let mut offset_chars = 0usize;
    let sentence_count = sentences.len();
    for (i, sentence) in sentences.into_iter().enumerate() {
        let chars = sentence.chars().count();
        let start_time = audio_duration * (offset_chars as f32 / total_chars as f32);
        offset_chars += chars;
        let end_time = audio_duration * (offset_chars as f32 / total_chars as f32);
        let is_last = i + 1 == sentence_count;
        let _ = events.emit(&Event::SentenceComplete {
            session_id: session_id.clone(),
            request_id: request_id.clone(),
            text: sentence,
            timestamp: now_ms(),
            is_final: is_last,
            status: crate::events::Status::Success,
            segment_seq: Some(segment_seq),
            trigger: CommitTriggerWire::from(trigger),
            audio_duration: Some(audio_duration),
            start_time: Some(start_time),
            end_time: Some(end_time),
            replica_id: result.replica_id,
            latency_ms: result.latency_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_an_empty_ring_and_resets_clear_it_again() {
        let mut session = Session::new("s1".to_string(), AppConfig::default());
        session.ring.append(&[0.1, 0.2, 0.3]);
        assert_eq!(session.ring.len(), 3);
        session.reset();
        assert_eq!(session.ring.len(), 0);
    }

    #[tokio::test]
    async fn reap_idle_sessions_drops_only_stale_handles() {
        let events = Arc::new(EventEmitter::new(Vec::new()));
        let manager = SessionManager::<Vec<u8>>::new(AppConfig::default(), events);

        let fresh_activity = Arc::new(Mutex::new(Instant::now()));
        let stale_activity = Arc::new(Mutex::new(Instant::now() - Duration::from_secs(3600)));
        let (fresh_tx, _fresh_rx) = mpsc::channel(1);
        let (stale_tx, _stale_rx) = mpsc::channel(1);

        {
            let mut sessions = manager.sessions.lock();
            sessions.insert(
                "fresh".to_string(),
                SessionHandle { tx: fresh_tx, last_activity: fresh_activity },
            );
            sessions.insert(
                "stale".to_string(),
                SessionHandle { tx: stale_tx, last_activity: stale_activity },
            );
        }

        manager.reap_idle_sessions();

        let sessions = manager.sessions.lock();
        assert!(sessions.contains_key("fresh"));
        assert!(!sessions.contains_key("stale"));
    }
}
