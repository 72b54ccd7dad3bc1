//! The duplex session runtime: one task per accepted connection,
//! demultiplexing JSON control frames and binary audio frames, driving the
//! enrollment/verification state machines, and enforcing the idle timer and
//! cooperative cancellation. A single sequential receive loop handles each
//! connection rather than fanning out across concurrent streams, since this
//! protocol's outbound frames must follow strictly from the inbound frame
//! that caused them; the split-sender (`Arc<Mutex<SplitSink<...>>>`) still
//! exists to let the idle-timeout watcher push an error frame from outside
//! that loop.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use voxkey_core::traits::AsrResult;
use voxkey_core::{AudioFrame, CoreError, Digit, Embedding, Gallery, SpeakerId};
use voxkey_pipeline::{segment, SegmentConfig};

use crate::enrollment::{self, EnrollmentState};
use crate::locale;
use crate::metrics;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::runtime::{CancellationToken, IdleTimer};
use crate::state::AppState;
use crate::verification::{self, DigitScore, VerificationState};

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

enum SessionMode {
    Idle,
    Enrolling { state: EnrollmentState, max_retries: u32 },
    Verifying { state: VerificationState, gallery: Gallery },
    Done,
}

pub struct WebSocketHandler;

impl WebSocketHandler {
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::run(socket, state))
    }

    async fn run(socket: WebSocket, app: AppState) {
        let session_id = Uuid::new_v4().to_string();
        let session = match app.sessions.create(session_id.clone()) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "rejecting connection");
                return;
            }
        };

        let (sink, mut stream) = socket.split();
        let sender: Sender = Arc::new(Mutex::new(sink));
        let idle_timer = Arc::new(IdleTimer::new(app.idle_timeout()));
        let cancellation = CancellationToken::new();

        let idle_task = tokio::spawn({
            let sender = sender.clone();
            let idle_timer = idle_timer.clone();
            let cancellation = cancellation.clone();
            async move {
                idle_timer.wait_for_expiry().await;
                cancellation.cancel();
                send(&sender, &ServerMessage::Error {
                    code: "TIMEOUT",
                    message: locale::ja::message(&CoreError::Timeout).to_string(),
                })
                .await;
            }
        });

        let mut mode = SessionMode::Idle;

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(err) => {
                    debug!(error = %err, "websocket read error, closing");
                    break;
                }
            };
            session.touch();
            idle_timer.touch();
            if cancellation.is_cancelled() {
                break;
            }

            let outputs = match frame {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => handle_control(&app, &mut mode, client_msg, &cancellation).await,
                    Err(err) => vec![ServerMessage::Error {
                        code: "INTERNAL_ERROR",
                        message: format!("malformed control frame: {err}"),
                    }],
                },
                Message::Binary(bytes) => handle_audio(&app, &mut mode, bytes, &cancellation).await,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => Vec::new(),
            };

            if cancellation.is_cancelled() {
                break;
            }
            for output in &outputs {
                send(&sender, output).await;
            }
            if matches!(mode, SessionMode::Done) {
                break;
            }
        }

        idle_task.abort();
        cancellation.cancel();
        app.sessions.remove(&session_id);
        info!(session_id, "session closed");
    }
}

async fn send(sender: &Sender, message: &ServerMessage) {
    let Ok(json) = serde_json::to_string(message) else {
        return;
    };
    let mut guard = sender.lock().await;
    let _ = guard.send(Message::Text(json)).await;
}

async fn handle_control(
    app: &AppState,
    mode: &mut SessionMode,
    message: ClientMessage,
    cancellation: &CancellationToken,
) -> Vec<ServerMessage> {
    match (std::mem::replace(mode, SessionMode::Idle), message) {
        (SessionMode::Idle, ClientMessage::StartEnrollment { speaker_id, speaker_name }) => {
            let speaker_id = SpeakerId::from(speaker_id);
            match app.gallery.exists(&speaker_id).await {
                Ok(true) => {
                    *mode = SessionMode::Done;
                    vec![error_frame(&CoreError::SpeakerAlreadyExists(speaker_id.to_string()))]
                }
                Ok(false) => {
                    let prompts = voxkey_pipeline::prompt::balanced_prompts();
                    metrics::record_session_started("enrollment");
                    let max_retries = app.current_settings().pipeline.per_set_retry_cap;
                    let out = ServerMessage::Prompts {
                        speaker_id: speaker_id.to_string(),
                        prompts: prompts.clone(),
                        total_sets: 5,
                        current_set: 0,
                    };
                    *mode = SessionMode::Enrolling {
                        state: EnrollmentState::new(speaker_id, speaker_name, prompts),
                        max_retries,
                    };
                    vec![out]
                }
                Err(err) => {
                    *mode = SessionMode::Done;
                    vec![error_frame(&err)]
                }
            }
        }
        (SessionMode::Enrolling { state, max_retries }, ClientMessage::RegisterPin { pin }) => {
            let (next_state, outputs) = enrollment::transition(state, enrollment::Event::RegisterPin { pin }, max_retries);
            finish_enrollment_step(app, mode, next_state, max_retries, outputs).await
        }
        (SessionMode::Idle, ClientMessage::StartVerify { speaker_id }) => {
            let speaker_id = SpeakerId::from(speaker_id);
            match app.gallery.load(&speaker_id).await {
                Ok(gallery) => {
                    let settings = app.current_settings();
                    let length = challenge_length(&settings);
                    let prompt = voxkey_pipeline::prompt::challenge_prompt(length);
                    metrics::record_session_started("verification");
                    let out = ServerMessage::Prompt { prompt: prompt.clone(), length: length as u8 };
                    *mode = SessionMode::Verifying {
                        state: VerificationState::new(speaker_id.to_string(), prompt),
                        gallery,
                    };
                    vec![out]
                }
                Err(err) => {
                    *mode = SessionMode::Done;
                    vec![error_frame(&err)]
                }
            }
        }
        (SessionMode::Verifying { state, gallery }, ClientMessage::VerifyPin { pin }) => {
            let speaker_id = SpeakerId::from(state.speaker_id.clone());
            let threshold = app.similarity_threshold();
            let correct = match app.gallery.verify_pin(&speaker_id, &pin).await {
                Ok(correct) => correct,
                Err(err) => {
                    *mode = SessionMode::Done;
                    return vec![error_frame(&err)];
                }
            };
            let speaker_id_str = speaker_id.to_string();
            let (next_state, outputs) = verification::transition(state, verification::Event::VerifyPin { correct }, threshold);
            if correct {
                metrics::record_verification_outcome("pin");
                metrics::record_session_completed("verification", "success");
                *mode = SessionMode::Done;
            } else {
                *mode = SessionMode::Verifying { state: next_state, gallery };
            }
            outputs.into_iter().map(|o| conv::verification_output(&speaker_id_str, o)).collect()
        }
        (other, _unexpected) => {
            *mode = other;
            Vec::new()
        }
    }
}

async fn finish_enrollment_step(
    app: &AppState,
    mode: &mut SessionMode,
    state: EnrollmentState,
    max_retries: u32,
    outputs: Vec<enrollment::Output>,
) -> Vec<ServerMessage> {
    let speaker_id = state.speaker_id.to_string();
    let mut wire = Vec::new();
    let mut commit_requested = None;
    for output in outputs {
        match output {
            enrollment::Output::RequestCommit { pin } => commit_requested = Some(pin),
            other => wire.push(conv::enrollment_output(&speaker_id, other)),
        }
    }

    let Some(pin) = commit_requested else {
        *mode = SessionMode::Enrolling { state, max_retries };
        return wire;
    };

    let centroids = match enrollment::centroids_for_commit(&state) {
        Ok(c) => c,
        Err(err) => {
            let (_, outs) = enrollment::transition(state, enrollment::Event::CommitFailed(err), max_retries);
            *mode = SessionMode::Done;
            metrics::record_session_completed("enrollment", "failure");
            wire.extend(outs.into_iter().map(|o| conv::enrollment_output(&speaker_id, o)));
            return wire;
        }
    };
    let pin_digest = voxkey_persistence::pin::digest(&pin);
    let commit_result = app
        .gallery
        .commit(&state.speaker_id, state.speaker_name.as_deref(), Some(&pin_digest), centroids)
        .await;

    let event = match commit_result {
        Ok(()) => enrollment::Event::CommitSucceeded,
        Err(err) => enrollment::Event::CommitFailed(err),
    };
    let succeeded = matches!(event, enrollment::Event::CommitSucceeded);
    let (_, outs) = enrollment::transition(state, event, max_retries);
    metrics::record_session_completed("enrollment", if succeeded { "success" } else { "failure" });
    *mode = SessionMode::Done;
    wire.extend(outs.into_iter().map(|o| conv::enrollment_output(&speaker_id, o)));
    wire
}

async fn handle_audio(
    app: &AppState,
    mode: &mut SessionMode,
    bytes: Vec<u8>,
    cancellation: &CancellationToken,
) -> Vec<ServerMessage> {
    match std::mem::replace(mode, SessionMode::Idle) {
        SessionMode::Enrolling { state, max_retries } => {
            let expected = state.prompts[current_set_index(&state) as usize].clone();
            let outcome = run_pipeline(app, bytes, &expected, cancellation).await;
            let event = match outcome {
                Ok((asr_text, digits)) => enrollment::Event::SetAccepted { asr_text, digits },
                Err(PipelineOutcome::Mismatch(asr_text)) => enrollment::Event::SetMismatched { asr_text },
                Err(PipelineOutcome::Failed(message)) => enrollment::Event::SetErrored { message },
                Err(PipelineOutcome::Cancelled) => {
                    *mode = SessionMode::Done;
                    return Vec::new();
                }
            };
            if matches!(event, enrollment::Event::SetMismatched { .. } | enrollment::Event::SetErrored { .. }) {
                metrics::record_enrollment_retry();
            }
            let (next_state, outputs) = enrollment::transition(state, event, max_retries);
            finish_enrollment_step(app, mode, next_state, max_retries, outputs).await
        }
        SessionMode::Verifying { state, gallery } => {
            let speaker_id = state.speaker_id.clone();
            let expected = state.prompt.clone();
            let settings = app.current_settings();
            let threshold = settings.gallery.similarity_threshold;
            let outcome = run_pipeline(app, bytes, &expected, cancellation).await;

            let event = match outcome {
                Ok((asr_text, digits)) => {
                    let scores: Vec<DigitScore> = digits
                        .iter()
                        .map(|(digit, embedding)| {
                            let centroid = gallery.centroid(*digit);
                            DigitScore {
                                digit: digit.as_char(),
                                score: voxkey_core::cosine_similarity(embedding, centroid),
                            }
                        })
                        .collect();
                    verification::Event::AsrMatchedScored { asr_text, scores }
                }
                Err(PipelineOutcome::Mismatch(asr_text)) => verification::Event::AsrMismatch { asr_text },
                Err(PipelineOutcome::Failed(message)) => {
                    verification::Event::PipelineErrored(CoreError::Internal(message))
                }
                Err(PipelineOutcome::Cancelled) => {
                    *mode = SessionMode::Done;
                    return Vec::new();
                }
            };

            let (next_state, outputs) = verification::transition(state, event, threshold);
            let terminal = next_state.phase == verification::Phase::Terminal;
            if terminal {
                let method = outputs.iter().find_map(|o| match o {
                    verification::Output::VerifyResult { auth_method, authenticated, .. } if *authenticated => {
                        *auth_method
                    }
                    _ => None,
                });
                if let Some(method) = method {
                    metrics::record_verification_outcome(method);
                    metrics::record_session_completed("verification", "success");
                } else {
                    metrics::record_session_completed("verification", "failure");
                }
                *mode = SessionMode::Done;
            } else {
                *mode = SessionMode::Verifying { state: next_state, gallery };
            }
            outputs.into_iter().map(|o| conv::verification_output(&speaker_id, o)).collect()
        }
        other @ (SessionMode::Idle | SessionMode::Done) => {
            *mode = other;
            Vec::new()
        }
    }
}

/// Draw the challenge length uniformly from the configured [min, max] range
/// (spec §4.7: "a single string of length L in [4, 6]").
fn challenge_length(settings: &voxkey_config::Settings) -> usize {
    let min = settings.pipeline.challenge_length_min;
    let max = settings.pipeline.challenge_length_max.max(min);
    rand::Rng::gen_range(&mut rand::rngs::OsRng, min..=max) as usize
}

fn current_set_index(state: &EnrollmentState) -> u8 {
    match state.phase {
        enrollment::Phase::AwaitingAudio { set_index, .. } => set_index,
        _ => 0,
    }
}

enum PipelineOutcome {
    Mismatch(String),
    Failed(String),
    Cancelled,
}

/// Runs decode -> duration check -> VAD -> ASR -> segment -> embed for one
/// binary audio frame against `expected_digits`, checkpointing cancellation
/// between every stage (spec §5).
async fn run_pipeline(
    app: &AppState,
    bytes: Vec<u8>,
    expected_digits: &str,
    cancellation: &CancellationToken,
) -> Result<(String, Vec<(Digit, Embedding)>), PipelineOutcome> {
    if cancellation.checkpoint().is_none() {
        return Err(PipelineOutcome::Cancelled);
    }

    let t0 = Instant::now();
    let audio = app
        .decoder
        .decode(&bytes)
        .await
        .map_err(|e| PipelineOutcome::Failed(e.to_string()))?;
    metrics::record_stage_latency("decode", t0.elapsed().as_secs_f64());

    let settings = app.current_settings();
    let duration_seconds = audio.samples.len() as f64 / audio.sample_rate.as_u32() as f64;
    if duration_seconds < settings.pipeline.min_audio_seconds || duration_seconds > settings.pipeline.max_audio_seconds {
        return Err(PipelineOutcome::Failed("audio duration out of bounds".to_string()));
    }

    if cancellation.checkpoint().is_none() {
        return Err(PipelineOutcome::Cancelled);
    }
    let t0 = Instant::now();
    let vad = app
        .pool
        .run_async(|| async { Ok(app.vad.detect(&audio).await) })
        .await
        .map_err(|e| PipelineOutcome::Failed(e.to_string()))?;
    metrics::record_stage_latency("vad", t0.elapsed().as_secs_f64());
    if !vad.is_speech {
        return Err(PipelineOutcome::Failed("no speech detected".to_string()));
    }

    if cancellation.checkpoint().is_none() {
        return Err(PipelineOutcome::Cancelled);
    }
    let t0 = Instant::now();
    let asr_result: AsrResult = app
        .pool
        .run_async(|| app.asr.transcribe(&audio))
        .await
        .map_err(|e| PipelineOutcome::Failed(e.to_string()))?;
    metrics::record_stage_latency("asr", t0.elapsed().as_secs_f64());

    if cancellation.checkpoint().is_none() {
        return Err(PipelineOutcome::Cancelled);
    }
    let slices = match segment(
        &asr_result,
        &audio,
        expected_digits,
        SegmentConfig { padding_ms: settings.pipeline.segmentation_padding_ms },
    ) {
        Ok(slices) => slices,
        Err(CoreError::SegmentationFailed(_)) => return Err(PipelineOutcome::Mismatch(asr_result.text)),
        Err(other) => return Err(PipelineOutcome::Failed(other.to_string())),
    };

    if cancellation.checkpoint().is_none() {
        return Err(PipelineOutcome::Cancelled);
    }
    let t0 = Instant::now();
    let mut digits = Vec::with_capacity(slices.len());
    for (i, slice) in slices.iter().enumerate() {
        let digit = expected_digits
            .chars()
            .nth(i)
            .and_then(Digit::from_char)
            .ok_or_else(|| PipelineOutcome::Failed("expected digit string malformed".to_string()))?;
        let embedding = app
            .pool
            .run_async(|| app.extractor.extract(slice))
            .await
            .map_err(|e| PipelineOutcome::Failed(e.to_string()))?;
        digits.push((digit, embedding));
    }
    metrics::record_stage_latency("embed", t0.elapsed().as_secs_f64());

    Ok((asr_result.text, digits))
}

fn error_frame(err: &CoreError) -> ServerMessage {
    ServerMessage::Error { code: err.code(), message: locale::ja::message(err).to_string() }
}

/// Translates the state machines' transport-agnostic `Output` types into wire
/// frames, filling in the `speaker_id` the machines themselves don't carry.
mod conv {
    use super::*;

    pub fn enrollment_output(speaker_id: &str, output: enrollment::Output) -> ServerMessage {
        match output {
            enrollment::Output::AsrResult {
                success,
                asr_result,
                set_index,
                remaining_sets,
                retry_count,
                max_retries,
                message,
            } => ServerMessage::AsrResult {
                success,
                asr_result,
                set_index,
                remaining_sets,
                retry_count,
                max_retries,
                message,
            },
            enrollment::Output::PinRejected { message } => ServerMessage::PinRejected { message },
            enrollment::Output::EnrollmentComplete { registered_digits, has_pin } => ServerMessage::EnrollmentComplete {
                speaker_id: speaker_id.to_string(),
                registered_digits,
                has_pin,
                status: "registered",
            },
            enrollment::Output::Error(err) => error_frame(&err),
            enrollment::Output::RequestCommit { .. } => unreachable!("RequestCommit is consumed before conversion"),
        }
    }

    pub fn verification_output(speaker_id: &str, output: verification::Output) -> ServerMessage {
        match output {
            verification::Output::VerifyResult {
                authenticated,
                asr_result,
                asr_matched,
                voice_similarity,
                digit_scores,
                can_fallback_to_pin,
                auth_method,
                message,
            } => ServerMessage::VerifyResult {
                authenticated,
                speaker_id: speaker_id.to_string(),
                asr_result,
                asr_matched,
                voice_similarity,
                digit_scores,
                can_fallback_to_pin,
                auth_method,
                message,
            },
            verification::Output::Error(err) => error_frame(&err),
        }
    }
}
