//! WebSocket relay between the browser and a live voice session.
//!
//! Browser -> server: binary frames are PCM16 16 kHz audio; text frames are
//! JSON control messages (`text`, `audioStreamEnd`, `stop`).
//! Server -> browser: JSON text frames tagged by `type`; audio carries its
//! playback offset on the session clock.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AnalysisResult, Profile};
use crate::response::AppError;
use crate::services::audio::OUTPUT_SAMPLE_RATE;
use crate::services::live::{LiveEvent, LiveSession, PlaybackScheduler, TranscriptBuilder};
use crate::services::prompts::live_instructions;
use crate::state::AppState;

use super::load_profile;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame {
    Text { text: String },
    AudioStreamEnd,
    Stop,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerFrame<'a> {
    #[serde(rename_all = "camelCase")]
    Ready { session_id: &'a str },
    Audio {
        /// Base64 PCM16 24 kHz.
        data: String,
        start: f64,
        duration: f64,
        /// Seconds of relayed audio still queued, this chunk included.
        buffered: f64,
    },
    InputTranscript { text: &'a str },
    OutputTranscript { text: &'a str },
    TurnComplete,
    Interrupted,
    Error { message: String },
    Analysis { result: &'a AnalysisResult },
    Closed,
}

type WsSink = SplitSink<WebSocket, Message>;

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<LiveQuery>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    Ok(ws.on_upgrade(move |socket| relay(socket, state, profile, query.topic)))
}

async fn send_frame(sink: &mut WsSink, frame: &ServerFrame<'_>) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialise live frame");
            true
        }
    }
}

async fn relay(socket: WebSocket, state: AppState, profile: Profile, topic: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let session_id = Uuid::new_v4().to_string();
    let mut session = LiveSession::new(session_id.clone());

    let instructions = live_instructions(&profile, topic.as_deref());
    let connector = state.live();
    if let Err(err) = session.start(connector.as_ref(), instructions).await {
        let _ = send_frame(&mut sink, &ServerFrame::Error { message: err.to_string() }).await;
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    info!(username = %profile.username, %session_id, "live relay started");
    if !send_frame(&mut sink, &ServerFrame::Ready { session_id: &session_id }).await {
        session.close().await;
        return;
    }

    let clock = Instant::now();
    let mut scheduler = PlaybackScheduler::new(OUTPUT_SAMPLE_RATE);
    let mut transcript = TranscriptBuilder::new();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let keep_going = match msg {
                    Some(Ok(Message::Binary(pcm))) => session.send_audio(&pcm).await.is_ok(),
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Text { text }) => session.send_text(text).await.is_ok(),
                        Ok(ClientFrame::AudioStreamEnd) => session.end_audio_stream().await.is_ok(),
                        Ok(ClientFrame::Stop) => false,
                        Err(err) => {
                            debug!(%session_id, error = %err, "ignoring malformed client frame");
                            true
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => true,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                };
                if !keep_going {
                    break;
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                transcript.observe(&event);
                let now = clock.elapsed().as_secs_f64();
                let frame = match &event {
                    LiveEvent::Audio { data } => {
                        let chunk = scheduler.schedule(now, data.len());
                        ServerFrame::Audio {
                            data: base64::engine::general_purpose::STANDARD.encode(data),
                            start: chunk.start,
                            duration: chunk.duration,
                            buffered: scheduler.buffered(now),
                        }
                    }
                    LiveEvent::InputTranscript { text } => ServerFrame::InputTranscript { text },
                    LiveEvent::OutputTranscript { text } => ServerFrame::OutputTranscript { text },
                    LiveEvent::TurnComplete => ServerFrame::TurnComplete,
                    LiveEvent::Interrupted => {
                        scheduler.reset(now);
                        ServerFrame::Interrupted
                    }
                    LiveEvent::Error { message } => ServerFrame::Error { message: message.clone() },
                    LiveEvent::Closed => break,
                };
                if !send_frame(&mut sink, &frame).await {
                    break;
                }
            }
        }
    }

    session.close().await;
    info!(%session_id, turns = transcript.turns().len(), "live relay finished");

    if transcript.has_learner_speech() {
        let turns = transcript.into_turns();
        match state.generator().analyze_conversation(&profile, &turns).await {
            Ok(result) => {
                let _ = send_frame(&mut sink, &ServerFrame::Analysis { result: &result }).await;
            }
            Err(err) => {
                warn!(%session_id, error = %err, "conversation analysis failed");
                let _ = send_frame(&mut sink, &ServerFrame::Error { message: err.to_string() }).await;
            }
        }
    }
    let _ = send_frame(&mut sink, &ServerFrame::Closed).await;
    let _ = sink.send(Message::Close(None)).await;
}
