//! Duplex voice conversation with a live model.
//!
//! A [`LiveSession`] owns the two channel ends handed out by a
//! [`LiveConnector`]: outbound frames go to the provider task, inbound
//! [`LiveEvent`]s come back. The session tracks its lifecycle in an explicit
//! state machine: Idle -> Connecting -> Streaming -> Closed, or
//! Connecting -> Closed when the handshake fails.

pub mod gemini;
pub mod playback;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{SpeakerRole, TranscriptTurn};

pub use gemini::GeminiLiveConnector;
pub use playback::{PlaybackScheduler, ScheduledChunk};

const CHANNEL_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LiveState {
    Idle,
    Connecting,
    Streaming,
    Closed,
}

impl LiveState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LiveState::Idle => "IDLE",
            LiveState::Connecting => "CONNECTING",
            LiveState::Streaming => "STREAMING",
            LiveState::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveTransition {
    pub from: LiveState,
    pub to: LiveState,
    pub reason: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid live session transition: {} -> {}", from.as_str(), to.as_str())]
    InvalidTransition { from: LiveState, to: LiveState },
}

#[derive(Debug)]
pub struct LiveStateMachine {
    current: LiveState,
    history: Vec<LiveTransition>,
}

impl Default for LiveStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveStateMachine {
    pub fn new() -> Self {
        Self {
            current: LiveState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> LiveState {
        self.current
    }

    pub fn history(&self) -> &[LiveTransition] {
        &self.history
    }

    pub fn can_transition_to(&self, target: LiveState) -> bool {
        matches!(
            (self.current, target),
            (LiveState::Idle, LiveState::Connecting)
                | (LiveState::Connecting, LiveState::Streaming)
                | (LiveState::Connecting, LiveState::Closed)
                | (LiveState::Streaming, LiveState::Closed)
        )
    }

    pub fn transition_to(
        &mut self,
        target: LiveState,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if !self.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.current,
                to: target,
            });
        }
        self.history.push(LiveTransition {
            from: self.current,
            to: target,
            reason: reason.into(),
        });
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.current = target;
        Ok(())
    }
}

/// Frames sent from the learner side to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// PCM16LE, 16 kHz mono.
    Audio(Vec<u8>),
    Text(String),
    AudioStreamEnd,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveEvent {
    /// PCM16LE, 24 kHz mono.
    Audio {
        #[serde(skip)]
        data: Vec<u8>,
    },
    InputTranscript { text: String },
    OutputTranscript { text: String },
    TurnComplete,
    Interrupted,
    Error { message: String },
    Closed,
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("no AI credential is configured for live sessions")]
    NotConfigured,
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("handshake timed out after {0}s")]
    HandshakeTimeout(u64),
    #[error("live session is {}", .0.as_str())]
    NotStreaming(LiveState),
    #[error("live session channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone)]
pub struct LiveRequest {
    pub session_id: String,
    pub instructions: String,
}

/// Channel ends returned by a connector once the provider is streaming.
pub struct LiveChannels {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// The provider-side ends of a [`LiveChannels`] pair.
pub struct LiveRemote {
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub events: mpsc::Sender<LiveEvent>,
}

/// In-memory channel pair, for connectors that run their own task and for tests.
pub fn channel_pair() -> (LiveChannels, LiveRemote) {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        LiveChannels {
            outbound: out_tx,
            events: ev_rx,
        },
        LiveRemote {
            outbound: out_rx,
            events: ev_tx,
        },
    )
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Opens a provider session and returns once it is ready to stream.
    async fn connect(&self, request: &LiveRequest) -> Result<LiveChannels, LiveError>;
}

pub struct LiveSession {
    id: String,
    machine: LiveStateMachine,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    events: Option<mpsc::Receiver<LiveEvent>>,
}

impl LiveSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            machine: LiveStateMachine::new(),
            outbound: None,
            events: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LiveState {
        self.machine.state()
    }

    pub fn history(&self) -> &[LiveTransition] {
        self.machine.history()
    }

    /// Runs the handshake through `connector`. A failed handshake leaves the
    /// session `Closed`.
    pub async fn start(
        &mut self,
        connector: &dyn LiveConnector,
        instructions: String,
    ) -> Result<(), LiveError> {
        self.machine.transition_to(LiveState::Connecting, "connect requested")?;
        let request = LiveRequest {
            session_id: self.id.clone(),
            instructions,
        };
        match connector.connect(&request).await {
            Ok(channels) => {
                self.machine.transition_to(LiveState::Streaming, "handshake complete")?;
                self.outbound = Some(channels.outbound);
                self.events = Some(channels.events);
                info!(session_id = %self.id, "live session streaming");
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "live session failed to start");
                self.machine.transition_to(LiveState::Closed, err.to_string())?;
                Err(err)
            }
        }
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), LiveError> {
        let state = self.machine.state();
        if state != LiveState::Streaming {
            return Err(LiveError::NotStreaming(state));
        }
        let sender = self.outbound.as_ref().ok_or(LiveError::ChannelClosed)?;
        sender.send(frame).await.map_err(|_| LiveError::ChannelClosed)
    }

    pub async fn send_audio(&self, pcm: &[u8]) -> Result<(), LiveError> {
        if pcm.is_empty() {
            return Ok(());
        }
        self.send(OutboundFrame::Audio(pcm.to_vec())).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), LiveError> {
        self.send(OutboundFrame::Text(text.into())).await
    }

    pub async fn end_audio_stream(&self) -> Result<(), LiveError> {
        self.send(OutboundFrame::AudioStreamEnd).await
    }

    /// Next provider event. Yields `Closed` once when the provider goes away,
    /// then `None`.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        let events = self.events.as_mut()?;
        match events.recv().await {
            Some(LiveEvent::Closed) | None => {
                self.mark_closed("provider closed");
                Some(LiveEvent::Closed)
            }
            Some(event) => Some(event),
        }
    }

    pub async fn close(&mut self) {
        if self.machine.state() != LiveState::Streaming {
            return;
        }
        if let Some(sender) = self.outbound.as_ref() {
            let _ = sender.send(OutboundFrame::Close).await;
        }
        self.mark_closed("closed by learner");
    }

    fn mark_closed(&mut self, reason: &str) {
        if self.machine.can_transition_to(LiveState::Closed) {
            let _ = self.machine.transition_to(LiveState::Closed, reason);
            info!(session_id = %self.id, reason, "live session closed");
        }
        self.outbound = None;
        self.events = None;
    }
}

/// Collects transcript fragments into whole turns.
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuilder {
    turns: Vec<TranscriptTurn>,
    open: bool,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &LiveEvent) {
        match event {
            LiveEvent::InputTranscript { text } => self.push(SpeakerRole::Learner, text),
            LiveEvent::OutputTranscript { text } => self.push(SpeakerRole::Tutor, text),
            LiveEvent::TurnComplete | LiveEvent::Interrupted => self.open = false,
            _ => {}
        }
    }

    fn push(&mut self, role: SpeakerRole, fragment: &str) {
        if fragment.trim().is_empty() {
            return;
        }
        match self.turns.last_mut() {
            Some(last) if self.open && last.role == role => last.text.push_str(fragment),
            _ => self.turns.push(TranscriptTurn {
                role,
                text: fragment.trim_start().to_string(),
            }),
        }
        self.open = true;
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<TranscriptTurn> {
        self.turns
            .into_iter()
            .map(|mut t| {
                t.text = t.text.trim().to_string();
                t
            })
            .collect()
    }

    pub fn has_learner_speech(&self) -> bool {
        self.turns.iter().any(|t| t.role == SpeakerRole::Learner)
    }
}
