//! Live voice sessions over the Gemini `BidiGenerateContent` WebSocket.
//!
//! The handshake is: send a `setup` frame, wait for `setupComplete`, then
//! stream. The server sends every message, JSON included, as a binary
//! frame, so binary frames starting with `{` are parsed as JSON.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{channel_pair, LiveChannels, LiveConnector, LiveError, LiveEvent, LiveRequest, OutboundFrame};
use crate::config::AiConfig;

const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";
const DEFAULT_VOICE: &str = "Aoede";
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Empty {}

pub fn build_setup_message(model: &str, voice: &str, instructions: &str) -> SetupMessage {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };
    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: serde_json::json!({
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }),
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: instructions.to_string(),
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        },
    }
}

/// `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
pub fn build_audio_message(pcm: &[u8]) -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(pcm);
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": INPUT_AUDIO_MIME, "data": data }]
        }
    })
}

pub fn build_text_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true
        }
    })
}

pub fn build_audio_stream_end_message() -> serde_json::Value {
    serde_json::json!({ "realtimeInput": { "audioStreamEnd": true } })
}

/// One server frame may carry several events (audio plus transcripts).
pub fn parse_server_message(json_text: &str) -> Vec<LiveEvent> {
    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            return vec![LiveEvent::Error {
                message: format!("unparseable server message: {e}"),
            }]
        }
    };

    let mut events = Vec::new();
    let content = value.get("serverContent");

    if let Some(content) = content {
        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(LiveEvent::Interrupted);
        }
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(|v| v.as_array()) {
            for part in parts {
                let data = part.pointer("/inlineData/data").and_then(|v| v.as_str());
                if let Some(Ok(data)) = data.map(|d| base64::engine::general_purpose::STANDARD.decode(d)) {
                    events.push(LiveEvent::Audio { data });
                }
            }
        }
    }

    for (key, input) in [("inputTranscription", true), ("outputTranscription", false)] {
        let transcript = content
            .and_then(|c| c.get(key))
            .or_else(|| value.get(key))
            .and_then(|t| t.get("text"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty());
        if let Some(text) = transcript {
            let text = text.to_string();
            events.push(if input {
                LiveEvent::InputTranscript { text }
            } else {
                LiveEvent::OutputTranscript { text }
            });
        }
    }

    if let Some(content) = content {
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(LiveEvent::TurnComplete);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown server error");
        events.push(LiveEvent::Error {
            message: message.to_string(),
        });
    }
    if value.get("goAway").is_some() {
        events.push(LiveEvent::Closed);
    }

    events
}

/// JSON text of a frame, whether it arrived as text or as binary.
fn frame_json(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

pub struct GeminiLiveConnector {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    voice: String,
    setup_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            api_key: config.api_key().map(str::to_string),
            endpoint: config.live_endpoint.clone(),
            model: config.live_model.clone(),
            voice: DEFAULT_VOICE.to_string(),
            setup_timeout: SETUP_TIMEOUT,
        }
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    async fn await_setup_complete(ws: &mut WsStream) -> Result<(), LiveError> {
        while let Some(msg) = ws.next().await {
            let msg = msg.map_err(|e| LiveError::Handshake(e.to_string()))?;
            if let WsMessage::Close(frame) = &msg {
                return Err(LiveError::Handshake(format!("closed before setupComplete: {frame:?}")));
            }
            if frame_json(&msg).is_some_and(|text| text.contains("setupComplete")) {
                return Ok(());
            }
        }
        Err(LiveError::Handshake("stream ended before setupComplete".into()))
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, request: &LiveRequest) -> Result<LiveChannels, LiveError> {
        let key = self.api_key.as_deref().ok_or(LiveError::NotConfigured)?;
        let url = format!("{}?key={key}", self.endpoint);
        info!(session_id = %request.session_id, model = %self.model, "connecting live session");

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;

        let setup = build_setup_message(&self.model, &self.voice, &request.instructions);
        let setup_json =
            serde_json::to_string(&setup).map_err(|e| LiveError::Handshake(e.to_string()))?;
        ws.send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| LiveError::Handshake(e.to_string()))?;

        match tokio::time::timeout(self.setup_timeout, Self::await_setup_complete(&mut ws)).await {
            Err(_) => return Err(LiveError::HandshakeTimeout(self.setup_timeout.as_secs())),
            Ok(result) => result?,
        }
        info!(session_id = %request.session_id, "live setup complete");

        let (sink, stream) = ws.split();
        let (channels, remote) = channel_pair();
        tokio::spawn(outbound_loop(remote.outbound, sink, request.session_id.clone()));
        tokio::spawn(inbound_loop(stream, remote.events, request.session_id.clone()));
        Ok(channels)
    }
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut sink: SplitSink<WsStream, WsMessage>,
    session_id: String,
) {
    let mut audio_chunks: u64 = 0;
    while let Some(frame) = rx.recv().await {
        let payload = match frame {
            OutboundFrame::Audio(pcm) => {
                audio_chunks += 1;
                if audio_chunks == 1 || audio_chunks % 50 == 0 {
                    debug!(%session_id, chunk = audio_chunks, bytes = pcm.len(), "sending audio");
                }
                build_audio_message(&pcm)
            }
            OutboundFrame::Text(text) => build_text_message(&text),
            OutboundFrame::AudioStreamEnd => build_audio_stream_end_message(),
            OutboundFrame::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };
        if sink.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
            warn!(%session_id, "live send failed, stopping outbound loop");
            break;
        }
    }
    debug!(%session_id, "outbound loop finished");
}

async fn inbound_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::Sender<LiveEvent>,
    session_id: String,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                let _ = events.send(LiveEvent::Error { message: e.to_string() }).await;
                break;
            }
        };
        if let WsMessage::Close(frame) = &msg {
            info!(%session_id, close_frame = ?frame, "live provider closed the connection");
            break;
        }
        let Some(text) = frame_json(&msg) else {
            continue;
        };
        for event in parse_server_message(text) {
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
    let _ = events.send(LiveEvent::Closed).await;
    debug!(%session_id, "inbound loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let setup = build_setup_message("gemini-live", "Aoede", "Be a tutor.");
        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini-live");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be a tutor.");
        assert!(json["setup"]["inputAudioTranscription"].is_object());
    }

    #[test]
    fn test_audio_message_is_base64_pcm() {
        let json = build_audio_message(&[0x01, 0x02, 0x03]);
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AQID");
    }

    #[test]
    fn test_parse_server_content() {
        let msg = r#"{"serverContent":{
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQID"}}]},
            "outputTranscription":{"text":"Hello"},
            "turnComplete":true}}"#;
        let events = parse_server_message(msg);
        assert_eq!(
            events,
            vec![
                LiveEvent::Audio { data: vec![1, 2, 3] },
                LiveEvent::OutputTranscript { text: "Hello".into() },
                LiveEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_interruption_and_input_transcript() {
        let events = parse_server_message(
            r#"{"serverContent":{"interrupted":true},"inputTranscription":{"text":"wait"}}"#,
        );
        assert_eq!(
            events,
            vec![
                LiveEvent::Interrupted,
                LiveEvent::InputTranscript { text: "wait".into() }
            ]
        );
    }

    #[test]
    fn test_parse_garbage_yields_error() {
        assert!(matches!(
            parse_server_message("not json").as_slice(),
            [LiveEvent::Error { .. }]
        ));
        assert!(parse_server_message(r#"{"setupComplete":{}}"#).is_empty());
    }

    #[test]
    fn test_binary_json_frames_are_read() {
        let frame = WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(frame_json(&frame), Some(r#"{"setupComplete":{}}"#));
        let audio = WsMessage::Binary(vec![0u8, 1, 2].into());
        assert_eq!(frame_json(&audio), None);
    }

    #[tokio::test]
    async fn test_connect_without_key_fails_fast() {
        let connector = GeminiLiveConnector::new(&AiConfig::unconfigured());
        let request = LiveRequest {
            session_id: "s".into(),
            instructions: String::new(),
        };
        assert!(matches!(
            connector.connect(&request).await,
            Err(LiveError::NotConfigured)
        ));
    }
}
