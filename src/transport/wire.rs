//! Wire protocol for the live session
//!
//! JSON messages exchanged with the `BidiGenerateContent` endpoint, all
//! camelCase. Outbound: a `setup` envelope once after connect, then
//! `realtimeInput` envelopes carrying base64 PCM16 media chunks. Inbound:
//! `setupComplete` acknowledging the handshake, then `serverContent`
//! carrying response audio, transcriptions, interruption, and
//! turn-complete signals.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::audio::WireFrame;
use crate::config::SessionConfig;
use crate::transport::ServerEvent;
use crate::Result;

/// Response modality requested for live sessions
const AUDIO_MODALITY: &str = "AUDIO";

// ── Outbound ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk<'a> {
    mime_type: &'a str,
    data: String,
}

/// Serialize the session setup message
///
/// # Errors
///
/// Returns a serialization error if the config cannot be encoded.
pub fn setup_message(config: &SessionConfig) -> Result<String> {
    let message = SetupMessage {
        setup: Setup {
            model: &config.model,
            generation_config: GenerationConfig {
                response_modalities: [AUDIO_MODALITY],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &config.voice,
                        },
                    },
                },
            },
            system_instruction: (!config.system_instruction.is_empty()).then(|| Content {
                parts: [TextPart {
                    text: &config.system_instruction,
                }],
            }),
            input_audio_transcription: config.transcribe_input.then_some(Empty {}),
            output_audio_transcription: config.transcribe_output.then_some(Empty {}),
        },
    };

    Ok(serde_json::to_string(&message)?)
}

/// Serialize an outbound audio frame as a realtime-input message
///
/// # Errors
///
/// Returns a serialization error if the frame cannot be encoded.
pub fn realtime_input_message(frame: &WireFrame) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: &frame.mime_type,
                data: BASE64.encode(&frame.data),
            }],
        },
    };

    Ok(serde_json::to_string(&message)?)
}

// ── Inbound ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    interrupted: bool,
    turn_complete: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Transcription {
    text: String,
}

/// A parsed inbound message
#[derive(Debug, Default)]
pub struct ParsedMessage {
    /// True when the message acknowledges the setup handshake
    pub setup_complete: bool,
    /// Events carried by the message, in emission order
    pub events: Vec<ServerEvent>,
}

/// Parse an inbound message into transport events
///
/// A single message may carry several signals; their relative order is
/// preserved as transcriptions, then audio, then interruption, then
/// turn-complete. Audio parts with undecodable payloads are dropped with
/// a warning rather than terminating the session.
///
/// # Errors
///
/// Returns a serialization error if the payload is not valid JSON.
pub fn parse_server_message(payload: &[u8]) -> Result<ParsedMessage> {
    let message: ServerMessage = serde_json::from_slice(payload)?;

    let mut parsed = ParsedMessage {
        setup_complete: message.setup_complete.is_some(),
        events: Vec::new(),
    };

    let Some(content) = message.server_content else {
        return Ok(parsed);
    };

    if let Some(transcription) = content.input_transcription
        && !transcription.text.is_empty()
    {
        parsed.events.push(ServerEvent::InputTranscript(transcription.text));
    }
    if let Some(transcription) = content.output_transcription
        && !transcription.text.is_empty()
    {
        parsed
            .events
            .push(ServerEvent::OutputTranscript(transcription.text));
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            match BASE64.decode(inline.data.as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => {
                    parsed.events.push(ServerEvent::AudioChunk(bytes));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable audio part");
                }
            }
        }
    }

    if content.interrupted {
        parsed.events.push(ServerEvent::Interrupted);
    }
    if content.turn_complete {
        parsed.events.push(ServerEvent::TurnComplete);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm_mime_type;

    fn test_config() -> SessionConfig {
        SessionConfig::new("test-key")
    }

    #[test]
    fn test_setup_message_shape() {
        let json = setup_message(&test_config()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert!(value["setup"]["systemInstruction"]["parts"][0]["text"].is_string());
        assert!(value["setup"]["inputAudioTranscription"].is_object());
        assert!(value["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_setup_message_omits_disabled_transcription() {
        let mut config = test_config();
        config.transcribe_input = false;
        config.transcribe_output = false;

        let json = setup_message(&config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["setup"]["inputAudioTranscription"].is_null());
        assert!(value["setup"]["outputAudioTranscription"].is_null());
    }

    #[test]
    fn test_realtime_input_carries_base64_pcm() {
        let frame = WireFrame {
            seq: 7,
            data: vec![0x01, 0x02, 0x03, 0x04],
            mime_type: pcm_mime_type(16000),
        };

        let json = realtime_input_message(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let chunk = &value["realtimeInput"]["mediaChunks"][0];

        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        let decoded = BASE64.decode(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, frame.data);
    }

    #[test]
    fn test_parse_setup_complete() {
        let parsed = parse_server_message(br#"{"setupComplete": {}}"#).unwrap();
        assert!(parsed.setup_complete);
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn test_parse_audio_chunk() {
        let payload = format!(
            r#"{{"serverContent": {{"modelTurn": {{"parts": [{{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{}"}}}}]}}}}}}"#,
            BASE64.encode([1u8, 2, 3, 4]),
        );

        let parsed = parse_server_message(payload.as_bytes()).unwrap();
        assert_eq!(parsed.events, vec![ServerEvent::AudioChunk(vec![1, 2, 3, 4])]);
    }

    #[test]
    fn test_parse_interrupted_and_turn_complete_order() {
        let payload = br#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#;
        let parsed = parse_server_message(payload).unwrap();
        assert_eq!(
            parsed.events,
            vec![ServerEvent::Interrupted, ServerEvent::TurnComplete]
        );
    }

    #[test]
    fn test_parse_transcriptions() {
        let payload = br#"{"serverContent": {"inputTranscription": {"text": "hello"}, "outputTranscription": {"text": "hi there"}}}"#;
        let parsed = parse_server_message(payload).unwrap();
        assert_eq!(
            parsed.events,
            vec![
                ServerEvent::InputTranscript("hello".to_string()),
                ServerEvent::OutputTranscript("hi there".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_bad_base64_drops_part() {
        let payload = br#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "!!!not-base64!!!"}}]}, "turnComplete": true}}"#;
        let parsed = parse_server_message(payload).unwrap();
        assert_eq!(parsed.events, vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        assert!(parse_server_message(b"not json").is_err());
    }

    #[test]
    fn test_parse_unknown_fields_ignored() {
        let payload = br#"{"usageMetadata": {"totalTokens": 12}, "serverContent": {"turnComplete": true}}"#;
        let parsed = parse_server_message(payload).unwrap();
        assert_eq!(parsed.events, vec![ServerEvent::TurnComplete]);
    }
}
