//! Wire envelopes for the bidirectional live session
//!
//! Field names follow the endpoint's camelCase JSON. Unknown inbound fields
//! are ignored so protocol additions do not break the client.

use serde::{Deserialize, Serialize};

use crate::voice::codec;

/// Envelope sent from the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First frame of a session
    Setup(Setup),
    /// Microphone audio
    RealtimeInput(RealtimeInput),
    /// Tool call acknowledgements
    ToolResponse(ToolResponse),
}

/// Session configuration sent during the handshake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// A list of content parts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Content holding a single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    /// Whether the payload is raw PCM audio
    #[must_use]
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .is_some_and(|base| base.trim().eq_ignore_ascii_case("audio/pcm"))
    }

    /// Sample rate declared by a `rate=` MIME parameter
    #[must_use]
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("rate") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A callable capability advertised to the model
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

impl RealtimeInput {
    /// Wrap a PCM16 frame captured at `sample_rate`
    #[must_use]
    pub fn pcm(frame: &[u8], sample_rate: u32) -> Self {
        Self {
            audio: Blob {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: codec::to_base64(frame),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Acknowledgement for one function call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

/// Envelope received from the endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Parse a JSON frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON object of the expected shape
    pub fn parse(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Function calls carried by this message
    #[must_use]
    pub fn function_calls(&self) -> &[FunctionCall] {
        self.tool_call
            .as_ref()
            .map(|call| call.function_calls.as_slice())
            .unwrap_or_default()
    }

    /// Inline PCM audio parts of the model turn, in order
    pub fn audio_parts(&self) -> impl Iterator<Item = &Blob> {
        self.server_content
            .as_ref()
            .and_then(|content| content.model_turn.as_ref())
            .into_iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.is_pcm_audio())
    }

    /// Whether the user spoke over the model
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|content| content.interrupted)
    }

    /// Whether the model finished its turn
    #[must_use]
    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|content| content.turn_complete)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A request from the model to invoke a declared function
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_input_envelope() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput::pcm(&[0, 0, 1, 0], 16000));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["audio"]["data"], "AAABAA==");
    }

    #[test]
    fn test_tool_response_envelope() {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: Some("call-1".to_string()),
                name: "switch_mode".to_string(),
                response: serde_json::json!({"result": "Switched to HOMEWORK"}),
            }],
        });
        let json = serde_json::to_value(&msg).unwrap();
        let response = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "call-1");
        assert_eq!(response["response"]["result"], "Switched to HOMEWORK");
    }

    #[test]
    fn test_setup_envelope_shape() {
        let msg = ClientMessage::Setup(Setup {
            model: "models/test".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Puck".to_string(),
                        },
                    },
                },
            },
            system_instruction: Content::text("be kind"),
            tools: Vec::new(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "be kind");
        assert!(setup["systemInstruction"]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_parse_combined_server_message() {
        let raw = br#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"text": "hi"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"inlineData": {"mimeType": "image/png", "data": "AAA="}}
                ]},
                "interrupted": true
            },
            "toolCall": {"functionCalls": [{"id": "1", "name": "switch_mode", "args": {"mode": "SCIENCE"}}]},
            "usageMetadata": {"totalTokenCount": 12}
        }"#;

        let msg = ServerMessage::parse(raw).unwrap();
        assert!(msg.is_interrupted());
        assert!(!msg.is_turn_complete());
        assert_eq!(msg.function_calls().len(), 1);
        assert_eq!(msg.function_calls()[0].args["mode"], "SCIENCE");

        let audio: Vec<&Blob> = msg.audio_parts().collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].sample_rate(), Some(24000));
    }

    #[test]
    fn test_parse_setup_complete() {
        let msg = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert_eq!(msg.audio_parts().count(), 0);
        assert!(msg.function_calls().is_empty());
    }

    #[test]
    fn test_blob_mime_handling() {
        let blob = Blob {
            mime_type: "audio/pcm".to_string(),
            data: String::new(),
        };
        assert!(blob.is_pcm_audio());
        assert_eq!(blob.sample_rate(), None);

        let blob = Blob {
            mime_type: "Audio/PCM; Rate=16000".to_string(),
            data: String::new(),
        };
        assert!(blob.is_pcm_audio());
        assert_eq!(blob.sample_rate(), Some(16000));
    }
}
