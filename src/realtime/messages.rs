use serde::{Deserialize, Serialize};

/// Assistant voice selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self {
            kind: "server_vad".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
    pub language: String,
}

/// Session configuration sent once the transport is up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUpdate {
    pub turn_detection: TurnDetection,
    pub input_audio_transcription: InputAudioTranscription,
    pub instructions: String,
    pub temperature: f32,
    pub voice: Voice,
}

/// Conversation item injected by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ConversationItem {
    /// A system text message the assistant can read back
    pub fn system_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "system".to_string(),
            content: vec![ContentPart {
                kind: "input_text".to_string(),
                text: text.into(),
            }],
        }
    }
}

/// Messages sent to the realtime endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        audio: String, // Base64-encoded PCM16 bytes
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Error payload; the endpoint sends either an object or a bare string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ErrorDetail {
    Text(String),
    Object {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl Default for ErrorDetail {
    /// An `error` message without a payload; displays as "Unknown error"
    fn default() -> Self {
        ErrorDetail::Object {
            kind: None,
            code: None,
            message: None,
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetail::Text(text) => f.write_str(text),
            ErrorDetail::Object {
                kind,
                code,
                message,
            } => {
                let parts: Vec<&str> = [kind, code, message]
                    .into_iter()
                    .filter_map(|p| p.as_deref())
                    .filter(|p| !p.is_empty())
                    .collect();
                if parts.is_empty() {
                    f.write_str("Unknown error")
                } else {
                    f.write_str(&parts.join(": "))
                }
            }
        }
    }
}

/// Messages received from the realtime endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.audio_transcript.delta")]
    ResponseTranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    ResponseTranscriptDone,

    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        delta: String, // Base64-encoded PCM16 bytes
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta { delta: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    /// Flow messages that need no handling
    #[serde(other)]
    Other,
}
