use thiserror::Error;

use crate::models::Role;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// The function answered 200 but reported a non-zero business code.
    #[error("{0}")]
    Remote(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub images: Vec<ImageAttachment>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    pub custom_instructions: Option<String>,
    pub response_style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub conversation_id: String,
    pub aspect_ratio: String,
    pub n: u32,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            conversation_id: conversation_id.into(),
            aspect_ratio: "1:1".to_string(),
            n: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub prompt: String,
    pub model_name: String,
    pub aspect_ratio: String,
    pub duration: String,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_name: "kling-v2-5-turbo".to_string(),
            aspect_ratio: "16:9".to_string(),
            duration: "5".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoTaskStatus {
    Succeeded { url: Option<String> },
    Failed { message: Option<String> },
    /// Any other status string, e.g. "submitted" or "processing".
    Running(String),
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub input: String,
    pub voice: String,
    pub response_format: String,
}

impl SpeechRequest {
    pub fn mp3(input: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            voice: voice.into(),
            response_format: "mp3".to_string(),
        }
    }
}
