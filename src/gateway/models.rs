use serde::{Deserialize, Serialize};

// --- Chat stream ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamBody {
    pub contents: Vec<ChatContent>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_style: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<ChatPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String, // base64-encoded
}

/// One `data:` event of the chat stream.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    pub candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<ChatContent>,
}

impl StreamChunk {
    /// Text at `candidates[0].content.parts[0].text`, if any.
    pub fn into_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

// --- Image generation ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationBody {
    pub prompt: String,
    pub conversation_id: String,
    pub aspect_ratio: String,
    pub n: u32,
}

#[derive(Debug, Deserialize)]
pub struct ImageGenerationResponse {
    pub data: Option<ImageGenerationData>,
    pub base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
pub struct ImageGenerationData {
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BaseResp {
    pub status_code: i64,
    pub status_msg: Option<String>,
}

// --- Text to video ---

#[derive(Debug, Serialize)]
pub struct VideoCreateBody {
    pub prompt: String,
    pub model_name: String,
    pub aspect_ratio: String,
    pub duration: String,
}

#[derive(Debug, Deserialize)]
pub struct VideoCreateResponse {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub data: Option<VideoCreateData>,
}

#[derive(Debug, Deserialize)]
pub struct VideoCreateData {
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoQueryResponse {
    pub data: Option<VideoQueryData>,
}

#[derive(Debug, Deserialize)]
pub struct VideoQueryData {
    pub task_status: Option<String>,
    pub task_status_msg: Option<String>,
    pub task_result: Option<VideoTaskResult>,
}

#[derive(Debug, Deserialize)]
pub struct VideoTaskResult {
    #[serde(default)]
    pub videos: Vec<VideoAsset>,
}

#[derive(Debug, Deserialize)]
pub struct VideoAsset {
    pub url: Option<String>,
}

// --- Text to speech ---

#[derive(Debug, Serialize)]
pub struct SpeechBody {
    pub input: String,
    pub voice: String,
    pub response_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_path() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"ignored"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.into_text().as_deref(), Some("Hel"));
    }

    #[test]
    fn test_chunk_without_text() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"usageMetadata":{"promptTokenCount":3}}"#).unwrap();
        assert_eq!(chunk.into_text(), None);

        let chunk: StreamChunk = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(chunk.into_text(), None);
    }

    #[test]
    fn test_chat_body_shape() {
        let body = ChatStreamBody {
            contents: vec![ChatContent {
                role: "user".to_string(),
                parts: vec![ChatPart {
                    text: Some("hi".to_string()),
                    inline_data: Some(InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: "AAAA".to_string(),
                    }),
                }],
            }],
            conversation_id: "c1".to_string(),
            custom_instructions: None,
            response_style: Some("balanced".to_string()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["responseStyle"], "balanced");
        assert!(json.get("customInstructions").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
    }
}
