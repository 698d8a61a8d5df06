use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::models::*;
use super::stream::parse_sse_stream;
use super::traits::{ChatGateway, MediaGateway, VideoJobs};
use super::types::*;
use crate::config::GatewayConfig;

const CHAT_STREAM_FN: &str = "chat-stream";
const IMAGE_FN: &str = "generate-image";
const VIDEO_CREATE_FN: &str = "text-to-video";
const VIDEO_QUERY_FN: &str = "query-text-video";
const SPEECH_FN: &str = "text-to-speech";

/// HTTP client for the serverless functions in front of the AI gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn post(&self, function: &str) -> Result<RequestBuilder, GatewayError> {
        let url = self
            .config
            .function_url(function)
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
        Ok(self.authorize(self.client.post(url)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.config.api_key)
        }
    }

    /// Parse a function error body into a user-facing message.
    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
            let msg = parsed["error"]
                .as_str()
                .or_else(|| parsed["error"]["message"].as_str())
                .or_else(|| parsed["message"].as_str());
            if let Some(msg) = msg {
                return format!("HTTP {}: {}", status.as_u16(), msg);
            }
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    async fn send(builder: RequestBuilder) -> Result<Response, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::AuthError("Invalid gateway key".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, GatewayError> {
        Self::send(builder)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    fn build_contents(messages: &[ChatMessage]) -> Vec<ChatContent> {
        messages
            .iter()
            .map(|msg| {
                let mut parts = vec![ChatPart {
                    text: Some(msg.content.clone()),
                    inline_data: None,
                }];

                for img in &msg.images {
                    parts.push(ChatPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: img.mime_type.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(&img.data),
                        }),
                    });
                }

                ChatContent {
                    role: msg.role.as_str().to_string(),
                    parts,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ChatGateway for GatewayClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), GatewayError> {
        let body = ChatStreamBody {
            contents: Self::build_contents(&request.messages),
            conversation_id: request.conversation_id,
            custom_instructions: request.custom_instructions,
            response_style: request.response_style,
        };

        tracing::debug!(
            "Opening chat stream with {} history entries",
            body.contents.len()
        );
        let response = Self::send(self.post(CHAT_STREAM_FN)?.json(&body)).await?;

        parse_sse_stream(response.bytes_stream(), tx).await;

        Ok(())
    }
}

#[async_trait]
impl MediaGateway for GatewayClient {
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<String>, GatewayError> {
        let body = ImageGenerationBody {
            prompt: request.prompt,
            conversation_id: request.conversation_id,
            aspect_ratio: request.aspect_ratio,
            n: request.n,
        };

        let response: ImageGenerationResponse =
            Self::send_json(self.post(IMAGE_FN)?.json(&body)).await?;

        match response.base_resp {
            Some(base) if base.status_code == 0 => {}
            Some(base) => {
                return Err(GatewayError::Remote(
                    base.status_msg
                        .unwrap_or_else(|| "Image generation failed".to_string()),
                ))
            }
            None => {
                return Err(GatewayError::InvalidResponse(
                    "Missing status in image response".to_string(),
                ))
            }
        }

        Ok(response.data.map(|d| d.image_urls).unwrap_or_default())
    }

    async fn text_to_speech(&self, request: SpeechRequest) -> Result<Bytes, GatewayError> {
        let body = SpeechBody {
            input: request.input,
            voice: request.voice,
            response_format: request.response_format,
        };

        Self::send(self.post(SPEECH_FN)?.json(&body))
            .await?
            .bytes()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))
    }
}

#[async_trait]
impl VideoJobs for GatewayClient {
    async fn create_video_task(&self, request: VideoRequest) -> Result<String, GatewayError> {
        let body = VideoCreateBody {
            prompt: request.prompt,
            model_name: request.model_name,
            aspect_ratio: request.aspect_ratio,
            duration: request.duration,
        };

        let response: VideoCreateResponse =
            Self::send_json(self.post(VIDEO_CREATE_FN)?.json(&body)).await?;

        if response.code != Some(0) {
            return Err(GatewayError::Remote(
                response
                    .message
                    .unwrap_or_else(|| "Video generation failed".to_string()),
            ));
        }

        response
            .data
            .and_then(|d| d.task_id)
            .ok_or_else(|| GatewayError::InvalidResponse("No task ID returned".to_string()))
    }

    async fn query_video_task(&self, task_id: &str) -> Result<VideoTaskStatus, GatewayError> {
        let mut url = self
            .config
            .function_url(VIDEO_QUERY_FN)
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
        url.query_pairs_mut().append_pair("taskId", task_id);

        let response: VideoQueryResponse =
            Self::send_json(self.authorize(self.client.get(url))).await?;

        let data = response.data;
        let status = data
            .as_ref()
            .and_then(|d| d.task_status.clone())
            .unwrap_or_default();

        Ok(match status.as_str() {
            "succeed" | "succeeded" => VideoTaskStatus::Succeeded {
                url: data
                    .and_then(|d| d.task_result)
                    .and_then(|r| r.videos.into_iter().next())
                    .and_then(|v| v.url),
            },
            "failed" => VideoTaskStatus::Failed {
                message: data.and_then(|d| d.task_status_msg),
            },
            _ => VideoTaskStatus::Running(status),
        })
    }
}
