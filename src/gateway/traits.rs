use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::types::{
    ChatRequest, GatewayError, ImageRequest, SpeechRequest, StreamEvent, VideoRequest,
    VideoTaskStatus,
};

#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Stream a reply as `StreamEvent`s. Returns `Err` only when the request
    /// itself fails; a broken body is reported through `tx`.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait MediaGateway: Send + Sync {
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<String>, GatewayError>;

    async fn text_to_speech(&self, request: SpeechRequest) -> Result<Bytes, GatewayError>;
}

#[async_trait]
pub trait VideoJobs: Send + Sync {
    /// Submit a text-to-video job and return its task id.
    async fn create_video_task(&self, request: VideoRequest) -> Result<String, GatewayError>;

    async fn query_video_task(&self, task_id: &str) -> Result<VideoTaskStatus, GatewayError>;
}

pub trait Gateway: ChatGateway + MediaGateway + VideoJobs {}

impl<T: ChatGateway + MediaGateway + VideoJobs> Gateway for T {}
