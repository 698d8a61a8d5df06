pub mod client;
pub mod models;
pub mod stream;
pub mod traits;
pub mod types;

pub use client::GatewayClient;
pub use traits::{ChatGateway, Gateway, MediaGateway, VideoJobs};
pub use types::{
    ChatMessage, ChatRequest, GatewayError, ImageAttachment, ImageRequest, SpeechRequest,
    StreamEvent, VideoRequest, VideoTaskStatus,
};
