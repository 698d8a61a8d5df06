use anyhow::{bail, Result};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::gateway::{ImageRequest, MediaGateway, SpeechRequest, VideoJobs, VideoRequest};
use crate::models::{Message, Role};
use crate::services::markdown;
use crate::services::settings::Voice;
use crate::services::store::LocalStore;
use crate::services::video::{self, PollProgress};

pub const MAX_SPEECH_CHARS: usize = 5000;

/// Generate one image and store it as a markdown image reply.
/// Returns `Ok(None)` when the gateway produced no image.
pub async fn generate_image<G>(
    gateway: &G,
    store: &LocalStore,
    conversation_id: &str,
    prompt: &str,
) -> Result<Option<Message>>
where
    G: MediaGateway + ?Sized,
{
    let urls = gateway
        .generate_image(ImageRequest::new(prompt, conversation_id))
        .await?;

    let Some(url) = urls.into_iter().next() else {
        tracing::warn!("Image generation returned no images");
        return Ok(None);
    };

    let message = Message::new(
        conversation_id,
        Role::Model,
        format!("![Generated Image]({})", url),
    );
    store.append_message(&message)?;
    Ok(Some(message))
}

/// Run a text-to-video job to completion and store the resulting video reply.
pub async fn generate_video<J, P>(
    jobs: &J,
    store: &LocalStore,
    conversation_id: &str,
    prompt: &str,
    on_progress: P,
    cancel_token: &CancellationToken,
) -> Result<Option<Message>>
where
    J: VideoJobs + ?Sized,
    P: FnMut(PollProgress),
{
    let url = video::generate_video(jobs, VideoRequest::new(prompt), on_progress, cancel_token)
        .await?;

    let Some(url) = url else {
        tracing::warn!("Video task succeeded without a result URL");
        return Ok(None);
    };

    let message = Message::new(
        conversation_id,
        Role::Model,
        format!("[Video Generated]\n{}", url),
    )
    .with_video(url);
    store.append_message(&message)?;
    Ok(Some(message))
}

/// Synthesize speech for a message body. Markdown is flattened first.
pub async fn speak<G>(gateway: &G, content: &str, voice: Voice) -> Result<Bytes>
where
    G: MediaGateway + ?Sized,
{
    let text = markdown::to_plain_text(content);
    let text = text.trim();
    if text.is_empty() {
        bail!("Nothing to read aloud");
    }
    if text.chars().count() > MAX_SPEECH_CHARS {
        bail!("Text exceeds {} characters", MAX_SPEECH_CHARS);
    }

    let audio = gateway
        .text_to_speech(SpeechRequest::mp3(text, voice.as_str()))
        .await?;
    tracing::debug!("Received {} bytes of audio", audio.len());
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, VideoTaskStatus};
    use crate::services::database::Database;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMedia {
        urls: Vec<String>,
        spoken: Mutex<Vec<SpeechRequest>>,
    }

    #[async_trait]
    impl MediaGateway for FakeMedia {
        async fn generate_image(&self, _request: ImageRequest) -> Result<Vec<String>, GatewayError> {
            Ok(self.urls.clone())
        }

        async fn text_to_speech(&self, request: SpeechRequest) -> Result<Bytes, GatewayError> {
            self.spoken.lock().unwrap().push(request);
            Ok(Bytes::from_static(b"ID3"))
        }
    }

    struct InstantJobs;

    #[async_trait]
    impl VideoJobs for InstantJobs {
        async fn create_video_task(&self, _request: VideoRequest) -> Result<String, GatewayError> {
            Ok("t".to_string())
        }

        async fn query_video_task(&self, _task_id: &str) -> Result<VideoTaskStatus, GatewayError> {
            Ok(VideoTaskStatus::Succeeded {
                url: Some("https://v.test/clip.mp4".to_string()),
            })
        }
    }

    fn setup() -> (LocalStore, String) {
        let store = LocalStore::new(Database::new_in_memory().unwrap());
        let conv = store.create_conversation("Media").unwrap();
        (store, conv.id)
    }

    #[tokio::test]
    async fn test_image_reply_is_markdown() {
        let (store, conv_id) = setup();
        let gateway = FakeMedia {
            urls: vec!["https://img.test/a.png".to_string(), "https://img.test/b.png".to_string()],
            ..FakeMedia::default()
        };

        let message = generate_image(&gateway, &store, &conv_id, "a fox")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.content, "![Generated Image](https://img.test/a.png)");
        assert_eq!(store.messages_for(&conv_id).len(), 1);
    }

    #[tokio::test]
    async fn test_no_image_commits_nothing() {
        let (store, conv_id) = setup();
        let result = generate_image(&FakeMedia::default(), &store, &conv_id, "a fox")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.messages_for(&conv_id).is_empty());
    }

    #[tokio::test]
    async fn test_video_reply_carries_url() {
        let (store, conv_id) = setup();
        let message = generate_video(
            &InstantJobs,
            &store,
            &conv_id,
            "waves",
            |_| {},
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(message.content, "[Video Generated]\nhttps://v.test/clip.mp4");
        assert_eq!(message.video_url.as_deref(), Some("https://v.test/clip.mp4"));
        assert_eq!(store.messages_for(&conv_id)[0], message);
    }

    #[tokio::test]
    async fn test_speak_flattens_markdown() {
        let gateway = FakeMedia::default();
        let audio = speak(&gateway, "**Hello** `world`", Voice::Onyx).await.unwrap();
        assert_eq!(audio.as_ref(), b"ID3");

        let spoken = gateway.spoken.lock().unwrap();
        assert_eq!(spoken[0].input, "Hello world");
        assert_eq!(spoken[0].voice, "onyx");
        assert_eq!(spoken[0].response_format, "mp3");
    }

    #[tokio::test]
    async fn test_speak_rejects_long_and_empty_text() {
        let gateway = FakeMedia::default();
        let long = "a".repeat(MAX_SPEECH_CHARS + 1);
        assert!(speak(&gateway, &long, Voice::Heart).await.is_err());
        assert!(speak(&gateway, "   ", Voice::Heart).await.is_err());
        assert!(gateway.spoken.lock().unwrap().is_empty());
    }
}
