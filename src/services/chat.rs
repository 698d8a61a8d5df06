use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;

use crate::gateway::{ChatGateway, ChatMessage, ChatRequest, ImageAttachment, StreamEvent};
use crate::models::{Message, Role};
use crate::services::settings::UserSettings;
use crate::services::store::LocalStore;

/// Build a `ChatRequest` carrying the full history plus the new user turn.
pub fn build_request(
    conversation_id: &str,
    history: &[Message],
    user_text: &str,
    image: Option<ImageAttachment>,
    settings: &UserSettings,
) -> ChatRequest {
    let mut messages = messages_to_chat_messages(history);
    messages.push(ChatMessage {
        role: Role::User,
        content: user_text.to_string(),
        images: image.into_iter().collect(),
    });

    ChatRequest {
        conversation_id: conversation_id.to_string(),
        messages,
        custom_instructions: settings.instructions(),
        response_style: Some(settings.response_style.as_str().to_string()),
    }
}

/// Convert stored messages to `(role, text)` pairs for the gateway.
pub fn messages_to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage::text(m.role, m.content.clone()))
        .collect()
}

/// Run one streaming turn.
///
/// `on_update` receives the accumulated reply after every fragment. When the
/// stream ends with text, the reply is stored as a `model` message and
/// returned; an empty reply stores nothing and returns `Ok(None)`. Transport
/// failures return `Err` and store nothing. Cancelling aborts the request and
/// keeps whatever text had arrived.
pub async fn run_streaming<G, F>(
    gateway: Arc<G>,
    store: &LocalStore,
    request: ChatRequest,
    cancel_token: CancellationToken,
    mut on_update: F,
) -> Result<Option<Message>>
where
    G: ChatGateway + ?Sized + 'static,
    F: FnMut(&str) + Send,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);
    let conversation_id = request.conversation_id.clone();

    let stream_handle = tokio::spawn(async move {
        if let Err(e) = gateway.stream_chat(request, tx.clone()).await {
            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
        }
    });

    let mut accumulated = String::new();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                stream_handle.abort();
                tracing::info!("Generation stopped for {}", conversation_id);
                return commit_reply(store, &conversation_id, accumulated);
            }
            event = rx.recv() => {
                match event {
                    Some(StreamEvent::Token(token)) => {
                        accumulated.push_str(&token);
                        on_update(&accumulated);
                    }
                    Some(StreamEvent::Done) => {
                        return commit_reply(store, &conversation_id, accumulated);
                    }
                    Some(StreamEvent::Error(error)) => {
                        tracing::error!("Chat stream failed: {}", error);
                        return Err(anyhow!(error));
                    }
                    None => {
                        if accumulated.is_empty() {
                            return Err(anyhow!("Stream ended unexpectedly"));
                        }
                        return commit_reply(store, &conversation_id, accumulated);
                    }
                }
            }
        }
    }
}

fn commit_reply(
    store: &LocalStore,
    conversation_id: &str,
    content: String,
) -> Result<Option<Message>> {
    if content.is_empty() {
        return Ok(None);
    }
    let message = Message::new(conversation_id, Role::Model, content);
    store.append_message(&message)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::services::database::Database;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Replays a fixed script of events.
    struct ScriptedGateway {
        events: Vec<StreamEvent>,
        fail: bool,
    }

    impl ScriptedGateway {
        fn new(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ChatGateway for ScriptedGateway {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), GatewayError> {
            if self.fail {
                return Err(GatewayError::NetworkError("connection refused".to_string()));
            }
            for event in &self.events {
                let _ = tx.send(event.clone()).await;
            }
            Ok(())
        }
    }

    /// Sends one token and then never finishes.
    struct HangingGateway;

    #[async_trait]
    impl ChatGateway for HangingGateway {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), GatewayError> {
            let _ = tx.send(StreamEvent::Token("partial".to_string())).await;
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn setup() -> (LocalStore, String) {
        let store = LocalStore::new(Database::new_in_memory().unwrap());
        let conv = store.create_conversation("Chat").unwrap();
        (store, conv.id)
    }

    fn request(conversation_id: &str) -> ChatRequest {
        build_request(conversation_id, &[], "hi", None, &UserSettings::default())
    }

    #[tokio::test]
    async fn test_accumulates_and_commits_once() {
        let (store, conv_id) = setup();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            StreamEvent::Token("Hel".to_string()),
            StreamEvent::Token("lo".to_string()),
            StreamEvent::Done,
        ]));

        let mut seen = Vec::new();
        let reply = run_streaming(
            gateway,
            &store,
            request(&conv_id),
            CancellationToken::new(),
            |text| seen.push(text.to_string()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(seen, vec!["Hel", "Hello"]);
        assert_eq!(reply.content, "Hello");
        assert_eq!(reply.role, Role::Model);
        let stored = store.messages_for(&conv_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_empty_reply_commits_nothing() {
        let (store, conv_id) = setup();
        let gateway = Arc::new(ScriptedGateway::new(vec![StreamEvent::Done]));

        let reply = run_streaming(gateway, &store, request(&conv_id), CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(store.messages_for(&conv_id).is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_commits_nothing() {
        let (store, conv_id) = setup();
        let mut gateway = ScriptedGateway::new(Vec::new());
        gateway.fail = true;

        let err = run_streaming(
            Arc::new(gateway),
            &store,
            request(&conv_id),
            CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert!(store.messages_for(&conv_id).is_empty());
    }

    #[tokio::test]
    async fn test_body_error_after_tokens_commits_nothing() {
        let (store, conv_id) = setup();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            StreamEvent::Token("Hel".to_string()),
            StreamEvent::Error("Stream error: reset".to_string()),
        ]));

        let result =
            run_streaming(gateway, &store, request(&conv_id), CancellationToken::new(), |_| {}).await;

        assert!(result.is_err());
        assert!(store.messages_for(&conv_id).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_reply() {
        let (store, conv_id) = setup();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let reply = run_streaming(
            Arc::new(HangingGateway),
            &store,
            request(&conv_id),
            cancel,
            move |_| trigger.cancel(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(reply.content, "partial");
        assert_eq!(store.messages_for(&conv_id).len(), 1);
    }

    #[test]
    fn test_build_request_appends_user_turn() {
        let history = vec![
            Message::new("c1", Role::User, "first"),
            Message::new("c1", Role::Model, "reply"),
        ];
        let settings = UserSettings {
            custom_instructions: "short answers".to_string(),
            ..UserSettings::default()
        };
        let image = ImageAttachment {
            mime_type: "image/png".to_string(),
            data: vec![9],
        };

        let request = build_request("c1", &history, "second", Some(image.clone()), &settings);

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Model);
        assert_eq!(request.messages[2].content, "second");
        assert_eq!(request.messages[2].images, vec![image]);
        assert!(request.messages[0].images.is_empty());
        assert_eq!(request.custom_instructions.as_deref(), Some("short answers"));
        assert_eq!(request.response_style.as_deref(), Some("balanced"));
    }
}
