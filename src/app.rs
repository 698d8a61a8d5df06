use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::gateway::{ChatRequest, Gateway, ImageAttachment};
use crate::models::{Conversation, Message, Role, DEFAULT_TITLE};
use crate::services::conversation::{self, PendingTurn};
use crate::services::export::{self, ExportFormat};
use crate::services::stats::ConversationStats;
use crate::services::{chat, media};
use crate::services::{LocalStore, SettingsService, UserSettings};

pub const TIP: &str =
    "Tip: type a message to chat, /image or /video to generate media, /help for all commands.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Text,
    Image,
    Video,
}

#[derive(Debug)]
pub enum AppCmd {
    NewConversation,
    SelectConversation(String),
    Send {
        text: String,
        mode: SendMode,
        image: Option<ImageAttachment>,
    },
    Regenerate(Option<String>),
    EditMessage {
        id: String,
        content: String,
    },
    DeleteMessage(String),
    TogglePin(String),
    Rename {
        id: String,
        title: String,
    },
    DeleteConversation(String),
    Clear,
    SearchConversations(String),
    SearchMessages(String),
    Export {
        format: ExportFormat,
        path: PathBuf,
    },
    Speak {
        message_id: String,
        path: PathBuf,
    },
    Stats,
    UpdateSettings(UserSettings),
    ResetSettings,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ConversationsChanged(Vec<Conversation>),
    MessagesChanged {
        conversation: Conversation,
        messages: Vec<Message>,
    },
    MessageAdded(Message),
    StreamUpdate {
        conversation_id: String,
        text: String,
    },
    SearchResults(Vec<Message>),
    Progress(String),
    Notice(String),
    Error(String),
    SendRejected,
}

/// Conversations with a reply in flight, each with the token that stops it.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<String, CancellationToken>>>);

impl InFlight {
    /// Mark a conversation busy. `None` when it already is.
    fn begin(&self, conversation_id: &str) -> Option<CancellationToken> {
        let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(conversation_id) {
            return None;
        }
        let token = CancellationToken::new();
        map.insert(conversation_id.to_string(), token.clone());
        Some(token)
    }

    fn finish(&self, conversation_id: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
    }

    fn cancel(&self, conversation_id: &str) -> bool {
        match self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for token in self.0.lock().unwrap_or_else(PoisonError::into_inner).values() {
            token.cancel();
        }
    }

    fn is_busy(&self, conversation_id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(conversation_id)
    }
}

enum Job {
    Chat(ChatRequest),
    Image(String),
    Video(String),
}

/// Headless front end: turns user intents into store and gateway calls and
/// reports every visible change as an `AppEvent`.
pub struct App {
    store: LocalStore,
    settings: UserSettings,
    gateway: Arc<dyn Gateway>,
    current: Option<Conversation>,
    in_flight: InFlight,
    tasks: JoinSet<()>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn Gateway>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let settings = SettingsService::load(&store);
        Self {
            store,
            settings,
            gateway,
            current: None,
            in_flight: InFlight::default(),
            tasks: JoinSet::new(),
            events,
        }
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.load_conversations()
    }

    pub fn messages(&self) -> Vec<Message> {
        match &self.current {
            Some(conv) => self.store.messages_for(&conv.id),
            None => Vec::new(),
        }
    }

    /// The one-time usage tip, returned only on the first call ever.
    pub fn take_tip(&self) -> Option<&'static str> {
        if self.store.has_seen_tip() {
            return None;
        }
        if let Err(e) = self.store.mark_tip_seen() {
            tracing::warn!("Failed to record tip: {}", e);
        }
        Some(TIP)
    }

    pub async fn handle(&mut self, cmd: AppCmd) {
        while self.tasks.try_join_next().is_some() {}

        if let Err(e) = self.dispatch(cmd).await {
            tracing::error!("{:#}", e);
            self.emit(AppEvent::Error(e.to_string()));
        }
    }

    /// Wait for every background reply to finish.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Background task failed: {}", e);
            }
        }
    }

    /// Stop all replies in flight and wait for them to settle.
    pub async fn shutdown(&mut self) {
        self.in_flight.cancel_all();
        self.wait_idle().await;
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn require_current(&self) -> Result<Conversation> {
        self.current
            .clone()
            .ok_or_else(|| anyhow!("No conversation selected"))
    }

    fn emit_conversations(&self) {
        self.emit(AppEvent::ConversationsChanged(self.store.load_conversations()));
    }

    fn emit_messages(&self) {
        if let Some(conversation) = &self.current {
            self.emit(AppEvent::MessagesChanged {
                conversation: conversation.clone(),
                messages: self.store.messages_for(&conversation.id),
            });
        }
    }

    async fn dispatch(&mut self, cmd: AppCmd) -> Result<()> {
        match cmd {
            AppCmd::NewConversation => {
                let conversation = self.store.create_conversation(DEFAULT_TITLE)?;
                tracing::info!("Created conversation {}", conversation.id);
                self.current = Some(conversation);
                self.emit_conversations();
                self.emit_messages();
            }
            AppCmd::SelectConversation(id) => {
                let conversation = self
                    .store
                    .get_conversation(&id)
                    .ok_or_else(|| anyhow!("Conversation not found"))?;
                self.current = Some(conversation);
                self.emit_messages();
            }
            AppCmd::Send { text, mode, image } => self.send(text, mode, image)?,
            AppCmd::Regenerate(message_id) => {
                let conversation = self.require_current()?;
                let Some(cancel) = self.in_flight.begin(&conversation.id) else {
                    self.emit(AppEvent::SendRejected);
                    return Ok(());
                };
                match conversation::prepare_regeneration(
                    &self.store,
                    &conversation.id,
                    message_id.as_deref(),
                ) {
                    Ok(turn) => {
                        self.emit_messages();
                        self.resend(&conversation.id, turn, cancel);
                    }
                    Err(e) => {
                        self.in_flight.finish(&conversation.id);
                        return Err(e);
                    }
                }
            }
            AppCmd::EditMessage { id, content } => {
                let conversation = self.require_current()?;
                let Some(cancel) = self.in_flight.begin(&conversation.id) else {
                    self.emit(AppEvent::SendRejected);
                    return Ok(());
                };
                match conversation::prepare_edit(&self.store, &conversation.id, &id, &content) {
                    Ok(Some(turn)) => {
                        self.emit_messages();
                        self.resend(&conversation.id, turn, cancel);
                    }
                    Ok(None) => {
                        self.in_flight.finish(&conversation.id);
                        self.emit_messages();
                    }
                    Err(e) => {
                        self.in_flight.finish(&conversation.id);
                        return Err(e);
                    }
                }
            }
            AppCmd::DeleteMessage(id) => {
                self.store.delete_message(&id)?;
                self.emit(AppEvent::Notice("Message deleted".to_string()));
                self.emit_messages();
            }
            AppCmd::TogglePin(id) => {
                let pinned = self.store.toggle_pinned(&id)?;
                let notice = if pinned {
                    "Message pinned"
                } else {
                    "Message unpinned"
                };
                self.emit(AppEvent::Notice(notice.to_string()));
                self.emit_messages();
            }
            AppCmd::Rename { id, title } => {
                let renamed = self.store.rename_conversation(&id, &title)?;
                if self.current.as_ref().is_some_and(|c| c.id == id) {
                    self.current = Some(renamed);
                }
                self.emit_conversations();
            }
            AppCmd::DeleteConversation(id) => {
                self.in_flight.cancel(&id);
                self.store.remove_conversation(&id)?;
                if self.current.as_ref().is_some_and(|c| c.id == id) {
                    self.current = None;
                }
                self.emit(AppEvent::Notice("Conversation deleted".to_string()));
                self.emit_conversations();
            }
            AppCmd::Clear => {
                let conversation = self.require_current()?;
                if self.in_flight.is_busy(&conversation.id) {
                    bail!("Wait for the current reply to finish");
                }
                self.store.clear_conversation(&conversation.id)?;
                self.emit(AppEvent::Notice("Conversation cleared".to_string()));
                self.emit_messages();
            }
            AppCmd::SearchConversations(query) => {
                self.emit(AppEvent::ConversationsChanged(
                    self.store.search_conversations(&query),
                ));
            }
            AppCmd::SearchMessages(query) => {
                let conversation = self.require_current()?;
                self.emit(AppEvent::SearchResults(
                    self.store.search_messages(&conversation.id, &query),
                ));
            }
            AppCmd::Export { format, path } => {
                let conversation = self.require_current()?;
                let messages = self.store.messages_for(&conversation.id);
                let content = export::export(format, &conversation, &messages, Utc::now())?;
                tokio::fs::write(&path, content).await?;
                tracing::info!("Exported {} to {}", conversation.id, path.display());
                self.emit(AppEvent::Notice(format!(
                    "Exported {} to {}",
                    format.mime_type(),
                    path.display()
                )));
            }
            AppCmd::Speak { message_id, path } => self.speak(message_id, path)?,
            AppCmd::Stats => {
                let conversation = self.require_current()?;
                let messages = self.store.messages_for(&conversation.id);
                let stats = ConversationStats::compute(&conversation, &messages);
                self.emit(AppEvent::Notice(stats.to_string()));
            }
            AppCmd::UpdateSettings(settings) => {
                SettingsService::save(&self.store, &settings)?;
                self.settings = settings;
                self.emit(AppEvent::Notice("Settings saved".to_string()));
            }
            AppCmd::ResetSettings => {
                self.settings = SettingsService::reset(&self.store)?;
                self.emit(AppEvent::Notice("Settings reset to defaults".to_string()));
            }
            AppCmd::Stop => {
                let conversation = self.require_current()?;
                if !self.in_flight.cancel(&conversation.id) {
                    self.emit(AppEvent::Notice("Nothing to stop".to_string()));
                }
            }
        }
        Ok(())
    }

    fn send(&mut self, text: String, mode: SendMode, image: Option<ImageAttachment>) -> Result<()> {
        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("Message cannot be empty");
        }

        let conversation = match &self.current {
            Some(conversation) => conversation.clone(),
            None => {
                let conversation = self
                    .store
                    .create_conversation(&conversation::truncate_title(&text))?;
                self.current = Some(conversation.clone());
                self.emit_conversations();
                conversation
            }
        };

        let Some(cancel) = self.in_flight.begin(&conversation.id) else {
            tracing::debug!("Rejected send while {} is busy", conversation.id);
            self.emit(AppEvent::SendRejected);
            return Ok(());
        };

        let history = self.store.messages_for(&conversation.id);
        let content = if image.is_some() {
            format!("{}{}", conversation::IMAGE_MARKER, text)
        } else {
            text.clone()
        };
        let user_message = Message::new(&conversation.id, Role::User, content);
        if let Err(e) = self.store.append_message(&user_message) {
            self.in_flight.finish(&conversation.id);
            return Err(e);
        }

        if history.is_empty() {
            match self
                .store
                .rename_conversation(&conversation.id, &conversation::truncate_title(&text))
            {
                Ok(renamed) => {
                    self.current = Some(renamed);
                    self.emit_conversations();
                }
                Err(e) => tracing::warn!("Failed to retitle conversation: {}", e),
            }
        }
        self.emit(AppEvent::MessageAdded(user_message));

        let job = match mode {
            SendMode::Text => Job::Chat(chat::build_request(
                &conversation.id,
                &history,
                &text,
                image,
                &self.settings,
            )),
            SendMode::Image => Job::Image(text),
            SendMode::Video => Job::Video(text),
        };
        self.spawn_job(conversation.id, job, cancel);
        Ok(())
    }

    fn resend(&mut self, conversation_id: &str, turn: PendingTurn, cancel: CancellationToken) {
        let request = chat::build_request(
            conversation_id,
            &turn.history,
            &turn.user_text,
            None,
            &self.settings,
        );
        self.spawn_job(conversation_id.to_string(), Job::Chat(request), cancel);
    }

    fn spawn_job(&mut self, conversation_id: String, job: Job, cancel: CancellationToken) {
        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let events = self.events.clone();
        let in_flight = self.in_flight.clone();
        let stopped = cancel.clone();

        self.tasks.spawn(async move {
            let result = match job {
                Job::Chat(request) => {
                    let updates = events.clone();
                    let id = conversation_id.clone();
                    chat::run_streaming(gateway, &store, request, cancel, move |text| {
                        let _ = updates.send(AppEvent::StreamUpdate {
                            conversation_id: id.clone(),
                            text: text.to_string(),
                        });
                    })
                    .await
                }
                Job::Image(prompt) => {
                    let _ = events.send(AppEvent::Progress("Generating your image...".to_string()));
                    tokio::select! {
                        _ = cancel.cancelled() => Err(anyhow!("Image generation cancelled")),
                        result = media::generate_image(gateway.as_ref(), &store, &conversation_id, &prompt) => result,
                    }
                }
                Job::Video(prompt) => {
                    let progress = events.clone();
                    media::generate_video(
                        gateway.as_ref(),
                        &store,
                        &conversation_id,
                        &prompt,
                        move |p| {
                            let _ = progress.send(AppEvent::Progress(format!(
                                "Generating video... {} elapsed (attempt {})",
                                p.elapsed_label(),
                                p.attempt
                            )));
                        },
                        &cancel,
                    )
                    .await
                }
            };
            in_flight.finish(&conversation_id);

            if stopped.is_cancelled() && store.get_conversation(&conversation_id).is_none() {
                tracing::debug!("Dropped reply for deleted conversation {}", conversation_id);
                return;
            }

            match result {
                Ok(Some(message)) => {
                    if let Err(e) = store.touch_conversation(&conversation_id) {
                        tracing::warn!("Failed to update conversation: {}", e);
                    }
                    let _ = events.send(AppEvent::MessageAdded(message));
                }
                Ok(None) => {
                    let _ = events.send(AppEvent::Notice("No response received".to_string()));
                }
                Err(e) => {
                    tracing::error!("Reply for {} failed: {:#}", conversation_id, e);
                    let _ = events.send(AppEvent::Error(e.to_string()));
                }
            }
        });
    }

    fn speak(&mut self, message_id: String, path: PathBuf) -> Result<()> {
        let message = self
            .messages()
            .into_iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| anyhow!("Message not found"))?;
        let gateway = self.gateway.clone();
        let events = self.events.clone();
        let voice = self.settings.voice;

        self.tasks.spawn(async move {
            let _ = events.send(AppEvent::Progress("Generating speech...".to_string()));
            let result = async {
                let audio = media::speak(gateway.as_ref(), &message.content, voice).await?;
                tokio::fs::write(&path, &audio).await?;
                anyhow::Ok(())
            }
            .await;
            let event = match result {
                Ok(()) => AppEvent::Notice(format!("Saved speech to {}", path.display())),
                Err(e) => AppEvent::Error(e.to_string()),
            };
            let _ = events.send(event);
        });
        Ok(())
    }
}
