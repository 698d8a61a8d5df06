use anyhow::{bail, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{Conversation, Message};
use crate::services::database::Database;

pub const CONVERSATIONS_KEY: &str = "aura_ai_conversations";
pub const MESSAGES_KEY: &str = "aura_ai_messages";
pub const SETTINGS_KEY: &str = "aura_ai_settings";
pub const TIP_SEEN_KEY: &str = "has_seen_tip";

/// Whole-collection persistence of conversations and messages.
///
/// Each collection lives as one JSON array under a fixed key. Every mutation
/// reads the full array, edits it in memory and writes it back; callers must
/// not mutate the same store from two tasks at once.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn load_collection<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.db.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", key, e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Discarding unparsable {}: {}", key, e);
                Vec::new()
            }
        }
    }

    fn save_collection<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        let json = serde_json::to_string(items)?;
        self.db.set(key, &json)
    }

    // --- Conversations ---

    pub fn load_conversations(&self) -> Vec<Conversation> {
        self.load_collection(CONVERSATIONS_KEY)
    }

    pub fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        self.save_collection(CONVERSATIONS_KEY, conversations)
    }

    /// Create a conversation and place it first in the list.
    pub fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = Conversation::new(title);
        let mut conversations = self.load_conversations();
        conversations.insert(0, conversation.clone());
        self.save_conversations(&conversations)?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Option<Conversation> {
        self.load_conversations().into_iter().find(|c| c.id == id)
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            bail!("Conversation title cannot be empty");
        }
        self.update_conversation(id, |c| c.title = title.to_string())
    }

    /// Bump `updated_at` without other changes.
    pub fn touch_conversation(&self, id: &str) -> Result<Conversation> {
        self.update_conversation(id, |_| {})
    }

    fn update_conversation<F>(&self, id: &str, edit: F) -> Result<Conversation>
    where
        F: FnOnce(&mut Conversation),
    {
        let mut conversations = self.load_conversations();
        let Some(conversation) = conversations.iter_mut().find(|c| c.id == id) else {
            bail!("Conversation not found: {}", id);
        };
        edit(conversation);
        conversation.updated_at = Utc::now();
        let updated = conversation.clone();
        self.save_conversations(&conversations)?;
        Ok(updated)
    }

    /// Delete a conversation together with all of its messages.
    pub fn remove_conversation(&self, id: &str) -> Result<()> {
        let mut conversations = self.load_conversations();
        conversations.retain(|c| c.id != id);
        self.save_conversations(&conversations)?;

        let mut messages = self.load_messages();
        messages.retain(|m| m.conversation_id != id);
        self.save_messages(&messages)
    }

    /// Case-insensitive title filter. A blank query matches everything.
    pub fn search_conversations(&self, query: &str) -> Vec<Conversation> {
        let query = query.trim().to_lowercase();
        let conversations = self.load_conversations();
        if query.is_empty() {
            return conversations;
        }
        conversations
            .into_iter()
            .filter(|c| c.title.to_lowercase().contains(&query))
            .collect()
    }

    // --- Messages ---

    pub fn load_messages(&self) -> Vec<Message> {
        self.load_collection(MESSAGES_KEY)
    }

    pub fn save_messages(&self, messages: &[Message]) -> Result<()> {
        self.save_collection(MESSAGES_KEY, messages)
    }

    pub fn append_message(&self, message: &Message) -> Result<()> {
        if self.get_conversation(&message.conversation_id).is_none() {
            bail!(
                "Cannot add message to unknown conversation {}",
                message.conversation_id
            );
        }
        let mut messages = self.load_messages();
        if messages.iter().any(|m| m.id == message.id) {
            bail!("Duplicate message id {}", message.id);
        }
        messages.push(message.clone());
        self.save_messages(&messages)
    }

    /// Messages of one conversation in insertion order.
    pub fn messages_for(&self, conversation_id: &str) -> Vec<Message> {
        self.load_messages()
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect()
    }

    pub fn update_message_content(&self, id: &str, content: &str) -> Result<Message> {
        let mut messages = self.load_messages();
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            bail!("Message not found: {}", id);
        };
        message.content = content.to_string();
        let updated = message.clone();
        self.save_messages(&messages)?;
        Ok(updated)
    }

    pub fn delete_message(&self, id: &str) -> Result<()> {
        let mut messages = self.load_messages();
        let before = messages.len();
        messages.retain(|m| m.id != id);
        if messages.len() == before {
            bail!("Message not found: {}", id);
        }
        self.save_messages(&messages)
    }

    /// Flip the pinned flag and return the new state.
    pub fn toggle_pinned(&self, id: &str) -> Result<bool> {
        let mut messages = self.load_messages();
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            bail!("Message not found: {}", id);
        };
        message.pinned = !message.pinned;
        let pinned = message.pinned;
        self.save_messages(&messages)?;
        Ok(pinned)
    }

    /// Drop every message of the conversation that comes after `message_id`.
    /// With `keep_target = false` the target itself is dropped as well.
    /// Returns the surviving messages of the conversation.
    pub fn truncate_from(
        &self,
        conversation_id: &str,
        message_id: &str,
        keep_target: bool,
    ) -> Result<Vec<Message>> {
        let messages = self.load_messages();
        let mut kept = Vec::with_capacity(messages.len());
        let mut survivors = Vec::new();
        let mut cut = false;
        let mut found = false;

        for message in messages {
            if message.conversation_id != conversation_id {
                kept.push(message);
                continue;
            }
            if cut {
                continue;
            }
            if message.id == message_id {
                found = true;
                cut = true;
                if !keep_target {
                    continue;
                }
            }
            survivors.push(message.clone());
            kept.push(message);
        }

        if !found {
            bail!("Message not found: {}", message_id);
        }
        self.save_messages(&kept)?;
        Ok(survivors)
    }

    /// Remove all messages of a conversation but keep the conversation.
    pub fn clear_conversation(&self, conversation_id: &str) -> Result<()> {
        let mut messages = self.load_messages();
        messages.retain(|m| m.conversation_id != conversation_id);
        self.save_messages(&messages)
    }

    pub fn search_messages(&self, conversation_id: &str, query: &str) -> Vec<Message> {
        let query = query.trim().to_lowercase();
        self.messages_for(conversation_id)
            .into_iter()
            .filter(|m| query.is_empty() || m.content.to_lowercase().contains(&query))
            .collect()
    }

    // --- One-time tip ---

    pub fn has_seen_tip(&self) -> bool {
        matches!(self.db.get(TIP_SEEN_KEY), Ok(Some(v)) if v == "true")
    }

    pub fn mark_tip_seen(&self) -> Result<()> {
        self.db.set(TIP_SEEN_KEY, "true")
    }
}
