use anyhow::{anyhow, bail, Result};

use crate::models::{Message, Role};
use crate::services::store::LocalStore;

pub const TITLE_MAX_CHARS: usize = 50;

/// Prefix stored ahead of a user message that carried an image.
pub const IMAGE_MARKER: &str = "[Image attached]\n";

/// A user turn ready to be sent again: the history that precedes it and the
/// prompt text itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTurn {
    pub history: Vec<Message>,
    pub user_text: String,
}

/// Derive a conversation title from the first message: its first 50
/// characters, with `...` appended when truncated.
pub fn truncate_title(text: &str) -> String {
    let flat: String = text
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() > TITLE_MAX_CHARS {
        let head: String = flat.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        flat
    }
}

/// Prepare a regeneration.
///
/// With a target id, the target and everything after it are dropped and the
/// closest user message before it becomes the prompt. A user message as the
/// target is itself the prompt and is kept. Without a target, everything after
/// the last user message is dropped.
pub fn prepare_regeneration(
    store: &LocalStore,
    conversation_id: &str,
    message_id: Option<&str>,
) -> Result<PendingTurn> {
    let messages = store.messages_for(conversation_id);

    let target_idx = match message_id {
        Some(id) => messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| anyhow!("Message not found: {}", id))?,
        None => match messages.iter().rposition(|m| m.role == Role::User) {
            Some(idx) => idx,
            None => bail!("Nothing to regenerate"),
        },
    };

    let target = &messages[target_idx];
    let survivors = if target.role == Role::User {
        store.truncate_from(conversation_id, &target.id, true)?
    } else {
        if !messages[..target_idx].iter().any(|m| m.role == Role::User) {
            bail!("No preceding user message found");
        }
        store.truncate_from(conversation_id, &target.id, false)?
    };

    split_at_last_user(survivors)
}

/// Replace a message's content and drop everything after it.
///
/// Editing a user message returns the turn to resend; editing a model message
/// only rewrites it and returns `None`.
pub fn prepare_edit(
    store: &LocalStore,
    conversation_id: &str,
    message_id: &str,
    new_content: &str,
) -> Result<Option<PendingTurn>> {
    if new_content.trim().is_empty() {
        bail!("Message cannot be empty");
    }

    let target = store
        .messages_for(conversation_id)
        .into_iter()
        .find(|m| m.id == message_id)
        .ok_or_else(|| anyhow!("Message not found in this conversation: {}", message_id))?;

    store.update_message_content(message_id, new_content)?;
    if target.role == Role::Model {
        return Ok(None);
    }

    let survivors = store.truncate_from(conversation_id, message_id, true)?;
    split_at_last_user(survivors).map(Some)
}

fn split_at_last_user(mut messages: Vec<Message>) -> Result<PendingTurn> {
    let Some(idx) = messages.iter().rposition(|m| m.role == Role::User) else {
        bail!("No user message to resend");
    };
    let user = messages.remove(idx);
    messages.truncate(idx);
    let user_text = user
        .content
        .strip_prefix(IMAGE_MARKER)
        .map(str::to_string)
        .unwrap_or(user.content);
    Ok(PendingTurn {
        history: messages,
        user_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::Database;

    fn seeded() -> (LocalStore, String, Vec<Message>) {
        let store = LocalStore::new(Database::new_in_memory().unwrap());
        let conv = store.create_conversation("Seeded").unwrap();
        let msgs = vec![
            Message::new(&conv.id, Role::User, "q1"),
            Message::new(&conv.id, Role::Model, "a1"),
            Message::new(&conv.id, Role::User, "q2"),
            Message::new(&conv.id, Role::Model, "a2"),
        ];
        for m in &msgs {
            store.append_message(m).unwrap();
        }
        (store, conv.id, msgs)
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("Short question"), "Short question");
        let long = "x".repeat(60);
        assert_eq!(truncate_title(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(truncate_title(&"y".repeat(50)), "y".repeat(50));
        assert_eq!(truncate_title("line one\nline two"), "line one line two");
        assert_eq!(truncate_title(&"é".repeat(51)).chars().count(), 53);
    }

    #[test]
    fn test_regenerate_last_reply() {
        let (store, conv_id, _) = seeded();

        let turn = prepare_regeneration(&store, &conv_id, None).unwrap();

        assert_eq!(turn.user_text, "q2");
        assert_eq!(contents(&turn.history), vec!["q1", "a1"]);
        assert_eq!(contents(&store.messages_for(&conv_id)), vec!["q1", "a1", "q2"]);
    }

    #[test]
    fn test_regenerate_earlier_reply() {
        let (store, conv_id, msgs) = seeded();

        let turn = prepare_regeneration(&store, &conv_id, Some(&msgs[1].id)).unwrap();

        assert_eq!(turn.user_text, "q1");
        assert!(turn.history.is_empty());
        assert_eq!(contents(&store.messages_for(&conv_id)), vec!["q1"]);
    }

    #[test]
    fn test_regenerate_without_user_message_fails() {
        let store = LocalStore::new(Database::new_in_memory().unwrap());
        let conv = store.create_conversation("Empty").unwrap();
        assert!(prepare_regeneration(&store, &conv.id, None).is_err());

        let orphan = Message::new(&conv.id, Role::Model, "hello");
        store.append_message(&orphan).unwrap();
        assert!(prepare_regeneration(&store, &conv.id, Some(&orphan.id)).is_err());
        assert_eq!(store.messages_for(&conv.id).len(), 1);
    }

    #[test]
    fn test_edit_user_message_drops_later_messages() {
        let (store, conv_id, msgs) = seeded();

        let turn = prepare_edit(&store, &conv_id, &msgs[0].id, "q1 edited")
            .unwrap()
            .unwrap();

        assert_eq!(turn.user_text, "q1 edited");
        assert!(turn.history.is_empty());
        assert_eq!(contents(&store.messages_for(&conv_id)), vec!["q1 edited"]);
    }

    #[test]
    fn test_edit_model_message_only_rewrites() {
        let (store, conv_id, msgs) = seeded();

        let turn = prepare_edit(&store, &conv_id, &msgs[1].id, "better a1").unwrap();

        assert!(turn.is_none());
        assert_eq!(
            contents(&store.messages_for(&conv_id)),
            vec!["q1", "better a1", "q2", "a2"]
        );
    }

    #[test]
    fn test_edit_leaves_other_conversations_untouched() {
        let (store, conv_id, _) = seeded();
        let other = store.create_conversation("Other").unwrap();
        let foreign = Message::new(&other.id, Role::User, "keep me");
        store.append_message(&foreign).unwrap();

        assert!(prepare_edit(&store, &conv_id, &foreign.id, "changed").is_err());
        assert_eq!(store.messages_for(&other.id)[0].content, "keep me");
        assert_eq!(store.messages_for(&conv_id).len(), 4);
    }

    #[test]
    fn test_regenerate_strips_image_marker() {
        let store = LocalStore::new(Database::new_in_memory().unwrap());
        let conv = store.create_conversation("Photo").unwrap();
        let question = Message::new(&conv.id, Role::User, format!("{}what is this?", IMAGE_MARKER));
        store.append_message(&question).unwrap();
        store
            .append_message(&Message::new(&conv.id, Role::Model, "a cat"))
            .unwrap();

        let turn = prepare_regeneration(&store, &conv.id, None).unwrap();

        assert_eq!(turn.user_text, "what is this?");
        assert_eq!(
            store.messages_for(&conv.id)[0].content,
            format!("{}what is this?", IMAGE_MARKER)
        );
    }

    #[test]
    fn test_edit_rejects_blank_content() {
        let (store, conv_id, msgs) = seeded();
        assert!(prepare_edit(&store, &conv_id, &msgs[0].id, "  ").is_err());
        assert_eq!(store.messages_for(&conv_id)[0].content, "q1");
    }
}
