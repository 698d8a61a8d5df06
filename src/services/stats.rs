use std::fmt;

use crate::models::{Conversation, Message, Role};
use crate::services::markdown;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub model_messages: usize,
    pub videos_generated: usize,
    pub images_generated: usize,
    pub total_words: usize,
    pub avg_words_per_message: usize,
    pub total_chars: usize,
    pub duration_minutes: i64,
}

impl ConversationStats {
    pub fn compute(conversation: &Conversation, messages: &[Message]) -> Self {
        let total_words: usize = messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();

        let avg_words_per_message = if messages.is_empty() {
            0
        } else {
            (total_words as f64 / messages.len() as f64).round() as usize
        };

        let duration = conversation.updated_at - conversation.created_at;
        let duration_minutes = (duration.num_seconds() as f64 / 60.0).round() as i64;

        Self {
            total_messages: messages.len(),
            user_messages: messages.iter().filter(|m| m.role == Role::User).count(),
            model_messages: messages.iter().filter(|m| m.role == Role::Model).count(),
            videos_generated: messages.iter().filter(|m| m.video_url.is_some()).count(),
            images_generated: messages
                .iter()
                .filter(|m| !markdown::image_urls(&m.content).is_empty())
                .count(),
            total_words,
            avg_words_per_message,
            total_chars: messages.iter().map(|m| m.content.chars().count()).sum(),
            duration_minutes,
        }
    }
}

impl fmt::Display for ConversationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total messages:    {}", self.total_messages)?;
        writeln!(f, "Your messages:     {}", self.user_messages)?;
        writeln!(f, "AI responses:      {}", self.model_messages)?;
        writeln!(f, "Images generated:  {}", self.images_generated)?;
        writeln!(f, "Videos generated:  {}", self.videos_generated)?;
        writeln!(f, "Total words:       {}", self.total_words)?;
        writeln!(f, "Avg words/message: {}", self.avg_words_per_message)?;
        writeln!(f, "Total characters:  {}", self.total_chars)?;
        write!(f, "Duration:          {} min", self.duration_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn conversation(minutes: i64) -> Conversation {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Conversation {
            id: "c1".to_string(),
            title: "Stats".to_string(),
            created_at: created,
            updated_at: created + Duration::seconds(minutes * 60 + 31),
        }
    }

    #[test]
    fn test_empty_conversation() {
        let stats = ConversationStats::compute(&conversation(0), &[]);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.avg_words_per_message, 0);
        assert_eq!(stats.total_chars, 0);
        assert_eq!(stats.duration_minutes, 1);
    }

    #[test]
    fn test_counts() {
        let messages = vec![
            Message::new("c1", Role::User, "draw a red fox"),
            Message::new("c1", Role::Model, "![Generated Image](https://img.test/fox.png)"),
            Message::new("c1", Role::User, "now animate it"),
            Message::new("c1", Role::Model, "[Video Generated]\nhttps://v.test/fox.mp4")
                .with_video("https://v.test/fox.mp4"),
        ];

        let stats = ConversationStats::compute(&conversation(14), &messages);

        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.model_messages, 2);
        assert_eq!(stats.images_generated, 1);
        assert_eq!(stats.videos_generated, 1);
        assert_eq!(stats.total_words, 4 + 2 + 3 + 3);
        assert_eq!(stats.avg_words_per_message, 3);
        assert_eq!(stats.duration_minutes, 15);
        assert!(stats.to_string().contains("Videos generated:  1"));
    }
}
