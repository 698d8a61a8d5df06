use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Conversation, Message, Role};
use crate::services::markdown::{escape_html, render_html};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain",
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Json => "application/json",
            ExportFormat::Html => "text/html",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(ExportFormat::Text),
            "md" | "markdown" => Some(ExportFormat::Markdown),
            "json" => Some(ExportFormat::Json),
            "html" | "htm" => Some(ExportFormat::Html),
            _ => None,
        }
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// File name for an export, derived from the conversation title.
pub fn file_name(conversation: &Conversation, format: ExportFormat) -> String {
    let stem: String = conversation
        .title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = if stem.is_empty() { "conversation" } else { stem.as_str() };
    format!("{}.{}", stem, format.extension())
}

/// Serialize a conversation and its messages. Pure: the same inputs always
/// produce the same output.
pub fn export(
    format: ExportFormat,
    conversation: &Conversation,
    messages: &[Message],
    exported_at: DateTime<Utc>,
) -> Result<String> {
    Ok(match format {
        ExportFormat::Text => export_to_text(conversation, messages),
        ExportFormat::Markdown => export_to_markdown(conversation, messages),
        ExportFormat::Json => export_to_json(conversation, messages, exported_at)?,
        ExportFormat::Html => export_to_html(conversation, messages),
    })
}

pub fn export_to_text(conversation: &Conversation, messages: &[Message]) -> String {
    let mut output = format!(
        "Conversation: {}\nCreated: {}\n\n{}\n\n",
        conversation.title,
        format_timestamp(&conversation.created_at),
        "=".repeat(50)
    );

    let entries: Vec<String> = messages
        .iter()
        .map(|msg| {
            let mut entry = format!(
                "[{}] {}:\n{}\n",
                format_timestamp(&msg.created_at),
                msg.role.label(),
                msg.content
            );
            if let Some(url) = &msg.video_url {
                entry.push_str(&format!("Video: {}\n", url));
            }
            entry
        })
        .collect();

    output.push_str(&entries.join("\n---\n\n"));
    output
}

pub fn export_to_markdown(conversation: &Conversation, messages: &[Message]) -> String {
    let mut output = format!(
        "# {}\n\n**Created:** {}\n\n---\n\n",
        conversation.title,
        format_timestamp(&conversation.created_at)
    );

    let entries: Vec<String> = messages
        .iter()
        .map(|msg| {
            let mut entry = format!(
                "### **{}** *{}*\n\n{}\n",
                msg.role.label(),
                format_timestamp(&msg.created_at),
                msg.content
            );
            if let Some(url) = &msg.video_url {
                entry.push_str(&format!("\n[Generated Video]({})\n", url));
            }
            entry
        })
        .collect();

    output.push_str(&entries.join("\n---\n\n"));
    output
}

#[derive(Serialize)]
struct JsonExport<'a> {
    conversation: &'a Conversation,
    messages: &'a [Message],
    exported_at: DateTime<Utc>,
}

pub fn export_to_json(
    conversation: &Conversation,
    messages: &[Message],
    exported_at: DateTime<Utc>,
) -> Result<String> {
    let data = JsonExport {
        conversation,
        messages,
        exported_at,
    };
    Ok(serde_json::to_string_pretty(&data)?)
}

pub fn export_to_html(conversation: &Conversation, messages: &[Message]) -> String {
    let title = escape_html(&conversation.title);

    let mut body = String::new();
    for msg in messages {
        let background = match msg.role {
            Role::User => "#e3f2fd",
            Role::Model => "#f5f5f5",
        };
        body.push_str(&format!(
            "  <div class=\"message\" style=\"background: {};\">\n    <div class=\"role\">{}</div>\n    <div class=\"time\">{}</div>\n    <div class=\"content\">{}</div>\n",
            background,
            msg.role.label(),
            format_timestamp(&msg.created_at),
            render_html(&msg.content)
        ));
        if let Some(url) = &msg.video_url {
            body.push_str(&format!(
                "    <video src=\"{}\" controls></video>\n",
                escape_html(url)
            ));
        }
        body.push_str("  </div>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>
    body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }}
    h1 {{ color: #333; border-bottom: 2px solid #ddd; padding-bottom: 10px; }}
    .meta {{ color: #666; font-size: 14px; margin-bottom: 30px; }}
    .message {{ margin-bottom: 20px; padding: 15px; border-radius: 8px; }}
    .role {{ font-weight: bold; margin-bottom: 5px; }}
    .time {{ font-size: 12px; color: #666; margin-bottom: 10px; }}
    video, img {{ max-width: 100%; border-radius: 8px; margin-top: 10px; }}
  </style>
</head>
<body>
  <h1>{title}</h1>
  <div class="meta">Created: {created}</div>
{body}</body>
</html>
"#,
        title = title,
        created = format_timestamp(&conversation.created_at),
        body = body
    )
}
