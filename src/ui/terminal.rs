use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::app::{App, AppCmd, AppEvent, SendMode};
use crate::gateway::ImageAttachment;
use crate::models::{Conversation, Message, Role};
use crate::services::conversation::IMAGE_MARKER;
use crate::services::export::{self, ExportFormat};
use crate::services::settings::{ResponseStyle, Voice};

pub const HELP: &str = "\
Commands:
  <text>                 send a message
  /new                   start a new conversation
  /list                  list conversations
  /open <n|id>           open a conversation from the list
  /image <prompt>        generate an image
  /video <prompt>        generate a video
  /attach <file>         attach an image to the next message
  /regen [n]             regenerate the last reply, or reply n
  /edit <n> <text>       edit message n
  /del <n>               delete message n
  /pin <n>               pin or unpin message n
  /rename <title>        rename the current conversation
  /rm [n|id]             delete a conversation (default: current)
  /clear                 remove all messages of the current conversation
  /find <query>          search conversation titles
  /grep <query>          search messages of the current conversation
  /export <txt|md|json|html> [file]
  /say [n] [file]        read a message aloud into an mp3 file
  /stats                 conversation statistics
  /style <concise|balanced|detailed|creative>
  /voice <heart|alloy|echo|fable|onyx|nova|shimmer>
  /instructions [text]   set custom instructions (empty clears)
  /reset                 restore default settings
  /stop                  stop the reply in progress
  /quit                  exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    Image(String),
    Video(String),
    Attach(PathBuf),
    Regen(Option<usize>),
    Edit { index: usize, content: String },
    Delete(usize),
    Pin(usize),
    Rename(String),
    Remove(Option<String>),
    Clear,
    Find(String),
    Grep(String),
    Export {
        format: ExportFormat,
        path: Option<PathBuf>,
    },
    Say {
        index: Option<usize>,
        path: Option<PathBuf>,
    },
    Stats,
    Style(ResponseStyle),
    Voice(Voice),
    Instructions(String),
    Reset,
    Stop,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command /{0}. Type /help for the list.")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

fn required(arg: &str, usage: &'static str) -> Result<String, ParseError> {
    if arg.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(arg.to_string())
    }
}

fn index(arg: &str, usage: &'static str) -> Result<usize, ParseError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::Usage(usage)),
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "new" => Command::New,
        "list" => Command::List,
        "open" => Command::Open(required(arg, "/open <n|id>")?),
        "image" => Command::Image(required(arg, "/image <prompt>")?),
        "video" => Command::Video(required(arg, "/video <prompt>")?),
        "attach" => Command::Attach(PathBuf::from(required(arg, "/attach <file>")?)),
        "regen" => match arg {
            "" => Command::Regen(None),
            n => Command::Regen(Some(index(n, "/regen [n]")?)),
        },
        "edit" => {
            const USAGE: &str = "/edit <n> <text>";
            let (n, content) = arg.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
            Command::Edit {
                index: index(n, USAGE)?,
                content: required(content.trim(), USAGE)?,
            }
        }
        "del" => Command::Delete(index(arg, "/del <n>")?),
        "pin" => Command::Pin(index(arg, "/pin <n>")?),
        "rename" => Command::Rename(required(arg, "/rename <title>")?),
        "rm" => Command::Remove((!arg.is_empty()).then(|| arg.to_string())),
        "clear" => Command::Clear,
        "find" => Command::Find(arg.to_string()),
        "grep" => Command::Grep(required(arg, "/grep <query>")?),
        "export" => {
            const USAGE: &str = "/export <txt|md|json|html> [file]";
            let mut parts = arg.split_whitespace();
            let format = parts
                .next()
                .and_then(ExportFormat::from_str)
                .ok_or(ParseError::Usage(USAGE))?;
            Command::Export {
                format,
                path: parts.next().map(PathBuf::from),
            }
        }
        "say" => {
            const USAGE: &str = "/say [n] [file]";
            let mut parts = arg.split_whitespace().peekable();
            let index = match parts.peek() {
                Some(first) if first.chars().all(|c| c.is_ascii_digit()) => {
                    let n = index(first, USAGE)?;
                    parts.next();
                    Some(n)
                }
                _ => None,
            };
            Command::Say {
                index,
                path: parts.next().map(PathBuf::from),
            }
        }
        "stats" => Command::Stats,
        "style" => Command::Style(
            ResponseStyle::from_str(arg)
                .ok_or(ParseError::Usage("/style <concise|balanced|detailed|creative>"))?,
        ),
        "voice" => Command::Voice(
            Voice::from_str(arg)
                .ok_or(ParseError::Usage("/voice <heart|alloy|echo|fable|onyx|nova|shimmer>"))?,
        ),
        "instructions" => Command::Instructions(arg.to_string()),
        "reset" => Command::Reset,
        "stop" => Command::Stop,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Terminal-side state: what was last listed and how much of a streaming
/// reply has been printed.
///
/// Only one reply streams to the screen at a time. Replies from other
/// conversations are printed whole once they land.
#[derive(Debug, Default)]
pub struct View {
    listed: Vec<Conversation>,
    streaming: Option<(String, usize)>,
    show_timestamps: bool,
}

impl View {
    pub fn new(show_timestamps: bool) -> Self {
        Self {
            show_timestamps,
            ..Self::default()
        }
    }

    fn format_message(&self, number: Option<usize>, message: &Message) -> String {
        let mut line = String::new();
        if let Some(n) = number {
            line.push_str(&format!("[{}] ", n));
        }
        line.push_str(message.role.label());
        if message.pinned {
            line.push_str(" (pinned)");
        }
        if self.show_timestamps {
            line.push_str(&format!(" {}", message.created_at.format("%H:%M")));
        }
        line.push_str(": ");
        line.push_str(&message.content);
        line
    }

    fn end_stream(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.streaming.take().is_some() {
            writeln!(out)?;
        }
        Ok(())
    }

    fn is_streaming(&self, conversation_id: &str) -> bool {
        self.streaming
            .as_ref()
            .is_some_and(|(id, _)| id == conversation_id)
    }

    pub fn render(&mut self, event: &AppEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            AppEvent::ConversationsChanged(conversations) => {
                self.end_stream(out)?;
                self.listed = conversations.clone();
                if conversations.is_empty() {
                    writeln!(out, "No conversations.")?;
                }
                for (i, conv) in conversations.iter().enumerate() {
                    writeln!(
                        out,
                        "  {}. {}  ({})",
                        i + 1,
                        conv.title,
                        conv.updated_at.format("%Y-%m-%d %H:%M")
                    )?;
                }
            }
            AppEvent::MessagesChanged {
                conversation,
                messages,
            } => {
                self.end_stream(out)?;
                writeln!(out, "== {} ==", conversation.title)?;
                for (i, message) in messages.iter().enumerate() {
                    writeln!(out, "{}", self.format_message(Some(i + 1), message))?;
                }
            }
            AppEvent::MessageAdded(message) => {
                if message.role == Role::Model {
                    if self.is_streaming(&message.conversation_id) {
                        self.end_stream(out)?;
                    } else {
                        writeln!(out, "{}", self.format_message(None, message))?;
                    }
                }
            }
            AppEvent::StreamUpdate {
                conversation_id,
                text,
            } => {
                let printed = match &self.streaming {
                    Some((id, printed)) if id == conversation_id => *printed,
                    Some(_) => return Ok(()),
                    None => {
                        write!(out, "{}: ", Role::Model.label())?;
                        0
                    }
                };
                if let Some(delta) = text.get(printed..) {
                    write!(out, "{}", delta)?;
                }
                self.streaming = Some((conversation_id.clone(), text.len()));
                out.flush()?;
            }
            AppEvent::SearchResults(messages) => {
                writeln!(out, "{} matching message(s)", messages.len())?;
                for message in messages {
                    writeln!(out, "{}", self.format_message(None, message))?;
                }
            }
            AppEvent::Progress(text) => writeln!(out, "... {}", text)?,
            AppEvent::Notice(text) => writeln!(out, "{}", text)?,
            AppEvent::Error(text) => {
                self.end_stream(out)?;
                writeln!(out, "Error: {}", text)?;
            }
            AppEvent::SendRejected => {
                writeln!(out, "A reply is still in progress. Use /stop to cancel it.")?
            }
        }
        Ok(())
    }
}

enum Action {
    App(AppCmd),
    Print(String),
    Quit,
}

/// Turns parsed commands into `AppCmd`s, resolving list numbers against the
/// app's current state.
pub struct Shell {
    view: View,
    pending_image: Option<ImageAttachment>,
}

impl Shell {
    pub fn new(show_timestamps: bool) -> Self {
        Self {
            view: View::new(show_timestamps),
            pending_image: None,
        }
    }

    /// Render an event. The attachment is dropped only once a message
    /// carrying it has been stored.
    fn observe(&mut self, event: &AppEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            AppEvent::MessageAdded(message)
                if message.role == Role::User && message.content.starts_with(IMAGE_MARKER) =>
            {
                self.pending_image = None;
            }
            AppEvent::SendRejected if self.pending_image.is_some() => {
                writeln!(out, "The attachment is kept for your next message.")?;
            }
            _ => {}
        }
        self.view.render(event, out)
    }

    fn message_at(app: &App, index: usize) -> Result<Message> {
        app.messages()
            .into_iter()
            .nth(index - 1)
            .ok_or_else(|| anyhow!("No message {}", index))
    }

    fn conversation_ref(&self, app: &App, reference: &str) -> Result<String> {
        if let Ok(n) = reference.parse::<usize>() {
            let listed = if self.view.listed.is_empty() {
                app.conversations()
            } else {
                self.view.listed.clone()
            };
            return listed
                .get(n.wrapping_sub(1))
                .map(|c| c.id.clone())
                .ok_or_else(|| anyhow!("No conversation {}", n));
        }
        Ok(reference.to_string())
    }

    fn current_id(app: &App) -> Result<String> {
        app.current_conversation()
            .map(|c| c.id.clone())
            .ok_or_else(|| anyhow!("No conversation selected"))
    }

    async fn interpret(&mut self, command: Command, app: &App) -> Result<Action> {
        let cmd = match command {
            Command::Send(text) => AppCmd::Send {
                text,
                mode: SendMode::Text,
                image: self.pending_image.clone(),
            },
            Command::New => AppCmd::NewConversation,
            Command::List => AppCmd::SearchConversations(String::new()),
            Command::Open(reference) => {
                AppCmd::SelectConversation(self.conversation_ref(app, &reference)?)
            }
            Command::Image(prompt) => AppCmd::Send {
                text: prompt,
                mode: SendMode::Image,
                image: None,
            },
            Command::Video(prompt) => AppCmd::Send {
                text: prompt,
                mode: SendMode::Video,
                image: None,
            },
            Command::Attach(path) => {
                let mime_type =
                    image_mime(&path).ok_or_else(|| anyhow!("Unsupported image type"))?;
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                self.pending_image = Some(ImageAttachment {
                    mime_type: mime_type.to_string(),
                    data,
                });
                return Ok(Action::Print(format!(
                    "Attached {} to the next message",
                    path.display()
                )));
            }
            Command::Regen(index) => {
                let id = match index {
                    Some(n) => Some(Self::message_at(app, n)?.id),
                    None => None,
                };
                AppCmd::Regenerate(id)
            }
            Command::Edit { index, content } => AppCmd::EditMessage {
                id: Self::message_at(app, index)?.id,
                content,
            },
            Command::Delete(index) => AppCmd::DeleteMessage(Self::message_at(app, index)?.id),
            Command::Pin(index) => AppCmd::TogglePin(Self::message_at(app, index)?.id),
            Command::Rename(title) => AppCmd::Rename {
                id: Self::current_id(app)?,
                title,
            },
            Command::Remove(reference) => AppCmd::DeleteConversation(match reference {
                Some(r) => self.conversation_ref(app, &r)?,
                None => Self::current_id(app)?,
            }),
            Command::Clear => AppCmd::Clear,
            Command::Find(query) => AppCmd::SearchConversations(query),
            Command::Grep(query) => AppCmd::SearchMessages(query),
            Command::Export { format, path } => {
                let conversation = app
                    .current_conversation()
                    .ok_or_else(|| anyhow!("No conversation selected"))?;
                AppCmd::Export {
                    format,
                    path: path.unwrap_or_else(|| {
                        PathBuf::from(export::file_name(conversation, format))
                    }),
                }
            }
            Command::Say { index, path } => {
                let messages = app.messages();
                let (n, message) = match index {
                    Some(n) => (n, Self::message_at(app, n)?),
                    None => messages
                        .iter()
                        .enumerate()
                        .rev()
                        .find(|(_, m)| m.role == Role::Model)
                        .map(|(i, m)| (i + 1, m.clone()))
                        .ok_or_else(|| anyhow!("No reply to read"))?,
                };
                AppCmd::Speak {
                    message_id: message.id,
                    path: path.unwrap_or_else(|| PathBuf::from(format!("message-{}.mp3", n))),
                }
            }
            Command::Stats => AppCmd::Stats,
            Command::Style(style) => {
                let mut settings = app.settings().clone();
                settings.response_style = style;
                AppCmd::UpdateSettings(settings)
            }
            Command::Voice(voice) => {
                let mut settings = app.settings().clone();
                settings.voice = voice;
                AppCmd::UpdateSettings(settings)
            }
            Command::Instructions(text) => {
                let mut settings = app.settings().clone();
                settings.custom_instructions = text;
                AppCmd::UpdateSettings(settings)
            }
            Command::Reset => AppCmd::ResetSettings,
            Command::Stop => AppCmd::Stop,
            Command::Help => return Ok(Action::Print(HELP.to_string())),
            Command::Quit => return Ok(Action::Quit),
        };
        Ok(Action::App(cmd))
    }
}

/// Read commands from stdin and print app events until `/quit` or EOF.
pub async fn run(mut app: App, mut events: mpsc::UnboundedReceiver<AppEvent>) -> Result<()> {
    let mut shell = Shell::new(app.settings().show_timestamps);
    let mut stdout = io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    writeln!(stdout, "aura. Type /help for commands.")?;
    if let Some(tip) = app.take_tip() {
        writeln!(stdout, "{}", tip)?;
    }
    shell
        .view
        .render(&AppEvent::ConversationsChanged(app.conversations()), &mut stdout)?;

    loop {
        tokio::select! {
            Some(event) = events.recv() => shell.observe(&event, &mut stdout)?,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let command = match parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        writeln!(stdout, "{}", e)?;
                        continue;
                    }
                };
                match shell.interpret(command, &app).await {
                    Ok(Action::App(cmd)) => {
                        app.handle(cmd).await;
                        shell.view.show_timestamps = app.settings().show_timestamps;
                    }
                    Ok(Action::Print(text)) => writeln!(stdout, "{}", text)?,
                    Ok(Action::Quit) => break,
                    Err(e) => writeln!(stdout, "Error: {}", e)?,
                }
            }
        }
    }

    app.shutdown().await;
    while let Ok(event) = events.try_recv() {
        shell.observe(&event, &mut stdout)?;
    }
    Ok(())
}
