pub mod conversation;
pub mod message;

pub use conversation::{Conversation, DEFAULT_TITLE};
pub use message::{Message, Role};
