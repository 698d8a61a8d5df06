pub mod chat;
pub mod conversation;
pub mod database;
pub mod export;
pub mod markdown;
pub mod media;
pub mod settings;
pub mod stats;
pub mod store;
pub mod video;

pub use database::Database;
pub use settings::{SettingsService, UserSettings};
pub use store::LocalStore;
