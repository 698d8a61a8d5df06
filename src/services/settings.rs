use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::store::{LocalStore, SETTINGS_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub custom_instructions: String,
    pub response_style: ResponseStyle,
    pub voice: Voice,
    pub show_timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Concise,
    Balanced,
    Detailed,
    Creative,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Concise => "concise",
            ResponseStyle::Balanced => "balanced",
            ResponseStyle::Detailed => "detailed",
            ResponseStyle::Creative => "creative",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "concise" => Some(ResponseStyle::Concise),
            "balanced" => Some(ResponseStyle::Balanced),
            "detailed" => Some(ResponseStyle::Detailed),
            "creative" => Some(ResponseStyle::Creative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Heart,
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Heart => "heart",
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "heart" => Some(Voice::Heart),
            "alloy" => Some(Voice::Alloy),
            "echo" => Some(Voice::Echo),
            "fable" => Some(Voice::Fable),
            "onyx" => Some(Voice::Onyx),
            "nova" => Some(Voice::Nova),
            "shimmer" => Some(Voice::Shimmer),
            _ => None,
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            custom_instructions: String::new(),
            response_style: ResponseStyle::Balanced,
            voice: Voice::Heart,
            show_timestamps: true,
        }
    }
}

impl UserSettings {
    /// Custom instructions as sent to the chat function; blank means none.
    pub fn instructions(&self) -> Option<String> {
        let trimmed = self.custom_instructions.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

pub struct SettingsService;

impl SettingsService {
    /// Missing or unreadable settings fall back to defaults; unknown or
    /// missing fields are filled from the defaults.
    pub fn load(store: &LocalStore) -> UserSettings {
        match store.database().get(SETTINGS_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unparsable settings: {}", e);
                UserSettings::default()
            }),
            Ok(None) => UserSettings::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings: {}", e);
                UserSettings::default()
            }
        }
    }

    pub fn save(store: &LocalStore, settings: &UserSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        store.database().set(SETTINGS_KEY, &json)
    }

    pub fn reset(store: &LocalStore) -> Result<UserSettings> {
        store.database().remove(SETTINGS_KEY)?;
        Ok(UserSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::Database;

    fn store() -> LocalStore {
        LocalStore::new(Database::new_in_memory().unwrap())
    }

    #[test]
    fn test_defaults_when_absent() {
        assert_eq!(SettingsService::load(&store()), UserSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let store = store();
        let settings = UserSettings {
            custom_instructions: "Answer in French".to_string(),
            response_style: ResponseStyle::Concise,
            voice: Voice::Nova,
            ..UserSettings::default()
        };
        SettingsService::save(&store, &settings).unwrap();
        assert_eq!(SettingsService::load(&store), settings);

        assert_eq!(SettingsService::reset(&store).unwrap(), UserSettings::default());
        assert_eq!(SettingsService::load(&store), UserSettings::default());
    }

    #[test]
    fn test_partial_settings_merge_over_defaults() {
        let store = store();
        store
            .database()
            .set(SETTINGS_KEY, r#"{"responseStyle":"detailed","textSize":"small-x4"}"#)
            .unwrap();
        let settings = SettingsService::load(&store);
        assert_eq!(settings.response_style, ResponseStyle::Detailed);
        assert_eq!(settings.voice, Voice::Heart);
    }

    #[test]
    fn test_garbage_settings_fall_back() {
        let store = store();
        store.database().set(SETTINGS_KEY, "][").unwrap();
        assert_eq!(SettingsService::load(&store), UserSettings::default());
    }

    #[test]
    fn test_blank_instructions_are_omitted() {
        let mut settings = UserSettings::default();
        assert_eq!(settings.instructions(), None);
        settings.custom_instructions = "  be brief ".to_string();
        assert_eq!(settings.instructions().as_deref(), Some("be brief"));
    }
}
