//! User preferences
//!
//! Settings are stored in clear. Theme, locale and assistant tone are
//! device-local display preferences and are reset to the defaults below
//! whenever a snapshot leaves the device in an archive.

use serde::{Deserialize, Serialize};

/// Default theme
pub const DEFAULT_THEME: &str = "system";

/// Default locale
pub const DEFAULT_LOCALE: &str = "en";

/// Default assistant tone
pub const DEFAULT_ASSISTANT_TONE: &str = "balanced";

/// Reminder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Reminders enabled
    pub enabled: bool,
    /// Daily reminder time ("HH:MM", local)
    pub reminder_time: Option<String>,
    /// Evening check-in enabled
    pub evening_check_in: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            reminder_time: None,
            evening_check_in: false,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// UI locale
    pub locale: String,
    /// Visual theme
    pub theme: String,
    /// Assistant tone
    #[serde(alias = "ally")]
    pub assistant_tone: String,
    /// Demo mode enabled
    pub demo_mode: bool,
    /// Onboarding tutorial finished
    pub tutorial_completed: bool,
    /// Reminder configuration
    pub notifications: NotificationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            theme: DEFAULT_THEME.to_string(),
            assistant_tone: DEFAULT_ASSISTANT_TONE.to_string(),
            demo_mode: false,
            tutorial_completed: false,
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    /// Copy with device-local preferences reset to defaults
    pub fn portable(&self) -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            theme: DEFAULT_THEME.to_string(),
            assistant_tone: DEFAULT_ASSISTANT_TONE.to_string(),
            ..self.clone()
        }
    }
}
