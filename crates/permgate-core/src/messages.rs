//! User-facing denial messages.
//!
//! These are shown to the connecting subject and are kept apart from the
//! operator log lines, which carry the technical detail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    LoadingDatabaseError,
    LoadingStateError,
    LoadingSetupError,
    ReallowedAfterDeny,
}

impl MessageKey {
    pub const ALL: [MessageKey; 4] = [
        Self::LoadingDatabaseError,
        Self::LoadingStateError,
        Self::LoadingSetupError,
        Self::ReallowedAfterDeny,
    ];

    pub fn default_text(self) -> &'static str {
        match self {
            Self::LoadingDatabaseError => {
                "Permissions data could not be loaded. Please try again later."
            }
            Self::LoadingStateError => {
                "Permissions data was not pre-loaded for this connection. Please reconnect."
            }
            Self::LoadingSetupError => {
                "Permissions could not be set up for this session. Please reconnect."
            }
            Self::ReallowedAfterDeny => {
                "Connection refused: permissions data is unavailable. Please try again later."
            }
        }
    }
}

pub trait Locale: Send + Sync {
    fn render(&self, key: MessageKey) -> String;
}

/// English defaults with per-key overrides.
#[derive(Debug, Clone, Default)]
pub struct DefaultLocale {
    overrides: HashMap<MessageKey, String>,
}

impl DefaultLocale {
    pub fn new(overrides: HashMap<MessageKey, String>) -> Self {
        Self { overrides }
    }
}

impl Locale for DefaultLocale {
    fn render(&self, key: MessageKey) -> String {
        self.overrides
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_text().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_replaces_default() {
        let locale = DefaultLocale::new(
            [(MessageKey::LoadingStateError, "try again".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(locale.render(MessageKey::LoadingStateError), "try again");
        assert_eq!(
            locale.render(MessageKey::LoadingDatabaseError),
            MessageKey::LoadingDatabaseError.default_text()
        );
    }

    #[test]
    fn test_keys_parse_from_yaml() {
        let map: HashMap<MessageKey, String> =
            serde_yaml::from_str("loading_setup_error: nope").unwrap();
        assert_eq!(map[&MessageKey::LoadingSetupError], "nope");
    }
}
