// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{fmt, sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the request-scoped correlation id between tiers.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub type UserId = i64;
pub type GameId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub name: String,
}

/// Returned by the directory when a game is linked to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGameDto {
    pub user_id: UserId,
    pub username: String,
    pub game_id: GameId,
    pub game_name: String,
    #[serde(default)]
    pub linked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Game names are matched case-insensitively everywhere in the system.
pub fn game_names_match(left: &str, right: &str) -> bool {
    left == right || left.to_lowercase() == right.to_lowercase()
}

/// Request-scoped identifier propagated from the gateway down to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuses an inbound header value when it is present and non-blank.
    pub fn from_header(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

pub fn parse_env_bool(var_name: &str, default: bool) -> bool {
    std::env::var(var_name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            if normalized.is_empty() {
                default
            } else {
                !matches!(normalized.as_str(), "0" | "false" | "no" | "off")
            }
        })
        .unwrap_or(default)
}

pub fn parse_env_millis(var_name: &str, default_ms: u64) -> Duration {
    let millis = std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default_ms)
        .max(1);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_names_match_ignores_case() {
        assert!(game_names_match("Hollow Knight", "hollow knight"));
        assert!(game_names_match("CS2", "cs2"));
        assert!(!game_names_match("Hades", "Hades II"));
    }

    #[test]
    fn correlation_id_reuses_non_blank_header() {
        let id = CorrelationId::from_header(Some("  req-42 "));
        assert_eq!(id.as_str(), "req-42");
    }

    #[test]
    fn correlation_id_generates_when_header_missing_or_blank() {
        let missing = CorrelationId::from_header(None);
        let blank = CorrelationId::from_header(Some("   "));
        assert!(Uuid::parse_str(missing.as_str()).is_ok());
        assert!(Uuid::parse_str(blank.as_str()).is_ok());
        assert_ne!(missing, blank);
    }

    #[test]
    fn user_game_dto_uses_camel_case_wire_names() {
        let raw = r#"{"userId":1,"username":"alice","gameId":7,"gameName":"Celeste"}"#;
        let dto: UserGameDto = serde_json::from_str(raw).unwrap();
        assert_eq!(dto.user_id, 1);
        assert_eq!(dto.game_name, "Celeste");
        assert!(dto.linked_at.is_none());
    }

    #[test]
    fn expand_env_vars_replaces_unset_with_empty() {
        let expanded = expand_env_vars("users: ${GAMECLIENT_COMMON_SURELY_UNSET_VAR}x");
        assert_eq!(expanded, "users: x");
    }

    #[test]
    fn parse_env_millis_falls_back_to_default() {
        let timeout = parse_env_millis("GAMECLIENT_COMMON_SURELY_UNSET_TIMEOUT", 250);
        assert_eq!(timeout, Duration::from_millis(250));
    }
}
