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

pub mod render;

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_UPDATE_INTERVAL_SECONDS: u64 = 60;
pub const MIN_UPDATE_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_SERVER_PACING_MILLIS: u64 = 1000;
pub const DEFAULT_DISPLAY_MAX_PLAYERS: u32 = 20;
pub const DEFAULT_STATUS_API_MAX_PLAYERS: u32 = 30;
pub const DEFAULT_CATEGORY_NAME: &str = "📶│MONITORING";
pub const DEFAULT_TEXT_CHANNEL_NAME: &str = "🛰️ server-status";

/// Logical key of the static project info message.
pub const PROJECT_INFO_KEY: &str = "project_info_message";
/// Logical key of the status text channel.
pub const TEXT_CHANNEL_KEY: &str = "textChannelId";
const VOICE_CHANNEL_KEY_PREFIX: &str = "voice:";

/// Logical key of the voice channel whose name carries a server's status label.
pub fn voice_channel_key(server_name: &str) -> String {
    format!("{VOICE_CHANNEL_KEY_PREFIX}{server_name}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    #[serde(alias = "garrysmod", alias = "source")]
    ProcessQuery,
    #[serde(alias = "scp")]
    HttpStatusApi,
    #[serde(alias = "minecraft")]
    GameQuery,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessQuery => "process_query",
            Self::HttpStatusApi => "http_status_api",
            Self::GameQuery => "game_query",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    #[serde(alias = "type")]
    pub kind: ServerKind,
    #[serde(alias = "ip")]
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "connect")]
    pub connect_url: Option<String>,
    #[serde(default, alias = "maxplayers")]
    pub display_max_players: Option<u32>,
    /// JSON endpoint polled by the `http_status_api` probe.
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Thumbnail URL template; `{map}` is replaced with the current map name.
    #[serde(default)]
    pub map_thumbnail_url: Option<String>,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fallback_max_players(&self) -> u32 {
        self.display_max_players
            .unwrap_or(DEFAULT_DISPLAY_MAX_PLAYERS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    #[error("probe timed out after {0} ms")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unexpected response schema: {0}")]
    UnexpectedSchema(String),
}

impl ProbeFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Malformed(_) => "malformed",
            Self::UnexpectedSchema(_) => "unexpected_schema",
        }
    }
}

/// Normalized point-in-time status of one monitored server.
///
/// When `online` is false the numeric fields and the roster are not trusted
/// and must never be rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub online: bool,
    pub player_count: u32,
    pub max_players: u32,
    pub map_name: Option<String>,
    pub roster: Vec<String>,
    pub display_name: String,
    pub probe_error: Option<ProbeFailure>,
}

impl ServerSnapshot {
    pub fn offline(server: &ServerConfig, failure: Option<ProbeFailure>) -> Self {
        Self {
            online: false,
            player_count: 0,
            max_players: server.fallback_max_players(),
            map_name: None,
            roster: Vec::new(),
            display_name: server.name.clone(),
            probe_error: failure,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeTuning {
    pub timeout_millis: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    pub process_query: ProbeTuning,
    pub http_status_api: ProbeTuning,
    pub game_query: ProbeTuning,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            process_query: ProbeTuning {
                timeout_millis: 5_000,
                attempts: 2,
            },
            http_status_api: ProbeTuning {
                timeout_millis: 5_000,
                attempts: 2,
            },
            game_query: ProbeTuning {
                timeout_millis: 5_000,
                attempts: 2,
            },
        }
    }
}

impl ProbeSettings {
    pub fn for_kind(&self, kind: ServerKind) -> ProbeTuning {
        match kind {
            ServerKind::ProcessQuery => self.process_query,
            ServerKind::HttpStatusApi => self.http_status_api,
            ServerKind::GameQuery => self.game_query,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub color: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub display_order: Vec<String>,
    #[serde(default = "default_update_interval_seconds")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_server_pacing_millis")]
    pub server_pacing_millis: u64,
    #[serde(default = "default_category_name")]
    pub category_name: String,
    #[serde(default = "default_text_channel_name")]
    pub text_channel_name: String,
    #[serde(default)]
    pub project_info: Option<ProjectInfo>,
    #[serde(default)]
    pub probe: ProbeSettings,
}

fn default_update_interval_seconds() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECONDS
}

fn default_server_pacing_millis() -> u64 {
    DEFAULT_SERVER_PACING_MILLIS
}

fn default_category_name() -> String {
    DEFAULT_CATEGORY_NAME.to_string()
}

fn default_text_channel_name() -> String {
    DEFAULT_TEXT_CHANNEL_NAME.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse monitor config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("server name {0:?} is configured more than once")]
    DuplicateServer(String),
    #[error("server {name:?} of kind {kind} requires `{field}`")]
    MissingField {
        name: String,
        kind: &'static str,
        field: &'static str,
    },
    #[error("server name must not be empty")]
    EmptyName,
    #[error("no valid servers found in configuration")]
    NoServers,
}

/// Servers in display order, plus the ordered names that had no matching entry.
#[derive(Debug, Clone)]
pub struct OrderedServers {
    pub servers: Vec<ServerConfig>,
    pub missing: Vec<String>,
}

impl MonitorConfig {
    /// Parse a YAML (or JSON) monitor config after `${VAR}` expansion.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(raw);
        let mut config: Self = serde_yaml::from_str(&expanded)?;
        config.update_interval_seconds = config
            .update_interval_seconds
            .max(MIN_UPDATE_INTERVAL_SECONDS);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
            if server.kind == ServerKind::HttpStatusApi
                && server
                    .status_url
                    .as_deref()
                    .is_none_or(|url| url.trim().is_empty())
            {
                return Err(ConfigError::MissingField {
                    name: server.name.clone(),
                    kind: server.kind.as_str(),
                    field: "status_url",
                });
            }
        }
        Ok(())
    }

    /// Resolve `display_order` against the configured servers.
    ///
    /// An empty order keeps file order. Names that repeat are kept once.
    pub fn ordered_servers(&self) -> Result<OrderedServers, ConfigError> {
        if self.display_order.is_empty() {
            if self.servers.is_empty() {
                return Err(ConfigError::NoServers);
            }
            return Ok(OrderedServers {
                servers: self.servers.clone(),
                missing: Vec::new(),
            });
        }

        let mut placed = HashSet::new();
        let mut servers = Vec::with_capacity(self.display_order.len());
        let mut missing = Vec::new();
        for name in &self.display_order {
            if !placed.insert(name.as_str()) {
                continue;
            }
            match self.servers.iter().find(|server| &server.name == name) {
                Some(server) => servers.push(server.clone()),
                None => missing.push(name.clone()),
            }
        }

        if servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        Ok(OrderedServers { servers, missing })
    }
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}
