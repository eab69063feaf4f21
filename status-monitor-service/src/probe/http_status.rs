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

//! JSON status endpoint probe.

use anyhow::Context;
use async_trait::async_trait;
use monitor_common::{DEFAULT_STATUS_API_MAX_PLAYERS, ProbeFailure, ServerConfig, ServerSnapshot};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;

use super::Probe;

const MAX_REDIRECTS: usize = 2;

/// Adapter for [`monitor_common::ServerKind::HttpStatusApi`] servers.
pub struct HttpStatusProbe {
    client: reqwest::Client,
}

impl HttpStatusProbe {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("failed to build status API client")?;
        Ok(Self { client })
    }
}

fn count_field(body: &Value, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .filter_map(|name| body.get(*name).and_then(Value::as_u64))
        .find(|value| *value > 0)
        .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
}

fn snapshot_from_status(server: &ServerConfig, body: &Value) -> Result<ServerSnapshot, ProbeFailure> {
    if !body.is_object() {
        return Err(ProbeFailure::UnexpectedSchema(
            "status body is not a JSON object".to_string(),
        ));
    }

    let online = body.get("online").and_then(Value::as_bool) == Some(true)
        || body.get("status").and_then(Value::as_str) == Some("online");
    let display_name = body
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&server.name)
        .to_string();

    Ok(ServerSnapshot {
        online,
        player_count: count_field(body, &["players", "onlineCount"]).unwrap_or(0),
        max_players: count_field(body, &["maxPlayers"])
            .or(server.display_max_players)
            .unwrap_or(DEFAULT_STATUS_API_MAX_PLAYERS),
        map_name: None,
        roster: Vec::new(),
        display_name,
        probe_error: None,
    })
}

#[async_trait]
impl Probe for HttpStatusProbe {
    async fn query(&self, server: &ServerConfig) -> Result<ServerSnapshot, ProbeFailure> {
        let url = server
            .status_url
            .as_deref()
            .ok_or_else(|| ProbeFailure::UnexpectedSchema("no status_url configured".to_string()))?;
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| ProbeFailure::Connect(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Connect(format!(
                "status endpoint returned {status}"
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|error| ProbeFailure::Malformed(error.to_string()))?;
        snapshot_from_status(server, &body)
    }
}
