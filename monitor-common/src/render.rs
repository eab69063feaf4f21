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

//! Desired external representation of a server snapshot.
//!
//! Everything here is a pure function of `(ServerConfig, ServerSnapshot)`.
//! Platform limits and markup belong to the publisher, not to this module.

use serde::{Deserialize, Serialize};

use crate::{ProjectInfo, ServerConfig, ServerKind, ServerSnapshot};

pub const ONLINE_GLYPH: &str = "🟢";
pub const OFFLINE_GLYPH: &str = "🔴";
pub const ONLINE_COLOR: u32 = 0x43B581;
pub const OFFLINE_COLOR: u32 = 0xF04747;
pub const PROJECT_INFO_COLOR: u32 = 0x5865F2;
pub const ROSTER_DISPLAY_LIMIT: usize = 20;

const SEPARATOR_LINE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const UNKNOWN_PLAYER: &str = "Unknown player";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// Structured, multi-field content of a rich resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RichContent {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: u32,
    pub fields: Vec<ContentField>,
    pub thumbnail_url: Option<String>,
    pub footer: Option<String>,
    pub link_button: Option<LinkButton>,
    pub timestamped: bool,
}

pub fn status_glyph(online: bool) -> &'static str {
    if online { ONLINE_GLYPH } else { OFFLINE_GLYPH }
}

/// `n/max` for an online snapshot, `None` when the numbers are not trusted.
pub fn players_label(snapshot: &ServerSnapshot) -> Option<String> {
    snapshot
        .online
        .then(|| format!("{}/{}", snapshot.player_count, snapshot.max_players))
}

/// Unclipped label such as `🟢 Metrostroi #1 (12/40)` or `🔴 AlcoMine (Offline)`.
pub fn status_label(snapshot: &ServerSnapshot) -> String {
    let players = players_label(snapshot).unwrap_or_else(|| "Offline".to_string());
    format!(
        "{} {} ({})",
        status_glyph(snapshot.online),
        snapshot.display_name,
        players
    )
}

fn field(name: &str, value: impl Into<String>, inline: bool) -> ContentField {
    ContentField {
        name: name.to_string(),
        value: value.into(),
        inline,
    }
}

fn common_fields(server: &ServerConfig, snapshot: &ServerSnapshot, offline_status: &str) -> Vec<ContentField> {
    vec![
        field("🌐 Address", format!("`{}`", server.address()), true),
        field(
            "🔹 Status",
            if snapshot.online { "Online" } else { offline_status },
            true,
        ),
        field(
            "👥 Players",
            players_label(snapshot).unwrap_or_else(|| "-".to_string()),
            true,
        ),
    ]
}

/// Numbered roster capped at [`ROSTER_DISPLAY_LIMIT`] with an overflow line.
pub fn roster_text(roster: &[String]) -> String {
    if roster.is_empty() {
        return "No players online".to_string();
    }

    let mut lines: Vec<String> = roster
        .iter()
        .take(ROSTER_DISPLAY_LIMIT)
        .enumerate()
        .map(|(idx, name)| {
            let name = name.trim();
            let name = if name.is_empty() { UNKNOWN_PLAYER } else { name };
            format!("{}. {}", idx + 1, name)
        })
        .collect();
    if roster.len() > ROSTER_DISPLAY_LIMIT {
        lines.push(format!(
            "...and {} more",
            roster.len() - ROSTER_DISPLAY_LIMIT
        ));
    }
    lines.join("\n")
}

fn process_query_fields(server: &ServerConfig, snapshot: &ServerSnapshot) -> Vec<ContentField> {
    let mut fields = common_fields(server, snapshot, "Offline / map change");
    let map = snapshot
        .map_name
        .as_deref()
        .filter(|map| snapshot.online && !map.trim().is_empty())
        .unwrap_or("Unknown");
    fields.push(field("🗺️ Map", map, false));
    let roster = if snapshot.online {
        roster_text(&snapshot.roster)
    } else {
        roster_text(&[])
    };
    fields.push(field("📋 Player list", roster, false));
    fields
}

fn map_thumbnail(server: &ServerConfig, snapshot: &ServerSnapshot) -> Option<String> {
    if !snapshot.online {
        return None;
    }
    let template = server.map_thumbnail_url.as_deref()?;
    let map = snapshot
        .map_name
        .as_deref()
        .map(str::trim)
        .filter(|map| !map.is_empty() && *map != "Unknown")?;
    Some(template.replace("{map}", &map.replace(' ', "_")))
}

/// Kind-specific rich content for one server.
pub fn rich_content(server: &ServerConfig, snapshot: &ServerSnapshot) -> RichContent {
    let (default_description, fields, thumbnail_url) = match server.kind {
        ServerKind::ProcessQuery => (
            Some(SEPARATOR_LINE),
            process_query_fields(server, snapshot),
            map_thumbnail(server, snapshot),
        ),
        ServerKind::HttpStatusApi | ServerKind::GameQuery => {
            (None, common_fields(server, snapshot, "Offline"), None)
        }
    };

    RichContent {
        title: format!(
            "{} {}",
            status_glyph(snapshot.online),
            snapshot.display_name
        ),
        description: server
            .description
            .clone()
            .or_else(|| default_description.map(str::to_string)),
        url: None,
        color: if snapshot.online { ONLINE_COLOR } else { OFFLINE_COLOR },
        fields,
        thumbnail_url,
        footer: None,
        link_button: server.connect_url.as_ref().map(|url| LinkButton {
            label: "Connect".to_string(),
            url: url.clone(),
        }),
        timestamped: true,
    }
}

pub fn project_info_content(info: &ProjectInfo) -> RichContent {
    RichContent {
        title: info.title.clone(),
        description: info.description.clone(),
        url: info.url.clone(),
        color: info.color.unwrap_or(PROJECT_INFO_COLOR),
        fields: Vec::new(),
        thumbnail_url: info.thumbnail_url.clone(),
        footer: info.footer.clone(),
        link_button: None,
        timestamped: false,
    }
}
