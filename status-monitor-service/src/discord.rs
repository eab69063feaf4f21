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

use std::{collections::HashSet, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use monitor_common::{
    MonitorConfig, ServerConfig, TEXT_CHANNEL_KEY,
    render::{LinkButton, RichContent},
    voice_channel_key,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    identity::IdentityStore,
    platform::{ChatPlatform, PlatformError, RemoteMessage},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);
const MESSAGE_SCAN_LIMIT: u32 = 50;

const GUILD_TEXT: u8 = 0;
const GUILD_VOICE: u8 = 2;
const GUILD_CATEGORY: u8 = 4;

const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const CONNECT: u64 = 1 << 20;
const SPEAK: u64 = 1 << 21;

const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;

#[derive(Debug, Clone, Deserialize)]
struct Channel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, Deserialize)]
struct PermissionOverwrite {
    id: String,
    #[serde(default)]
    allow: String,
    #[serde(default)]
    deny: String,
}

impl PermissionOverwrite {
    fn bits(raw: &str) -> u64 {
        raw.parse().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    author: Author,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// [`ChatPlatform`] backed by the Discord REST API. Label containers are
/// voice channels under the monitoring category; status messages are embeds
/// in a read-only text channel.
pub struct DiscordPlatform {
    client: reqwest::Client,
    base_url: String,
    token: String,
    guild_id: String,
    bot_user_id: String,
    category_id: Option<String>,
}

impl DiscordPlatform {
    /// Authenticate and resolve the bot's own user id.
    pub async fn connect(base_url: &str, token: &str, guild_id: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Discord HTTP client")?;
        let mut platform = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            guild_id: guild_id.to_string(),
            bot_user_id: String::new(),
            category_id: None,
        };

        let me: CurrentUser = platform
            .fetch_json(platform.get("/users/@me"))
            .await
            .context("failed to authenticate with Discord")?;
        info!(user_id = %me.id, username = %me.username, "connected to Discord");
        platform.bot_user_id = me.id;
        Ok(platform)
    }

    /// Ensure the monitoring category and the status text channel exist and
    /// adopt pre-existing voice channels for configured servers.
    ///
    /// Returns the id of the text channel status messages are posted to.
    pub async fn bootstrap(
        &mut self,
        config: &MonitorConfig,
        servers: &[ServerConfig],
        store: &mut IdentityStore,
    ) -> anyhow::Result<String> {
        let channels: Vec<Channel> = self
            .fetch_json(self.get(&format!("/guilds/{}/channels", self.guild_id)))
            .await
            .context("failed to list guild channels")?;

        let category_id = match channels.iter().find(|channel| {
            channel.kind == GUILD_CATEGORY && channel.name.as_deref() == Some(config.category_name.as_str())
        }) {
            Some(category) => category.id.clone(),
            None => {
                info!(name = %config.category_name, "creating monitoring category");
                self.create_channel(json!({
                    "name": config.category_name,
                    "type": GUILD_CATEGORY,
                }))
                .await
                .context("failed to create monitoring category")?
            }
        };
        self.category_id = Some(category_id.clone());

        let bindings: Vec<(&str, Option<String>)> = servers
            .iter()
            .map(|server| {
                let stored = store.lookup(&voice_channel_key(&server.name));
                (server.name.as_str(), stored.map(str::to_string))
            })
            .collect();
        for (name, adopted) in plan_voice_adoption(&channels, &category_id, &bindings) {
            let key = voice_channel_key(name);
            match adopted {
                Some(channel_id) => {
                    info!(server = %name, channel_id = %channel_id, "adopting voice channel");
                    store.remember(&key, &channel_id);
                }
                None => {
                    if let Some(stale) = store.forget(&key) {
                        info!(server = %name, channel_id = %stale, "dropping stale voice channel binding");
                    }
                }
            }
        }

        let stored_text = store
            .lookup(TEXT_CHANNEL_KEY)
            .filter(|id| channels.iter().any(|channel| channel.id == *id))
            .map(str::to_string);
        let text_channel_id = match stored_text {
            Some(id) => id,
            None => match channels.iter().find(|channel| {
                channel.kind == GUILD_TEXT
                    && channel.name.as_deref() == Some(config.text_channel_name.as_str())
            }) {
                Some(channel) => channel.id.clone(),
                None => {
                    info!(name = %config.text_channel_name, "creating status text channel");
                    self.create_channel(json!({
                        "name": config.text_channel_name,
                        "type": GUILD_TEXT,
                        "parent_id": category_id,
                        "permission_overwrites": [
                            {
                                "id": self.guild_id,
                                "type": OVERWRITE_ROLE,
                                "allow": VIEW_CHANNEL.to_string(),
                                "deny": SEND_MESSAGES.to_string(),
                            },
                            {
                                "id": self.bot_user_id,
                                "type": OVERWRITE_MEMBER,
                                "allow": (VIEW_CHANNEL | SEND_MESSAGES).to_string(),
                                "deny": "0",
                            },
                        ],
                    }))
                    .await
                    .context("failed to create status text channel")?
                }
            },
        };
        store.remember(TEXT_CHANNEL_KEY, &text_channel_id);
        Ok(text_channel_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Bot {}", self.token))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.patch(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.put(self.url(path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.delete(self.url(path)))
    }

    /// Send a request, waiting out one rate-limit response before giving up.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let retry = request.try_clone();
        match send_checked(request).await {
            Err(PlatformError::RateLimited { retry_after }) if retry.is_some() => {
                let wait = retry_after.min(MAX_RATE_LIMIT_WAIT);
                debug!(wait_millis = wait.as_millis() as u64, "rate limited by Discord; retrying");
                tokio::time::sleep(wait).await;
                match retry {
                    Some(retry) => send_checked(retry).await,
                    None => Err(PlatformError::RateLimited { retry_after }),
                }
            }
            other => other,
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|error| PlatformError::Transient(format!("invalid Discord response: {error}")))
    }

    async fn create_channel(&self, payload: Value) -> Result<String, PlatformError> {
        let created: Created = self
            .fetch_json(
                self.post(&format!("/guilds/{}/channels", self.guild_id))
                    .json(&payload),
            )
            .await?;
        Ok(created.id)
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel, PlatformError> {
        self.fetch_json(self.get(&format!("/channels/{channel_id}")))
            .await
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn own_author_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn current_label(&self, container_id: &str) -> Result<String, PlatformError> {
        Ok(self.channel(container_id).await?.name.unwrap_or_default())
    }

    async fn rename_label(&self, container_id: &str, label: &str) -> Result<(), PlatformError> {
        self.execute(
            self.patch(&format!("/channels/{container_id}"))
                .json(&json!({ "name": label })),
        )
        .await?;
        Ok(())
    }

    async fn create_label_container(&self, label: &str) -> Result<String, PlatformError> {
        let mut payload = json!({
            "name": label,
            "type": GUILD_VOICE,
            "permission_overwrites": [{
                "id": self.guild_id,
                "type": OVERWRITE_ROLE,
                "allow": "0",
                "deny": (VIEW_CHANNEL | CONNECT).to_string(),
            }],
        });
        if let Some(category_id) = &self.category_id {
            payload["parent_id"] = json!(category_id);
        }
        self.create_channel(payload).await
    }

    async fn reveal_label(&self, container_id: &str) -> Result<bool, PlatformError> {
        let channel = self.channel(container_id).await?;
        if is_revealed(&channel, &self.guild_id) {
            return Ok(false);
        }
        self.execute(
            self.put(&format!(
                "/channels/{container_id}/permissions/{}",
                self.guild_id
            ))
            .json(&json!({
                "type": OVERWRITE_ROLE,
                "allow": (VIEW_CHANNEL | CONNECT).to_string(),
                "deny": SPEAK.to_string(),
            })),
        )
        .await?;
        Ok(true)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &RichContent,
    ) -> Result<String, PlatformError> {
        let created: Created = self
            .fetch_json(
                self.post(&format!("/channels/{channel_id}/messages"))
                    .json(&message_payload(content)),
            )
            .await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &RichContent,
    ) -> Result<(), PlatformError> {
        self.execute(
            self.patch(&format!("/channels/{channel_id}/messages/{message_id}"))
                .json(&message_payload(content)),
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, channel_id: &str) -> Result<Vec<RemoteMessage>, PlatformError> {
        let messages: Vec<Message> = self
            .fetch_json(self.get(&format!(
                "/channels/{channel_id}/messages?limit={MESSAGE_SCAN_LIMIT}"
            )))
            .await?;
        Ok(messages
            .into_iter()
            .map(|message| RemoteMessage {
                id: message.id,
                author_id: message.author.id,
            })
            .collect())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        self.execute(self.delete(&format!("/channels/{channel_id}/messages/{message_id}")))
            .await?;
        Ok(())
    }
}

async fn send_checked(request: RequestBuilder) -> Result<Response, PlatformError> {
    let response = request
        .send()
        .await
        .map_err(|error| PlatformError::Transient(format!("Discord request failed: {error}")))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "".to_string());
    let error = classify(status, &body);
    if !error.is_missing() {
        warn!(status = %status, body = %body, "Discord request rejected");
    }
    Err(error)
}

fn classify(status: StatusCode, body: &str) -> PlatformError {
    match status {
        StatusCode::NOT_FOUND => PlatformError::ResourceMissing(body.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|value| value.get("retry_after").and_then(Value::as_f64))
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .unwrap_or(1.0);
            PlatformError::RateLimited {
                retry_after: Duration::from_secs_f64(retry_after),
            }
        }
        _ => PlatformError::Transient(format!("Discord returned {status}: {body}")),
    }
}

/// Whether `channel_name` is a label for exactly `server_name`, as in
/// `🟢 Metrostroi #1 (3/20)`, rather than one that merely contains it.
fn names_server_exactly(channel_name: &str, server_name: &str) -> bool {
    channel_name == server_name
        || channel_name.contains(&format!(" {server_name} ("))
        || channel_name.ends_with(&format!(" {server_name}"))
}

/// Unclaimed voice channel whose name mentions the server, preferring ones
/// already in the monitoring category.
fn adoptable_voice_channel<'a>(
    channels: &'a [Channel],
    category_id: &str,
    server_name: &str,
    taken: &HashSet<String>,
    exact_only: bool,
) -> Option<&'a Channel> {
    channels
        .iter()
        .filter(|channel| channel.kind == GUILD_VOICE && !taken.contains(&channel.id))
        .filter(|channel| {
            channel.name.as_deref().is_some_and(|name| {
                name.contains(server_name)
                    && (!exact_only || names_server_exactly(name, server_name))
            })
        })
        .min_by_key(|channel| channel.parent_id.as_deref() != Some(category_id))
}

/// Decide voice channel bindings for servers whose stored binding is absent,
/// stale, or shared with another server. Each channel is bound to at most one
/// server; exact label matches are placed before substring matches.
///
/// Returns `(server name, adopted channel id)` for every such server, with
/// `None` when nothing could be adopted.
fn plan_voice_adoption<'a>(
    channels: &[Channel],
    category_id: &str,
    bindings: &[(&'a str, Option<String>)],
) -> Vec<(&'a str, Option<String>)> {
    let mut taken = HashSet::new();
    let mut pending = Vec::new();
    for (name, stored) in bindings {
        let kept = stored.as_ref().is_some_and(|id| {
            channels.iter().any(|channel| &channel.id == id) && taken.insert(id.clone())
        });
        if !kept {
            pending.push((*name, None));
        }
    }

    for exact_only in [true, false] {
        for (name, adopted) in pending.iter_mut().filter(|(_, adopted)| adopted.is_none()) {
            if let Some(channel) =
                adoptable_voice_channel(channels, category_id, name, &taken, exact_only)
            {
                taken.insert(channel.id.clone());
                *adopted = Some(channel.id.clone());
            }
        }
    }
    pending
}

fn is_revealed(channel: &Channel, everyone_role_id: &str) -> bool {
    channel
        .permission_overwrites
        .iter()
        .find(|overwrite| overwrite.id == everyone_role_id)
        .is_some_and(|overwrite| {
            let allow = PermissionOverwrite::bits(&overwrite.allow);
            let deny = PermissionOverwrite::bits(&overwrite.deny);
            allow & (VIEW_CHANNEL | CONNECT) == VIEW_CHANNEL | CONNECT && deny & SPEAK == SPEAK
        })
}

fn is_web_link(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn button_components(button: Option<&LinkButton>) -> Value {
    match button.filter(|button| is_web_link(&button.url)) {
        Some(button) => json!([{
            "type": 1,
            "components": [{
                "type": 2,
                "style": 5,
                "label": button.label,
                "url": button.url,
            }],
        }]),
        None => json!([]),
    }
}

fn message_payload(content: &RichContent) -> Value {
    let mut embed = json!({
        "title": content.title,
        "color": content.color,
        "fields": content
            .fields
            .iter()
            .map(|field| json!({
                "name": field.name,
                "value": field.value,
                "inline": field.inline,
            }))
            .collect::<Vec<_>>(),
    });
    if let Some(description) = &content.description {
        embed["description"] = json!(description);
    }
    if let Some(url) = &content.url {
        embed["url"] = json!(url);
    }
    if let Some(thumbnail_url) = &content.thumbnail_url {
        embed["thumbnail"] = json!({ "url": thumbnail_url });
    }
    if let Some(footer) = &content.footer {
        embed["footer"] = json!({ "text": footer });
    }
    if content.timestamped {
        embed["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
    }

    json!({
        "embeds": [embed],
        "components": button_components(content.link_button.as_ref()),
    })
}
