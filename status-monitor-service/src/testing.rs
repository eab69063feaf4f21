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

//! In-memory platform and probe doubles shared by the unit tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use monitor_common::{
    ProbeFailure, ServerConfig, ServerKind, ServerSnapshot, render::RichContent,
};
use tokio::sync::Notify;

use crate::{
    platform::{ChatPlatform, DEFAULT_MAX_LABEL_LEN, PlatformError, RemoteMessage},
    probe::Probe,
};

pub const BOT_AUTHOR_ID: &str = "bot-user";

#[derive(Debug, Clone)]
struct FakeMessage {
    channel_id: String,
    author_id: String,
    title: String,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    labels: HashMap<String, String>,
    hidden: HashSet<String>,
    messages: BTreeMap<String, FakeMessage>,
    calls: Vec<(String, String)>,
    deleted: Vec<String>,
    failing_edits: HashSet<String>,
    failing_deletes: HashSet<String>,
    failing_send_titles: Vec<String>,
}

impl FakeState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    fn record(&self, kind: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push((kind.to_string(), id.to_string()));
    }

    pub fn add_label(&self, label: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate("v");
        state.labels.insert(id.clone(), label.to_string());
        id
    }

    pub fn label(&self, container_id: &str) -> Option<String> {
        self.state.lock().unwrap().labels.get(container_id).cloned()
    }

    /// Change a label without going through the platform API.
    pub fn rename_by_hand(&self, container_id: &str, label: &str) {
        self.state
            .lock()
            .unwrap()
            .labels
            .insert(container_id.to_string(), label.to_string());
    }

    pub fn remove_label(&self, container_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.labels.remove(container_id);
        state.hidden.remove(container_id);
    }

    pub fn is_hidden(&self, container_id: &str) -> bool {
        self.state.lock().unwrap().hidden.contains(container_id)
    }

    pub fn insert_message(&self, channel_id: &str, author_id: &str, title: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate("m");
        state.messages.insert(
            id.clone(),
            FakeMessage {
                channel_id: channel_id.to_string(),
                author_id: author_id.to_string(),
                title: title.to_string(),
            },
        );
        id
    }

    pub fn has_message(&self, message_id: &str) -> bool {
        self.state.lock().unwrap().messages.contains_key(message_id)
    }

    pub fn message_title(&self, message_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(message_id)
            .map(|message| message.title.clone())
    }

    pub fn message_titles(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .values()
            .map(|message| message.title.clone())
            .collect()
    }

    pub fn count_calls(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(call, _)| call == kind)
            .count()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn fail_edits_of(&self, message_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_edits
            .insert(message_id.to_string());
    }

    pub fn fail_deletes_of(&self, message_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(message_id.to_string());
    }

    pub fn fail_sends_titled(&self, fragment: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_send_titles
            .push(fragment.to_string());
    }

    pub fn remove_message(&self, message_id: &str) {
        self.state.lock().unwrap().messages.remove(message_id);
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    fn own_author_id(&self) -> &str {
        BOT_AUTHOR_ID
    }

    fn max_label_len(&self) -> usize {
        DEFAULT_MAX_LABEL_LEN
    }

    async fn current_label(&self, container_id: &str) -> Result<String, PlatformError> {
        self.record("current_label", container_id);
        self.label(container_id)
            .ok_or_else(|| PlatformError::ResourceMissing(container_id.to_string()))
    }

    async fn rename_label(&self, container_id: &str, label: &str) -> Result<(), PlatformError> {
        self.record("rename", container_id);
        let mut state = self.state.lock().unwrap();
        match state.labels.get_mut(container_id) {
            Some(current) => {
                *current = label.to_string();
                Ok(())
            }
            None => Err(PlatformError::ResourceMissing(container_id.to_string())),
        }
    }

    async fn create_label_container(&self, label: &str) -> Result<String, PlatformError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.allocate("v");
            state.labels.insert(id.clone(), label.to_string());
            state.hidden.insert(id.clone());
            id
        };
        self.record("create_label", &id);
        Ok(id)
    }

    async fn reveal_label(&self, container_id: &str) -> Result<bool, PlatformError> {
        self.record("reveal", container_id);
        let mut state = self.state.lock().unwrap();
        if !state.labels.contains_key(container_id) {
            return Err(PlatformError::ResourceMissing(container_id.to_string()));
        }
        Ok(state.hidden.remove(container_id))
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &RichContent,
    ) -> Result<String, PlatformError> {
        self.record("send", channel_id);
        let failing = self
            .state
            .lock()
            .unwrap()
            .failing_send_titles
            .iter()
            .any(|fragment| content.title.contains(fragment.as_str()));
        if failing {
            return Err(PlatformError::Transient("send rejected".to_string()));
        }
        Ok(self.insert_message(channel_id, BOT_AUTHOR_ID, &content.title))
    }

    async fn edit_message(
        &self,
        _channel_id: &str,
        message_id: &str,
        content: &RichContent,
    ) -> Result<(), PlatformError> {
        self.record("edit", message_id);
        let mut state = self.state.lock().unwrap();
        if state.failing_edits.contains(message_id) {
            return Err(PlatformError::Transient("edit rejected".to_string()));
        }
        match state.messages.get_mut(message_id) {
            Some(message) => {
                message.title = content.title.clone();
                Ok(())
            }
            None => Err(PlatformError::ResourceMissing(message_id.to_string())),
        }
    }

    async fn list_messages(&self, channel_id: &str) -> Result<Vec<RemoteMessage>, PlatformError> {
        self.record("list", channel_id);
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|(_, message)| message.channel_id == channel_id)
            .map(|(id, message)| RemoteMessage {
                id: id.clone(),
                author_id: message.author_id.clone(),
            })
            .collect())
    }

    async fn delete_message(
        &self,
        _channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        self.record("delete", message_id);
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(message_id) {
            return Err(PlatformError::Transient("delete rejected".to_string()));
        }
        match state.messages.remove(message_id) {
            Some(_) => {
                state.deleted.push(message_id.to_string());
                Ok(())
            }
            None => Err(PlatformError::ResourceMissing(message_id.to_string())),
        }
    }
}

pub fn server(name: &str, kind: ServerKind) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        kind,
        host: "127.0.0.1".to_string(),
        port: 27015,
        connect_url: None,
        display_max_players: Some(20),
        status_url: Some("http://127.0.0.1/status".to_string()),
        description: None,
        map_thumbnail_url: None,
    }
}

pub fn online(name: &str, players: u32) -> ServerSnapshot {
    ServerSnapshot {
        online: true,
        player_count: players,
        max_players: 20,
        map_name: Some("gm_flatgrass".to_string()),
        roster: (0..players).map(|i| format!("player{i}")).collect(),
        display_name: name.to_string(),
        probe_error: None,
    }
}

/// Probe answering from a per-server script; servers listed in `gated`
/// wait for [`ScriptedProbe::release`] before answering.
#[derive(Default)]
pub struct ScriptedProbe {
    replies: Mutex<HashMap<String, Result<ServerSnapshot, ProbeFailure>>>,
    gated: Mutex<HashSet<String>>,
    gate: Notify,
    entered: Notify,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    pub fn reply(&self, name: &str, reply: Result<ServerSnapshot, ProbeFailure>) {
        self.replies.lock().unwrap().insert(name.to_string(), reply);
    }

    pub fn gate(&self, name: &str) {
        self.gated.lock().unwrap().insert(name.to_string());
    }

    /// Lets the waiting query answer and ungates all servers.
    pub fn release(&self) {
        self.gated.lock().unwrap().clear();
        self.gate.notify_one();
    }

    /// Resolves once a gated query has started waiting.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn query(&self, server: &ServerConfig) -> Result<ServerSnapshot, ProbeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gated = self.gated.lock().unwrap().contains(&server.name);
        if gated {
            self.entered.notify_one();
            self.gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&server.name)
            .cloned()
            .unwrap_or_else(|| Ok(online(&server.name, 1)));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
