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

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use monitor_common::{
    DEFAULT_SERVER_PACING_MILLIS, PROJECT_INFO_KEY, ProjectInfo, ServerConfig, ServerSnapshot,
    render::{project_info_content, rich_content, status_label},
    voice_channel_key,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    identity::IdentityStore, probe::ProbeRegistry, publisher::Publisher, scheduler::PassToken,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassOutcome {
    Completed,
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub name: String,
    pub display_name: String,
    pub online: bool,
    pub player_count: Option<u32>,
    pub max_players: u32,
    pub probe_error: Option<String>,
    pub label_container_id: Option<String>,
    pub message_id: Option<String>,
    pub sync_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub generation: u64,
    pub outcome: PassOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub purged_messages: usize,
    pub servers: Vec<ServerReport>,
}

/// Converges the external label and message of every configured server to
/// its freshly probed snapshot. Owns the identity store; one pass at a time.
pub struct Reconciler {
    servers: Arc<[ServerConfig]>,
    probes: ProbeRegistry,
    publisher: Publisher,
    store: IdentityStore,
    text_channel_id: String,
    pacing: Duration,
}

impl Reconciler {
    pub fn new(
        servers: Vec<ServerConfig>,
        probes: ProbeRegistry,
        publisher: Publisher,
        store: IdentityStore,
        text_channel_id: String,
    ) -> Self {
        Self {
            servers: servers.into(),
            probes,
            publisher,
            store,
            text_channel_id,
            pacing: Duration::from_millis(DEFAULT_SERVER_PACING_MILLIS),
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    /// Retry persisting the identity store if an earlier write failed.
    pub fn flush_store(&mut self) {
        if !self.store.is_dirty() {
            return;
        }
        match self.store.flush() {
            Ok(()) => info!(
                path = %self.store.path().display(),
                entries = self.store.len(),
                "identity store flushed"
            ),
            Err(error) => warn!(
                path = %self.store.path().display(),
                error = %error,
                "identity store still not persisted"
            ),
        }
    }

    /// Delete own messages in the text channel that no stored key refers to.
    pub async fn purge_strays(&mut self) -> usize {
        let known_ids = self.store.known_ids();
        match self
            .publisher
            .purge_unmanaged(&self.text_channel_id, &known_ids)
            .await
        {
            Ok(outcome) => {
                if outcome.deleted > 0 || outcome.failed > 0 {
                    info!(
                        deleted = outcome.deleted,
                        failed = outcome.failed,
                        "purged stray messages"
                    );
                }
                outcome.deleted
            }
            Err(error) => {
                warn!(error = %error, "failed to list messages for purge");
                0
            }
        }
    }

    pub async fn publish_project_info(&mut self, info: &ProjectInfo) {
        let content = project_info_content(info);
        if let Err(error) = self
            .publisher
            .sync_rich_resource(&mut self.store, &self.text_channel_id, PROJECT_INFO_KEY, &content)
            .await
        {
            warn!(error = %error, "failed to publish project info message");
        }
    }

    /// One full pass: purge strays, then reconcile each server in order.
    ///
    /// The token is checked before every server; a superseded pass stops
    /// without touching the remaining servers.
    pub async fn run_pass(&mut self, token: &PassToken) -> PassReport {
        let started_at = Utc::now();
        let generation = token.generation();
        let purged_messages = self.purge_strays().await;

        let servers = Arc::clone(&self.servers);
        let mut reports = Vec::with_capacity(servers.len());
        let mut outcome = PassOutcome::Completed;
        for (idx, server) in servers.iter().enumerate() {
            if idx > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            if !token.is_current() {
                info!(generation, server = %server.name, "pass superseded; stopping early");
                outcome = PassOutcome::Superseded;
                break;
            }
            reports.push(self.reconcile_server(server).await);
        }

        let online = reports.iter().filter(|report| report.online).count();
        let failed = reports
            .iter()
            .filter(|report| !report.sync_errors.is_empty())
            .count();
        info!(
            generation,
            outcome = ?outcome,
            servers = reports.len(),
            online,
            failed,
            "reconciliation pass finished"
        );

        PassReport {
            generation,
            outcome,
            started_at,
            finished_at: Utc::now(),
            purged_messages,
            servers: reports,
        }
    }

    async fn reconcile_server(&mut self, server: &ServerConfig) -> ServerReport {
        let snapshot = self.probes.probe(server).await;
        let mut report = new_report(server, &snapshot);

        let label = status_label(&snapshot);
        let voice_key = voice_channel_key(&server.name);
        match self
            .publisher
            .sync_label_for_key(&mut self.store, &voice_key, &label)
            .await
        {
            Ok(container_id) => {
                if snapshot.online {
                    if let Err(error) = self.publisher.reveal_label(&container_id).await {
                        warn!(server = %server.name, error = %error, "failed to reveal label container");
                        report.sync_errors.push(format!("reveal: {error}"));
                    }
                }
                report.label_container_id = Some(container_id);
            }
            Err(error) => {
                warn!(server = %server.name, error = %error, "failed to sync status label");
                report.sync_errors.push(format!("label: {error}"));
            }
        }

        let content = rich_content(server, &snapshot);
        match self
            .publisher
            .sync_rich_resource(&mut self.store, &self.text_channel_id, &server.name, &content)
            .await
        {
            Ok(message_id) => report.message_id = Some(message_id),
            Err(error) => {
                warn!(server = %server.name, error = %error, "failed to sync status message");
                report.sync_errors.push(format!("message: {error}"));
            }
        }

        report
    }
}

fn new_report(server: &ServerConfig, snapshot: &ServerSnapshot) -> ServerReport {
    ServerReport {
        name: server.name.clone(),
        display_name: snapshot.display_name.clone(),
        online: snapshot.online,
        player_count: snapshot.online.then_some(snapshot.player_count),
        max_players: snapshot.max_players,
        probe_error: snapshot.probe_error.as_ref().map(ToString::to_string),
        label_container_id: None,
        message_id: None,
        sync_errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::ChatPlatform,
        scheduler::PassToken,
        testing::{BOT_AUTHOR_ID, FakePlatform, ScriptedProbe, online, server},
    };
    use monitor_common::{ProbeFailure, ProbeSettings, ServerKind, TEXT_CHANNEL_KEY};

    struct Harness {
        _dir: tempfile::TempDir,
        platform: Arc<FakePlatform>,
        probe: Arc<ScriptedProbe>,
        reconciler: Reconciler,
    }

    fn harness(names: &[&str]) -> Harness {
        harness_with(names, Publisher::new)
    }

    fn harness_with(
        names: &[&str],
        publisher: impl FnOnce(Arc<dyn ChatPlatform>) -> Publisher,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::load(dir.path().join("messages.json")).unwrap();
        store.remember(TEXT_CHANNEL_KEY, "text");
        let platform = Arc::new(FakePlatform::default());
        let shared: Arc<dyn ChatPlatform> = platform.clone();
        let probe = Arc::new(ScriptedProbe::default());
        let probes = ProbeRegistry::new(ProbeSettings::default())
            .with_adapter(ServerKind::ProcessQuery, probe.clone())
            .with_adapter(ServerKind::GameQuery, probe.clone())
            .with_adapter(ServerKind::HttpStatusApi, probe.clone());
        let servers = names
            .iter()
            .map(|name| server(name, ServerKind::GameQuery))
            .collect();
        let reconciler = Reconciler::new(
            servers,
            probes,
            publisher(shared),
            store,
            "text".to_string(),
        )
        .with_pacing(Duration::ZERO);
        Harness {
            _dir: dir,
            platform,
            probe,
            reconciler,
        }
    }

    #[tokio::test]
    async fn first_pass_creates_one_label_and_one_message_per_server() {
        let mut h = harness(&["A", "B"]);
        h.probe.reply("A", Ok(online("A", 3)));

        let report = h.reconciler.run_pass(&PassToken::detached(1)).await;

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.servers.len(), 2);
        assert_eq!(h.platform.count_calls("create_label"), 2);
        assert_eq!(h.platform.count_calls("send"), 2);
        let label = h
            .platform
            .label(report.servers[0].label_container_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(label, "🟢 A (3/20)");
        assert!(h.reconciler.store().lookup("A").is_some());
        assert!(h.reconciler.store().lookup("voice:B").is_some());
    }

    #[tokio::test]
    async fn repeated_passes_reuse_the_same_resources() {
        let mut h = harness(&["A", "B"]);
        let first = h.reconciler.run_pass(&PassToken::detached(1)).await;
        let second = h.reconciler.run_pass(&PassToken::detached(2)).await;

        assert_eq!(h.platform.count_calls("create_label"), 2);
        assert_eq!(h.platform.count_calls("send"), 2);
        assert_eq!(h.platform.count_calls("delete"), 0);
        for (a, b) in first.servers.iter().zip(&second.servers) {
            assert_eq!(a.message_id, b.message_id);
            assert_eq!(a.label_container_id, b.label_container_id);
        }
    }

    #[tokio::test]
    async fn deleted_message_is_recreated_and_rebound() {
        let mut h = harness(&["A"]);
        let first = h.reconciler.run_pass(&PassToken::detached(1)).await;
        let old_id = first.servers[0].message_id.clone().unwrap();
        h.platform.remove_message(&old_id);
        h.probe.reply("A", Ok(online("A", 9)));

        let second = h.reconciler.run_pass(&PassToken::detached(2)).await;
        let new_id = second.servers[0].message_id.clone().unwrap();

        assert_ne!(old_id, new_id);
        assert_eq!(h.reconciler.store().lookup("A"), Some(new_id.as_str()));
        assert_eq!(h.platform.count_calls("send"), 2);
    }

    #[tokio::test]
    async fn deleted_label_container_is_recreated_and_rebound() {
        let mut h = harness_with(&["A"], |platform| {
            Publisher::new(platform).with_revalidate_after(Duration::ZERO)
        });
        let first = h.reconciler.run_pass(&PassToken::detached(1)).await;
        let old_id = first.servers[0].label_container_id.clone().unwrap();
        h.platform.remove_label(&old_id);

        let second = h.reconciler.run_pass(&PassToken::detached(2)).await;
        let new_id = second.servers[0].label_container_id.clone().unwrap();

        assert_ne!(old_id, new_id);
        assert!(second.servers[0].sync_errors.is_empty());
        assert_eq!(h.platform.count_calls("create_label"), 2);
        assert_eq!(h.platform.label(&new_id).as_deref(), Some("🟢 A (1/20)"));
        assert_eq!(h.reconciler.store().lookup("voice:A"), Some(new_id.as_str()));

        h.reconciler.run_pass(&PassToken::detached(3)).await;
        assert_eq!(h.platform.count_calls("create_label"), 2);
    }

    #[tokio::test]
    async fn supersede_during_pacing_skips_next_server() {
        let mut h = harness(&["A", "B"]);
        h.reconciler = h.reconciler.with_pacing(Duration::from_millis(300));
        let token = PassToken::detached(1);
        let superseder = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            superseder.supersede();
        });

        let report = h.reconciler.run_pass(&token).await;

        assert_eq!(report.outcome, PassOutcome::Superseded);
        assert_eq!(report.servers.len(), 1);
        assert_eq!(h.probe.calls(), 1);
        assert_eq!(h.platform.count_calls("send"), 1);
    }

    #[tokio::test]
    async fn failing_probe_renders_offline_without_numbers() {
        let mut h = harness(&["A"]);
        h.probe
            .reply("A", Err(ProbeFailure::Connect("refused".to_string())));

        let report = h.reconciler.run_pass(&PassToken::detached(1)).await;
        let server = &report.servers[0];

        assert!(!server.online);
        assert_eq!(server.player_count, None);
        assert!(server.probe_error.as_deref().unwrap().contains("refused"));
        let label = h
            .platform
            .label(server.label_container_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(label, "🔴 A (Offline)");
        assert!(h.platform.is_hidden(server.label_container_id.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn one_failing_server_does_not_block_the_others() {
        let mut h = harness(&["A", "B", "C"]);
        h.probe
            .reply("B", Err(ProbeFailure::Malformed("garbage".to_string())));
        h.platform.fail_sends_titled(" B");

        let report = h.reconciler.run_pass(&PassToken::detached(1)).await;

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.servers.len(), 3);
        assert!(report.servers[0].message_id.is_some());
        assert!(report.servers[1].message_id.is_none());
        assert_eq!(report.servers[1].sync_errors.len(), 1);
        assert!(report.servers[2].message_id.is_some());
        let titles = h.platform.message_titles();
        assert!(titles.contains(&"🟢 A".to_string()));
        assert!(titles.contains(&"🟢 C".to_string()));
        assert!(h.reconciler.store().lookup("B").is_none());
    }

    #[tokio::test]
    async fn pass_purges_strays_before_publishing() {
        let mut h = harness(&["A"]);
        let stray = h.platform.insert_message("text", BOT_AUTHOR_ID, "old status");
        let foreign = h.platform.insert_message("text", "moderator", "pinned note");

        let report = h.reconciler.run_pass(&PassToken::detached(1)).await;

        assert_eq!(report.purged_messages, 1);
        assert!(!h.platform.has_message(&stray));
        assert!(h.platform.has_message(&foreign));
    }

    #[tokio::test]
    async fn superseded_token_stops_before_next_server() {
        let mut h = harness(&["A", "B"]);
        let token = PassToken::detached(1);
        token.supersede();

        let report = h.reconciler.run_pass(&token).await;

        assert_eq!(report.outcome, PassOutcome::Superseded);
        assert!(report.servers.is_empty());
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.platform.count_calls("send"), 0);
    }

    #[tokio::test]
    async fn project_info_is_bound_to_reserved_key() {
        let mut h = harness(&["A"]);
        let info = ProjectInfo {
            title: "Our collection".to_string(),
            description: None,
            url: None,
            thumbnail_url: None,
            footer: None,
            color: None,
        };
        h.reconciler.publish_project_info(&info).await;
        h.reconciler.publish_project_info(&info).await;

        assert_eq!(h.platform.count_calls("send"), 1);
        let id = h.reconciler.store().lookup(PROJECT_INFO_KEY).unwrap().to_string();
        h.reconciler.run_pass(&PassToken::detached(1)).await;
        assert!(h.platform.has_message(&id));
    }
}
