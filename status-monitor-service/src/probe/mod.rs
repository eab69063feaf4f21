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

//! Probe adapters: one per [`ServerKind`], each turning a server descriptor
//! into a normalized [`ServerSnapshot`].

mod http_status;
mod minecraft;
mod source;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use monitor_common::{ProbeFailure, ProbeSettings, ServerConfig, ServerKind, ServerSnapshot};
use tracing::{debug, warn};

pub use http_status::HttpStatusProbe;
pub use minecraft::ServerListPingProbe;
pub use source::SourceQueryProbe;

#[async_trait]
pub trait Probe: Send + Sync {
    /// One query attempt. Timeouts and retries are applied by [`ProbeRegistry`].
    async fn query(&self, server: &ServerConfig) -> Result<ServerSnapshot, ProbeFailure>;
}

/// Maps each [`ServerKind`] to its adapter and applies the per-kind timeout
/// and attempt budget.
pub struct ProbeRegistry {
    adapters: HashMap<ServerKind, Arc<dyn Probe>>,
    settings: ProbeSettings,
}

impl ProbeRegistry {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            adapters: HashMap::new(),
            settings,
        }
    }

    pub fn standard(settings: ProbeSettings) -> anyhow::Result<Self> {
        Ok(Self::new(settings)
            .with_adapter(ServerKind::ProcessQuery, Arc::new(SourceQueryProbe))
            .with_adapter(ServerKind::HttpStatusApi, Arc::new(HttpStatusProbe::new()?))
            .with_adapter(ServerKind::GameQuery, Arc::new(ServerListPingProbe)))
    }

    pub fn with_adapter(mut self, kind: ServerKind, adapter: Arc<dyn Probe>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    /// Query `server`, never failing: every failure becomes an offline snapshot
    /// carrying the last [`ProbeFailure`].
    pub async fn probe(&self, server: &ServerConfig) -> ServerSnapshot {
        let Some(adapter) = self.adapters.get(&server.kind) else {
            warn!(server = %server.name, kind = server.kind.as_str(), "no probe adapter registered");
            return ServerSnapshot::offline(
                server,
                Some(ProbeFailure::UnexpectedSchema(format!(
                    "no adapter for {}",
                    server.kind.as_str()
                ))),
            );
        };

        let tuning = self.settings.for_kind(server.kind);
        let attempts = tuning.attempts.max(1);
        let timeout = Duration::from_millis(tuning.timeout_millis.max(1));
        let mut last_failure = ProbeFailure::Timeout(tuning.timeout_millis);

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, adapter.query(server)).await {
                Ok(Ok(snapshot)) => return normalize(server, snapshot),
                Ok(Err(failure)) => last_failure = failure,
                Err(_) => last_failure = ProbeFailure::Timeout(tuning.timeout_millis),
            }
            debug!(
                server = %server.name,
                attempt,
                attempts,
                failure = %last_failure,
                "probe attempt failed"
            );
        }

        warn!(server = %server.name, failure = %last_failure, "server probe failed; reporting offline");
        ServerSnapshot::offline(server, Some(last_failure))
    }
}

/// Offline snapshots carry no trusted numbers; a missing maximum falls back
/// to the configured one.
fn normalize(server: &ServerConfig, mut snapshot: ServerSnapshot) -> ServerSnapshot {
    if snapshot.max_players == 0 {
        snapshot.max_players = server.fallback_max_players();
    }
    if snapshot.display_name.trim().is_empty() {
        snapshot.display_name = server.name.clone();
    }
    if !snapshot.online {
        snapshot.player_count = 0;
        snapshot.roster.clear();
        snapshot.map_name = None;
    }
    snapshot
}
