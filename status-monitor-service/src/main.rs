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

mod discord;
mod identity;
mod platform;
mod probe;
mod publisher;
mod reconciler;
mod scheduler;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use monitor_common::MonitorConfig;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    discord::DiscordPlatform,
    identity::IdentityStore,
    probe::ProbeRegistry,
    publisher::Publisher,
    reconciler::Reconciler,
    scheduler::{Scheduler, SharedReport},
};

#[derive(Clone)]
struct AppState {
    last_report: SharedReport,
}

#[derive(Debug, Clone)]
struct Settings {
    token: String,
    guild_id: String,
    config_path: String,
    store_path: String,
    api_base_url: String,
}

impl Settings {
    fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("DISCORD_TOKEN")
            .or_else(|_| std::env::var("TOKEN"))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .context("DISCORD_TOKEN is not set")?;
        let guild_id = std::env::var("GUILD_ID")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .context("GUILD_ID is not set")?;
        Ok(Self {
            token,
            guild_id,
            config_path: std::env::var("MONITOR_CONFIG_PATH")
                .ok()
                .unwrap_or_else(|| "config/servers.yaml".to_string()),
            store_path: std::env::var("IDENTITY_STORE_PATH")
                .ok()
                .unwrap_or_else(|| "data/messages.json".to_string()),
            api_base_url: std::env::var("DISCORD_API_BASE_URL")
                .ok()
                .unwrap_or_else(|| "https://discord.com/api/v10".to_string()),
        })
    }
}

fn load_monitor_config(path: &str) -> anyhow::Result<MonitorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read monitor config {path}"))?;
    MonitorConfig::parse(&raw).with_context(|| format!("invalid monitor config {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "status_monitor_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = Settings::from_env()?;
    let config = load_monitor_config(&settings.config_path)?;
    let ordered = config.ordered_servers()?;
    for name in &ordered.missing {
        warn!(server = %name, "display order names a server that is not configured");
    }
    info!(
        servers = ordered.servers.len(),
        interval_seconds = config.update_interval_seconds,
        "monitor config loaded"
    );

    let mut store = IdentityStore::load(&settings.store_path)?;
    let mut discord =
        DiscordPlatform::connect(&settings.api_base_url, &settings.token, &settings.guild_id)
            .await?;
    let text_channel_id = discord
        .bootstrap(&config, &ordered.servers, &mut store)
        .await
        .context("failed to bootstrap Discord channels")?;

    let probes = ProbeRegistry::standard(config.probe)?;
    let mut reconciler = Reconciler::new(
        ordered.servers,
        probes,
        Publisher::new(Arc::new(discord)),
        store,
        text_channel_id,
    )
    .with_pacing(Duration::from_millis(config.server_pacing_millis));

    reconciler.purge_strays().await;
    if let Some(project_info) = &config.project_info {
        reconciler.publish_project_info(project_info).await;
    }

    let scheduler = Scheduler::new(
        reconciler,
        Duration::from_secs(config.update_interval_seconds),
    );
    let app = build_router(AppState {
        last_report: scheduler.last_report(),
    });

    let bind_addr = parse_bind_addr("MONITOR_SERVICE_BIND", "0.0.0.0:8095")?;
    info!(%bind_addr, "status-monitor-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            warn!(error = %error, "health server stopped");
        }
    });

    scheduler
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    info!("status-monitor-service stopped");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "status-monitor-service"}))
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.last_report.read().await.clone() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no reconciliation pass has finished yet"})),
        )
            .into_response(),
    }
}
