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

use std::time::Duration;

use async_trait::async_trait;
use monitor_common::render::RichContent;

/// Discord's limit for channel names, which carry the status labels.
pub const DEFAULT_MAX_LABEL_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The referenced resource no longer exists on the platform.
    #[error("resource missing: {0}")]
    ResourceMissing(String),
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("platform call failed: {0}")]
    Transient(String),
}

impl PlatformError {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::ResourceMissing(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    pub author_id: String,
}

/// Primitive operations of the chat platform the monitor publishes to.
///
/// Label containers are resources whose name is their only observable
/// state; messages carry [`RichContent`].
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Identity this process posts as; only its own messages are ever purged.
    fn own_author_id(&self) -> &str;

    fn max_label_len(&self) -> usize {
        DEFAULT_MAX_LABEL_LEN
    }

    async fn current_label(&self, container_id: &str) -> Result<String, PlatformError>;

    async fn rename_label(&self, container_id: &str, label: &str) -> Result<(), PlatformError>;

    /// Create a new, hidden label container and return its id.
    async fn create_label_container(&self, label: &str) -> Result<String, PlatformError>;

    /// Make a label container visible. Returns `true` when a change was applied.
    async fn reveal_label(&self, container_id: &str) -> Result<bool, PlatformError>;

    async fn send_message(
        &self,
        channel_id: &str,
        content: &RichContent,
    ) -> Result<String, PlatformError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &RichContent,
    ) -> Result<(), PlatformError>;

    async fn list_messages(&self, channel_id: &str) -> Result<Vec<RemoteMessage>, PlatformError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str)
    -> Result<(), PlatformError>;
}
