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

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use monitor_common::render::RichContent;
use tracing::{debug, info, warn};

use crate::{
    identity::IdentityStore,
    platform::{ChatPlatform, PlatformError},
};

pub const LABEL_TRUNCATION_MARKER: &str = "...";
const DEFAULT_REVALIDATE_AFTER: Duration = Duration::from_secs(300);

/// Clip `label` to at most `max_len` characters, ending in
/// [`LABEL_TRUNCATION_MARKER`] when anything was cut.
pub fn clip_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        return label.to_string();
    }
    let marker_len = LABEL_TRUNCATION_MARKER.chars().count();
    if max_len < marker_len {
        return LABEL_TRUNCATION_MARKER.chars().take(max_len).collect();
    }
    let mut clipped: String = label.chars().take(max_len - marker_len).collect();
    clipped.push_str(LABEL_TRUNCATION_MARKER);
    clipped
}

#[derive(Debug, Clone)]
struct ObservedLabel {
    label: String,
    confirmed_at: Instant,
}

#[derive(Debug, Clone)]
struct PublishedContent {
    external_id: String,
    content: RichContent,
    confirmed_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub deleted: usize,
    pub failed: usize,
}

/// Idempotent create-or-update operations over a [`ChatPlatform`].
pub struct Publisher {
    platform: Arc<dyn ChatPlatform>,
    labels: HashMap<String, ObservedLabel>,
    revealed: HashSet<String>,
    published: HashMap<String, PublishedContent>,
    revalidate_after: Duration,
}

impl Publisher {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            platform,
            labels: HashMap::new(),
            revealed: HashSet::new(),
            published: HashMap::new(),
            revalidate_after: DEFAULT_REVALIDATE_AFTER,
        }
    }

    #[cfg(test)]
    pub fn with_revalidate_after(mut self, revalidate_after: Duration) -> Self {
        self.revalidate_after = revalidate_after;
        self
    }

    /// Rename a label container only when its current name differs from the
    /// clipped `desired_label`. Returns whether a rename was issued.
    ///
    /// The last observed name is trusted for the revalidation window only;
    /// after that the platform is asked again, which also surfaces containers
    /// removed or renamed outside this process.
    pub async fn sync_label_resource(
        &mut self,
        container_id: &str,
        desired_label: &str,
    ) -> Result<bool, PlatformError> {
        let desired = clip_label(desired_label, self.platform.max_label_len());
        let cached = self
            .labels
            .get(container_id)
            .filter(|observed| observed.confirmed_at.elapsed() < self.revalidate_after)
            .map(|observed| observed.label.clone());
        let current = match cached {
            Some(current) => current,
            None => match self.platform.current_label(container_id).await {
                Ok(current) => current,
                Err(error) => {
                    self.labels.remove(container_id);
                    return Err(error);
                }
            },
        };
        if current == desired {
            self.observe_label(container_id, current);
            return Ok(false);
        }

        match self.platform.rename_label(container_id, &desired).await {
            Ok(()) => {
                debug!(container_id, label = %desired, "label renamed");
                self.observe_label(container_id, desired);
                Ok(true)
            }
            Err(error) => {
                self.labels.remove(container_id);
                Err(error)
            }
        }
    }

    /// Resolve the label container bound to `key`, creating and remembering
    /// one when none is bound or the bound one is gone, then sync its label.
    pub async fn sync_label_for_key(
        &mut self,
        store: &mut IdentityStore,
        key: &str,
        desired_label: &str,
    ) -> Result<String, PlatformError> {
        if let Some(container_id) = store.lookup(key).map(str::to_string) {
            match self.sync_label_resource(&container_id, desired_label).await {
                Ok(_) => return Ok(container_id),
                Err(PlatformError::ResourceMissing(detail)) => {
                    info!(key, container_id = %container_id, detail = %detail, "label container gone; evicting");
                    store.forget(key);
                    self.labels.remove(&container_id);
                    self.revealed.remove(&container_id);
                }
                Err(error) => return Err(error),
            }
        }

        let desired = clip_label(desired_label, self.platform.max_label_len());
        let container_id = self.platform.create_label_container(&desired).await?;
        store.remember(key, &container_id);
        self.observe_label(&container_id, desired);
        info!(key, container_id = %container_id, "label container created");
        Ok(container_id)
    }

    /// Grant visibility on a label container once; never revoked afterwards.
    pub async fn reveal_label(&mut self, container_id: &str) -> Result<(), PlatformError> {
        if self.revealed.contains(container_id) {
            return Ok(());
        }
        if self.platform.reveal_label(container_id).await? {
            info!(container_id, "label container made visible");
        }
        self.revealed.insert(container_id.to_string());
        Ok(())
    }

    /// Edit the message bound to `key`, or create one and bind it.
    ///
    /// A bound id the platform reports missing is forgotten before the
    /// replacement is created, so the key ends bound to exactly one live id.
    /// Any other failure leaves the binding untouched.
    pub async fn sync_rich_resource(
        &mut self,
        store: &mut IdentityStore,
        channel_id: &str,
        key: &str,
        content: &RichContent,
    ) -> Result<String, PlatformError> {
        if let Some(message_id) = store.lookup(key).map(str::to_string) {
            if self.is_confirmed(key, &message_id, content) {
                return Ok(message_id);
            }
            match self
                .platform
                .edit_message(channel_id, &message_id, content)
                .await
            {
                Ok(()) => {
                    self.confirm(key, &message_id, content);
                    return Ok(message_id);
                }
                Err(PlatformError::ResourceMissing(detail)) => {
                    info!(key, message_id = %message_id, detail = %detail, "message gone; evicting before recreate");
                    store.forget(key);
                    self.published.remove(key);
                }
                Err(error) => return Err(error),
            }
        }

        let message_id = self.platform.send_message(channel_id, content).await?;
        store.remember(key, &message_id);
        self.confirm(key, &message_id, content);
        info!(key, message_id = %message_id, "message created");
        Ok(message_id)
    }

    /// Delete this process's own messages in `channel_id` that are not in
    /// `known_ids`. Individual delete failures are logged and skipped.
    pub async fn purge_unmanaged(
        &self,
        channel_id: &str,
        known_ids: &HashSet<String>,
    ) -> Result<PurgeOutcome, PlatformError> {
        let messages = self.platform.list_messages(channel_id).await?;
        let own_id = self.platform.own_author_id();
        let mut outcome = PurgeOutcome::default();

        for message in messages
            .iter()
            .filter(|message| message.author_id == own_id && !known_ids.contains(&message.id))
        {
            match self.platform.delete_message(channel_id, &message.id).await {
                Ok(()) | Err(PlatformError::ResourceMissing(_)) => {
                    debug!(channel_id, message_id = %message.id, "stray message deleted");
                    outcome.deleted += 1;
                }
                Err(error) => {
                    warn!(channel_id, message_id = %message.id, error = %error, "failed to delete stray message");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    fn observe_label(&mut self, container_id: &str, label: String) {
        self.labels.insert(
            container_id.to_string(),
            ObservedLabel {
                label,
                confirmed_at: Instant::now(),
            },
        );
    }

    /// Timestamped content is never confirmed: its timestamp is refreshed on
    /// every sync.
    fn is_confirmed(&self, key: &str, message_id: &str, content: &RichContent) -> bool {
        if content.timestamped {
            return false;
        }
        self.published.get(key).is_some_and(|published| {
            published.external_id == message_id
                && &published.content == content
                && published.confirmed_at.elapsed() < self.revalidate_after
        })
    }

    fn confirm(&mut self, key: &str, message_id: &str, content: &RichContent) {
        self.published.insert(
            key.to_string(),
            PublishedContent {
                external_id: message_id.to_string(),
                content: content.clone(),
                confirmed_at: Instant::now(),
            },
        );
    }
}
