//! Curated-room lifecycle: keeps three pinned topic rooms alive (recreating
//! them with fresh topics when fewer than three exist) and periodically
//! sweeps expired rooms out of the durable store.
//!
//! The hub is never swept; it tolerates stale in-memory entries because a
//! room can disappear from the store between any two events.

use std::time::Duration;

use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::hub::HubHandle;
use crate::store::{NewRoom, RoomStore};
use crate::topics::TopicService;

const PINNED_ROOM_NAMES: [&str; 3] = ["Tech Talk", "World News", "Fun Facts"];
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct RoomLifecycle {
    store: RoomStore,
    topics: TopicService,
    hub: HubHandle,
}

impl RoomLifecycle {
    pub fn new(pool: SqlitePool, hub: HubHandle) -> Self {
        Self {
            store: RoomStore::new(pool),
            topics: TopicService::new(),
            hub,
        }
    }

    /// Long-running task: an immediate pinned-rooms check, then a sweep
    /// every five minutes.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&mut self) {
        match self.store.delete_expired_rooms().await {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, "deleted expired rooms"),
            Err(err) => tracing::error!(error = %err, "failed to delete expired rooms"),
        }

        if let Err(err) = self.check_and_refresh().await {
            tracing::error!(error = %err, "failed to refresh pinned rooms");
        }
    }

    async fn check_and_refresh(&mut self) -> anyhow::Result<()> {
        let count = self.store.count_pinned_rooms().await?;
        if count < PINNED_ROOM_NAMES.len() as i64 {
            tracing::info!(count, "pinned rooms missing, refreshing");
            self.refresh_pinned_rooms().await?;
        }
        Ok(())
    }

    /// Create the curated rooms with freshly fetched topics, all expiring at
    /// the next midnight UTC, and materialize each in the hub.
    async fn refresh_pinned_rooms(&mut self) -> anyhow::Result<()> {
        let topics = self.topics.fetch_all_topics().await;
        let expires_at = next_midnight_utc().unix_timestamp();

        for (name, topic) in PINNED_ROOM_NAMES.iter().copied().zip(topics) {
            let created = self
                .store
                .create_room(NewRoom {
                    name: name.to_owned(),
                    is_pinned: true,
                    topic_title: Some(topic.title.clone()),
                    topic_description: Some(topic.description),
                    topic_url: Some(topic.url),
                    topic_source: Some(topic.source),
                    expires_at: Some(expires_at),
                })
                .await;

            match created {
                Ok(room) => {
                    tracing::info!(room_id = %room.id, name, topic = %topic.title, "created pinned room");
                    if let Err(err) = self.hub.ensure_room(room.into()).await {
                        tracing::warn!(error = %err, "hub rejected pinned room");
                    }
                }
                Err(err) => {
                    tracing::warn!(name, error = %err, "failed to create pinned room");
                }
            }
        }

        Ok(())
    }
}

/// Pinned rooms all expire together at the next midnight UTC.
fn next_midnight_utc() -> OffsetDateTime {
    let today = OffsetDateTime::now_utc().date();
    let tomorrow = today.next_day().unwrap_or(today);
    tomorrow.midnight().assume_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_midnight_is_ahead_and_at_midnight() {
        let now = OffsetDateTime::now_utc();
        let midnight = next_midnight_utc();
        assert!(midnight > now);
        assert!(midnight - now <= time::Duration::hours(24));
        assert_eq!(midnight.time(), time::Time::MIDNIGHT);
    }

    #[test]
    fn there_is_one_name_per_curated_feed() {
        assert_eq!(PINNED_ROOM_NAMES.len(), 3);
    }
}
