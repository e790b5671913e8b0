use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tracery_common::{Channel, Incident, Message};

/// Read-only access to the three observation kinds. Implemented outside
/// the engine by whatever backs the collectors; total unavailability is
/// the only error that aborts a cycle.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Incidents with `occurred_at` in `[from, to)`.
    async fn incidents_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>>;

    /// Messages with `posted_at` in `[from, to)`, optionally limited to
    /// one channel.
    async fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel_id: Option<&str>,
    ) -> Result<Vec<Message>>;

    /// All known channels.
    async fn channels(&self) -> Result<Vec<Channel>>;

    /// Query-by-identifier, used by the false-positive review to re-read
    /// the incident behind an aging link.
    async fn incident_by_id(&self, id: Uuid) -> Result<Option<Incident>>;

    async fn message_by_id(&self, id: Uuid) -> Result<Option<Message>>;
}

/// In-memory observation store for tests and the demo path.
#[derive(Default)]
pub struct MemoryObservationStore {
    incidents: Mutex<Vec<Incident>>,
    messages: Mutex<Vec<Message>>,
    channels: Mutex<Vec<Channel>>,
}

impl MemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_incident(&self, incident: Incident) {
        self.incidents.lock().unwrap().push(incident);
    }

    pub fn push_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn push_channel(&self, channel: Channel) {
        self.channels.lock().unwrap().push(channel);
    }
}

#[async_trait]
impl ObservationStore for MemoryObservationStore {
    async fn incidents_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.occurred_at >= from && i.occurred_at < to)
            .cloned()
            .collect();
        incidents.sort_by_key(|i| i.occurred_at);
        Ok(incidents)
    }

    async fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel_id: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.posted_at >= from && m.posted_at < to)
            .filter(|m| channel_id.map_or(true, |c| m.channel_id == c))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.posted_at);
        Ok(messages)
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        let mut channels = self.channels.lock().unwrap().clone();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(channels)
    }

    async fn incident_by_id(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self
            .incidents
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }
}
