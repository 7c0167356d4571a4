//! Scout: mirrors the intent command stream into the cache and
//! re-broadcasts every stored intent on a timer, so commands lost to
//! dropped locks or failed publishes are eventually retried.

use crate::broker::Publisher;
use crate::error::Result;
use gitpulse_contracts::{IntentCommand, IntentKind, IntentPayload};
use redis::{AsyncCommands, aio::ConnectionManager};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn intent_key(payload: &IntentPayload) -> String {
    format!("intent:{}:{}", payload.repo_owner, payload.repo_name)
}

/// Window refreshes only move the harvest window; identity fields of the
/// stored intent win over the incoming command.
fn merge_window(existing: Option<IntentPayload>, incoming: &IntentPayload) -> IntentPayload {
    match existing {
        Some(mut stored) => {
            stored.from = incoming.from;
            stored.until = incoming.until;
            stored
        }
        None => incoming.clone(),
    }
}

pub struct ScoutService {
    conn: ConnectionManager,
    publisher: Arc<dyn Publisher>,
    publish_queue: String,
}

impl std::fmt::Debug for ScoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutService")
            .field("publish_queue", &self.publish_queue)
            .finish_non_exhaustive()
    }
}

impl ScoutService {
    pub async fn connect(
        redis_url: &str,
        publisher: Arc<dyn Publisher>,
        publish_queue: String,
    ) -> Result<Self> {
        info!("connecting to redis");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            publisher,
            publish_queue,
        })
    }

    /// Applies one inbound intent command to the mirror.
    pub async fn process_message(&self, body: &[u8]) -> Result<()> {
        let command: IntentCommand = serde_json::from_slice(body)?;
        let key = intent_key(&command.intent);

        match command.kind {
            IntentKind::NewIntent => self.store_intent(&key, &command.intent).await,
            IntentKind::UpdateIntent => self.update_intent(&key, &command.intent).await,
            IntentKind::CancelIntent => {
                let mut conn = self.conn.clone();
                let _: () = conn.del(&key).await?;
                debug!(key, "intent cancelled");
                Ok(())
            }
        }
    }

    async fn store_intent(&self, key: &str, payload: &IntentPayload) -> Result<()> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(payload)?;
        let _: () = conn.set(key, data).await?;
        debug!(key, "intent stored");
        Ok(())
    }

    /// Merges the new window onto the stored intent; falls back to a
    /// plain store when the key is missing.
    async fn update_intent(&self, key: &str, payload: &IntentPayload) -> Result<()> {
        let mut conn = self.conn.clone();
        let existing: Option<String> = conn.get(key).await?;
        let existing = existing
            .as_deref()
            .map(serde_json::from_str::<IntentPayload>)
            .transpose()?;
        self.store_intent(key, &merge_window(existing, payload))
            .await
    }

    /// One sweep: re-publish every mirrored intent as `new_intent`.
    /// Individual failures are logged; the sweep continues.
    pub async fn broadcast_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("intent:*").await?;
        debug!(count = keys.len(), "sweeping stored intents");

        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else {
                continue; // cancelled between KEYS and GET
            };
            let payload: IntentPayload = match serde_json::from_str(&raw) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(key, %err, "dropping unparsable stored intent");
                    continue;
                }
            };

            let command = IntentCommand::new(IntentKind::NewIntent, payload);
            let body = serde_json::to_vec(&command)?;
            if let Err(err) = self.publisher.publish(&self.publish_queue, &body).await {
                warn!(key, %err, "failed to re-broadcast intent");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn payload(owner: &str, name: &str, from_year: i32) -> IntentPayload {
        IntentPayload {
            id: Uuid::new_v4(),
            repo_owner: owner.into(),
            repo_name: name.into(),
            from: Utc.with_ymd_and_hms(from_year, 1, 1, 0, 0, 0).unwrap(),
            until: Utc.with_ymd_and_hms(from_year, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn key_uses_owner_and_name() {
        let key = intent_key(&payload("octocat", "hello-world", 2024));
        assert_eq!(key, "intent:octocat:hello-world");
    }

    #[test]
    fn update_without_stored_intent_stores_the_incoming_one() {
        let incoming = payload("octocat", "hello-world", 2024);
        let merged = merge_window(None, &incoming);
        assert_eq!(merged, incoming);
    }

    #[test]
    fn update_keeps_stored_identity_and_takes_the_new_window() {
        let stored = payload("octocat", "hello-world", 2020);
        let mut incoming = payload("octocat", "hello-world", 2024);
        incoming.id = Uuid::new_v4();

        let merged = merge_window(Some(stored.clone()), &incoming);
        assert_eq!(merged.id, stored.id);
        assert_eq!(merged.from, incoming.from);
        assert_eq!(merged.until, incoming.until);
    }
}
