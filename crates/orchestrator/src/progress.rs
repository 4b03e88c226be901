//! Run progress publishing over Redis pub/sub.
//!
//! Events go to a per-run channel; the publisher knows nothing about
//! subscribers. Publish failures propagate to the caller — the execution
//! worker decides whether a dropped progress event should abort the run.

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use testrig_models::{RunProgressEvent, RunProgressMessage};
use tracing::{debug, info};
use uuid::Uuid;

/// Fire-and-forget publisher of run lifecycle events
#[derive(Clone)]
pub struct RunProgressPublisher {
    client: Client,
    namespace: String,
}

impl RunProgressPublisher {
    pub fn new(redis_url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        info!("Run progress publisher initialized");
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    async fn get_connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .client
            .get_tokio_connection_manager()
            .await
            .context("Failed to get Redis connection manager")?;
        Ok(manager)
    }

    /// Channel name for a run's progress stream
    pub fn channel(&self, run_id: Uuid) -> String {
        format!("{}:run-progress:{}", self.namespace, run_id)
    }

    /// Publish one event, stamping the envelope timestamp at publish time.
    pub async fn publish(&self, run_id: Uuid, event: RunProgressEvent) -> Result<()> {
        let message = RunProgressMessage {
            run_id,
            timestamp: Utc::now(),
            event,
        };
        let json =
            serde_json::to_string(&message).context("Failed to serialize run progress event")?;

        let mut conn = self.get_connection().await?;
        let channel = self.channel(run_id);
        conn.publish::<_, _, i64>(&channel, json)
            .await
            .context("Failed to publish run progress event")?;

        debug!(run_id = %run_id, event = message.event.kind(), "Published run progress event");
        Ok(())
    }

    /// Test Redis connectivity
    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: Option<String> = conn
            .get("__test_connection__")
            .await
            .context("Failed to test Redis connection")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_namespaced_per_run() {
        let publisher = RunProgressPublisher::new("redis://127.0.0.1/", "testrig").unwrap();
        let run_id = Uuid::new_v4();
        assert_eq!(
            publisher.channel(run_id),
            format!("testrig:run-progress:{run_id}")
        );
    }
}
