//! NATS mirror of the live feed

use crate::stream::feed::{Feed, FeedSubscription};
use crate::types::stream::StreamItem;
use anyhow::Result;
use async_nats::Client;
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Publishes stream items to a NATS subject
#[derive(Clone)]
pub struct StreamPublisher {
    client: Client,
    subject: String,
}

impl StreamPublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Connect and build a publisher for `subject`
    pub async fn connect(url: &str, subject: &str) -> Result<Self> {
        let client = async_nats::connect(url).await?;
        info!(url = %url, subject = %subject, "Connected to NATS");
        Ok(Self::new(client, subject))
    }

    /// Publish one stream item
    pub async fn publish(&self, item: &StreamItem) -> Result<()> {
        let payload = serde_json::to_vec(item)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            id = item.id,
            cycle = item.cycle,
            risk_level = ?item.score.risk_level,
            "Published stream item"
        );

        Ok(())
    }

    /// Forward every feed item until the feed closes or `shutdown` fires,
    /// then flush. Publish failures are logged and the mirror keeps going.
    pub async fn mirror(self, feed: Feed, shutdown: watch::Receiver<bool>) {
        let metrics = feed.metrics().clone();
        let subscription = feed.subscribe();
        drop(feed);

        let publisher = &self;
        let metrics = &metrics;
        relay(subscription, shutdown, move |item| async move {
            match publisher.publish(&item).await {
                Ok(()) => metrics.record_mirrored(),
                Err(e) => error!(id = item.id, error = %e, "Failed to mirror stream item"),
            }
        })
        .await;

        if let Err(e) = self.client.flush().await {
            error!(error = %e, "Failed to flush NATS client");
        }
        info!(subject = %self.subject, "Feed mirror stopped");
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Hand each item to `forward` until the feed closes or `shutdown` changes
async fn relay<F, Fut>(
    mut subscription: FeedSubscription,
    mut shutdown: watch::Receiver<bool>,
    mut forward: F,
) where
    F: FnMut(StreamItem) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            item = subscription.next() => match item {
                Some(item) => forward(item).await,
                None => break,
            },
            _ = shutdown.changed() => {
                debug!("Shutdown requested, stopping feed mirror");
                break;
            }
        }
    }
}
