use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::chat::{AttachedRecord, ChatMessage};
use crate::clock::Clock;
use crate::events::{Broadcaster, ContentGenerated};
use crate::records::Record;

/// Display side of a conversation message: the "view phone content"
/// indicator that shows how many records a message carries.
#[async_trait]
pub trait MessagePresenter: Send + Sync {
    async fn has_indicator(&self, message_index: usize) -> bool;

    async fn create_indicator(&self, message_index: usize, total: usize) -> Result<()>;

    async fn update_indicator(&self, message_index: usize, total: usize) -> Result<()>;
}

/// Keeps indicator state in memory and logs it. Used when no display is
/// attached.
#[derive(Default)]
pub struct HeadlessPresenter {
    indicators: Mutex<HashMap<usize, usize>>,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indicator_total(&self, message_index: usize) -> Option<usize> {
        self.indicators
            .lock()
            .ok()
            .and_then(|map| map.get(&message_index).copied())
    }
}

#[async_trait]
impl MessagePresenter for HeadlessPresenter {
    async fn has_indicator(&self, message_index: usize) -> bool {
        self.indicator_total(message_index).is_some()
    }

    async fn create_indicator(&self, message_index: usize, total: usize) -> Result<()> {
        self.indicators
            .lock()
            .map_err(|e| anyhow::anyhow!("Indicator lock poisoned: {}", e))?
            .insert(message_index, total);
        tracing::info!("Message #{} now carries {} phone record(s)", message_index, total);
        Ok(())
    }

    async fn update_indicator(&self, message_index: usize, total: usize) -> Result<()> {
        self.create_indicator(message_index, total).await
    }
}

/// Appends parsed records to a message and tells everyone about it.
pub struct ContentAttacher {
    presenter: Arc<dyn MessagePresenter>,
    clock: Arc<dyn Clock>,
    generated: Broadcaster<ContentGenerated>,
}

impl ContentAttacher {
    pub fn new(presenter: Arc<dyn MessagePresenter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            presenter,
            clock,
            generated: Broadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<ContentGenerated> {
        self.generated.subscribe()
    }

    /// Append `records` to the message's attachment, in order.
    ///
    /// No deduplication: attaching the same records twice stores them twice.
    /// Always succeeds; display failures are logged.
    pub async fn attach(&self, message: &mut ChatMessage, records: &[Record]) {
        let attached_at = self.clock.now_millis();
        let attachment = message.attachment.get_or_insert_with(Default::default);
        for record in records {
            attachment.push(AttachedRecord {
                record: record.clone(),
                attached_at,
            });
        }
        attachment.has_generated_content = true;

        self.reflect(message).await;

        self.generated.publish(&ContentGenerated {
            message_index: message.index,
            records: records.to_vec(),
        });

        tracing::info!(
            "Attached {} record(s) to message #{} ({} total)",
            records.len(),
            message.index,
            message.attached_count()
        );
    }

    /// Show the current record total on the message. Creates the indicator
    /// only if none exists yet, so repeated calls never duplicate it.
    pub async fn reflect(&self, message: &ChatMessage) {
        let Some(attachment) = &message.attachment else {
            return;
        };
        if !attachment.has_generated_content {
            return;
        }

        let total = attachment.len();
        let result = if self.presenter.has_indicator(message.index).await {
            self.presenter.update_indicator(message.index, total).await
        } else {
            self.presenter.create_indicator(message.index, total).await
        };

        if let Err(e) = result {
            tracing::warn!("Failed to refresh message #{} display: {}", message.index, e);
        }
    }
}
