use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::parser::RecordParser;
use crate::records::{Record, RecordType};

/// A record plus the moment it was attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedRecord {
    #[serde(flatten)]
    pub record: Record,
    pub attached_at: i64,
}

/// Records hanging off a single conversation message. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    records: Vec<AttachedRecord>,
    pub has_generated_content: bool,
}

impl MessageAttachment {
    pub fn records(&self) -> &[AttachedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn push(&mut self, record: AttachedRecord) {
        self.records.push(record);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub index: usize,
    pub text: String,
    pub is_user: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub attachment: Option<MessageAttachment>,
}

impl ChatMessage {
    pub fn new(index: usize, text: impl Into<String>, is_user: bool, timestamp: i64) -> Self {
        Self {
            index,
            text: text.into(),
            is_user,
            timestamp,
            attachment: None,
        }
    }

    pub fn attached_count(&self) -> usize {
        self.attachment.as_ref().map(|a| a.len()).unwrap_or(0)
    }
}

/// Anything the unread tracker can compare against a last-viewed time.
pub trait Timestamped {
    fn timestamp_millis(&self) -> i64;
}

impl Timestamped for ChatMessage {
    fn timestamp_millis(&self) -> i64 {
        self.timestamp
    }
}

/// One inbound message from a peer, derived from chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub peer_id: String,
    pub message_index: usize,
    pub timestamp: i64,
    pub content: String,
}

impl Timestamped for PeerMessage {
    fn timestamp_millis(&self) -> i64 {
        self.timestamp
    }
}

/// Supplies the active conversation and accepts edits to it.
#[async_trait]
pub trait ChatDataProvider: Send + Sync {
    fn current_messages(&self) -> Vec<ChatMessage>;

    fn replace_message_text(&self, index: usize, text: &str) -> Result<()>;

    async fn save_chat(&self) -> Result<()>;
}

/// Group peer-authored records by peer for unread recomputation.
///
/// Private messages are keyed by `peer_id`, group messages by `group_id`.
/// User-authored messages are skipped.
pub fn collect_peer_messages(
    parser: &RecordParser,
    messages: &[ChatMessage],
) -> HashMap<String, Vec<PeerMessage>> {
    let mut by_peer: HashMap<String, Vec<PeerMessage>> = HashMap::new();

    for message in messages.iter().filter(|m| !m.is_user) {
        let records = parser.parse_filtered(
            &message.text,
            &[RecordType::PrivateMessage, RecordType::GroupMessage],
        );
        for record in records {
            let Some(peer_id) = peer_key(&record) else {
                continue;
            };
            by_peer.entry(peer_id.to_string()).or_default().push(PeerMessage {
                peer_id: peer_id.to_string(),
                message_index: message.index,
                timestamp: message.timestamp,
                content: record.field("content").unwrap_or_default().to_string(),
            });
        }
    }

    by_peer
}

fn peer_key(record: &Record) -> Option<&str> {
    let key = match record.record_type {
        RecordType::PrivateMessage => record.field("peer_id"),
        RecordType::GroupMessage => record.field("group_id"),
        _ => None,
    }?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}
