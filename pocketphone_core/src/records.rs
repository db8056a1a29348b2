//! Structured records embedded in generated text.
//!
//! Every record kind is written as a bracketed, pipe-delimited tuple
//! `[<tag>|field1|...|fieldN]` with a fixed tag literal and a fixed arity.
//! The grammar table below is the single source of truth for both.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of record kinds the phone understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    PrivateMessage,
    GroupMessage,
    MomentsPost,
    MomentsReply,
    Product,
    Task,
    LiveUpdate,
    BackpackItem,
    FriendLink,
}

impl RecordType {
    pub const ALL: [RecordType; 9] = [
        RecordType::PrivateMessage,
        RecordType::GroupMessage,
        RecordType::MomentsPost,
        RecordType::MomentsReply,
        RecordType::Product,
        RecordType::Task,
        RecordType::LiveUpdate,
        RecordType::BackpackItem,
        RecordType::FriendLink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::PrivateMessage => "private_message",
            RecordType::GroupMessage => "group_message",
            RecordType::MomentsPost => "moments_post",
            RecordType::MomentsReply => "moments_reply",
            RecordType::Product => "product",
            RecordType::Task => "task",
            RecordType::LiveUpdate => "live_update",
            RecordType::BackpackItem => "backpack_item",
            RecordType::FriendLink => "friend_link",
        }
    }

    /// Number of fields a well-formed tag of this kind carries.
    pub fn arity(self) -> usize {
        match self {
            RecordType::Task => 5,
            RecordType::LiveUpdate | RecordType::FriendLink => 2,
            RecordType::PrivateMessage
            | RecordType::GroupMessage
            | RecordType::MomentsPost
            | RecordType::MomentsReply
            | RecordType::Product
            | RecordType::BackpackItem => 4,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grammar entry: which literal tag produces which record kind, and
/// the names of its positional fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub record_type: RecordType,
    pub tag: String,
    pub fields: Vec<String>,
}

impl TagRule {
    pub fn new(record_type: RecordType, tag: &str, fields: &[&str]) -> Self {
        Self {
            record_type,
            tag: tag.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// The built-in grammar, in declaration order. Parse output is grouped by
/// this order.
pub fn default_grammar() -> Vec<TagRule> {
    vec![
        TagRule::new(
            RecordType::PrivateMessage,
            "对方消息",
            &["name", "peer_id", "msg_type", "content"],
        ),
        TagRule::new(
            RecordType::GroupMessage,
            "群聊消息",
            &["group_id", "name", "msg_type", "content"],
        ),
        TagRule::new(
            RecordType::MomentsPost,
            "朋友圈",
            &["name", "peer_id", "post_id", "content"],
        ),
        TagRule::new(
            RecordType::MomentsReply,
            "朋友圈回复",
            &["name", "peer_id", "post_id", "content"],
        ),
        TagRule::new(
            RecordType::Product,
            "商品",
            &["name", "category", "description", "price"],
        ),
        TagRule::new(
            RecordType::Task,
            "任务",
            &["task_id", "name", "description", "publisher", "reward"],
        ),
        TagRule::new(RecordType::LiveUpdate, "直播", &["live_type", "content"]),
        TagRule::new(
            RecordType::BackpackItem,
            "背包",
            &["name", "item_type", "description", "count"],
        ),
        TagRule::new(RecordType::FriendLink, "好友id", &["name", "numeric_id"]),
    ]
}

/// A single structured unit extracted from generated text. Immutable once
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub record_type: RecordType,
    pub raw_span: String,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_matches_tag_table() {
        assert_eq!(RecordType::PrivateMessage.arity(), 4);
        assert_eq!(RecordType::GroupMessage.arity(), 4);
        assert_eq!(RecordType::MomentsPost.arity(), 4);
        assert_eq!(RecordType::MomentsReply.arity(), 4);
        assert_eq!(RecordType::Product.arity(), 4);
        assert_eq!(RecordType::Task.arity(), 5);
        assert_eq!(RecordType::LiveUpdate.arity(), 2);
        assert_eq!(RecordType::BackpackItem.arity(), 4);
        assert_eq!(RecordType::FriendLink.arity(), 2);
    }

    #[test]
    fn grammar_covers_every_record_type_once() {
        let grammar = default_grammar();
        assert_eq!(grammar.len(), RecordType::ALL.len());
        for (rule, expected) in grammar.iter().zip(RecordType::ALL) {
            assert_eq!(rule.record_type, expected);
        }
    }

    #[test]
    fn arity_agrees_with_default_grammar() {
        for rule in default_grammar() {
            assert_eq!(rule.fields.len(), rule.record_type.arity(), "{}", rule.tag);
        }
    }

    #[test]
    fn record_type_serializes_snake_case() {
        let json = serde_json::to_string(&RecordType::BackpackItem).unwrap();
        assert_eq!(json, "\"backpack_item\"");
        let back: RecordType = serde_json::from_str("\"friend_link\"").unwrap();
        assert_eq!(back, RecordType::FriendLink);
    }
}
