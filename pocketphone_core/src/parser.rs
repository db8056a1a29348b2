//! Record parser: turns raw generated text into typed records.
//!
//! Each grammar rule is scanned independently over the whole input. Output
//! is grouped by rule (declaration order), and within a rule matches keep
//! their left-to-right order. Field captures exclude `[` and `]`, so a
//! malformed tag can never swallow the tag that follows it.

use regex_lite::Regex;
use std::collections::BTreeMap;

use crate::records::{default_grammar, Record, RecordType, TagRule};

/// Character class for a single field capture.
const FIELD_CAPTURE: &str = r"([^\[\]]*?)";

struct CompiledRule {
    rule: TagRule,
    pattern: Regex,
}

/// Stateless parser over a pluggable grammar table.
pub struct RecordParser {
    rules: Vec<CompiledRule>,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::with_grammar(default_grammar())
    }

    /// Build a parser over a custom grammar. Rules whose pattern fails to
    /// compile are skipped with a warning.
    pub fn with_grammar(grammar: Vec<TagRule>) -> Self {
        let mut rules = Vec::with_capacity(grammar.len());
        for rule in grammar {
            let source = rule_pattern(&rule);
            match Regex::new(&source) {
                Ok(pattern) => rules.push(CompiledRule { rule, pattern }),
                Err(e) => {
                    tracing::warn!(
                        "Skipping tag rule '{}' ({}): {}",
                        rule.tag,
                        rule.record_type,
                        e
                    );
                }
            }
        }
        Self { rules }
    }

    pub fn grammar(&self) -> impl Iterator<Item = &TagRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Extract every record from `text`. Never fails; text without
    /// well-formed tags yields an empty vector.
    pub fn parse(&self, text: &str) -> Vec<Record> {
        let mut records = Vec::new();

        for compiled in &self.rules {
            for caps in compiled.pattern.captures_iter(text) {
                let raw_span = caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                let fields: BTreeMap<String, String> = compiled
                    .rule
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                        (name.clone(), value.to_string())
                    })
                    .collect();

                records.push(Record {
                    record_type: compiled.rule.record_type,
                    raw_span,
                    fields,
                });
            }
        }

        if !records.is_empty() {
            tracing::debug!("Parsed {} record(s) from generated text", records.len());
        }
        records
    }

    /// Parse and keep only the given record kinds.
    pub fn parse_filtered(&self, text: &str, wanted: &[RecordType]) -> Vec<Record> {
        self.parse(text)
            .into_iter()
            .filter(|record| wanted.contains(&record.record_type))
            .collect()
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_pattern(rule: &TagRule) -> String {
    let mut pattern = format!(r"\[{}", regex_lite::escape(&rule.tag));
    for _ in &rule.fields {
        pattern.push_str(r"\|");
        pattern.push_str(FIELD_CAPTURE);
    }
    pattern.push_str(r"\]");
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_private_message() {
        let parser = RecordParser::new();
        let records = parser.parse("[对方消息|秦倦|500002|文字|你好]");

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.record_type, RecordType::PrivateMessage);
        assert_eq!(record.raw_span, "[对方消息|秦倦|500002|文字|你好]");
        assert_eq!(record.field("name"), Some("秦倦"));
        assert_eq!(record.field("peer_id"), Some("500002"));
        assert_eq!(record.field("msg_type"), Some("文字"));
        assert_eq!(record.field("content"), Some("你好"));
    }

    #[test]
    fn plain_text_yields_nothing() {
        let parser = RecordParser::new();
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("just some narration, no tags").is_empty());
        assert!(parser.parse("[对方消息|only|two]").is_empty());
    }

    #[test]
    fn every_record_has_its_fixed_arity() {
        let parser = RecordParser::new();
        let text = "开场 [任务|T1|送信|把信送到|村长|100金] \
                    [直播|弹幕|好看] [好友id|林|123456] \
                    [商品|奶茶|饮料|很甜|12] [背包|药水|消耗品|回血|3] \
                    [群聊消息|g1|阿明|文字|大家好] [朋友圈|阿明|9|101|今天下雨] \
                    [朋友圈回复|小红|8|101|撑伞] [对方消息|秦倦|500002|语音|晚安]";
        let records = parser.parse(text);

        assert_eq!(records.len(), 9);
        for record in &records {
            assert_eq!(record.fields.len(), record.record_type.arity());
        }
    }

    #[test]
    fn output_is_grouped_by_declaration_order_not_position() {
        let parser = RecordParser::new();
        let text = "[直播|开播|hi] [对方消息|a|1|文字|x] [直播|弹幕|yo] [对方消息|b|2|文字|y]";
        let records = parser.parse(text);

        let kinds: Vec<RecordType> = records.iter().map(|r| r.record_type).collect();
        assert_eq!(
            kinds,
            vec![
                RecordType::PrivateMessage,
                RecordType::PrivateMessage,
                RecordType::LiveUpdate,
                RecordType::LiveUpdate,
            ]
        );
        assert_eq!(records[0].field("name"), Some("a"));
        assert_eq!(records[1].field("name"), Some("b"));
        assert_eq!(records[2].field("content"), Some("hi"));
        assert_eq!(records[3].field("content"), Some("yo"));
    }

    #[test]
    fn fields_never_cross_a_closing_bracket() {
        let parser = RecordParser::new();
        // Three fields then a close: must not borrow pipes from the live tag.
        let records = parser.parse("[对方消息|a|b|c] [直播|x|y]");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::LiveUpdate);
        assert_eq!(records[0].field("live_type"), Some("x"));
    }

    #[test]
    fn moments_tag_does_not_match_reply_tag() {
        let parser = RecordParser::new();
        let records = parser.parse("[朋友圈回复|小红|8|101|撑伞]");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::MomentsReply);
        assert_eq!(records[0].field("post_id"), Some("101"));
    }

    #[test]
    fn custom_grammar_is_pluggable() {
        let parser = RecordParser::with_grammar(vec![TagRule::new(
            RecordType::FriendLink,
            "friend",
            &["name", "numeric_id"],
        )]);
        let records = parser.parse("[friend|Lin|42] [好友id|林|7]");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("numeric_id"), Some("42"));
    }

    #[test]
    fn parse_filtered_keeps_only_wanted_kinds() {
        let parser = RecordParser::new();
        let text = "[直播|开播|hi] [商品|奶茶|饮料|很甜|12]";
        let records = parser.parse_filtered(text, &[RecordType::Product]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::Product);
    }
}
