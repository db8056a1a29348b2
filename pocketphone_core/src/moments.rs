//! Housekeeping for moments posts stored inline in chat history as
//! `[w|<post id>|...]` lines. Deleting a post rewrites its prefix to
//! `[已删除|` so the history stays intact but the post no longer renders.

use anyhow::{Context, Result};
use regex_lite::Regex;

use crate::chat::{ChatDataProvider, ChatMessage};

const POST_PREFIX: &str = "[w|";
const DELETED_PREFIX: &str = "[已删除|";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MomentsPostRef {
    pub post_id: u64,
    pub message_index: usize,
    pub full_match: String,
}

/// Every moments post line in `messages`, in history order.
pub fn find_moments_posts(messages: &[ChatMessage]) -> Vec<MomentsPostRef> {
    let Ok(line_start) = Regex::new(r"(?m)^\[w\|(\d+)\|") else {
        return Vec::new();
    };

    let mut posts = Vec::new();
    for message in messages {
        for caps in line_start.captures_iter(&message.text) {
            let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Ok(post_id) = id.as_str().parse::<u64>() else {
                continue;
            };
            let rest = &message.text[whole.start()..];
            let full_match = match rest.find(']') {
                Some(end) => &rest[..=end],
                None => rest,
            };
            posts.push(MomentsPostRef {
                post_id,
                message_index: message.index,
                full_match: full_match.to_string(),
            });
        }
    }
    posts
}

/// Mark the `count` oldest posts (lowest ids) as deleted and save the chat.
/// Returns how many posts were rewritten.
pub async fn delete_oldest_moments_posts(
    provider: &dyn ChatDataProvider,
    count: usize,
) -> Result<usize> {
    let messages = provider.current_messages();
    let mut posts = find_moments_posts(&messages);
    if posts.is_empty() || count == 0 {
        return Ok(0);
    }

    posts.sort_by_key(|post| post.post_id);
    posts.truncate(count);

    let mut rewritten = 0;
    for post in &posts {
        // Re-read the current text so several posts in one message all apply.
        let current = provider
            .current_messages()
            .into_iter()
            .find(|m| m.index == post.message_index)
            .map(|m| m.text)
            .unwrap_or_default();
        if !current.contains(&post.full_match) {
            continue;
        }

        let deleted = post.full_match.replacen(POST_PREFIX, DELETED_PREFIX, 1);
        let updated = current.replacen(&post.full_match, &deleted, 1);
        provider
            .replace_message_text(post.message_index, &updated)
            .with_context(|| format!("Failed to rewrite message #{}", post.message_index))?;
        rewritten += 1;
    }

    if rewritten > 0 {
        provider.save_chat().await.context("Failed to save chat")?;
        tracing::info!("Deleted {} moments post(s)", rewritten);
    }
    Ok(rewritten)
}
