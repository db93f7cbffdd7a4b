//! Learning stage: ingest message sentences into the guild dictionary.
//! Persistence is left to the autosave job and shutdown save.

use tracing::debug;

use parrot_core::ChatMessage;

use crate::bot::Bot;

/// Returns true when at least one sentence was ingested.
pub async fn apply(bot: &Bot, message: &ChatMessage) -> bool {
    let guild_id = message.guild_id.as_deref();
    if bot.is_ignored(&message.author, &message.channel_id, guild_id) {
        return false;
    }
    if !bot.config().behavior(&message.channel_id, guild_id).learning {
        return false;
    }
    // Command input is never learned.
    if message.content.starts_with('!') {
        return false;
    }
    // DMs have no guild store.
    let Some(guild_id) = guild_id else {
        return false;
    };

    let sentences = split_sentences(&message.content);
    if sentences.is_empty() {
        return false;
    }

    let learned = bot
        .with_store(guild_id, |store| {
            for sentence in &sentences {
                store.learn(sentence);
            }
            sentences.len()
        })
        .await
        .unwrap_or(0);
    if learned > 0 {
        debug!(guild = %guild_id, sentences = learned, "learned");
    }
    learned > 0
}

fn split_sentences(content: &str) -> Vec<String> {
    content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
