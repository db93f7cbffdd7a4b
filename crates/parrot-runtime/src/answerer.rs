//! Answer stage: reply with a learned line when the bot is mentioned.

use tracing::{debug, warn};

use parrot_core::ChatMessage;

use crate::bot::Bot;

/// Returns true when a reply was attempted.
pub async fn apply(bot: &Bot, message: &ChatMessage) -> bool {
    let guild_id = message.guild_id.as_deref();
    if bot.is_ignored(&message.author, &message.channel_id, guild_id) {
        return false;
    }
    if !bot
        .config()
        .behavior(&message.channel_id, guild_id)
        .answering
    {
        return false;
    }
    if !mentioned(bot, message) {
        return false;
    }
    let Some(guild_id) = guild_id else {
        return false;
    };

    let line = bot
        .with_store(guild_id, |store| {
            store.line_matching(&message.content).map(str::to_string)
        })
        .await
        .flatten();
    let Some(line) = line else {
        debug!(guild = %guild_id, "nothing learned yet, staying quiet");
        return false;
    };

    if let Err(e) = bot.client().send_message(&message.channel_id, &line).await {
        warn!(error = %e, "failed to send reply");
    }
    true
}

/// Whether the message explicitly mentions the bot (`<@id>` form).
fn mentioned(bot: &Bot, message: &ChatMessage) -> bool {
    match bot.client().current_user_id() {
        Some(id) => message.content.contains(&format!("<@{id}>")),
        None => false,
    }
}
