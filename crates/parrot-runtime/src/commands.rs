//! Text command stage. A recognized command short-circuits the rest of
//! the pipeline; anything else falls through untouched.

use tracing::warn;

use parrot_core::ChatMessage;

use crate::bot::Bot;

const PREFIX: char = '!';

/// Returns true when the message carried a recognized command.
pub async fn handle(bot: &Bot, message: &ChatMessage) -> bool {
    let Some(rest) = message.content.strip_prefix(PREFIX) else {
        return false;
    };
    if bot.is_ignored(
        &message.author,
        &message.channel_id,
        message.guild_id.as_deref(),
    ) {
        return false;
    }

    match rest.split_whitespace().next().unwrap_or("") {
        "ping" => {
            reply(bot, message, "Pong!").await;
            true
        }
        "save" => {
            bot.save_all().await;
            reply(bot, message, "Saved all guild dictionaries.").await;
            true
        }
        "help" => {
            reply(bot, message, "Commands: !ping, !save, !help").await;
            true
        }
        _ => false,
    }
}

async fn reply(bot: &Bot, message: &ChatMessage, text: &str) {
    if let Err(e) = bot.client().send_message(&message.channel_id, text).await {
        warn!(error = %e, "failed to send command reply");
    }
}
