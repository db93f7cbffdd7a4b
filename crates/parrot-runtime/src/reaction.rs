//! Reaction decision engine: a gate of boolean checks ending in a
//! probabilistic roll, followed by one best-effort emoji reaction.

use rand::RngExt;
use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use parrot_core::{ChatMessage, Emoji, Permission};

use crate::bot::Bot;

/// Gate, then act. Returns true iff the act step ran; a false return
/// produced no side effect.
pub async fn apply(bot: &Bot, message: &ChatMessage) -> bool {
    if !should_react(bot, message) {
        return false;
    }
    react(bot, message);
    true
}

/// The reaction gate, evaluated in order with short-circuiting.
fn should_react(bot: &Bot, message: &ChatMessage) -> bool {
    let guild_id = message.guild_id.as_deref();

    if bot.is_ignored(&message.author, &message.channel_id, guild_id) {
        debug!("no reaction: author is ignored");
        return false;
    }

    let behavior = bot.config().behavior(&message.channel_id, guild_id);
    if !behavior.reacting {
        debug!(channel = %message.channel_id, "no reaction: reacting disabled");
        return false;
    }

    // Permission check only applies in guild context; DMs skip it.
    if guild_id.is_some()
        && !bot
            .client()
            .has_permission(&message.channel_id, Permission::AddReactions)
    {
        debug!(channel = %message.channel_id, "no reaction: missing add-reactions permission");
        return false;
    }

    let rate = behavior
        .react_rate
        .expect("react_rate must be configured where reacting is enabled");
    let roll = rand::rng().random::<f64>() * 99.0;
    debug!(rate, roll, "rolling for reaction");
    chance_roll(rate, roll)
}

/// The trigger predicate: a rate strictly above a uniform draw from
/// [0, 99), with 100 always passing. A rate of 0 never fires; rates in
/// between fire with probability `min(rate, 99)/99`. The interval is
/// 99 wide, not 100, and that observable behavior is the contract.
pub fn chance_roll(rate: u8, roll: f64) -> bool {
    rate > 0 && (f64::from(rate) > roll || rate == 100)
}

/// Pick one available emoji from the message's guild plus the configured
/// global emoji guilds, and apply it. An empty candidate set is a silent
/// no-op. The apply call itself is spawned (a slow or failing remote
/// call must not stall the pipeline) and a failure is logged and
/// dropped, never retried.
fn react(bot: &Bot, message: &ChatMessage) {
    let mut guild_ids: Vec<&str> = message.guild_id.as_deref().into_iter().collect();
    for id in &bot.config().bot.global_emoji_guilds {
        if !guild_ids.contains(&id.as_str()) {
            guild_ids.push(id);
        }
    }

    let mut candidates: Vec<Emoji> = Vec::new();
    for id in guild_ids {
        let Some(guild) = bot.client().guild(id) else {
            continue;
        };
        candidates.extend(guild.emojis.into_iter().filter(|e| e.available));
    }

    let Some(emoji) = candidates.choose(&mut rand::rng()).cloned() else {
        return;
    };
    debug!(emoji = %emoji.name, "reacting");

    let client = bot.client_handle();
    let channel_id = message.channel_id.clone();
    let message_id = message.id.clone();
    tokio::spawn(async move {
        if let Err(e) = client.add_reaction(&channel_id, &message_id, &emoji).await {
            warn!(error = %e, "failed to add reaction");
        }
    });
}
