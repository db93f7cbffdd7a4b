use serde::{Deserialize, Serialize};

/// Unique identifier for a guild (one community/workspace).
pub type GuildId = String;

/// Unique identifier for a channel.
pub type ChannelId = String;

/// Unique identifier for a user.
pub type UserId = String;

/// Unique identifier for a message.
pub type MessageId = String;

/// A user as reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    pub name: String,
    /// Whether the platform marks this account as a bot.
    pub bot: bool,
}

/// A custom emoji belonging to a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: String,
    pub name: String,
    /// Emoji can be disabled (e.g. lost through boost downgrades) while
    /// still listed; only available ones may be used in reactions.
    pub available: bool,
}

/// A guild the bot is a member of, with its emoji list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub emojis: Vec<Emoji>,
}

/// An inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// None for direct messages.
    pub guild_id: Option<GuildId>,
    pub author: ChatUser,
    pub content: String,
}

/// The channel permissions the orchestration layer queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    AddReactions,
    SendMessages,
}
