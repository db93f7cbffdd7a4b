use async_trait::async_trait;
use tokio::sync::mpsc;

use parrot_core::{ChatMessage, Emoji, Guild, Permission, Result, UserId};

/// Events delivered by a chat client connection.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection is up and the initial guild roster is cached.
    Ready,
    /// A message arrived in a channel the bot can read. Includes the
    /// bot's own messages; suppressing those is the consumer's call.
    Message(ChatMessage),
    /// The bot was added to a guild after the initial roster.
    GuildJoined(Guild),
    /// The connection dropped. The adapter reconnects on its own unless
    /// the cause is unrecoverable (bad credentials).
    Disconnected(Option<String>),
}

/// Boundary trait for the chat-platform connection.
///
/// Implementations own their I/O: `start` spawns whatever background
/// tasks the transport needs and returns the event receiver right away.
/// A login failure past that point surfaces as log output and a
/// `Disconnected` event, never as a crash; inbound events simply stop.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Begin connecting and return the event receiver for this session.
    async fn start(&self) -> Result<mpsc::Receiver<ClientEvent>>;

    /// Tear the connection down. Safe to call more than once.
    async fn stop(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// The bot's own user id, known once `Ready` has fired.
    fn current_user_id(&self) -> Option<UserId>;

    /// Snapshot of every guild currently cached.
    fn guilds(&self) -> Vec<Guild>;

    fn guild(&self, guild_id: &str) -> Option<Guild>;

    /// Whether the bot holds `permission` in the given channel.
    fn has_permission(&self, channel_id: &str, permission: Permission) -> bool;

    /// Update the presence/activity text.
    async fn set_presence(&self, text: &str) -> Result<()>;

    /// Post a plain text message to a channel.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Attach an emoji reaction to a message.
    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &Emoji)
    -> Result<()>;
}
