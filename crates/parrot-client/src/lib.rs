//! # parrot-client
//!
//! The chat-platform boundary: the [`ChatClient`] trait the runtime is
//! written against, the [`ClientEvent`] stream it consumes, and the
//! Discord adapter implementing both over the Gateway and REST APIs.

pub mod adapter;
pub mod discord;

pub use adapter::{ChatClient, ClientEvent};
pub use discord::DiscordClient;
