use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use parrot_core::{ChatMessage, ChatUser, Emoji, Guild, ParrotError, Permission, Result, UserId};

use crate::adapter::{ChatClient, ClientEvent};

/// Discord Gateway opcodes.
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_PRESENCE_UPDATE: u64 = 3;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

// GUILDS | GUILD_EMOJIS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 3) | (1 << 9) | (1 << 12) | (1 << 15);

/// Close code Discord sends for a bad token.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

pub(crate) const PERM_ADMINISTRATOR: u64 = 1 << 3;
pub(crate) const PERM_ADD_REACTIONS: u64 = 1 << 6;
pub(crate) const PERM_SEND_MESSAGES: u64 = 1 << 11;

fn permission_bit(permission: Permission) -> u64 {
    match permission {
        Permission::AddReactions => PERM_ADD_REACTIONS,
        Permission::SendMessages => PERM_SEND_MESSAGES,
    }
}

/// Everything learned from the gateway about the session.
#[derive(Default)]
struct GatewayCache {
    user_id: Option<String>,
    guilds: HashMap<String, Guild>,
    /// Computed permission bits for the bot, per channel.
    channel_perms: HashMap<String, u64>,
    /// Role id → permission bits, per guild.
    guild_roles: HashMap<String, HashMap<String, u64>>,
    /// The bot's role ids, per guild.
    bot_roles: HashMap<String, Vec<String>>,
    /// Guild ids announced in READY that have not streamed in yet.
    pending: HashSet<String>,
    ready_sent: bool,
}

/// Discord adapter: Gateway WebSocket for events, REST for actions.
///
/// ## Setup
///
/// 1. <https://discord.com/developers/applications> → create application
/// 2. Bot section → copy token, enable the Message Content intent
/// 3. Invite with the Add Reactions + Send Messages permissions
/// 4. Put the token under `[bot]` in parrot.toml
pub struct DiscordClient {
    rest: Arc<Rest>,
    connected: Arc<AtomicBool>,
    cache: Arc<RwLock<GatewayCache>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    presence_tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self {
            rest: Arc::new(Rest {
                client: reqwest::Client::new(),
                token,
            }),
            connected: Arc::new(AtomicBool::new(false)),
            cache: Arc::new(RwLock::new(GatewayCache::default())),
            shutdown_tx: Mutex::new(None),
            presence_tx: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn start(&self) -> Result<mpsc::Receiver<ClientEvent>> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (presence_tx, presence_rx) = mpsc::channel(8);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.presence_tx.lock() = Some(presence_tx);

        let rest = Arc::clone(&self.rest);
        let cache = Arc::clone(&self.cache);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            gateway_loop(rest, cache, event_tx, shutdown_rx, presence_rx, connected).await;
        });

        Ok(event_rx)
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        self.presence_tx.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        info!("discord client stopped");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.cache.read().user_id.clone()
    }

    fn guilds(&self) -> Vec<Guild> {
        self.cache.read().guilds.values().cloned().collect()
    }

    fn guild(&self, guild_id: &str) -> Option<Guild> {
        self.cache.read().guilds.get(guild_id).cloned()
    }

    fn has_permission(&self, channel_id: &str, permission: Permission) -> bool {
        let cache = self.cache.read();
        match cache.channel_perms.get(channel_id) {
            Some(bits) => {
                bits & PERM_ADMINISTRATOR != 0 || bits & permission_bit(permission) != 0
            }
            None => false,
        }
    }

    async fn set_presence(&self, text: &str) -> Result<()> {
        let tx = self.presence_tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(text.to_string())
                .await
                .map_err(|_| ParrotError::NotConnected),
            None => Err(ParrotError::NotConnected),
        }
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
        self.rest.post_message(channel_id, text).await
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &Emoji,
    ) -> Result<()> {
        self.rest.put_reaction(channel_id, message_id, emoji).await
    }
}

// ── REST ───────────────────────────────────────────────────────

struct Rest {
    client: reqwest::Client,
    token: String,
}

impl Rest {
    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages");
        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| ParrotError::Client(format!("http error: {e}")))?;
        check_status(resp).await
    }

    async fn put_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &Emoji,
    ) -> Result<()> {
        let url = format!(
            "{DISCORD_API_BASE}/channels/{channel_id}/messages/{message_id}/reactions/{}/@me",
            encode_emoji(emoji)
        );
        let resp = self
            .client
            .put(&url)
            .header("Authorization", self.auth())
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| ParrotError::Client(format!("http error: {e}")))?;
        check_status(resp).await
    }

    /// The bot's role ids in a guild, for permission computation.
    async fn current_member_roles(&self, guild_id: &str) -> Option<Vec<String>> {
        let url = format!("{DISCORD_API_BASE}/users/@me/guilds/{guild_id}/member");
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let data: Value = resp.json().await.ok()?;
        Some(
            data["roles"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|r| r.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        )
    }
}

async fn check_status(resp: reqwest::Response) -> Result<()> {
    if resp.status().is_success() {
        return Ok(());
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ParrotError::Client(format!("discord api {status}: {body}")))
}

/// `name:id` with the separator percent-encoded for the reaction URL.
fn encode_emoji(emoji: &Emoji) -> String {
    format!("{}%3A{}", emoji.name, emoji.id)
}

// ── Gateway ────────────────────────────────────────────────────

/// Connects to the Gateway, identifies, heartbeats, and dispatches
/// events into the cache and the consumer channel. Reconnects with
/// exponential backoff; a bad token ends the loop for good.
async fn gateway_loop(
    rest: Arc<Rest>,
    cache: Arc<RwLock<GatewayCache>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut presence_rx: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = 1u64;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        info!("discord: connecting to gateway");
        let ws_stream = match tokio_tungstenite::connect_async(DISCORD_GATEWAY_URL).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(error = %e, "discord gateway connection failed");
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(60);
                continue;
            }
        };

        backoff = 1;
        let (mut write, mut read) = ws_stream.split();

        // HELLO carries the heartbeat interval.
        let heartbeat_interval = match read.next().await {
            Some(Ok(msg)) => {
                let payload: Value =
                    serde_json::from_str(msg.to_text().unwrap_or("{}")).unwrap_or_default();
                if payload["op"].as_u64() == Some(OP_HELLO) {
                    payload["d"]["heartbeat_interval"].as_u64().unwrap_or(41250)
                } else {
                    warn!("discord: expected HELLO, got op={}", payload["op"]);
                    41250
                }
            }
            _ => {
                error!("discord: no HELLO received");
                continue;
            }
        };

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": rest.token.as_str(),
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "parrot",
                    "device": "parrot"
                }
            }
        });
        if let Err(e) = write
            .send(tokio_tungstenite::tungstenite::Message::Text(
                identify.to_string().into(),
            ))
            .await
        {
            error!(error = %e, "discord: failed to send IDENTIFY");
            continue;
        }

        connected.store(true, Ordering::SeqCst);
        info!(heartbeat_ms = heartbeat_interval, "discord gateway connected");

        let mut sequence: Option<u64> = None;
        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
        heartbeat.tick().await; // consume the immediate first tick
        let mut fatal = false;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("discord: shutdown signal received");
                        let _ = write.close().await;
                        return;
                    }
                }
                _ = heartbeat.tick() => {
                    let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                    if let Err(e) = write.send(
                        tokio_tungstenite::tungstenite::Message::Text(hb.to_string().into())
                    ).await {
                        warn!(error = %e, "discord: heartbeat send failed");
                        break;
                    }
                }
                Some(activity) = presence_rx.recv() => {
                    let update = json!({
                        "op": OP_PRESENCE_UPDATE,
                        "d": {
                            "since": null,
                            "activities": [{ "name": activity, "type": 0 }],
                            "status": "online",
                            "afk": false
                        }
                    });
                    if let Err(e) = write.send(
                        tokio_tungstenite::tungstenite::Message::Text(update.to_string().into())
                    ).await {
                        warn!(error = %e, "discord: presence update failed");
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(ws_msg)) => {
                            if let tokio_tungstenite::tungstenite::Message::Close(frame) = &ws_msg {
                                if let Some(frame) = frame
                                    && u16::from(frame.code) == CLOSE_AUTHENTICATION_FAILED
                                {
                                    error!("discord: authentication failed — check the bot token");
                                    fatal = true;
                                } else {
                                    info!("discord: server closed connection");
                                }
                                break;
                            }
                            let Ok(text) = ws_msg.to_text() else { continue };
                            let Ok(payload) = serde_json::from_str::<Value>(text) else { continue };

                            if let Some(s) = payload["s"].as_u64() {
                                sequence = Some(s);
                            }
                            match payload["op"].as_u64().unwrap_or(999) {
                                OP_DISPATCH => {
                                    let event_name = payload["t"].as_str().unwrap_or("");
                                    handle_dispatch(
                                        event_name, &payload["d"],
                                        &rest, &cache, &event_tx,
                                    ).await;
                                }
                                OP_HEARTBEAT_ACK => {
                                    debug!("discord: heartbeat ACK");
                                }
                                OP_HEARTBEAT => {
                                    let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                                    let _ = write.send(
                                        tokio_tungstenite::tungstenite::Message::Text(hb.to_string().into())
                                    ).await;
                                }
                                op => {
                                    debug!(op, "discord: unhandled opcode");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "discord websocket error");
                            break;
                        }
                        None => {
                            info!("discord: websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        let reason = if fatal {
            "authentication failed"
        } else {
            "gateway connection lost"
        };
        let _ = event_tx
            .send(ClientEvent::Disconnected(Some(reason.into())))
            .await;

        if fatal || *shutdown_rx.borrow() {
            break;
        }

        info!(retry_in = backoff, "discord: reconnecting");
        tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(60);
    }
}

/// Handle one DISPATCH (op 0) event.
async fn handle_dispatch(
    event_name: &str,
    data: &Value,
    rest: &Arc<Rest>,
    cache: &Arc<RwLock<GatewayCache>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    match event_name {
        "READY" => {
            let user_id = data["user"]["id"].as_str().unwrap_or("").to_string();
            let guild_ids: HashSet<String> = data["guilds"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|g| g["id"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            info!(bot_id = %user_id, guilds = guild_ids.len(), "discord session ready");

            let emit_ready = {
                let mut c = cache.write();
                c.user_id = Some(user_id);
                if c.ready_sent {
                    false // resumed session; the roster is already known
                } else {
                    c.pending = guild_ids;
                    if c.pending.is_empty() {
                        c.ready_sent = true;
                        true
                    } else {
                        false
                    }
                }
            };
            if emit_ready {
                let _ = event_tx.send(ClientEvent::Ready).await;
            }
        }
        "GUILD_CREATE" => {
            handle_guild_create(data, rest, cache, event_tx).await;
        }
        "GUILD_DELETE" => {
            if let Some(guild_id) = data["id"].as_str() {
                let mut c = cache.write();
                c.guilds.remove(guild_id);
                c.guild_roles.remove(guild_id);
                c.bot_roles.remove(guild_id);
                info!(guild = %guild_id, "removed from guild");
            }
        }
        "GUILD_EMOJIS_UPDATE" => {
            let Some(guild_id) = data["guild_id"].as_str() else { return };
            let emojis = parse_emojis(&data["emojis"]);
            if let Some(guild) = cache.write().guilds.get_mut(guild_id) {
                guild.emojis = emojis;
            }
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            let (Some(channel_id), Some(guild_id)) =
                (data["id"].as_str(), data["guild_id"].as_str())
            else {
                return;
            };
            let mut c = cache.write();
            let Some(roles) = c.guild_roles.get(guild_id) else { return };
            let bot_roles = c.bot_roles.get(guild_id).cloned().unwrap_or_default();
            let bot_id = c.user_id.clone().unwrap_or_default();
            let base = base_permissions(guild_id, roles, &bot_roles);
            let overwrites = parse_overwrites(&data["permission_overwrites"]);
            let perms = apply_overwrites(base, &overwrites, guild_id, &bot_id, &bot_roles);
            c.channel_perms.insert(channel_id.to_string(), perms);
        }
        "CHANNEL_DELETE" => {
            if let Some(channel_id) = data["id"].as_str() {
                cache.write().channel_perms.remove(channel_id);
            }
        }
        "MESSAGE_CREATE" => {
            let message = ChatMessage {
                id: data["id"].as_str().unwrap_or("").to_string(),
                channel_id: data["channel_id"].as_str().unwrap_or("").to_string(),
                guild_id: data["guild_id"].as_str().map(String::from),
                author: ChatUser {
                    id: data["author"]["id"].as_str().unwrap_or("").to_string(),
                    name: data["author"]["username"]
                        .as_str()
                        .unwrap_or("unknown")
                        .to_string(),
                    bot: data["author"]["bot"].as_bool().unwrap_or(false),
                },
                content: data["content"].as_str().unwrap_or("").to_string(),
            };
            if event_tx.send(ClientEvent::Message(message)).await.is_err() {
                warn!("discord: event channel closed");
            }
        }
        _ => {
            debug!(event = %event_name, "discord: unhandled dispatch event");
        }
    }
}

/// A GUILD_CREATE both fills the roster during startup and signals a
/// join afterwards. Caches the guild, its roles, and the computed
/// per-channel permissions for the bot; emits Ready once the initial
/// roster is complete, GuildJoined for guilds arriving later.
async fn handle_guild_create(
    data: &Value,
    rest: &Arc<Rest>,
    cache: &Arc<RwLock<GatewayCache>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    let Some(guild_id) = data["id"].as_str() else { return };
    let guild = Guild {
        id: guild_id.to_string(),
        name: data["name"].as_str().unwrap_or("unknown").to_string(),
        emojis: parse_emojis(&data["emojis"]),
    };

    let roles: HashMap<String, u64> = data["roles"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    r["id"]
                        .as_str()
                        .map(|id| (id.to_string(), parse_snowflake_u64(&r["permissions"])))
                })
                .collect()
        })
        .unwrap_or_default();

    let bot_id = cache.read().user_id.clone().unwrap_or_default();

    // The payload usually carries the bot's own member; fall back to REST.
    let bot_roles = member_roles_from_payload(data, &bot_id);
    let bot_roles = match bot_roles {
        Some(r) => r,
        None => rest.current_member_roles(guild_id).await.unwrap_or_default(),
    };

    let base = base_permissions(guild_id, &roles, &bot_roles);
    let mut channel_perms: Vec<(String, u64)> = Vec::new();
    if let Some(channels) = data["channels"].as_array() {
        for ch in channels {
            let Some(channel_id) = ch["id"].as_str() else { continue };
            let overwrites = parse_overwrites(&ch["permission_overwrites"]);
            let perms = apply_overwrites(base, &overwrites, guild_id, &bot_id, &bot_roles);
            channel_perms.push((channel_id.to_string(), perms));
        }
    }

    let (emit_ready, emit_joined) = {
        let mut c = cache.write();
        let newly_known = !c.guilds.contains_key(guild_id);
        c.guilds.insert(guild_id.to_string(), guild.clone());
        c.guild_roles.insert(guild_id.to_string(), roles);
        c.bot_roles.insert(guild_id.to_string(), bot_roles);
        for (channel_id, perms) in channel_perms {
            c.channel_perms.insert(channel_id, perms);
        }
        let was_pending = c.pending.remove(guild_id);
        if !c.ready_sent && c.pending.is_empty() {
            c.ready_sent = true;
            (true, false)
        } else {
            (false, c.ready_sent && newly_known && !was_pending)
        }
    };

    debug!(guild = %guild.name, id = %guild_id, "cached guild");
    if emit_ready {
        let _ = event_tx.send(ClientEvent::Ready).await;
    }
    if emit_joined {
        let _ = event_tx.send(ClientEvent::GuildJoined(guild)).await;
    }
}

fn parse_emojis(value: &Value) -> Vec<Emoji> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    Some(Emoji {
                        id: e["id"].as_str()?.to_string(),
                        name: e["name"].as_str().unwrap_or("").to_string(),
                        available: e["available"].as_bool().unwrap_or(true),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn member_roles_from_payload(data: &Value, bot_id: &str) -> Option<Vec<String>> {
    let members = data["members"].as_array()?;
    let member = members
        .iter()
        .find(|m| m["user"]["id"].as_str() == Some(bot_id))?;
    Some(
        member["roles"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| r.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
    )
}

// ── Permission math ────────────────────────────────────────────

#[derive(Debug)]
struct Overwrite {
    id: String,
    /// 0 = role, 1 = member.
    kind: u8,
    allow: u64,
    deny: u64,
}

fn parse_overwrites(value: &Value) -> Vec<Overwrite> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|o| {
                    let kind = match &o["type"] {
                        Value::Number(n) => n.as_u64()? as u8,
                        Value::String(s) if s == "role" => 0,
                        Value::String(s) if s == "member" => 1,
                        _ => return None,
                    };
                    Some(Overwrite {
                        id: o["id"].as_str()?.to_string(),
                        kind,
                        allow: parse_snowflake_u64(&o["allow"]),
                        deny: parse_snowflake_u64(&o["deny"]),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Discord serializes permission bitsets as decimal strings.
fn parse_snowflake_u64(value: &Value) -> u64 {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_u64())
        .unwrap_or(0)
}

/// Guild-level permissions: @everyone (the role sharing the guild id)
/// plus each of the bot's roles. Administrator grants everything.
fn base_permissions(guild_id: &str, roles: &HashMap<String, u64>, bot_roles: &[String]) -> u64 {
    let mut perms = roles.get(guild_id).copied().unwrap_or(0);
    for role_id in bot_roles {
        perms |= roles.get(role_id).copied().unwrap_or(0);
    }
    if perms & PERM_ADMINISTRATOR != 0 {
        u64::MAX
    } else {
        perms
    }
}

/// Channel overwrites, applied in the documented order: @everyone,
/// then the member's roles aggregated, then the member itself.
fn apply_overwrites(
    base: u64,
    overwrites: &[Overwrite],
    guild_id: &str,
    bot_id: &str,
    bot_roles: &[String],
) -> u64 {
    if base & PERM_ADMINISTRATOR != 0 {
        return base;
    }
    let mut perms = base;

    if let Some(o) = overwrites.iter().find(|o| o.kind == 0 && o.id == guild_id) {
        perms = (perms & !o.deny) | o.allow;
    }

    let mut allow = 0u64;
    let mut deny = 0u64;
    for o in overwrites
        .iter()
        .filter(|o| o.kind == 0 && o.id != guild_id && bot_roles.contains(&o.id))
    {
        allow |= o.allow;
        deny |= o.deny;
    }
    perms = (perms & !deny) | allow;

    if let Some(o) = overwrites.iter().find(|o| o.kind == 1 && o.id == bot_id) {
        perms = (perms & !o.deny) | o.allow;
    }

    perms
}
