use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parrot_client::{ChatClient, ClientEvent};
use parrot_config::ParrotConfig;
use parrot_core::{ChatMessage, ChatUser, Guild};
use parrot_store::GuildStore;

use crate::registry::InstanceRegistry;
use crate::{answerer, commands, learner, reaction};

/// One live agent session: a chat connection, its configuration, and a
/// persisted store per guild it can see.
///
/// All events (ready, message, guild-joined) and the autosave tick are
/// dispatched on a single spawned task, so handlers run to completion
/// without preemption from other events of the same Bot.
pub struct Bot {
    id: Uuid,
    client: Arc<dyn ChatClient>,
    config: ParrotConfig,
    registry: Arc<InstanceRegistry>,
    stores: TokioMutex<HashMap<String, GuildStore>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Bot {
    /// Create a Bot and register it with `registry`.
    pub fn new(
        client: Arc<dyn ChatClient>,
        config: ParrotConfig,
        registry: Arc<InstanceRegistry>,
    ) -> Arc<Self> {
        let bot = Arc::new(Self {
            id: Uuid::new_v4(),
            client,
            config,
            registry: Arc::clone(&registry),
            stores: TokioMutex::new(HashMap::new()),
            shutdown_tx: Mutex::new(None),
            event_loop: Mutex::new(None),
        });
        registry.register(Arc::clone(&bot));
        bot
    }

    pub fn instance_id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ParrotConfig {
        &self.config
    }

    pub fn client(&self) -> &dyn ChatClient {
        self.client.as_ref()
    }

    /// Shared client handle for stages that spawn background work.
    pub(crate) fn client_handle(&self) -> Arc<dyn ChatClient> {
        Arc::clone(&self.client)
    }

    /// Start the session.
    ///
    /// Order: the pipeline stages are ready at construction; the client
    /// connection is initiated (its events buffer in the channel); then
    /// the event loop is spawned with the autosave interval armed. A
    /// login failure is logged and leaves the Bot in a degraded started
    /// state: autosave keeps ticking, no events ever arrive.
    pub async fn start(self: Arc<Self>) {
        info!(instance = %self.id, "starting session");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let events = match self.client.start().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                error!(error = %e, "failed to start client connection — running degraded");
                None
            }
        };

        let handle = tokio::spawn(Arc::clone(&self).run_event_loop(events, shutdown_rx));
        *self.event_loop.lock() = Some(handle);
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut events: Option<mpsc::Receiver<ClientEvent>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let period =
            std::time::Duration::from_secs(self.config.bot.autosave_period_secs.max(1));
        let mut autosave = tokio::time::interval(period);
        autosave.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = autosave.tick() => {
                    debug!(instance = %self.id, "autosave");
                    self.save_all().await;
                }
                event = next_event(&mut events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!(instance = %self.id, "client event stream ended");
                        events = None;
                    }
                }
            }
        }
        debug!(instance = %self.id, "event loop stopped");
    }

    async fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Ready => self.on_ready().await,
            ClientEvent::Message(message) => self.on_message(&message).await,
            ClientEvent::GuildJoined(guild) => self.on_guild_joined(&guild).await,
            ClientEvent::Disconnected(reason) => {
                warn!(reason = ?reason, "connection lost");
            }
        }
    }

    /// Connection-ready: load a store for every known guild, then set
    /// the presence text if one is configured.
    pub async fn on_ready(&self) {
        let guilds = self.client.guilds();
        info!(guilds = guilds.len(), "connected");
        for guild in &guilds {
            info!(guild = %guild.name, id = %guild.id, "loading guild store");
            self.load_store(guild).await;
        }
        if let Some(activity) = &self.config.bot.activity
            && let Err(e) = self.client.set_presence(activity).await
        {
            warn!(error = %e, "failed to set presence");
        }
    }

    /// Inbound message: run the pipeline stages in their fixed order.
    /// A handled command skips everything else; the remaining stages
    /// run unconditionally and their results gate nothing.
    pub async fn on_message(&self, message: &ChatMessage) {
        debug!(
            channel = %message.channel_id,
            author = %message.author.name,
            content = %message.content,
            "message received"
        );
        if commands::handle(self, message).await {
            debug!("message handled by command stage");
            return;
        }
        let answered = answerer::apply(self, message).await;
        let learned = learner::apply(self, message).await;
        let reacted = reaction::apply(self, message).await;
        debug!(answered, learned, reacted, "pipeline complete");
    }

    pub async fn on_guild_joined(&self, guild: &Guild) {
        info!(guild = %guild.name, id = %guild.id, "joined guild");
        self.load_store(guild).await;
    }

    /// Construct and initialize the store for a guild, replacing any
    /// in-memory store already held for that id. Existing on-disk data
    /// is loaded, never re-created, and the identity sidecar is written
    /// only when absent.
    pub async fn load_store(&self, guild: &Guild) {
        let mut store = GuildStore::new(&self.config.bot.storage_dir, &guild.id);
        if let Err(e) = store.init() {
            error!(guild = %guild.id, error = %e, "failed to initialize guild store");
            return;
        }
        write_info_file(&store, guild);
        self.stores.lock().await.insert(guild.id.clone(), store);
    }

    /// True when the author is the bot itself (always suppressed) or is
    /// on the ignore list resolved for this channel/guild.
    pub fn is_ignored(&self, user: &ChatUser, channel_id: &str, guild_id: Option<&str>) -> bool {
        if self.client.current_user_id().as_deref() == Some(user.id.as_str()) {
            return true;
        }
        self.config.is_ignored(&user.id, channel_id, guild_id)
    }

    /// Save every loaded store. Failures are logged per guild and never
    /// stop the remaining saves.
    pub async fn save_all(&self) {
        let stores = self.stores.lock().await;
        for (guild_id, store) in stores.iter() {
            if let Err(e) = store.save() {
                warn!(guild = %guild_id, error = %e, "failed to save guild store");
            }
        }
    }

    /// Run `f` against the loaded store for `guild_id`, if any.
    pub async fn with_store<R>(
        &self,
        guild_id: &str,
        f: impl FnOnce(&mut GuildStore) -> R,
    ) -> Option<R> {
        self.stores.lock().await.get_mut(guild_id).map(f)
    }

    pub async fn store_count(&self) -> usize {
        self.stores.lock().await.len()
    }

    /// Tear the session down: stop the event loop (which cancels the
    /// autosave timer exactly once; a never-started loop is a no-op),
    /// close the connection, persist every store best-effort, then
    /// deregister.
    ///
    /// # Panics
    ///
    /// Panics when this instance is no longer registered: destroying
    /// the same Bot twice is a contract violation.
    pub async fn destroy(&self) {
        info!(instance = %self.id, "destroy: stopping event loop");
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!(instance = %self.id, "destroy: closing connection");
        if let Err(e) = self.client.stop().await {
            warn!(error = %e, "error closing connection");
        }

        info!(instance = %self.id, "destroy: saving guild stores");
        self.save_all().await;

        info!(instance = %self.id, "destroy: deregistering");
        assert!(
            self.registry.deregister(self.id),
            "instance {} was not registered — destroyed twice?",
            self.id
        );
        info!(instance = %self.id, "destroy: done");
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ClientEvent>>) -> Option<ClientEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Write the `<guild_id>.txt` identity sidecar if it doesn't exist yet.
/// Best-effort metadata for humans browsing the storage directory; no
/// read path depends on it.
fn write_info_file(store: &GuildStore, guild: &Guild) {
    let path = store.info_path();
    if path.exists() {
        return;
    }
    if let Err(e) = std::fs::write(&path, format!("{}\r\n{}", guild.name, guild.id)) {
        warn!(guild = %guild.id, error = %e, "failed to write guild info file");
    }
}
