#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    use parrot_client::{ChatClient, ClientEvent};
    use parrot_config::ParrotConfig;
    use parrot_core::{ChatMessage, ChatUser, Emoji, Guild, Permission, Result};
    use parrot_runtime::{Bot, InstanceRegistry, reaction};
    use tempfile::TempDir;

    const BOT_ID: &str = "bot-1";

    // ── Mock client ────────────────────────────────────────────

    struct MockClient {
        guilds: Mutex<Vec<Guild>>,
        grant_permissions: bool,
        /// (channel_id, message_id, emoji name)
        reactions: Mutex<Vec<(String, String, String)>>,
        /// (channel_id, text)
        sent: Mutex<Vec<(String, String)>>,
        stopped: AtomicBool,
    }

    impl MockClient {
        fn new(guilds: Vec<Guild>) -> Arc<Self> {
            Arc::new(Self {
                guilds: Mutex::new(guilds),
                grant_permissions: true,
                reactions: Mutex::new(vec![]),
                sent: Mutex::new(vec![]),
                stopped: AtomicBool::new(false),
            })
        }

        fn without_permissions(guilds: Vec<Guild>) -> Arc<Self> {
            Arc::new(Self {
                guilds: Mutex::new(guilds),
                grant_permissions: false,
                reactions: Mutex::new(vec![]),
                sent: Mutex::new(vec![]),
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ChatClient for MockClient {
        async fn start(&self) -> Result<mpsc::Receiver<ClientEvent>> {
            let (_tx, rx) = mpsc::channel(8);
            Ok(rx)
        }

        async fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst)
        }

        fn current_user_id(&self) -> Option<String> {
            Some(BOT_ID.to_string())
        }

        fn guilds(&self) -> Vec<Guild> {
            self.guilds.lock().clone()
        }

        fn guild(&self, guild_id: &str) -> Option<Guild> {
            self.guilds.lock().iter().find(|g| g.id == guild_id).cloned()
        }

        fn has_permission(&self, _channel_id: &str, _permission: Permission) -> bool {
            self.grant_permissions
        }

        async fn set_presence(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
            self.sent.lock().push((channel_id.into(), text.into()));
            Ok(())
        }

        async fn add_reaction(
            &self,
            channel_id: &str,
            message_id: &str,
            emoji: &Emoji,
        ) -> Result<()> {
            self.reactions
                .lock()
                .push((channel_id.into(), message_id.into(), emoji.name.clone()));
            Ok(())
        }
    }

    // ── Helpers ────────────────────────────────────────────────

    fn guild(id: &str, name: &str, emojis: Vec<Emoji>) -> Guild {
        Guild {
            id: id.into(),
            name: name.into(),
            emojis,
        }
    }

    fn emoji(name: &str, available: bool) -> Emoji {
        Emoji {
            id: format!("id-{name}"),
            name: name.into(),
            available,
        }
    }

    fn message(content: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".into(),
            channel_id: "c1".into(),
            guild_id: Some("g1".into()),
            author: ChatUser {
                id: "user-1".into(),
                name: "alice".into(),
                bot: false,
            },
            content: content.into(),
        }
    }

    fn config(dir: &TempDir, react_rate: Option<u8>, reacting: bool) -> ParrotConfig {
        let mut config = ParrotConfig::default();
        config.bot.storage_dir = dir.path().to_path_buf();
        config.behavior.reacting = reacting;
        config.behavior.react_rate = react_rate;
        config
    }

    fn bot_with(client: Arc<MockClient>, config: ParrotConfig) -> Arc<Bot> {
        let registry = Arc::new(InstanceRegistry::new());
        Bot::new(client, config, registry)
    }

    /// Let spawned fire-and-forget work (reaction applies) run.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    // ── Roll semantics ─────────────────────────────────────────

    #[test]
    fn test_roll_zero_rate_never_fires() {
        use rand::RngExt;
        for _ in 0..10_000 {
            let roll = rand::rng().random::<f64>() * 99.0;
            assert!(!reaction::chance_roll(0, roll));
        }
    }

    #[test]
    fn test_roll_full_rate_always_fires() {
        use rand::RngExt;
        for _ in 0..10_000 {
            let roll = rand::rng().random::<f64>() * 99.0;
            assert!(reaction::chance_roll(100, roll));
        }
    }

    #[test]
    fn test_roll_boundaries() {
        assert!(reaction::chance_roll(50, 49.9));
        assert!(!reaction::chance_roll(50, 50.0));
        assert!(reaction::chance_roll(1, 0.5));
        assert!(!reaction::chance_roll(1, 1.0));
        // 100 passes even above the draw ceiling.
        assert!(reaction::chance_roll(100, 98.99));
    }

    /// The draw interval is 99 wide, so the empirical rate for p=50 is
    /// 50/99 ≈ 0.50505, not 0.5.
    #[test]
    fn test_roll_converges_to_rate_over_99() {
        use rand::RngExt;
        let n = 1_000_000u32;
        let mut rng = rand::rng();
        let mut hits = 0u32;
        for _ in 0..n {
            if reaction::chance_roll(50, rng.random::<f64>() * 99.0) {
                hits += 1;
            }
        }
        let empirical = f64::from(hits) / f64::from(n);
        let expected = 50.0 / 99.0;
        assert!(
            (empirical - expected).abs() < 0.003,
            "empirical {empirical} should be near {expected}"
        );
        // And measurably above the naive p/100 mapping.
        assert!(empirical > 0.5025, "empirical {empirical} should exceed 0.5");
    }

    // ── Ignore rules ───────────────────────────────────────────

    #[tokio::test]
    async fn test_own_identity_is_always_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(MockClient::new(vec![]), config(&dir, None, false));
        let own = ChatUser {
            id: BOT_ID.into(),
            name: "parrot".into(),
            bot: true,
        };
        assert!(bot.is_ignored(&own, "c1", Some("g1")));
        assert!(bot.is_ignored(&own, "anywhere", None));
    }

    #[tokio::test]
    async fn test_configured_user_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir, None, false);
        cfg.behavior.ignored_users.push("user-1".into());
        let bot = bot_with(MockClient::new(vec![]), cfg);
        let user = ChatUser {
            id: "user-1".into(),
            name: "alice".into(),
            bot: false,
        };
        let other = ChatUser {
            id: "user-2".into(),
            name: "bob".into(),
            bot: false,
        };
        assert!(bot.is_ignored(&user, "c1", Some("g1")));
        assert!(!bot.is_ignored(&other, "c1", Some("g1")));
    }

    // ── Reaction engine, end to end ────────────────────────────

    #[tokio::test]
    async fn test_reacting_disabled_blocks_any_rate() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), false));
        assert!(!reaction::apply(&bot, &message("hi")).await);
        assert!(client.reactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_apply_reacts_with_the_only_available_emoji() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        assert!(reaction::apply(&bot, &message("hi")).await);
        settle().await;
        let reactions = client.reactions.lock();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0], ("c1".into(), "m1".into(), "party".into()));
    }

    #[tokio::test]
    async fn test_apply_with_unavailable_emoji_is_a_silent_noop() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("gone", false)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        // The gate passes; the act step finds no candidates and does nothing.
        assert!(reaction::apply(&bot, &message("hi")).await);
        settle().await;
        assert!(client.reactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_apply_gated_out_produces_no_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir, Some(100), true);
        cfg.behavior.ignored_users.push("user-1".into());
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), cfg);
        assert!(!reaction::apply(&bot, &message("hi")).await);
        settle().await;
        assert!(client.reactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_permission_blocks_in_guild_context() {
        let dir = tempfile::tempdir().unwrap();
        let client =
            MockClient::without_permissions(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        assert!(!reaction::apply(&bot, &message("hi")).await);
        assert!(client.reactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_permission_check_is_skipped_for_direct_messages() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::without_permissions(vec![]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        let mut dm = message("hi");
        dm.guild_id = None;
        // Gate passes (no permission step for DMs); with no guild and no
        // global emoji sources the act step has no candidates.
        assert!(reaction::apply(&bot, &dm).await);
        settle().await;
        assert!(client.reactions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_global_emoji_guilds_are_deduplicated_sources() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![
            guild("g1", "One", vec![]),
            guild("g2", "Two", vec![emoji("blob", true)]),
        ]);
        let mut cfg = config(&dir, Some(100), true);
        // g1 appears both as message guild and in the global list.
        cfg.bot.global_emoji_guilds = vec!["g1".into(), "g2".into()];
        let bot = bot_with(client.clone(), cfg);
        assert!(reaction::apply(&bot, &message("hi")).await);
        settle().await;
        let reactions = client.reactions.lock();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].2, "blob");
    }

    #[tokio::test]
    #[should_panic(expected = "react_rate must be configured")]
    async fn test_missing_react_rate_is_a_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![])]);
        let bot = bot_with(client, config(&dir, None, true));
        reaction::apply(&bot, &message("hi")).await;
    }

    // ── Guild store lifecycle ──────────────────────────────────

    #[tokio::test]
    async fn test_load_store_twice_preserves_sidecar_and_resets_memory() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let bot = bot_with(client, config(&dir, None, false));

        let first = guild("g1", "Original Name", vec![]);
        bot.load_store(&first).await;
        let sidecar = dir.path().join("g1.txt");
        assert_eq!(
            std::fs::read_to_string(&sidecar).unwrap(),
            "Original Name\r\ng1"
        );

        // Mutate the in-memory store without saving.
        bot.with_store("g1", |store| store.learn("ephemeral"))
            .await
            .unwrap();

        // Loading again replaces the in-memory store from disk but
        // leaves the sidecar as originally written.
        let renamed = guild("g1", "Renamed", vec![]);
        bot.load_store(&renamed).await;
        assert_eq!(bot.store_count().await, 1);
        assert_eq!(
            std::fs::read_to_string(&sidecar).unwrap(),
            "Original Name\r\ng1"
        );
        let len = bot.with_store("g1", |store| store.len()).await.unwrap();
        assert_eq!(len, 0, "unsaved lines must not survive a reload");
    }

    #[tokio::test]
    async fn test_on_ready_loads_every_known_guild() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![
            guild("g1", "One", vec![]),
            guild("g2", "Two", vec![]),
        ]);
        let bot = bot_with(client, config(&dir, None, false));
        bot.on_ready().await;
        assert_eq!(bot.store_count().await, 2);
        assert!(dir.path().join("g1.json").exists());
        assert!(dir.path().join("g2.json").exists());
    }

    #[tokio::test]
    async fn test_save_all_survives_one_failing_store() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let bot = bot_with(client, config(&dir, None, false));
        for (id, name) in [("g1", "One"), ("g2", "Two"), ("g3", "Three")] {
            bot.on_guild_joined(&guild(id, name, vec![])).await;
            bot.with_store(id, |store| store.learn("a learned line"))
                .await
                .unwrap();
        }

        // Sabotage g2: a directory where its data file should go makes
        // the rename in save() fail.
        let g2 = dir.path().join("g2.json");
        std::fs::remove_file(&g2).unwrap();
        std::fs::create_dir(&g2).unwrap();

        bot.save_all().await;

        for id in ["g1", "g3"] {
            let raw = std::fs::read_to_string(dir.path().join(format!("{id}.json"))).unwrap();
            assert!(raw.contains("a learned line"), "{id} should have been saved");
        }
    }

    // ── Pipeline ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_command_short_circuits_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;

        bot.on_message(&message("!ping")).await;
        settle().await;

        let sent = client.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Pong!");
        // Nothing after the command stage ran.
        assert!(client.reactions.lock().is_empty());
        assert_eq!(bot.with_store("g1", |s| s.len()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_prefix_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;

        bot.on_message(&message("!notacommand")).await;
        settle().await;

        // Not handled, not learned (command prefix), but the reaction
        // stage still ran.
        assert!(client.sent.lock().is_empty());
        assert_eq!(bot.with_store("g1", |s| s.len()).await.unwrap(), 0);
        assert_eq!(client.reactions.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_later_stages_run_independently() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![emoji("party", true)])]);
        let bot = bot_with(client.clone(), config(&dir, Some(100), true));
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;

        bot.on_message(&message("hello there friend")).await;
        settle().await;

        // Not a command, not a mention: learner and reaction both acted.
        assert_eq!(bot.with_store("g1", |s| s.len()).await.unwrap(), 1);
        assert_eq!(client.reactions.lock().len(), 1);
        assert!(client.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_answerer_replies_with_a_learned_line_when_mentioned() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![])]);
        let bot = bot_with(client.clone(), config(&dir, None, false));
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;

        bot.on_message(&message("polly wants a cracker")).await;
        bot.on_message(&message(&format!("<@{BOT_ID}> got a cracker?")))
            .await;

        let sent = client.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "polly wants a cracker");
    }

    #[tokio::test]
    async fn test_learning_disabled_skips_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![guild("g1", "One", vec![])]);
        let mut cfg = config(&dir, None, false);
        cfg.behavior.learning = false;
        let bot = bot_with(client, cfg);
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;

        bot.on_message(&message("do not remember this")).await;
        assert_eq!(bot.with_store("g1", |s| s.len()).await.unwrap(), 0);
    }

    // ── Lifecycle & registry ───────────────────────────────────

    #[tokio::test]
    async fn test_start_then_destroy_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let registry = Arc::new(InstanceRegistry::new());
        let bot = Bot::new(client.clone(), config(&dir, None, false), registry.clone());
        bot.clone().start().await;
        bot.destroy().await;
        assert!(registry.is_empty());
        assert!(client.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cleanup_destroys_every_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InstanceRegistry::new());
        let clients: Vec<Arc<MockClient>> =
            (0..3).map(|_| MockClient::new(vec![])).collect();
        for client in &clients {
            Bot::new(client.clone(), config(&dir, None, false), registry.clone());
        }
        assert_eq!(registry.len(), 3);

        registry.cleanup().await;

        assert!(registry.is_empty());
        for client in &clients {
            assert!(client.stopped.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn test_destroy_saves_loaded_stores() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let registry = Arc::new(InstanceRegistry::new());
        let bot = Bot::new(client, config(&dir, None, false), registry);
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;
        bot.with_store("g1", |store| store.learn("final words"))
            .await
            .unwrap();

        bot.destroy().await;

        let raw = std::fs::read_to_string(dir.path().join("g1.json")).unwrap();
        assert!(raw.contains("final words"));
    }

    #[tokio::test]
    #[should_panic(expected = "destroyed twice")]
    async fn test_double_destroy_is_a_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let registry = Arc::new(InstanceRegistry::new());
        let bot = Bot::new(client, config(&dir, None, false), registry);
        bot.destroy().await;
        bot.destroy().await;
    }

    // ── Autosave timer ─────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_autosave_persists_on_the_configured_period() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new(vec![]);
        let registry = Arc::new(InstanceRegistry::new());
        let mut cfg = config(&dir, None, false);
        cfg.bot.autosave_period_secs = 60;
        let bot = Bot::new(client, cfg, registry);
        bot.clone().start().await;
        bot.on_guild_joined(&guild("g1", "One", vec![])).await;
        bot.with_store("g1", |store| store.learn("periodic"))
            .await
            .unwrap();

        // Not yet on disk before the first tick.
        let raw = std::fs::read_to_string(dir.path().join("g1.json")).unwrap();
        assert!(!raw.contains("periodic"));

        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let raw = std::fs::read_to_string(dir.path().join("g1.json")).unwrap();
        assert!(raw.contains("periodic"));

        bot.destroy().await;
    }
}
