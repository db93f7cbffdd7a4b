use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration, mapped from `parrot.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParrotConfig {
    pub bot: BotConfig,
    /// Baseline behavior, used wherever no override applies.
    pub behavior: BehaviorConfig,
    /// Per-guild behavior overrides, keyed by guild id.
    pub guilds: HashMap<String, BehaviorOverride>,
    /// Per-channel behavior overrides, keyed by channel id.
    /// A channel override wins over the guild override.
    pub channels: HashMap<String, BehaviorOverride>,
    pub logging: LoggingConfig,
}

// ── Bot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot token for the chat platform. Can also be set via PARROT_TOKEN;
    /// the config file takes priority.
    pub token: Option<String>,
    /// Directory holding one data file (plus identity sidecar) per guild.
    pub storage_dir: PathBuf,
    /// Seconds between autosave passes over the loaded guild stores.
    pub autosave_period_secs: u64,
    /// Presence/activity text set after connecting.
    pub activity: Option<String>,
    /// Extra guild ids whose emoji are eligible for reactions everywhere.
    pub global_emoji_guilds: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            storage_dir: PathBuf::from("data"),
            autosave_period_secs: 300,
            activity: None,
            global_emoji_guilds: vec![],
        }
    }
}

// ── Behavior ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Whether the bot rolls for emoji reactions on inbound messages.
    pub reacting: bool,
    /// Reaction trigger rate in percent (0-100). Must be set wherever
    /// `reacting` is enabled.
    pub react_rate: Option<u8>,
    /// Whether the bot replies when addressed.
    pub answering: bool,
    /// Whether the bot ingests messages into the guild dictionary.
    pub learning: bool,
    /// User ids the bot ignores.
    pub ignored_users: Vec<String>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            reacting: false,
            react_rate: None,
            answering: true,
            learning: true,
            ignored_users: vec![],
        }
    }
}

/// A partial behavior table; unset keys fall through to the next scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorOverride {
    pub reacting: Option<bool>,
    pub react_rate: Option<u8>,
    pub answering: Option<bool>,
    pub learning: Option<bool>,
    /// Additional ignored user ids for this scope (additive, not replacing).
    pub ignored_users: Vec<String>,
}

/// Behavior flags resolved for one channel/guild scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Behavior {
    pub reacting: bool,
    pub react_rate: Option<u8>,
    pub answering: bool,
    pub learning: bool,
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Default for root ───────────────────────────────────────────

impl Default for ParrotConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            behavior: BehaviorConfig::default(),
            guilds: HashMap::new(),
            channels: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

// ── Resolution ─────────────────────────────────────────────────

impl ParrotConfig {
    /// Resolve behavior flags for a channel: channel override > guild
    /// override > baseline.
    pub fn behavior(&self, channel_id: &str, guild_id: Option<&str>) -> Behavior {
        let guild = guild_id.and_then(|id| self.guilds.get(id));
        let channel = self.channels.get(channel_id);

        Behavior {
            reacting: channel
                .and_then(|o| o.reacting)
                .or(guild.and_then(|o| o.reacting))
                .unwrap_or(self.behavior.reacting),
            react_rate: channel
                .and_then(|o| o.react_rate)
                .or(guild.and_then(|o| o.react_rate))
                .or(self.behavior.react_rate),
            answering: channel
                .and_then(|o| o.answering)
                .or(guild.and_then(|o| o.answering))
                .unwrap_or(self.behavior.answering),
            learning: channel
                .and_then(|o| o.learning)
                .or(guild.and_then(|o| o.learning))
                .unwrap_or(self.behavior.learning),
        }
    }

    /// True when `user_id` is on the baseline ignore list or on the list
    /// of any scope covering the channel.
    pub fn is_ignored(&self, user_id: &str, channel_id: &str, guild_id: Option<&str>) -> bool {
        if self.behavior.ignored_users.iter().any(|u| u == user_id) {
            return true;
        }
        if let Some(gid) = guild_id
            && let Some(o) = self.guilds.get(gid)
            && o.ignored_users.iter().any(|u| u == user_id)
        {
            return true;
        }
        self.channels
            .get(channel_id)
            .is_some_and(|o| o.ignored_users.iter().any(|u| u == user_id))
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", tag, self.field, self.message)
    }
}

impl ParrotConfig {
    /// Validate the config. Returns all warnings, or `Err` with the
    /// error-severity messages joined when any are present.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.bot.autosave_period_secs == 0 {
            warnings.push(ConfigWarning {
                field: "bot.autosave_period_secs".into(),
                message: "must be at least 1".into(),
                severity: WarningSeverity::Error,
            });
        }

        if self.bot.token.is_none() {
            warnings.push(ConfigWarning {
                field: "bot.token".into(),
                message: "no token set — `parrot start` will fail to log in".into(),
                severity: WarningSeverity::Warning,
            });
        }

        let mut check_rate = |field: String, rate: Option<u8>| {
            if let Some(r) = rate
                && r > 100
            {
                warnings.push(ConfigWarning {
                    field,
                    message: format!("react_rate {r} is out of range (0-100)"),
                    severity: WarningSeverity::Error,
                });
            }
        };
        check_rate("behavior.react_rate".into(), self.behavior.react_rate);
        for (id, o) in &self.guilds {
            check_rate(format!("guilds.{id}.react_rate"), o.react_rate);
        }
        for (id, o) in &self.channels {
            check_rate(format!("channels.{id}.react_rate"), o.react_rate);
        }

        if self.behavior.reacting && self.behavior.react_rate.is_none() {
            warnings.push(ConfigWarning {
                field: "behavior.react_rate".into(),
                message: "reacting is enabled without a react_rate — \
                          reaction rolls will panic"
                    .into(),
                severity: WarningSeverity::Warning,
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
            });
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("configuration errors:\n  - {}", errors.join("\n  - ")));
        }

        Ok(warnings)
    }
}
