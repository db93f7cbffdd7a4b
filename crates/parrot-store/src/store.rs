use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use parrot_core::{ParrotError, Result};

/// On-disk document for one guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    /// Learned lines, in insertion order.
    lines: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            lines: vec![],
            updated_at: Utc::now(),
        }
    }
}

/// Persisted per-guild state, backed by `<storage_dir>/<guild_id>.json`.
///
/// The in-memory value is cheap to construct; nothing touches the disk
/// until [`GuildStore::init`] runs. A word index over the learned lines
/// is rebuilt on load and kept current on learn; it is never persisted.
pub struct GuildStore {
    guild_id: String,
    path: PathBuf,
    data: StoreData,
    index: HashMap<String, Vec<usize>>,
}

impl GuildStore {
    pub fn new(storage_dir: &Path, guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            path: storage_dir.join(format!("{guild_id}.json")),
            data: StoreData::default(),
            index: HashMap::new(),
        }
    }

    /// Load the data file if it exists, otherwise create it. Calling
    /// this on an already-initialized path loads the existing content
    /// and never clobbers it.
    pub fn init(&mut self) -> Result<()> {
        if self.path.exists() {
            let raw = fs::read_to_string(&self.path)?;
            self.data = serde_json::from_str(&raw).map_err(|e| ParrotError::Store {
                guild: self.guild_id.clone(),
                reason: format!("corrupt data file {}: {}", self.path.display(), e),
            })?;
            self.rebuild_index();
            info!(
                guild = %self.guild_id,
                lines = self.data.lines.len(),
                "loaded guild store"
            );
        } else {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.save()?;
            info!(guild = %self.guild_id, path = %self.path.display(), "created guild store");
        }
        Ok(())
    }

    /// Persist to disk: write a temp file next to the target, then
    /// rename over it so readers never observe a partial document.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| ParrotError::Store {
            guild: self.guild_id.clone(),
            reason: format!("write {}: {}", tmp.display(), e),
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| ParrotError::Store {
            guild: self.guild_id.clone(),
            reason: format!("rename to {}: {}", self.path.display(), e),
        })?;
        debug!(guild = %self.guild_id, lines = self.data.lines.len(), "saved guild store");
        Ok(())
    }

    /// Ingest one line. Blank input is dropped.
    pub fn learn(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let idx = self.data.lines.len();
        for word in tokenize(line) {
            self.index.entry(word).or_default().push(idx);
        }
        self.data.lines.push(line.to_string());
        self.data.updated_at = Utc::now();
    }

    /// Pick a line sharing a word with `text`, falling back to any
    /// line. Returns None when nothing has been learned yet.
    pub fn line_matching(&self, text: &str) -> Option<&str> {
        let mut rng = rand::rng();
        let matches: Vec<usize> = tokenize(text)
            .filter_map(|word| self.index.get(&word))
            .flatten()
            .copied()
            .collect();
        if let Some(&idx) = matches.choose(&mut rng) {
            return Some(&self.data.lines[idx]);
        }
        self.random_line()
    }

    /// A uniformly random learned line.
    pub fn random_line(&self) -> Option<&str> {
        self.data
            .lines
            .choose(&mut rand::rng())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lines.is_empty()
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the human-readable identity sidecar (`<guild_id>.txt`).
    pub fn info_path(&self) -> PathBuf {
        self.path.with_extension("txt")
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (idx, line) in self.data.lines.iter().enumerate() {
            for word in tokenize(line) {
                self.index.entry(word).or_default().push(idx);
            }
        }
    }
}

/// Lowercased alphanumeric words of a line.
fn tokenize(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}
