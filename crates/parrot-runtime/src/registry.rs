use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};
use tracing::info;
use uuid::Uuid;

use crate::bot::Bot;

/// Process-wide default registry used by the CLI. Tests construct their
/// own isolated registries instead.
static GLOBAL: LazyLock<Arc<InstanceRegistry>> =
    LazyLock::new(|| Arc::new(InstanceRegistry::new()));

pub fn global_registry() -> Arc<InstanceRegistry> {
    Arc::clone(&GLOBAL)
}

/// The set of live [`Bot`] instances. A Bot registers itself on
/// construction and must deregister itself during destroy.
pub struct InstanceRegistry {
    instances: Mutex<Vec<Arc<Bot>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, bot: Arc<Bot>) {
        let mut instances = self.instances.lock();
        if instances.iter().any(|b| b.instance_id() == bot.instance_id()) {
            return;
        }
        instances.push(bot);
    }

    /// Remove an instance by id. Returns whether it was present.
    pub(crate) fn deregister(&self, id: Uuid) -> bool {
        let mut instances = self.instances.lock();
        let before = instances.len();
        instances.retain(|b| b.instance_id() != id);
        instances.len() < before
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    /// Destroy every registered instance.
    ///
    /// # Panics
    ///
    /// Panics when any instance is still registered afterwards: a
    /// zombie instance means its destroy contract is broken, and
    /// continuing would leak connections and timers silently.
    pub async fn cleanup(&self) {
        let snapshot: Vec<Arc<Bot>> = self.instances.lock().clone();
        info!(count = snapshot.len(), "destroying all live instances");
        for bot in snapshot {
            bot.destroy().await;
        }
        assert!(
            self.is_empty(),
            "instance registry not empty after cleanup ({} left)",
            self.len()
        );
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
