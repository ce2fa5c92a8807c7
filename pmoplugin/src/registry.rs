//! # Registre des plugins de contenu
//!
//! Recense les backends raccordés au démarrage et sait retrouver le
//! plugin propriétaire d'un chemin de streaming par le préfixe
//! correspondant le plus long.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::adapter::ContentPlugin;

#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<ContentPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un plugin ; un plugin du même nom est remplacé.
    pub async fn register(&self, plugin: Arc<ContentPlugin>) {
        let mut plugins = self.plugins.write().await;
        let name = plugin.name().to_string();
        plugins.retain(|p| p.name() != name);
        info!(plugin = %name, prefix = %plugin.path_prefix(), "✅ Plugin registered");
        plugins.push(plugin);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ContentPlugin>> {
        let plugins = self.plugins.read().await;
        plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Sélectionne le plugin propriétaire d'un chemin entrant.
    ///
    /// Quand plusieurs préfixes correspondent, le plus long gagne.
    pub async fn plugin_for_path(&self, path: &str) -> Option<Arc<ContentPlugin>> {
        let plugins = self.plugins.read().await;
        plugins
            .iter()
            .filter(|p| path.starts_with(p.path_prefix()))
            .max_by_key(|p| p.path_prefix().len())
            .cloned()
    }

    pub async fn list(&self) -> Vec<Arc<ContentPlugin>> {
        let plugins = self.plugins.read().await;
        plugins.clone()
    }

    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }
}
