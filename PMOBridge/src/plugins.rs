//! Construction des plugins de contenu déclarés dans la configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use pmoconfig::Config;
use pmoplugin::{ContentPlugin, PluginRegistry};
use pmorpc::{Worker, WorkerSpec};
use tracing::info;

/// Variables d'environnement transmises aux workers, valeurs opaques
/// passées telles quelles.
pub const ENV_PLUGIN_PATH: &str = "PMOBRIDGE_PLUGIN_PATH";
pub const ENV_CONFIG: &str = "PMOBRIDGE_CONFIG";
pub const ENV_HOSTPORT: &str = "PMOBRIDGE_HOSTPORT";
pub const ENV_PATHPREFIX: &str = "PMOBRIDGE_PATHPREFIX";

/// Instancie les backends déclarés et les enregistre dans le registre.
///
/// Les workers ne sont pas lancés ici : le premier appel RPC d'un plugin
/// s'en charge, et un backend qui tombe sera relancé au besoin.
pub async fn register_plugins(
    config: &Config,
    registry: &PluginRegistry,
    host_port: &str,
) -> Result<()> {
    let plugin_dir = config.get_plugin_dir()?;
    for spec in config.get_plugins()? {
        let env = vec![
            (ENV_PLUGIN_PATH.to_string(), plugin_dir.clone()),
            (ENV_CONFIG.to_string(), config.path().to_string()),
            (ENV_HOSTPORT.to_string(), host_port.to_string()),
            (ENV_PATHPREFIX.to_string(), spec.path_prefix.clone()),
        ];
        let worker = Worker::new(
            &spec.name,
            WorkerSpec {
                command: spec.command.clone(),
                args: spec.args.clone(),
                search_path: vec![PathBuf::from(&plugin_dir)],
                env,
            },
        );
        let plugin = ContentPlugin::new(&spec.name, &spec.path_prefix, Arc::new(worker));
        info!(
            plugin = %plugin.name(),
            prefix = %plugin.path_prefix(),
            command = %spec.command,
            "✅ Content plugin registered"
        );
        registry.register(Arc::new(plugin)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with(yaml: &str) -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), yaml).unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_declared_plugins_are_registered_with_their_prefix() {
        let (_dir, config) = config_with(
            r#"
plugins:
  qobuz:
    command: "qobuz-worker"
    args: ["--quality", "lossless"]
  radio:
    command: "radio-worker"
    path_prefix: "/stations/radio"
"#,
        );

        let registry = PluginRegistry::new();
        register_plugins(&config, &registry, "192.168.1.10:49149")
            .await
            .unwrap();

        assert_eq!(registry.count().await, 2);
        let qobuz = registry.get("qobuz").await.unwrap();
        assert_eq!(qobuz.path_prefix(), "/qobuz");
        let radio = registry.get("radio").await.unwrap();
        assert_eq!(radio.path_prefix(), "/stations/radio");
    }

    #[tokio::test]
    async fn test_empty_plugin_block_registers_nothing() {
        let (_dir, config) = config_with("plugins: {}\n");

        let registry = PluginRegistry::new();
        register_plugins(&config, &registry, "192.168.1.10:49149")
            .await
            .unwrap();
        assert_eq!(registry.count().await, 0);
    }
}
