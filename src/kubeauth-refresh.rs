use std::sync::Arc;

use anyhow::Context;
use aws_plugin::{AwsCli, AwsPlugin};
use ibm_plugin::{IbmCloudCli, IbmPlugin};
use kubeauth::config::Config;
use kubeauth::credential::StaticCredentialStore;
use kubeauth::kubeconfig::Kubeconfig;
use kubeauth::probe::KubeProbe;
use kubeauth::{ClientConfig, PluginRegistry, UpdateOutcome};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt::init();

    let config = Config::new_from_flags(env!("CARGO_PKG_VERSION"))?;

    let store = if config.credentials_file.exists() {
        StaticCredentialStore::read_from(&config.credentials_file).await?
    } else {
        debug!(path = %config.credentials_file.display(), "No credentials file, starting with an empty store");
        StaticCredentialStore::default()
    };

    // Plugins are registered once, before any refresh is dispatched
    let probe = Arc::new(KubeProbe);
    let mut registry = PluginRegistry::new(Arc::new(store));
    registry.register(
        aws_plugin::PLUGIN_NAME,
        AwsPlugin::new(Arc::new(AwsCli::new()), probe.clone()),
    );
    registry.register(
        ibm_plugin::PLUGIN_NAME,
        IbmPlugin::new(Arc::new(IbmCloudCli::new()), probe, &config.scratch_dir),
    );

    let raw = Kubeconfig::read_from(&config.kubeconfig).await?;
    let context = config
        .context
        .clone()
        .or_else(|| raw.current_context.clone())
        .unwrap_or_default();
    let mut client = ClientConfig::from_kubeconfig(&raw, config.context.as_deref())
        .await
        .with_context(|| format!("Unable to load context {:?}", context))?;

    let outcome = registry
        .update_client(&config.credential, &config.org_id, &mut client, &raw)
        .await?;

    let kubeconfig = match outcome {
        UpdateOutcome::NotClaimed => {
            info!(
                kubeconfig = %config.kubeconfig.display(),
                "Client config not claimed by any auth plugin, leaving it untouched"
            );
            return Ok(());
        }
        UpdateOutcome::Claimed {
            kubeconfig: Some(kubeconfig),
        } => kubeconfig,
        UpdateOutcome::Claimed { kubeconfig: None } => client.to_kubeconfig(&context).to_yaml()?,
    };

    match &config.output {
        Some(path) => {
            tokio::fs::write(path, kubeconfig)
                .await
                .with_context(|| format!("Unable to write {}", path.display()))?;
            info!(output = %path.display(), "Wrote refreshed kubeconfig");
        }
        None => print!("{}", kubeconfig),
    }
    Ok(())
}
