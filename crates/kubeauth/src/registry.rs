use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::client::ClientConfig;
use crate::credential::{CloudCredential, CloudCredentialType, CredentialLookup, CredentialRef};
use crate::error::Result;
use crate::kubeconfig::Kubeconfig;
use crate::plugin::{Plugin, UpdateOutcome};

/// The set of provider plugins a process dispatches refreshes to.
///
/// Plugins are registered once at start-up, while the registry is still
/// exclusively owned. Once it is shared (typically behind an [`Arc`]) it is
/// read-only and safe to dispatch from many tasks at once.
pub struct PluginRegistry {
    lookup: Arc<dyn CredentialLookup>,
    plugins: Vec<(String, Box<dyn Plugin>)>,
}

impl PluginRegistry {
    /// Create an empty registry whose plugins fetch credentials through `lookup`
    pub fn new(lookup: Arc<dyn CredentialLookup>) -> Self {
        PluginRegistry {
            lookup,
            plugins: Vec::new(),
        }
    }

    /// Register a plugin under `name`.
    ///
    /// Registering a second plugin under an existing name replaces the first
    /// one, keeping its place in dispatch order.
    pub fn register<P: Plugin + 'static>(&mut self, name: &str, plugin: P) {
        info!("Registering auth plugin: {}", name);
        let plugin: Box<dyn Plugin> = Box::new(plugin);
        match self.plugins.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => {
                warn!("Replacing previously registered auth plugin: {}", name);
                entry.1 = plugin;
            }
            None => self.plugins.push((name.to_owned(), plugin)),
        }
    }

    /// The registered plugins and the credential type each consumes, in dispatch order
    pub fn providers(&self) -> impl Iterator<Item = (&str, CloudCredentialType)> + '_ {
        self.plugins
            .iter()
            .map(|(name, plugin)| (name.as_str(), plugin.credential_type()))
    }

    /// The number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns true if no plugins are registered
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Offer `config` to each plugin in turn, stopping at the first one that
    /// claims it. The claiming plugin refreshes `config` in place with the
    /// credential named by `credential`.
    ///
    /// When no plugin claims the configuration it is left unmodified and
    /// [`UpdateOutcome::NotClaimed`] is returned.
    #[instrument(level = "debug", skip(self, credential, config, raw), fields(credential = %credential.name, host = %config.host))]
    pub async fn update_client(
        &self,
        credential: &CredentialRef,
        org_id: &str,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        for (name, plugin) in self.plugins.iter() {
            let outcome = plugin
                .update_client(self.lookup.as_ref(), credential, org_id, config, raw)
                .await?;
            if outcome.is_claimed() {
                debug!("Client config claimed by auth plugin {}", name);
                return Ok(outcome);
            }
        }
        debug!("No auth plugin claimed client config");
        Ok(UpdateOutcome::NotClaimed)
    }

    /// Like [`update_client`](Self::update_client), with a credential the
    /// caller already resolved.
    #[instrument(level = "debug", skip(self, credential, config, raw), fields(credential = %credential.metadata.name, host = %config.host))]
    pub async fn update_client_by_cred_object(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        for (name, plugin) in self.plugins.iter() {
            let outcome = plugin
                .update_client_by_cred_object(credential, config, raw)
                .await?;
            if outcome.is_claimed() {
                debug!("Client config claimed by auth plugin {}", name);
                return Ok(outcome);
            }
        }
        debug!("No auth plugin claimed client config");
        Ok(UpdateOutcome::NotClaimed)
    }
}
