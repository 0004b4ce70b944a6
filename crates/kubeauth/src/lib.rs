//! A crate for keeping Kubernetes client configurations usable against managed
//! clusters whose authentication depends on short-lived, cloud-issued tokens.
//!
//! The crate provides the [`Plugin`] trait for declaring a cloud provider
//! backend, the [`PluginRegistry`] which dispatches a refresh to whichever
//! plugin owns a given [`ClientConfig`], and the kubeconfig helpers plugins use
//! to synthesize refreshed documents.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use kubeauth::credential::{CloudCredential, CloudCredentialType, CredentialLookup, StaticCredentialStore};
//! use kubeauth::kubeconfig::Kubeconfig;
//! use kubeauth::{ClientConfig, CredentialRef, Plugin, PluginRegistry, UpdateOutcome};
//!
//! struct MyPlugin;
//!
//! #[async_trait]
//! impl Plugin for MyPlugin {
//!     fn credential_type(&self) -> CloudCredentialType {
//!         CloudCredentialType::Google
//!     }
//!
//!     fn owns(&self, config: &ClientConfig) -> bool {
//!         todo!("Inspect the exec or auth provider section")
//!     }
//!
//!     // Implement the refresh entry points ...
//!     # async fn update_client(&self, lookup: &dyn CredentialLookup, credential: &CredentialRef, org_id: &str, config: &mut ClientConfig, raw: &Kubeconfig) -> kubeauth::Result<UpdateOutcome> { todo!() }
//!     # async fn update_client_by_cred_object(&self, credential: &CloudCredential, config: &mut ClientConfig, raw: &Kubeconfig) -> kubeauth::Result<UpdateOutcome> { todo!() }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = StaticCredentialStore::read_from("/etc/kubeauth/credentials.yaml").await?;
//!     let mut registry = PluginRegistry::new(Arc::new(store));
//!     registry.register("mine", MyPlugin);
//!
//!     let raw = Kubeconfig::read_from(kubeauth::kubeconfig::default_path().unwrap()).await?;
//!     let mut config = ClientConfig::from_kubeconfig(&raw, None).await?;
//!     let credential = CredentialRef::named("my-credential");
//!     registry.update_client(&credential, "default", &mut config, &raw).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

mod client;
pub mod config;
pub mod credential;
mod error;
pub mod kubeconfig;
pub mod plugin;
pub mod probe;
mod registry;

#[doc(inline)]
pub use client::{ClientConfig, TlsClientConfig};
#[doc(inline)]
pub use credential::CredentialRef;
#[doc(inline)]
pub use error::{BoxError, Error, Result};
#[doc(inline)]
pub use plugin::{ClusterEnumerator, Plugin, RemoteCluster, UpdateOutcome};
#[doc(inline)]
pub use registry::PluginRegistry;
