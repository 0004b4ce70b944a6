//! A kubeauth plugin for IBM Cloud Kubernetes Service clusters.
//!
//! IKS kubeconfigs authenticate with OIDC tokens issued by IBM Cloud IAM.
//! Those tokens cannot be refreshed in place, so an expired configuration is
//! replaced wholesale by a freshly downloaded admin kubeconfig.
//!
//! Downloading writes to a per-cluster scratch directory, so refreshes of the
//! same cluster are serialized. Refreshes of different clusters run in
//! parallel.

#![deny(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kubeauth::credential::{
    fetch_credential, CloudCredential, CloudCredentialInfo, CloudCredentialType, CredentialLookup,
    IbmConfig,
};
use kubeauth::kubeconfig::Kubeconfig;
use kubeauth::probe::{validate, ServerProbe};
use kubeauth::{ClientConfig, CredentialRef, Error, Plugin, Result, UpdateOutcome};
use tracing::{debug, error, info, instrument};

pub mod api;
mod cli;
mod lock;
mod scratch;
mod target;

pub use api::{ClusterConfigApi, ClusterConfigDetail, IbmSession};
pub use cli::IbmCloudCli;
pub use target::ClusterTarget;

use lock::ClusterLocks;
use scratch::ScratchDir;

/// The name the plugin registers under
pub const PLUGIN_NAME: &str = "ibm";

const ISSUER_URL_KEY: &str = "idp-issuer-url";
const IAM_DOMAIN: &str = "iam.cloud.ibm.com";

/// Refreshes IKS client configurations with IBM Cloud API keys.
pub struct IbmPlugin {
    api: Arc<dyn ClusterConfigApi>,
    probe: Arc<dyn ServerProbe>,
    scratch_root: PathBuf,
    locks: ClusterLocks,
}

impl IbmPlugin {
    /// Create a plugin that downloads kubeconfigs through `api` into
    /// directories under `scratch_root`, checking configurations with `probe`.
    pub fn new(
        api: Arc<dyn ClusterConfigApi>,
        probe: Arc<dyn ServerProbe>,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        IbmPlugin {
            api,
            probe,
            scratch_root: scratch_root.into(),
            locks: ClusterLocks::default(),
        }
    }

    async fn still_valid(&self, config: &ClientConfig) -> bool {
        match self.probe.server_version(config).await {
            Ok(version) => {
                debug!(host = %config.host, %version, "Existing client config still valid");
                true
            }
            Err(e) => {
                debug!(host = %config.host, error = %e, "Existing client config expired");
                false
            }
        }
    }

    /// Download, synthesize and verify a new configuration for the cluster
    /// `raw` points at. `config` is only replaced once the new one verifies.
    async fn refresh(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<String> {
        let keys = ibm_config(credential)?;
        let target = ClusterTarget::resolve(raw)?;
        let session = IbmSession {
            api_key: keys.api_key.clone(),
        };

        let _guard = self.locks.acquire(&target.name).await;
        // Declared after the guard so the directory is gone before the lock is released
        let scratch = ScratchDir::create(&self.scratch_root, &target.name).await?;

        debug!(cluster = %target.name, region = ?target.region, "Fetching cluster config");
        let detail = self
            .api
            .get_cluster_config_detail(
                &session,
                &target.name,
                scratch.path(),
                true,
                target.region.as_deref(),
            )
            .await
            .map_err(|e| Error::provider_api(format!("get cluster config for {}", target.name), e))?;

        let mut fetched = Kubeconfig::read_from(&detail.file_path).await?;
        fetched.minify()?;
        fetched.flatten().await?;
        let kubeconfig = fetched.to_yaml()?;

        let refreshed = ClientConfig::from_kubeconfig(&fetched, None).await?;
        validate(self.probe.as_ref(), &refreshed).await?;
        *config = refreshed;
        info!(cluster = %target.name, "Refreshed IKS client config");
        Ok(kubeconfig)
    }

    async fn refresh_logged(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        match self.refresh(credential, config, raw).await {
            Ok(kubeconfig) => Ok(UpdateOutcome::Claimed {
                kubeconfig: Some(kubeconfig),
            }),
            Err(e) => {
                error!(error = %e, "Failed to update client");
                Err(e)
            }
        }
    }
}

fn ibm_config(credential: &CloudCredential) -> Result<&IbmConfig> {
    match &credential.info {
        CloudCredentialInfo::Ibm(ibm) => Ok(ibm),
        other => Err(Error::CredentialTypeMismatch {
            expected: CloudCredentialType::Ibm,
            actual: other.kind(),
        }),
    }
}

#[async_trait]
impl Plugin for IbmPlugin {
    fn credential_type(&self) -> CloudCredentialType {
        CloudCredentialType::Ibm
    }

    fn owns(&self, config: &ClientConfig) -> bool {
        config
            .auth_provider
            .as_ref()
            .and_then(|provider| provider.config.get(ISSUER_URL_KEY))
            .map(|issuer| issuer.contains(IAM_DOMAIN))
            .unwrap_or(false)
    }

    #[instrument(level = "info", skip(self, lookup, credential, config, raw), fields(credential = %credential.name, host = %config.host))]
    async fn update_client(
        &self,
        lookup: &dyn CredentialLookup,
        credential: &CredentialRef,
        org_id: &str,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        if !self.owns(config) {
            return Ok(UpdateOutcome::NotClaimed);
        }
        if self.still_valid(config).await {
            return Ok(UpdateOutcome::Claimed { kubeconfig: None });
        }
        let credential = fetch_credential(lookup, credential, org_id, PLUGIN_NAME).await?;
        self.refresh_logged(&credential, config, raw).await
    }

    #[instrument(level = "info", skip(self, credential, config, raw), fields(credential = %credential.metadata.name, host = %config.host))]
    async fn update_client_by_cred_object(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        if !self.owns(config) {
            return Ok(UpdateOutcome::NotClaimed);
        }
        if self.still_valid(config).await {
            return Ok(UpdateOutcome::Claimed { kubeconfig: None });
        }
        self.refresh_logged(credential, config, raw).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use kubeauth::credential::{AwsConfig, StaticCredentialStore};
    use tokio::sync::Barrier;

    use super::*;

    const STALE: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: px-backup-test/c159d5hd0t0gcgt4lpcg
  cluster:
    server: https://c7.private.us-south.containers.cloud.ibm.com:29713
    certificate-authority-data: Y2EtYnl0ZXM=
contexts:
- name: px-backup-test/c159d5hd0t0gcgt4lpcg
  context:
    cluster: px-backup-test/c159d5hd0t0gcgt4lpcg
    user: oidc
users:
- name: oidc
  user:
    auth-provider:
      name: oidc
      config:
        client-id: kube
        id-token: expired
        idp-issuer-url: https://iam.cloud.ibm.com/identity
current-context: px-backup-test/c159d5hd0t0gcgt4lpcg
"#;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Write,
        Fail,
        WriteWithoutContext,
    }

    /// Writes an admin kubeconfig with certificates in separate files
    struct FakeApi {
        mode: Mode,
        barrier: Option<Barrier>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<(String, Option<String>, bool)>>,
    }

    impl FakeApi {
        fn new(mode: Mode) -> Self {
            FakeApi {
                mode,
                barrier: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterConfigApi for FakeApi {
        async fn get_cluster_config_detail(
            &self,
            session: &IbmSession,
            cluster: &str,
            dest: &Path,
            admin: bool,
            region: Option<&str>,
        ) -> anyhow::Result<ClusterConfigDetail> {
            assert_eq!(session.api_key, "api-key");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                cluster.to_owned(),
                region.map(str::to_owned),
                admin,
            ));
            // Each refresh starts from an empty directory
            assert_eq!(std::fs::read_dir(dest)?.count(), 0);

            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;

            let result = match self.mode {
                Mode::Fail => Err(anyhow::anyhow!("cluster {} not found", cluster)),
                mode => {
                    let current = if mode == Mode::WriteWithoutContext {
                        ""
                    } else {
                        "admin"
                    };
                    std::fs::write(dest.join("ca.pem"), "ca-bytes")?;
                    std::fs::write(dest.join("admin.pem"), "admin-cert")?;
                    std::fs::write(dest.join("admin-key.pem"), "admin-key")?;
                    let kubeconfig = format!(
                        r#"
apiVersion: v1
kind: Config
clusters:
- name: {cluster}/c159d5hd0t0gcgt4lpcg
  cluster:
    server: https://{cluster}.containers.cloud.ibm.com:30000
    certificate-authority: ca.pem
- name: unrelated
  cluster:
    server: https://unrelated.example.com
contexts:
- name: admin
  context:
    cluster: {cluster}/c159d5hd0t0gcgt4lpcg
    user: admin
- name: unrelated
  context:
    cluster: unrelated
    user: admin
users:
- name: admin
  user:
    client-certificate: admin.pem
    client-key: admin-key.pem
current-context: "{current}"
"#,
                        cluster = cluster,
                        current = current
                    );
                    let file_path = dest.join("config");
                    std::fs::write(&file_path, kubeconfig)?;
                    Ok(ClusterConfigDetail { file_path })
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Accepts the stale OIDC config or the refreshed certificate config as told
    struct FakeProbe {
        stale_valid: bool,
        refreshed_valid: bool,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(stale_valid: bool, refreshed_valid: bool) -> Self {
            FakeProbe {
                stale_valid,
                refreshed_valid,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ServerProbe for FakeProbe {
        async fn server_version(&self, config: &ClientConfig) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let valid = if config.auth_provider.is_some() {
                self.stale_valid
            } else {
                self.refreshed_valid
            };
            if valid {
                Ok("v1.21.5+IKS".to_owned())
            } else {
                Err(anyhow::anyhow!("Unauthorized"))
            }
        }
    }

    struct Fixture {
        plugin: Arc<IbmPlugin>,
        api: Arc<FakeApi>,
        probe: Arc<FakeProbe>,
        root: tempfile::TempDir,
    }

    impl Fixture {
        fn new(api: FakeApi, probe: FakeProbe) -> Self {
            let root = tempfile::tempdir().unwrap();
            let api = Arc::new(api);
            let probe = Arc::new(probe);
            let plugin = Arc::new(IbmPlugin::new(
                api.clone(),
                probe.clone(),
                root.path().join("kube"),
            ));
            Fixture {
                plugin,
                api,
                probe,
                root,
            }
        }

        fn scratch_root(&self) -> PathBuf {
            self.root.path().join("kube")
        }
    }

    fn ibm_credential() -> CloudCredential {
        CloudCredential::new(
            "iks",
            "default",
            CloudCredentialInfo::Ibm(IbmConfig {
                api_key: "api-key".to_owned(),
            }),
        )
    }

    async fn stale(cluster: &str) -> (ClientConfig, Kubeconfig) {
        let raw = Kubeconfig::from_yaml(&STALE.replace("px-backup-test", cluster)).unwrap();
        let config = ClientConfig::from_kubeconfig(&raw, None).await.unwrap();
        (config, raw)
    }

    #[tokio::test]
    async fn owns_ibm_issued_oidc_configs() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(true, true));
        let (mut config, _) = stale("px-backup-test").await;
        assert!(fixture.plugin.owns(&config));

        if let Some(provider) = config.auth_provider.as_mut() {
            provider.config.insert(
                ISSUER_URL_KEY.to_owned(),
                "https://accounts.google.com".to_owned(),
            );
        }
        assert!(!fixture.plugin.owns(&config));
        assert!(!fixture.plugin.owns(&ClientConfig::default()));
    }

    #[tokio::test]
    async fn valid_configs_skip_the_refresh() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(true, true));
        let store = StaticCredentialStore::default();
        let (mut config, raw) = stale("px-backup-test").await;
        let before = config.clone();

        // No credential is needed when nothing has to be refreshed
        let outcome = fixture
            .plugin
            .update_client(&store, &CredentialRef::default(), "default", &mut config, &raw)
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Claimed { kubeconfig: None });
        assert_eq!(config, before);
        assert_eq!(fixture.api.calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.scratch_root().exists());
    }

    #[tokio::test]
    async fn expired_configs_are_replaced() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let store = StaticCredentialStore::new(vec![ibm_credential()]);
        let (mut config, raw) = stale("px-backup-test").await;

        let outcome = fixture
            .plugin
            .update_client(&store, &CredentialRef::named("iks"), "default", &mut config, &raw)
            .await
            .unwrap();

        let yaml = outcome.kubeconfig().unwrap();
        let synthesized = Kubeconfig::from_yaml(yaml).unwrap();
        assert_eq!(synthesized.contexts.len(), 1);
        assert_eq!(synthesized.clusters.len(), 1);
        assert_eq!(synthesized.auth_infos.len(), 1);
        assert_eq!(
            synthesized.clusters[0].cluster.certificate_authority_data,
            Some("Y2EtYnl0ZXM=".to_owned())
        );
        assert_eq!(synthesized.clusters[0].cluster.certificate_authority, None);

        assert_eq!(
            config.host,
            "https://px-backup-test.containers.cloud.ibm.com:30000"
        );
        assert_eq!(config.tls.cert_data.as_deref(), Some(&b"admin-cert"[..]));
        assert_eq!(config.tls.key_data.as_deref(), Some(&b"admin-key"[..]));
        assert_eq!(config.auth_provider, None);

        assert_eq!(
            *fixture.api.seen.lock().unwrap(),
            vec![("px-backup-test".to_owned(), Some("us-south".to_owned()), true)]
        );
        assert!(fixture.scratch_root().exists());
        assert!(!fixture.scratch_root().join("px-backup-test").exists());
    }

    #[tokio::test]
    async fn failed_validation_keeps_the_old_config() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, false));
        let (mut config, raw) = stale("px-backup-test").await;
        let before = config.clone();

        let err = fixture
            .plugin
            .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ValidationFailed { .. }));
        assert_eq!(config, before);
        assert_eq!(fixture.probe.calls.load(Ordering::SeqCst), 2);
        assert!(!fixture.scratch_root().join("px-backup-test").exists());
    }

    #[tokio::test]
    async fn cluster_names_cannot_escape_the_scratch_root() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let sibling = fixture.root.path().join("other-app-data.txt");
        std::fs::write(&sibling, "keep").unwrap();

        for cluster in &["..", ""] {
            let (mut config, raw) = stale(cluster).await;
            let err = fixture
                .plugin
                .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnresolvableCluster(_)));
        }

        assert!(sibling.exists());
        assert_eq!(fixture.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn api_failures_clean_up() {
        let fixture = Fixture::new(FakeApi::new(Mode::Fail), FakeProbe::new(false, true));
        let (mut config, raw) = stale("px-backup-test").await;

        let err = fixture
            .plugin
            .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProviderApiFailed { .. }));
        assert!(!fixture.scratch_root().join("px-backup-test").exists());
    }

    #[tokio::test]
    async fn unusable_downloads_are_synthesis_failures() {
        let fixture = Fixture::new(
            FakeApi::new(Mode::WriteWithoutContext),
            FakeProbe::new(false, true),
        );
        let (mut config, raw) = stale("px-backup-test").await;
        let before = config.clone();

        let err = fixture
            .plugin
            .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConfigSynthesisFailed(_)));
        assert_eq!(config, before);
        assert!(!fixture.scratch_root().join("px-backup-test").exists());
    }

    #[tokio::test]
    async fn expired_configs_need_a_credential() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let store = StaticCredentialStore::new(vec![ibm_credential()]);
        let (mut config, raw) = stale("px-backup-test").await;

        let err = fixture
            .plugin
            .update_client(&store, &CredentialRef::default(), "default", &mut config, &raw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingCredentialReference { provider: "ibm" }
        ));
    }

    #[tokio::test]
    async fn rejects_other_credential_types() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let aws = CloudCredential::new(
            "eks",
            "default",
            CloudCredentialInfo::Aws(AwsConfig {
                access_key: "AK".to_owned(),
                secret_key: "SK".to_owned(),
            }),
        );
        let (mut config, raw) = stale("px-backup-test").await;

        let err = fixture
            .plugin
            .update_client_by_cred_object(&aws, &mut config, &raw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CredentialTypeMismatch {
                expected: CloudCredentialType::Ibm,
                actual: CloudCredentialType::Aws,
            }
        ));
        assert_eq!(fixture.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ignores_foreign_configs_without_probing() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let mut config = ClientConfig {
            host: "https://eks.example.com".to_owned(),
            ..Default::default()
        };
        let outcome = fixture
            .plugin
            .update_client_by_cred_object(&ibm_credential(), &mut config, &Kubeconfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotClaimed);
        assert_eq!(fixture.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_cluster_refreshes_are_serialized() {
        let fixture = Fixture::new(FakeApi::new(Mode::Write), FakeProbe::new(false, true));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let plugin = fixture.plugin.clone();
                tokio::spawn(async move {
                    let (mut config, raw) = stale("px-backup-test").await;
                    let outcome = plugin
                        .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
                        .await
                        .unwrap();
                    (outcome, config)
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(fixture.api.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fixture.api.max_in_flight.load(Ordering::SeqCst), 1);
        let (first, first_config) = &outcomes[0];
        for (outcome, config) in &outcomes {
            assert_eq!(outcome, first);
            assert_eq!(config, first_config);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_clusters_refresh_in_parallel() {
        let mut api = FakeApi::new(Mode::Write);
        // Both fetches must be inside the API at once to get past the barrier
        api.barrier = Some(Barrier::new(2));
        let fixture = Fixture::new(api, FakeProbe::new(false, true));

        let handles: Vec<_> = ["alpha", "beta"]
            .iter()
            .map(|cluster| {
                let plugin = fixture.plugin.clone();
                let cluster = cluster.to_string();
                tokio::spawn(async move {
                    let (mut config, raw) = stale(&cluster).await;
                    plugin
                        .update_client_by_cred_object(&ibm_credential(), &mut config, &raw)
                        .await
                        .map(|_| config.host)
                })
            })
            .collect();

        let hosts = tokio::time::timeout(Duration::from_secs(10), async {
            let mut hosts = Vec::new();
            for handle in handles {
                hosts.push(handle.await.unwrap().unwrap());
            }
            hosts
        })
        .await
        .expect("refreshes of different clusters blocked each other");

        assert_eq!(
            hosts,
            vec![
                "https://alpha.containers.cloud.ibm.com:30000",
                "https://beta.containers.cloud.ibm.com:30000",
            ]
        );
        assert_eq!(fixture.api.max_in_flight.load(Ordering::SeqCst), 2);
    }
}
