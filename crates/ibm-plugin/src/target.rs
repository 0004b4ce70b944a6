use kubeauth::kubeconfig::Kubeconfig;
use kubeauth::{Error, Result};
use url::Url;

use crate::scratch::is_directory_name;

/// Server hostnames with at least this many labels carry a region, e.g.
/// `c7.private.us-south.containers.cloud.ibm.com`.
const REGIONAL_HOST_LABELS: usize = 7;
/// Position of the region counted from the end of the hostname
const REGION_LABEL_FROM_END: usize = 5;

/// The IKS cluster a kubeconfig points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTarget {
    /// The cluster name, as `ibmcloud ks` knows it
    pub name: String,
    /// The region the cluster lives in, when the server hostname reveals it
    pub region: Option<String>,
}

impl ClusterTarget {
    /// Work out the target cluster of a kubeconfig holding exactly one cluster.
    ///
    /// IKS names kubeconfig clusters `<name>/<id>`; only the name is kept.
    pub fn resolve(raw: &Kubeconfig) -> Result<Self> {
        let named = match raw.clusters.as_slice() {
            [one] => one,
            [] => return Err(Error::UnresolvableCluster("no clusters defined".to_owned())),
            many => {
                return Err(Error::UnresolvableCluster(format!(
                    "{} clusters defined",
                    many.len()
                )))
            }
        };
        let name = named
            .name
            .split('/')
            .next()
            .unwrap_or_default()
            .to_owned();
        if !is_directory_name(&name) {
            return Err(Error::UnresolvableCluster(format!(
                "invalid cluster name {:?} in {}",
                name, named.name
            )));
        }

        let server = Url::parse(&named.cluster.server).map_err(|e| {
            Error::UnresolvableCluster(format!(
                "failed to parse server url {}: {}",
                named.cluster.server, e
            ))
        })?;
        let region = server.host_str().and_then(region_of);

        Ok(ClusterTarget { name, region })
    }
}

fn region_of(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < REGIONAL_HOST_LABELS {
        return None;
    }
    Some(labels[labels.len() - REGION_LABEL_FROM_END].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(clusters: &[(&str, &str)]) -> Kubeconfig {
        let mut yaml = String::from("apiVersion: v1\nkind: Config\nclusters:\n");
        for (name, server) in clusters {
            yaml.push_str(&format!(
                "- name: {}\n  cluster:\n    server: {}\n",
                name, server
            ));
        }
        Kubeconfig::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn private_endpoints_carry_a_region() {
        let target = ClusterTarget::resolve(&raw(&[(
            "px-backup-test/c159d5hd0t0gcgt4lpcg",
            "https://c7.private.us-south.containers.cloud.ibm.com:29713",
        )]))
        .unwrap();
        assert_eq!(
            target,
            ClusterTarget {
                name: "px-backup-test".to_owned(),
                region: Some("us-south".to_owned()),
            }
        );
    }

    #[test]
    fn public_endpoints_do_not() {
        let target = ClusterTarget::resolve(&raw(&[(
            "px-backup-test/c159d5hd0t0gcgt4lpcg",
            "https://c113.us-south.containers.cloud.ibm.com:30044",
        )]))
        .unwrap();
        assert_eq!(target.name, "px-backup-test");
        assert_eq!(target.region, None);
    }

    #[test]
    fn names_without_an_id_are_kept_whole() {
        let target = ClusterTarget::resolve(&raw(&[(
            "mycluster",
            "https://c100.eu-de.containers.cloud.ibm.com:31000",
        )]))
        .unwrap();
        assert_eq!(target.name, "mycluster");
    }

    #[test]
    fn needs_exactly_one_cluster() {
        assert!(matches!(
            ClusterTarget::resolve(&Kubeconfig::default()),
            Err(Error::UnresolvableCluster(_))
        ));
        assert!(matches!(
            ClusterTarget::resolve(&raw(&[
                ("a/1", "https://c1.us-south.containers.cloud.ibm.com:1"),
                ("b/2", "https://c2.us-south.containers.cloud.ibm.com:2"),
            ])),
            Err(Error::UnresolvableCluster(_))
        ));
    }

    #[test]
    fn rejects_names_that_are_not_plain_directory_names() {
        for key in &[
            "../c159d5hd0t0gcgt4lpcg",
            "/c159d5hd0t0gcgt4lpcg",
            "./c159d5hd0t0gcgt4lpcg",
            "..",
            "a\\b/c159d5hd0t0gcgt4lpcg",
        ] {
            assert!(
                matches!(
                    ClusterTarget::resolve(&raw(&[(
                        *key,
                        "https://c7.private.us-south.containers.cloud.ibm.com:29713"
                    )])),
                    Err(Error::UnresolvableCluster(_))
                ),
                "{} was accepted",
                key
            );
        }
    }

    #[test]
    fn rejects_unparsable_servers() {
        assert!(matches!(
            ClusterTarget::resolve(&raw(&[("a/1", "not a url")])),
            Err(Error::UnresolvableCluster(_))
        ));
    }
}
