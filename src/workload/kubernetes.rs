use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use tracing::{debug, info};

use super::{ResourceId, ResourceStore, StoreError, UpdateError, VersionedDocument, WorkloadKind};
use crate::settings::KubernetesSettings;

fn api_resource(kind: WorkloadKind) -> ApiResource {
    let (kind_name, plural) = match kind {
        WorkloadKind::Deployment => ("Deployment", "deployments"),
        WorkloadKind::StatefulSet => ("StatefulSet", "statefulsets"),
        WorkloadKind::DaemonSet => ("DaemonSet", "daemonsets"),
    };
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("apps", "v1", kind_name), plural)
}

/// Map a kube client error to the store's taxonomy
fn store_error(id: &ResourceId, err: kube::Error) -> StoreError {
    let resource = id.to_string();
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(resource),
        kube::Error::Api(ae) if ae.code == 401 || ae.code == 403 => StoreError::Forbidden {
            resource,
            message: ae.message,
        },
        kube::Error::Api(ae) if ae.code == 422 || ae.code == 400 => StoreError::Malformed {
            resource,
            message: ae.message,
        },
        other => StoreError::Request {
            resource,
            message: other.to_string(),
        },
    }
}

/// Map a failed replace. 409 means the version token no longer matches.
fn update_error(id: &ResourceId, err: kube::Error) -> UpdateError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => UpdateError::Conflict(ae.message),
        other => store_error(id, other).into(),
    }
}

/// Workloads stored in a Kubernetes cluster, accessed as dynamic objects
pub struct KubernetesStore {
    client: Client,
    field_manager: String,
}

impl KubernetesStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Build a client from in-cluster service account credentials, an
    /// explicit kubeconfig, or the inferred default (`KUBECONFIG`,
    /// `~/.kube/config`, in-cluster).
    pub async fn connect(settings: &KubernetesSettings) -> Result<Self> {
        // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();

        let config = if settings.in_cluster {
            info!("Using in-cluster Kubernetes configuration");
            kube::Config::incluster().context("Failed to load in-cluster Kubernetes configuration")?
        } else if let Some(path) = &settings.kubeconfig {
            info!(path = %path.display(), "Using kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Failed to load kubeconfig {}", path.display()))?
        } else {
            kube::Config::infer()
                .await
                .context("Failed to infer Kubernetes configuration")?
        };

        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        Ok(Self::new(client, settings.field_manager.clone()))
    }

    fn api(&self, id: &ResourceId) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &id.namespace, &api_resource(id.kind))
    }
}

#[async_trait]
impl ResourceStore for KubernetesStore {
    async fn get(&self, id: &ResourceId) -> Result<VersionedDocument, StoreError> {
        let object = self
            .api(id)
            .get(&id.name)
            .await
            .map_err(|e| store_error(id, e))?;

        let version = object
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| StoreError::Malformed {
                resource: id.to_string(),
                message: "object has no resourceVersion".to_string(),
            })?;
        let document = serde_json::to_value(&object).map_err(|e| StoreError::Malformed {
            resource: id.to_string(),
            message: e.to_string(),
        })?;

        debug!(resource = %id, resource_version = %version, "Fetched workload");
        Ok(VersionedDocument { document, version })
    }

    async fn update(
        &self,
        id: &ResourceId,
        document: &VersionedDocument,
    ) -> Result<(), UpdateError> {
        let mut object: DynamicObject = serde_json::from_value(document.document.clone())
            .map_err(|e| StoreError::Malformed {
                resource: id.to_string(),
                message: e.to_string(),
            })?;
        // The API server rejects the replace with 409 unless this still
        // matches the stored object
        object.metadata.resource_version = Some(document.version.clone());

        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };

        match self.api(id).replace(&id.name, &params, &object).await {
            Ok(updated) => {
                debug!(
                    resource = %id,
                    resource_version = ?updated.metadata.resource_version,
                    "Replaced workload"
                );
                Ok(())
            }
            Err(e) => Err(update_error(id, e)),
        }
    }
}
