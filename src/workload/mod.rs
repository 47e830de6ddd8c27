pub mod kubernetes;
#[cfg(test)]
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub use kubernetes::KubernetesStore;

/// JSON pointer to the container list of every supported workload kind
pub const CONTAINERS_POINTER: &str = "/spec/template/spec/containers";

/// Workload kinds whose pod template lives at `spec.template`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    #[serde(alias = "deploy")]
    #[value(alias = "deploy")]
    Deployment,
    #[serde(alias = "sts")]
    #[value(name = "statefulset", alias = "sts")]
    StatefulSet,
    #[serde(alias = "ds")]
    #[value(name = "daemonset", alias = "ds")]
    DaemonSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::DaemonSet => "daemonset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the workload being updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A fetched workload together with the version token a write must present
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub document: Value,
    pub version: String,
}

impl VersionedDocument {
    /// Image strings of the workload's containers, in order. `None` for a
    /// container record without an image. Returns `None` when the document
    /// has no container list at all.
    pub fn container_images(&self) -> Option<Vec<Option<String>>> {
        let containers = self.document.pointer(CONTAINERS_POINTER)?.as_array()?;
        Some(
            containers
                .iter()
                .map(|c| c.get("image").and_then(Value::as_str).map(str::to_string))
                .collect(),
        )
    }

    /// Container name at `index`, if the record has one
    pub fn container_name(&self, index: usize) -> Option<&str> {
        self.document
            .pointer(CONTAINERS_POINTER)?
            .get(index)?
            .get("name")?
            .as_str()
    }

    /// Replace the image of the container at `index`. Returns false when
    /// there is no such container record.
    pub fn set_container_image(&mut self, index: usize, image: &str) -> bool {
        let Some(container) = self
            .document
            .pointer_mut(CONTAINERS_POINTER)
            .and_then(|c| c.get_mut(index))
            .and_then(Value::as_object_mut)
        else {
            return false;
        };
        container.insert("image".to_string(), Value::String(image.to_string()));
        true
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("access to {resource} denied: {message}")]
    Forbidden { resource: String, message: String },

    #[error("{resource} is malformed: {message}")]
    Malformed { resource: String, message: String },

    #[error("request for {resource} failed: {message}")]
    Request { resource: String, message: String },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    /// The version token no longer matches what the store holds
    #[error("version conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A mutable, versioned document store (the cluster API)
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, id: &ResourceId) -> Result<VersionedDocument, StoreError>;

    /// Replace the whole document, succeeding only if the store's current
    /// version still equals `document.version`
    async fn update(&self, id: &ResourceId, document: &VersionedDocument)
        -> Result<(), UpdateError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> VersionedDocument {
        VersionedDocument {
            document: json!({
                "spec": {"template": {"spec": {"containers": [
                    {"name": "app", "image": "registry.example/app:v3"},
                    {"name": "no-image"},
                ]}}}
            }),
            version: "1".to_string(),
        }
    }

    #[test]
    fn test_container_images() {
        assert_eq!(
            doc().container_images(),
            Some(vec![Some("registry.example/app:v3".to_string()), None])
        );
        let empty = VersionedDocument {
            document: json!({"spec": {}}),
            version: "1".to_string(),
        };
        assert_eq!(empty.container_images(), None);
    }

    #[test]
    fn test_set_container_image() {
        let mut d = doc();
        assert!(d.set_container_image(1, "registry.example/side@sha256:aa11"));
        assert!(!d.set_container_image(2, "x"));
        assert_eq!(
            d.document.pointer("/spec/template/spec/containers/1/image"),
            Some(&json!("registry.example/side@sha256:aa11"))
        );
        assert_eq!(d.container_name(0), Some("app"));
    }
}
