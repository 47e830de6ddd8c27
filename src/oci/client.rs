use std::sync::Arc;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::{secrets::RegistryAuth, Client, Reference};
use tracing::{debug, info};

use super::error::{classify_error, RegistryError};
use super::models::Digest;
use super::reference::{ImageReference, DEFAULT_TAG};
use crate::registry::CredentialsProvider;

/// Resolves an image reference to the digest of its manifest
#[async_trait]
pub trait DigestResolver: Send + Sync {
    /// Fetch the digest the registry currently serves for `reference`.
    ///
    /// For multi-platform images this is the digest of the index, never of a
    /// platform-specific manifest. Performs no retries.
    async fn resolve(&self, reference: &ImageReference) -> Result<Digest, RegistryError>;
}

pub struct OciClient {
    client: Client,
    credentials: Arc<dyn CredentialsProvider>,
}

impl OciClient {
    /// Create a client; registries listed in `insecure_registries` are
    /// contacted over plain HTTP.
    pub fn new(credentials: Arc<dyn CredentialsProvider>, insecure_registries: Vec<String>) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        Self {
            client,
            credentials,
        }
    }

    async fn auth_for(&self, registry: &str) -> Result<RegistryAuth, RegistryError> {
        let credentials = self
            .credentials
            .get_credentials(registry)
            .await
            .map_err(|e| RegistryError::Credentials {
                registry: registry.to_string(),
                message: format!("{e:#}"),
            })?;

        Ok(match credentials {
            Some((username, password)) => RegistryAuth::Basic(username, password),
            None => RegistryAuth::Anonymous,
        })
    }
}

fn to_oci_reference(reference: &ImageReference) -> Reference {
    let registry = reference.registry().to_string();
    let repository = reference.repository().to_string();
    match reference.digest() {
        Some(digest) => Reference::with_digest(registry, repository, digest.to_string()),
        None => Reference::with_tag(
            registry,
            repository,
            reference.tag().unwrap_or(DEFAULT_TAG).to_string(),
        ),
    }
}

#[async_trait]
impl DigestResolver for OciClient {
    async fn resolve(&self, reference: &ImageReference) -> Result<Digest, RegistryError> {
        let image = reference.to_string();
        let oci_reference = to_oci_reference(reference);
        let auth = self.auth_for(reference.registry()).await?;

        debug!(image = %image, "Fetching manifest digest");

        // HEAD on the manifest endpoint; falls back to GET when the registry
        // omits Docker-Content-Digest
        let digest = self
            .client
            .fetch_manifest_digest(&oci_reference, &auth)
            .await
            .map_err(|e| classify_error(e, &image))?;

        let digest = Digest::parse(&digest).map_err(|reason| RegistryError::Rejected {
            image: image.clone(),
            message: format!("registry returned an invalid digest: {reason}"),
        })?;

        info!(image = %image, digest = %digest, "Resolved image digest");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_oci_reference_uses_default_tag() {
        let r = ImageReference::parse("nginx").unwrap();
        let oci = to_oci_reference(&r);
        assert_eq!(oci.registry(), "docker.io");
        assert_eq!(oci.repository(), "library/nginx");
        assert_eq!(oci.tag(), Some("latest"));
    }

    #[test]
    fn test_to_oci_reference_keeps_digest() {
        let r = ImageReference::parse("ghcr.io/acme/app@sha256:aa11").unwrap();
        let oci = to_oci_reference(&r);
        assert_eq!(oci.registry(), "ghcr.io");
        assert_eq!(oci.repository(), "acme/app");
        assert_eq!(oci.digest(), Some("sha256:aa11"));
        assert_eq!(oci.tag(), None);
    }
}
