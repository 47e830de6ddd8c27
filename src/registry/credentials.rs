use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

/// Provider for registry authentication credentials
///
/// Given a registry host, yields `Some((username, password))` when it holds
/// credentials for that host and `None` when the host should be accessed
/// anonymously (as far as this provider is concerned).
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> anyhow::Result<Option<(String, String)>>;
}

/// Registry host aliases that all refer to Docker Hub
const DOCKER_HUB_HOSTS: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

/// Reduce a registry URL or host (`https://index.docker.io/v1/`) to a
/// comparable host name, folding every Docker Hub alias into `docker.io`.
pub fn normalize_registry_host(registry: &str) -> String {
    let host = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(registry)
        .to_lowercase();

    if DOCKER_HUB_HOSTS.contains(&host.as_str()) {
        "docker.io".to_string()
    } else {
        host
    }
}

/// Fixed username/password, optionally scoped to a single registry host
pub struct StaticCredentials {
    registry_host: Option<String>,
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(registry_host: Option<String>, username: String, password: String) -> Self {
        Self {
            registry_host: registry_host.map(|h| normalize_registry_host(&h)),
            username,
            password,
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        if let Some(scope) = &self.registry_host {
            if *scope != normalize_registry_host(registry_host) {
                return Ok(None);
            }
        }
        Ok(Some((self.username.clone(), self.password.clone())))
    }
}

/// Asks each provider in turn; the first one holding credentials wins.
/// An empty chain (or one where nobody answers) means anonymous access.
#[derive(Default)]
pub struct Keychain {
    providers: Vec<Arc<dyn CredentialsProvider>>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

#[async_trait]
impl CredentialsProvider for Keychain {
    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        for provider in &self.providers {
            if let Some(credentials) = provider.get_credentials(registry_host).await? {
                debug!(registry = registry_host, "Using stored registry credentials");
                return Ok(Some(credentials));
            }
        }
        debug!(registry = registry_host, "No credentials found, using anonymous access");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_registry_host() {
        assert_eq!(normalize_registry_host("https://index.docker.io/v1/"), "docker.io");
        assert_eq!(normalize_registry_host("registry-1.docker.io"), "docker.io");
        assert_eq!(normalize_registry_host("GHCR.io"), "ghcr.io");
        assert_eq!(
            normalize_registry_host("http://localhost:5000/ns"),
            "localhost:5000"
        );
    }

    #[tokio::test]
    async fn test_static_credentials_scoped_to_host() {
        let creds = StaticCredentials::new(
            Some("ghcr.io".to_string()),
            "bot".to_string(),
            "secret".to_string(),
        );
        assert_eq!(
            creds.get_credentials("ghcr.io").await.unwrap(),
            Some(("bot".to_string(), "secret".to_string()))
        );
        assert_eq!(creds.get_credentials("quay.io").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keychain_first_match_wins() {
        let keychain = Keychain::new()
            .with(Arc::new(StaticCredentials::new(
                Some("quay.io".to_string()),
                "quay".to_string(),
                "q".to_string(),
            )))
            .with(Arc::new(StaticCredentials::new(
                None,
                "any".to_string(),
                "a".to_string(),
            )));

        assert_eq!(
            keychain.get_credentials("quay.io").await.unwrap(),
            Some(("quay".to_string(), "q".to_string()))
        );
        assert_eq!(
            keychain.get_credentials("ghcr.io").await.unwrap(),
            Some(("any".to_string(), "a".to_string()))
        );
        assert_eq!(Keychain::new().get_credentials("ghcr.io").await.unwrap(), None);
    }
}
