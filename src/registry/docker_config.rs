use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use super::credentials::{normalize_registry_host, CredentialsProvider};

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn credentials(&self) -> Result<Option<(String, String)>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Some((username.clone(), password.clone())));
        }

        let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth)
            .context("Invalid base64 in docker config auth entry")?;
        let decoded =
            String::from_utf8(decoded).context("Docker config auth entry is not UTF-8")?;
        let (username, password) = decoded
            .split_once(':')
            .context("Docker config auth entry is not of the form user:password")?;
        Ok(Some((username.to_string(), password.to_string())))
    }
}

/// Reads credentials from a Docker CLI `config.json`, as written by
/// `docker login`.
///
/// The file is re-read on every lookup; a missing file means no credentials.
/// Credential helpers (`credsStore`, `credHelpers`) are not executed.
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            if !dir.is_empty() {
                return Some(Path::new(&dir).join("config.json"));
            }
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    fn load(&self) -> Result<Option<DockerConfigFile>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Docker config not found");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(config))
    }
}

#[async_trait]
impl CredentialsProvider for DockerConfigKeychain {
    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        let Some(config) = self.load()? else {
            return Ok(None);
        };
        let wanted = normalize_registry_host(registry_host);

        for (key, entry) in &config.auths {
            if normalize_registry_host(key) != wanted {
                continue;
            }
            if let Some(credentials) = entry
                .credentials()
                .with_context(|| format!("Bad auth entry for {key} in {}", self.path.display()))?
            {
                return Ok(Some(credentials));
            }
        }

        let helper = config
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry_host(key) == wanted)
            .map(|(_, helper)| helper)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            warn!(
                registry = registry_host,
                helper = %helper,
                "Docker credential helpers are not supported, falling back to anonymous access"
            );
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_base64_auth() {
        let dir = TempDir::new().unwrap();
        let auth = base64::engine::general_purpose::STANDARD.encode("alice:s3cret");
        let path = write_config(
            &dir,
            &format!(r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{auth}"}}}}}}"#),
        );

        let keychain = DockerConfigKeychain::new(path);
        assert_eq!(
            keychain.get_credentials("docker.io").await.unwrap(),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(keychain.get_credentials("ghcr.io").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reads_plain_username_password() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"auths": {"registry.example": {"username": "bob", "password": "pw"}}}"#,
        );

        let keychain = DockerConfigKeychain::new(path);
        assert_eq!(
            keychain.get_credentials("registry.example").await.unwrap(),
            Some(("bob".to_string(), "pw".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_anonymous() {
        let dir = TempDir::new().unwrap();
        let keychain = DockerConfigKeychain::new(dir.path().join("nope.json"));
        assert_eq!(keychain.get_credentials("docker.io").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_helper_only_entry_is_anonymous() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"auths": {"ghcr.io": {}}, "credsStore": "osxkeychain"}"#,
        );

        let keychain = DockerConfigKeychain::new(path);
        assert_eq!(keychain.get_credentials("ghcr.io").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_auth_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"auths": {"ghcr.io": {"auth": "!!!"}}}"#);

        let keychain = DockerConfigKeychain::new(path);
        assert!(keychain.get_credentials("ghcr.io").await.is_err());
    }
}
