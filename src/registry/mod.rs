pub mod credentials;
pub mod docker_config;

use std::sync::Arc;

pub use credentials::{CredentialsProvider, Keychain, StaticCredentials};
pub use docker_config::DockerConfigKeychain;

use crate::settings::RegistrySettings;

/// Build the credential chain used for digest resolution: statically
/// configured credentials first, then the Docker CLI config, then anonymous.
pub fn keychain_from_settings(settings: &RegistrySettings) -> Keychain {
    let mut keychain = Keychain::new();

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        keychain = keychain.with(Arc::new(StaticCredentials::new(
            settings.credentials_host.clone(),
            username.clone(),
            password.clone(),
        )));
    }

    let docker_config = settings
        .docker_config
        .clone()
        .or_else(DockerConfigKeychain::default_path);
    if let Some(path) = docker_config {
        keychain = keychain.with(Arc::new(DockerConfigKeychain::new(path)));
    }

    keychain
}
