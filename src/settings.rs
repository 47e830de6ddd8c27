use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, ConfigError, Environment, File};
use serde::{de, Deserialize, Deserializer};

use crate::workload::WorkloadKind;

/// Prefix of environment variables overriding settings, e.g.
/// `KUBE_PIN_RETRY__MAX_ATTEMPTS=8`
pub const ENV_PREFIX: &str = "KUBE_PIN";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    /// Pin every container using the image, not only the first one
    #[serde(default, deserialize_with = "from_text")]
    pub update_all: bool,
}

/// A setting that may also arrive as text, as environment variables always do
#[derive(Deserialize)]
#[serde(untagged)]
enum OrText<T> {
    Value(T),
    Text(String),
}

fn from_text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    match OrText::<T>::deserialize(deserializer)? {
        OrText::Value(value) => Ok(value),
        OrText::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

/// A list, or a comma-separated string of items
fn list_from_text<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match OrText::<Vec<String>>::deserialize(deserializer)? {
        OrText::Value(items) => Ok(items),
        OrText::Text(text) => Ok(text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()),
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_registry_max_attempts() -> u32 {
    3
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kind() -> WorkloadKind {
    WorkloadKind::Deployment
}

fn default_field_manager() -> String {
    "kube-pin".to_string()
}

/// Backoff between conflicting writes
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    /// Total fetch/submit cycles before giving up on conflicts (default: 5)
    #[serde(default = "default_max_attempts", deserialize_with = "from_text")]
    pub max_attempts: u32,

    /// Delay after the first conflict in milliseconds (default: 10)
    #[serde(default = "default_initial_backoff_ms", deserialize_with = "from_text")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single delay in milliseconds (default: 1000)
    #[serde(default = "default_max_backoff_ms", deserialize_with = "from_text")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays (default: 2.0)
    #[serde(default = "default_multiplier", deserialize_with = "from_text")]
    pub multiplier: f64,

    /// Random fraction added to each delay, 0 to 1 (default: 0.1)
    #[serde(default = "default_jitter", deserialize_with = "from_text")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    /// Attempts for transient registry failures (default: 3)
    #[serde(default = "default_registry_max_attempts", deserialize_with = "from_text")]
    pub max_attempts: u32,

    /// Registries reached over plain HTTP (e.g. "localhost:5000")
    #[serde(default, deserialize_with = "list_from_text")]
    pub insecure_registries: Vec<String>,

    /// Static credentials, tried before the Docker config
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Restrict the static credentials to this registry host
    #[serde(default)]
    pub credentials_host: Option<String>,

    /// Docker CLI config file (defaults to $DOCKER_CONFIG/config.json or ~/.docker/config.json)
    #[serde(default)]
    pub docker_config: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_registry_max_attempts(),
            insecure_registries: Vec::new(),
            username: None,
            password: None,
            credentials_host: None,
            docker_config: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KubernetesSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_kind")]
    pub kind: WorkloadKind,

    /// Optional kubeconfig path (defaults to KUBECONFIG, ~/.kube/config or in-cluster)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Use the pod's service account instead of a kubeconfig
    #[serde(default, deserialize_with = "from_text")]
    pub in_cluster: bool,

    /// Field manager recorded on updates
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kind: default_kind(),
            kubeconfig: None,
            in_cluster: false,
            field_manager: default_field_manager(),
        }
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        lazy_static::lazy_static! {
            static ref ENV_VAR: regex::Regex =
                regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
        }

        ENV_VAR
            .replace_all(s, |caps: &regex::Captures<'_>| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match env::var(var_name) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Load settings: built-in defaults, then the optional config file
    /// (TOML or YAML, picked by extension), then `KUBE_PIN_*` environment
    /// variables.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::Message(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            tracing::info!("Loading config file: {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            // KUBE_PIN_CONFIG names the config file itself
            if k == "config" {
                continue;
            }
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.registry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "registry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Message(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Message(format!(
                "retry.jitter must be between 0 and 1, got {}",
                self.retry.jitter
            )));
        }
        if self.registry.username.is_some() != self.registry.password.is_some() {
            return Err(ConfigError::Message(
                "registry.username and registry.password must be set together".to_string(),
            ));
        }
        if self.kubernetes.namespace.is_empty() {
            return Err(ConfigError::Message(
                "kubernetes.namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
