use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use kube_pin::settings::Settings;
use kube_pin::workload::WorkloadKind;

/// Pin a workload's container image to the digest the registry currently
/// serves for IMAGE_REF.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Name of the workload to be updated
    #[arg(value_name = "DEPLOYMENT_NAME")]
    pub workload: String,

    /// Reference of the upstream image (e.g. ghcr.io/acme/app:main)
    #[arg(value_name = "IMAGE_REF")]
    pub image: String,

    /// Path to the kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long, conflicts_with = "in_cluster")]
    pub kubeconfig: Option<PathBuf>,

    /// Use in-cluster Kubernetes authentication
    #[arg(long)]
    pub in_cluster: bool,

    /// Namespace containing the targeted workload [default: default]
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Kind of the targeted workload [default: deployment]
    #[arg(long, value_enum)]
    pub kind: Option<WorkloadKind>,

    /// Pin every container using the image instead of only the first one
    #[arg(long)]
    pub all: bool,

    /// Attempts before giving up on concurrent modifications [default: 5]
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Abort if the whole operation takes longer than this (e.g. '30s', '2m')
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Configuration file (TOML or YAML)
    #[arg(long, env = "KUBE_PIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Exit with 10 instead of 0 when the workload was changed
    #[arg(long)]
    pub detailed_exit_code: bool,
}

impl Cli {
    /// Load settings and apply command-line overrides on top
    pub fn settings(&self) -> Result<Settings> {
        let mut settings =
            Settings::new(self.config.as_deref()).context("Failed to load configuration")?;

        if let Some(namespace) = &self.namespace {
            settings.kubernetes.namespace = namespace.clone();
        }
        if let Some(kind) = self.kind {
            settings.kubernetes.kind = kind;
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            settings.kubernetes.kubeconfig = Some(kubeconfig.clone());
            settings.kubernetes.in_cluster = false;
        }
        if self.in_cluster {
            settings.kubernetes.in_cluster = true;
        }
        if self.all {
            settings.update_all = true;
        }
        if let Some(max_attempts) = self.max_attempts {
            settings.retry.max_attempts = max_attempts;
        }

        settings.validate().context("Invalid configuration")?;
        Ok(settings)
    }
}

/// Parse a duration like '500ms', '30s', '5m' or '1h'
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Duration string is empty");
    }

    let (num_str, unit) = if let Some(num_str) = s.strip_suffix("ms") {
        (num_str, "ms")
    } else {
        let split = s.len() - s.chars().last().map_or(0, char::len_utf8);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str.parse().context("Invalid duration number")?;

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => bail!("Invalid duration unit '{}'. Use ms, s, m, or h", unit),
    };

    let secs = num
        .checked_mul(secs_per_unit)
        .with_context(|| format!("Duration '{}' is too large", s))?;
    Ok(Duration::from_secs(secs))
}
