use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kube_pin::error::{exit_code, PinError};
use kube_pin::oci::OciClient;
use kube_pin::reconcile::{Outcome, RetryPolicy};
use kube_pin::registry::keychain_from_settings;
use kube_pin::workload::{KubernetesStore, ResourceId};
use kube_pin::{or_cancel, pin_image, PinOptions, PinRequest};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Logs go to stderr, stdout carries the result lines
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}: {}", e.phase(), e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32, PinError> {
    let cancel = CancellationToken::new();
    spawn_cancellation(cancel.clone(), cli.timeout);

    let settings = cli.settings().map_err(PinError::Config)?;

    let resource = ResourceId::new(
        settings.kubernetes.kind,
        settings.kubernetes.namespace.clone(),
        cli.workload.clone(),
    );
    let request = PinRequest {
        resource: resource.clone(),
        image: cli.image.clone(),
        update_all: settings.update_all,
    };
    let options = PinOptions {
        conflict_retry: RetryPolicy::from_settings(&settings.retry),
        registry_retry: RetryPolicy::from_settings(&settings.retry)
            .with_max_attempts(settings.registry.max_attempts),
    };

    let keychain = keychain_from_settings(&settings.registry);
    let resolver = OciClient::new(
        Arc::new(keychain),
        settings.registry.insecure_registries.clone(),
    );
    // Kubeconfig exec plugins may hang
    let store = or_cancel(&cancel, KubernetesStore::connect(&settings.kubernetes))
        .await?
        .map_err(PinError::Config)?;

    let report = pin_image(&resolver, &store, &request, &options, &cancel).await?;

    println!("latest image digest is {}", report.digest);
    let code = match &report.outcome {
        Outcome::Updated { changes, attempts } => {
            for change in changes {
                println!("updated {} from {} to {}", resource, change.from, change.to);
            }
            info!(%resource, changes = changes.len(), attempts, "Workload updated");
            if cli.detailed_exit_code {
                exit_code::UPDATED
            } else {
                exit_code::SUCCESS
            }
        }
        Outcome::AlreadyCurrent { .. } => {
            println!("{} is up to date", resource);
            exit_code::SUCCESS
        }
    };

    Ok(code)
}

/// Cancel on Ctrl+C, or once `timeout` elapses
fn spawn_cancellation(cancel: CancellationToken, timeout: Option<Duration>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), cancelling");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    if let Some(timeout) = timeout {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Timeout reached, cancelling");
                    cancel.cancel();
                }
            }
        });
    }
}
