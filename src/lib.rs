pub mod error;
pub mod oci;
pub mod reconcile;
pub mod registry;
pub mod settings;
pub mod workload;


use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use error::PinError;
use oci::{Digest, DigestResolver, ImageReference};
use reconcile::{reconcile, Outcome, PinTarget, RetryPolicy};
use workload::{ResourceId, ResourceStore};

/// One pin operation: which workload, which image
#[derive(Debug, Clone)]
pub struct PinRequest {
    pub resource: ResourceId,
    /// Image reference as given by the user, e.g. `ghcr.io/acme/app:main`
    pub image: String,
    pub update_all: bool,
}

/// Retry budgets for the two remote phases
#[derive(Debug, Clone, Default)]
pub struct PinOptions {
    /// Retries of the whole update cycle on version conflicts
    pub conflict_retry: RetryPolicy,
    /// Retries of digest resolution on transient registry failures
    pub registry_retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct PinReport {
    pub reference: ImageReference,
    pub digest: Digest,
    pub outcome: Outcome,
}

/// Run `future` unless `cancel` fires first
pub async fn or_cancel<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, PinError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PinError::Cancelled),
        output = future => Ok(output),
    }
}

/// Resolve the digest, retrying only transient registry failures
pub async fn resolve_digest(
    resolver: &dyn DigestResolver,
    reference: &ImageReference,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Digest, PinError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match or_cancel(cancel, resolver.resolve(reference)).await? {
            Ok(digest) => return Ok(digest),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    image = %reference,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Registry request failed, retrying"
                );
                or_cancel(cancel, tokio::time::sleep(delay)).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Pin the workload's container(s) using `request.image` to the digest the
/// registry currently serves for it.
pub async fn pin_image(
    resolver: &dyn DigestResolver,
    store: &dyn ResourceStore,
    request: &PinRequest,
    options: &PinOptions,
    cancel: &CancellationToken,
) -> Result<PinReport, PinError> {
    let reference = ImageReference::parse(&request.image)?;
    info!(
        image = %reference,
        registry = reference.registry(),
        tag = ?reference.tag_or_default(),
        "Resolving image digest"
    );

    let digest = resolve_digest(resolver, &reference, &options.registry_retry, cancel).await?;

    let target = PinTarget {
        resource: &request.resource,
        image_name: reference.name(),
        digest: &digest,
        update_all: request.update_all,
    };
    let outcome = reconcile(store, &target, &options.conflict_retry, cancel).await?;

    Ok(PinReport {
        reference,
        digest,
        outcome,
    })
}
