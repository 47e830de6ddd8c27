use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::matcher::{find_all_containers, find_container, ContainerMatch};
use super::retry::RetryPolicy;
use crate::oci::Digest;
use crate::workload::{ResourceId, ResourceStore, StoreError, UpdateError, VersionedDocument};

/// What to pin, and where
#[derive(Debug, Clone)]
pub struct PinTarget<'a> {
    pub resource: &'a ResourceId,
    /// Bare image name the containers are matched on
    pub image_name: &'a str,
    pub digest: &'a Digest,
    /// Pin every matching container instead of only the first one
    pub update_all: bool,
}

/// A container image rewritten by a successful update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChange {
    pub index: usize,
    pub container: Option<String>,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated {
        changes: Vec<ImageChange>,
        /// Fetch/submit cycles it took, including conflicting ones
        attempts: u32,
    },
    AlreadyCurrent {
        /// The matching images, all already pinned
        images: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no container in {resource} uses image {image}")]
    NotFoundInResource { resource: String, image: String },

    #[error(
        "{resource} kept changing underneath us; gave up after {attempts} attempts, re-run to try again"
    )]
    ConflictExhausted { resource: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cancelled")]
    Cancelled,
}

/// Result of inspecting one fetched copy of the workload
enum Plan {
    Current(Vec<ContainerMatch>),
    Write(VersionedDocument, Vec<ImageChange>),
}

/// Decide what (if anything) to change in a freshly fetched document
fn plan(target: &PinTarget<'_>, mut fetched: VersionedDocument) -> Result<Plan, ReconcileError> {
    let images = fetched
        .container_images()
        .ok_or_else(|| StoreError::Malformed {
            resource: target.resource.to_string(),
            message: "no spec.template.spec.containers list".to_string(),
        })?;

    let matches = if target.update_all {
        find_all_containers(target.image_name, &images)
    } else {
        find_container(target.image_name, &images).into_iter().collect()
    };
    if matches.is_empty() {
        return Err(ReconcileError::NotFoundInResource {
            resource: target.resource.to_string(),
            image: target.image_name.to_string(),
        });
    }

    let digest = target.digest.as_str();
    let stale: Vec<&ContainerMatch> = matches.iter().filter(|m| !m.is_pinned_to(digest)).collect();
    if stale.is_empty() {
        return Ok(Plan::Current(matches));
    }

    let mut changes = Vec::with_capacity(stale.len());
    for m in stale {
        let pinned = format!("{}@{}", m.name, digest);
        fetched.set_container_image(m.index, &pinned);
        changes.push(ImageChange {
            index: m.index,
            container: fetched.container_name(m.index).map(str::to_string),
            from: m.image.clone(),
            to: pinned,
        });
    }
    Ok(Plan::Write(fetched, changes))
}

async fn or_cancel<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ReconcileError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        output = future => Ok(output),
    }
}

/// Pin the target's matching container(s) to the digest.
///
/// Each attempt fetches a fresh copy, rewrites it in memory and submits it
/// with the version it was read at. Only a version conflict starts another
/// attempt; every other failure ends the operation. At most
/// `policy.max_attempts` fetches are made.
pub async fn reconcile(
    store: &dyn ResourceStore,
    target: &PinTarget<'_>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Outcome, ReconcileError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(resource = %target.resource, attempt, "Fetching workload");

        let fetched = or_cancel(cancel, store.get(target.resource)).await??;

        let (document, changes) = match plan(target, fetched)? {
            Plan::Current(matches) => {
                info!(
                    resource = %target.resource,
                    digest = %target.digest,
                    "Workload is already pinned to the latest digest"
                );
                return Ok(Outcome::AlreadyCurrent {
                    images: matches.into_iter().map(|m| m.image).collect(),
                });
            }
            Plan::Write(document, changes) => (document, changes),
        };

        match or_cancel(cancel, store.update(target.resource, &document)).await? {
            Ok(()) => {
                for change in &changes {
                    info!(
                        resource = %target.resource,
                        container = ?change.container,
                        from = %change.from,
                        to = %change.to,
                        attempt,
                        "Pinned container image"
                    );
                }
                return Ok(Outcome::Updated {
                    changes,
                    attempts: attempt,
                });
            }
            Err(UpdateError::Conflict(message)) => {
                if attempt >= max_attempts {
                    return Err(ReconcileError::ConflictExhausted {
                        resource: target.resource.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    resource = %target.resource,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    conflict = %message,
                    "Concurrent modification detected, retrying"
                );
                or_cancel(cancel, tokio::time::sleep(delay)).await?;
            }
            Err(UpdateError::Store(e)) => return Err(e.into()),
        }
    }
}
