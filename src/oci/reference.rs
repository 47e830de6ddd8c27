use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::models::Digest;

/// Registry used when a reference names no host
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

lazy_static! {
    static ref REPOSITORY_COMPONENT: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap();
    static ref REGISTRY_HOST: Regex =
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?$").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,

    #[error("invalid image reference {reference:?}: {reason}")]
    Malformed { reference: String, reason: String },
}

impl ReferenceError {
    fn malformed(reference: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// Tag or digest trailing an image name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Suffix<'a> {
    None,
    Tag(&'a str),
    Digest(&'a str),
}

/// Split an image string into its name and its tag or digest.
///
/// `@` is looked at first so the `:` inside a digest is never taken for a tag
/// separator. A `:` only starts a tag when it follows the last `/`, otherwise
/// it belongs to a registry port (`localhost:5000/app`). For `name:tag@digest`
/// the tag is dropped along with the digest.
pub(crate) fn split_suffix(image: &str) -> (&str, Suffix<'_>) {
    if let Some((name, digest)) = image.split_once('@') {
        let (name, _) = split_tag(name);
        return (name, Suffix::Digest(digest));
    }
    match split_tag(image) {
        (name, Some(tag)) => (name, Suffix::Tag(tag)),
        (name, None) => (name, Suffix::None),
    }
}

fn split_tag(name: &str) -> (&str, Option<&str>) {
    let path_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[path_start..].rfind(':') {
        Some(i) => {
            let at = path_start + i;
            (&name[..at], Some(&name[at + 1..]))
        }
        None => (name, None),
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// A parsed image reference such as `ghcr.io/acme/app:v1` or
/// `nginx@sha256:...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    name: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, suffix) = split_suffix(reference);
        if name.is_empty() {
            return Err(ReferenceError::malformed(reference, "missing repository name"));
        }

        let (tag, digest) = match suffix {
            Suffix::None => (None, None),
            Suffix::Tag(tag) => {
                if !TAG.is_match(tag) {
                    return Err(ReferenceError::malformed(
                        reference,
                        format!("invalid tag {tag:?}"),
                    ));
                }
                (Some(tag.to_string()), None)
            }
            Suffix::Digest(digest) => {
                let digest = Digest::parse(digest)
                    .map_err(|reason| ReferenceError::malformed(reference, reason))?;
                (None, Some(digest))
            }
        };

        let (registry, path) = match name.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (first.to_string(), rest),
            _ => (DEFAULT_REGISTRY.to_string(), name),
        };

        if !REGISTRY_HOST.is_match(&registry) {
            return Err(ReferenceError::malformed(
                reference,
                format!("invalid registry host {registry:?}"),
            ));
        }

        for component in path.split('/') {
            if component.is_empty() {
                return Err(ReferenceError::malformed(
                    reference,
                    "empty repository path component",
                ));
            }
            if !REPOSITORY_COMPONENT.is_match(component) {
                return Err(ReferenceError::malformed(
                    reference,
                    format!("invalid repository path component {component:?}"),
                ));
            }
        }

        let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
            format!("library/{path}")
        } else {
            path.to_string()
        };

        Ok(Self {
            name: name.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The image name as written, without tag or digest. This is the name
    /// container entries are matched against.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path as the registry API expects it (`library/` expanded
    /// for Docker Hub official images)
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The explicit tag, or the implicit default when the reference carries
    /// no tag and no digest
    pub fn tag_or_default(&self) -> Option<&str> {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => Some(tag),
            (None, None) => Some(DEFAULT_TAG),
            (None, Some(_)) => None,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.tag, &self.digest) {
            (_, Some(digest)) => write!(f, "{}@{}", self.name, digest),
            (Some(tag), None) => write!(f, "{}:{}", self.name, tag),
            (None, None) => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_tag() {
        let r = ImageReference::parse("registry.example/app:v3").unwrap();
        assert_eq!(r.registry(), "registry.example");
        assert_eq!(r.repository(), "app");
        assert_eq!(r.name(), "registry.example/app");
        assert_eq!(r.tag(), Some("v3"));
        assert!(r.digest().is_none());
    }

    #[test]
    fn test_parse_digest_ignores_inner_colon() {
        let r = ImageReference::parse(&format!("ghcr.io/acme/app@{DIGEST}")).unwrap();
        assert_eq!(r.name(), "ghcr.io/acme/app");
        assert_eq!(r.repository(), "acme/app");
        assert_eq!(r.digest().map(Digest::as_str), Some(DIGEST));
        assert!(r.tag().is_none());
        assert_eq!(r.tag_or_default(), None);
    }

    #[test]
    fn test_parse_digest_takes_precedence_over_tag() {
        let r = ImageReference::parse(&format!("ghcr.io/acme/app:v1@{DIGEST}")).unwrap();
        assert_eq!(r.name(), "ghcr.io/acme/app");
        assert!(r.tag().is_none());
        assert_eq!(r.digest().map(Digest::as_str), Some(DIGEST));
    }

    #[test]
    fn test_parse_bare_name_uses_default_tag() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.name(), "nginx");
        assert!(r.tag().is_none());
        assert!(r.digest().is_none());
        assert_eq!(r.tag_or_default(), Some("latest"));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/team/app").unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "team/app");
        assert!(r.tag().is_none());

        let r = ImageReference::parse("localhost:5000/team/app:1.2").unwrap();
        assert_eq!(r.name(), "localhost:5000/team/app");
        assert_eq!(r.tag(), Some("1.2"));
    }

    #[test]
    fn test_parse_docker_hub_namespace() {
        let r = ImageReference::parse("bitnami/redis:7").unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "bitnami/redis");
        assert_eq!(r.name(), "bitnami/redis");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ImageReference::parse(""), Err(ReferenceError::Empty));
        assert_eq!(ImageReference::parse("   "), Err(ReferenceError::Empty));
        for bad in [
            ":v1",
            "App:v1",
            "registry.example//app",
            "registry.example/app:",
            "registry.example/app:-bad",
            "registry.example/app@sha256",
            "registry.example/app@:abc",
            "registry.example/app@sha256:not hex",
        ] {
            assert!(
                matches!(
                    ImageReference::parse(bad),
                    Err(ReferenceError::Malformed { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips_input_form() {
        for input in ["nginx", "registry.example/app:v3"] {
            assert_eq!(ImageReference::parse(input).unwrap().to_string(), input);
        }
        let pinned = format!("registry.example/app@{DIGEST}");
        assert_eq!(ImageReference::parse(&pinned).unwrap().to_string(), pinned);
    }

    #[test]
    fn test_split_suffix() {
        assert_eq!(split_suffix("app"), ("app", Suffix::None));
        assert_eq!(split_suffix("app:v1"), ("app", Suffix::Tag("v1")));
        assert_eq!(
            split_suffix("localhost:5000/app"),
            ("localhost:5000/app", Suffix::None)
        );
        assert_eq!(
            split_suffix("app@sha256:aa11"),
            ("app", Suffix::Digest("sha256:aa11"))
        );
        assert_eq!(
            split_suffix("app:v1@sha256:aa11"),
            ("app", Suffix::Digest("sha256:aa11"))
        );
    }
}
