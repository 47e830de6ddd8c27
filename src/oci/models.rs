use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DIGEST_ALGORITHM: Regex = Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*$").unwrap();
    static ref DIGEST_ENCODED: Regex = Regex::new(r"^[a-zA-Z0-9=_-]+$").unwrap();
}

/// Content digest of a manifest (`algorithm:encoded`, e.g. `sha256:<hex>`).
///
/// Only ever compared as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn parse(value: &str) -> Result<Self, String> {
        let (algorithm, encoded) = value
            .split_once(':')
            .ok_or_else(|| format!("digest {value:?} is not of the form algorithm:hex"))?;
        if !DIGEST_ALGORITHM.is_match(algorithm) {
            return Err(format!("invalid digest algorithm {algorithm:?}"));
        }
        if !DIGEST_ENCODED.is_match(encoded) {
            return Err(format!("invalid digest value {encoded:?}"));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_parse() {
        let d = Digest::parse("sha256:aa11").unwrap();
        assert_eq!(d.as_str(), "sha256:aa11");
        assert_eq!(d.to_string(), "sha256:aa11");
    }

    #[test]
    fn test_digest_rejects_garbage() {
        assert!(Digest::parse("aa11").is_err());
        assert!(Digest::parse("sha256:").is_err());
        assert!(Digest::parse(":aa11").is_err());
        assert!(Digest::parse("SHA256:aa11").is_err());
    }
}
