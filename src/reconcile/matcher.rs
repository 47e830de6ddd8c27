use crate::oci::reference::{split_suffix, Suffix, DEFAULT_TAG};

/// What currently follows the image name in a container entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixKind {
    Tag,
    Digest,
}

/// A container entry whose bare image name equals the logical image name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMatch {
    /// Position in the container list
    pub index: usize,
    /// The entry as found
    pub image: String,
    /// Bare repository name of the entry
    pub name: String,
    pub kind: SuffixKind,
    /// Tag or digest; the implicit default tag when the entry has no suffix
    pub suffix: String,
}

impl ContainerMatch {
    fn from_entry(index: usize, image: &str) -> Self {
        let (name, suffix) = split_suffix(image);
        let (kind, suffix) = match suffix {
            Suffix::Digest(digest) => (SuffixKind::Digest, digest),
            Suffix::Tag(tag) => (SuffixKind::Tag, tag),
            Suffix::None => (SuffixKind::Tag, DEFAULT_TAG),
        };
        Self {
            index,
            image: image.to_string(),
            name: name.to_string(),
            kind,
            suffix: suffix.to_string(),
        }
    }

    /// Whether the entry is already pinned to exactly `digest`
    pub fn is_pinned_to(&self, digest: &str) -> bool {
        self.kind == SuffixKind::Digest && self.suffix == digest
    }
}

/// Every entry referring to `logical_name`, in container order.
///
/// Comparison is exact string equality on the bare name; entries without an
/// image never match.
pub fn find_all_containers<S: AsRef<str>>(
    logical_name: &str,
    entries: &[Option<S>],
) -> Vec<ContainerMatch> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let image = entry.as_ref()?.as_ref();
            let (name, _) = split_suffix(image);
            (name == logical_name).then(|| ContainerMatch::from_entry(index, image))
        })
        .collect()
}

/// The first entry referring to `logical_name`
pub fn find_container<S: AsRef<str>>(
    logical_name: &str,
    entries: &[Option<S>],
) -> Option<ContainerMatch> {
    entries.iter().enumerate().find_map(|(index, entry)| {
        let image = entry.as_ref()?.as_ref();
        let (name, _) = split_suffix(image);
        (name == logical_name).then(|| ContainerMatch::from_entry(index, image))
    })
}
