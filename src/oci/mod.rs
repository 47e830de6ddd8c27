mod client;
mod error;
mod models;
pub(crate) mod reference;

pub use client::{DigestResolver, OciClient};
pub use error::{RegistryError, RegistryErrorKind};
pub use models::Digest;
pub use reference::{ImageReference, ReferenceError};
