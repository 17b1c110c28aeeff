//! Where the model artifact lives, and how it gets there.

use crate::error::DescriptorError;
use reqwest::Url;
use std::path::{Path, PathBuf};

pub mod fetcher;
mod staging;

pub use fetcher::{ArtifactFetcher, ArtifactSource, FetchSettings};

/// Remote location plus local cache path, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDescriptor {
    remote: Option<Url>,
    local_path: PathBuf,
    sha256: Option<String>,
}

impl ArtifactDescriptor {
    pub fn new(remote: Option<&str>, local_path: impl Into<PathBuf>) -> Result<Self, DescriptorError> {
        let remote = match remote.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| DescriptorError::InvalidUrl { url: raw.to_string(), reason: e.to_string() })?;
                match url.scheme() {
                    "http" | "https" | "file" => Some(url),
                    other => return Err(DescriptorError::UnsupportedScheme(other.to_string())),
                }
            }
        };
        Ok(Self { remote, local_path: local_path.into(), sha256: None })
    }

    /// An artifact that is expected to already exist locally.
    pub fn local_only(local_path: impl Into<PathBuf>) -> Self {
        Self { remote: None, local_path: local_path.into(), sha256: None }
    }

    pub fn with_sha256(mut self, hex_digest: Option<&str>) -> Self {
        self.sha256 = hex_digest.map(str::trim).filter(|s| !s.is_empty()).map(str::to_ascii_lowercase);
        self
    }

    pub fn remote(&self) -> Option<&Url> { self.remote.as_ref() }
    pub fn local_path(&self) -> &Path { &self.local_path }
    pub fn sha256(&self) -> Option<&str> { self.sha256.as_deref() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_schemes() {
        for u in ["http://models.local/a.hvrf", "https://x/y", "file:///srv/model.hvrf"] {
            assert!(ArtifactDescriptor::new(Some(u), "m.hvrf").is_ok(), "{u}");
        }
    }

    #[test]
    fn rejects_unsupported_scheme_and_garbage() {
        assert!(matches!(ArtifactDescriptor::new(Some("s3://bucket/key"), "m"), Err(DescriptorError::UnsupportedScheme(s)) if s == "s3"));
        assert!(matches!(ArtifactDescriptor::new(Some("not a url"), "m"), Err(DescriptorError::InvalidUrl { .. })));
    }

    #[test]
    fn blank_remote_means_local_only() {
        let d = ArtifactDescriptor::new(Some("  "), "m.hvrf").unwrap();
        assert!(d.remote().is_none());
    }

    #[test]
    fn digest_is_normalised() {
        let d = ArtifactDescriptor::local_only("m").with_sha256(Some(" ABCD "));
        assert_eq!(d.sha256(), Some("abcd"));
        assert_eq!(ArtifactDescriptor::local_only("m").with_sha256(Some("")).sha256(), None);
    }
}
