use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error type for image reference parsing
#[derive(Debug, Error)]
pub enum ImageReferenceError {
    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// Represents an OCI image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Optional hostname (registry)
    pub hostname: Option<String>,
    /// Repository name
    pub name: String,
    /// Tag
    pub tag: String,
}

impl ImageReference {
    /// Registry API endpoint for this reference's hostname. `docker.io` is an
    /// alias that resolves to the canonical Docker Hub endpoint.
    pub fn registry_endpoint(&self) -> String {
        match self.hostname.as_deref() {
            Some("docker.io") | None => "https://registry-1.docker.io".to_string(),
            Some(host) => format!("https://{}", host),
        }
    }

    /// Repository path on the registry. Docker Hub official images live under
    /// the implicit `library/` namespace.
    pub fn repository(&self) -> String {
        let docker_hub = matches!(self.hostname.as_deref(), Some("docker.io") | None);
        if docker_hub && !self.name.contains('/') {
            format!("library/{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ImageReferenceError::InvalidFormat(s.to_string()));
        }

        // Parse image reference in the format: [hostname/]name[:tag]
        let (hostname, rest) = match s.split_once('/') {
            // The first component is a hostname only if it looks like one
            Some((first, rest)) if first.contains('.') || first.contains(':') => {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, s.to_string()),
        };

        let (name, tag) = match rest.rsplit_once(':') {
            Some((name, tag)) => (name.to_string(), tag.to_string()),
            None => (rest, "latest".to_string()),
        };

        if name.is_empty() {
            return Err(ImageReferenceError::InvalidFormat(s.to_string()));
        }

        Ok(ImageReference { hostname, name, tag })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hostname) = &self.hostname {
            write!(f, "{}/", hostname)?;
        }
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Portion of a raw reference string after the last `/`, used to name patch
/// files for a (base, target) pair. Colons are permitted; slashes cannot
/// appear in the result.
pub fn basename(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fully_qualified_reference() {
        let r: ImageReference = "docker.io/library/alpine:3.15.10".parse().unwrap();
        assert_eq!(r.hostname.as_deref(), Some("docker.io"));
        assert_eq!(r.name, "library/alpine");
        assert_eq!(r.tag, "3.15.10");
        assert_eq!(r.to_string(), "docker.io/library/alpine:3.15.10");
    }

    #[test]
    fn defaults_to_latest_tag() {
        let r: ImageReference = "alpine".parse().unwrap();
        assert_eq!(r.hostname, None);
        assert_eq!(r.name, "alpine");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn bare_names_resolve_to_docker_hub_library() {
        let r: ImageReference = "alpine:latest".parse().unwrap();
        assert_eq!(r.registry_endpoint(), "https://registry-1.docker.io");
        assert_eq!(r.repository(), "library/alpine");

        let r: ImageReference = "quay.io/coreos/etcd:v3.5.0".parse().unwrap();
        assert_eq!(r.registry_endpoint(), "https://quay.io");
        assert_eq!(r.repository(), "coreos/etcd");
    }

    #[test]
    fn rejects_empty_reference() {
        assert!("".parse::<ImageReference>().is_err());
    }

    #[test]
    fn basename_keeps_tag() {
        assert_eq!(basename("docker.io/library/alpine:3.15.10"), "alpine:3.15.10");
        assert_eq!(basename("alpine:latest"), "alpine:latest");
    }
}
