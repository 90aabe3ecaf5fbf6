use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Error type for OCI digest operations
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid digest format: {0}")]
    InvalidFormat(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// An algorithm-prefixed OCI content digest (`sha256:<hex>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: String,
    hex: String,
}

impl OciDigest {
    /// Digest of a byte slice, using the default sha256 algorithm
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Get the algorithm part of the digest
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hex part of the digest
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for OciDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for OciDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(DigestError::InvalidFormat(s.to_string()));
        }

        let algorithm = parts[0].to_string();
        let hex = parts[1].to_string();

        if algorithm != "sha256" {
            return Err(DigestError::UnsupportedAlgorithm(algorithm));
        }

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidFormat(s.to_string()));
        }

        Ok(OciDigest { algorithm, hex })
    }
}

impl serde::Serialize for OciDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for OciDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OciDigest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Cumulative chain identity over an ordered list of layer diff-IDs.
///
/// The chain of a single layer is its diff-ID; each further layer extends the
/// chain by digesting `"<chain> <diff-id>"`. Used as the snapshot key of an
/// unpacked layer stack. Returns `None` for an empty list.
pub fn chain_id(diff_ids: &[OciDigest]) -> Option<OciDigest> {
    let mut iter = diff_ids.iter();
    let mut chain = iter.next()?.clone();
    for diff_id in iter {
        chain = OciDigest::from_bytes(format!("{} {}", chain, diff_id).as_bytes());
    }
    Some(chain)
}
