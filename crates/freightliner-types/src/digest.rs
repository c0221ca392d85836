//! Content-address digest type: `sha256:<64 hex>`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// A parsed `sha256:<64 hex>` digest. Stored normalized (lowercase hex) so that
/// digest equality is exact string equality, matching the checkpoint's
/// `src_digest == dst_digest` invariant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest is missing the `algorithm:hex` separator: {0:?}")]
    MissingSeparator(String),
    #[error("unsupported digest algorithm: {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("digest hex portion has wrong length for {algorithm}: expected {expected}, got {actual}")]
    WrongLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },
    #[error("digest hex portion is not valid hex: {0:?}")]
    InvalidHex(String),
}

impl Digest {
    /// Compute the sha256 digest of a byte slice.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hex = hex::encode(hasher.finalize());
        Self {
            algorithm: "sha256".to_string(),
            hex,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DigestParseError> {
        let (algorithm, hex_part) = s
            .split_once(':')
            .ok_or_else(|| DigestParseError::MissingSeparator(s.to_string()))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            other => return Err(DigestParseError::UnsupportedAlgorithm(other.to_string())),
        };

        if hex_part.len() != expected_len {
            return Err(DigestParseError::WrongLength {
                algorithm: algorithm.to_string(),
                expected: expected_len,
                actual: hex_part.len(),
            });
        }

        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestParseError::InvalidHex(hex_part.to_string()));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex_part.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}
