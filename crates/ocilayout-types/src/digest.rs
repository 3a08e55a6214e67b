use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Digest algorithms accepted by the layout.
///
/// `sha256` is the default for everything the layout writes. `sha512` and
/// `blake3` are accepted wherever a digest is parsed, so layouts produced by
/// other tools remain readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
    Blake3,
}

impl Algorithm {
    /// Name as it appears before the `:` of a digest string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the lowercase hex encoding of this algorithm's output.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            other => Err(TypeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Content-addressed identifier: an algorithm tag plus the lowercase hex
/// encoding of the hash (`sha256:2c26b46b...`).
///
/// A `Digest` is always well formed: construction validates the algorithm and
/// the hex length. It says nothing about whether content exists for it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Create a `sha256` digest from a pre-computed hash.
    pub fn sha256(hash: [u8; 32]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hash),
        }
    }

    /// Create a `sha512` digest from a pre-computed hash.
    pub fn sha512(hash: [u8; 64]) -> Self {
        Self {
            algorithm: Algorithm::Sha512,
            hex: hex::encode(hash),
        }
    }

    /// Create a `blake3` digest from a pre-computed hash.
    pub fn blake3(hash: [u8; 32]) -> Self {
        Self {
            algorithm: Algorithm::Blake3,
            hex: hex::encode(hash),
        }
    }

    /// Build a digest from raw hash output of unknown length.
    pub fn from_raw(algorithm: Algorithm, hash: &[u8]) -> Result<Self, TypeError> {
        let expected = algorithm.hex_len() / 2;
        if hash.len() != expected {
            return Err(TypeError::InvalidLength {
                expected,
                actual: hash.len(),
            });
        }
        Ok(Self {
            algorithm,
            hex: hex::encode(hash),
        })
    }

    /// Build a digest from an algorithm and an already-encoded hex string.
    pub fn from_hex(algorithm: Algorithm, encoded: &str) -> Result<Self, TypeError> {
        validate_hex(algorithm, encoded)?;
        Ok(Self {
            algorithm,
            hex: encoded.to_string(),
        })
    }

    /// The algorithm part.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash part.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Short hex representation (first 12 characters), as shown by image tools.
    pub fn short_hex(&self) -> &str {
        &self.hex[..12]
    }

    /// The decoded hash bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Validated at construction.
        hex::decode(&self.hex).unwrap_or_default()
    }

    /// Relative path components of the blob in a layout: `(algorithm, hex)`.
    pub fn path_components(&self) -> (&'static str, &str) {
        (self.algorithm.as_str(), &self.hex)
    }
}

fn validate_hex(algorithm: Algorithm, encoded: &str) -> Result<(), TypeError> {
    if encoded.len() != algorithm.hex_len() {
        return Err(TypeError::InvalidLength {
            expected: algorithm.hex_len(),
            actual: encoded.len(),
        });
    }
    if !encoded
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(TypeError::InvalidHex(encoded.to_string()));
    }
    Ok(())
}

impl FromStr for Digest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, encoded) = s.split_once(':').ok_or_else(|| TypeError::InvalidDigest {
            digest: s.to_string(),
            reason: "missing ':' separator".to_string(),
        })?;
        let algorithm: Algorithm = alg.parse()?;
        Self::from_hex(algorithm, encoded)
    }
}

impl TryFrom<String> for Digest {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}
