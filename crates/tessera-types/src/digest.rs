use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A supported digest algorithm.
///
/// The string form (`sha256`, `sha512`, `blake3`) is the prefix of a
/// [`Digest`]'s text representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Sha512,
    Blake3,
}

impl Algorithm {
    /// The algorithm implied when only the hex portion of a digest is known.
    pub const CANONICAL: Self = Self::Sha256;

    /// Lowercase algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length in bytes of a raw digest produced by this algorithm.
    pub fn size(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 32,
            Self::Sha512 => 64,
        }
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

/// Content-addressed digest in `algorithm:hex` form.
///
/// Used both for call digests (how a value was derived) and for content
/// digests (what bytes a value holds). The hex portion is always lowercase and
/// exactly `2 * algorithm.size()` characters long, so two equal digests always
/// have equal text.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    /// Build a digest from raw hash bytes.
    pub fn from_raw(algorithm: Algorithm, bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != algorithm.size() {
            return Err(TypeError::InvalidLength {
                expected: algorithm.size(),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            algorithm,
            encoded: hex::encode(bytes),
        })
    }

    /// Build a digest from an algorithm and its hex-encoded portion.
    pub fn from_encoded(algorithm: Algorithm, encoded: &str) -> Result<Self, TypeError> {
        validate_encoded(algorithm, encoded).map_err(|reason| TypeError::InvalidDigest {
            input: format!("{algorithm}:{encoded}"),
            reason,
        })?;
        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }

    /// Parse an `algorithm:hex` string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let Some((alg, encoded)) = s.split_once(':') else {
            return Err(TypeError::InvalidDigest {
                input: s.to_string(),
                reason: "missing algorithm separator".into(),
            });
        };
        let algorithm = alg.parse::<Algorithm>()?;
        Self::from_encoded(algorithm, encoded)
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded portion, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Raw digest bytes.
    pub fn to_raw(&self) -> Vec<u8> {
        // Validated on construction.
        hex::decode(&self.encoded).unwrap_or_default()
    }

    /// Short representation (algorithm plus first 12 hex characters).
    pub fn short(&self) -> String {
        format!("{}:{}", self.algorithm, &self.encoded[..12])
    }
}

fn validate_encoded(algorithm: Algorithm, encoded: &str) -> Result<(), String> {
    let expected = algorithm.size() * 2;
    if encoded.len() != expected {
        return Err(format!(
            "expected {expected} hex characters, got {}",
            encoded.len()
        ));
    }
    if !encoded
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err("hex portion must be lowercase hexadecimal".into());
    }
    Ok(())
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_string()
    }
}
