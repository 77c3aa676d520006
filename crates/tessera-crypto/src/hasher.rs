use std::io::{self, Read};

use sha2::Digest as _;
use tessera_types::{Algorithm, Digest};

/// Digest calculator for a fixed algorithm.
///
/// Two well-known instances cover the two kinds of identity tessera tracks:
/// [`ContentHasher::CALL`] digests the deterministic encoding of a call graph,
/// [`ContentHasher::CONTENT`] digests the bytes a call produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: Algorithm,
}

impl ContentHasher {
    /// Hasher for canonical call encodings.
    pub const CALL: Self = Self {
        algorithm: Algorithm::Blake3,
    };
    /// Hasher for produced artifact bytes (OCI-compatible).
    pub const CONTENT: Self = Self {
        algorithm: Algorithm::CANONICAL,
    };

    /// Create a hasher for an explicit algorithm.
    pub const fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }

    /// The algorithm used by this hasher.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Hash raw bytes.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let raw = match self.algorithm {
            Algorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            Algorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
            Algorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        };
        into_digest(self.algorithm, &raw)
    }

    /// Hash several byte strings as one stream, each length-prefixed so
    /// that `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn hash_parts<'a>(&self, parts: impl IntoIterator<Item = &'a [u8]>) -> Digest {
        let mut state = StreamState::new(self.algorithm);
        for part in parts {
            state.update(&(part.len() as u64).to_le_bytes());
            state.update(part);
        }
        state.finish()
    }

    /// Hash everything readable from `reader`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<Digest> {
        let mut state = StreamState::new(self.algorithm);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            state.update(&buf[..n]);
        }
        Ok(state.finish())
    }

    /// Verify that `data` produces `expected`.
    pub fn verify(data: &[u8], expected: &Digest) -> bool {
        Self::new(expected.algorithm()).hash(data) == *expected
    }
}

enum StreamState {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamState {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
            Algorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self) -> Digest {
        match self {
            Self::Sha256(h) => into_digest(Algorithm::Sha256, &h.finalize()),
            Self::Sha512(h) => into_digest(Algorithm::Sha512, &h.finalize()),
            Self::Blake3(h) => into_digest(Algorithm::Blake3, h.finalize().as_bytes()),
        }
    }
}

fn into_digest(algorithm: Algorithm, raw: &[u8]) -> Digest {
    match Digest::from_raw(algorithm, raw) {
        Ok(d) => d,
        // Output sizes are fixed by the algorithm.
        Err(e) => unreachable!("hash output length mismatch: {e}"),
    }
}
