use ocilayout_types::{Algorithm, Digest};
use sha2::Digest as _;

/// Streaming content hasher for a single [`Algorithm`].
///
/// Feed bytes with [`update`](Self::update) and call
/// [`finalize`](Self::finalize) once to obtain the [`Digest`].
pub struct Digester {
    state: State,
    bytes: u64,
}

enum State {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    /// Create a hasher for the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => State::Sha512(sha2::Sha512::new()),
            Algorithm::Blake3 => State::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { state, bytes: 0 }
    }

    /// The algorithm this hasher computes.
    pub fn algorithm(&self) -> Algorithm {
        match self.state {
            State::Sha256(_) => Algorithm::Sha256,
            State::Sha512(_) => Algorithm::Sha512,
            State::Blake3(_) => Algorithm::Blake3,
        }
    }

    /// Absorb more content.
    pub fn update(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
        match &mut self.state {
            State::Sha256(h) => h.update(data),
            State::Sha512(h) => h.update(data),
            State::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Number of bytes absorbed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher and produce the digest.
    pub fn finalize(self) -> Digest {
        match self.state {
            State::Sha256(h) => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&h.finalize());
                Digest::sha256(out)
            }
            State::Sha512(h) => {
                let mut out = [0u8; 64];
                out.copy_from_slice(&h.finalize());
                Digest::sha512(out)
            }
            State::Blake3(h) => Digest::blake3(*h.finalize().as_bytes()),
        }
    }
}

impl std::fmt::Debug for Digester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Digester")
            .field("algorithm", &self.algorithm())
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Hash an in-memory buffer in one call.
pub fn digest_bytes(algorithm: Algorithm, data: &[u8]) -> Digest {
    let mut digester = Digester::new(algorithm);
    digester.update(data);
    digester.finalize()
}
