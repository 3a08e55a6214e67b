//! Reader adapters that hash content as it streams through.

use std::io::{self, Read};

use ocilayout_types::Digest;

use crate::hasher::Digester;

/// Wraps a reader and hashes every byte read from it.
///
/// Used on the ingest path: the store copies from a `DigestingReader` into a
/// temporary file and learns the digest when the copy completes.
pub struct DigestingReader<R> {
    inner: R,
    digester: Digester,
}

impl<R: Read> DigestingReader<R> {
    pub fn new(inner: R, digester: Digester) -> Self {
        Self { inner, digester }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.digester.bytes_hashed()
    }

    /// Stop reading and return the digest and size of everything read.
    pub fn finish(self) -> (Digest, u64) {
        let size = self.digester.bytes_hashed();
        (self.digester.finalize(), size)
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digester.update(&buf[..n]);
        Ok(n)
    }
}

/// Wraps a reader over content that claims to have `expected` as its digest.
///
/// Bytes pass through unchanged; when the inner reader reports end of stream
/// the accumulated digest is compared with `expected` and a mismatch surfaces
/// as an [`io::ErrorKind::InvalidData`] error instead of a clean EOF. Reading
/// past `expected_size` fails immediately.
pub struct VerifyingReader<R> {
    inner: R,
    digester: Option<Digester>,
    expected: Digest,
    expected_size: Option<u64>,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, expected: Digest) -> Self {
        let digester = Digester::new(expected.algorithm());
        Self {
            inner,
            digester: Some(digester),
            expected,
            expected_size: None,
        }
    }

    /// Also require the stream to be exactly `size` bytes long.
    pub fn with_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// The digest this reader verifies against.
    pub fn expected(&self) -> &Digest {
        &self.expected
    }

    fn check_eof(&mut self) -> io::Result<()> {
        let Some(digester) = self.digester.take() else {
            return Ok(());
        };
        let size = digester.bytes_hashed();
        if let Some(expected_size) = self.expected_size {
            if size != expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "size mismatch for {}: expected {expected_size}, read {size}",
                        self.expected
                    ),
                ));
            }
        }
        let actual = digester.finalize();
        if actual != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("digest mismatch: expected {}, computed {actual}", self.expected),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.check_eof()?;
            }
            return Ok(0);
        }
        if let Some(digester) = self.digester.as_mut() {
            digester.update(&buf[..n]);
            if let Some(expected_size) = self.expected_size {
                if digester.bytes_hashed() > expected_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{} exceeds its declared size of {expected_size}", self.expected),
                    ));
                }
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::digest_bytes;
    use ocilayout_types::Algorithm;
    use proptest::prelude::*;

    #[test]
    fn digesting_reader_reports_digest_and_size() {
        let mut reader = DigestingReader::new(&b"hello world"[..], Digester::new(Algorithm::Sha256));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.bytes_read(), 11);
        let (digest, size) = reader.finish();
        assert_eq!(size, 11);
        assert_eq!(digest, digest_bytes(Algorithm::Sha256, b"hello world"));
    }

    #[test]
    fn verifying_reader_passes_matching_content() {
        let digest = digest_bytes(Algorithm::Sha256, b"payload");
        let mut reader = VerifyingReader::new(&b"payload"[..], digest).with_size(7);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn verifying_reader_rejects_tampered_content() {
        let digest = digest_bytes(Algorithm::Sha256, b"original");
        let mut reader = VerifyingReader::new(&b"tampered"[..], digest);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn verifying_reader_rejects_oversized_stream() {
        let digest = digest_bytes(Algorithm::Sha256, b"abc");
        let mut reader = VerifyingReader::new(&b"abcdef"[..], digest).with_size(3);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn verifying_reader_rejects_short_stream() {
        let digest = digest_bytes(Algorithm::Sha256, b"abc");
        let mut reader = VerifyingReader::new(&b"abc"[..], digest).with_size(4);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    proptest! {
        #[test]
        fn verifying_reader_accepts_any_honest_content(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let digest = digest_bytes(Algorithm::Blake3, &data);
            let mut reader = VerifyingReader::new(&data[..], digest).with_size(data.len() as u64);
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
