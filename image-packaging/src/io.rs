// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::{error::Result, release::ChecksumType},
    async_compression::futures::bufread::{GzipDecoder, XzDecoder, ZstdDecoder},
    pgp::crypto::Hasher,
    pgp_cleartext::CleartextHasher,
    pin_project::pin_project,
    futures::{AsyncBufRead, AsyncRead},
    std::{
        fmt::Formatter,
        pin::Pin,
        task::{Context, Poll},
    },
};

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Compute the SHA-256 digest of a buffer.
    pub fn sha256_of(data: &[u8]) -> Self {
        let mut hasher = Box::new(CleartextHasher::sha256());
        hasher.update(data);
        Self::Sha256(hasher.finish())
    }

    /// Create a new hasher matching the type of this digest.
    pub fn new_hasher(&self) -> Box<dyn Hasher + Send> {
        Box::new(match self {
            Self::Md5(_) => CleartextHasher::md5(),
            Self::Sha1(_) => CleartextHasher::sha1(),
            Self::Sha256(_) => CleartextHasher::sha256(),
        })
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// Compression format used by repository and package primitives.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// XZ compression (.xz extension).
    Xz,

    /// Gzip compression (.gz extension).
    Gzip,

    /// Zstandard compression (.zst extension).
    Zstd,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    /// The retrieval preference order for index files.
    ///
    /// Best decompression ratio first; zstd only participates when it is the
    /// sole advertised variant, so it sorts last.
    pub fn default_preferred_order() -> impl Iterator<Item = Compression> {
        [Self::Xz, Self::Gzip, Self::None, Self::Zstd].into_iter()
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed(
    stream: Pin<Box<dyn AsyncBufRead + Send>>,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
        Compression::Xz => Box::pin(XzDecoder::new(stream)),
        Compression::Zstd => Box::pin(ZstdDecoder::new(stream)),
    }
}

/// Decompress an in-memory buffer.
///
/// Used for index files and `.deb` members, which are bounded in size and
/// processed as buffers.
pub fn decompress_buffer(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    use std::io::Read;

    Ok(match compression {
        Compression::None => data.to_vec(),
        Compression::Gzip => {
            let mut decoder = libflate::gzip::Decoder::new(data)?;
            let mut out = vec![];
            decoder.read_to_end(&mut out)?;
            out
        }
        Compression::Xz => {
            let mut decoder = xz2::read::XzDecoder::new(data);
            let mut out = vec![];
            decoder.read_to_end(&mut out)?;
            out
        }
        Compression::Zstd => zstd::stream::decode_all(data)?,
    })
}

/// An adapter for [AsyncRead] streams that validates source size and digest.
///
/// Validation only occurs once the expected number of bytes has been read.
/// If the consumer reads fewer bytes, no validation occurs; the stream must
/// be read to completion for the check to fire.
#[pin_project]
pub struct ContentValidatingReader<R> {
    hasher: Option<Box<dyn Hasher + Send>>,
    expected_size: u64,
    expected_digest: ContentDigest,
    #[pin]
    source: R,
    bytes_read: u64,
}

impl<R> ContentValidatingReader<R> {
    /// Create a new instance bound to a source with expected size and digest.
    pub fn new(source: R, expected_size: u64, expected_digest: ContentDigest) -> Self {
        Self {
            hasher: Some(expected_digest.new_hasher()),
            expected_size,
            expected_digest,
            source,
            bytes_read: 0,
        }
    }
}

impl<R> AsyncRead for ContentValidatingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    if let Some(hasher) = this.hasher.as_mut() {
                        hasher.update(&buf[0..size]);
                    }

                    *this.bytes_read += size as u64;
                }

                match (*this.bytes_read).cmp(&*this.expected_size) {
                    std::cmp::Ordering::Equal => {
                        if let Some(hasher) = this.hasher.take() {
                            let got_digest = hasher.finish();

                            if got_digest != this.expected_digest.digest_bytes() {
                                return Poll::Ready(Err(std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    format!(
                                        "digest mismatch of retrieved content: expected {}, got {}",
                                        this.expected_digest.digest_hex(),
                                        hex::encode(got_digest)
                                    ),
                                )));
                            }
                        }
                    }
                    std::cmp::Ordering::Greater => {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!(
                                "extra bytes read: expected {}; got {}",
                                this.expected_size, this.bytes_read
                            ),
                        )));
                    }
                    std::cmp::Ordering::Less => {}
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, futures::AsyncReadExt};

    #[test]
    fn sha256_hex_round_trip() -> Result<()> {
        let digest = ContentDigest::sha256_of(b"hello");
        assert_eq!(
            digest.digest_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let parsed = ContentDigest::sha256_hex(&digest.digest_hex())?;
        assert_eq!(parsed, digest);

        Ok(())
    }

    #[tokio::test]
    async fn validating_reader_detects_mismatch() {
        let data = b"some content".to_vec();
        let bogus = ContentDigest::sha256_of(b"other content");

        let mut reader =
            ContentValidatingReader::new(futures::io::Cursor::new(data.clone()), data.len() as u64, bogus);

        let mut sink = vec![];
        assert!(reader.read_to_end(&mut sink).await.is_err());
    }

    #[tokio::test]
    async fn validating_reader_passes_match() {
        let data = b"some content".to_vec();
        let digest = ContentDigest::sha256_of(&data);

        let mut reader = ContentValidatingReader::new(
            futures::io::Cursor::new(data.clone()),
            data.len() as u64,
            digest,
        );

        let mut sink = vec![];
        reader.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, data);
    }
}
