//! Checksum algorithms and streaming digest computation, fused into the
//! download path to verify artifacts as they are written.

use std::fmt::{self, Write as _};
use std::io::{self, Read};
use std::str::FromStr;
use std::fs::File;
use std::path::Path;

use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};


/// Identifier of a supported digest algorithm. Parsing is ASCII
/// case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {

    /// The canonical lowercase identifier of this algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

}

impl FromStr for ChecksumAlgorithm {

    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "md5" => Self::Md5,
            "sha1" => Self::Sha1,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            _ => return Err(())
        })
    }

}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expected checksum for an artifact: the algorithm plus the hex digest,
/// stored lowercase so that comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {

    /// Build a checksum from the algorithm and the declared digest.
    /// Surrounding whitespace is trimmed, and a digest left empty by the trim
    /// returns none: verification is disabled.
    pub fn new(algorithm: ChecksumAlgorithm, digest: &str) -> Option<Self> {
        let digest = digest.trim();
        if digest.is_empty() {
            None
        } else {
            Some(Self {
                algorithm,
                digest: digest.to_ascii_lowercase(),
            })
        }
    }

    #[inline]
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The expected digest, lowercase hex.
    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Create a streaming hasher for this checksum's algorithm.
    #[inline]
    pub fn hasher(&self) -> ChecksumHasher {
        ChecksumHasher::new(self.algorithm)
    }

    /// Compare the expected digest against a computed hex digest.
    #[inline]
    pub fn matches(&self, computed: &str) -> bool {
        self.digest.eq_ignore_ascii_case(computed)
    }

}

/// A streaming hasher over one of the supported algorithms, fed chunk by
/// chunk while a download is written to disk.
pub enum ChecksumHasher {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl ChecksumHasher {

    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(chunk),
            Self::Sha1(digest) => digest.update(chunk),
            Self::Sha256(digest) => digest.update(chunk),
            Self::Sha384(digest) => digest.update(chunk),
            Self::Sha512(digest) => digest.update(chunk),
        }
    }

    /// Finish the computation and return the digest as lowercase hex.
    pub fn finalize(self) -> String {
        match self {
            Self::Md5(ctx) => hex_string(&ctx.compute().0),
            Self::Sha1(digest) => hex_string(&digest.finalize()),
            Self::Sha256(digest) => hex_string(&digest.finalize()),
            Self::Sha384(digest) => hex_string(&digest.finalize()),
            Self::Sha512(digest) => hex_string(&digest.finalize()),
        }
    }

}

impl fmt::Debug for ChecksumHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self {
            Self::Md5(_) => ChecksumAlgorithm::Md5,
            Self::Sha1(_) => ChecksumAlgorithm::Sha1,
            Self::Sha256(_) => ChecksumAlgorithm::Sha256,
            Self::Sha384(_) => ChecksumAlgorithm::Sha384,
            Self::Sha512(_) => ChecksumAlgorithm::Sha512,
        };
        f.debug_tuple("ChecksumHasher").field(&algorithm).finish()
    }
}

/// Compute the digest of an existing file with the given algorithm, returned
/// as lowercase hex. Used when the expected checksum is only known after the
/// file has been fetched.
pub fn hash_file(file: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {

    let mut reader = File::open(file)?;
    let mut hasher = ChecksumHasher::new(algorithm);
    let mut buf = [0u8; 8192];

    loop {
        let len = reader.read(&mut buf)?;
        if len == 0 {
            break;
        }
        hasher.update(&buf[..len]);
    }

    Ok(hasher.finalize())

}

fn hex_string(bytes: &[u8]) -> String {
    let mut buf = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(buf, "{byte:02x}").unwrap();
    }
    buf
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn algorithm_parse() {

        assert_eq!("md5".parse(), Ok(ChecksumAlgorithm::Md5));
        assert_eq!("sha1".parse(), Ok(ChecksumAlgorithm::Sha1));
        assert_eq!("sha256".parse(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("sha384".parse(), Ok(ChecksumAlgorithm::Sha384));
        assert_eq!("sha512".parse(), Ok(ChecksumAlgorithm::Sha512));

        // Identifiers are matched case-insensitively.
        assert_eq!("SHA256".parse(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("Sha1".parse(), Ok(ChecksumAlgorithm::Sha1));

        assert_eq!("crc32".parse::<ChecksumAlgorithm>(), Err(()));
        assert_eq!("".parse::<ChecksumAlgorithm>(), Err(()));

    }

    #[test]
    fn empty_digest_disables() {
        assert!(Checksum::new(ChecksumAlgorithm::Sha1, "").is_none());
        assert!(Checksum::new(ChecksumAlgorithm::Sha1, "   ").is_none());
        assert!(Checksum::new(ChecksumAlgorithm::Sha1, "\t\n").is_none());
        assert!(Checksum::new(ChecksumAlgorithm::Sha1, " abc ").is_some());
    }

    #[test]
    fn case_insensitive_match() {

        let checksum = Checksum::new(
            ChecksumAlgorithm::Sha1,
            "D3486AE9136E7856BC42212385EA797094475802").unwrap();

        assert_eq!(checksum.digest(), "d3486ae9136e7856bc42212385ea797094475802");
        assert!(checksum.matches("d3486ae9136e7856bc42212385ea797094475802"));
        assert!(checksum.matches("D3486AE9136E7856BC42212385EA797094475802"));
        assert!(!checksum.matches("d3486ae9136e7856bc42212385ea797094475803"));

    }

    #[test]
    fn known_digests() {

        // All five algorithms over the empty input.
        let cases = [
            (ChecksumAlgorithm::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
            (ChecksumAlgorithm::Sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            (ChecksumAlgorithm::Sha256, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
            (ChecksumAlgorithm::Sha384, "38b060a751ac96384cd9327eb1b1e36a21fdb71114be07434c0cc7bf63f6e1da274edebfe76f65fbd51ad2f14898b95b"),
            (ChecksumAlgorithm::Sha512, "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"),
        ];

        for (algorithm, expected) in cases {
            assert_eq!(ChecksumHasher::new(algorithm).finalize(), expected, "{algorithm}");
        }

        // Streaming updates are equivalent to one-shot hashing.
        let mut hasher = ChecksumHasher::new(ChecksumAlgorithm::Sha1);
        hasher.update(b"Hello ");
        hasher.update(b"world!");
        assert_eq!(hasher.finalize(), "d3486ae9136e7856bc42212385ea797094475802");

    }

    #[test]
    fn file_hashing() {

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("some.box");
        std::fs::write(&file, b"Hello world!").unwrap();

        let digest = hash_file(&file, ChecksumAlgorithm::Sha1).unwrap();
        assert_eq!(digest, "d3486ae9136e7856bc42212385ea797094475802");

    }

}
