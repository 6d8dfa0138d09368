//! Content-addressing backends.
//!
//! Keys follow the `<BACKEND>-s<size>--<hexdigest><ext>` layout, where the
//! extension is the compound extension of the file name the content was first
//! added under. Keeping the extension lets tools recognise `.tar.gz` keys.

use crate::error::{Error, Result};
use md5::Md5;
use quarry_core::split_ext;
use sha2::{Digest, Sha256};
use std::io::Read;

/// Hash backend used to derive content keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// SHA-256 with extension.
    #[default]
    Sha256E,
    /// MD5 with extension.
    Md5E,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256E => "SHA256E",
            Self::Md5E => "MD5E",
        }
    }

    /// Compute the key for content read from `reader`.
    pub fn key_for_reader<R: Read>(&self, reader: &mut R, filename: &str) -> Result<String> {
        let (digest, size) = match self {
            Self::Sha256E => hash_reader::<Sha256, _>(reader)?,
            Self::Md5E => hash_reader::<Md5, _>(reader)?,
        };
        Ok(self.format_key(&digest, size, filename))
    }

    /// Compute the key for in-memory content.
    pub fn key_for_bytes(&self, content: &[u8], filename: &str) -> String {
        let digest = match self {
            Self::Sha256E => hex::encode(Sha256::digest(content)),
            Self::Md5E => hex::encode(Md5::digest(content)),
        };
        self.format_key(&digest, content.len() as u64, filename)
    }

    fn format_key(&self, digest: &str, size: u64, filename: &str) -> String {
        let (_, ext) = split_ext(filename);
        format!("{}-s{}--{}{}", self.as_str(), size, digest, ext)
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA256E" => Ok(Self::Sha256E),
            "MD5E" => Ok(Self::Md5E),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

fn hash_reader<D: Digest, R: Read>(reader: &mut R) -> Result<(String, u64)> {
    let mut hasher = D::new();
    let mut size = 0u64;
    let mut buffer = [0u8; 64 * 1024]; // 64KB buffer
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_md5e_key_layout() {
        let key = Backend::Md5E.key_for_bytes(b"hello", "greeting.tar.gz");
        assert_eq!(key, "MD5E-s5--5d41402abc4b2a76b9719d911017c592.tar.gz");
    }

    #[test]
    fn test_sha256e_key_without_extension() {
        let key = Backend::Sha256E.key_for_bytes(b"", "README");
        assert_eq!(
            key,
            "SHA256E-s0--e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_reader_and_bytes_agree() {
        let content = vec![7u8; 200_000];
        let mut cursor = std::io::Cursor::new(content.clone());
        let from_reader = Backend::Sha256E
            .key_for_reader(&mut cursor, "data.bin")
            .unwrap();
        assert_eq!(from_reader, Backend::Sha256E.key_for_bytes(&content, "data.bin"));
    }

    #[test]
    fn test_backend_roundtrip() {
        for backend in [Backend::Sha256E, Backend::Md5E] {
            assert_eq!(Backend::from_str(backend.as_str()).unwrap(), backend);
        }
        assert_eq!(Backend::from_str("md5e").unwrap(), Backend::Md5E);
        assert!(Backend::from_str("WORM").is_err());
    }
}
