//! Content digests for snapshot entries
//!
//! The digest algorithm is internal to the engine: it distinguishes file
//! contents inside snapshots and never appears in persisted layer archives.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

/// Read buffer for streaming file digests.
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// A BLAKE3 content digest (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Create a digest from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the digest as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (64 characters)
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(64);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Parse from hex string (64 characters)
    pub fn from_hex(hex: &str) -> Result<Self, DigestParseError> {
        if hex.len() != 64 {
            return Err(DigestParseError::Length(hex.len()));
        }

        let mut bytes = [0u8; 32];
        for i in 0..32 {
            let high = hex_char_to_nibble(hex.as_bytes()[i * 2])?;
            let low = hex_char_to_nibble(hex.as_bytes()[i * 2 + 1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }
}

/// Errors parsing a digest from hex
#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("invalid hex length: expected 64 characters, got {0}")]
    Length(usize),

    #[error("invalid hex character: {0}")]
    Char(char),
}

fn hex_char_to_nibble(c: u8) -> Result<u8, DigestParseError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(DigestParseError::Char(c as char)),
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Digest a byte slice
pub fn digest_bytes(data: &[u8]) -> ContentDigest {
    ContentDigest(*blake3::hash(data).as_bytes())
}

/// Digest a file by streaming its contents
///
/// Reads in fixed-size chunks; the whole file is never resident in memory.
pub fn digest_file(path: &Path) -> std::io::Result<ContentDigest> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; DIGEST_BUF_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(ContentDigest(*hasher.finalize().as_bytes()))
}

/// Fallback digest for files that cannot be opened for hashing
///
/// Derived from `"{size}:{mtime_ms}"` so the snapshot walk stays total and the
/// result stays deterministic for an unchanged file.
pub fn fallback_digest(size: u64, modified: SystemTime) -> ContentDigest {
    digest_bytes(format!("{}:{}", size, unix_ms(modified)).as_bytes())
}

/// Milliseconds since the Unix epoch (negative for pre-epoch timestamps)
pub fn unix_ms(time: SystemTime) -> i128 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i128,
        Err(e) => -(e.duration().as_millis() as i128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_digest_bytes_stable() {
        let a = digest_bytes(b"hello world");
        let b = digest_bytes(b"hello world");
        let c = digest_bytes(b"hello worlds");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = digest_bytes(b"roundtrip");
        let hex = digest.to_hex();

        assert_eq!(hex.len(), 64);
        assert_eq!(ContentDigest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn test_from_hex_rejects_bad_length() {
        assert!(ContentDigest::from_hex("abcd").is_err());
    }

    #[test]
    fn test_from_hex_rejects_bad_char() {
        let bad = "zz".repeat(32);
        assert!(ContentDigest::from_hex(&bad).is_err());
    }

    #[test]
    fn test_digest_file_matches_digest_bytes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"file contents here")?;

        assert_eq!(digest_file(&path)?, digest_bytes(b"file contents here"));
        Ok(())
    }

    #[test]
    fn test_digest_file_streams_large_input() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("big.bin");
        let data = vec![0xabu8; DIGEST_BUF_SIZE * 3 + 17];
        std::fs::write(&path, &data)?;

        assert_eq!(digest_file(&path)?, digest_bytes(&data));
        Ok(())
    }

    #[test]
    fn test_fallback_digest_deterministic() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        assert_eq!(fallback_digest(42, t), fallback_digest(42, t));
        assert_ne!(fallback_digest(42, t), fallback_digest(43, t));
        assert_ne!(
            fallback_digest(42, t),
            fallback_digest(42, t + Duration::from_millis(1))
        );
    }

    #[test]
    fn test_unix_ms_pre_epoch() {
        let t = SystemTime::UNIX_EPOCH - Duration::from_millis(500);
        assert_eq!(unix_ms(t), -500);
    }
}
