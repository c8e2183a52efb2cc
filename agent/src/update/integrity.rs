//! Bundle integrity checks

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::errors::AgentError;

const CHUNK_SIZE: usize = 8192;

/// Streaming hex SHA-256 of a file's contents
pub async fn checksum(path: &Path) -> Result<String, AgentError> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of an in-memory payload
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fail with [`AgentError::IntegrityError`] unless the file hashes to `expected`
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), AgentError> {
    let actual = checksum(path).await?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(AgentError::IntegrityError {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checksum_matches_in_memory_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.bin");
        // Larger than one chunk so the streaming path is exercised
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        assert_eq!(checksum(&path).await.unwrap(), checksum_bytes(&content));
    }

    #[tokio::test]
    async fn test_verify_checksum_detects_single_byte_change() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.bin");
        let mut content = b"checksum-data".to_vec();
        std::fs::write(&path, &content).unwrap();
        let digest = checksum_bytes(&content);

        verify_checksum(&path, &digest).await.unwrap();
        verify_checksum(&path, &digest.to_uppercase()).await.unwrap();

        content[0] ^= 0x01;
        std::fs::write(&path, &content).unwrap();
        let err = verify_checksum(&path, &digest).await.unwrap_err();
        assert!(matches!(err, AgentError::IntegrityError { .. }));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            checksum_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
