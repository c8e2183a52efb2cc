//! Bundle checksums

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8192;

/// Hex SHA-256 of an in-memory payload
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Streaming hex SHA-256 of everything `reader` yields
pub async fn checksum_reader<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_matches_in_memory() {
        let content: Vec<u8> = (0..30_000u32).map(|i| (i % 241) as u8).collect();
        let streamed = checksum_reader(content.as_slice()).await.unwrap();
        assert_eq!(streamed, checksum_bytes(&content));
    }

    #[test]
    fn test_single_byte_change_alters_digest() {
        let mut content = b"bundle payload".to_vec();
        let before = checksum_bytes(&content);
        content[3] ^= 0x20;
        assert_ne!(before, checksum_bytes(&content));
    }
}
