//! Content digests used to tell apart files whose stat data disagree

use crate::error::{IoContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const READ_BUFFER: usize = 64 * 1024;

/// Hex-encoded BLAKE3 digest (256-bit) of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get(..16).unwrap_or(&self.0))
    }
}

/// Streams a file through BLAKE3 on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub async fn hash(&self, path: &Path) -> Result<ContentHash> {
        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_blocking(&owned))
            .await
            .map_err(io::Error::other)
            .and_then(|r| r)
            .at(path)
    }
}

fn hash_blocking(path: &Path) -> io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash(hasher.finalize().to_hex().to_string()))
}
