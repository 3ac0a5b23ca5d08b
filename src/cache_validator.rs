use sha2::{Digest, Sha256};

/// Integrity seal for persisted cache payloads.
///
/// The municipality cache has no TTL and survives restarts, so a corrupted
/// or hand-edited row would poison discovery runs indefinitely. Each payload
/// is stored next to a SHA-256 checksum; a row that fails verification is
/// treated as a cache miss and refetched from the registry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SealedPayload {
    /// JSON payload as persisted.
    pub payload: String,
    /// SHA-256 of the payload, hex encoded.
    pub checksum: String,
}

impl SealedPayload {
    pub fn seal(payload: String) -> Self {
        let checksum = checksum_of(&payload);
        Self { payload, checksum }
    }

    pub fn verify(&self) -> bool {
        checksum_of(&self.payload) == self.checksum
    }

    /// Returns the payload when the seal holds, `None` when the row was
    /// tampered with or corrupted.
    pub fn into_verified(self) -> Option<String> {
        if self.verify() {
            Some(self.payload)
        } else {
            tracing::warn!(
                "Cache payload failed checksum verification (stored checksum {}, {} bytes)",
                self.checksum,
                self.payload.len()
            );
            None
        }
    }
}

fn checksum_of(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
