use md5::Md5;
use sha2::{Digest, Sha256};

/// Maps a raw legacy token string to the key it is stored under after migration.
pub trait TokenKeyGenerator {
    fn generate(&self, raw_token: &str) -> String;

    /// Absent raw values (for example a missing refresh reference) stay absent.
    fn generate_optional(&self, raw_token: Option<&str>) -> Option<String> {
        raw_token.map(|raw| self.generate(raw))
    }
}

/// Lowercase hex MD5 of the raw token's UTF-8 bytes, 32 characters with
/// leading zeros kept.
///
/// This is the key the current token store derives when it looks a token up,
/// so it is the default for migrated rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5KeyGenerator;

impl Md5KeyGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TokenKeyGenerator for Md5KeyGenerator {
    fn generate(&self, raw_token: &str) -> String {
        hex::encode(Md5::digest(raw_token.as_bytes()))
    }
}

/// Lowercase hex SHA-256 of the optional salt followed by the raw token.
/// Only useful when the consuming token store hashes the same way.
///
/// The output alphabet is `[0-9a-f]`, so a generated key never carries the
/// legacy `-` delimiter and always reads as migrated.
#[derive(Debug, Clone, Default)]
pub struct Sha256KeyGenerator {
    salt: Option<String>,
}

impl Sha256KeyGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self { salt: Some(salt.into()) }
    }
}

impl TokenKeyGenerator for Sha256KeyGenerator {
    fn generate(&self, raw_token: &str) -> String {
        let mut hasher = Sha256::new();
        if let Some(salt) = &self.salt {
            hasher.update(salt.as_bytes());
        }
        hasher.update(raw_token.as_bytes());
        hex::encode(hasher.finalize())
    }
}
