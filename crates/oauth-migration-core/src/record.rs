use serde::Serialize;

/// Character that only legacy token ids contain.
pub const LEGACY_ID_DELIMITER: char = '-';

/// Migration status is derived from the id shape alone.
#[must_use]
pub fn is_migrated_id(token_id: &str) -> bool {
    !token_id.contains(LEGACY_ID_DELIMITER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// Fields every persisted token row carries.
pub trait TokenRecord {
    fn token_id(&self) -> &str;
    fn token(&self) -> &[u8];
    fn authentication(&self) -> &[u8];

    fn is_migrated(&self) -> bool {
        is_migrated_id(self.token_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessTokenRecord {
    pub token_id: String,
    pub token: Vec<u8>,
    pub authentication_id: Option<String>,
    pub user_name: Option<String>,
    pub client_id: Option<String>,
    pub authentication: Vec<u8>,
    /// Raw refresh token reference; not necessarily present.
    pub refresh_token: Option<String>,
}

impl TokenRecord for AccessTokenRecord {
    fn token_id(&self) -> &str {
        &self.token_id
    }

    fn token(&self) -> &[u8] {
        &self.token
    }

    fn authentication(&self) -> &[u8] {
        &self.authentication
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub token: Vec<u8>,
    pub authentication: Vec<u8>,
}

impl TokenRecord for RefreshTokenRecord {
    fn token_id(&self) -> &str {
        &self.token_id
    }

    fn token(&self) -> &[u8] {
        &self.token
    }

    fn authentication(&self) -> &[u8] {
        &self.authentication
    }
}

/// One atomic rewrite of an access token row, keyed by its old id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTokenUpdate<'a> {
    pub old_token_id: &'a str,
    pub new_token_id: &'a str,
    pub new_refresh_token: Option<&'a str>,
    pub token: &'a [u8],
    pub authentication: &'a [u8],
}

/// One atomic rewrite of a refresh token row, keyed by its old id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTokenUpdate<'a> {
    pub old_token_id: &'a str,
    pub new_token_id: &'a str,
    pub token: &'a [u8],
    pub authentication: &'a [u8],
}
