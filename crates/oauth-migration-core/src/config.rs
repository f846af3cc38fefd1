use crate::error::{MigrationError, Result};

pub const DEFAULT_ACCESS_TOKEN_TABLE: &str = "oauth_access_token";
pub const DEFAULT_REFRESH_TOKEN_TABLE: &str = "oauth_refresh_token";

/// Names of the two token tables. Both are interpolated into SQL, so they
/// are restricted to plain identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    access_token: String,
    refresh_token: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            access_token: DEFAULT_ACCESS_TOKEN_TABLE.to_string(),
            refresh_token: DEFAULT_REFRESH_TOKEN_TABLE.to_string(),
        }
    }
}

impl TableNames {
    /// # Errors
    /// Returns [`MigrationError::Config`] when either name is not a valid
    /// identifier or both name the same table.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        validate_identifier(&access_token)?;
        validate_identifier(&refresh_token)?;
        if access_token.eq_ignore_ascii_case(&refresh_token) {
            return Err(MigrationError::Config(format!(
                "access and refresh tokens cannot share the table {access_token}"
            )));
        }
        Ok(Self { access_token, refresh_token })
    }

    /// Defaults with optional per-table overrides.
    ///
    /// # Errors
    /// See [`TableNames::new`].
    pub fn with_overrides(access_token: Option<&str>, refresh_token: Option<&str>) -> Result<Self> {
        Self::new(
            access_token.unwrap_or(DEFAULT_ACCESS_TOKEN_TABLE),
            refresh_token.unwrap_or(DEFAULT_REFRESH_TOKEN_TABLE),
        )
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(MigrationError::Config(format!("invalid table name {name:?}")))
    }
}
