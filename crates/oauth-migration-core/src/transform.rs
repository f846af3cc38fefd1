//! Per-record rewrite: new ids, token value objects re-encoded in the current
//! format and authentication objects rebuilt from their legacy projection.
//!
//! Nothing here touches the store. A transform either yields the complete new
//! column values for one row or fails, so a failed record is never half written.

use tracing::{debug, warn};

use crate::authentication::{AuthorizationRequest, OAuth2Authentication, UserAuthentication};
use crate::error::{MigrationError, Result};
use crate::key::TokenKeyGenerator;
use crate::legacy::{AuthenticationFields, LegacyAdapter};
use crate::record::{AccessTokenRecord, RefreshTokenRecord};
use crate::token::{decode_access_token, decode_refresh_token, AccessToken, RefreshToken};
use crate::types::{CodecRegistry, FormatVersion};

const ACCESS_TOKEN_SETTERS: &str = "access_token_setters";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformPolicy {
    /// Drop refresh tokens: access rows lose their refresh reference and the
    /// nested refresh token, refresh rows are cleared in bulk.
    pub remove_refresh_tokens: bool,
    /// Replace the values embedded in token objects with their new keys.
    pub serialize_new_token_values: bool,
    /// Treat an embedded refresh value that disagrees with the row's
    /// `refresh_token` column as fatal instead of a warning.
    pub strict_pairing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedAccessToken {
    pub new_token_id: String,
    pub new_refresh_token: Option<String>,
    pub token: Vec<u8>,
    pub authentication: Vec<u8>,
    pub pairing_mismatch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedRefreshToken {
    pub new_token_id: String,
    pub token: Vec<u8>,
    pub authentication: Vec<u8>,
}

pub struct RecordTransformer<'a, K: ?Sized> {
    registry: &'a CodecRegistry,
    keys: &'a K,
    policy: TransformPolicy,
}

impl<'a, K> RecordTransformer<'a, K>
where
    K: TokenKeyGenerator + ?Sized,
{
    #[must_use]
    pub fn new(registry: &'a CodecRegistry, keys: &'a K, policy: TransformPolicy) -> Self {
        Self { registry, keys, policy }
    }

    /// # Errors
    /// Any decode, capability, reconstruction, pairing or encode failure.
    pub fn transform_access_token(&self, record: &AccessTokenRecord) -> Result<TransformedAccessToken> {
        let new_token_id = self.keys.generate(&record.token_id);
        let new_refresh_token = if self.policy.remove_refresh_tokens {
            None
        } else {
            self.keys.generate_optional(record.refresh_token.as_deref())
        };

        let value = self.registry.decode(FormatVersion::Current, &record.token)?;
        let mut token = decode_access_token(&value, self.registry.context(FormatVersion::Current))?;
        let mut nested = token.detach_refresh_token();

        let pairing_mismatch = if self.policy.remove_refresh_tokens {
            false
        } else {
            self.check_pairing(record, nested.as_deref())?
        };

        if self.policy.serialize_new_token_values {
            token = rewrite_access_token_value(token, new_token_id.clone())?;
            if !self.policy.remove_refresh_tokens {
                nested = nested
                    .map(|refresh| {
                        let key = self.keys.generate(refresh.value());
                        rewrite_refresh_token_value(refresh, key)
                    })
                    .transpose()?;
            }
        }
        if self.policy.remove_refresh_tokens {
            nested = None;
        }
        token.attach_refresh_token(nested);

        Ok(TransformedAccessToken {
            new_token_id,
            new_refresh_token,
            token: self.registry.encode(&token.to_stream()?)?,
            authentication: self.rebuild_authentication_blob(&record.authentication)?,
            pairing_mismatch,
        })
    }

    /// # Errors
    /// Any decode, capability, reconstruction or encode failure.
    pub fn transform_refresh_token(&self, record: &RefreshTokenRecord) -> Result<TransformedRefreshToken> {
        let new_token_id = self.keys.generate(&record.token_id);

        let value = self.registry.decode(FormatVersion::Current, &record.token)?;
        let mut token = decode_refresh_token(&value, self.registry.context(FormatVersion::Current))?;
        if self.policy.serialize_new_token_values {
            token = rewrite_refresh_token_value(token, new_token_id.clone())?;
        }

        Ok(TransformedRefreshToken {
            new_token_id,
            token: self.registry.encode(&token.to_stream()?)?,
            authentication: self.rebuild_authentication_blob(&record.authentication)?,
        })
    }

    /// Decode a legacy authentication blob and re-encode it in the current format.
    ///
    /// # Errors
    /// Decode, capability and encode failures.
    pub fn rebuild_authentication_blob(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let fields = LegacyAdapter::new(self.registry).project_authentication(bytes)?;
        self.registry.encode(&rebuild_authentication(fields).to_stream())
    }

    fn check_pairing(
        &self,
        record: &AccessTokenRecord,
        nested: Option<&dyn RefreshToken>,
    ) -> Result<bool> {
        let (Some(embedded), Some(column)) = (nested, record.refresh_token.as_deref()) else {
            return Ok(false);
        };
        let embedded_key = self.keys.generate(embedded.value());
        let column_key = self.keys.generate(column);
        if embedded_key == column_key {
            return Ok(false);
        }

        if self.policy.strict_pairing {
            return Err(MigrationError::PairingMismatch {
                token_id: record.token_id.clone(),
                embedded_key,
                column_key,
            });
        }
        warn!(
            token_id = %record.token_id,
            %embedded_key,
            %column_key,
            "embedded refresh token does not match the refresh_token column"
        );
        Ok(true)
    }
}

/// Build the current-format authentication from projected legacy fields.
#[must_use]
pub fn rebuild_authentication(fields: AuthenticationFields) -> OAuth2Authentication {
    let request = AuthorizationRequest {
        parameters: fields.request.parameters,
        authorities: fields.request.authorities,
        resource_ids: fields.request.resource_ids,
        approved: fields.request.approved,
        redirect_uri: fields.request.redirect_uri,
    };
    let user = fields
        .user
        .map(|user| UserAuthentication::new(user.principal, user.credentials, user.authorities));
    OAuth2Authentication::new(request, user)
}

/// Give an access token a new value: a settable value first, then a string
/// constructor plus field setters. The refresh token is carried over.
///
/// # Errors
/// [`MigrationError::NoReconstructionPath`] when neither path exists,
/// [`MigrationError::MissingCapability`] when the rebuilt object has no setters.
pub fn rewrite_access_token_value(
    mut token: Box<dyn AccessToken>,
    value: String,
) -> Result<Box<dyn AccessToken>> {
    let class = token.class_name().to_string();
    if let Some(settable) = token.as_settable() {
        debug!(%class, "setting access token value");
        let replacement = settable.set_value(value);
        return Ok(replacement.unwrap_or(token));
    }

    let Some(construct) = token.string_constructor() else {
        return Err(MigrationError::NoReconstructionPath { class });
    };
    debug!(%class, "rebuilding access token from its value");

    let mut rebuilt = construct(value);
    let class = rebuilt.class_name().to_string();
    let fields = token.fields();
    let setters = rebuilt.as_setters().ok_or_else(|| MigrationError::MissingCapability {
        class,
        capability: ACCESS_TOKEN_SETTERS.to_string(),
    })?;
    setters.set_additional_information(fields.additional_information.clone());
    setters.set_expiration(fields.expiration);
    setters.set_scope(fields.scope.clone());
    setters.set_token_type(fields.token_type.clone());

    rebuilt.attach_refresh_token(token.detach_refresh_token());
    Ok(rebuilt)
}

/// Give a refresh token a new value: a settable value first, then the
/// expiring constructor for tokens with an expiry, then a string constructor
/// for tokens without one.
///
/// # Errors
/// [`MigrationError::NoReconstructionPath`] when no path applies, including an
/// expiring token that has no expiring constructor.
pub fn rewrite_refresh_token_value(
    mut token: Box<dyn RefreshToken>,
    value: String,
) -> Result<Box<dyn RefreshToken>> {
    if let Some(settable) = token.as_settable() {
        let replacement = settable.set_value(value);
        return Ok(replacement.unwrap_or(token));
    }

    if let Some(expiring) = token.as_expiring() {
        // A string constructor would drop the expiry.
        let Some(construct) = token.expiring_constructor() else {
            return Err(MigrationError::NoReconstructionPath { class: token.class_name().to_string() });
        };
        debug!(class = token.class_name(), "rebuilding expiring refresh token");
        return Ok(construct(value, expiring.expiration()));
    }

    if let Some(construct) = token.string_constructor() {
        debug!(class = token.class_name(), "rebuilding refresh token from its value");
        return Ok(construct(value));
    }

    Err(MigrationError::NoReconstructionPath { class: token.class_name().to_string() })
}
