//! Migration of persisted OAuth2 token records from the legacy serialized
//! representation to the current one.
//!
//! Token ids become hashed keys ([`TokenKeyGenerator`]), token value objects
//! are re-encoded, and authentication objects are read through an isolated
//! legacy type context ([`LegacyAdapter`]) and rebuilt in the current format.
//! [`Migrator`] drives both phases against any [`MigrationStore`].

mod authentication;
mod config;
mod error;
mod key;
mod legacy;
mod migrator;
mod record;
mod store;
pub mod stream;
mod token;
mod transform;
mod types;

#[cfg(test)]
mod testing;

pub use authentication::{
    AuthorizationRequest, GrantedAuthority, OAuth2Authentication, UserAuthentication,
};
pub use config::{TableNames, DEFAULT_ACCESS_TOKEN_TABLE, DEFAULT_REFRESH_TOKEN_TABLE};
pub use error::{MigrationError, Result, StoreError};
pub use key::{Md5KeyGenerator, Sha256KeyGenerator, TokenKeyGenerator};
pub use legacy::{AuthenticationFields, LegacyAdapter, LegacyObject, RequestFields, UserFields};
pub use migrator::{
    MigrationOptions, MigrationSummary, Migrator, PhaseState, PhaseSummary, DEFAULT_PAGE_SIZE,
};
pub use record::{
    is_migrated_id, AccessTokenRecord, AccessTokenUpdate, RefreshTokenRecord, RefreshTokenUpdate,
    TokenKind, TokenRecord, LEGACY_ID_DELIMITER,
};
pub use store::{InMemoryMigrationStore, MigrationStore};
pub use stream::{ObjectNode, StreamValue};
pub use token::{
    decode_access_token, decode_refresh_token, AccessToken, AccessTokenConstructor,
    AccessTokenFields, AccessTokenSetters, DefaultExpiringOAuth2RefreshToken,
    DefaultOAuth2AccessToken, DefaultOAuth2RefreshToken, ExpiringRefreshTokenConstructor,
    HasExpiry, HasSettableValue, OAuth2AccessToken, RefreshToken, RefreshTokenConstructor,
};
pub use transform::{
    rebuild_authentication, rewrite_access_token_value, rewrite_refresh_token_value,
    RecordTransformer, TransformPolicy, TransformedAccessToken, TransformedRefreshToken,
};
pub use types::{
    current_type_table, locate_legacy_type_dir, CodecRegistry, FormatVersion, TypeArchive,
    TypeDescriptor, TypeTable, LEGACY_TYPE_DIRS,
};
