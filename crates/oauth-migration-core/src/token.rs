//! Current-format token value objects and the capabilities the transformer
//! probes for when it has to change a token's value.
//!
//! Classes differ in what they allow: some expose a settable value, some can
//! only be rebuilt through a constructor, and expiring refresh tokens need
//! their expiry carried into the rebuilt object. Those differences are
//! modelled as optional capabilities on the [`AccessToken`] and
//! [`RefreshToken`] traits.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use time::OffsetDateTime;

use crate::error::{MigrationError, Result};
use crate::stream::{ObjectNode, StreamValue};
use crate::types::{TypeDescriptor, TypeTable};

pub const DEFAULT_ACCESS_TOKEN_CLASS: &str = "oauth2.common.DefaultOAuth2AccessToken";
pub const DEFAULT_ACCESS_TOKEN_UID: i64 = 914_967_629_530_462_926;
pub const ACCESS_TOKEN_CLASS: &str = "oauth2.common.OAuth2AccessToken";
pub const ACCESS_TOKEN_UID: i64 = -7_232_316_240_398_384_312;
pub const DEFAULT_REFRESH_TOKEN_CLASS: &str = "oauth2.common.DefaultOAuth2RefreshToken";
pub const DEFAULT_REFRESH_TOKEN_UID: i64 = 8_349_970_621_900_575_838;
pub const EXPIRING_REFRESH_TOKEN_CLASS: &str = "oauth2.common.DefaultExpiringOAuth2RefreshToken";
pub const EXPIRING_REFRESH_TOKEN_UID: i64 = 3_449_554_332_764_129_719;

pub const BEARER_TYPE: &str = "bearer";

const VALUE: &str = "value";
const EXPIRATION: &str = "expiration";
const TOKEN_TYPE: &str = "tokenType";
const REFRESH_TOKEN: &str = "refreshToken";
const SCOPE: &str = "scope";
const ADDITIONAL_INFORMATION: &str = "additionalInformation";

pub type AccessTokenConstructor = fn(String) -> Box<dyn AccessToken>;
pub type RefreshTokenConstructor = fn(String) -> Box<dyn RefreshToken>;
pub type ExpiringRefreshTokenConstructor =
    fn(String, Option<OffsetDateTime>) -> Box<dyn RefreshToken>;

/// Value mutation in place. An implementation may instead hand back a
/// replacement object, which the caller must use from then on.
pub trait HasSettableValue<T: ?Sized> {
    fn set_value(&mut self, value: String) -> Option<Box<T>>;
}

pub trait HasExpiry {
    fn expiration(&self) -> Option<OffsetDateTime>;
}

/// Field setters re-applied after an access token is rebuilt from its value.
pub trait AccessTokenSetters {
    fn set_additional_information(&mut self, information: BTreeMap<String, StreamValue>);
    fn set_expiration(&mut self, expiration: Option<OffsetDateTime>);
    fn set_scope(&mut self, scope: BTreeSet<String>);
    fn set_token_type(&mut self, token_type: String);
}

pub trait AccessToken: fmt::Debug {
    fn class_name(&self) -> &str;

    fn fields(&self) -> &AccessTokenFields;

    fn detach_refresh_token(&mut self) -> Option<Box<dyn RefreshToken>>;

    fn attach_refresh_token(&mut self, refresh_token: Option<Box<dyn RefreshToken>>);

    /// # Errors
    /// Returns [`MigrationError::Encode`] when a field cannot be represented.
    fn to_stream(&self) -> Result<StreamValue>;

    fn as_settable(&mut self) -> Option<&mut dyn HasSettableValue<dyn AccessToken>> {
        None
    }

    fn string_constructor(&self) -> Option<AccessTokenConstructor> {
        None
    }

    fn as_setters(&mut self) -> Option<&mut dyn AccessTokenSetters> {
        None
    }

    fn value(&self) -> &str {
        &self.fields().value
    }

    fn refresh_token(&self) -> Option<&dyn RefreshToken> {
        self.fields().refresh_token.as_deref()
    }
}

pub trait RefreshToken: fmt::Debug {
    fn class_name(&self) -> &str;

    fn value(&self) -> &str;

    /// # Errors
    /// Returns [`MigrationError::Encode`] when a field cannot be represented.
    fn to_stream(&self) -> Result<StreamValue>;

    fn as_settable(&mut self) -> Option<&mut dyn HasSettableValue<dyn RefreshToken>> {
        None
    }

    fn as_expiring(&self) -> Option<&dyn HasExpiry> {
        None
    }

    fn string_constructor(&self) -> Option<RefreshTokenConstructor> {
        None
    }

    fn expiring_constructor(&self) -> Option<ExpiringRefreshTokenConstructor> {
        None
    }
}

/// State shared by every access token class.
#[derive(Debug)]
pub struct AccessTokenFields {
    pub value: String,
    pub expiration: Option<OffsetDateTime>,
    pub token_type: String,
    pub scope: BTreeSet<String>,
    pub additional_information: BTreeMap<String, StreamValue>,
    pub refresh_token: Option<Box<dyn RefreshToken>>,
}

impl AccessTokenFields {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expiration: None,
            token_type: BEARER_TYPE.to_string(),
            scope: BTreeSet::new(),
            additional_information: BTreeMap::new(),
            refresh_token: None,
        }
    }

    fn read(node: &ObjectNode, table: &TypeTable) -> Result<Self> {
        let value = node.field(VALUE).to_optional_string(VALUE)?.ok_or_else(|| {
            MigrationError::DecodeFailure(format!("{} has no value", node.class))
        })?;
        let refresh_token = match node.field(REFRESH_TOKEN) {
            StreamValue::Null => None,
            nested => Some(decode_refresh_token(nested, table)?),
        };
        Ok(Self {
            value,
            expiration: node.field(EXPIRATION).to_optional_date(EXPIRATION)?,
            token_type: node
                .field(TOKEN_TYPE)
                .to_optional_string(TOKEN_TYPE)?
                .unwrap_or_else(|| BEARER_TYPE.to_string()),
            scope: node.field(SCOPE).to_string_set(SCOPE)?,
            additional_information: node
                .field(ADDITIONAL_INFORMATION)
                .to_value_map(ADDITIONAL_INFORMATION)?,
            refresh_token,
        })
    }

    fn write(&self, class: &str, uid: i64) -> Result<StreamValue> {
        let refresh_token = match &self.refresh_token {
            Some(refresh_token) => refresh_token.to_stream()?,
            None => StreamValue::Null,
        };
        Ok(ObjectNode::new(class, uid)
            .with_field(VALUE, StreamValue::str(&self.value))
            .with_field(EXPIRATION, StreamValue::optional_date(self.expiration)?)
            .with_field(TOKEN_TYPE, StreamValue::str(&self.token_type))
            .with_field(REFRESH_TOKEN, refresh_token)
            .with_field(SCOPE, StreamValue::string_set(&self.scope))
            .with_field(ADDITIONAL_INFORMATION, StreamValue::Map(self.additional_information.clone()))
            .into())
    }
}

impl AccessTokenSetters for AccessTokenFields {
    fn set_additional_information(&mut self, information: BTreeMap<String, StreamValue>) {
        self.additional_information = information;
    }

    fn set_expiration(&mut self, expiration: Option<OffsetDateTime>) {
        self.expiration = expiration;
    }

    fn set_scope(&mut self, scope: BTreeSet<String>) {
        self.scope = scope;
    }

    fn set_token_type(&mut self, token_type: String) {
        self.token_type = token_type;
    }
}

/// Mutable access token: value, fields and refresh token can all be set.
#[derive(Debug)]
pub struct DefaultOAuth2AccessToken {
    fields: AccessTokenFields,
}

impl DefaultOAuth2AccessToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self { fields: AccessTokenFields::new(value) }
    }

    #[must_use]
    pub fn from_fields(fields: AccessTokenFields) -> Self {
        Self { fields }
    }

    fn construct(value: String) -> Box<dyn AccessToken> {
        Box::new(Self::new(value))
    }
}

impl HasSettableValue<dyn AccessToken> for DefaultOAuth2AccessToken {
    fn set_value(&mut self, value: String) -> Option<Box<dyn AccessToken>> {
        self.fields.value = value;
        None
    }
}

impl AccessToken for DefaultOAuth2AccessToken {
    fn class_name(&self) -> &str {
        DEFAULT_ACCESS_TOKEN_CLASS
    }

    fn fields(&self) -> &AccessTokenFields {
        &self.fields
    }

    fn detach_refresh_token(&mut self) -> Option<Box<dyn RefreshToken>> {
        self.fields.refresh_token.take()
    }

    fn attach_refresh_token(&mut self, refresh_token: Option<Box<dyn RefreshToken>>) {
        self.fields.refresh_token = refresh_token;
    }

    fn to_stream(&self) -> Result<StreamValue> {
        self.fields.write(DEFAULT_ACCESS_TOKEN_CLASS, DEFAULT_ACCESS_TOKEN_UID)
    }

    fn as_settable(&mut self) -> Option<&mut dyn HasSettableValue<dyn AccessToken>> {
        Some(self)
    }

    fn string_constructor(&self) -> Option<AccessTokenConstructor> {
        Some(Self::construct)
    }

    fn as_setters(&mut self) -> Option<&mut dyn AccessTokenSetters> {
        Some(&mut self.fields)
    }
}

/// Access token whose value is fixed at construction.
#[derive(Debug)]
pub struct OAuth2AccessToken {
    fields: AccessTokenFields,
}

impl OAuth2AccessToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self { fields: AccessTokenFields::new(value) }
    }

    #[must_use]
    pub fn from_fields(fields: AccessTokenFields) -> Self {
        Self { fields }
    }

    fn construct(value: String) -> Box<dyn AccessToken> {
        Box::new(Self::new(value))
    }
}

impl AccessToken for OAuth2AccessToken {
    fn class_name(&self) -> &str {
        ACCESS_TOKEN_CLASS
    }

    fn fields(&self) -> &AccessTokenFields {
        &self.fields
    }

    fn detach_refresh_token(&mut self) -> Option<Box<dyn RefreshToken>> {
        self.fields.refresh_token.take()
    }

    fn attach_refresh_token(&mut self, refresh_token: Option<Box<dyn RefreshToken>>) {
        self.fields.refresh_token = refresh_token;
    }

    fn to_stream(&self) -> Result<StreamValue> {
        self.fields.write(ACCESS_TOKEN_CLASS, ACCESS_TOKEN_UID)
    }

    fn string_constructor(&self) -> Option<AccessTokenConstructor> {
        Some(Self::construct)
    }

    fn as_setters(&mut self) -> Option<&mut dyn AccessTokenSetters> {
        Some(&mut self.fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultOAuth2RefreshToken {
    value: String,
}

impl DefaultOAuth2RefreshToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    fn construct(value: String) -> Box<dyn RefreshToken> {
        Box::new(Self::new(value))
    }
}

impl RefreshToken for DefaultOAuth2RefreshToken {
    fn class_name(&self) -> &str {
        DEFAULT_REFRESH_TOKEN_CLASS
    }

    fn value(&self) -> &str {
        &self.value
    }

    fn to_stream(&self) -> Result<StreamValue> {
        Ok(ObjectNode::new(DEFAULT_REFRESH_TOKEN_CLASS, DEFAULT_REFRESH_TOKEN_UID)
            .with_field(VALUE, StreamValue::str(&self.value))
            .into())
    }

    fn string_constructor(&self) -> Option<RefreshTokenConstructor> {
        Some(Self::construct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultExpiringOAuth2RefreshToken {
    value: String,
    expiration: Option<OffsetDateTime>,
}

impl DefaultExpiringOAuth2RefreshToken {
    #[must_use]
    pub fn new(value: impl Into<String>, expiration: Option<OffsetDateTime>) -> Self {
        Self { value: value.into(), expiration }
    }

    fn construct(value: String, expiration: Option<OffsetDateTime>) -> Box<dyn RefreshToken> {
        Box::new(Self::new(value, expiration))
    }
}

impl HasExpiry for DefaultExpiringOAuth2RefreshToken {
    fn expiration(&self) -> Option<OffsetDateTime> {
        self.expiration
    }
}

impl RefreshToken for DefaultExpiringOAuth2RefreshToken {
    fn class_name(&self) -> &str {
        EXPIRING_REFRESH_TOKEN_CLASS
    }

    fn value(&self) -> &str {
        &self.value
    }

    fn to_stream(&self) -> Result<StreamValue> {
        Ok(ObjectNode::new(EXPIRING_REFRESH_TOKEN_CLASS, EXPIRING_REFRESH_TOKEN_UID)
            .with_field(VALUE, StreamValue::str(&self.value))
            .with_field(EXPIRATION, StreamValue::optional_date(self.expiration)?)
            .into())
    }

    fn as_expiring(&self) -> Option<&dyn HasExpiry> {
        Some(self)
    }

    fn expiring_constructor(&self) -> Option<ExpiringRefreshTokenConstructor> {
        Some(Self::construct)
    }
}

type AccessTokenReader = fn(&ObjectNode, &TypeTable) -> Result<Box<dyn AccessToken>>;
type RefreshTokenReader = fn(&ObjectNode, &TypeTable) -> Result<Box<dyn RefreshToken>>;

const ACCESS_TOKEN_READERS: [(&str, AccessTokenReader); 2] = [
    (DEFAULT_ACCESS_TOKEN_CLASS, read_default_access_token),
    (ACCESS_TOKEN_CLASS, read_access_token),
];

const REFRESH_TOKEN_READERS: [(&str, RefreshTokenReader); 2] = [
    (DEFAULT_REFRESH_TOKEN_CLASS, read_default_refresh_token),
    (EXPIRING_REFRESH_TOKEN_CLASS, read_expiring_refresh_token),
];

fn read_default_access_token(node: &ObjectNode, table: &TypeTable) -> Result<Box<dyn AccessToken>> {
    Ok(Box::new(DefaultOAuth2AccessToken::from_fields(AccessTokenFields::read(node, table)?)))
}

fn read_access_token(node: &ObjectNode, table: &TypeTable) -> Result<Box<dyn AccessToken>> {
    Ok(Box::new(OAuth2AccessToken::from_fields(AccessTokenFields::read(node, table)?)))
}

fn read_default_refresh_token(node: &ObjectNode, _: &TypeTable) -> Result<Box<dyn RefreshToken>> {
    Ok(Box::new(DefaultOAuth2RefreshToken::new(required_value(node)?)))
}

fn read_expiring_refresh_token(node: &ObjectNode, _: &TypeTable) -> Result<Box<dyn RefreshToken>> {
    Ok(Box::new(DefaultExpiringOAuth2RefreshToken::new(
        required_value(node)?,
        node.field(EXPIRATION).to_optional_date(EXPIRATION)?,
    )))
}

fn required_value(node: &ObjectNode) -> Result<String> {
    node.field(VALUE)
        .to_optional_string(VALUE)?
        .ok_or_else(|| MigrationError::DecodeFailure(format!("{} has no value", node.class)))
}

fn checked_node<'a>(value: &'a StreamValue, table: &TypeTable, what: &str) -> Result<&'a ObjectNode> {
    let node = value.as_object().ok_or_else(|| {
        MigrationError::DecodeFailure(format!("expected {what} object, found {}", value.kind()))
    })?;
    table.check(node)?;
    Ok(node)
}

/// Materialize an access token from a graph resolved against `table`.
///
/// # Errors
/// Returns a decode error when the root is not a known access token class.
pub fn decode_access_token(value: &StreamValue, table: &TypeTable) -> Result<Box<dyn AccessToken>> {
    let node = checked_node(value, table, "access token")?;
    let (_, read) = ACCESS_TOKEN_READERS
        .iter()
        .find(|(class, _)| *class == node.class)
        .ok_or_else(|| {
            MigrationError::DecodeFailure(format!("class {} is not an access token", node.class))
        })?;
    read(node, table)
}

/// Materialize a refresh token from a graph resolved against `table`.
///
/// # Errors
/// Returns a decode error when the root is not a known refresh token class.
pub fn decode_refresh_token(value: &StreamValue, table: &TypeTable) -> Result<Box<dyn RefreshToken>> {
    let node = checked_node(value, table, "refresh token")?;
    let (_, read) = REFRESH_TOKEN_READERS
        .iter()
        .find(|(class, _)| *class == node.class)
        .ok_or_else(|| {
            MigrationError::DecodeFailure(format!("class {} is not a refresh token", node.class))
        })?;
    read(node, table)
}

pub(crate) fn descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new(DEFAULT_ACCESS_TOKEN_CLASS, DEFAULT_ACCESS_TOKEN_UID),
        TypeDescriptor::new(ACCESS_TOKEN_CLASS, ACCESS_TOKEN_UID),
        TypeDescriptor::new(DEFAULT_REFRESH_TOKEN_CLASS, DEFAULT_REFRESH_TOKEN_UID),
        TypeDescriptor::new(EXPIRING_REFRESH_TOKEN_CLASS, EXPIRING_REFRESH_TOKEN_UID),
    ]
}
