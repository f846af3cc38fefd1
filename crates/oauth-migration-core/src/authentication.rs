//! Current-format security context: the object graph stored in the
//! `authentication` column after migration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::error::{MigrationError, Result};
use crate::stream::{ObjectNode, StreamValue};
use crate::types::{TypeDescriptor, TypeTable};

pub const OAUTH2_AUTHENTICATION_CLASS: &str = "oauth2.provider.OAuth2Authentication";
pub const OAUTH2_AUTHENTICATION_UID: i64 = -4_809_832_298_438_307_309;
pub const AUTHORIZATION_REQUEST_CLASS: &str = "oauth2.provider.DefaultAuthorizationRequest";
pub const AUTHORIZATION_REQUEST_UID: i64 = 7_429_836_160_213_093_147;
pub const USER_AUTHENTICATION_CLASS: &str =
    "security.authentication.UsernamePasswordAuthenticationToken";
pub const USER_AUTHENTICATION_UID: i64 = 310;
pub const GRANTED_AUTHORITY_CLASS: &str = "security.core.authority.SimpleGrantedAuthority";
pub const GRANTED_AUTHORITY_UID: i64 = 310;

pub const CLIENT_ID_PARAMETER: &str = "client_id";

pub(crate) fn descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new(OAUTH2_AUTHENTICATION_CLASS, OAUTH2_AUTHENTICATION_UID),
        TypeDescriptor::new(AUTHORIZATION_REQUEST_CLASS, AUTHORIZATION_REQUEST_UID),
        TypeDescriptor::new(USER_AUTHENTICATION_CLASS, USER_AUTHENTICATION_UID),
        TypeDescriptor::new(GRANTED_AUTHORITY_CLASS, GRANTED_AUTHORITY_UID),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrantedAuthority(String);

impl GrantedAuthority {
    #[must_use]
    pub fn new(authority: impl Into<String>) -> Self {
        Self(authority.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_stream(&self) -> StreamValue {
        ObjectNode::new(GRANTED_AUTHORITY_CLASS, GRANTED_AUTHORITY_UID)
            .with_field("authority", StreamValue::str(&self.0))
            .into()
    }
}

impl Display for GrantedAuthority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthentication {
    pub principal: StreamValue,
    pub credentials: StreamValue,
    pub authorities: Vec<GrantedAuthority>,
    pub authenticated: bool,
}

impl UserAuthentication {
    /// A user authentication built with its authorities is authenticated.
    #[must_use]
    pub fn new(
        principal: StreamValue,
        credentials: StreamValue,
        authorities: Vec<GrantedAuthority>,
    ) -> Self {
        Self { principal, credentials, authorities, authenticated: true }
    }

    /// Principal name when the principal is a plain string or an object
    /// carrying a `username` field.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.principal {
            StreamValue::Str(name) => Some(name),
            StreamValue::Object(node) => match node.field("username") {
                StreamValue::Str(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationRequest {
    pub parameters: BTreeMap<String, String>,
    pub authorities: Vec<GrantedAuthority>,
    pub resource_ids: BTreeSet<String>,
    pub approved: bool,
    pub redirect_uri: Option<String>,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn new(parameters: BTreeMap<String, String>) -> Self {
        Self { parameters, ..Self::default() }
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.parameters.get(CLIENT_ID_PARAMETER).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Authentication {
    pub authorization_request: AuthorizationRequest,
    pub user_authentication: Option<UserAuthentication>,
}

impl OAuth2Authentication {
    #[must_use]
    pub fn new(
        authorization_request: AuthorizationRequest,
        user_authentication: Option<UserAuthentication>,
    ) -> Self {
        Self { authorization_request, user_authentication }
    }

    /// The user's name, or the client id for client-only grants.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.user_authentication {
            Some(user) => user.name(),
            None => self.authorization_request.client_id(),
        }
    }

    #[must_use]
    pub fn to_stream(&self) -> StreamValue {
        let request = &self.authorization_request;
        let request_node = ObjectNode::new(AUTHORIZATION_REQUEST_CLASS, AUTHORIZATION_REQUEST_UID)
            .with_field("parameters", StreamValue::string_map(&request.parameters))
            .with_field("authorities", authorities_to_stream(&request.authorities))
            .with_field("resourceIds", StreamValue::string_set(&request.resource_ids))
            .with_field("approved", StreamValue::Bool(request.approved))
            .with_field("redirectUri", StreamValue::optional_str(request.redirect_uri.as_deref()));

        let user_value = self.user_authentication.as_ref().map_or(StreamValue::Null, |user| {
            ObjectNode::new(USER_AUTHENTICATION_CLASS, USER_AUTHENTICATION_UID)
                .with_field("principal", user.principal.clone())
                .with_field("credentials", user.credentials.clone())
                .with_field("authorities", authorities_to_stream(&user.authorities))
                .with_field("authenticated", StreamValue::Bool(user.authenticated))
                .into()
        });

        ObjectNode::new(OAUTH2_AUTHENTICATION_CLASS, OAUTH2_AUTHENTICATION_UID)
            .with_field("storedRequest", request_node.into())
            .with_field("userAuthentication", user_value)
            .into()
    }

    /// Rebuild from a graph already resolved against `table`.
    ///
    /// # Errors
    /// Returns a decode error when the graph does not have the current layout.
    pub fn from_stream(value: &StreamValue, table: &TypeTable) -> Result<Self> {
        let root = expect_object(value, OAUTH2_AUTHENTICATION_CLASS, table)?;
        let request_node = expect_object(root.field("storedRequest"), AUTHORIZATION_REQUEST_CLASS, table)?;

        let authorization_request = AuthorizationRequest {
            parameters: request_node.field("parameters").to_string_map("parameters")?,
            authorities: authorities_from_stream(request_node.field("authorities"), table)?,
            resource_ids: request_node.field("resourceIds").to_string_set("resourceIds")?,
            approved: request_node.field("approved").to_optional_bool("approved")?.unwrap_or(false),
            redirect_uri: request_node.field("redirectUri").to_optional_string("redirectUri")?,
        };

        let user_authentication = match root.field("userAuthentication") {
            StreamValue::Null => None,
            value => {
                let user = expect_object(value, USER_AUTHENTICATION_CLASS, table)?;
                Some(UserAuthentication {
                    principal: user.field("principal").clone(),
                    credentials: user.field("credentials").clone(),
                    authorities: authorities_from_stream(user.field("authorities"), table)?,
                    authenticated: user
                        .field("authenticated")
                        .to_optional_bool("authenticated")?
                        .unwrap_or(false),
                })
            }
        };

        Ok(Self { authorization_request, user_authentication })
    }
}

fn authorities_to_stream(authorities: &[GrantedAuthority]) -> StreamValue {
    StreamValue::List(authorities.iter().map(GrantedAuthority::to_stream).collect())
}

fn authorities_from_stream(value: &StreamValue, table: &TypeTable) -> Result<Vec<GrantedAuthority>> {
    let items = match value {
        StreamValue::Null => return Ok(Vec::new()),
        StreamValue::List(items) | StreamValue::Set(items) => items,
        other => {
            return Err(MigrationError::DecodeFailure(format!(
                "authorities: expected list, found {}",
                other.kind()
            )))
        }
    };
    items
        .iter()
        .map(|item| {
            let node = expect_object(item, GRANTED_AUTHORITY_CLASS, table)?;
            node.field("authority")
                .to_optional_string("authority")?
                .map(GrantedAuthority::new)
                .ok_or_else(|| MigrationError::DecodeFailure("authority is null".to_string()))
        })
        .collect()
}

fn expect_object<'a>(value: &'a StreamValue, class: &str, table: &TypeTable) -> Result<&'a ObjectNode> {
    let node = value.as_object().ok_or_else(|| {
        MigrationError::DecodeFailure(format!("expected {class}, found {}", value.kind()))
    })?;
    table.check(node)?;
    if node.class != class {
        return Err(MigrationError::DecodeFailure(format!(
            "expected {class}, found {}",
            node.class
        )));
    }
    Ok(node)
}
