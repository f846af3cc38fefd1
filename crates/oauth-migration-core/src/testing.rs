//! Legacy type archive and blob builders shared by the unit tests. The
//! archive mirrors `oldlib/provider-m6.json` at the repository root.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authentication::{AuthorizationRequest, OAuth2Authentication};
use crate::record::{AccessTokenRecord, RefreshTokenRecord};
use crate::stream::{self, ObjectNode, StreamValue};
use crate::token::{AccessToken, DefaultOAuth2AccessToken, DefaultOAuth2RefreshToken, RefreshToken};
use crate::types::{current_type_table, CodecRegistry, TypeArchive, TypeDescriptor, TypeTable};

pub(crate) const LEGACY_AUTHENTICATION_CLASS: &str = "oauth2.provider.OAuth2Authentication";
pub(crate) const LEGACY_AUTHENTICATION_UID: i64 = 3_209_112_327_613_283_912;
pub(crate) const LEGACY_REQUEST_CLASS: &str = "oauth2.provider.AuthorizationRequest";
pub(crate) const LEGACY_REQUEST_UID: i64 = -1_452_436_117_395_046_592;
pub(crate) const LEGACY_USER_CLASS: &str =
    "security.authentication.UsernamePasswordAuthenticationToken";
pub(crate) const LEGACY_USER_UID: i64 = 300;
pub(crate) const LEGACY_AUTHORITY_CLASS: &str = "security.core.authority.GrantedAuthorityImpl";
pub(crate) const LEGACY_AUTHORITY_UID: i64 = 200;

pub(crate) fn legacy_archive() -> TypeArchive {
    TypeArchive {
        artifact: "spring-security-oauth2-1.0.0.M6".to_string(),
        types: vec![
            TypeDescriptor::new(LEGACY_AUTHENTICATION_CLASS, LEGACY_AUTHENTICATION_UID)
                .with_accessor("authorization_request", "clientAuthentication")
                .with_accessor("user_authentication", "userAuthentication"),
            TypeDescriptor::new(LEGACY_REQUEST_CLASS, LEGACY_REQUEST_UID)
                .with_accessor("parameters", "authorizationParameters")
                .with_accessor("authorities", "authorities")
                .with_accessor("resource_ids", "resourceIds")
                .with_accessor("approved", "approved")
                .with_accessor("redirect_uri", "requestedRedirect"),
            TypeDescriptor::new(LEGACY_USER_CLASS, LEGACY_USER_UID)
                .with_accessor("principal", "principal")
                .with_accessor("credentials", "credentials")
                .with_accessor("authorities", "authorities"),
            TypeDescriptor::new(LEGACY_AUTHORITY_CLASS, LEGACY_AUTHORITY_UID)
                .with_accessor("authority", "role"),
        ],
    }
}

pub(crate) fn registry() -> CodecRegistry {
    let shared = Arc::new(TypeTable::shared());
    let mut legacy = TypeTable::child("legacy", Arc::clone(&shared));
    legacy
        .define_archive(legacy_archive())
        .unwrap_or_else(|err| panic!("legacy archive: {err}"));
    let current = current_type_table(shared).unwrap_or_else(|err| panic!("current table: {err}"));
    CodecRegistry::new(Arc::new(legacy), Arc::new(current))
        .unwrap_or_else(|err| panic!("codec registry: {err}"))
}

pub(crate) fn legacy_authority(role: &str) -> ObjectNode {
    ObjectNode::new(LEGACY_AUTHORITY_CLASS, LEGACY_AUTHORITY_UID).with_field("role", StreamValue::str(role))
}

pub(crate) fn legacy_authentication_value(client_id: &str, user: Option<&str>) -> StreamValue {
    let parameters = BTreeMap::from([
        ("client_id".to_string(), client_id.to_string()),
        ("scope".to_string(), "read write".to_string()),
    ]);
    let request = ObjectNode::new(LEGACY_REQUEST_CLASS, LEGACY_REQUEST_UID)
        .with_field("authorizationParameters", StreamValue::string_map(&parameters))
        .with_field("authorities", StreamValue::List(vec![legacy_authority("ROLE_CLIENT").into()]))
        .with_field("resourceIds", StreamValue::Set(vec![StreamValue::str("api")]))
        .with_field("approved", StreamValue::Bool(true))
        .with_field("requestedRedirect", StreamValue::str("https://app.example/cb"));

    let user = user.map_or(StreamValue::Null, |name| {
        ObjectNode::new(LEGACY_USER_CLASS, LEGACY_USER_UID)
            .with_field("principal", StreamValue::str(name))
            .with_field("credentials", StreamValue::Null)
            .with_field("authorities", StreamValue::List(vec![legacy_authority("ROLE_USER").into()]))
            .into()
    });

    ObjectNode::new(LEGACY_AUTHENTICATION_CLASS, LEGACY_AUTHENTICATION_UID)
        .with_field("clientAuthentication", request.into())
        .with_field("userAuthentication", user)
        .into()
}

pub(crate) fn set_request_field(value: &mut StreamValue, field: &str, replacement: StreamValue) {
    let StreamValue::Object(root) = value else { panic!("legacy authentication is an object") };
    let Some(StreamValue::Object(request)) = root.fields.get_mut("clientAuthentication") else {
        panic!("legacy authentication has a request")
    };
    request.fields.insert(field.to_string(), replacement);
}

pub(crate) fn legacy_authentication(client_id: &str, user: Option<&str>) -> Vec<u8> {
    encode(&legacy_authentication_value(client_id, user))
}

pub(crate) fn current_authentication(client_id: &str) -> Vec<u8> {
    let request = AuthorizationRequest::new(BTreeMap::from([(
        "client_id".to_string(),
        client_id.to_string(),
    )]));
    encode(&OAuth2Authentication::new(request, None).to_stream())
}

pub(crate) fn access_token_blob(value: &str, refresh: Option<&str>) -> Vec<u8> {
    let mut token = DefaultOAuth2AccessToken::new(value);
    token.attach_refresh_token(
        refresh.map(|refresh| Box::new(DefaultOAuth2RefreshToken::new(refresh)) as Box<dyn RefreshToken>),
    );
    encode(&token.to_stream().unwrap_or_else(|err| panic!("access token stream: {err}")))
}

pub(crate) fn refresh_token_blob(value: &str) -> Vec<u8> {
    let token = DefaultOAuth2RefreshToken::new(value);
    encode(&token.to_stream().unwrap_or_else(|err| panic!("refresh token stream: {err}")))
}

pub(crate) fn access_record(token_id: &str, refresh: Option<&str>) -> AccessTokenRecord {
    AccessTokenRecord {
        token_id: token_id.to_string(),
        token: access_token_blob(token_id, refresh),
        authentication_id: Some(format!("auth-{token_id}")),
        user_name: Some("alice".to_string()),
        client_id: Some("mobile-app".to_string()),
        authentication: legacy_authentication("mobile-app", Some("alice")),
        refresh_token: refresh.map(str::to_string),
    }
}

pub(crate) fn refresh_record(token_id: &str) -> RefreshTokenRecord {
    RefreshTokenRecord {
        token_id: token_id.to_string(),
        token: refresh_token_blob(token_id),
        authentication: legacy_authentication("mobile-app", Some("alice")),
    }
}

fn encode(value: &StreamValue) -> Vec<u8> {
    stream::encode(value).unwrap_or_else(|err| panic!("encode: {err}"))
}
