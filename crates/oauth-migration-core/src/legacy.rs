//! Read-only view over authentication blobs written by the legacy library.
//!
//! Legacy objects are never materialized as Rust types. A blob is resolved in
//! the legacy type context and then read through named accessors declared in
//! the type archives; an accessor the class does not declare is a missing
//! capability, which aborts the run.

use std::collections::{BTreeMap, BTreeSet};

use crate::authentication::GrantedAuthority;
use crate::error::{MigrationError, Result};
use crate::stream::{ObjectNode, StreamValue};
use crate::types::{CodecRegistry, FormatVersion, TypeDescriptor, TypeTable};

pub const AUTHORIZATION_REQUEST: &str = "authorization_request";
pub const USER_AUTHENTICATION: &str = "user_authentication";
pub const PARAMETERS: &str = "parameters";
pub const AUTHORITIES: &str = "authorities";
pub const RESOURCE_IDS: &str = "resource_ids";
pub const APPROVED: &str = "approved";
pub const REDIRECT_URI: &str = "redirect_uri";
pub const PRINCIPAL: &str = "principal";
pub const CREDENTIALS: &str = "credentials";
pub const AUTHORITY: &str = "authority";

/// An object node bound to its descriptor in a resolution context.
#[derive(Debug, Clone, Copy)]
pub struct LegacyObject<'a> {
    node: &'a ObjectNode,
    descriptor: &'a TypeDescriptor,
    table: &'a TypeTable,
}

impl<'a> LegacyObject<'a> {
    /// # Errors
    /// Returns a decode error when `value` is not an object or its class
    /// does not resolve compatibly in `table`.
    pub fn bind(value: &'a StreamValue, table: &'a TypeTable) -> Result<Self> {
        let node = value.as_object().ok_or_else(|| {
            MigrationError::DecodeFailure(format!("expected an object, found {}", value.kind()))
        })?;
        let descriptor = table.check(node)?;
        Ok(Self { node, descriptor, table })
    }

    #[must_use]
    pub fn class_name(&self) -> &'a str {
        &self.node.class
    }

    /// Read the value behind `accessor`. A declared accessor whose field the
    /// writer left out reads as null.
    ///
    /// # Errors
    /// Returns [`MigrationError::MissingCapability`] when the class does not
    /// declare `accessor`.
    pub fn invoke(&self, accessor: &str) -> Result<&'a StreamValue> {
        let field = self.descriptor.field_for(accessor).ok_or_else(|| {
            MigrationError::MissingCapability {
                class: self.node.class.clone(),
                capability: accessor.to_string(),
            }
        })?;
        Ok(self.node.field(field))
    }

    /// Like [`LegacyObject::invoke`] for accessors returning another object;
    /// null comes back as `None`.
    ///
    /// # Errors
    /// Missing capability, or a decode error for a non-object result.
    pub fn invoke_object(&self, accessor: &str) -> Result<Option<LegacyObject<'a>>> {
        match self.invoke(accessor)? {
            StreamValue::Null => Ok(None),
            value => Self::bind(value, self.table).map(Some),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFields {
    pub parameters: BTreeMap<String, String>,
    pub authorities: Vec<GrantedAuthority>,
    pub resource_ids: BTreeSet<String>,
    pub approved: bool,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFields {
    pub principal: StreamValue,
    pub credentials: StreamValue,
    pub authorities: Vec<GrantedAuthority>,
}

/// Everything the migration needs from a legacy authentication object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationFields {
    pub request: RequestFields,
    /// `None` for client-only grants.
    pub user: Option<UserFields>,
}

#[derive(Debug, Clone, Copy)]
pub struct LegacyAdapter<'a> {
    registry: &'a CodecRegistry,
}

impl<'a> LegacyAdapter<'a> {
    #[must_use]
    pub fn new(registry: &'a CodecRegistry) -> Self {
        Self { registry }
    }

    /// Decode a legacy authentication blob and project its fields.
    ///
    /// # Errors
    /// Decode errors for corrupt or unresolvable blobs,
    /// [`MigrationError::MissingCapability`] for absent accessors.
    pub fn project_authentication(&self, bytes: &[u8]) -> Result<AuthenticationFields> {
        let table = self.registry.context(FormatVersion::Legacy);
        let value = self.registry.decode(FormatVersion::Legacy, bytes)?;
        let root = LegacyObject::bind(&value, table)?;

        let request = root.invoke_object(AUTHORIZATION_REQUEST)?.ok_or_else(|| {
            MigrationError::DecodeFailure(format!(
                "{} has no authorization request",
                root.class_name()
            ))
        })?;
        let request = project_request(request)?;

        let user = root.invoke_object(USER_AUTHENTICATION)?.map(project_user).transpose()?;

        Ok(AuthenticationFields { request, user })
    }
}

fn project_request(request: LegacyObject<'_>) -> Result<RequestFields> {
    Ok(RequestFields {
        parameters: request.invoke(PARAMETERS)?.to_string_map(PARAMETERS)?,
        authorities: project_authorities(request)?,
        resource_ids: request.invoke(RESOURCE_IDS)?.to_string_set(RESOURCE_IDS)?,
        approved: request.invoke(APPROVED)?.to_optional_bool(APPROVED)?.unwrap_or(false),
        redirect_uri: request.invoke(REDIRECT_URI)?.to_optional_string(REDIRECT_URI)?,
    })
}

fn project_user(user: LegacyObject<'_>) -> Result<UserFields> {
    Ok(UserFields {
        principal: user.invoke(PRINCIPAL)?.clone(),
        credentials: user.invoke(CREDENTIALS)?.clone(),
        authorities: project_authorities(user)?,
    })
}

fn project_authorities(owner: LegacyObject<'_>) -> Result<Vec<GrantedAuthority>> {
    let items = match owner.invoke(AUTHORITIES)? {
        StreamValue::Null => return Ok(Vec::new()),
        StreamValue::List(items) | StreamValue::Set(items) => items,
        other => {
            return Err(MigrationError::DecodeFailure(format!(
                "{}.{AUTHORITIES}: expected a collection, found {}",
                owner.class_name(),
                other.kind()
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            let authority = LegacyObject::bind(item, owner.table)?;
            authority
                .invoke(AUTHORITY)?
                .to_optional_string(AUTHORITY)?
                .map(GrantedAuthority::new)
                .ok_or_else(|| {
                    MigrationError::DecodeFailure(format!(
                        "{} has a null authority",
                        authority.class_name()
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream;
    use crate::testing::{self, LEGACY_AUTHENTICATION_CLASS, LEGACY_AUTHORITY_CLASS};

    #[test]
    fn projects_request_and_user_fields() -> Result<()> {
        let registry = testing::registry();
        let bytes = testing::legacy_authentication("mobile-app", Some("alice"));

        let fields = LegacyAdapter::new(&registry).project_authentication(&bytes)?;
        assert_eq!(fields.request.parameters.get("client_id").map(String::as_str), Some("mobile-app"));
        assert_eq!(fields.request.authorities, vec![GrantedAuthority::new("ROLE_CLIENT")]);
        assert_eq!(fields.request.resource_ids, BTreeSet::from(["api".to_string()]));
        assert!(fields.request.approved);
        assert_eq!(fields.request.redirect_uri.as_deref(), Some("https://app.example/cb"));

        let user = fields.user.unwrap_or_else(|| panic!("user authentication expected"));
        assert_eq!(user.principal, StreamValue::str("alice"));
        assert_eq!(user.authorities, vec![GrantedAuthority::new("ROLE_USER")]);
        Ok(())
    }

    #[test]
    fn client_only_grant_has_no_user() -> Result<()> {
        let registry = testing::registry();
        let bytes = testing::legacy_authentication("mobile-app", None);

        let fields = LegacyAdapter::new(&registry).project_authentication(&bytes)?;
        assert!(fields.user.is_none());
        Ok(())
    }

    #[test]
    fn null_approved_reads_as_false() -> Result<()> {
        let registry = testing::registry();
        let mut value = testing::legacy_authentication_value("mobile-app", None);
        testing::set_request_field(&mut value, "approved", StreamValue::Null);
        let bytes = stream::encode(&value)?;

        let fields = LegacyAdapter::new(&registry).project_authentication(&bytes)?;
        assert!(!fields.request.approved);
        Ok(())
    }

    #[test]
    fn undeclared_accessor_is_a_missing_capability() -> Result<()> {
        let registry = testing::registry();
        let value = StreamValue::from(testing::legacy_authority("ROLE_USER"));
        let object = LegacyObject::bind(&value, registry.context(FormatVersion::Legacy))?;

        assert_eq!(object.invoke(AUTHORITY)?, &StreamValue::str("ROLE_USER"));
        let err = object.invoke("principal").err();
        assert!(
            matches!(
                &err,
                Some(MigrationError::MissingCapability { class, capability })
                    if class == LEGACY_AUTHORITY_CLASS && capability == "principal"
            ),
            "got {err:?}"
        );
        Ok(())
    }

    #[test]
    fn current_format_blob_does_not_decode_as_legacy() {
        let registry = testing::registry();
        let bytes = testing::current_authentication("mobile-app");

        let err = LegacyAdapter::new(&registry).project_authentication(&bytes).err();
        assert!(
            matches!(
                &err,
                Some(MigrationError::IncompatibleType { class, .. }) if class == LEGACY_AUTHENTICATION_CLASS
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn corrupt_blob_is_a_decode_failure() {
        let registry = testing::registry();
        let err = LegacyAdapter::new(&registry).project_authentication(b"not a stream").err();
        assert!(matches!(err, Some(MigrationError::DecodeFailure(_))), "got {err:?}");
    }
}
