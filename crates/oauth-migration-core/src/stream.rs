//! Self-describing object stream used for every serialized token and
//! authentication blob.
//!
//! A blob is a JSON document `{"stream_version": 1, "root": <value>}`. Values
//! are tagged nodes; object nodes carry the fully-qualified class name and the
//! serial uid of the type that wrote them, which is what makes legacy and
//! current blobs distinguishable even when they share a class name.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{MigrationError, Result};

pub const STREAM_VERSION: u32 = 1;

static NULL: StreamValue = StreamValue::Null;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    List(Vec<StreamValue>),
    Set(Vec<StreamValue>),
    Map(BTreeMap<String, StreamValue>),
    Object(ObjectNode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub class: String,
    pub uid: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, StreamValue>,
}

#[derive(Serialize)]
struct StreamDocumentRef<'a> {
    stream_version: u32,
    root: &'a StreamValue,
}

#[derive(Deserialize)]
struct StreamDocument {
    stream_version: u32,
    root: StreamValue,
}

/// Serialize a value graph into blob bytes.
///
/// # Errors
/// Returns [`MigrationError::Encode`] when JSON serialization fails.
pub fn encode(root: &StreamValue) -> Result<Vec<u8>> {
    serde_json::to_vec(&StreamDocumentRef { stream_version: STREAM_VERSION, root })
        .map_err(|err| MigrationError::Encode(format!("failed to serialize object stream: {err}")))
}

/// Parse blob bytes into an unresolved value graph.
///
/// # Errors
/// Returns [`MigrationError::DecodeFailure`] for malformed bytes or an
/// unsupported stream version.
pub fn decode(bytes: &[u8]) -> Result<StreamValue> {
    let document: StreamDocument = serde_json::from_slice(bytes).map_err(|err| {
        MigrationError::DecodeFailure(format!("corrupt object stream: {err}"))
    })?;
    if document.stream_version != STREAM_VERSION {
        return Err(MigrationError::DecodeFailure(format!(
            "unsupported object stream version {}; expected {STREAM_VERSION}",
            document.stream_version
        )));
    }
    Ok(document.root)
}

impl ObjectNode {
    #[must_use]
    pub fn new(class: impl Into<String>, uid: i64) -> Self {
        Self { class: class.into(), uid, fields: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: StreamValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Field value, or null when the writer left it out.
    #[must_use]
    pub fn field(&self, name: &str) -> &StreamValue {
        self.fields.get(name).unwrap_or(&NULL)
    }
}

impl From<ObjectNode> for StreamValue {
    fn from(node: ObjectNode) -> Self {
        Self::Object(node)
    }
}

impl StreamValue {
    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    #[must_use]
    pub fn optional_str(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |value| Self::Str(value.to_string()))
    }

    #[must_use]
    pub fn string_set<'a>(values: impl IntoIterator<Item = &'a String>) -> Self {
        Self::Set(values.into_iter().map(|value| Self::Str(value.clone())).collect())
    }

    #[must_use]
    pub fn string_map(values: &BTreeMap<String, String>) -> Self {
        Self::Map(values.iter().map(|(key, value)| (key.clone(), Self::Str(value.clone()))).collect())
    }

    /// # Errors
    /// Returns [`MigrationError::Encode`] when the instant is outside the
    /// representable millisecond range.
    pub fn date(value: OffsetDateTime) -> Result<Self> {
        let millis = value.unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis)
            .map(Self::Date)
            .map_err(|_| MigrationError::Encode(format!("date {value} is out of range")))
    }

    /// # Errors
    /// See [`StreamValue::date`].
    pub fn optional_date(value: Option<OffsetDateTime>) -> Result<Self> {
        value.map_or(Ok(Self::Null), Self::date)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectNode> {
        match self {
            Self::Object(node) => Some(node),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Date(_) => "date",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] when the value is neither a
    /// string nor null.
    pub fn to_optional_string(&self, what: &str) -> Result<Option<String>> {
        match self {
            Self::Null => Ok(None),
            Self::Str(value) => Ok(Some(value.clone())),
            other => Err(type_mismatch(what, "str", other)),
        }
    }

    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] when the value is neither a
    /// boolean nor null.
    pub fn to_optional_bool(&self, what: &str) -> Result<Option<bool>> {
        match self {
            Self::Null => Ok(None),
            Self::Bool(value) => Ok(Some(*value)),
            other => Err(type_mismatch(what, "bool", other)),
        }
    }

    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] when the value is not a date,
    /// or holds an out-of-range instant.
    pub fn to_optional_date(&self, what: &str) -> Result<Option<OffsetDateTime>> {
        match self {
            Self::Null => Ok(None),
            Self::Date(millis) => OffsetDateTime::from_unix_timestamp_nanos(
                i128::from(*millis) * 1_000_000,
            )
            .map(Some)
            .map_err(|err| MigrationError::DecodeFailure(format!("{what}: {err}"))),
            other => Err(type_mismatch(what, "date", other)),
        }
    }

    /// Strings from a list or set; null reads as empty.
    ///
    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] for any other shape.
    pub fn to_string_set(&self, what: &str) -> Result<BTreeSet<String>> {
        match self {
            Self::Null => Ok(BTreeSet::new()),
            Self::List(items) | Self::Set(items) => items
                .iter()
                .map(|item| match item {
                    Self::Str(value) => Ok(value.clone()),
                    other => Err(type_mismatch(what, "str element", other)),
                })
                .collect(),
            other => Err(type_mismatch(what, "set", other)),
        }
    }

    /// String-to-string map; null reads as empty.
    ///
    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] for any other shape or a
    /// non-string value.
    pub fn to_string_map(&self, what: &str) -> Result<BTreeMap<String, String>> {
        match self {
            Self::Null => Ok(BTreeMap::new()),
            Self::Map(entries) => entries
                .iter()
                .map(|(key, value)| match value {
                    Self::Str(value) => Ok((key.clone(), value.clone())),
                    other => Err(type_mismatch(what, "str value", other)),
                })
                .collect(),
            other => Err(type_mismatch(what, "map", other)),
        }
    }

    /// Opaque map used for free-form metadata; null reads as empty.
    ///
    /// # Errors
    /// Returns [`MigrationError::DecodeFailure`] when the value is not a map.
    pub fn to_value_map(&self, what: &str) -> Result<BTreeMap<String, StreamValue>> {
        match self {
            Self::Null => Ok(BTreeMap::new()),
            Self::Map(entries) => Ok(entries.clone()),
            other => Err(type_mismatch(what, "map", other)),
        }
    }

    /// Visit every object node in the graph, depth first, parents before children.
    ///
    /// # Errors
    /// Propagates the first error returned by `visit`.
    pub fn visit_objects<F>(&self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&ObjectNode) -> Result<()>,
    {
        match self {
            Self::Object(node) => {
                visit(node)?;
                for value in node.fields.values() {
                    value.visit_objects(visit)?;
                }
                Ok(())
            }
            Self::List(items) | Self::Set(items) => {
                items.iter().try_for_each(|item| item.visit_objects(visit))
            }
            Self::Map(entries) => entries.values().try_for_each(|value| value.visit_objects(visit)),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::Date(_) => Ok(()),
        }
    }
}

fn type_mismatch(what: &str, expected: &str, found: &StreamValue) -> MigrationError {
    MigrationError::DecodeFailure(format!("{what}: expected {expected}, found {}", found.kind()))
}
