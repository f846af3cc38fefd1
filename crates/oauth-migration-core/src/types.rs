//! Type-resolution contexts and the codec registry keyed by format version.
//!
//! Each [`TypeTable`] is one resolution context: a set of class descriptors
//! plus an optional parent that is consulted first. The current context is
//! built in-process from the new-format types; the legacy context is loaded
//! from type archives on disk and chained to the shared ancestor only, so a
//! legacy class name can never bind to the current definition of that class.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::stream::{self, ObjectNode, StreamValue};
use crate::{authentication, token};

/// Conventional directory names searched for legacy type archives.
pub const LEGACY_TYPE_DIRS: [&str; 2] = ["oldlib", "target/oldlib"];

const ARCHIVE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub uid: i64,
    /// Accessor name to the field it reads.
    #[serde(default)]
    pub accessors: BTreeMap<String, String>,
}

impl TypeDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, uid: i64) -> Self {
        Self { name: name.into(), uid, accessors: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_accessor(mut self, accessor: &str, field: &str) -> Self {
        self.accessors.insert(accessor.to_string(), field.to_string());
        self
    }

    #[must_use]
    pub fn field_for(&self, accessor: &str) -> Option<&str> {
        self.accessors.get(accessor).map(String::as_str)
    }
}

/// On-disk bundle of type descriptors, one per archived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeArchive {
    pub artifact: String,
    pub types: Vec<TypeDescriptor>,
}

pub struct TypeTable {
    name: String,
    types: BTreeMap<String, TypeDescriptor>,
    parent: Option<Arc<TypeTable>>,
}

impl fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTable")
            .field("name", &self.name)
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("parent", &self.parent.as_ref().map(|parent| parent.name.clone()))
            .finish()
    }
}

impl TypeTable {
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self { name: name.into(), types: BTreeMap::new(), parent: None }
    }

    #[must_use]
    pub fn child(name: impl Into<String>, parent: Arc<TypeTable>) -> Self {
        Self { name: name.into(), types: BTreeMap::new(), parent: Some(parent) }
    }

    /// The minimal ancestor shared by every context. It starts empty;
    /// application types (custom principals and the like) are added to it.
    #[must_use]
    pub fn shared() -> Self {
        Self::root("shared")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<TypeTable>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register one descriptor. Re-registering an identical descriptor is a no-op.
    ///
    /// # Errors
    /// Returns [`MigrationError::Config`] when a different definition of the
    /// same class is already registered in this table.
    pub fn define(&mut self, descriptor: TypeDescriptor) -> Result<()> {
        match self.types.get(&descriptor.name) {
            Some(existing) if *existing != descriptor => Err(MigrationError::Config(format!(
                "conflicting definitions of class {} in the {} type context",
                descriptor.name, self.name
            ))),
            Some(_) => Ok(()),
            None => {
                self.types.insert(descriptor.name.clone(), descriptor);
                Ok(())
            }
        }
    }

    /// # Errors
    /// See [`TypeTable::define`].
    pub fn define_archive(&mut self, archive: TypeArchive) -> Result<()> {
        archive.types.into_iter().try_for_each(|descriptor| self.define(descriptor))
    }

    /// Load every `*.json` type archive in `dir`, in file-name order.
    ///
    /// # Errors
    /// Returns [`MigrationError::Config`] when the directory cannot be read,
    /// holds no archives, or an archive is malformed or conflicting.
    pub fn define_archives_from_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir).map_err(|err| {
            MigrationError::Config(format!("cannot read type directory {}: {err}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| {
                    MigrationError::Config(format!(
                        "cannot list type directory {}: {err}",
                        dir.display()
                    ))
                })?
                .path();
            if path.is_file()
                && path.extension().is_some_and(|extension| extension == ARCHIVE_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(MigrationError::Config(format!(
                "no type archives (*.{ARCHIVE_EXTENSION}) found in {}",
                dir.display()
            )));
        }

        for path in &paths {
            let body = fs::read(path).map_err(|err| {
                MigrationError::Config(format!("cannot read type archive {}: {err}", path.display()))
            })?;
            let archive: TypeArchive = serde_json::from_slice(&body).map_err(|err| {
                MigrationError::Config(format!("malformed type archive {}: {err}", path.display()))
            })?;
            tracing::debug!(
                artifact = %archive.artifact,
                types = archive.types.len(),
                context = %self.name,
                "loaded type archive"
            );
            self.define_archive(archive)?;
        }
        Ok(paths.len())
    }

    /// Parent-first lookup, the way delegating loaders resolve classes.
    #[must_use]
    pub fn resolve(&self, class: &str) -> Option<&TypeDescriptor> {
        self.parent
            .as_ref()
            .and_then(|parent| parent.resolve(class))
            .or_else(|| self.types.get(class))
    }

    /// Resolve the class of one object node and check its serial uid.
    ///
    /// # Errors
    /// Returns [`MigrationError::UnresolvedType`] or
    /// [`MigrationError::IncompatibleType`].
    pub fn check(&self, node: &ObjectNode) -> Result<&TypeDescriptor> {
        let descriptor = self.resolve(&node.class).ok_or_else(|| MigrationError::UnresolvedType {
            class: node.class.clone(),
            context: self.name.clone(),
        })?;
        if descriptor.uid != node.uid {
            return Err(MigrationError::IncompatibleType {
                class: node.class.clone(),
                context: self.name.clone(),
                stream_uid: node.uid,
                local_uid: descriptor.uid,
            });
        }
        Ok(descriptor)
    }

    /// Check every object node reachable from `value`.
    ///
    /// # Errors
    /// See [`TypeTable::check`].
    pub fn check_graph(&self, value: &StreamValue) -> Result<()> {
        value.visit_objects(&mut |node| self.check(node).map(|_| ()))
    }

    /// True when `other` is this table or one of its ancestors.
    #[must_use]
    pub fn chains_to(&self, other: &TypeTable) -> bool {
        std::ptr::eq(self, other)
            || self.parent.as_ref().is_some_and(|parent| parent.chains_to(other))
    }
}

/// Locate the legacy type directory: an explicit path wins, otherwise the
/// conventional names are searched below `base`.
///
/// # Errors
/// Returns [`MigrationError::Config`] when no candidate directory exists.
pub fn locate_legacy_type_dir(explicit: Option<&Path>, base: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        return Err(MigrationError::Config(format!(
            "legacy type directory {} does not exist",
            path.display()
        )));
    }

    LEGACY_TYPE_DIRS
        .iter()
        .map(|name| base.join(name))
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| {
            MigrationError::Config(format!(
                "could not find a legacy type directory ({}) below {}",
                LEGACY_TYPE_DIRS.join(" or "),
                base.display()
            ))
        })
}

/// The context holding the new-format token and authentication classes.
///
/// # Errors
/// Returns [`MigrationError::Config`] when `shared` already defines one of
/// the built-in classes differently.
pub fn current_type_table(shared: Arc<TypeTable>) -> Result<TypeTable> {
    let mut table = TypeTable::child("current", shared);
    for descriptor in token::descriptors().into_iter().chain(authentication::descriptors()) {
        table.define(descriptor)?;
    }
    for descriptor in table.types.values() {
        if let Some(shadow) = table.parent.as_ref().and_then(|parent| parent.resolve(&descriptor.name))
        {
            if shadow != descriptor {
                return Err(MigrationError::Config(format!(
                    "shared type context shadows built-in class {}",
                    descriptor.name
                )));
            }
        }
    }
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatVersion {
    Legacy,
    Current,
}

impl FormatVersion {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Current => "current",
        }
    }
}

/// Decode/encode entry point: one resolution context per format version.
#[derive(Debug)]
pub struct CodecRegistry {
    legacy: Arc<TypeTable>,
    current: Arc<TypeTable>,
}

impl CodecRegistry {
    /// # Errors
    /// Returns [`MigrationError::Config`] when the legacy context can reach
    /// the current context through its parents.
    pub fn new(legacy: Arc<TypeTable>, current: Arc<TypeTable>) -> Result<Self> {
        if legacy.chains_to(&current) {
            return Err(MigrationError::Config(
                "the legacy type context must not chain to the current type context".to_string(),
            ));
        }
        if legacy.is_empty() {
            return Err(MigrationError::Config("the legacy type context is empty".to_string()));
        }
        Ok(Self { legacy, current })
    }

    /// Build both contexts: legacy archives from `legacy_dir` and, when
    /// given, shared application archives from `shared_dir`.
    ///
    /// # Errors
    /// Returns [`MigrationError::Config`] for any archive loading problem.
    pub fn load(legacy_dir: &Path, shared_dir: Option<&Path>) -> Result<Self> {
        let mut shared = TypeTable::shared();
        if let Some(dir) = shared_dir {
            shared.define_archives_from_dir(dir)?;
        }
        let shared = Arc::new(shared);

        let mut legacy = TypeTable::child("legacy", Arc::clone(&shared));
        let archives = legacy.define_archives_from_dir(legacy_dir)?;
        tracing::info!(
            dir = %legacy_dir.display(),
            archives,
            types = legacy.len(),
            "legacy type context ready"
        );

        let current = current_type_table(shared)?;
        Self::new(Arc::new(legacy), Arc::new(current))
    }

    #[must_use]
    pub fn context(&self, version: FormatVersion) -> &TypeTable {
        match version {
            FormatVersion::Legacy => &self.legacy,
            FormatVersion::Current => &self.current,
        }
    }

    /// Parse a blob and resolve every class it references in the context
    /// of `version`.
    ///
    /// # Errors
    /// Returns a decode error for corrupt bytes, unknown classes or uid mismatches.
    pub fn decode(&self, version: FormatVersion, bytes: &[u8]) -> Result<StreamValue> {
        let value = stream::decode(bytes)?;
        self.context(version).check_graph(&value)?;
        Ok(value)
    }

    /// Encode a graph built from current-format types.
    ///
    /// # Errors
    /// Returns [`MigrationError::Encode`] when serialization fails.
    pub fn encode(&self, value: &StreamValue) -> Result<Vec<u8>> {
        stream::encode(value)
    }
}
