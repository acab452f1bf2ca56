//! Hierarchical resource identifiers
//!
//! A [`ResourceId`] is a base path under the repository root plus optional
//! suffix segments:
//!
//! ```text
//! info:fedora                                  repository root
//! info:fedora/a/b                              container or binary
//! info:fedora/a/b/fcr:metadata                 binary description
//! info:fedora/a/b/fcr:acl                      ACL companion
//! info:fedora/a/b/fcr:versions                 timemap
//! info:fedora/a/b/fcr:versions/20200101120000  memento
//! info:fedora/a/b/fcr:metadata/fcr:versions    description timemap
//! info:fedora/a/b/fcr:tombstone                tombstone of a deleted resource
//! ```
//!
//! A resource and its mementos share `base` and `companion`; only the version
//! segment differs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RepositoryError, Result};
use crate::memento;

/// Prefix of every identifier, and the id of the repository root
pub const ROOT_ID: &str = "info:fedora";
/// Suffix segment addressing a binary's RDF description
pub const FCR_METADATA: &str = "fcr:metadata";
/// Suffix segment addressing an ACL companion
pub const FCR_ACL: &str = "fcr:acl";
/// Suffix segment addressing a timemap
pub const FCR_VERSIONS: &str = "fcr:versions";
/// Suffix segment addressing a tombstone
pub const FCR_TOMBSTONE: &str = "fcr:tombstone";
/// Path segment addressing transactions at the HTTP boundary
pub const FCR_TX: &str = "fcr:tx";

/// Companion resource attached to a base resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Companion {
    /// The base resource itself
    None,
    /// `fcr:metadata`
    Description,
    /// `fcr:acl`
    Acl,
}

/// Version-related trailing segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VersionSegment {
    /// Head (live) resource
    None,
    /// `fcr:versions`
    TimeMap,
    /// `fcr:versions/{label}`
    Memento(String),
    /// `fcr:tombstone`
    Tombstone,
}

/// Identifier of a resource, companion, timemap, memento or tombstone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    base: String,
    companion: Companion,
    version: VersionSegment,
}

impl ResourceId {
    /// The repository root
    pub fn root() -> Self {
        Self::from_base(ROOT_ID.to_string())
    }

    fn from_base(base: String) -> Self {
        Self {
            base,
            companion: Companion::None,
            version: VersionSegment::None,
        }
    }

    /// Parse a full identifier
    ///
    /// Accepts `info:fedora`, `info:fedora/path...` and a bare `path` (which
    /// is resolved against the root). Rejects empty segments, unknown `fcr:`
    /// segments and suffixes in the wrong order.
    pub fn parse(input: &str) -> Result<Self> {
        let rest = if input == ROOT_ID {
            ""
        } else if let Some(rest) = input.strip_prefix(ROOT_ID) {
            rest.strip_prefix('/').ok_or_else(|| {
                RepositoryError::bad_request(format!("Malformed identifier: {}", input))
            })?
        } else {
            input.trim_start_matches('/')
        };
        let rest = rest.trim_end_matches('/');

        let mut base = String::from(ROOT_ID);
        let mut companion = Companion::None;
        let mut version = VersionSegment::None;
        let mut segments = rest.split('/').filter(|_| !rest.is_empty()).peekable();

        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(RepositoryError::bad_request(format!(
                    "Empty path segment in identifier: {}",
                    input
                )));
            }
            let misplaced = || {
                RepositoryError::bad_request(format!(
                    "Misplaced {} segment in identifier: {}",
                    segment, input
                ))
            };
            match segment {
                FCR_METADATA | FCR_ACL => {
                    if companion != Companion::None || version != VersionSegment::None {
                        return Err(misplaced());
                    }
                    if base == ROOT_ID && segment == FCR_METADATA {
                        return Err(misplaced());
                    }
                    companion = if segment == FCR_METADATA {
                        Companion::Description
                    } else {
                        Companion::Acl
                    };
                }
                FCR_VERSIONS => {
                    if version != VersionSegment::None {
                        return Err(misplaced());
                    }
                    version = match segments.next() {
                        None => VersionSegment::TimeMap,
                        Some(label) => {
                            memento::validate_label(label)?;
                            VersionSegment::Memento(label.to_string())
                        }
                    };
                    if segments.peek().is_some() {
                        return Err(misplaced());
                    }
                }
                FCR_TOMBSTONE => {
                    if version != VersionSegment::None || companion != Companion::None {
                        return Err(misplaced());
                    }
                    version = VersionSegment::Tombstone;
                }
                other if other.starts_with("fcr:") => {
                    return Err(RepositoryError::bad_request(format!(
                        "Unknown segment {} in identifier: {}",
                        other, input
                    )));
                }
                plain => {
                    if companion != Companion::None || version != VersionSegment::None {
                        return Err(misplaced());
                    }
                    base.push('/');
                    base.push_str(plain);
                }
            }
        }

        Ok(Self {
            base,
            companion,
            version,
        })
    }

    /// Child of this resource's base path
    ///
    /// `path` may contain several `/`-separated segments.
    pub fn resolve(&self, path: &str) -> Result<Self> {
        if self.companion != Companion::None || self.version != VersionSegment::None {
            return Err(RepositoryError::bad_request(format!(
                "Cannot resolve a child under {}",
                self
            )));
        }
        let child = Self::parse(&format!("{}/{}", self.base, path.trim_matches('/')))?;
        if child.companion != Companion::None || child.version != VersionSegment::None {
            return Err(RepositoryError::bad_request(format!(
                "Child path {} must not contain fcr: segments",
                path
            )));
        }
        Ok(child)
    }

    /// Full identifier including suffixes, e.g. `info:fedora/a/fcr:versions`
    pub fn full_id(&self) -> String {
        self.to_string()
    }

    /// Path portion of the base, relative to the root (empty for the root)
    pub fn path(&self) -> &str {
        self.base
            .strip_prefix(ROOT_ID)
            .map(|p| p.trim_start_matches('/'))
            .unwrap_or("")
    }

    /// Whether the base is the repository root
    pub fn is_repository_root(&self) -> bool {
        self.base == ROOT_ID
    }

    /// Companion segment
    pub fn companion(&self) -> Companion {
        self.companion
    }

    /// Version segment
    pub fn version_segment(&self) -> &VersionSegment {
        &self.version
    }

    /// `fcr:metadata` id (head), regardless of version segment
    pub fn is_description(&self) -> bool {
        self.companion == Companion::Description
    }

    /// `fcr:acl` id
    pub fn is_acl(&self) -> bool {
        self.companion == Companion::Acl
    }

    /// `fcr:versions`
    pub fn is_timemap(&self) -> bool {
        self.version == VersionSegment::TimeMap
    }

    /// `fcr:versions/{label}`
    pub fn is_memento(&self) -> bool {
        matches!(self.version, VersionSegment::Memento(_))
    }

    /// `fcr:tombstone`
    pub fn is_tombstone(&self) -> bool {
        self.version == VersionSegment::Tombstone
    }

    /// Memento label, if this is a memento id
    pub fn memento_label(&self) -> Option<&str> {
        match &self.version {
            VersionSegment::Memento(label) => Some(label),
            _ => None,
        }
    }

    /// The base resource: no companion, no version segment
    pub fn base_id(&self) -> Self {
        Self::from_base(self.base.clone())
    }

    /// Strip the version segment, keeping the companion
    pub fn original(&self) -> Self {
        Self {
            base: self.base.clone(),
            companion: self.companion,
            version: VersionSegment::None,
        }
    }

    /// Description companion of the base resource
    pub fn as_description(&self) -> Self {
        Self {
            base: self.base.clone(),
            companion: Companion::Description,
            version: VersionSegment::None,
        }
    }

    /// ACL companion of the base resource
    pub fn as_acl(&self) -> Self {
        Self {
            base: self.base.clone(),
            companion: Companion::Acl,
            version: VersionSegment::None,
        }
    }

    /// Timemap of this resource (companion preserved)
    pub fn as_timemap(&self) -> Self {
        Self {
            version: VersionSegment::TimeMap,
            ..self.original()
        }
    }

    /// Memento of this resource with the given label
    pub fn as_memento(&self, label: impl Into<String>) -> Self {
        Self {
            version: VersionSegment::Memento(label.into()),
            ..self.original()
        }
    }

    /// Tombstone of the base resource
    pub fn as_tombstone(&self) -> Self {
        Self {
            version: VersionSegment::Tombstone,
            ..self.base_id()
        }
    }

    /// Containing resource of the base path, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_repository_root() {
            return None;
        }
        let idx = self.base.rfind('/')?;
        Some(Self::from_base(self.base[..idx].to_string()))
    }

    /// Ancestors of the base path, nearest first, ending with the root
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(id) = current {
            current = id.parent();
            out.push(id);
        }
        out
    }

    /// External URI under `base_uri`
    pub fn to_uri(&self, base_uri: &str) -> String {
        let mut uri = base_uri.trim_end_matches('/').to_string();
        let suffix = self.suffix_path();
        if !suffix.is_empty() {
            uri.push('/');
            uri.push_str(&suffix);
        }
        uri
    }

    /// Inverse of [`ResourceId::to_uri`]
    pub fn from_uri(base_uri: &str, uri: &str) -> Result<Self> {
        let base = base_uri.trim_end_matches('/');
        let rest = uri.strip_prefix(base).ok_or_else(|| {
            RepositoryError::bad_request(format!("{} is not under {}", uri, base_uri))
        })?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(RepositoryError::bad_request(format!(
                "{} is not under {}",
                uri, base_uri
            )));
        }
        Self::parse(rest)
    }

    fn suffix_path(&self) -> String {
        let mut segments: Vec<&str> = Vec::new();
        let path = self.path();
        if !path.is_empty() {
            segments.push(path);
        }
        match self.companion {
            Companion::None => {}
            Companion::Description => segments.push(FCR_METADATA),
            Companion::Acl => segments.push(FCR_ACL),
        }
        match &self.version {
            VersionSegment::None => {}
            VersionSegment::TimeMap => segments.push(FCR_VERSIONS),
            VersionSegment::Memento(label) => {
                segments.push(FCR_VERSIONS);
                segments.push(label);
            }
            VersionSegment::Tombstone => segments.push(FCR_TOMBSTONE),
        }
        segments.join("/")
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = self.suffix_path();
        if suffix.is_empty() {
            write!(f, "{}", ROOT_ID)
        } else {
            write!(f, "{}/{}", ROOT_ID, suffix)
        }
    }
}
