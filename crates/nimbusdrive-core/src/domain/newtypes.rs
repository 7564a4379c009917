//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for the values the engine
//! passes between components. Each newtype ensures data validity at
//! construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Path types
// ============================================================================

/// A validated path relative to the sync root
///
/// ItemPath is the canonical key for everything the engine tracks: state
/// records, local walk entries, and remote listing entries all use it.
/// It ensures the path is:
/// - Relative (no leading separator) and non-empty
/// - Normalized: forward-slash separated, no `.` or `..` components,
///   no empty components
/// - Not hidden: no component starts with a dot (hidden entries are
///   excluded from sync at the source)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemPath(String);

impl ItemPath {
    /// Create a new ItemPath, validating and normalizing it
    ///
    /// Backslashes are rejected rather than translated; callers on
    /// non-Unix platforms must convert separators before constructing.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is empty, absolute,
    /// contains traversal or hidden components, or uses backslashes
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();

        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative: {path}"
            )));
        }
        if path.contains('\\') {
            return Err(DomainError::InvalidPath(format!(
                "Path must use forward slashes: {path}"
            )));
        }

        for component in path.split('/') {
            if component.is_empty() {
                return Err(DomainError::InvalidPath(format!(
                    "Path contains empty component: {path}"
                )));
            }
            if component == "." || component == ".." {
                return Err(DomainError::InvalidPath(format!(
                    "Path contains traversal component: {path}"
                )));
            }
            if component.starts_with('.') {
                return Err(DomainError::InvalidPath(format!(
                    "Path contains hidden component: {path}"
                )));
            }
        }

        Ok(Self(path))
    }

    /// Build an ItemPath from an absolute local path and the sync root it
    /// lives under
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not under the root,
    /// is not valid UTF-8, or fails component validation
    pub fn from_local(path: &Path, root: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not within sync root {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut joined = String::new();
        for component in relative.components() {
            let part = component.as_os_str().to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("Path is not valid UTF-8: {}", path.display()))
            })?;
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(part);
        }

        Self::new(joined)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path against a local sync root
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut p = root.to_path_buf();
        for component in self.0.split('/') {
            p.push(component);
        }
        p
    }

    /// Get the parent path, or None for top-level entries
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Get the final path component
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Join a single child component
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the component is invalid
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.contains('/') {
            return Err(DomainError::InvalidPath(format!(
                "Component may not contain separators: {component}"
            )));
        }
        Self::new(format!("{}/{component}", self.0))
    }

    /// The sibling path that holds a conflict artifact for this item
    #[must_use]
    pub fn conflict_sibling(&self) -> Self {
        Self(format!("{}.conflict", self.0))
    }

    /// Returns true if `other` is strictly below this path
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len() + 1
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Number of components in the path (at least 1)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }
}

impl Display for ItemPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ItemPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ItemPath> for String {
    fn from(path: ItemPath) -> Self {
        path.0
    }
}

// ============================================================================
// Remote identifier
// ============================================================================

/// Opaque remote item identifier assigned by the content store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRemoteId` if the ID is empty or
    /// contains control characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains control characters: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}
