//! Hierarchical keys.

use crate::error::{StoreError, StoreResult};
use std::fmt;

/// Separator between path elements in an encoded key.
const PATH_SEPARATOR: char = '/';

/// Separator between kind and name within a path element.
const KIND_SEPARATOR: char = ':';

/// A hierarchical key: an ordered path of `(kind, name)` elements.
///
/// The first element is the **key-group root**. A root key and all its
/// descendants form one key-group, which is the unit the backing store can
/// commit atomically.
///
/// Kinds beginning with `_` are reserved for system records (locks and
/// write-ahead log records) and are filtered from application reads.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    path: Vec<(String, String)>,
}

impl Key {
    /// Creates a root key from a kind and a name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if either component is empty or
    /// contains a reserved separator character (`/` or `:`).
    pub fn root(kind: impl Into<String>, name: impl Into<String>) -> StoreResult<Self> {
        let element = validated(kind.into(), name.into())?;
        Ok(Self {
            path: vec![element],
        })
    }

    /// Creates a child key under this key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if either component is empty or
    /// contains a reserved separator character.
    pub fn child(&self, kind: impl Into<String>, name: impl Into<String>) -> StoreResult<Self> {
        let element = validated(kind.into(), name.into())?;
        let mut path = self.path.clone();
        path.push(element);
        Ok(Self { path })
    }

    /// Returns the key-group root of this key.
    #[must_use]
    pub fn group(&self) -> Self {
        Self {
            path: vec![self.path[0].clone()],
        }
    }

    /// Returns `true` if this key is a key-group root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.len() == 1
    }

    /// Returns the kind of the last path element.
    #[must_use]
    pub fn kind(&self) -> &str {
        let (kind, _) = self.path.last().map(|(k, n)| (k.as_str(), n.as_str())).unwrap_or(("", ""));
        kind
    }

    /// Returns the name of the last path element.
    #[must_use]
    pub fn name(&self) -> &str {
        let (_, name) = self.path.last().map(|(k, n)| (k.as_str(), n.as_str())).unwrap_or(("", ""));
        name
    }

    /// Returns `true` if the last path element has a reserved system kind.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind().starts_with('_')
    }

    /// Returns `true` if `other` is this key or one of its descendants.
    #[must_use]
    pub fn contains(&self, other: &Key) -> bool {
        other.path.len() >= self.path.len() && other.path[..self.path.len()] == self.path[..]
    }

    /// Returns the number of path elements.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Encodes the key as a stable path string.
    ///
    /// The encoding is `kind:name` elements joined by `/`. It is total for
    /// valid keys and ordered consistently with the key's `Ord`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, (kind, name)) in self.path.iter().enumerate() {
            if i > 0 {
                out.push(PATH_SEPARATOR);
            }
            out.push_str(kind);
            out.push(KIND_SEPARATOR);
            out.push_str(name);
        }
        out
    }

    /// Parses a key from its encoded path string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the string is not a valid
    /// encoding produced by [`Key::encode`].
    pub fn parse(encoded: &str) -> StoreResult<Self> {
        if encoded.is_empty() {
            return Err(StoreError::invalid_key("encoded key is empty"));
        }

        let mut path = Vec::new();
        for element in encoded.split(PATH_SEPARATOR) {
            let Some((kind, name)) = element.split_once(KIND_SEPARATOR) else {
                return Err(StoreError::invalid_key(format!(
                    "path element [{element}] has no kind separator"
                )));
            };
            path.push(validated(kind.to_owned(), name.to_owned())?);
        }

        Ok(Self { path })
    }
}

fn validated(kind: String, name: String) -> StoreResult<(String, String)> {
    for (label, component) in [("kind", &kind), ("name", &name)] {
        if component.is_empty() {
            return Err(StoreError::invalid_key(format!("{label} is empty")));
        }
        if component.contains(PATH_SEPARATOR) || component.contains(KIND_SEPARATOR) {
            return Err(StoreError::invalid_key(format!(
                "{label} [{component}] contains a reserved separator"
            )));
        }
    }
    Ok((kind, name))
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.encode())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
