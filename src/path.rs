//! LWM2M node paths.
//!
//! A path addresses a node of the object tree: `/` (root), `/3` (object),
//! `/3/0` (object instance), `/3/0/1` (resource) or `/3/0/1/2` (resource
//! instance). Paths are totally ordered component-wise with a missing
//! component ordering before any present one, which keeps every subtree
//! contiguous inside an ordered map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// Id reserved by LWM2M; never valid in a path.
pub const RESERVED_ID: u16 = u16::MAX;

/// Address of a node in the LWM2M object tree.
///
/// # Examples
///
/// ```
/// use lwm2m_notify::LwM2mPath;
///
/// let resource: LwM2mPath = "/3/0/1".parse().unwrap();
/// assert!(resource.is_resource());
/// assert!(resource.starts_with(&LwM2mPath::object(3)));
/// assert_eq!(resource.to_string(), "/3/0/1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LwM2mPath {
    object_id: Option<u16>,
    object_instance_id: Option<u16>,
    resource_id: Option<u16>,
    resource_instance_id: Option<u16>,
}

impl LwM2mPath {
    /// The root path `/`.
    pub const ROOT: Self = Self {
        object_id: None,
        object_instance_id: None,
        resource_id: None,
        resource_instance_id: None,
    };

    /// Path of an object, e.g. `/3`.
    #[must_use]
    pub const fn object(object_id: u16) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::ROOT
        }
    }

    /// Path of an object instance, e.g. `/3/0`.
    #[must_use]
    pub const fn object_instance(object_id: u16, object_instance_id: u16) -> Self {
        Self {
            object_id: Some(object_id),
            object_instance_id: Some(object_instance_id),
            ..Self::ROOT
        }
    }

    /// Path of a resource, e.g. `/3/0/1`.
    #[must_use]
    pub const fn resource(object_id: u16, object_instance_id: u16, resource_id: u16) -> Self {
        Self {
            object_id: Some(object_id),
            object_instance_id: Some(object_instance_id),
            resource_id: Some(resource_id),
            resource_instance_id: None,
        }
    }

    /// Path of a resource instance, e.g. `/3/0/1/2`.
    #[must_use]
    pub const fn resource_instance(
        object_id: u16,
        object_instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
    ) -> Self {
        Self {
            object_id: Some(object_id),
            object_instance_id: Some(object_instance_id),
            resource_id: Some(resource_id),
            resource_instance_id: Some(resource_instance_id),
        }
    }

    /// Object id, if any.
    #[must_use]
    pub const fn object_id(&self) -> Option<u16> {
        self.object_id
    }

    /// Object instance id, if any.
    #[must_use]
    pub const fn object_instance_id(&self) -> Option<u16> {
        self.object_instance_id
    }

    /// Resource id, if any.
    #[must_use]
    pub const fn resource_id(&self) -> Option<u16> {
        self.resource_id
    }

    /// Resource instance id, if any.
    #[must_use]
    pub const fn resource_instance_id(&self) -> Option<u16> {
        self.resource_instance_id
    }

    /// Number of components (0 for the root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().len()
    }

    /// Whether this is the root path `/`.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.object_id.is_none()
    }

    /// Whether this is an object path such as `/3`.
    #[must_use]
    pub const fn is_object(&self) -> bool {
        self.object_id.is_some() && self.object_instance_id.is_none()
    }

    /// Whether this is an object instance path such as `/3/0`.
    #[must_use]
    pub const fn is_object_instance(&self) -> bool {
        self.object_instance_id.is_some() && self.resource_id.is_none()
    }

    /// Whether this is a resource path such as `/3/0/1`.
    #[must_use]
    pub const fn is_resource(&self) -> bool {
        self.resource_id.is_some() && self.resource_instance_id.is_none()
    }

    /// Whether this is a resource instance path such as `/3/0/1/0`.
    #[must_use]
    pub const fn is_resource_instance(&self) -> bool {
        self.resource_instance_id.is_some()
    }

    /// Returns true if `self` equals `parent` or lies below it.
    #[must_use]
    pub fn starts_with(&self, parent: &Self) -> bool {
        let own = self.components();
        let prefix = parent.components();
        own.len() >= prefix.len() && own.iter().zip(prefix.iter()).all(|(a, b)| a == b)
    }

    /// Parent path; the root is its own parent.
    #[must_use]
    pub const fn parent(&self) -> Self {
        if self.resource_instance_id.is_some() {
            Self {
                resource_instance_id: None,
                ..*self
            }
        } else if self.resource_id.is_some() {
            Self {
                resource_id: None,
                ..*self
            }
        } else if self.object_instance_id.is_some() {
            Self {
                object_instance_id: None,
                ..*self
            }
        } else {
            Self::ROOT
        }
    }

    /// Every ancestor from the object level down to `self` (inclusive).
    ///
    /// The root is never included.
    #[must_use]
    pub fn lineage(&self) -> Vec<Self> {
        let mut out = Vec::with_capacity(4);
        let mut current = *self;
        while !current.is_root() {
            out.push(current);
            current = current.parent();
        }
        out.reverse();
        out
    }

    fn components(&self) -> Vec<u16> {
        [
            self.object_id,
            self.object_instance_id,
            self.resource_id,
            self.resource_instance_id,
        ]
        .into_iter()
        .map_while(|c| c)
        .collect()
    }

    fn from_components(input: &str, ids: &[u16]) -> Result<Self, PathError> {
        let get = |i: usize| ids.get(i).copied();
        if ids.len() > 4 {
            return Err(invalid(input, "more than 4 segments"));
        }
        Ok(Self {
            object_id: get(0),
            object_instance_id: get(1),
            resource_id: get(2),
            resource_instance_id: get(3),
        })
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> PathError {
    PathError::Invalid {
        input: input.to_string(),
        reason: reason.into(),
    }
}

impl Default for LwM2mPath {
    fn default() -> Self {
        Self::ROOT
    }
}

impl FromStr for LwM2mPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty path"));
        }
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::ROOT);
        }

        let mut ids = Vec::with_capacity(4);
        for segment in body.split('/') {
            if segment.is_empty() {
                return Err(invalid(s, "empty segment"));
            }
            let id: u16 = segment
                .parse()
                .map_err(|_| invalid(s, format!("segment '{segment}' is not a 16-bit id")))?;
            if id == RESERVED_ID {
                return Err(invalid(s, format!("id {RESERVED_ID} is reserved")));
            }
            ids.push(id);
        }
        Self::from_components(s, &ids)
    }
}

impl TryFrom<String> for LwM2mPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LwM2mPath> for String {
    fn from(path: LwM2mPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for LwM2mPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let components = self.components();
        if components.is_empty() {
            return f.write_str("/");
        }
        for c in components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}
