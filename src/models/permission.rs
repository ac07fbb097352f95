use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A capability granted to a user.
///
/// Codes are `resource:action` strings on the wire and in storage; inside the
/// crate they are a closed set so checks are plain set membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "movies:read")]
    MoviesRead,
}

impl Permission {
    /// Storage/wire code for this permission.
    pub const fn code(self) -> &'static str {
        match self {
            Permission::MoviesRead => "movies:read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a permission code is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission code: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movies:read" => Ok(Permission::MoviesRead),
            other => Err(UnknownPermission(other.to_string())),
        }
    }
}

/// Permissions held by one user, fetched once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// Build a set from stored codes. Unknown codes are skipped.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = codes
            .into_iter()
            .filter_map(|code| match code.as_ref().parse() {
                Ok(permission) => Some(permission),
                Err(e) => {
                    debug!(error = %e, "Ignoring stored permission");
                    None
                }
            })
            .collect();
        Self(set)
    }

    pub fn includes(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
