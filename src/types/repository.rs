//! Repository reference type.

use serde::{Deserialize, Serialize};

use super::ids::RepoFullName;

/// A repository as referenced by a webhook payload.
///
/// `full_name` is the natural key; `name` and `owner` are overwritten with the
/// latest values on every upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub full_name: RepoFullName,
    pub name: String,
    pub owner: String,
}

impl RepositoryRef {
    /// Builds a reference whose `name` and `owner` come from the full name.
    pub fn from_full_name(full_name: RepoFullName) -> Self {
        let name = full_name.name().to_string();
        let owner = full_name.owner().to_string();
        RepositoryRef {
            full_name,
            name,
            owner,
        }
    }
}
