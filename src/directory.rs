//! User directory lookup.
//!
//! The directory is an external collaborator consumed through the
//! [`UserDirectory`] trait; the server only needs an async search that
//! returns matching records. [`InMemoryUserDirectory`] is the bundled
//! implementation, loadable from a JSON fixture file.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One user row as surfaced to tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Display name.
    pub name: String,
    /// Unique handle.
    pub username: String,
    /// Object key of the stored profile image, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_object_key: Option<String>,
}

/// Async user lookup seam.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Return every user whose name or username contains `query`
    /// (case-insensitive). An empty query matches everyone.
    async fn search_users(&self, query: &str) -> Result<Vec<UserRecord>, ToolError>;
}

/// Directory backed by an in-memory list of users.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Vec<UserRecord>,
}

impl InMemoryUserDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Load users from a JSON file containing an array of records.
    pub fn from_json_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let users: Vec<UserRecord> =
            serde_json::from_slice(&raw).map_err(std::io::Error::other)?;
        Ok(Self::new(users))
    }

    /// Number of users in the directory.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn search_users(&self, query: &str) -> Result<Vec<UserRecord>, ToolError> {
        let needle = query.to_lowercase();
        Ok(self
            .users
            .iter()
            .filter(|user| {
                user.name.to_lowercase().contains(&needle)
                    || user.username.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }
}
