use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// A workspace user as supplied by the directory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    /// Name users type to pick someone; answers are matched against it exactly.
    #[serde(alias = "profile__display_name")]
    pub display_name: String,
}

/// Slack's API nests the display name under `profile`; accept both shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawUser {
    Flat(SlackUser),
    Nested {
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        real_name: Option<String>,
        profile: Profile,
    },
}

#[derive(Deserialize)]
struct Profile {
    display_name: String,
}

impl From<RawUser> for SlackUser {
    fn from(raw: RawUser) -> Self {
        match raw {
            RawUser::Flat(user) => user,
            RawUser::Nested {
                id,
                name,
                real_name,
                profile,
            } => SlackUser {
                id,
                name,
                real_name,
                display_name: profile.display_name,
            },
        }
    }
}

/// Read-only user list injected into slack-user nodes before any session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserDirectory {
    users: Vec<SlackUser>,
}

impl UserDirectory {
    pub fn new(users: Vec<SlackUser>) -> Self {
        Self { users }
    }

    pub fn users(&self) -> &[SlackUser] {
        &self.users
    }

    pub fn contains_display_name(&self, display_name: &str) -> bool {
        self.users.iter().any(|u| u.display_name == display_name)
    }

    /// Display names shared by more than one user; such answers are ambiguous.
    pub fn duplicate_display_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for user in &self.users {
            let name = user.display_name.as_str();
            if !seen.insert(name) && !dupes.contains(&name) {
                dupes.push(name);
            }
        }
        dupes
    }
}

// ---------------------------------------------------------------------------
// Directory sources
// ---------------------------------------------------------------------------

/// Supplies workspace users for injection.
pub trait DirectorySource {
    fn fetch_users(&self) -> Result<UserDirectory>;
}

/// Reads a JSON array of users from disk.
pub struct JsonFileDirectory {
    path: PathBuf,
}

impl JsonFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DirectorySource for JsonFileDirectory {
    fn fetch_users(&self) -> Result<UserDirectory> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read user directory {}", self.path.display()))?;
        let users: Vec<RawUser> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse user directory {}", self.path.display()))?;
        let directory = UserDirectory::new(users.into_iter().map(SlackUser::from).collect());
        info!(
            "Loaded {} users from {}",
            directory.users().len(),
            self.path.display()
        );
        Ok(directory)
    }
}
