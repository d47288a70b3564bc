use std::collections::HashMap;

use crate::config::UserEntry;

/// Lookup side of the auth boundary. The static map below serves
/// deployments with a handful of dashboard users; an external directory
/// plugs in behind the same trait.
pub trait IdentityProvider: Send + Sync {
    /// Returns the stored password hash for `username`, if the user exists.
    fn lookup(&self, username: &str) -> Option<String>;
}

/// Identity map seeded from `[[auth.users]]` in the configuration.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        Self {
            users: entries
                .iter()
                .map(|e| (e.username.clone(), e.password_hash.clone()))
                .collect(),
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn lookup(&self, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }
}

/// Hashes a password with bcrypt (cost 12).
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// Verifies a password against a bcrypt hash. A malformed hash counts as
/// a failed verification, not an error surfaced to the client.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
