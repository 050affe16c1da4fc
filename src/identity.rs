//! Identity resolution.
//!
//! The raffle core never parses credentials. A transport hands the caller's bearer
//! credential to an [`IdentityResolver`] and gets back a stable [`Identity`].
//! [`StaticIdentityResolver`] is a fixed token table for development and tests.

use crate::error::{RaffleError, Resource};
use crate::types::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What a caller is allowed to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registers for zones and buys tickets
    Member,
    /// Manages events, zones and the raffle
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => f.write_str("member"),
            Self::Operator => f.write_str("operator"),
        }
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" | "user" => Ok(Self::Member),
            "operator" | "admin" => Ok(Self::Operator),
            other => Err(IdentityError::Malformed(format!("unknown role '{other}'"))),
        }
    }
}

/// A resolved caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identity
    pub user_id: UserId,
    /// Granted role
    pub role: Role,
}

impl Identity {
    /// Creates an identity
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Whether the caller may run operator commands
    #[must_use]
    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

/// Identity resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The credential is missing, expired or unknown
    #[error("invalid credential")]
    InvalidCredential,

    /// The credential is valid but the user no longer exists
    #[error("user {0} not found")]
    UnknownUser(UserId),

    /// A static identity table entry could not be parsed
    #[error("malformed identity entry: {0}")]
    Malformed(String),
}

impl From<IdentityError> for RaffleError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::InvalidCredential => Self::Unauthenticated(error.to_string()),
            IdentityError::UnknownUser(user_id) => Self::NotFound(Resource::User(user_id)),
            IdentityError::Malformed(message) => Self::Validation(message),
        }
    }
}

/// Maps a caller's credential to a stable identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolves a bearer credential.
    ///
    /// # Errors
    ///
    /// - `InvalidCredential`: the credential does not authenticate anyone
    /// - `UnknownUser`: the credential names a user that no longer exists
    async fn resolve(&self, credential: &str) -> Result<Identity, IdentityError>;
}

/// Fixed token table.
///
/// Built from `token:uuid:role` entries separated by commas, e.g.
/// `alice-token:6f1c...:member,ops-token:0b7e...:operator`.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, Identity>,
    removed: BTreeSet<UserId>,
}

impl StaticIdentityResolver {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Marks a user as deleted; their tokens then resolve to `UnknownUser`
    #[must_use]
    pub fn without_user(mut self, user_id: UserId) -> Self {
        self.removed.insert(user_id);
        self
    }

    /// Number of known tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Parses a comma-separated `token:uuid:role` list.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for an entry that is not `token:uuid:role`, has an empty
    /// token, an invalid UUID or an unknown role.
    pub fn parse(entries: &str) -> Result<Self, IdentityError> {
        let mut resolver = Self::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(token), Some(user), Some(role)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(IdentityError::Malformed(format!(
                    "expected token:uuid:role, got '{entry}'"
                )));
            };
            if token.is_empty() {
                return Err(IdentityError::Malformed(format!("empty token in '{entry}'")));
            }
            let user_id = user
                .parse::<UserId>()
                .map_err(|e| IdentityError::Malformed(format!("{user}: {e}")))?;
            let role = role.parse::<Role>()?;
            resolver.tokens.insert(token.to_string(), Identity::new(user_id, role));
        }
        Ok(resolver)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<Identity, IdentityError> {
        let identity = self
            .tokens
            .get(credential)
            .copied()
            .ok_or(IdentityError::InvalidCredential)?;
        if self.removed.contains(&identity.user_id) {
            return Err(IdentityError::UnknownUser(identity.user_id));
        }
        Ok(identity)
    }
}
