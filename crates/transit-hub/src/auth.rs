//! Handshake token verification.
//!
//! Token issuance lives outside this service. The hub only needs to turn a
//! token into a [`UserId`], through whatever [`TokenVerifier`] the engine
//! supplies. A failed verification never rejects the connection; it is
//! accepted unauthenticated.

use std::collections::BTreeMap;

use transit_types::UserId;

/// Why a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token is not known to the verifier.
    #[error("token not recognised")]
    UnknownToken,

    /// A configured token maps to something that is not a user id.
    #[error("token table entry for {token_prefix}... has invalid user id {user_id:?}")]
    InvalidUserId {
        /// First characters of the offending token.
        token_prefix: String,
        /// The value that failed to parse.
        user_id: String,
    },
}

/// Resolves handshake tokens to user identities.
pub trait TokenVerifier: Send + Sync {
    /// The user `token` belongs to.
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// A fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: BTreeMap<String, UserId>,
}

impl StaticTokenVerifier {
    /// Build from `token -> user id` strings.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidUserId`] if any user id is not a UUID.
    pub fn from_table(table: &BTreeMap<String, String>) -> Result<Self, AuthError> {
        let mut tokens = BTreeMap::new();
        for (token, user_id) in table {
            let parsed = user_id.parse::<UserId>().map_err(|_parse| AuthError::InvalidUserId {
                token_prefix: token.chars().take(4).collect(),
                user_id: user_id.clone(),
            })?;
            tokens.insert(token.clone(), parsed);
        }
        Ok(Self { tokens })
    }

    /// Add one token.
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens.get(token).copied().ok_or(AuthError::UnknownToken)
    }
}
