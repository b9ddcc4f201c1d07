//! Authenticated user identity.
//!
//! Lockbox does not authenticate users itself. An external provider signs
//! the user in and hands over an [`Identity`]; the session only needs the
//! stable uid to scope queries and derive the per-user salt.

use serde::{Deserialize, Serialize};

use lockbox_common::{Result, UserId};

/// A signed-in user as reported by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity from a raw uid.
    ///
    /// # Errors
    /// - `InvalidInput` if the uid is blank
    pub fn new(uid: impl Into<String>) -> Result<Self> {
        Ok(Self {
            uid: UserId::new(uid)?,
            email: None,
        })
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Source of the currently signed-in user.
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, or `None` when nobody is signed in.
    fn current_user(&self) -> Option<Identity>;
}

/// Provider with a fixed answer, used by the CLI and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<Identity>,
}

impl StaticIdentity {
    pub fn signed_in(user: Identity) -> Self {
        Self { user: Some(user) }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<Identity> {
        self.user.clone()
    }
}
