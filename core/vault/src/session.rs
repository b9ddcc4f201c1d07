//! Session and unlock state.
//!
//! A session tracks who is signed in and whether their encryption key is
//! held. The key lives only in memory and is zeroized when the session logs
//! out or is dropped.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::canary;
use crate::config::{LockboxConfig, DEFAULT_SUBSCRIPTION_BUFFER};
use crate::identity::{Identity, IdentityProvider};
use lockbox_common::{Error, Result, SensitiveString, UserId};
use lockbox_crypto::{derive_key, EncryptionKey, KdfParams, Salt};
use lockbox_store::DocumentStore;

/// Unlock state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nobody is signed in.
    LoggedOut,
    /// Signed in, no key held. Encrypted content is unavailable.
    Locked,
    /// Signed in with a verified key.
    Unlocked,
}

/// Shared holder of the session key, read by background watches.
pub(crate) type KeySlot = Arc<RwLock<Option<Arc<EncryptionKey>>>>;

/// A user session.
///
/// Pass it explicitly to [`crate::RecordAccess`] and the watch functions.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    kdf_params: KdfParams,
    subscription_buffer: usize,
    identity: Option<Identity>,
    key: KeySlot,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a logged-out session over a store.
    pub fn new(store: Arc<dyn DocumentStore>, kdf_params: KdfParams) -> Self {
        let (state, _) = watch::channel(SessionState::LoggedOut);
        Self {
            store,
            kdf_params,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            identity: None,
            key: Arc::new(RwLock::new(None)),
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a logged-out session using the configured KDF and buffer size.
    pub fn from_config(config: &LockboxConfig, store: Arc<dyn DocumentStore>) -> Self {
        let mut session = Self::new(store, config.kdf.clone());
        session.subscription_buffer = config.subscription_buffer.max(1);
        session
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes. The receiver sees the current state first.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// The signed-in user.
    ///
    /// # Errors
    /// - `NotPermitted` if nobody is signed in
    pub fn user(&self) -> Result<&UserId> {
        self.identity
            .as_ref()
            .map(|identity| &identity.uid)
            .ok_or_else(|| Error::NotPermitted("No user is logged in".to_string()))
    }

    /// Get the document store.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub(crate) fn subscription_buffer(&self) -> usize {
        self.subscription_buffer
    }

    /// Token cancelled when this login ends.
    pub(crate) fn scope(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub(crate) fn key(&self) -> Option<Arc<EncryptionKey>> {
        self.key.read().clone()
    }

    pub(crate) fn key_slot(&self) -> KeySlot {
        self.key.clone()
    }

    /// Sign a user in without a key.
    ///
    /// # Postconditions
    /// - State is `Locked`; observers are notified so they can prompt for
    ///   the password
    ///
    /// # Errors
    /// - `NotPermitted` if a user is already logged in
    pub fn login(&mut self, identity: Identity) -> Result<()> {
        if self.state() != SessionState::LoggedOut {
            return Err(Error::NotPermitted(
                "A user is already logged in; log out first".to_string(),
            ));
        }

        info!(user = %identity.uid, "User logged in");
        self.identity = Some(identity);
        self.key = Arc::new(RwLock::new(None));
        self.cancel = CancellationToken::new();
        self.state.send_replace(SessionState::Locked);
        Ok(())
    }

    /// Sign in whoever the provider reports as the current user.
    ///
    /// # Errors
    /// - `NotPermitted` if the provider has no signed-in user, or a user is
    ///   already logged in
    pub fn login_current(&mut self, provider: &dyn IdentityProvider) -> Result<()> {
        let identity = provider
            .current_user()
            .ok_or_else(|| Error::NotPermitted("Provider has no signed-in user".to_string()))?;
        self.login(identity)
    }

    /// Derive the user's key from their password and verify it.
    ///
    /// # Preconditions
    /// - Session must be `Locked`
    ///
    /// # Postconditions
    /// - On success the key is held and state is `Unlocked`
    /// - On failure state stays `Locked` and no key is held
    ///
    /// # Errors
    /// - `NotPermitted` if logged out or already unlocked
    /// - `InvalidInput` if the password is empty
    /// - `InvalidCredential` if the password is wrong
    /// - `StoreUnavailable` if the key check cannot reach the store
    pub async fn unlock(&mut self, password: &SensitiveString) -> Result<()> {
        match self.state() {
            SessionState::Locked => {}
            SessionState::LoggedOut => {
                return Err(Error::NotPermitted("No user is logged in".to_string()))
            }
            SessionState::Unlocked => {
                return Err(Error::NotPermitted("Session is already unlocked".to_string()))
            }
        }

        let user = self.user()?.clone();
        let salt = Salt::for_user(&user);
        let params = self.kdf_params.clone();
        let password = password.clone();

        debug!(user = %user, "Deriving key");
        let key = tokio::task::spawn_blocking(move || {
            derive_key(password.expose().as_bytes(), &salt, &params)
        })
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))??;

        if let Err(e) = canary::verify_or_enroll(self.store.as_ref(), &user, &key).await {
            if matches!(e, Error::InvalidCredential) {
                warn!(user = %user, "Unlock rejected");
            }
            return Err(e);
        }

        *self.key.write() = Some(Arc::new(key));
        self.state.send_replace(SessionState::Unlocked);
        info!(user = %user, "Session unlocked");
        Ok(())
    }

    /// Sign in and unlock in one step.
    ///
    /// If unlocking fails the user stays logged in with state `Locked`.
    pub async fn login_with_password(
        &mut self,
        identity: Identity,
        password: &SensitiveString,
    ) -> Result<()> {
        self.login(identity)?;
        self.unlock(password).await
    }

    /// Sign out, dropping the key and stopping every watch.
    ///
    /// Calling this while logged out does nothing.
    pub fn logout(&mut self) {
        if self.state() == SessionState::LoggedOut {
            return;
        }

        self.clear_key();
        self.cancel.cancel();
        if let Some(identity) = self.identity.take() {
            info!(user = %identity.uid, "User logged out");
        }
        self.state.send_replace(SessionState::LoggedOut);
    }

    fn clear_key(&self) {
        // Watches drop their clones when cancelled; the last one zeroizes.
        self.key.write().take();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store.name())
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.clear_key();
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_store::MemoryStore;

    fn session() -> Session {
        Session::new(Arc::new(MemoryStore::new()), KdfParams::testing())
    }

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_login_unlock_logout() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::LoggedOut);

        session.login(alice()).unwrap();
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.key().is_none());

        session.unlock(&"correct horse".into()).await.unwrap();
        assert!(session.is_unlocked());
        assert!(session.key().is_some());

        session.logout();
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(session.key().is_none());
        assert!(session.user().is_err());
    }

    #[tokio::test]
    async fn test_wrong_password_stays_locked() {
        let mut session = session();
        session
            .login_with_password(alice(), &"right".into())
            .await
            .unwrap();
        session.logout();

        session.login(alice()).unwrap();
        let result = session.unlock(&"wrong".into()).await;
        assert!(matches!(result, Err(Error::InvalidCredential)));
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.key().is_none());

        session.unlock(&"right".into()).await.unwrap();
        assert!(session.is_unlocked());
    }

    #[tokio::test]
    async fn test_unlock_requires_locked_state() {
        let mut session = session();
        assert!(matches!(
            session.unlock(&"pw".into()).await,
            Err(Error::NotPermitted(_))
        ));

        session.login_with_password(alice(), &"pw".into()).await.unwrap();
        assert!(matches!(
            session.unlock(&"pw".into()).await,
            Err(Error::NotPermitted(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_password_rejected() {
        let mut session = session();
        session.login(alice()).unwrap();

        assert!(matches!(
            session.unlock(&"".into()).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(session.state(), SessionState::Locked);
    }

    #[test]
    fn test_login_current() {
        use crate::identity::StaticIdentity;

        let mut session = session();
        assert!(session.login_current(&StaticIdentity::signed_out()).is_err());
        session
            .login_current(&StaticIdentity::signed_in(alice()))
            .unwrap();
        assert_eq!(session.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_double_login_rejected() {
        let mut session = session();
        session.login(alice()).unwrap();
        assert!(session.login(Identity::new("bob").unwrap()).is_err());
        assert_eq!(session.user().unwrap().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_state_is_published() {
        let mut session = session();
        let mut states = session.subscribe_state();
        assert_eq!(*states.borrow(), SessionState::LoggedOut);

        session.login(alice()).unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SessionState::Locked);

        session.unlock(&"pw".into()).await.unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SessionState::Unlocked);
    }

    #[tokio::test]
    async fn test_logout_cancels_scope() {
        let mut session = session();
        session.login(alice()).unwrap();
        let scope = session.scope();

        session.logout();
        assert!(scope.is_cancelled());

        // A new login gets a fresh scope.
        session.login(alice()).unwrap();
        assert!(!session.scope().is_cancelled());
    }

    #[tokio::test]
    async fn test_same_password_same_key_across_sessions() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

        let mut first = Session::new(store.clone(), KdfParams::testing());
        first.login_with_password(alice(), &"pw".into()).await.unwrap();
        let mut second = Session::new(store, KdfParams::testing());
        second.login_with_password(alice(), &"pw".into()).await.unwrap();

        assert_eq!(*first.key().unwrap(), *second.key().unwrap());
    }
}
