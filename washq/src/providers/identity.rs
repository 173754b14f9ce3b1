//! Identity service abstraction.

use crate::error::AuthFailure;
use crate::types::UserId;
use futures::future::BoxFuture;
use tokio::sync::watch;

/// An authenticated identity as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable identity id, also the key of the user profile.
    pub uid: UserId,
    /// Sign-in email.
    pub email: String,
    /// Display name, when the service knows one.
    pub display_name: Option<String>,
}

/// Email/password identity service.
pub trait IdentityProvider: Send + Sync {
    /// Sign in an existing identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::UserNotFound`] for unknown emails,
    /// [`AuthFailure::WrongPassword`] for a bad secret, or another
    /// [`AuthFailure`] reported by the service.
    fn sign_in(&self, email: &str, secret: &str) -> BoxFuture<'_, Result<Identity, AuthFailure>>;

    /// Register a new identity and sign it in.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::EmailAlreadyInUse`] if the email is taken, or
    /// another [`AuthFailure`] reported by the service.
    fn sign_up(&self, email: &str, secret: &str) -> BoxFuture<'_, Result<Identity, AuthFailure>>;

    /// Sign out the current identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure`] if the service fails.
    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthFailure>>;

    /// The currently signed-in identity.
    fn current(&self) -> Option<Identity>;

    /// Identity changes, starting with the current value.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}
