//! Mock identity service.

use crate::error::AuthFailure;
use crate::providers::identity::{Identity, IdentityProvider};
use crate::types::UserId;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    secret: String,
}

#[derive(Debug, Default)]
struct Accounts {
    by_email: HashMap<String, Account>,
    sign_up_disabled: bool,
}

/// In-memory email/password identity service.
///
/// Applies the same input checks a hosted identity service does (email
/// shape, minimum password length) so error paths can be exercised.
#[derive(Debug, Clone)]
pub struct MockIdentityProvider {
    accounts: Arc<Mutex<Accounts>>,
    current: Arc<watch::Sender<Option<Identity>>>,
}

impl MockIdentityProvider {
    /// Create a provider with no accounts and nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Arc::new(Mutex::new(Accounts::default())),
            current: Arc::new(current),
        }
    }

    /// Register an account up front and return its identity.
    pub fn register(&self, email: &str, secret: &str) -> Identity {
        let identity = Identity {
            uid: UserId::new(Uuid::new_v4().simple().to_string()),
            email: email.to_string(),
            display_name: None,
        };
        self.accounts().by_email.insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                secret: secret.to_string(),
            },
        );
        identity
    }

    /// Reject every sign-up with [`AuthFailure::OperationNotAllowed`].
    pub fn disable_sign_up(&self) {
        self.accounts().sign_up_disabled = true;
    }

    /// Mark `identity` as signed in without checking credentials, as a
    /// persisted session would on startup.
    pub fn restore_session(&self, identity: Identity) {
        self.current.send_replace(Some(identity));
    }

    fn accounts(&self) -> MutexGuard<'_, Accounts> {
        self.accounts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn check_shape(email: &str, secret: &str) -> Result<(), AuthFailure> {
    if !email.contains('@') {
        return Err(AuthFailure::InvalidEmail);
    }
    if secret.len() < 6 {
        return Err(AuthFailure::WeakPassword);
    }
    Ok(())
}

impl IdentityProvider for MockIdentityProvider {
    fn sign_in(&self, email: &str, secret: &str) -> BoxFuture<'_, Result<Identity, AuthFailure>> {
        let email = email.to_string();
        let secret = secret.to_string();
        Box::pin(async move {
            if !email.contains('@') {
                return Err(AuthFailure::InvalidEmail);
            }
            let account = self
                .accounts()
                .by_email
                .get(&email)
                .cloned()
                .ok_or(AuthFailure::UserNotFound)?;
            if account.secret != secret {
                return Err(AuthFailure::WrongPassword);
            }
            self.current.send_replace(Some(account.identity.clone()));
            Ok(account.identity)
        })
    }

    fn sign_up(&self, email: &str, secret: &str) -> BoxFuture<'_, Result<Identity, AuthFailure>> {
        let email = email.to_string();
        let secret = secret.to_string();
        Box::pin(async move {
            check_shape(&email, &secret)?;
            let identity = {
                let accounts = self.accounts();
                if accounts.sign_up_disabled {
                    return Err(AuthFailure::OperationNotAllowed);
                }
                if accounts.by_email.contains_key(&email) {
                    return Err(AuthFailure::EmailAlreadyInUse);
                }
                drop(accounts);
                self.register(&email, &secret)
            };
            self.current.send_replace(Some(identity.clone()));
            Ok(identity)
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthFailure>> {
        Box::pin(async move {
            self.current.send_replace(None);
            Ok(())
        })
    }

    fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_checks_secret() {
        let provider = MockIdentityProvider::new();
        provider.register("ada@example.com", "hunter22");

        assert_eq!(
            provider.sign_in("ada@example.com", "nope-nope").await,
            Err(AuthFailure::WrongPassword)
        );
        assert_eq!(
            provider.sign_in("bob@example.com", "hunter22").await,
            Err(AuthFailure::UserNotFound)
        );
        let identity = provider.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(provider.current(), Some(identity));
    }

    #[tokio::test]
    async fn sign_up_rejects_taken_email() {
        let provider = MockIdentityProvider::new();
        provider.register("ada@example.com", "hunter22");
        assert_eq!(
            provider.sign_up("ada@example.com", "another1").await,
            Err(AuthFailure::EmailAlreadyInUse)
        );
    }

    #[tokio::test]
    async fn sign_out_notifies_subscribers() {
        let provider = MockIdentityProvider::new();
        let mut rx = provider.subscribe();
        provider.sign_up("ada@example.com", "hunter22").await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        provider.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
