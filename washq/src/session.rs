//! Session and role service.
//!
//! Resolves the signed-in identity to a [`User`] profile and gates
//! operations by role.

use crate::error::{AuthFailure, Result, WashqError};
use crate::providers::identity::{Identity, IdentityProvider};
use crate::providers::store::{from_document, to_document, Collection, DocumentStore};
use crate::types::{Role, User};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use washq_core::environment::Clock;

/// Minimum password length accepted before contacting the identity service.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Route for signing in.
pub const LOGIN_ROUTE: &str = "/login";

/// Who is using the app right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Startup; the identity service has not answered yet.
    Pending,
    /// Nobody is signed in.
    Unauthenticated,
    /// A user is signed in.
    Authenticated(User),
}

impl SessionState {
    /// The signed-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Pending | Self::Unauthenticated => None,
        }
    }
}

/// Email/password credentials from the login form.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
    /// Role picked on the form. Never grants anything; stored roles win.
    pub requested_role: Role,
}

impl Credentials {
    /// Credentials requesting the default role.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            requested_role: Role::User,
        }
    }

    fn validate(&self) -> std::result::Result<(), AuthFailure> {
        if !self.email.contains('@') {
            return Err(AuthFailure::InvalidEmail);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthFailure::WeakPassword);
        }
        Ok(())
    }
}

/// Outcome of a route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Render the route.
    Allow,
    /// Session still resolving; show a loader.
    Wait,
    /// Send the visitor to the login page.
    RedirectToLogin,
    /// Send the user to another route.
    RedirectTo(&'static str),
}

/// Landing route for a role.
#[must_use]
pub const fn home_route(role: Role) -> &'static str {
    match role {
        Role::Admin => "/admin",
        Role::User => "/machines",
    }
}

/// Resolves identities to user profiles and tracks the session.
pub struct SessionService {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SessionState>,
}

impl SessionService {
    /// Create a service in the [`SessionState::Pending`] state.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Pending);
        Self {
            identity,
            store,
            clock,
            state,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn current_user(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::NotAuthenticated`] when nobody is signed in.
    pub fn require_user(&self) -> Result<User> {
        self.state
            .borrow()
            .user()
            .cloned()
            .ok_or(WashqError::Auth {
                reason: AuthFailure::NotAuthenticated,
            })
    }

    /// The signed-in user, who must be an admin.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::NotAuthenticated`] when nobody is signed in or
    /// [`WashqError::Forbidden`] for non-admins.
    pub fn require_admin(&self) -> Result<User> {
        let user = self.require_user()?;
        user.require_admin()?;
        Ok(user)
    }

    /// Sign in, creating the account on first use.
    ///
    /// New identities get the `user` role whatever role was requested;
    /// existing identities keep their stored role.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Auth`] with the specific reason for invalid
    /// input or rejected credentials, or [`WashqError::Persistence`] if the
    /// profile could not be read or written.
    #[tracing::instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        credentials.validate()?;

        let identity = match self
            .identity
            .sign_in(&credentials.email, &credentials.password)
            .await
        {
            Ok(identity) => identity,
            Err(AuthFailure::UserNotFound) => {
                info!("Unknown email, creating new account");
                self.identity
                    .sign_up(&credentials.email, &credentials.password)
                    .await?
            },
            Err(reason) => {
                warn!(%reason, "Sign-in rejected");
                return Err(reason.into());
            },
        };

        let user = self.resolve_profile(&identity).await?;
        if credentials.requested_role != user.role {
            warn!(
                requested = %credentials.requested_role,
                granted = %user.role,
                "Requested role ignored"
            );
        }
        info!(user_id = %user.id, role = %user.role, "Signed in");
        self.state.send_replace(SessionState::Authenticated(user.clone()));
        Ok(user)
    }

    /// Sign out.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Auth`] if the identity service fails.
    pub async fn logout(&self) -> Result<()> {
        self.identity.sign_out().await?;
        self.state.send_replace(SessionState::Unauthenticated);
        info!("Signed out");
        Ok(())
    }

    /// Resolve the startup session from the identity service.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the profile cannot be loaded;
    /// the session is then unauthenticated.
    pub async fn restore(&self) -> Result<SessionState> {
        let next = match self.identity.current() {
            None => SessionState::Unauthenticated,
            Some(identity) => match self.resolve_profile(&identity).await {
                Ok(user) => SessionState::Authenticated(user),
                Err(error) => {
                    self.state.send_replace(SessionState::Unauthenticated);
                    return Err(error);
                },
            },
        };
        self.state.send_replace(next.clone());
        Ok(next)
    }

    /// Re-read the signed-in user's profile, picking up booking changes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::NotAuthenticated`] when nobody is signed in or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn reload(&self) -> Result<User> {
        let current = self.require_user()?;
        let document = self
            .store
            .get_by_id(Collection::Users, current.id.as_str())
            .await?;
        let user = match document {
            Some(document) => from_document(document)?,
            None => current,
        };
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated(existing)
                if existing.id == user.id && *existing != user =>
            {
                *existing = user.clone();
                true
            },
            _ => false,
        });
        Ok(user)
    }

    /// Follow the identity service in the background.
    ///
    /// A sign-out reported by the service ends the session, and a switch to
    /// another identity while signed in resolves that identity's profile.
    /// Sign-ins while signed out are left to [`Self::login`] and
    /// [`Self::restore`].
    #[must_use]
    pub fn follow_identity(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut changes = self.identity.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                service.identity_changed(identity).await;
            }
        })
    }

    async fn identity_changed(&self, identity: Option<Identity>) {
        let Some(signed_in) = self.current_user().user().map(|user| user.id.clone()) else {
            return;
        };
        match identity {
            None => {
                let ended = self.state.send_if_modified(|state| {
                    let authenticated = matches!(state, SessionState::Authenticated(_));
                    if authenticated {
                        *state = SessionState::Unauthenticated;
                    }
                    authenticated
                });
                if ended {
                    info!(user_id = %signed_in, "Signed out by the identity service");
                }
            },
            Some(identity) if identity.uid != signed_in => {
                match self.resolve_profile(&identity).await {
                    Ok(user) => {
                        let switched = self.state.send_if_modified(|state| {
                            let still_current = self
                                .identity
                                .current()
                                .is_some_and(|current| current.uid == user.id);
                            let replaced = matches!(
                                state,
                                SessionState::Authenticated(existing) if existing.id == signed_in
                            );
                            if still_current && replaced {
                                *state = SessionState::Authenticated(user.clone());
                            }
                            still_current && replaced
                        });
                        if switched {
                            info!(from = %signed_in, to = %user.id, "Identity switched");
                        }
                    },
                    Err(error) => warn!(%error, "Profile of the new identity unavailable"),
                }
            },
            Some(_) => {},
        }
    }

    /// Decide whether the current session may open a route.
    ///
    /// `required` is the role the route is for; `None` admits any signed-in
    /// user.
    #[must_use]
    pub fn guard(&self, required: Option<Role>) -> RouteDecision {
        match &*self.state.borrow() {
            SessionState::Pending => RouteDecision::Wait,
            SessionState::Unauthenticated => RouteDecision::RedirectToLogin,
            SessionState::Authenticated(user) => match required {
                Some(role) if role != user.role => RouteDecision::RedirectTo(home_route(user.role)),
                _ => RouteDecision::Allow,
            },
        }
    }

    async fn resolve_profile(&self, identity: &Identity) -> Result<User> {
        let existing = self
            .store
            .get_by_id(Collection::Users, identity.uid.as_str())
            .await?;
        if let Some(document) = existing {
            return Ok(from_document(document)?);
        }

        let user = User {
            id: identity.uid.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            role: Role::User,
            active_booking: None,
            created_at: self.clock.now(),
        };
        self.store
            .put(Collection::Users, user.id.as_str(), to_document(&user)?)
            .await?;
        info!(user_id = %user.id, "User profile created");
        Ok(user)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryDocumentStore, MockIdentityProvider};
    use washq_testing::test_clock;

    fn service() -> (SessionService, MockIdentityProvider, InMemoryDocumentStore) {
        let identity = MockIdentityProvider::new();
        let store = InMemoryDocumentStore::new();
        let service = SessionService::new(
            Arc::new(identity.clone()),
            Arc::new(store.clone()),
            Arc::new(test_clock()),
        );
        (service, identity, store)
    }

    #[tokio::test]
    async fn starts_pending_and_waits() {
        let (service, _, _) = service();
        assert_eq!(service.current_user(), SessionState::Pending);
        assert_eq!(service.guard(None), RouteDecision::Wait);
    }

    #[tokio::test]
    async fn input_is_validated_before_the_identity_service() {
        let (service, _, _) = service();
        let bad_email = service.login(&Credentials::new("nobody", "secret1")).await;
        assert_eq!(bad_email, Err(WashqError::from(AuthFailure::InvalidEmail)));

        let short = service.login(&Credentials::new("a@b.c", "12345")).await;
        assert_eq!(short, Err(WashqError::from(AuthFailure::WeakPassword)));
    }

    #[tokio::test]
    async fn unknown_email_signs_up_as_user_even_when_admin_requested() {
        let (service, _, store) = service();
        let mut credentials = Credentials::new("new@example.com", "secret1");
        credentials.requested_role = Role::Admin;

        let user = service.login(&credentials).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(store.len(Collection::Users), 1);
        assert_eq!(service.guard(Some(Role::Admin)), RouteDecision::RedirectTo("/machines"));
    }

    #[tokio::test]
    async fn existing_admin_keeps_role() {
        let (service, identity, store) = service();
        let registered = identity.register("boss@example.com", "secret1");
        let admin = User {
            id: registered.uid.clone(),
            email: registered.email.clone(),
            display_name: None,
            role: Role::Admin,
            active_booking: None,
            created_at: test_clock().now(),
        };
        store
            .put(Collection::Users, admin.id.as_str(), to_document(&admin).unwrap())
            .await
            .unwrap();

        let user = service
            .login(&Credentials::new("boss@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(service.require_admin().is_ok());
        assert_eq!(service.guard(Some(Role::User)), RouteDecision::RedirectTo("/admin"));
    }

    #[tokio::test]
    async fn wrong_password_is_reported() {
        let (service, identity, _) = service();
        identity.register("ada@example.com", "secret1");
        let result = service
            .login(&Credentials::new("ada@example.com", "secret2"))
            .await;
        assert_eq!(result, Err(WashqError::from(AuthFailure::WrongPassword)));
        assert_eq!(service.current_user(), SessionState::Pending);
    }

    #[tokio::test]
    async fn logout_redirects_to_login() {
        let (service, _, _) = service();
        service
            .login(&Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(service.guard(Some(Role::User)), RouteDecision::Allow);

        service.logout().await.unwrap();
        assert_eq!(service.current_user(), SessionState::Unauthenticated);
        assert_eq!(service.guard(None), RouteDecision::RedirectToLogin);
        assert!(matches!(
            service.require_user(),
            Err(WashqError::Auth { reason: AuthFailure::NotAuthenticated })
        ));
    }

    #[tokio::test]
    async fn restore_resolves_pending_session() {
        let (service, identity, _) = service();
        let mut rx = service.subscribe();
        assert_eq!(service.restore().await.unwrap(), SessionState::Unauthenticated);

        let restored = identity.register("ada@example.com", "secret1");
        identity.restore_session(restored);
        let state = service.restore().await.unwrap();
        assert!(matches!(state, SessionState::Authenticated(_)));
        assert!(rx.has_changed().unwrap());
    }

    async fn settled(rx: &mut watch::Receiver<SessionState>, done: impl Fn(&SessionState) -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.wait_for(|s| done(s)))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn sign_out_by_the_identity_service_ends_the_session() {
        let (service, identity, _) = service();
        let service = Arc::new(service);
        service
            .login(&Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        let follower = service.follow_identity();

        identity.sign_out().await.unwrap();
        settled(&mut service.subscribe(), |s| *s == SessionState::Unauthenticated).await;
        assert_eq!(service.guard(None), RouteDecision::RedirectToLogin);
        follower.abort();
    }

    #[tokio::test]
    async fn identity_switch_resolves_the_new_profile() {
        let (service, identity, store) = service();
        let service = Arc::new(service);
        service
            .login(&Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        let follower = service.follow_identity();

        let grace = identity.register("grace@example.com", "secret1");
        identity.restore_session(grace.clone());
        settled(&mut service.subscribe(), |s| {
            s.user().is_some_and(|user| user.id == grace.uid)
        })
        .await;
        assert_eq!(service.require_user().unwrap().email, "grace@example.com");
        assert_eq!(store.len(Collection::Users), 2);
        follower.abort();
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let (service, _, _) = service();
        service
            .login(&Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(
            service.require_admin(),
            Err(WashqError::Forbidden { required: Role::Admin })
        );
    }
}
