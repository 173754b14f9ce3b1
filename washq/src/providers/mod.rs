//! External collaborators.
//!
//! The booking core never talks to a database, an identity service or a
//! push channel directly. Each of them sits behind a trait defined here and
//! is injected as `Arc<dyn Trait>`:
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ DocumentStore    │    │ IdentityProvider │    │ Notifier         │
//! │ machines         │    │ sign_in/sign_up  │    │ notify()         │
//! │ bookings         │    │ sign_out         │    │                  │
//! │ users, feedback  │    │ current/subscribe│    │                  │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//! ```
//!
//! Traits return boxed futures so they stay object safe. In-memory
//! implementations for tests live in [`crate::mocks`].

pub mod identity;
pub mod notifier;
pub mod store;

pub use identity::{Identity, IdentityProvider};
pub use notifier::{BroadcastNotifier, LogNotifier, Notification, Notifier};
pub use store::{Collection, Document, DocumentStore, StoreError, StoredDocument};
