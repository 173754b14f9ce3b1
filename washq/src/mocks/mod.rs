//! Mock provider implementations for testing.
//!
//! In-memory implementations of every provider trait, for unit and
//! integration tests and for the demo binary.

pub mod identity;
pub mod notifier;
pub mod store;

pub use identity::MockIdentityProvider;
pub use notifier::RecordingNotifier;
pub use store::{InMemoryDocumentStore, StoreOp};
