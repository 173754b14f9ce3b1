//! Feedback desk.

use crate::error::{Result, WashqError};
use crate::providers::store::{from_document, to_document, Collection, DocumentStore};
use crate::types::{Feedback, FeedbackId, FeedbackSubject, User};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{info, warn};
use washq_core::environment::Clock;

/// Append-only feedback submitted by users and read by admins.
pub struct FeedbackDesk {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl FeedbackDesk {
    /// Create a desk over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Submit feedback as `author`.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Validation`] for an empty message or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn submit(
        &self,
        author: &User,
        subject: FeedbackSubject,
        message: &str,
    ) -> Result<Feedback> {
        let message = message.trim();
        if message.is_empty() {
            return Err(WashqError::Validation("feedback message must not be empty".to_string()));
        }

        let mut feedback = Feedback {
            id: FeedbackId::new(String::new()),
            user_id: author.id.clone(),
            user_email: author.email.clone(),
            subject,
            message: message.to_string(),
            created_at: self.clock.now(),
        };
        let id = self
            .store
            .create(Collection::Feedback, to_document(&feedback)?)
            .await?;
        feedback.id = FeedbackId::new(id);

        info!(feedback_id = %feedback.id, user_id = %author.id, ?subject, "Feedback submitted");
        Ok(feedback)
    }

    /// All feedback, newest first. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Forbidden`] for non-admins or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn list(&self, reader: &User) -> Result<Vec<Feedback>> {
        reader.require_admin()?;
        let documents = self.store.list_all(Collection::Feedback).await?;
        let mut entries: Vec<Feedback> = documents
            .into_iter()
            .filter_map(|document| {
                from_document(document)
                    .inspect_err(|error| warn!(%error, "Skipping malformed feedback"))
                    .ok()
            })
            .collect();
        entries.sort_by_key(|f| Reverse(f.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::InMemoryDocumentStore;
    use crate::types::{Role, UserId};
    use washq_testing::{stepping_clock, test_clock};

    fn person(id: &str, role: Role) -> User {
        User {
            id: UserId::from(id),
            email: format!("{id}@example.com"),
            display_name: None,
            role,
            active_booking: None,
            created_at: test_clock().now(),
        }
    }

    fn desk() -> FeedbackDesk {
        FeedbackDesk::new(Arc::new(InMemoryDocumentStore::new()), Arc::new(stepping_clock()))
    }

    #[tokio::test]
    async fn message_is_trimmed_and_required() {
        let desk = desk();
        let author = person("u1", Role::User);

        let blank = desk.submit(&author, FeedbackSubject::Issue, "   \n").await;
        assert!(matches!(blank, Err(WashqError::Validation(_))));

        let entry = desk
            .submit(&author, FeedbackSubject::Issue, "  Door sticks  ")
            .await
            .unwrap();
        assert_eq!(entry.message, "Door sticks");
        assert_eq!(entry.user_email, "u1@example.com");
    }

    #[tokio::test]
    async fn admins_read_newest_first() {
        let desk = desk();
        let author = person("u1", Role::User);
        for message in ["first", "second", "third"] {
            desk.submit(&author, FeedbackSubject::Suggestion, message)
                .await
                .unwrap();
        }

        let messages: Vec<_> = desk
            .list(&person("boss", Role::Admin))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.message)
            .collect();
        assert_eq!(messages, ["third", "second", "first"]);
    }

    #[tokio::test]
    async fn users_cannot_read_feedback() {
        let desk = desk();
        let result = desk.list(&person("u1", Role::User)).await;
        assert_eq!(result, Err(WashqError::Forbidden { required: Role::Admin }));
    }
}
