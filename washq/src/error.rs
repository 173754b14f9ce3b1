//! Error types for booking, registry and session operations.

use crate::providers::store::StoreError;
use crate::types::{MachineId, Role};
use thiserror::Error;

/// Result type alias for washQ operations.
pub type Result<T> = std::result::Result<T, WashqError>;

/// Error taxonomy for every washQ operation.
///
/// `AlreadyBooked`, `Unavailable` and `Forbidden` are expected outcomes of
/// user actions, see [`WashqError::is_expected`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WashqError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity ("machine", "user", ...)
        entity: &'static str,
        /// Requested id
        id: String,
    },

    /// The user already holds an active booking.
    #[error("User already has an active booking on machine {machine_id}")]
    AlreadyBooked {
        /// Machine the existing booking is on
        machine_id: MachineId,
    },

    /// The machine cannot take bookings or be started right now.
    #[error("Machine {machine_id} is unavailable: {reason}")]
    Unavailable {
        /// Machine that refused the operation
        machine_id: MachineId,
        /// Why it refused
        reason: String,
    },

    /// The caller lacks the required role.
    #[error("Insufficient permissions: {required} role required")]
    Forbidden {
        /// Role that was missing
        required: Role,
    },

    /// Authentication failed or is required.
    #[error("Authentication failed: {reason}")]
    Auth {
        /// Specific failure
        reason: AuthFailure,
    },

    /// The document store rejected or failed a write.
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// Input failed validation.
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl WashqError {
    /// Shorthand for a missing machine.
    #[must_use]
    pub fn machine_not_found(id: &MachineId) -> Self {
        Self::NotFound {
            entity: "machine",
            id: id.to_string(),
        }
    }

    /// Whether this is an expected business outcome rather than a fault.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::AlreadyBooked { .. } | Self::Unavailable { .. } | Self::Forbidden { .. }
        )
    }

    /// Short reason label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyBooked { .. } => "already_booked",
            Self::Unavailable { .. } => "unavailable",
            Self::Forbidden { .. } => "forbidden",
            Self::Auth { .. } => "auth",
            Self::Persistence(_) => "persistence",
            Self::Validation(_) => "validation",
        }
    }

    /// Corrective text to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => format!("This {entity} could not be found."),
            Self::AlreadyBooked { .. } => {
                "You already have an active booking. Finish or leave it before booking another machine."
                    .to_string()
            },
            Self::Unavailable { .. } => "This machine is currently unavailable.".to_string(),
            Self::Forbidden { .. } => "You do not have permission to do that.".to_string(),
            Self::Auth { reason } => reason.user_message().to_string(),
            Self::Persistence(_) => {
                "Something went wrong while saving. Please try again.".to_string()
            },
            Self::Validation(message) => message.clone(),
        }
    }
}

impl From<AuthFailure> for WashqError {
    fn from(reason: AuthFailure) -> Self {
        Self::Auth { reason }
    }
}

/// Specific authentication failure reported by the identity service or by
/// input validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Email is malformed.
    #[error("invalid email")]
    InvalidEmail,
    /// Password is too short.
    #[error("weak password")]
    WeakPassword,
    /// Password does not match.
    #[error("wrong password")]
    WrongPassword,
    /// No identity exists for the email.
    #[error("user not found")]
    UserNotFound,
    /// Sign-up for an email that is already registered.
    #[error("email already in use")]
    EmailAlreadyInUse,
    /// Email/password sign-in is disabled on the identity service.
    #[error("operation not allowed")]
    OperationNotAllowed,
    /// No signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Any other identity service failure.
    #[error("{0}")]
    Other(String),
}

impl AuthFailure {
    /// Corrective text to show the user.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::InvalidEmail => "Please enter a valid email address.",
            Self::WeakPassword => "Password must be at least 6 characters.",
            Self::WrongPassword => "Incorrect password. Please try again.",
            Self::UserNotFound => "No account exists for this email.",
            Self::EmailAlreadyInUse => {
                "Email already registered. Please sign in with your password."
            },
            Self::OperationNotAllowed => "Email/password authentication is not enabled.",
            Self::NotAuthenticated => "Please sign in first.",
            Self::Other(message) => message,
        }
    }
}
