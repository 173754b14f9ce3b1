//! Domain types for machines, users, bookings and feedback.
//!
//! `Machine` carries its own pure transitions; the coordinator and registry
//! persist whatever these transitions produce.

use crate::error::{Result, WashqError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minutes a wash runs once started.
pub const CANONICAL_WASH_MINUTES: u32 = 30;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a laundry machine.
    MachineId
);
string_id!(
    /// Identifier issued by the identity service.
    UserId
);
string_id!(
    /// Identifier of a booking document.
    BookingId
);
string_id!(
    /// Identifier of a feedback document.
    FeedbackId
);

/// Operational status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineStatus {
    /// Free to book.
    Available,
    /// A wash is in progress.
    Running,
    /// Claimed by a booking, wash not started yet.
    Waiting,
    /// Taken out of service by an admin.
    OutOfOrder,
}

impl MachineStatus {
    /// All statuses, in display order.
    pub const ALL: [Self; 4] = [Self::Available, Self::Running, Self::Waiting, Self::OutOfOrder];

    /// Wire value, as stored in documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::OutOfOrder => "out-of-order",
        }
    }

    /// Human readable badge label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Running => "Running",
            Self::Waiting => "Waiting",
            Self::OutOfOrder => "Out of Order",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = WashqError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WashqError::Validation(format!("unknown machine status '{s}'")))
    }
}

/// How a successful booking attached the user to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The machine was available and is now claimed (`waiting`, queue of one).
    Claimed,
    /// The machine was busy; the user joined its queue.
    Queued,
}

impl Admission {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claim",
            Self::Queued => "queue",
        }
    }
}

/// A shared laundry machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Document id.
    pub id: MachineId,
    /// Display label.
    pub name: String,
    /// Current status.
    pub status: MachineStatus,
    /// Users waiting on this machine.
    #[serde(default)]
    pub queue_count: Option<u32>,
    /// Minutes left on a running wash.
    #[serde(default)]
    pub time_remaining: Option<u32>,
    /// Free-text location, e.g. "Basement, block B".
    #[serde(default)]
    pub location: Option<String>,
    /// Creation time; lists are ordered by it.
    pub created_at: DateTime<Utc>,
}

impl Machine {
    /// A freshly installed, available machine.
    #[must_use]
    pub fn new(
        id: MachineId,
        name: impl Into<String>,
        location: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status: MachineStatus::Available,
            queue_count: None,
            time_remaining: None,
            location,
            created_at,
        }
    }

    /// Number of users queued, zero when unset.
    #[must_use]
    pub fn queue_len(&self) -> u32 {
        self.queue_count.unwrap_or(0)
    }

    /// Set `status`, normalising the auxiliary fields.
    ///
    /// `running` always restarts the canonical wash and clears the queue,
    /// `waiting` keeps at least one queued user, the remaining statuses
    /// clear both fields.
    pub fn apply_status(&mut self, status: MachineStatus) {
        self.status = status;
        match status {
            MachineStatus::Running => {
                self.time_remaining = Some(CANONICAL_WASH_MINUTES);
                self.queue_count = None;
            },
            MachineStatus::Waiting => {
                self.queue_count = Some(self.queue_len().max(1));
                self.time_remaining = None;
            },
            MachineStatus::Available | MachineStatus::OutOfOrder => {
                self.queue_count = None;
                self.time_remaining = None;
            },
        }
    }

    /// Attach one more user to this machine.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Unavailable`] for an out-of-order machine.
    pub fn admit(&mut self) -> Result<Admission> {
        match self.status {
            MachineStatus::Available => {
                self.apply_status(MachineStatus::Waiting);
                self.queue_count = Some(1);
                Ok(Admission::Claimed)
            },
            MachineStatus::Waiting | MachineStatus::Running => {
                self.queue_count = Some(self.queue_len() + 1);
                Ok(Admission::Queued)
            },
            MachineStatus::OutOfOrder => Err(WashqError::Unavailable {
                machine_id: self.id.clone(),
                reason: "machine is out of order".to_string(),
            }),
        }
    }

    /// Remove one user from the queue.
    ///
    /// A `waiting` machine whose queue empties becomes `available` again.
    pub fn release_place(&mut self) {
        let remaining = self.queue_len().saturating_sub(1);
        match (self.status, remaining) {
            (MachineStatus::Waiting, 0) => self.apply_status(MachineStatus::Available),
            (MachineStatus::Waiting | MachineStatus::Running, n) => {
                self.queue_count = (n > 0).then_some(n);
            },
            (MachineStatus::Available | MachineStatus::OutOfOrder, _) => {},
        }
    }

    /// Advance a running wash by `minutes`.
    ///
    /// Returns `true` once the wash has no time left.
    pub fn advance(&mut self, minutes: u32) -> bool {
        if self.status != MachineStatus::Running {
            return false;
        }
        let left = self.time_remaining.unwrap_or(0).saturating_sub(minutes);
        self.time_remaining = Some(left);
        left == 0
    }

    /// Short status line shown on machine cards.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.status {
            MachineStatus::Available => "Free now".to_string(),
            MachineStatus::Running => format!("{} mins left", self.time_remaining.unwrap_or(0)),
            MachineStatus::Waiting => format!("{} in queue", self.queue_len()),
            MachineStatus::OutOfOrder => "Unavailable".to_string(),
        }
    }
}

/// Role of a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular resident.
    #[default]
    User,
    /// Manages machines and reads feedback.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Admin => "admin",
        })
    }
}

/// A user profile, keyed by the identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity id.
    pub id: UserId,
    /// Sign-in email.
    pub email: String,
    /// Optional display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Stored role.
    #[serde(default)]
    pub role: Role,
    /// Machine the user is booked on, if any.
    #[serde(default)]
    pub active_booking: Option<MachineId>,
    /// Profile creation time.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with [`WashqError::Forbidden`] unless the user is an admin.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Forbidden`] for non-admin users.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(WashqError::Forbidden {
                required: Role::Admin,
            })
        }
    }
}

/// A user's claim on a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Document id.
    pub id: BookingId,
    /// Booking owner.
    pub user_id: UserId,
    /// Owner email, for admin views.
    #[serde(default)]
    pub user_email: Option<String>,
    /// Booked machine.
    pub machine_id: MachineId,
    /// When the booking took effect.
    pub start_time: DateTime<Utc>,
    /// Document creation time.
    pub created_at: DateTime<Utc>,
}

/// Category picked when sending feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSubject {
    /// Something is broken.
    Issue,
    /// An idea for improvement.
    Suggestion,
    /// Anything else.
    Other,
}

/// Append-only feedback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Document id.
    pub id: FeedbackId,
    /// Author.
    pub user_id: UserId,
    /// Author email.
    pub user_email: String,
    /// Category.
    pub subject: FeedbackSubject,
    /// Trimmed message body.
    pub message: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn machine(status: MachineStatus) -> Machine {
        let mut machine = Machine::new(MachineId::from("m1"), "Washer #1", None, Utc::now());
        machine.status = status;
        machine
    }

    #[test]
    fn status_wire_format_is_kebab_case() {
        let json = serde_json::to_string(&MachineStatus::OutOfOrder).unwrap();
        assert_eq!(json, "\"out-of-order\"");
        assert_eq!("out-of-order".parse::<MachineStatus>().unwrap(), MachineStatus::OutOfOrder);
        assert!("broken".parse::<MachineStatus>().is_err());
    }

    #[test]
    fn labels_and_summaries() {
        let mut m = machine(MachineStatus::Available);
        assert_eq!(m.summary(), "Free now");
        m.apply_status(MachineStatus::Running);
        assert_eq!(m.summary(), "30 mins left");
        m.apply_status(MachineStatus::Waiting);
        assert_eq!(m.summary(), "1 in queue");
        m.apply_status(MachineStatus::OutOfOrder);
        assert_eq!(m.summary(), "Unavailable");
        assert_eq!(m.status.label(), "Out of Order");
    }

    #[test]
    fn admit_claims_available_machine() {
        let mut m = machine(MachineStatus::Available);
        assert_eq!(m.admit().unwrap(), Admission::Claimed);
        assert_eq!(m.status, MachineStatus::Waiting);
        assert_eq!(m.queue_count, Some(1));
    }

    #[test]
    fn admit_queues_on_running_machine_without_changing_status() {
        let mut m = machine(MachineStatus::Running);
        m.time_remaining = Some(15);
        assert_eq!(m.admit().unwrap(), Admission::Queued);
        assert_eq!(m.status, MachineStatus::Running);
        assert_eq!(m.queue_count, Some(1));
        assert_eq!(m.time_remaining, Some(15));
    }

    #[test]
    fn admit_rejects_out_of_order() {
        let mut m = machine(MachineStatus::OutOfOrder);
        assert!(matches!(m.admit(), Err(WashqError::Unavailable { .. })));
        assert_eq!(m.queue_count, None);
    }

    #[test]
    fn releasing_last_place_frees_waiting_machine() {
        let mut m = machine(MachineStatus::Available);
        m.admit().unwrap();
        m.admit().unwrap();
        m.release_place();
        assert_eq!(m.status, MachineStatus::Waiting);
        assert_eq!(m.queue_count, Some(1));
        m.release_place();
        assert_eq!(m.status, MachineStatus::Available);
        assert_eq!(m.queue_count, None);
    }

    #[test]
    fn advance_reports_completion() {
        let mut m = machine(MachineStatus::Available);
        assert!(!m.advance(10));
        m.apply_status(MachineStatus::Running);
        assert!(!m.advance(20));
        assert_eq!(m.time_remaining, Some(10));
        assert!(m.advance(45));
        assert_eq!(m.time_remaining, Some(0));
    }

    #[test]
    fn machine_document_uses_camel_case() {
        let mut m = machine(MachineStatus::Available);
        m.admit().unwrap();
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["queueCount"], 1);
        assert_eq!(value["status"], "waiting");
        assert!(value["timeRemaining"].is_null());
    }

    #[test]
    fn non_admin_is_forbidden() {
        let user = User {
            id: UserId::from("u1"),
            email: "u1@example.com".to_string(),
            display_name: None,
            role: Role::User,
            active_booking: None,
            created_at: Utc::now(),
        };
        assert_eq!(
            user.require_admin(),
            Err(WashqError::Forbidden { required: Role::Admin })
        );
    }

    fn any_status() -> impl Strategy<Value = MachineStatus> {
        prop::sample::select(MachineStatus::ALL.to_vec())
    }

    #[derive(Debug, Clone)]
    enum Step {
        Status(MachineStatus),
        Admit,
        Release,
        Advance(u32),
    }

    fn any_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            any_status().prop_map(Step::Status),
            Just(Step::Admit),
            Just(Step::Release),
            (0u32..40).prop_map(Step::Advance),
        ]
    }

    proptest! {
        #[test]
        fn auxiliary_fields_follow_status(steps in prop::collection::vec(any_step(), 0..40)) {
            let mut m = machine(MachineStatus::Available);
            for step in steps {
                match step {
                    Step::Status(status) => m.apply_status(status),
                    Step::Admit => { let _ = m.admit(); },
                    Step::Release => m.release_place(),
                    Step::Advance(minutes) => { m.advance(minutes); },
                }
                match m.status {
                    MachineStatus::Waiting => prop_assert!(m.queue_len() >= 1),
                    MachineStatus::Running => prop_assert!(m.time_remaining.is_some()),
                    MachineStatus::Available | MachineStatus::OutOfOrder => {
                        prop_assert_eq!(m.queue_count, None);
                        prop_assert_eq!(m.time_remaining, None);
                    },
                }
            }
        }

        #[test]
        fn running_always_restarts_canonical_wash(status in any_status(), queued in 0u32..5) {
            let mut m = machine(status);
            m.queue_count = Some(queued);
            m.apply_status(MachineStatus::Running);
            prop_assert_eq!(m.time_remaining, Some(CANONICAL_WASH_MINUTES));
            prop_assert_eq!(m.queue_count, None);
        }
    }
}
