//! # washQ
//!
//! Booking core for shared laundry machines.
//!
//! Users sign in, see which machines are free, book one (or join its queue),
//! start a wash and get notified when their machine is ready. Admins manage
//! the machines and read feedback.
//!
//! ## Components
//!
//! - [`registry::MachineRegistry`]: machines and their status, synced with the store
//! - [`coordinator::BookingCoordinator`]: one active booking per user, machine transitions
//! - [`notifications::NotificationWatcher`]: "your machine is ready" notifications
//! - [`session::SessionService`]: identity, roles and route guards
//! - [`feedback::FeedbackDesk`], [`qr::QrResolver`], [`timer::WashTimer`]
//! - [`app::WashqApp`]: wires everything for the signed-in user
//!
//! External systems (document store, identity service, notifier) sit behind
//! the traits in [`providers`]; in-memory versions live in [`mocks`].
//!
//! ## Example
//!
//! ```ignore
//! use washq::{app::{Providers, WashqApp}, config::Config, session::Credentials};
//!
//! let app = WashqApp::new(Config::from_env(), providers);
//! app.start().await?;
//! app.login(&Credentials::new("ada@example.com", "secret1")).await?;
//! let machine = app.resolve_qr("https://washq.app/machine/m1").await?;
//! app.book(&machine.id).await?;
//! ```

pub mod app;
pub mod bookings;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feedback;
mod locks;
pub mod metrics;
pub mod mocks;
pub mod notifications;
pub mod providers;
pub mod qr;
pub mod registry;
pub mod session;
pub mod timer;
pub mod types;

pub use error::{AuthFailure, Result, WashqError};
pub use types::{
    Booking, Feedback, FeedbackSubject, Machine, MachineId, MachineStatus, Role, User, UserId,
    CANONICAL_WASH_MINUTES,
};
