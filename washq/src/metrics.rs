//! Business metrics for washQ.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `washq.bookings.created{kind}` - Bookings committed (`claim` or `queue`)
//! - `washq.bookings.rejected{reason}` - Bookings refused, by error kind
//! - `washq.washes.started` - Washes switched to running
//! - `washq.machines.completed` - Machines completed back to available
//! - `washq.notifications.sent` - "Machine ready" notifications raised
//!
//! ## Gauges
//! - `washq.washes.starting` - Starts currently waiting out their latency

use crate::error::WashqError;
use crate::types::Admission;
use metrics::{describe_counter, describe_gauge};

/// Register metric descriptions. Call once at startup.
pub fn register_business_metrics() {
    describe_counter!(
        "washq.bookings.created",
        "Bookings committed, by kind (claim, queue)"
    );
    describe_counter!(
        "washq.bookings.rejected",
        "Bookings refused, by reason (already_booked, unavailable, not_found, persistence, ...)"
    );
    describe_counter!("washq.washes.started", "Washes switched to running");
    describe_gauge!(
        "washq.washes.starting",
        "Starts currently waiting out their latency"
    );
    describe_counter!(
        "washq.machines.completed",
        "Machines completed back to available"
    );
    describe_counter!(
        "washq.notifications.sent",
        "Machine ready notifications raised"
    );

    tracing::info!("Business metrics registered");
}

/// Record a committed booking.
pub fn record_booking_created(admission: Admission) {
    metrics::counter!("washq.bookings.created", "kind" => admission.as_str()).increment(1);
}

/// Record a refused booking.
pub fn record_booking_rejected(error: &WashqError) {
    metrics::counter!("washq.bookings.rejected", "reason" => error.kind()).increment(1);
}

/// Record a start request entering its latency window.
pub fn record_wash_starting() {
    metrics::gauge!("washq.washes.starting").increment(1.0);
}

/// Record a start request leaving its latency window.
pub fn record_wash_start_settled(started: bool) {
    metrics::gauge!("washq.washes.starting").decrement(1.0);
    if started {
        metrics::counter!("washq.washes.started").increment(1);
    }
}

/// Record a machine completed back to available.
pub fn record_machine_completed(released: usize) {
    metrics::counter!("washq.machines.completed").increment(1);
    tracing::debug!(released, "Recorded machine_completed metric");
}

/// Record a raised notification.
pub fn record_notification_sent() {
    metrics::counter!("washq.notifications.sent").increment(1);
}
