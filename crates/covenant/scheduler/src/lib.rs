//! Notification scheduling - idempotent reminder sweeps and edge-triggered
//! penalty risk alerts.
//!
//! The sweep itself is a pure planning function over the incomplete
//! assignments; the scheduler wraps it with atomic idempotency-key claims
//! so that retried or concurrently running sweeps never double-send.

#![deny(unsafe_code)]

mod sink;
mod sweep;

pub use sink::{DeliveryError, NotificationSink};
pub use sweep::{idempotency_key, plan_reminders, NotificationScheduler, SweepReport};
