#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collaborators injected into every geotrack engine.
//!
//! Engines never read the wall clock or deliver notifications directly.
//! They receive an `Arc<dyn Clock>` and an `Arc<dyn NotificationSink>` at
//! construction so that dwell timers, expirations, and alert hand-offs are
//! deterministic under test.

pub mod clock;
pub mod notify;

pub use clock::{Clock, ManualClock, SystemClock};
pub use notify::{
    LogSink, NotificationKind, NotificationSink, NullSink, PendingNotification, RecordingSink,
};
