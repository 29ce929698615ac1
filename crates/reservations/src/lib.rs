//! Inventory reservation store.
//!
//! A reservation is a time-boxed hold against inventory taken by a checkout
//! saga. Holds are released by the saga's compensation or expired by the
//! [`ReservationSweeper`] once their TTL runs out; both transitions emit an
//! `inventory.release.response` event on the service's bus.

pub mod clock;
pub mod error;
pub mod record;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ReservationError, Result};
pub use record::{ReleaseOutcome, ReservationItem, ReservationRecord, ReservationStatus, SweepReport};
pub use store::{DEFAULT_RETENTION, DEFAULT_TTL, ReservationConfig, ReservationStore};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, ReservationSweeper};
