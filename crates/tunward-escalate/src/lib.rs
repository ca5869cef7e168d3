//! tunward-escalate — deciding when and how hard to intervene.
//!
//! The [`EscalationTracker`] is a pure state machine: verdicts go in,
//! tick actions come out, and no wall clock or filesystem is consulted.
//! The [`Remediator`] turns a chosen tier into commands against the VPN
//! client and service supervisor; it never verifies connectivity itself,
//! leaving that to the next scheduler tick. The [`Watchdog`] fires a
//! side-channel repair when the tunnel has been down for too long
//! regardless of where tier progression stands.

pub mod remediator;
pub mod tracker;
pub mod watchdog;

pub use remediator::Remediator;
pub use tracker::{EscalationTracker, TickAction};
pub use watchdog::Watchdog;
