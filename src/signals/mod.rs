//! # Signal bus: name-based publish/subscribe between tasks.
//!
//! Signals are ephemeral: a publish runs the matching callbacks right away on
//! the caller's thread and keeps nothing. See [`SignalBus`] for delivery rules.

mod bus;
mod signal;

pub use bus::{Registration, SignalBus, SignalMessage};
pub use signal::{Argument, Signal, Trigger};
