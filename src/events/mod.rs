//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by workers, the pool and
//! task sets. It is the observability channel; it is unrelated to the
//! user-facing [`SignalBus`](crate::SignalBus).
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`EventBus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, EventKind};
