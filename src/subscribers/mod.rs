//! # Event subscribers for the taskherd runtime.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! used by the worker pool to deliver runtime [`Event`](crate::Event)s.
//!
//! ## Architecture
//! ```text
//! Worker / TaskSet ── publish(Event) ──► EventBus ──► SubscriberSet
//!                                                        │
//!                                              ┌─────────┼─────────┐
//!                                              ▼         ▼         ▼
//!                                          LogWriter  Metrics   Custom
//! ```
//!
//! Subscribers are attached with
//! [`PoolBuilder::with_subscribers`](crate::PoolBuilder::with_subscribers).

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
