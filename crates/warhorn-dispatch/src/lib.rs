//! Delivery queues and the application-driven dispatch pump for Warhorn.
//!
//! Decoded server messages are not handed to application code on the
//! network task. They are parked in a per-kind [`DeliveryQueue`] and
//! delivered when the application calls [`Dispatcher::pump`] from its own
//! loop, so handlers can touch game state without locks.
//!
//! ```text
//! receiver task ──push──► DeliveryQueue<T> ──pump (app thread)──► handlers
//! ```
//!
//! # Integration
//!
//! The pump is designed to sit in the game's frame/tick loop:
//!
//! ```ignore
//! loop {
//!     let report = dispatcher.pump();
//!     if report.handler_failures > 0 {
//!         // already logged; optionally surface in a debug overlay
//!     }
//!     render_frame();
//! }
//! ```
//!
//! # Guarantees
//!
//! - Messages of one kind reach handlers in the order they were pushed.
//! - Handlers of one kind run in registration order.
//! - No ordering across kinds.
//! - A handler returning `Err` or panicking affects only that call.

mod dispatcher;
mod error;
mod queue;

pub use dispatcher::{Dispatcher, PumpReport, Subscription};
pub use error::{DispatchError, HandlerError, HandlerResult};
pub use queue::DeliveryQueue;

/// A decoded message with its concrete type erased.
pub type AnyMessage = Box<dyn std::any::Any + Send>;
