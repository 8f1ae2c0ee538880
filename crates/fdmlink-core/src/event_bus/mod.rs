//! # Event Bus Module
//!
//! Publish/subscribe channel between the engine and its observers.
//!
//! The engine publishes typed [`EngineEvent`]s for connection changes, job
//! progress, temperature updates and errors. Observers either register a
//! filtered synchronous handler or take a broadcast receiver for use in a
//! tokio task.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fdmlink_core::event_bus::{EngineEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Job]),
//!     |event| println!("{}", event.description()),
//! );
//! bus.unsubscribe(sub);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
