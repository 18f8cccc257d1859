//! # strongbus: a strongly-typed, in-process event bus
//!
//! Typed publish/subscribe for single-threaded programs, with lifecycle
//! hooks, bus-to-bus delegation and pooled condition scanners.
//!
//! ## Quick Start
//!
//! ```rust
//! use strongbus::prelude::*;
//!
//! strongbus::event_map! {
//!   #[derive(Debug, Clone)]
//!   pub enum Shop: ShopKey {
//!     Opened(()) => "opened",
//!     Sold(u32) => "sold",
//!   }
//! }
//!
//! let bus = Bus::<Shop>::with_options(BusOptions::new().name("Shop"));
//! let sales = bus.on(ShopKey::Sold, |event: &Shop| {
//!   if let Shop::Sold(amount) = event {
//!     println!("sold {amount}");
//!   }
//! });
//! assert!(bus.emit(Shop::Sold(3)).unwrap());
//! sales.unsubscribe();
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bus`] | Listener registry, dispatcher and lifecycle source |
//! | [`Subscription`] | Idempotent handle releasing what a registration holds |
//! | [`Scanner`] | One-shot condition evaluator over one or more buses |
//! | [`LifecycleEvent`] | Notifications a bus raises about itself |
//!
//! ## Logging
//!
//! Diagnostics go through [`tracing`]; install any subscriber to see them.
//! Listener-count warnings go through the bus's [`Logger`], which defaults
//! to [`TracingLogger`].
//!
//! [`Bus`]: bus::Bus
//! [`Subscription`]: subscription::Subscription
//! [`Scanner`]: scanner::Scanner
//! [`LifecycleEvent`]: lifecycle::LifecycleEvent
//! [`Logger`]: logger::Logger
//! [`TracingLogger`]: logger::TracingLogger
pub mod bus;
pub mod deferred;
pub mod error;
pub mod event;
pub mod handler;
pub mod lifecycle;
pub mod logger;
pub mod options;
pub mod prelude;
pub mod scanner;
pub mod subscription;
pub mod threshold;
mod timer;

pub use prelude::*;

#[cfg(all(doctest, not(target_arch = "wasm32")))]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}
