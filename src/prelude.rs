//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Bus
pub use crate::bus::{Bus, ListenerView, ScanFuture, ScanParams};
// Futures
pub use crate::deferred::{deferred, CancelableFuture, Deferred};
// Errors
pub use crate::error::{BusError, HandlerSpawnError, ScanError};
// Event typing
pub use crate::event::{EventKey, EventMap, Listenable, Topic, WILDCARD};
pub use crate::handler::{BoxError, Handler, HandlerOutcome, HandlerReturn};
// Lifecycle
pub use crate::lifecycle::{ErrorEvent, ErrorSource, Lifecycle, LifecycleEvent};
// Configuration and logging
pub use crate::logger::{Logger, TracingLogger};
pub use crate::options::{BusDefaults, BusOptions, ThresholdOverrides, Thresholds};
// Scanning
pub use crate::scanner::{Evaluator, ScanContext, Scannable, Scanner, Trigger};
pub use crate::subscription::{Subscription, SubscriptionGuard};
