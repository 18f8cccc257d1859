//! Log sinks for threshold notices and failing error hooks.
use std::{rc::Rc, sync::Arc};

/// A leveled message sink.
pub trait Logger {
  fn info(&self, message: &str);
  fn warn(&self, message: &str);
  fn error(&self, message: &str);
}

/// The default sink, writing through `tracing` under the `strongbus` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
  fn info(&self, message: &str) { tracing::info!(target: "strongbus", "{}", message) }

  fn warn(&self, message: &str) { tracing::warn!(target: "strongbus", "{}", message) }

  fn error(&self, message: &str) { tracing::error!(target: "strongbus", "{}", message) }
}

impl<L: Logger + ?Sized> Logger for Rc<L> {
  #[inline]
  fn info(&self, message: &str) { (**self).info(message) }
  #[inline]
  fn warn(&self, message: &str) { (**self).warn(message) }
  #[inline]
  fn error(&self, message: &str) { (**self).error(message) }
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
  #[inline]
  fn info(&self, message: &str) { (**self).info(message) }
  #[inline]
  fn warn(&self, message: &str) { (**self).warn(message) }
  #[inline]
  fn error(&self, message: &str) { (**self).error(message) }
}
