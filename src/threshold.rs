//! Listener-count threshold logging.
//!
//! A bus reports every listener addition and removal to its
//! [`ThresholdLogger`], which decides whether the new count per topic deserves
//! a notice on the configured [`Logger`].
use crate::{
  logger::Logger,
  options::{LoggerSource, Thresholds},
};
use once_cell::unsync::OnceCell;
use std::{cell::RefCell, rc::Rc};

/// The notices a [`ThresholdLogger`] writes.
pub mod messages {
  use crate::options::Thresholds;

  pub fn info_threshold_reached(name: &str, threshold: usize, event: &str) -> String {
    format!("{name} has reached expected max listeners ({threshold}) for \"{event}\"")
  }

  pub fn warn_threshold_reached(name: &str, threshold: usize, event: &str) -> String {
    format!("{name} has reached warning threshold ({threshold}) of listeners for \"{event}\"")
  }

  pub fn error_threshold_reached(name: &str, threshold: usize, event: &str) -> String {
    format!("{name} has reached error threshold ({threshold}) of listeners for \"{event}\"")
  }

  pub fn error_threshold_exceeded(
    name: &str,
    threshold: usize,
    actual: usize,
    event: &str,
  ) -> String {
    format!(
      "Potential Memory Leak. {name} has {actual} listeners for \"{event}\", exceeds error threshold set to {threshold}"
    )
  }

  pub fn warn_threshold_exceeded(
    name: &str,
    threshold: usize,
    actual: usize,
    event: &str,
  ) -> String {
    format!(
      "Potential Memory Leak. {name} has {actual} listeners for \"{event}\", exceeds warning threshold set to {threshold}"
    )
  }

  pub fn info_threshold_exceeded(
    name: &str,
    threshold: usize,
    actual: usize,
    event: &str,
  ) -> String {
    format!("{name} has {actual} listeners for \"{event}\", {threshold} max listeners expected.")
  }

  pub fn threshold_exceeded_verbose(
    name: &str,
    threshold: usize,
    actual: usize,
    event: &str,
  ) -> String {
    format!(
      "Potential Memory Leak. {name} has {actual} listeners for \"{event}\", exceeds threshold set to {threshold}"
    )
  }

  pub fn pressure_reduced_below_error(
    name: &str,
    thresholds: &Thresholds,
    count: usize,
    event: &str,
  ) -> String {
    format!(
      "{name}'s listener count of {count} for \"{event}\" has crossed below error threshold ({}). Still above warning threshold ({})",
      thresholds.error, thresholds.warn
    )
  }

  pub fn pressure_reduced_below_warn(
    name: &str,
    thresholds: &Thresholds,
    count: usize,
    event: &str,
  ) -> String {
    format!(
      "{name}'s listener count of {count} for \"{event}\" has crossed below warning threshold ({}). Still above max expected ({})",
      thresholds.warn, thresholds.info
    )
  }

  pub fn pressure_reduced_below_info(name: &str, count: usize, event: &str) -> String {
    format!("{name}'s listener count of {count} for \"{event}\" is now within the expected range")
  }
}

/// Watches listener counts against [`Thresholds`].
pub struct ThresholdLogger {
  name: String,
  thresholds: Thresholds,
  verbose: bool,
  source: RefCell<Option<LoggerSource>>,
  sink: OnceCell<Rc<dyn Logger>>,
}

#[inline]
fn is_next(n: usize, threshold: usize) -> bool { threshold.checked_add(1) == Some(n) }

#[inline]
fn is_multiple(n: usize, of: usize) -> bool { of != 0 && n % of == 0 }

impl ThresholdLogger {
  pub fn new(
    name: impl Into<String>,
    thresholds: Thresholds,
    verbose: bool,
    source: LoggerSource,
  ) -> Self {
    ThresholdLogger {
      name: name.into(),
      thresholds,
      verbose,
      source: RefCell::new(Some(source)),
      sink: OnceCell::new(),
    }
  }

  /// The sink, resolved on first use.
  pub fn sink(&self) -> &Rc<dyn Logger> {
    self.sink.get_or_init(|| {
      let source = self.source.borrow_mut().take();
      match source {
        Some(source) => source.resolve(),
        None => Rc::new(crate::logger::TracingLogger),
      }
    })
  }

  #[inline]
  pub fn thresholds(&self) -> &Thresholds { &self.thresholds }

  /// Called with the listener count `n` a topic is about to reach.
  pub fn on_add_listener(&self, event: &str, n: usize) {
    if self.verbose {
      self.on_add_listener_verbose(event, n)
    } else {
      self.on_add_listener_at_intervals(event, n)
    }
  }

  fn on_add_listener_at_intervals(&self, event: &str, n: usize) {
    let Thresholds { info, warn, error } = self.thresholds;
    let name = &self.name;
    let exceeds = |threshold: usize| {
      is_next(n, threshold)
        || (n > threshold && (is_multiple(n, threshold) || is_multiple(n, info)))
    };
    if n == info {
      self.info(&messages::info_threshold_reached(name, info, event));
    } else if n == warn {
      self.info(&messages::warn_threshold_reached(name, warn, event));
    } else if n == error {
      self.info(&messages::error_threshold_reached(name, error, event));
    } else if exceeds(error) {
      self.error(&messages::error_threshold_exceeded(name, error, n, event));
    } else if exceeds(warn) {
      self.warn(&messages::warn_threshold_exceeded(name, warn, n, event));
    } else if is_next(n, info) || (n > info && is_multiple(n, info)) {
      self.info(&messages::info_threshold_exceeded(name, info, n, event));
    }
  }

  fn on_add_listener_verbose(&self, event: &str, n: usize) {
    let Thresholds { info, warn, error } = self.thresholds;
    let name = &self.name;
    if n > error {
      self.error(&messages::threshold_exceeded_verbose(name, error, n, event));
    } else if n > warn {
      self.warn(&messages::threshold_exceeded_verbose(name, warn, n, event));
    } else if n > info {
      self.info(&messages::info_threshold_exceeded(name, info, n, event));
    }
  }

  /// Called with the listener count a topic was left with after a removal.
  pub fn on_listener_removed(&self, event: &str, count: usize) {
    let t = &self.thresholds;
    let name = &self.name;
    let is_just_below = |threshold: usize| threshold.checked_sub(1) == Some(count);
    if is_just_below(t.error) {
      self.info(&messages::pressure_reduced_below_error(name, t, count, event));
    } else if is_just_below(t.warn) {
      self.info(&messages::pressure_reduced_below_warn(name, t, count, event));
    } else if is_just_below(t.info) {
      self.info(&messages::pressure_reduced_below_info(name, count, event));
    }
  }

  #[inline]
  pub fn info(&self, message: &str) { self.sink().info(message) }

  #[inline]
  pub fn warn(&self, message: &str) { self.sink().warn(message) }

  #[inline]
  pub fn error(&self, message: &str) { self.sink().error(message) }
}
