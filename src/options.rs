//! Bus configuration: per-bus [`BusOptions`] resolved against process-wide
//! [`BusDefaults`].
use crate::{
  error::BusError,
  logger::{Logger, TracingLogger},
};
use futures::task::LocalSpawn;
use once_cell::sync::OnceCell;
use std::{
  fmt::{Debug, Formatter},
  rc::Rc,
  sync::Arc,
};

/// Listener counts per topic at which the threshold logger speaks up.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Thresholds {
  pub info: usize,
  pub warn: usize,
  pub error: usize,
}

impl Default for Thresholds {
  fn default() -> Self { Thresholds { info: 100, warn: 500, error: usize::MAX } }
}

/// A partial [`Thresholds`]: unset fields keep the default.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ThresholdOverrides {
  pub info: Option<usize>,
  pub warn: Option<usize>,
  pub error: Option<usize>,
}

impl ThresholdOverrides {
  pub fn apply(&self, base: Thresholds) -> Thresholds {
    Thresholds {
      info: self.info.unwrap_or(base.info),
      warn: self.warn.unwrap_or(base.warn),
      error: self.error.unwrap_or(base.error),
    }
  }
}

static DEFAULTS: OnceCell<BusDefaults> = OnceCell::new();

/// Process-wide defaults every bus resolves its options against.
///
/// Defaults are installed at most once, before the first bus is built; a bus
/// reads them at construction and never observes them again.
///
/// ```rust
/// use strongbus::options::BusDefaults;
///
/// let installed = BusDefaults { allow_unhandled_events: false, ..Default::default() }.install();
/// assert!(installed.is_ok());
/// assert!(!BusDefaults::global().allow_unhandled_events);
/// ```
#[derive(Clone)]
pub struct BusDefaults {
  pub name: String,
  pub allow_unhandled_events: bool,
  pub thresholds: Thresholds,
  pub verbose: bool,
  pub logger: Arc<dyn Logger + Send + Sync>,
}

impl BusDefaults {
  /// Install these defaults. Fails, handing the value back, when defaults
  /// were already installed or already read.
  pub fn install(self) -> Result<(), BusDefaults> { DEFAULTS.set(self) }

  pub fn global() -> &'static BusDefaults { DEFAULTS.get_or_init(BusDefaults::default) }
}

impl Default for BusDefaults {
  fn default() -> Self {
    BusDefaults {
      name: "Anonymous".to_owned(),
      allow_unhandled_events: true,
      thresholds: Thresholds::default(),
      verbose: true,
      logger: Arc::new(TracingLogger),
    }
  }
}

impl Debug for BusDefaults {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BusDefaults")
      .field("name", &self.name)
      .field("allow_unhandled_events", &self.allow_unhandled_events)
      .field("thresholds", &self.thresholds)
      .field("verbose", &self.verbose)
      .finish_non_exhaustive()
  }
}

/// Where a bus gets its [`Logger`] from.
pub enum LoggerSource {
  Instance(Rc<dyn Logger>),
  /// Invoked lazily, the first time the bus logs.
  Provider(Box<dyn FnOnce() -> Rc<dyn Logger>>),
}

impl LoggerSource {
  pub(crate) fn resolve(self) -> Rc<dyn Logger> {
    match self {
      LoggerSource::Instance(logger) => logger,
      LoggerSource::Provider(provider) => provider(),
    }
  }
}

impl Debug for LoggerSource {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      LoggerSource::Instance(_) => f.write_str("LoggerSource::Instance"),
      LoggerSource::Provider(_) => f.write_str("LoggerSource::Provider"),
    }
  }
}

pub(crate) type UnexpectedEventHandler<M> = Rc<dyn Fn(&M) -> Result<(), BusError>>;

pub(crate) type Spawner = Rc<dyn LocalSpawn>;

/// Per-bus options. Every unset option falls back to [`BusDefaults`].
pub struct BusOptions<M> {
  name: Option<String>,
  allow_unhandled_events: Option<bool>,
  thresholds: ThresholdOverrides,
  logger: Option<LoggerSource>,
  verbose: Option<bool>,
  on_unexpected_event: Option<UnexpectedEventHandler<M>>,
  spawner: Option<Spawner>,
}

impl<M> Default for BusOptions<M> {
  fn default() -> Self {
    BusOptions {
      name: None,
      allow_unhandled_events: None,
      thresholds: ThresholdOverrides::default(),
      logger: None,
      verbose: None,
      on_unexpected_event: None,
      spawner: None,
    }
  }
}

impl<M> BusOptions<M> {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Included in threshold messages and unhandled-event errors.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// When `false`, emitting an event nobody handles runs the unexpected-event
  /// handler.
  pub fn allow_unhandled_events(mut self, allow: bool) -> Self {
    self.allow_unhandled_events = Some(allow);
    self
  }

  pub fn info_threshold(mut self, threshold: usize) -> Self {
    self.thresholds.info = Some(threshold);
    self
  }

  pub fn warn_threshold(mut self, threshold: usize) -> Self {
    self.thresholds.warn = Some(threshold);
    self
  }

  pub fn error_threshold(mut self, threshold: usize) -> Self {
    self.thresholds.error = Some(threshold);
    self
  }

  pub fn thresholds(mut self, thresholds: ThresholdOverrides) -> Self {
    self.thresholds = thresholds;
    self
  }

  pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
    self.logger = Some(LoggerSource::Instance(Rc::new(logger)));
    self
  }

  pub fn logger_provider<F, L>(mut self, provider: F) -> Self
  where
    F: FnOnce() -> L + 'static,
    L: Logger + 'static,
  {
    let provider = move || Rc::new(provider()) as Rc<dyn Logger>;
    self.logger = Some(LoggerSource::Provider(Box::new(provider)));
    self
  }

  /// Log on every listener added above a threshold, rather than at
  /// intervals.
  pub fn verbose(mut self, verbose: bool) -> Self {
    self.verbose = Some(verbose);
    self
  }

  /// Replace the default unexpected-event handler, which fails the emit with
  /// [`BusError::UnhandledEvent`].
  pub fn on_unexpected_event(
    mut self,
    handler: impl Fn(&M) -> Result<(), BusError> + 'static,
  ) -> Self {
    self.on_unexpected_event = Some(Rc::new(handler));
    self
  }

  /// Where futures returned by handlers and hooks keep running once they
  /// suspend, e.g. `LocalPool::spawner()`.
  pub fn spawner(mut self, spawner: impl LocalSpawn + 'static) -> Self {
    self.spawner = Some(Rc::new(spawner));
    self
  }

  pub(crate) fn resolve(self) -> BusConfig<M> {
    let defaults = BusDefaults::global();
    let name = self.name.unwrap_or_else(|| defaults.name.clone());
    let logger = self.logger.unwrap_or_else(|| {
      LoggerSource::Instance(Rc::new(defaults.logger.clone()))
    });
    BusConfig {
      name: format!("{} Bus", name),
      allow_unhandled_events: self
        .allow_unhandled_events
        .unwrap_or(defaults.allow_unhandled_events),
      thresholds: self.thresholds.apply(defaults.thresholds),
      verbose: self.verbose.unwrap_or(defaults.verbose),
      logger,
      on_unexpected_event: self.on_unexpected_event,
      spawner: self.spawner,
    }
  }
}

impl<M> Debug for BusOptions<M> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BusOptions")
      .field("name", &self.name)
      .field("allow_unhandled_events", &self.allow_unhandled_events)
      .field("thresholds", &self.thresholds)
      .field("logger", &self.logger)
      .field("verbose", &self.verbose)
      .field("on_unexpected_event", &self.on_unexpected_event.is_some())
      .field("spawner", &self.spawner.is_some())
      .finish()
  }
}

/// Options after resolution against the defaults.
pub(crate) struct BusConfig<M> {
  pub(crate) name: String,
  pub(crate) allow_unhandled_events: bool,
  pub(crate) thresholds: Thresholds,
  pub(crate) verbose: bool,
  pub(crate) logger: LoggerSource,
  pub(crate) on_unexpected_event: Option<UnexpectedEventHandler<M>>,
  pub(crate) spawner: Option<Spawner>,
}
