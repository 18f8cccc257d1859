//! Lifecycle notifications a bus raises about itself.
use crate::event::{EventKey, Topic};
use std::{
  error::Error,
  fmt::{Display, Formatter},
  rc::Rc,
};

/// The kinds of lifecycle event a bus raises.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Lifecycle {
  WillActivate,
  Active,
  WillIdle,
  Idle,
  WillAddListener,
  DidAddListener,
  WillRemoveListener,
  DidRemoveListener,
  WillDestroy,
  Error,
}

impl Lifecycle {
  pub const ALL: [Lifecycle; 10] = [
    Lifecycle::WillActivate,
    Lifecycle::Active,
    Lifecycle::WillIdle,
    Lifecycle::Idle,
    Lifecycle::WillAddListener,
    Lifecycle::DidAddListener,
    Lifecycle::WillRemoveListener,
    Lifecycle::DidRemoveListener,
    Lifecycle::WillDestroy,
    Lifecycle::Error,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Lifecycle::WillActivate => "willActivate",
      Lifecycle::Active => "active",
      Lifecycle::WillIdle => "willIdle",
      Lifecycle::Idle => "idle",
      Lifecycle::WillAddListener => "willAddListener",
      Lifecycle::DidAddListener => "didAddListener",
      Lifecycle::WillRemoveListener => "willRemoveListener",
      Lifecycle::DidRemoveListener => "didRemoveListener",
      Lifecycle::WillDestroy => "willDestroy",
      Lifecycle::Error => "error",
    }
  }
}

impl Display for Lifecycle {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// What raised an error that a handler or hook returned.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErrorSource<K> {
  /// A handler subscribed to this topic failed.
  Event(Topic<K>),
  /// A hook for this lifecycle kind failed.
  Lifecycle(Lifecycle),
}

impl<K: EventKey> Display for ErrorSource<K> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      ErrorSource::Event(topic) => f.write_str(topic.name()),
      ErrorSource::Lifecycle(kind) => f.write_str(kind.name()),
    }
  }
}

/// Payload of [`Lifecycle::Error`].
#[derive(Clone, Debug)]
pub struct ErrorEvent<K> {
  pub error: Rc<dyn Error>,
  pub source: ErrorSource<K>,
}

/// A lifecycle notification with its payload.
#[derive(Clone, Debug)]
pub enum LifecycleEvent<K> {
  WillActivate,
  Active,
  WillIdle,
  Idle,
  WillAddListener(Topic<K>),
  DidAddListener(Topic<K>),
  WillRemoveListener(Topic<K>),
  DidRemoveListener(Topic<K>),
  WillDestroy,
  Error(ErrorEvent<K>),
}

impl<K: EventKey> LifecycleEvent<K> {
  pub fn kind(&self) -> Lifecycle {
    match self {
      LifecycleEvent::WillActivate => Lifecycle::WillActivate,
      LifecycleEvent::Active => Lifecycle::Active,
      LifecycleEvent::WillIdle => Lifecycle::WillIdle,
      LifecycleEvent::Idle => Lifecycle::Idle,
      LifecycleEvent::WillAddListener(_) => Lifecycle::WillAddListener,
      LifecycleEvent::DidAddListener(_) => Lifecycle::DidAddListener,
      LifecycleEvent::WillRemoveListener(_) => Lifecycle::WillRemoveListener,
      LifecycleEvent::DidRemoveListener(_) => Lifecycle::DidRemoveListener,
      LifecycleEvent::WillDestroy => Lifecycle::WillDestroy,
      LifecycleEvent::Error(_) => Lifecycle::Error,
    }
  }

  /// The listener topic carried by the four listener notifications.
  pub fn topic(&self) -> Option<Topic<K>> {
    match self {
      LifecycleEvent::WillAddListener(topic)
      | LifecycleEvent::DidAddListener(topic)
      | LifecycleEvent::WillRemoveListener(topic)
      | LifecycleEvent::DidRemoveListener(topic) => Some(*topic),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  crate::event_map! {
    #[derive(Debug)]
    enum Ev: EvKey {
      Ping(()) => "ping",
    }
  }

  #[test]
  fn kinds_and_topics() {
    let added = LifecycleEvent::DidAddListener(Topic::Event(EvKey::Ping));
    assert_eq!(added.kind(), Lifecycle::DidAddListener);
    assert_eq!(added.topic(), Some(Topic::Event(EvKey::Ping)));
    assert_eq!(LifecycleEvent::<EvKey>::Idle.topic(), None);
    assert_eq!(Lifecycle::WillAddListener.to_string(), "willAddListener");
  }

  #[test]
  fn error_source_display() {
    let source = ErrorSource::Event(Topic::Event(EvKey::Ping));
    assert_eq!(source.to_string(), "ping");
    assert_eq!(ErrorSource::<EvKey>::Lifecycle(Lifecycle::Idle).to_string(), "idle");
  }
}
