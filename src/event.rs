//! Event typing: keys, event maps, topics and listenables.
//!
//! A bus is parameterized by an *event map*: an enum whose variants are the
//! events the bus carries, each variant holding its payload. The payload-free
//! discriminant of that enum is the event's *key*; keys are what listeners
//! subscribe to.
//!
//! ```rust
//! use strongbus::prelude::*;
//!
//! strongbus::event_map! {
//!   #[derive(Debug, Clone)]
//!   pub enum AppEvent: AppEventKey {
//!     Started(()) => "started",
//!     Progress(u32) => "progress",
//!   }
//! }
//!
//! let event = AppEvent::Progress(42);
//! assert_eq!(event.key(), AppEventKey::Progress);
//! assert_eq!(event.key().name(), "progress");
//! ```
use std::{
  collections::HashSet,
  fmt::{Debug, Display, Formatter},
  hash::Hash,
};

/// The reserved pseudo-event name meaning "any event".
pub const WILDCARD: &str = "*";

/// The payload-free identity of an event.
pub trait EventKey: Copy + Eq + Hash + Debug + 'static {
  /// The event's name, used in diagnostics and lifecycle payloads.
  fn name(&self) -> &'static str;
}

/// A compile-time mapping from event name to payload type, expressed as an
/// enum of events.
pub trait EventMap: Debug + 'static {
  type Key: EventKey;

  /// The key of this event.
  fn key(&self) -> Self::Key;

  /// The payload, for diagnostics.
  fn payload(&self) -> &dyn Debug;

  /// Shorthand for `self.key().name()`.
  #[inline]
  fn name(&self) -> &'static str { self.key().name() }
}

/// A registry slot: a concrete event, or the wildcard.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Topic<K> {
  Event(K),
  Wildcard,
}

impl<K: EventKey> Topic<K> {
  pub fn name(&self) -> &'static str {
    match self {
      Topic::Event(key) => key.name(),
      Topic::Wildcard => WILDCARD,
    }
  }

  /// The concrete key, if this is not the wildcard.
  pub fn key(&self) -> Option<K> {
    match self {
      Topic::Event(key) => Some(*key),
      Topic::Wildcard => None,
    }
  }
}

impl<K> From<K> for Topic<K> {
  #[inline]
  fn from(key: K) -> Self { Topic::Event(key) }
}

impl<K: EventKey> Display for Topic<K> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// What a subscription listens to.
///
/// Anything that converts into a `Listenable` is accepted where a bus asks
/// for one: a single key, a `Vec` or array of keys, a [`Topic`], or
/// [`Listenable::Wildcard`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Listenable<K> {
  Event(K),
  Events(Vec<K>),
  Wildcard,
}

impl<K: EventKey> Listenable<K> {
  /// The distinct topics this listenable covers, in first-seen order.
  pub fn topics(&self) -> Vec<Topic<K>> {
    match self {
      Listenable::Event(key) => vec![Topic::Event(*key)],
      Listenable::Events(keys) => {
        let mut seen = HashSet::with_capacity(keys.len());
        keys
          .iter()
          .filter(|key| seen.insert(**key))
          .map(|key| Topic::Event(*key))
          .collect()
      }
      Listenable::Wildcard => vec![Topic::Wildcard],
    }
  }

  /// The set of concrete events, or `None` for the wildcard.
  pub fn event_set(&self) -> Option<HashSet<K>> {
    match self {
      Listenable::Event(key) => Some(HashSet::from([*key])),
      Listenable::Events(keys) => Some(keys.iter().copied().collect()),
      Listenable::Wildcard => None,
    }
  }

  #[inline]
  pub fn is_wildcard(&self) -> bool { matches!(self, Listenable::Wildcard) }
}

impl<K> From<K> for Listenable<K> {
  #[inline]
  fn from(key: K) -> Self { Listenable::Event(key) }
}

impl<K> From<Vec<K>> for Listenable<K> {
  #[inline]
  fn from(keys: Vec<K>) -> Self { Listenable::Events(keys) }
}

impl<K, const N: usize> From<[K; N]> for Listenable<K> {
  #[inline]
  fn from(keys: [K; N]) -> Self { Listenable::Events(Vec::from(keys)) }
}

impl<K> From<Topic<K>> for Listenable<K> {
  fn from(topic: Topic<K>) -> Self {
    match topic {
      Topic::Event(key) => Listenable::Event(key),
      Topic::Wildcard => Listenable::Wildcard,
    }
  }
}

/// Declares an event map: the event enum, its key enum, and the
/// [`EventMap`]/[`EventKey`] impls tying them together.
///
/// Every variant carries exactly one payload; use `()` for events without
/// one.
#[macro_export]
macro_rules! event_map {
  (
    $(#[$meta:meta])*
    $vis:vis enum $name:ident : $key:ident {
      $( $(#[$vmeta:meta])* $variant:ident($payload:ty) => $event:literal ),+ $(,)?
    }
  ) => {
    $(#[$meta])*
    $vis enum $name {
      $( $(#[$vmeta])* $variant($payload) ),+
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    $vis enum $key {
      $( $variant ),+
    }

    impl $crate::event::EventKey for $key {
      fn name(&self) -> &'static str {
        match self {
          $( $key::$variant => $event ),+
        }
      }
    }

    impl $crate::event::EventMap for $name {
      type Key = $key;

      fn key(&self) -> $key {
        match self {
          $( $name::$variant(_) => $key::$variant ),+
        }
      }

      fn payload(&self) -> &dyn ::std::fmt::Debug {
        match self {
          $( $name::$variant(payload) => payload ),+
        }
      }
    }
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  crate::event_map! {
    #[derive(Debug, Clone, PartialEq)]
    enum Sample: SampleKey {
      Foo(String) => "foo",
      Bar(bool) => "bar",
      Star(()) => "*",
    }
  }

  #[test]
  fn keys_and_names() {
    let foo = Sample::Foo("x".into());
    assert_eq!(foo.key(), SampleKey::Foo);
    assert_eq!(foo.name(), "foo");
    assert_eq!(Sample::Bar(true).key().name(), "bar");
    assert_eq!(Sample::Star(()).name(), WILDCARD);
    assert_eq!(format!("{:?}", Sample::Bar(true).payload()), "true");
  }

  #[test]
  fn listenable_conversions() {
    assert_eq!(Listenable::from(SampleKey::Foo), Listenable::Event(SampleKey::Foo));
    assert_eq!(
      Listenable::from([SampleKey::Foo, SampleKey::Bar]),
      Listenable::Events(vec![SampleKey::Foo, SampleKey::Bar])
    );
    assert_eq!(Listenable::<SampleKey>::from(Topic::Wildcard), Listenable::Wildcard);
  }

  #[test]
  fn topics_are_deduplicated_in_order() {
    let listenable = Listenable::from(vec![SampleKey::Bar, SampleKey::Foo, SampleKey::Bar]);
    assert_eq!(
      listenable.topics(),
      vec![Topic::Event(SampleKey::Bar), Topic::Event(SampleKey::Foo)]
    );
    assert_eq!(Listenable::<SampleKey>::Wildcard.topics(), vec![Topic::Wildcard]);
  }

  #[test]
  fn event_sets() {
    let listenable = Listenable::<SampleKey>::from([SampleKey::Foo, SampleKey::Foo]);
    let set = listenable.event_set().unwrap();
    assert_eq!(set.len(), 1);
    assert!(Listenable::<SampleKey>::Wildcard.event_set().is_none());
    assert_eq!(Topic::Event(SampleKey::Foo).to_string(), "foo");
    assert_eq!(Topic::<SampleKey>::Wildcard.to_string(), "*");
  }
}
