//! Delegation: piping one bus into another.
use super::{Bus, BusInner, Key, Origin};
use crate::{
  event::{EventMap, Topic},
  lifecycle::{Lifecycle, LifecycleEvent},
  subscription::Subscription,
};
use std::{
  collections::HashMap,
  rc::{Rc, Weak},
};

/// A piped bus, the hooks watching it, and the listener counts it
/// contributes to the piping bus.
pub(crate) struct DelegateLink<M: EventMap> {
  pub(crate) bus: Bus<M>,
  hooks: Subscription,
  counts: HashMap<Topic<Key<M>>, usize>,
}

impl<M: EventMap> Bus<M> {
  /// Forward every event emitted on this bus to `delegate`, and count the
  /// delegate's listeners as this bus's delegate listeners.
  ///
  /// Piping a bus into itself, piping the same delegate twice, or piping a
  /// bus that already reaches this one is a no-op. Returns the delegate so
  /// pipes chain: `a.pipe(&b).pipe(&c)`.
  pub fn pipe(&self, delegate: &Bus<M>) -> Bus<M> {
    if self.ptr_eq(delegate) || self.is_piped(delegate) {
      return delegate.clone();
    }
    if delegate.reaches(self) {
      tracing::warn!(
        bus = %self.name(),
        delegate = %delegate.name(),
        "refusing to pipe: the delegate already reaches this bus"
      );
      return delegate.clone();
    }

    let id = delegate.addr();
    let hooks = Subscription::merge([
      self.relay(delegate, Lifecycle::WillAddListener, |parent, _, topic| {
        parent.will_add_listener(topic)
      }),
      self.relay(delegate, Lifecycle::DidAddListener, |parent, id, topic| {
        parent.delegate_listener_added(id, topic)
      }),
      self.relay(delegate, Lifecycle::WillRemoveListener, |parent, _, topic| {
        parent.will_remove_listener(topic)
      }),
      self.relay(delegate, Lifecycle::DidRemoveListener, |parent, id, topic| {
        parent.delegate_listener_removed(id, topic)
      }),
    ]);
    self.inner.delegates.borrow_mut().push(DelegateLink {
      bus: delegate.clone(),
      hooks,
      counts: HashMap::new(),
    });

    // listeners the delegate already has count from now on
    let existing: Vec<(Topic<Key<M>>, usize)> = delegate
      .inner
      .listened_topics()
      .into_iter()
      .map(|topic| (topic, delegate.listener_count_for(topic)))
      .collect();
    for (topic, n) in existing {
      for _ in 0..n {
        self.inner.will_add_listener(topic);
        self.inner.delegate_listener_added(id, topic);
      }
    }
    tracing::debug!(bus = %self.name(), delegate = %delegate.name(), "piped");
    delegate.clone()
  }

  /// Stop forwarding to `delegate` and withdraw its listeners from this
  /// bus's counts, with removal notifications.
  pub fn unpipe(&self, delegate: &Bus<M>) {
    let link = {
      let mut delegates = self.inner.delegates.borrow_mut();
      delegates
        .iter()
        .position(|link| link.bus.ptr_eq(delegate))
        .map(|idx| delegates.remove(idx))
    };
    if let Some(link) = link {
      self.sever(link);
    }
  }

  pub(crate) fn unpipe_all(&self) {
    let links = std::mem::take(&mut *self.inner.delegates.borrow_mut());
    for link in links {
      self.sever(link);
    }
  }

  fn sever(&self, link: DelegateLink<M>) {
    link.hooks.unsubscribe();
    for (topic, n) in link.counts {
      for _ in 0..n {
        self.inner.will_remove_listener(topic);
        self.inner.did_remove_listener(topic, Origin::Delegate(link.bus.addr()));
      }
    }
    tracing::debug!(bus = %self.name(), delegate = %link.bus.name(), "unpiped");
  }

  /// Re-raise one kind of listener notification from `delegate` on this bus.
  fn relay(
    &self,
    delegate: &Bus<M>,
    kind: Lifecycle,
    f: impl Fn(&BusInner<M>, usize, Topic<Key<M>>) + 'static,
  ) -> Subscription {
    let parent: Weak<BusInner<M>> = Rc::downgrade(&self.inner);
    let id = delegate.addr();
    delegate.hook(kind, move |event: &LifecycleEvent<Key<M>>| {
      if let (Some(parent), Some(topic)) = (parent.upgrade(), event.topic()) {
        f(&parent, id, topic);
      }
    })
  }

  pub(crate) fn delegates(&self) -> Vec<Bus<M>> {
    self.inner.delegates.borrow().iter().map(|link| link.bus.clone()).collect()
  }

  fn is_piped(&self, delegate: &Bus<M>) -> bool {
    self.inner.delegates.borrow().iter().any(|link| link.bus.ptr_eq(delegate))
  }

  /// Whether events emitted here reach `target`, directly or transitively.
  fn reaches(&self, target: &Bus<M>) -> bool {
    self
      .delegates()
      .iter()
      .any(|delegate| delegate.ptr_eq(target) || delegate.reaches(target))
  }
}

impl<M: EventMap> BusInner<M> {
  fn delegate_listener_added(&self, id: usize, topic: Topic<Key<M>>) {
    let linked = {
      let mut delegates = self.delegates.borrow_mut();
      match delegates.iter_mut().find(|link| link.bus.addr() == id) {
        Some(link) => {
          *link.counts.entry(topic).or_default() += 1;
          true
        }
        None => false,
      }
    };
    if linked {
      self.did_add_listener(topic, Origin::Delegate(id));
    }
  }

  fn delegate_listener_removed(&self, id: usize, topic: Topic<Key<M>>) {
    let counted = {
      let mut delegates = self.delegates.borrow_mut();
      let count = delegates
        .iter_mut()
        .find(|link| link.bus.addr() == id)
        .and_then(|link| link.counts.get_mut(&topic));
      match count {
        Some(n) if *n > 0 => {
          *n -= 1;
          true
        }
        _ => false,
      }
    };
    if counted {
      self.did_remove_listener(topic, Origin::Delegate(id));
    }
  }

  /// Topics with at least one listener, own or delegated.
  fn listened_topics(&self) -> Vec<Topic<Key<M>>> {
    let mut topics: Vec<_> = self.listeners.borrow().keys().collect();
    for topic in self.delegate_counts.borrow().keys() {
      if !topics.contains(topic) {
        topics.push(*topic);
      }
    }
    topics
  }
}
