use crate::handler::Handler;
use smallvec::SmallVec;
use std::{cell::Cell, collections::HashMap, hash::Hash, rc::Rc};

/// A handler registered under a key. A registration removed while a dispatch
/// is iterating a snapshot is marked dead so the dispatch skips it.
pub(crate) struct Registration<A: ?Sized> {
  pub(crate) handler: Handler<A>,
  live: Cell<bool>,
}

impl<A: ?Sized> Registration<A> {
  #[inline]
  pub(crate) fn is_live(&self) -> bool { self.live.get() }
}

pub(crate) type Snapshot<A> = SmallVec<[Rc<Registration<A>>; 4]>;

/// Key to ordered handler registrations, each handler at most once per key.
pub(crate) struct Registry<K, A: ?Sized> {
  slots: HashMap<K, SmallVec<[Rc<Registration<A>>; 2]>>,
  total: usize,
}

impl<K: Copy + Eq + Hash, A: ?Sized> Registry<K, A> {
  pub(crate) fn contains(&self, key: K, handler: &Handler<A>) -> bool {
    self
      .slots
      .get(&key)
      .map_or(false, |regs| regs.iter().any(|r| r.handler.ptr_eq(handler)))
  }

  /// Returns `false` if the handler was already registered under `key`.
  pub(crate) fn insert(&mut self, key: K, handler: Handler<A>) -> bool {
    let regs = self.slots.entry(key).or_default();
    if regs.iter().any(|r| r.handler.ptr_eq(&handler)) {
      return false;
    }
    regs.push(Rc::new(Registration { handler, live: Cell::new(true) }));
    self.total += 1;
    true
  }

  pub(crate) fn remove(&mut self, key: K, handler: &Handler<A>) -> bool {
    let Some(regs) = self.slots.get_mut(&key) else { return false };
    let Some(idx) = regs.iter().position(|r| r.handler.ptr_eq(handler)) else {
      return false;
    };
    regs.remove(idx).live.set(false);
    if regs.is_empty() {
      self.slots.remove(&key);
    }
    self.total -= 1;
    true
  }

  #[inline]
  pub(crate) fn count(&self, key: K) -> usize { self.slots.get(&key).map_or(0, |regs| regs.len()) }

  #[inline]
  pub(crate) fn total(&self) -> usize { self.total }

  pub(crate) fn snapshot(&self, key: K) -> Snapshot<A> {
    self
      .slots
      .get(&key)
      .map(|regs| regs.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub(crate) fn keys(&self) -> impl Iterator<Item = K> + '_ { self.slots.keys().copied() }

  /// Handlers per key, in registration order.
  pub(crate) fn handlers(&self) -> impl Iterator<Item = (K, Vec<Handler<A>>)> + '_ {
    self
      .slots
      .iter()
      .map(|(key, regs)| (*key, regs.iter().map(|r| r.handler.clone()).collect()))
  }

  pub(crate) fn clear(&mut self) {
    for reg in self.slots.values().flatten() {
      reg.live.set(false);
    }
    self.slots.clear();
    self.total = 0;
  }
}

impl<K, A: ?Sized> Default for Registry<K, A> {
  fn default() -> Self { Registry { slots: HashMap::new(), total: 0 } }
}
