use smallvec::SmallVec;
use std::{
  cell::{Cell, RefCell},
  fmt::{Debug, Formatter},
  rc::Rc,
};

type Teardown = Box<dyn FnOnce()>;

/// A disposable handle returned by every subscribe-like operation.
///
/// Releasing is idempotent: the teardown runs on the first `unsubscribe` and
/// every later call is a no-op. Clones share the same state.
#[derive(Clone, Default)]
pub struct Subscription(Rc<Inner>);

#[derive(Default)]
struct Inner {
  closed: Cell<bool>,
  teardown: RefCell<SmallVec<[Teardown; 1]>>,
}

impl Subscription {
  pub fn new(teardown: impl FnOnce() + 'static) -> Self {
    let subscription = Subscription::default();
    subscription.add(teardown);
    subscription
  }

  /// A subscription with nothing to release.
  #[inline]
  pub fn empty() -> Self { Subscription::default() }

  /// Compose several subscriptions into one that releases all of them.
  pub fn merge(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
    let merged = Subscription::default();
    for s in subscriptions {
      merged.add(move || s.unsubscribe());
    }
    merged
  }

  /// Attach another teardown. If this subscription is already closed the
  /// teardown runs immediately.
  pub fn add(&self, teardown: impl FnOnce() + 'static) {
    if self.is_closed() {
      teardown();
    } else {
      self.0.teardown.borrow_mut().push(Box::new(teardown));
    }
  }

  pub fn unsubscribe(&self) {
    if self.0.closed.replace(true) {
      return;
    }
    // teardowns may re-enter this subscription
    let teardown = std::mem::take(&mut *self.0.teardown.borrow_mut());
    for f in teardown {
      f();
    }
  }

  #[inline]
  pub fn is_closed(&self) -> bool { self.0.closed.get() }

  /// Activates "RAII" behavior for this subscription: the returned guard
  /// releases it when dropped.
  ///
  /// **Attention:** If you don't assign the return value to a variable, the
  /// subscription is released immediately.
  pub fn unsubscribe_when_dropped(self) -> SubscriptionGuard { SubscriptionGuard(Some(self)) }
}

impl Debug for Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("closed", &self.is_closed())
      .field("teardown_count", &self.0.teardown.borrow().len())
      .finish()
  }
}

/// An RAII implementation of a "scoped subscribed" of a subscription.
/// When this structure is dropped (falls out of scope), the subscription will
/// be unsubscribed.
#[derive(Debug)]
#[must_use]
pub struct SubscriptionGuard(Option<Subscription>);

impl SubscriptionGuard {
  /// Consumes the guard without releasing the subscription.
  pub fn into_inner(mut self) -> Subscription { self.0.take().unwrap_or_default() }
}

impl Drop for SubscriptionGuard {
  fn drop(&mut self) {
    if let Some(subscription) = self.0.take() {
      subscription.unsubscribe()
    }
  }
}
