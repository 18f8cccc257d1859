//! The event bus.
//!
//! A [`Bus`] fans typed events out to the handlers subscribed to them, tracks
//! whether anyone is listening (its *active* state), raises
//! [lifecycle](crate::lifecycle) notifications about itself, forwards events
//! to the buses piped into it, and hosts pooled [scans](Bus::scan).
//!
//! ```rust
//! use std::{cell::RefCell, rc::Rc};
//! use strongbus::prelude::*;
//!
//! strongbus::event_map! {
//!   #[derive(Debug, Clone)]
//!   pub enum AppEvent: AppEventKey {
//!     Login(String) => "login",
//!     Logout(()) => "logout",
//!   }
//! }
//!
//! let bus = Bus::<AppEvent>::with_options(BusOptions::new().name("App"));
//! let seen = Rc::new(RefCell::new(vec![]));
//! let s = seen.clone();
//! let subscription = bus.on(AppEventKey::Login, move |event: &AppEvent| {
//!   if let AppEvent::Login(user) = event {
//!     s.borrow_mut().push(user.clone());
//!   }
//! });
//! assert!(bus.is_active());
//! assert!(bus.emit(AppEvent::Login("ada".into())).unwrap());
//!
//! subscription.unsubscribe();
//! assert!(!bus.is_active());
//! assert!(!bus.emit(AppEvent::Login("bob".into())).unwrap());
//! assert_eq!(*seen.borrow(), vec!["ada".to_owned()]);
//! ```
mod delegate;
mod pool;
mod registry;

pub use pool::{ScanFuture, ScanParams};

use crate::{
  deferred::{deferred, CancelableFuture},
  error::{BusError, HandlerSpawnError, ScanError},
  event::{EventKey, EventMap, Listenable, Topic, WILDCARD},
  handler::{BoxError, Handler, HandlerOutcome, HandlerReturn},
  lifecycle::{ErrorEvent, ErrorSource, Lifecycle, LifecycleEvent},
  options::{BusOptions, Spawner, UnexpectedEventHandler},
  scanner::Scannable,
  subscription::Subscription,
  threshold::ThresholdLogger,
};
use delegate::DelegateLink;
use futures::{future::LocalBoxFuture, task::LocalSpawnExt};
use registry::Registry;
use std::{
  any::Any,
  cell::{Cell, RefCell},
  collections::{BTreeMap, HashMap, VecDeque},
  fmt::{Debug, Formatter},
  rc::{Rc, Weak},
};

type Key<M> = <M as EventMap>::Key;

/// Handlers per topic, as returned by [`Bus::listeners`].
pub type ListenerView<M> = HashMap<Topic<Key<M>>, Vec<Handler<M>>>;

/// Where the failure of a handler or hook is reported.
#[derive(Clone)]
enum Failure<K> {
  /// As an `error` lifecycle event from this source.
  Source(ErrorSource<K>),
  /// An `error` hook failed while handling this event; goes to the logger.
  ErrorHook(ErrorEvent<K>),
}

/// Where a listener addition or removal happened.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Origin {
  Own,
  /// On the piped bus with this address.
  Delegate(usize),
}

/// A strongly-typed, single-threaded event bus.
///
/// Cloning a `Bus` yields another handle to the same bus.
pub struct Bus<M: EventMap> {
  inner: Rc<BusInner<M>>,
}

pub(crate) struct BusInner<M: EventMap> {
  me: Weak<BusInner<M>>,
  name: String,
  allow_unhandled_events: bool,
  on_unexpected_event: Option<UnexpectedEventHandler<M>>,
  logger: ThresholdLogger,
  active: Cell<bool>,
  listeners: RefCell<Registry<Topic<Key<M>>, M>>,
  hooks: RefCell<Registry<Lifecycle, LifecycleEvent<Key<M>>>>,
  subscriptions: RefCell<BTreeMap<u64, (Topic<Key<M>>, Handler<M>)>>,
  next_token: Cell<u64>,
  unsub_queue: RefCell<VecDeque<u64>>,
  draining: Cell<bool>,
  delegates: RefCell<Vec<DelegateLink<M>>>,
  delegate_counts: RefCell<HashMap<Topic<Key<M>>, usize>>,
  delegate_total: Cell<usize>,
  listener_view: RefCell<Option<Rc<ListenerView<M>>>>,
  own_listener_view: RefCell<Option<Rc<ListenerView<M>>>>,
  scan_pools: RefCell<HashMap<(usize, bool), Box<dyn Any>>>,
  spawner: Option<Spawner>,
}

/// Resets the draining flag even if a hook panics mid-drain.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) { self.0.set(false) }
}

impl<M: EventMap> Bus<M> {
  pub fn new() -> Self { Self::with_options(BusOptions::default()) }

  pub fn with_options(options: BusOptions<M>) -> Self {
    let config = options.resolve();
    let logger =
      ThresholdLogger::new(config.name.clone(), config.thresholds, config.verbose, config.logger);
    let inner = Rc::new_cyclic(|me| BusInner {
      me: me.clone(),
      name: config.name,
      allow_unhandled_events: config.allow_unhandled_events,
      on_unexpected_event: config.on_unexpected_event,
      logger,
      active: Cell::new(false),
      listeners: RefCell::default(),
      hooks: RefCell::default(),
      subscriptions: RefCell::default(),
      next_token: Cell::new(0),
      unsub_queue: RefCell::default(),
      draining: Cell::new(false),
      delegates: RefCell::default(),
      delegate_counts: RefCell::default(),
      delegate_total: Cell::new(0),
      listener_view: RefCell::default(),
      own_listener_view: RefCell::default(),
      scan_pools: RefCell::default(),
      spawner: config.spawner,
    });
    Bus { inner }
  }

  // ==========================================================================
  // Subscribing
  // ==========================================================================

  /// Subscribe `f` to a single event, a list of events (like [`Bus::any`]) or
  /// the wildcard (like [`Bus::proxy`]).
  pub fn on<F, R>(&self, listenable: impl Into<Listenable<Key<M>>>, f: F) -> Subscription
  where
    F: Fn(&M) -> R + 'static,
    R: HandlerReturn,
  {
    self.on_handler(listenable, &Handler::new(f))
  }

  /// Like [`Bus::on`], with a handler whose identity the caller controls.
  /// Registering the same handler for the same event twice registers it once.
  pub fn on_handler(
    &self,
    listenable: impl Into<Listenable<Key<M>>>,
    handler: &Handler<M>,
  ) -> Subscription {
    match listenable.into() {
      Listenable::Event(key) => self.inner.add_listener(Topic::Event(key), handler),
      listenable @ Listenable::Events(_) => Subscription::merge(
        listenable
          .topics()
          .into_iter()
          .map(|topic| self.inner.add_listener(topic, handler))
          .collect::<Vec<_>>(),
      ),
      Listenable::Wildcard => self.inner.add_listener(Topic::Wildcard, handler),
    }
  }

  /// One handler for several events; the subscription releases all of them.
  pub fn any<F, R>(&self, events: impl IntoIterator<Item = Key<M>>, f: F) -> Subscription
  where
    F: Fn(&M) -> R + 'static,
    R: HandlerReturn,
  {
    let events: Vec<_> = events.into_iter().collect();
    self.on_handler(Listenable::Events(events), &Handler::new(f))
  }

  /// Subscribe to every event.
  pub fn proxy<F, R>(&self, f: F) -> Subscription
  where
    F: Fn(&M) -> R + 'static,
    R: HandlerReturn,
  {
    self.on_handler(Listenable::Wildcard, &Handler::new(f))
  }

  /// Alias of [`Bus::proxy`].
  #[inline]
  pub fn every<F, R>(&self, f: F) -> Subscription
  where
    F: Fn(&M) -> R + 'static,
    R: HandlerReturn,
  {
    self.proxy(f)
  }

  /// Subscribe to one kind of lifecycle event.
  pub fn hook<F, R>(&self, kind: Lifecycle, f: F) -> Subscription
  where
    F: Fn(&LifecycleEvent<Key<M>>) -> R + 'static,
    R: HandlerReturn,
  {
    self.hook_handler(kind, &Handler::new(f))
  }

  pub fn hook_handler(
    &self,
    kind: Lifecycle,
    handler: &Handler<LifecycleEvent<Key<M>>>,
  ) -> Subscription {
    self.inner.hooks.borrow_mut().insert(kind, handler.clone());
    let weak = Rc::downgrade(&self.inner);
    let handler = handler.clone();
    Subscription::new(move || {
      if let Some(inner) = weak.upgrade() {
        inner.hooks.borrow_mut().remove(kind, &handler);
      }
    })
  }

  /// Observe activation: `f(true)` when the bus becomes active, `f(false)`
  /// when it goes idle.
  pub fn monitor(&self, f: impl Fn(bool) + 'static) -> Subscription {
    let f = Rc::new(f);
    let on_idle = f.clone();
    Subscription::merge([
      self.hook(Lifecycle::Active, move |_| f(true)),
      self.hook(Lifecycle::Idle, move |_| on_idle(false)),
    ])
  }

  // ==========================================================================
  // Emitting
  // ==========================================================================

  /// Dispatch `event` to its handlers, then to wildcard handlers, then to
  /// every piped bus. Returns whether anyone handled it.
  ///
  /// Handler failures never reach the emitter; they are re-delivered as
  /// [`LifecycleEvent::Error`].
  pub fn emit(&self, event: M) -> Result<bool, BusError> { self.inner.dispatch(&event) }

  /// Resolves with the first event matching `trigger`.
  ///
  /// Destroying the bus cancels the future. Cancelling it releases its
  /// subscriptions; merely dropping it does not.
  pub fn next(&self, trigger: impl Into<Listenable<Key<M>>>) -> CancelableFuture<M>
  where
    M: Clone,
  {
    self.next_inner(trigger.into(), None)
  }

  /// Like [`Bus::next`], but rejects with [`ScanError::RejectedWithEvent`]
  /// if an event matching `reject` fires first.
  pub fn next_or_reject(
    &self,
    resolve: impl Into<Listenable<Key<M>>>,
    reject: impl Into<Listenable<Key<M>>>,
  ) -> CancelableFuture<M>
  where
    M: Clone,
  {
    self.next_inner(resolve.into(), Some(reject.into()))
  }

  fn next_inner(
    &self,
    resolve: Listenable<Key<M>>,
    reject: Option<Listenable<Key<M>>>,
  ) -> CancelableFuture<M>
  where
    M: Clone,
  {
    let (settle, future) = deferred::<M>();
    let mut subscriptions = Vec::with_capacity(3);

    let on_resolve = settle.clone();
    subscriptions.push(self.on(resolve, move |event: &M| {
      on_resolve.resolve(event.clone());
    }));
    if let Some(reject) = reject {
      let on_reject = settle.clone();
      subscriptions.push(self.on(reject, move |event: &M| {
        on_reject.reject(ScanError::RejectedWithEvent(event.name()));
      }));
    }
    let on_destroy = settle.clone();
    let reason = format!("{} destroyed", self.name());
    subscriptions.push(self.hook(Lifecycle::WillDestroy, move |_| {
      on_destroy.cancel(reason.clone());
    }));

    let subscriptions = Subscription::merge(subscriptions);
    settle.on_settle(move || subscriptions.unsubscribe());
    future
  }

  // ==========================================================================
  // Teardown
  // ==========================================================================

  /// Release every listener with full lifecycle notification, raise
  /// `willDestroy`, drop every lifecycle hook and unpipe every delegate.
  ///
  /// The bus stays usable afterwards.
  pub fn destroy(&self) {
    let inner = &self.inner;
    let tokens: Vec<u64> = inner.subscriptions.borrow().keys().copied().collect();
    inner.unsub_queue.borrow_mut().extend(tokens);
    inner.drain_unsub_queue();
    inner.emit_lifecycle(LifecycleEvent::WillDestroy);
    inner.hooks.borrow_mut().clear();
    self.unpipe_all();
    tracing::debug!(bus = %inner.name, "destroyed");
  }

  // ==========================================================================
  // State
  // ==========================================================================

  #[inline]
  pub fn is_active(&self) -> bool { self.inner.active.get() }

  /// `"<name> Bus"`.
  #[inline]
  pub fn name(&self) -> &str { &self.inner.name }

  #[inline]
  pub fn has_listeners(&self) -> bool { self.inner.has_listeners() }

  #[inline]
  pub fn has_own_listeners(&self) -> bool { self.inner.listeners.borrow().total() > 0 }

  #[inline]
  pub fn has_delegate_listeners(&self) -> bool { self.inner.delegate_total.get() > 0 }

  pub fn has_listeners_for(&self, topic: impl Into<Topic<Key<M>>>) -> bool {
    self.listener_count_for(topic) > 0
  }

  pub fn has_own_listeners_for(&self, topic: impl Into<Topic<Key<M>>>) -> bool {
    self.own_listener_count_for(topic) > 0
  }

  pub fn has_delegate_listeners_for(&self, topic: impl Into<Topic<Key<M>>>) -> bool {
    self.delegate_listener_count_for(topic) > 0
  }

  /// Own plus delegate listeners, over all topics.
  #[inline]
  pub fn listener_count(&self) -> usize { self.inner.listener_count() }

  pub fn listener_count_for(&self, topic: impl Into<Topic<Key<M>>>) -> usize {
    self.inner.listener_count_for(topic.into())
  }

  pub fn own_listener_count_for(&self, topic: impl Into<Topic<Key<M>>>) -> usize {
    self.inner.listeners.borrow().count(topic.into())
  }

  pub fn delegate_listener_count_for(&self, topic: impl Into<Topic<Key<M>>>) -> usize {
    self.inner.delegate_count_for(topic.into())
  }

  /// Own and delegate handlers per topic.
  ///
  /// The same `Rc` is handed out until a listener is added or removed
  /// anywhere in the delegate graph.
  pub fn listeners(&self) -> Rc<ListenerView<M>> {
    let cached = self.inner.listener_view.borrow().clone();
    if let Some(view) = cached {
      return view;
    }
    let mut view = (*self.own_listeners()).clone();
    for delegate in self.delegates() {
      for (topic, handlers) in delegate.listeners().iter() {
        let merged = view.entry(*topic).or_default();
        for handler in handlers {
          if !merged.iter().any(|h| h.ptr_eq(handler)) {
            merged.push(handler.clone());
          }
        }
      }
    }
    let view = Rc::new(view);
    *self.inner.listener_view.borrow_mut() = Some(view.clone());
    view
  }

  /// Own handlers per topic, memoized like [`Bus::listeners`].
  pub fn own_listeners(&self) -> Rc<ListenerView<M>> {
    let cached = self.inner.own_listener_view.borrow().clone();
    if let Some(view) = cached {
      return view;
    }
    let view: ListenerView<M> = self.inner.listeners.borrow().handlers().collect();
    let view = Rc::new(view);
    *self.inner.own_listener_view.borrow_mut() = Some(view.clone());
    view
  }

  #[inline]
  pub(crate) fn addr(&self) -> usize { Rc::as_ptr(&self.inner) as *const () as usize }

  #[inline]
  pub(crate) fn ptr_eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.inner, &other.inner) }
}

impl<M: EventMap> BusInner<M> {
  // ==========================================================================
  // Dispatch
  // ==========================================================================

  fn dispatch(&self, event: &M) -> Result<bool, BusError> {
    let key = event.key();
    if key.name() == WILDCARD {
      return Err(BusError::ReservedEvent(WILDCARD));
    }
    let mut handled = self.invoke(Topic::Event(key), event);
    handled |= self.invoke(Topic::Wildcard, event);
    handled |= self.forward(event)?;
    if !handled && !self.allow_unhandled_events {
      self.handle_unexpected_event(event)?;
    }
    Ok(handled)
  }

  fn invoke(&self, topic: Topic<Key<M>>, event: &M) -> bool {
    let snapshot = self.listeners.borrow().snapshot(topic);
    if snapshot.is_empty() {
      return false;
    }
    for registration in snapshot.iter().filter(|r| r.is_live()) {
      let outcome = registration.handler.call(event);
      self.settle(outcome, Failure::Source(ErrorSource::Event(topic)));
    }
    true
  }

  /// Emits on every delegate. The first delegate failure is returned once
  /// all delegates have seen the event.
  fn forward(&self, event: &M) -> Result<bool, BusError> {
    let delegates: Vec<Bus<M>> = self.delegates.borrow().iter().map(|l| l.bus.clone()).collect();
    let mut handled = false;
    let mut failure = None;
    for delegate in delegates {
      match delegate.inner.dispatch(event) {
        Ok(h) => handled |= h,
        Err(error) => {
          tracing::debug!(bus = %self.name, delegate = %delegate.name(), %error, "delegate failed");
          failure.get_or_insert(error);
        }
      }
    }
    match failure {
      Some(error) => Err(error),
      None => Ok(handled),
    }
  }

  fn handle_unexpected_event(&self, event: &M) -> Result<(), BusError> {
    match &self.on_unexpected_event {
      Some(handler) => handler(event),
      None => Err(BusError::UnhandledEvent {
        bus: self.name.clone(),
        event: event.name(),
        payload: format!("{:#?}", event.payload()),
      }),
    }
  }

  fn emit_lifecycle(&self, event: LifecycleEvent<Key<M>>) {
    let kind = event.kind();
    let snapshot = self.hooks.borrow().snapshot(kind);
    for registration in snapshot.iter().filter(|r| r.is_live()) {
      let outcome = registration.handler.call(&event);
      let failure = match &event {
        LifecycleEvent::Error(original) => Failure::ErrorHook(original.clone()),
        _ => Failure::Source(ErrorSource::Lifecycle(kind)),
      };
      self.settle(outcome, failure);
    }
  }

  /// Report a failed handler, or keep a suspended one running on the
  /// spawner and report it if it fails later.
  fn settle(&self, outcome: HandlerOutcome, failure: Failure<Key<M>>) {
    match outcome {
      HandlerOutcome::Done(Ok(())) => {}
      HandlerOutcome::Done(Err(error)) => self.report(failure, error),
      HandlerOutcome::Pending(future) => self.spawn_handler(future, failure),
    }
  }

  fn spawn_handler(
    &self,
    future: LocalBoxFuture<'static, Result<(), BoxError>>,
    failure: Failure<Key<M>>,
  ) {
    let Some(spawner) = &self.spawner else {
      let error = HandlerSpawnError::NoSpawner(self.name.clone());
      return self.report(failure, Box::new(error));
    };
    let bus = self.me.clone();
    let on_failure = failure.clone();
    let task = async move {
      if let Err(error) = future.await {
        if let Some(bus) = bus.upgrade() {
          bus.report(on_failure, error);
        }
      }
    };
    if let Err(source) = spawner.spawn_local(task) {
      let error = HandlerSpawnError::Spawn { bus: self.name.clone(), source };
      self.report(failure, Box::new(error));
    }
  }

  fn report(&self, failure: Failure<Key<M>>, error: BoxError) {
    match failure {
      Failure::Source(source) => {
        self.emit_lifecycle(LifecycleEvent::Error(ErrorEvent { error: Rc::from(error), source }))
      }
      Failure::ErrorHook(original) => self.logger.error(&format!(
        "Error thrown in error handler: {}. Original error from \"{}\": {}",
        error, original.source, original.error
      )),
    }
  }

  // ==========================================================================
  // Listener bookkeeping
  // ==========================================================================

  fn add_listener(self: &Rc<Self>, topic: Topic<Key<M>>, handler: &Handler<M>) -> Subscription {
    let is_new = !self.listeners.borrow().contains(topic, handler);
    if is_new {
      let n = self.listeners.borrow().count(topic) + 1;
      self.logger.on_add_listener(topic.name(), n);
      self.will_add_listener(topic);
      let added = self.listeners.borrow_mut().insert(topic, handler.clone());
      if added {
        self.did_add_listener(topic, Origin::Own);
      }
    }
    self.listener_subscription(topic, handler.clone())
  }

  fn listener_subscription(
    self: &Rc<Self>,
    topic: Topic<Key<M>>,
    handler: Handler<M>,
  ) -> Subscription {
    let token = self.next_token.get();
    self.next_token.set(token + 1);
    self.subscriptions.borrow_mut().insert(token, (topic, handler));
    let weak = Rc::downgrade(self);
    Subscription::new(move || {
      if let Some(inner) = weak.upgrade() {
        inner.unsub_queue.borrow_mut().push_back(token);
        inner.drain_unsub_queue();
      }
    })
  }

  /// Process queued releases in order. Releases queued by lifecycle hooks
  /// while draining are appended and handled by the same drain.
  fn drain_unsub_queue(&self) {
    if self.draining.replace(true) {
      return;
    }
    let _guard = DrainGuard(&self.draining);
    while let Some(token) = self.next_queued_release() {
      let cached = self.subscriptions.borrow_mut().remove(&token);
      if let Some((topic, handler)) = cached {
        self.remove_listener(topic, &handler);
      }
    }
  }

  fn next_queued_release(&self) -> Option<u64> { self.unsub_queue.borrow_mut().pop_front() }

  fn remove_listener(&self, topic: Topic<Key<M>>, handler: &Handler<M>) {
    if !self.listeners.borrow().contains(topic, handler) {
      return;
    }
    self.will_remove_listener(topic);
    let removed = self.listeners.borrow_mut().remove(topic, handler);
    if removed {
      self.did_remove_listener(topic, Origin::Own);
      let count = self.listeners.borrow().count(topic);
      self.logger.on_listener_removed(topic.name(), count);
    }
  }

  fn will_add_listener(&self, topic: Topic<Key<M>>) {
    if !self.active.get() {
      self.emit_lifecycle(LifecycleEvent::WillActivate);
    }
    self.emit_lifecycle(LifecycleEvent::WillAddListener(topic));
  }

  fn did_add_listener(&self, topic: Topic<Key<M>>, origin: Origin) {
    self.invalidate_views(origin);
    if let Origin::Delegate(_) = origin {
      *self.delegate_counts.borrow_mut().entry(topic).or_default() += 1;
      self.delegate_total.set(self.delegate_total.get().saturating_add(1));
    }
    self.emit_lifecycle(LifecycleEvent::DidAddListener(topic));
    if !self.active.get() && self.has_listeners() {
      self.active.set(true);
      self.emit_lifecycle(LifecycleEvent::Active);
    }
  }

  fn will_remove_listener(&self, topic: Topic<Key<M>>) {
    let count = self.listener_count_for(topic);
    if count == 0 {
      return;
    }
    if self.active.get() && count == 1 && self.listener_count() == 1 {
      self.emit_lifecycle(LifecycleEvent::WillIdle);
    }
    self.emit_lifecycle(LifecycleEvent::WillRemoveListener(topic));
  }

  fn did_remove_listener(&self, topic: Topic<Key<M>>, origin: Origin) {
    self.invalidate_views(origin);
    if let Origin::Delegate(_) = origin {
      let mut counts = self.delegate_counts.borrow_mut();
      if let Some(count) = counts.get_mut(&topic) {
        *count = count.saturating_sub(1);
        if *count == 0 {
          counts.remove(&topic);
        }
      }
      drop(counts);
      self.delegate_total.set(self.delegate_total.get().saturating_sub(1));
    }
    self.emit_lifecycle(LifecycleEvent::DidRemoveListener(topic));
    if self.active.get() && !self.has_listeners() {
      self.active.set(false);
      self.emit_lifecycle(LifecycleEvent::Idle);
    }
  }

  fn invalidate_views(&self, origin: Origin) {
    self.listener_view.borrow_mut().take();
    if origin == Origin::Own {
      self.own_listener_view.borrow_mut().take();
    }
  }

  // ==========================================================================
  // Counts
  // ==========================================================================

  #[inline]
  fn has_listeners(&self) -> bool { self.listener_count() > 0 }

  #[inline]
  fn listener_count(&self) -> usize {
    self.listeners.borrow().total().saturating_add(self.delegate_total.get())
  }

  fn listener_count_for(&self, topic: Topic<Key<M>>) -> usize {
    self.listeners.borrow().count(topic).saturating_add(self.delegate_count_for(topic))
  }

  #[inline]
  fn delegate_count_for(&self, topic: Topic<Key<M>>) -> usize {
    self.delegate_counts.borrow().get(&topic).copied().unwrap_or(0)
  }
}

impl<M: EventMap> Scannable<M> for Bus<M> {
  fn name(&self) -> String { self.inner.name.clone() }

  fn subscribe(&self, listenable: Listenable<Key<M>>, handler: &Handler<M>) -> Subscription {
    self.on_handler(listenable, handler)
  }

  fn hook_handler(
    &self,
    kind: Lifecycle,
    handler: &Handler<LifecycleEvent<Key<M>>>,
  ) -> Subscription {
    Bus::hook_handler(self, kind, handler)
  }
}

impl<M: EventMap> Default for Bus<M> {
  fn default() -> Self { Self::new() }
}

impl<M: EventMap> Clone for Bus<M> {
  #[inline]
  fn clone(&self) -> Self { Bus { inner: self.inner.clone() } }
}

impl<M: EventMap> Debug for Bus<M> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Bus")
      .field("name", &self.inner.name)
      .field("active", &self.inner.active.get())
      .field("listener_count", &self.inner.listener_count())
      .field("delegates", &self.inner.delegates.borrow().len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::{channel::oneshot, executor::LocalPool, FutureExt};

  crate::event_map! {
    #[derive(Debug, Clone, PartialEq)]
    enum Ev: EvKey {
      Foo(String) => "foo",
      Bar(bool) => "bar",
      Baz(u32) => "baz",
    }
  }

  fn record_lifecycle(bus: &Bus<Ev>) -> (Rc<RefCell<Vec<String>>>, Subscription) {
    let log = Rc::new(RefCell::new(vec![]));
    let subs = Lifecycle::ALL
      .iter()
      .filter(|kind| **kind != Lifecycle::Error)
      .map(|kind| {
        let log = log.clone();
        bus.hook(*kind, move |event: &LifecycleEvent<EvKey>| {
          let entry = match event.topic() {
            Some(topic) => format!("{}({})", event.kind(), topic),
            None => event.kind().to_string(),
          };
          log.borrow_mut().push(entry);
        })
      })
      .collect::<Vec<_>>();
    (log, Subscription::merge(subs))
  }

  fn record_errors(bus: &Bus<Ev>) -> (Rc<RefCell<Vec<String>>>, Subscription) {
    let errors = Rc::new(RefCell::new(vec![]));
    let e = errors.clone();
    let hook = bus.hook(Lifecycle::Error, move |event: &LifecycleEvent<EvKey>| {
      if let LifecycleEvent::Error(ErrorEvent { error, source }) = event {
        e.borrow_mut().push(format!("{source}: {error}"));
      }
    });
    (errors, hook)
  }

  /// Futures that suspend until the sender fires or drops, then fail.
  fn gated_failure(
    message: &'static str,
  ) -> (oneshot::Sender<()>, impl Fn() -> LocalBoxFuture<'static, Result<(), BoxError>>) {
    let (tx, rx) = oneshot::channel::<()>();
    let rx = rx.shared();
    let fail = move || {
      let rx = rx.clone();
      async move {
        let _ = rx.await;
        Err::<(), BoxError>(message.into())
      }
      .boxed_local()
    };
    (tx, fail)
  }

  #[test]
  fn lifecycle_order_around_first_and_last_listener() {
    let bus = Bus::<Ev>::new();
    let (log, _hooks) = record_lifecycle(&bus);
    let sub = bus.on(EvKey::Foo, |_: &Ev| ());
    assert_eq!(
      *log.borrow(),
      vec!["willActivate", "willAddListener(foo)", "didAddListener(foo)", "active"]
    );
    log.borrow_mut().clear();
    sub.unsubscribe();
    assert_eq!(
      *log.borrow(),
      vec!["willIdle", "willRemoveListener(foo)", "didRemoveListener(foo)", "idle"]
    );
  }

  #[test]
  fn duplicate_handlers_coalesce() {
    let bus = Bus::<Ev>::new();
    let (log, _hooks) = record_lifecycle(&bus);
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let handler = Handler::new(move |_: &Ev| c.set(c.get() + 1));
    let first = bus.on_handler(EvKey::Bar, &handler);
    let second = bus.on_handler(EvKey::Bar, &handler);
    assert_eq!(bus.own_listener_count_for(EvKey::Bar), 1);
    assert_eq!(log.borrow().len(), 4);
    bus.emit(Ev::Bar(true)).unwrap();
    assert_eq!(calls.get(), 1);

    first.unsubscribe();
    assert!(!bus.has_listeners());
    let before = log.borrow().len();
    second.unsubscribe();
    assert_eq!(log.borrow().len(), before);
  }

  #[test]
  fn emit_order_and_handled_flag() {
    let bus = Bus::<Ev>::new();
    let order = Rc::new(RefCell::new(vec![]));
    let o = order.clone();
    let _wild = bus.every(move |e: &Ev| o.borrow_mut().push(format!("*:{}", e.name())));
    let o = order.clone();
    let _foo = bus.on(EvKey::Foo, move |_: &Ev| o.borrow_mut().push("foo".to_owned()));
    assert!(bus.emit(Ev::Foo("x".into())).unwrap());
    assert!(bus.emit(Ev::Baz(1)).unwrap());
    assert_eq!(*order.borrow(), vec!["foo", "*:foo", "*:baz"]);
  }

  #[test]
  fn reserved_event_is_refused() {
    crate::event_map! {
      #[derive(Debug)]
      enum Odd: OddKey {
        Star(()) => "*",
      }
    }
    let bus = Bus::<Odd>::new();
    let err = bus.emit(Odd::Star(())).unwrap_err();
    assert!(matches!(err, BusError::ReservedEvent("*")));
  }

  #[test]
  fn unhandled_events() {
    let bus =
      Bus::<Ev>::with_options(BusOptions::new().name("Strict").allow_unhandled_events(false));
    let err = bus.emit(Ev::Baz(42)).unwrap_err();
    assert_eq!(
      err.to_string(),
      "Strict Bus received unexpected message type 'baz' with contents:\n42"
    );

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    let bus = Bus::<Ev>::with_options(
      BusOptions::new()
        .allow_unhandled_events(false)
        .on_unexpected_event(move |event: &Ev| {
          if let Ev::Baz(n) = event {
            s.set(*n);
          }
          Ok(())
        }),
    );
    assert!(!bus.emit(Ev::Baz(9)).unwrap());
    assert_eq!(seen.get(), 9);
  }

  #[test]
  fn handler_errors_become_lifecycle_errors() {
    let bus = Bus::<Ev>::new();
    let errors = Rc::new(RefCell::new(vec![]));
    let e = errors.clone();
    let _hook = bus.hook(Lifecycle::Error, move |event: &LifecycleEvent<EvKey>| {
      if let LifecycleEvent::Error(ErrorEvent { error, source }) = event {
        e.borrow_mut().push(format!("{source}: {error}"));
      }
    });
    let after = Rc::new(Cell::new(false));
    let a = after.clone();
    let _failing = bus.on(EvKey::Foo, |_: &Ev| Err::<(), _>("boom"));
    let _next = bus.on(EvKey::Foo, move |_: &Ev| a.set(true));
    assert!(bus.emit(Ev::Foo("x".into())).unwrap());
    assert!(after.get());
    assert_eq!(*errors.borrow(), vec!["foo: boom"]);
  }

  #[test]
  fn failing_hooks_are_rerouted_or_logged() {
    use crate::logger::test_logger::{Level, RecordingLogger};
    let records = Rc::new(RecordingLogger::default());
    let r = records.clone();
    let bus = Bus::<Ev>::with_options(BusOptions::new().logger_provider(move || r.clone()));
    let sources = Rc::new(RefCell::new(vec![]));
    let s = sources.clone();
    let _error_hook = bus.hook(Lifecycle::Error, move |event: &LifecycleEvent<EvKey>| {
      if let LifecycleEvent::Error(ErrorEvent { source, .. }) = event {
        s.borrow_mut().push(source.to_string());
      }
      Err::<(), _>("error hook failed")
    });
    let _active = bus.hook(Lifecycle::Active, |_: &LifecycleEvent<EvKey>| Err::<(), _>("nope"));
    let _sub = bus.on(EvKey::Bar, |_: &Ev| ());
    assert_eq!(*sources.borrow(), vec!["active"]);
    let logged = records.take();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].0, Level::Error);
    assert!(logged[0].1.contains("error hook failed"));
  }

  #[test]
  fn suspended_handler_futures_report_through_the_error_event() {
    let mut pool = LocalPool::new();
    let bus = Bus::<Ev>::with_options(BusOptions::new().spawner(pool.spawner()));
    let (errors, _hook) = record_errors(&bus);
    let (release, fail) = gated_failure("late boom");
    let _slow = bus.on(EvKey::Foo, move |_: &Ev| fail());
    let _quick = bus.on(EvKey::Foo, |_: &Ev| async { Err::<(), _>("quick boom") }.boxed_local());

    assert!(bus.emit(Ev::Foo("x".into())).unwrap());
    assert_eq!(*errors.borrow(), vec!["foo: quick boom"]);
    pool.run_until_stalled();
    assert_eq!(errors.borrow().len(), 1);

    release.send(()).unwrap();
    pool.run_until_stalled();
    assert_eq!(*errors.borrow(), vec!["foo: quick boom", "foo: late boom"]);
  }

  #[test]
  fn suspended_futures_without_a_spawner_are_reported() {
    let bus = Bus::<Ev>::new();
    let (errors, _hook) = record_errors(&bus);
    let (_release, fail) = gated_failure("never");
    let _slow = bus.on(EvKey::Baz, move |_: &Ev| fail());
    assert!(bus.emit(Ev::Baz(1)).unwrap());
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("baz: "));
    assert!(errors[0].contains("has no spawner"));
  }

  #[test]
  fn suspended_error_hooks_that_fail_are_logged() {
    use crate::logger::test_logger::{Level, RecordingLogger};
    let mut pool = LocalPool::new();
    let records = Rc::new(RecordingLogger::default());
    let r = records.clone();
    let bus = Bus::<Ev>::with_options(
      BusOptions::new().spawner(pool.spawner()).logger_provider(move || r.clone()),
    );
    let (release, fail) = gated_failure("hook gave up");
    let _error_hook = bus.hook(Lifecycle::Error, move |_: &LifecycleEvent<EvKey>| fail());
    let _failing = bus.on(EvKey::Bar, |_: &Ev| Err::<(), _>("bar failed"));

    bus.emit(Ev::Bar(true)).unwrap();
    pool.run_until_stalled();
    assert!(records.take().is_empty());

    drop(release);
    pool.run_until_stalled();
    let logged = records.take();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].0, Level::Error);
    assert!(logged[0].1.contains("hook gave up"));
    assert!(logged[0].1.contains("bar failed"));
  }

  #[test]
  fn handlers_added_or_removed_during_emit() {
    let bus = Bus::<Ev>::new();
    let calls = Rc::new(RefCell::new(vec![]));
    let late: Rc<RefCell<Option<Subscription>>> = Rc::default();
    let victim: Rc<RefCell<Option<Subscription>>> = Rc::default();

    let (b, c, l, v) = (bus.clone(), calls.clone(), late.clone(), victim.clone());
    let _first = bus.on(EvKey::Baz, move |_: &Ev| {
      c.borrow_mut().push("first");
      if let Some(victim) = v.borrow_mut().take() {
        victim.unsubscribe();
      }
      let c = c.clone();
      *l.borrow_mut() = Some(b.on(EvKey::Baz, move |_: &Ev| c.borrow_mut().push("late")));
    });
    let c = calls.clone();
    *victim.borrow_mut() = Some(bus.on(EvKey::Baz, move |_: &Ev| c.borrow_mut().push("victim")));

    bus.emit(Ev::Baz(1)).unwrap();
    assert_eq!(*calls.borrow(), vec!["first"]);
  }

  #[test]
  fn reentrant_unsubscription_is_queued() {
    let bus = Bus::<Ev>::new();
    let foo = bus.on(EvKey::Foo, |_: &Ev| ());
    let bar = bus.on(EvKey::Bar, |_: &Ev| ());
    let order = Rc::new(RefCell::new(vec![]));
    let (o, bar_copy) = (order.clone(), bar.clone());
    let _hook = bus.hook(Lifecycle::WillRemoveListener, move |event: &LifecycleEvent<EvKey>| {
      o.borrow_mut().push(format!("will:{}", event.topic().map_or("?", |t| t.name())));
      bar_copy.unsubscribe();
    });
    let o = order.clone();
    let _did = bus.hook(Lifecycle::DidRemoveListener, move |event: &LifecycleEvent<EvKey>| {
      o.borrow_mut().push(format!("did:{}", event.topic().map_or("?", |t| t.name())));
    });
    foo.unsubscribe();
    assert_eq!(*order.borrow(), vec!["will:foo", "did:foo", "will:bar", "did:bar"]);
    assert!(!bus.has_listeners());
    assert!(bar.is_closed());
  }

  #[test]
  fn activation_fires_once_per_crossing() {
    let bus = Bus::<Ev>::new();
    let states = Rc::new(RefCell::new(vec![]));
    let s = states.clone();
    let _monitor = bus.monitor(move |active| s.borrow_mut().push(active));
    let a = bus.on(EvKey::Foo, |_: &Ev| ());
    let b = bus.any([EvKey::Bar, EvKey::Baz], |_: &Ev| ());
    assert_eq!(bus.listener_count(), 3);
    a.unsubscribe();
    b.unsubscribe();
    b.unsubscribe();
    let c = bus.proxy(|_: &Ev| ());
    c.unsubscribe();
    assert_eq!(*states.borrow(), vec![true, false, true, false]);
  }

  #[test]
  fn listener_views_are_memoized() {
    let bus = Bus::<Ev>::new();
    let _a = bus.on(EvKey::Foo, |_: &Ev| ());
    let first = bus.listeners();
    assert!(Rc::ptr_eq(&first, &bus.listeners()));
    assert!(Rc::ptr_eq(&bus.own_listeners(), &bus.own_listeners()));
    let b = bus.on(EvKey::Foo, |_: &Ev| ());
    let second = bus.listeners();
    assert!(!Rc::ptr_eq(&first, &second));
    assert_eq!(second[&Topic::Event(EvKey::Foo)].len(), 2);
    b.unsubscribe();
    assert_eq!(bus.listeners()[&Topic::Event(EvKey::Foo)].len(), 1);
  }

  #[test]
  fn destroy_releases_everything() {
    let bus = Bus::<Ev>::with_options(BusOptions::new().allow_unhandled_events(false));
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let _sub = bus.on(EvKey::Foo, move |_: &Ev| c.set(c.get() + 1));
    let (log, _hooks) = record_lifecycle(&bus);
    bus.emit(Ev::Foo("X".into())).unwrap();
    bus.destroy();
    assert_eq!(
      *log.borrow(),
      vec!["willIdle", "willRemoveListener(foo)", "didRemoveListener(foo)", "idle", "willDestroy"]
    );
    assert!(matches!(bus.emit(Ev::Foo("X".into())), Err(BusError::UnhandledEvent { .. })));
    assert_eq!(calls.get(), 1);
    let _again = bus.on(EvKey::Foo, |_: &Ev| ());
    assert_eq!(log.borrow().len(), 5);
  }

  #[test]
  fn next_resolves_with_the_event() {
    let bus = Bus::<Ev>::new();
    let next = bus.next(EvKey::Foo);
    assert!(bus.has_own_listeners_for(EvKey::Foo));
    bus.emit(Ev::Baz(1)).unwrap();
    bus.emit(Ev::Foo("hi".into())).unwrap();
    assert!(!bus.has_listeners());
    assert_eq!(next.now_or_never().unwrap().unwrap(), Ev::Foo("hi".into()));
  }

  #[test]
  fn next_or_reject() {
    let bus = Bus::<Ev>::new();
    let next = bus.next_or_reject(EvKey::Foo, EvKey::Bar);
    bus.emit(Ev::Bar(false)).unwrap();
    assert!(!bus.has_listeners());
    let err = next.now_or_never().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Rejected with event (bar)");
  }

  #[test]
  fn next_is_cancelled_by_destroy_and_by_caller() {
    let bus = Bus::<Ev>::with_options(BusOptions::new().name("Main"));
    let on_destroy = bus.next(EvKey::Foo);
    bus.destroy();
    let err = on_destroy.now_or_never().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Main Bus destroyed");

    let canceled = bus.next([EvKey::Foo, EvKey::Bar]);
    assert_eq!(bus.listener_count(), 2);
    assert!(canceled.cancel("not needed"));
    assert!(!bus.has_listeners());
  }
}
