//! One-shot condition evaluation over event sources.
//!
//! A [`Scanner`] runs an [`Evaluator`] every time one of the events it scans
//! fires, until the evaluator resolves or rejects it. Whatever settles the
//! scanner, it releases every subscription it holds on its sources.
//!
//! ```rust
//! use futures::FutureExt;
//! use strongbus::prelude::*;
//!
//! strongbus::event_map! {
//!   #[derive(Debug, Clone)]
//!   pub enum Ev: EvKey {
//!     Tick(u32) => "tick",
//!   }
//! }
//!
//! let bus = Bus::<Ev>::new();
//! let evaluator = Evaluator::new(|ctx: &ScanContext<u32, Ev>| {
//!   if let Trigger::Event(Ev::Tick(n)) = ctx.trigger() {
//!     if *n >= 3 {
//!       ctx.resolve(*n);
//!     }
//!   }
//! });
//! let scanner = Scanner::new(evaluator, true);
//! scanner.scan(&bus, EvKey::Tick);
//! for n in 1..=3 {
//!   bus.emit(Ev::Tick(n)).unwrap();
//! }
//! assert_eq!(scanner.now_or_never().unwrap().unwrap(), 3);
//! assert!(!bus.has_listeners());
//! ```
use crate::{
  deferred::{deferred, CancelableFuture, Deferred},
  error::{ScanError, ALL_SCANNABLES_DESTROYED},
  event::{EventMap, Listenable},
  handler::{BoxError, Handler, HandlerOutcome, HandlerReturn},
  lifecycle::{Lifecycle, LifecycleEvent},
  subscription::Subscription,
};
use futures::{future::LocalBoxFuture, FutureExt};
use std::{
  cell::{Cell, RefCell},
  fmt::{Debug, Formatter},
  future::Future,
  pin::Pin,
  rc::Rc,
  task::{Context, Poll, Waker},
};

/// Anything a [`Scanner`] can attach to.
pub trait Scannable<M: EventMap> {
  fn name(&self) -> String;

  fn subscribe(&self, listenable: Listenable<M::Key>, handler: &Handler<M>) -> Subscription;

  fn hook_handler(
    &self,
    kind: Lifecycle,
    handler: &Handler<LifecycleEvent<M::Key>>,
  ) -> Subscription;
}

/// Why an evaluator is being called.
#[derive(Debug)]
pub enum Trigger<'a, M> {
  /// Once, at construction of an eager scanner.
  Eager,
  /// A scanned event fired.
  Event(&'a M),
  /// Every scanned source has been destroyed.
  Destroy,
}

impl<'a, M> Trigger<'a, M> {
  #[inline]
  pub fn event(&self) -> Option<&'a M> {
    match self {
      Trigger::Event(event) => Some(event),
      _ => None,
    }
  }
}

/// What an evaluator receives on every call.
pub struct ScanContext<'a, T, M> {
  deferred: &'a Deferred<T>,
  trigger: Trigger<'a, M>,
}

impl<'a, T, M> ScanContext<'a, T, M> {
  #[inline]
  pub fn resolve(&self, value: T) { self.deferred.resolve(value); }

  pub fn reject(&self, error: impl Into<BoxError>) {
    self.deferred.reject(ScanError::Rejected(Rc::from(error.into())));
  }

  #[inline]
  pub fn trigger(&self) -> &Trigger<'a, M> { &self.trigger }

  #[inline]
  pub fn is_settled(&self) -> bool { self.deferred.is_settled() }

  /// A handle that settles the scanner later, for evaluators that return a
  /// future.
  #[inline]
  pub fn settler(&self) -> Deferred<T> { self.deferred.clone() }
}

type EvaluatorFn<T, M> = dyn for<'a> Fn(&ScanContext<'a, T, M>) -> HandlerOutcome;

/// A condition check with reference identity.
///
/// [`Bus::scan`](crate::bus::Bus::scan) pools scanners by evaluator, so keep
/// one `Evaluator` around and pass it to every scan that checks the same
/// condition. An evaluator returning `Err` rejects the scanner. An evaluator
/// may also return a boxed local future; the scanner drives it while the
/// scanner itself is polled, and a rejected future rejects the scanner.
pub struct Evaluator<T, M>(Rc<EvaluatorFn<T, M>>);

impl<T: 'static, M: 'static> Evaluator<T, M> {
  pub fn new<F, R>(f: F) -> Self
  where
    F: for<'a> Fn(&ScanContext<'a, T, M>) -> R + 'static,
    R: HandlerReturn,
  {
    Evaluator(Rc::new(move |ctx: &ScanContext<'_, T, M>| f(ctx).into_outcome()))
  }
}

impl<T, M> Evaluator<T, M> {
  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { self.addr() == other.addr() }

  #[inline]
  pub(crate) fn addr(&self) -> usize { Rc::as_ptr(&self.0) as *const () as usize }
}

impl<T, M> Clone for Evaluator<T, M> {
  #[inline]
  fn clone(&self) -> Self { Evaluator(self.0.clone()) }
}

impl<T, M> Debug for Evaluator<T, M> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Evaluator")
      .field(&format_args!("{:#x}", self.addr()))
      .finish()
  }
}

struct ScannerCore<T, M> {
  deferred: Deferred<T>,
  evaluator: Evaluator<T, M>,
  triggers: RefCell<Vec<Subscription>>,
  destroy_hooks: RefCell<Vec<(u64, Subscription)>>,
  next_hook: Cell<u64>,
  /// Evaluations that suspended, driven by `Scanner::poll`.
  running: RefCell<Vec<LocalBoxFuture<'static, Result<(), BoxError>>>>,
  waker: RefCell<Option<Waker>>,
}

impl<T, M> ScannerCore<T, M> {
  fn evaluate(&self, trigger: Trigger<'_, M>) {
    if self.deferred.is_settled() {
      return;
    }
    let ctx = ScanContext { deferred: &self.deferred, trigger };
    let outcome = (self.evaluator.0)(&ctx);
    match outcome {
      HandlerOutcome::Done(Ok(())) => {}
      HandlerOutcome::Done(Err(error)) => self.reject(error),
      HandlerOutcome::Pending(future) => {
        self.running.borrow_mut().push(future);
        let waker = self.waker.borrow().clone();
        if let Some(waker) = waker {
          waker.wake();
        }
      }
    }
  }

  fn reject(&self, error: BoxError) { self.deferred.reject(ScanError::Rejected(Rc::from(error))); }

  /// Poll suspended evaluations; a rejection rejects the scanner.
  fn drive(&self, cx: &mut Context<'_>) {
    *self.waker.borrow_mut() = Some(cx.waker().clone());
    let mut running = std::mem::take(&mut *self.running.borrow_mut());
    running.retain_mut(|future| match future.poll_unpin(cx) {
      Poll::Ready(Ok(())) => false,
      Poll::Ready(Err(error)) => {
        self.reject(error);
        false
      }
      Poll::Pending => true,
    });
    if !self.deferred.is_settled() {
      // evaluations started while polling were pushed meanwhile
      self.running.borrow_mut().append(&mut running);
    }
  }

  fn release(&self) {
    let triggers = std::mem::take(&mut *self.triggers.borrow_mut());
    let hooks = std::mem::take(&mut *self.destroy_hooks.borrow_mut());
    let running = std::mem::take(&mut *self.running.borrow_mut());
    triggers.iter().for_each(Subscription::unsubscribe);
    hooks.iter().for_each(|(_, hook)| hook.unsubscribe());
    drop(running);
    self.waker.borrow_mut().take();
  }

  fn on_source_destroyed(&self, hook_id: u64) {
    let (hook, remaining) = {
      let mut hooks = self.destroy_hooks.borrow_mut();
      let hook = hooks
        .iter()
        .position(|(id, _)| *id == hook_id)
        .map(|idx| hooks.remove(idx).1);
      (hook, hooks.len())
    };
    let Some(hook) = hook else { return };
    hook.unsubscribe();
    if remaining == 0 {
      self.evaluate(Trigger::Destroy);
      self.deferred.cancel(ALL_SCANNABLES_DESTROYED);
    }
  }
}

/// A one-shot, cancelable condition evaluator bound to zero or more sources.
///
/// A `Scanner` is a future of the value its evaluator resolves with.
pub struct Scanner<T, M> {
  core: Rc<ScannerCore<T, M>>,
  future: CancelableFuture<T>,
}

impl<T: 'static, M: EventMap> Scanner<T, M> {
  /// Create a scanner. An eager scanner evaluates once right away, before
  /// any source is attached.
  pub fn new(evaluator: Evaluator<T, M>, eager: bool) -> Self {
    let (deferred, future) = deferred();
    let core = Rc::new(ScannerCore {
      deferred,
      evaluator,
      triggers: RefCell::new(vec![]),
      destroy_hooks: RefCell::new(vec![]),
      next_hook: Cell::new(0),
      running: RefCell::new(vec![]),
      waker: RefCell::new(None),
    });
    let weak = Rc::downgrade(&core);
    core.deferred.on_settle(move || {
      if let Some(core) = weak.upgrade() {
        core.release();
      }
    });
    if eager {
      core.evaluate(Trigger::Eager);
    }
    Scanner { core, future }
  }

  /// Evaluate whenever `listenable` fires on `source`. A no-op once settled.
  pub fn scan<S>(&self, source: &S, listenable: impl Into<Listenable<M::Key>>) -> &Self
  where
    S: Scannable<M> + ?Sized,
  {
    if self.is_settled() {
      return self;
    }
    let core = self.core.clone();
    let on_event = Handler::new(move |event: &M| core.evaluate(Trigger::Event(event)));
    let trigger = source.subscribe(listenable.into(), &on_event);

    let hook_id = self.core.next_hook.get();
    self.core.next_hook.set(hook_id + 1);
    let core = self.core.clone();
    let on_destroy = Handler::new(move |_: &LifecycleEvent<M::Key>| {
      core.on_source_destroyed(hook_id)
    });
    let destroy_hook = source.hook_handler(Lifecycle::WillDestroy, &on_destroy);

    self.core.triggers.borrow_mut().push(trigger);
    self.core.destroy_hooks.borrow_mut().push((hook_id, destroy_hook));
    if self.is_settled() {
      // settled while attaching, after the release already ran
      self.core.release();
    }
    self
  }

  /// Settle with [`ScanError::Canceled`]. Returns `false` if already settled.
  #[inline]
  pub fn cancel(&self, reason: impl Into<String>) -> bool { self.core.deferred.cancel(reason) }

  #[inline]
  pub fn is_settled(&self) -> bool { self.core.deferred.is_settled() }

  /// Identity of this scanner, shared by every pooled caller.
  #[inline]
  pub(crate) fn id(&self) -> usize { Rc::as_ptr(&self.core) as *const () as usize }

  #[inline]
  pub(crate) fn settler(&self) -> Deferred<T> { self.core.deferred.clone() }

  /// Subscriptions currently held on sources, triggers and destroy hooks.
  #[cfg(test)]
  pub(crate) fn held(&self) -> (usize, usize) {
    (self.core.triggers.borrow().len(), self.core.destroy_hooks.borrow().len())
  }
}

impl<T, M> Future for Scanner<T, M> {
  type Output = Result<T, ScanError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    this.core.drive(cx);
    Pin::new(&mut this.future).poll(cx)
  }
}

impl<T, M> Debug for Scanner<T, M> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scanner")
      .field("evaluator", &self.core.evaluator)
      .field("settled", &self.core.deferred.is_settled())
      .finish()
  }
}
