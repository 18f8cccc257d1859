//! A settle-once cell and the cancelable future observing it.
//!
//! [`deferred`] returns a pair: a [`Deferred`] that settles the value from
//! inside event handlers, and a [`CancelableFuture`] the host awaits. The
//! first settlement wins; later ones are ignored. Settlement happens
//! synchronously, observation happens on the next poll.
//!
//! ```rust
//! use futures::FutureExt;
//! use strongbus::deferred::deferred;
//!
//! let (settle, future) = deferred::<u32>();
//! assert!(settle.resolve(1));
//! assert!(!settle.cancel("too late"));
//! assert_eq!(future.now_or_never().unwrap().unwrap(), 1);
//! ```
use crate::error::ScanError;
use futures::future::FusedFuture;
use smallvec::SmallVec;
use std::{
  cell::RefCell,
  fmt::{Debug, Formatter},
  future::Future,
  pin::Pin,
  rc::Rc,
  task::{Context, Poll, Waker},
};

// ============================================================================
// Internal State
// ============================================================================

struct Slot<T> {
  settled: bool,
  outcome: Option<Result<T, ScanError>>,
  waker: Option<Waker>,
  on_settle: SmallVec<[Box<dyn FnOnce()>; 2]>,
}

type SharedSlot<T> = Rc<RefCell<Slot<T>>>;

pub fn deferred<T>() -> (Deferred<T>, CancelableFuture<T>) {
  let slot = Rc::new(RefCell::new(Slot {
    settled: false,
    outcome: None,
    waker: None,
    on_settle: SmallVec::new(),
  }));
  (Deferred(slot.clone()), CancelableFuture { slot })
}

// ============================================================================
// Deferred
// ============================================================================

/// The settling half of a [`deferred`] pair.
pub struct Deferred<T>(SharedSlot<T>);

impl<T> Deferred<T> {
  #[inline]
  pub fn resolve(&self, value: T) -> bool { self.settle(Ok(value)) }

  #[inline]
  pub fn reject(&self, error: ScanError) -> bool { self.settle(Err(error)) }

  #[inline]
  pub fn cancel(&self, reason: impl Into<String>) -> bool {
    self.settle(Err(ScanError::Canceled(reason.into())))
  }

  #[inline]
  pub fn is_settled(&self) -> bool { self.0.borrow().settled }

  /// Run `f` once this settles, or right away if it already has.
  pub fn on_settle(&self, f: impl FnOnce() + 'static) {
    let mut slot = self.0.borrow_mut();
    if slot.settled {
      drop(slot);
      f();
    } else {
      slot.on_settle.push(Box::new(f));
    }
  }

  /// Whether both halves belong to the same pair.
  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.0, &other.0) }

  fn settle(&self, outcome: Result<T, ScanError>) -> bool {
    let callbacks = {
      let mut slot = self.0.borrow_mut();
      if slot.settled {
        return false;
      }
      slot.settled = true;
      slot.outcome = Some(outcome);
      std::mem::take(&mut slot.on_settle)
    };
    for f in callbacks {
      f();
    }
    let waker = self.0.borrow_mut().waker.take();
    if let Some(waker) = waker {
      waker.wake();
    }
    true
  }
}

impl<T> Clone for Deferred<T> {
  #[inline]
  fn clone(&self) -> Self { Deferred(self.0.clone()) }
}

impl<T> Debug for Deferred<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Deferred")
      .field("settled", &self.is_settled())
      .finish()
  }
}

// ============================================================================
// CancelableFuture
// ============================================================================

/// The observing half of a [`deferred`] pair.
///
/// Dropping the future does not settle it; call [`cancel`](Self::cancel) to
/// release whatever is waiting to settle it.
pub struct CancelableFuture<T> {
  slot: SharedSlot<T>,
}

impl<T> CancelableFuture<T> {
  /// Settle with [`ScanError::Canceled`]. Returns `false` if already settled.
  pub fn cancel(&self, reason: impl Into<String>) -> bool { self.settler().cancel(reason) }

  #[inline]
  pub fn is_settled(&self) -> bool { self.slot.borrow().settled }

  /// A settling handle for the same pair.
  pub fn settler(&self) -> Deferred<T> { Deferred(self.slot.clone()) }
}

impl<T> Future for CancelableFuture<T> {
  type Output = Result<T, ScanError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut slot = self.slot.borrow_mut();
    if slot.settled {
      match slot.outcome.take() {
        Some(outcome) => Poll::Ready(outcome),
        None => Poll::Pending,
      }
    } else {
      slot.waker = Some(cx.waker().clone());
      Poll::Pending
    }
  }
}

impl<T> FusedFuture for CancelableFuture<T> {
  fn is_terminated(&self) -> bool {
    let slot = self.slot.borrow();
    slot.settled && slot.outcome.is_none()
  }
}

impl<T> Debug for CancelableFuture<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancelableFuture")
      .field("settled", &self.is_settled())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::cell::Cell;

  #[test]
  fn first_settlement_wins() {
    let (settle, future) = deferred::<i32>();
    assert!(settle.reject(ScanError::RejectedWithEvent("bar")));
    assert!(!settle.resolve(1));
    assert!(future.is_settled());
    let err = future.now_or_never().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Rejected with event (bar)");
  }

  #[test]
  fn pending_until_settled() {
    let (settle, mut future) = deferred::<&str>();
    assert!((&mut future).now_or_never().is_none());
    settle.resolve("done");
    assert!(matches!((&mut future).now_or_never(), Some(Ok("done"))));
    assert!(future.is_terminated());
  }

  #[test]
  fn cancel_from_the_future_side() {
    let (settle, future) = deferred::<()>();
    let ran = Rc::new(Cell::new(0));
    let r = ran.clone();
    settle.on_settle(move || r.set(r.get() + 1));
    assert!(future.cancel("stop"));
    assert!(!future.cancel("again"));
    assert_eq!(ran.get(), 1);
    assert!(settle.is_settled());

    let r = ran.clone();
    settle.on_settle(move || r.set(r.get() + 1));
    assert_eq!(ran.get(), 2);
    let outcome = future.now_or_never();
    assert!(matches!(outcome, Some(Err(ScanError::Canceled(reason))) if reason == "stop"));
  }

  #[test]
  fn callbacks_may_inspect_the_settled_pair() {
    let (settle, future) = deferred::<u8>();
    let observer = settle.clone();
    let seen = Rc::new(Cell::new(false));
    let s = seen.clone();
    settle.on_settle(move || s.set(observer.is_settled()));
    settle.resolve(3);
    assert!(seen.get());
    assert!(matches!(future.now_or_never(), Some(Ok(3))));
  }
}
