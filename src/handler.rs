use futures::{
  future::LocalBoxFuture,
  task::{noop_waker_ref, Context, Poll},
  FutureExt,
};
use std::{
  fmt::{Debug, Formatter},
  rc::Rc,
};

/// The error type handlers, hooks and evaluators may fail with.
pub type BoxError = Box<dyn std::error::Error>;

/// What a handler call produced.
pub enum HandlerOutcome {
  Done(Result<(), BoxError>),
  /// A returned future that suspended before finishing.
  Pending(LocalBoxFuture<'static, Result<(), BoxError>>),
}

impl HandlerOutcome {
  /// Poll a pending outcome once, so a future that never suspends settles
  /// during the call that returned it.
  pub(crate) fn poll_once(self) -> Self {
    match self {
      HandlerOutcome::Pending(mut future) => {
        let mut cx = Context::from_waker(noop_waker_ref());
        match future.poll_unpin(&mut cx) {
          Poll::Ready(result) => HandlerOutcome::Done(result),
          Poll::Pending => HandlerOutcome::Pending(future),
        }
      }
      done => done,
    }
  }
}

impl Debug for HandlerOutcome {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      HandlerOutcome::Done(result) => f.debug_tuple("Done").field(result).finish(),
      HandlerOutcome::Pending(_) => f.write_str("Pending"),
    }
  }
}

/// What a handler closure may return: nothing, a `Result`, or a boxed local
/// future of either. Errors, including a rejected future's, are re-delivered
/// through the bus's `error` lifecycle event.
pub trait HandlerReturn {
  fn into_outcome(self) -> HandlerOutcome;
}

impl HandlerReturn for () {
  #[inline]
  fn into_outcome(self) -> HandlerOutcome { HandlerOutcome::Done(Ok(())) }
}

impl<E: Into<BoxError>> HandlerReturn for Result<(), E> {
  #[inline]
  fn into_outcome(self) -> HandlerOutcome { HandlerOutcome::Done(self.map_err(Into::into)) }
}

impl HandlerReturn for LocalBoxFuture<'static, ()> {
  fn into_outcome(self) -> HandlerOutcome {
    HandlerOutcome::Pending(self.map(Ok).boxed_local()).poll_once()
  }
}

impl<E: Into<BoxError> + 'static> HandlerReturn for LocalBoxFuture<'static, Result<(), E>> {
  fn into_outcome(self) -> HandlerOutcome {
    HandlerOutcome::Pending(self.map(|r| r.map_err(Into::into)).boxed_local()).poll_once()
  }
}

/// A callback with reference identity.
///
/// Two `Handler`s are the same handler when they share an allocation: cloning
/// keeps the identity, wrapping a closure with [`Handler::new`] always creates
/// a new one. A bus coalesces registrations of the same handler for the same
/// topic.
pub struct Handler<A: ?Sized>(Rc<dyn Fn(&A) -> HandlerOutcome>);

impl<A: ?Sized + 'static> Handler<A> {
  pub fn new<F, R>(f: F) -> Self
  where
    F: Fn(&A) -> R + 'static,
    R: HandlerReturn,
  {
    Handler(Rc::new(move |arg: &A| f(arg).into_outcome()))
  }
}

impl<A: ?Sized> Handler<A> {
  #[inline]
  pub(crate) fn call(&self, arg: &A) -> HandlerOutcome { (self.0)(arg) }

  /// Whether both handles refer to the same handler.
  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { self.addr() == other.addr() }

  #[inline]
  pub(crate) fn addr(&self) -> usize { Rc::as_ptr(&self.0) as *const () as usize }
}

impl<A: ?Sized> Clone for Handler<A> {
  #[inline]
  fn clone(&self) -> Self { Handler(self.0.clone()) }
}

impl<A: ?Sized> Debug for Handler<A> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Handler")
      .field(&format_args!("{:#x}", self.addr()))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_follows_the_allocation() {
    let a = Handler::<i32>::new(|_| ());
    let b = Handler::<i32>::new(|_| ());
    assert!(a.ptr_eq(&a.clone()));
    assert!(!a.ptr_eq(&b));
  }

  fn settled(outcome: HandlerOutcome) -> Result<(), String> {
    match outcome {
      HandlerOutcome::Done(result) => result.map_err(|e| e.to_string()),
      HandlerOutcome::Pending(_) => panic!("still pending"),
    }
  }

  #[test]
  fn return_values_become_outcomes() {
    let ok = Handler::<i32>::new(|_| ());
    let failing = Handler::<i32>::new(|v: &i32| -> Result<(), String> { Err(format!("bad {v}")) });
    assert_eq!(settled(ok.call(&1)), Ok(()));
    assert_eq!(settled(failing.call(&7)), Err("bad 7".into()));
  }

  #[test]
  fn futures_that_never_suspend_settle_in_the_call() {
    let ok = Handler::<i32>::new(|_| async {}.boxed_local());
    let failing = Handler::<i32>::new(|v: &i32| {
      let v = *v;
      async move { Err::<(), _>(format!("late {v}")) }.boxed_local()
    });
    assert_eq!(settled(ok.call(&1)), Ok(()));
    assert_eq!(settled(failing.call(&3)), Err("late 3".into()));
  }

  #[test]
  fn suspended_futures_stay_pending() {
    let (tx, rx) = futures::channel::oneshot::channel::<()>();
    let rx = std::cell::RefCell::new(Some(rx));
    let waiting = Handler::<i32>::new(move |_| {
      let rx = rx.borrow_mut().take();
      async move {
        if let Some(rx) = rx {
          let _ = rx.await;
        }
      }
      .boxed_local()
    });
    let HandlerOutcome::Pending(future) = waiting.call(&1) else { panic!("settled early") };
    drop(tx);
    assert!(future.now_or_never().unwrap().is_ok());
  }
}
