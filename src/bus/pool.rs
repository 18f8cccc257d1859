//! `Bus::scan`: scanners shared between logically equivalent requests.
//!
//! Requests scanning with the same [`Evaluator`] in the same eager mode share
//! one in-flight [`Scanner`] whenever an existing scanner already watches
//! every event the new request asks for. A pool exists only while one of its
//! scanners is in flight, and each such scanner holds its evaluator, so an
//! evaluator address is never reused while its pool exists.
use super::{Bus, BusInner, Key};
use crate::{
  deferred::{deferred, CancelableFuture, Deferred},
  error::ScanError,
  event::{EventKey, EventMap, Listenable},
  scanner::{Evaluator, Scanner},
  timer::{sleep, Sleep},
};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::{
  any::Any,
  collections::{BTreeMap, HashSet},
  fmt::{Debug, Formatter},
  future::Future,
  pin::Pin,
  rc::Rc,
  task::{Context, Poll},
  time::Duration,
};

type SharedScan<T> = Shared<LocalBoxFuture<'static, Result<T, ScanError>>>;

type PoolKey = (usize, bool);

/// What to scan for, and how.
pub struct ScanParams<T, M: EventMap> {
  evaluator: Evaluator<T, M>,
  trigger: Listenable<Key<M>>,
  eager: bool,
  pool: bool,
  timeout: Option<Duration>,
}

impl<T, M: EventMap> ScanParams<T, M> {
  /// Eager, pooled and without timeout.
  pub fn new(evaluator: &Evaluator<T, M>, trigger: impl Into<Listenable<Key<M>>>) -> Self {
    ScanParams {
      evaluator: evaluator.clone(),
      trigger: trigger.into(),
      eager: true,
      pool: true,
      timeout: None,
    }
  }

  /// Whether the evaluator runs once before any event fires.
  pub fn eager(mut self, eager: bool) -> Self {
    self.eager = eager;
    self
  }

  /// Whether this request may share a scanner with others.
  pub fn pool(mut self, pool: bool) -> Self {
    self.pool = pool;
    self
  }

  /// Cancel the scan with [`ScanError::Timeout`] unless it settles within
  /// `timeout`. A non-zero timeout disables pooling.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

impl<T, M: EventMap> Debug for ScanParams<T, M> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScanParams")
      .field("evaluator", &self.evaluator)
      .field("trigger", &self.trigger)
      .field("eager", &self.eager)
      .field("pool", &self.pool)
      .field("timeout", &self.timeout)
      .finish()
  }
}

// ============================================================================
// ScanFuture
// ============================================================================

/// One caller's handle on a (possibly shared) scan.
#[must_use = "futures do nothing unless polled"]
pub struct ScanFuture<T> {
  source: SharedScan<T>,
  /// Settled only by this caller's `cancel`.
  view: CancelableFuture<T>,
  scanner: Deferred<T>,
  scan_id: usize,
  pooled: bool,
  deadline: Option<(Sleep, u64)>,
}

impl<T> ScanFuture<T> {
  fn new(source: SharedScan<T>, scanner: Deferred<T>, scan_id: usize, pooled: bool) -> Self {
    let (_, view) = deferred();
    ScanFuture { source, view, scanner, scan_id, pooled, deadline: None }
  }

  fn with_deadline(mut self, timeout: Duration) -> Self {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    self.deadline = Some((sleep(timeout), millis));
    self
  }

  /// Cancel this caller's scan.
  ///
  /// A pooled future only settles its own view; the shared scanner keeps
  /// running for everyone else. Returns `false` if the scan already settled.
  pub fn cancel(&self, reason: impl Into<String>) -> bool {
    if !self.pooled {
      return self.scanner.cancel(reason);
    }
    if self.scanner.is_settled() {
      return false;
    }
    self.view.cancel(reason)
  }

  #[inline]
  pub fn is_settled(&self) -> bool { self.view.is_settled() || self.scanner.is_settled() }

  /// Whether both futures observe the same underlying scanner.
  #[inline]
  pub fn shares_scanner_with(&self, other: &ScanFuture<T>) -> bool {
    self.scanner.ptr_eq(&other.scanner)
  }
}

impl<T: Clone> Future for ScanFuture<T> {
  type Output = Result<T, ScanError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    if let Poll::Ready(outcome) = Pin::new(&mut this.view).poll(cx) {
      return Poll::Ready(outcome);
    }
    if let Poll::Ready(outcome) = this.source.poll_unpin(cx) {
      return Poll::Ready(outcome);
    }
    if let Some((deadline, millis)) = &mut this.deadline {
      if deadline.as_mut().poll(cx).is_ready() {
        this.scanner.cancel(format!("timed out after {millis}ms"));
        return Poll::Ready(Err(ScanError::Timeout(*millis)));
      }
    }
    Poll::Pending
  }
}

impl<T> Debug for ScanFuture<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ScanFuture")
      .field("scanner", &format_args!("{:#x}", self.scan_id))
      .field("pooled", &self.pooled)
      .field("settled", &self.is_settled())
      .finish()
  }
}

// ============================================================================
// Pool
// ============================================================================

struct PooledScan<T, K> {
  id: usize,
  events: HashSet<K>,
  source: SharedScan<T>,
  scanner: Deferred<T>,
}

/// In-flight scanners of one evaluator in one mode: an optional wildcard
/// scanner, and non-empty buckets of scanners keyed by event count.
struct ScanPool<T, K> {
  wildcard: Option<PooledScan<T, K>>,
  buckets: BTreeMap<usize, Vec<PooledScan<T, K>>>,
}

impl<T, K: EventKey> ScanPool<T, K> {
  fn find(&self, events: Option<&HashSet<K>>) -> Option<&PooledScan<T, K>> {
    if let Some(wildcard) = &self.wildcard {
      return Some(wildcard);
    }
    let events = events?;
    self
      .buckets
      .range(events.len()..)
      .flat_map(|(_, bucket)| bucket)
      .find(|entry| entry.events.is_superset(events))
  }

  fn insert(&mut self, entry: PooledScan<T, K>, wildcard: bool) {
    if wildcard {
      self.wildcard = Some(entry);
      return;
    }
    self.buckets.entry(entry.events.len()).or_default().push(entry);
  }

  fn remove(&mut self, id: usize) -> Option<PooledScan<T, K>> {
    if self.wildcard.as_ref().map_or(false, |entry| entry.id == id) {
      return self.wildcard.take();
    }
    let (&len, bucket) = self
      .buckets
      .iter_mut()
      .find(|(_, bucket)| bucket.iter().any(|entry| entry.id == id))?;
    let idx = bucket.iter().position(|entry| entry.id == id)?;
    let removed = bucket.remove(idx);
    if bucket.is_empty() {
      self.buckets.remove(&len);
    }
    Some(removed)
  }

  fn is_empty(&self) -> bool { self.wildcard.is_none() && self.buckets.is_empty() }
}

impl<M: EventMap> Bus<M> {
  /// Resolve with the value an evaluator settles on, re-evaluating whenever
  /// a trigger event fires.
  ///
  /// ```rust
  /// use futures::FutureExt;
  /// use std::{cell::Cell, rc::Rc};
  /// use strongbus::prelude::*;
  ///
  /// strongbus::event_map! {
  ///   #[derive(Debug, Clone)]
  ///   pub enum Ev: EvKey {
  ///     Foo(()) => "foo",
  ///   }
  /// }
  ///
  /// let bus = Bus::<Ev>::new();
  /// let ready = Rc::new(Cell::new(false));
  /// let r = ready.clone();
  /// let evaluator = Evaluator::new(move |ctx: &ScanContext<bool, Ev>| {
  ///   if r.get() {
  ///     ctx.resolve(true);
  ///   }
  /// });
  /// let mut scan = bus.scan(ScanParams::new(&evaluator, EvKey::Foo));
  ///
  /// bus.emit(Ev::Foo(())).unwrap();
  /// assert!((&mut scan).now_or_never().is_none());
  ///
  /// ready.set(true);
  /// bus.emit(Ev::Foo(())).unwrap();
  /// assert!(!bus.has_listeners_for(EvKey::Foo));
  /// assert!(scan.now_or_never().unwrap().unwrap());
  /// ```
  pub fn scan<T: Clone + 'static>(&self, params: ScanParams<T, M>) -> ScanFuture<T> {
    let ScanParams { evaluator, trigger, eager, pool, timeout } = params;
    if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
      return self.scan_unpooled(evaluator, trigger, eager).with_deadline(timeout);
    }
    let events = trigger.event_set();
    if !pool || events.as_ref().map_or(false, HashSet::is_empty) {
      return self.scan_unpooled(evaluator, trigger, eager);
    }

    let key = (evaluator.addr(), eager);
    if let Some(hit) = self.inner.pooled_scan::<T>(key, events.as_ref()) {
      return hit;
    }

    let wildcard = trigger.is_wildcard();
    let scanner = Scanner::new(evaluator, eager);
    scanner.scan(self, trigger);
    let (id, settler) = (scanner.id(), scanner.settler());
    let source = scanner.boxed_local().shared();
    if settler.is_settled() {
      return ScanFuture::new(source, settler, id, false);
    }

    let entry = PooledScan {
      id,
      events: events.unwrap_or_default(),
      source: source.clone(),
      scanner: settler.clone(),
    };
    let mut pools = self.inner.scan_pools.borrow_mut();
    let pool = pools.entry(key).or_insert_with(|| -> Box<dyn Any> {
      Box::new(ScanPool::<T, Key<M>> { wildcard: None, buckets: BTreeMap::new() })
    });
    if let Some(pool) = pool.downcast_mut::<ScanPool<T, Key<M>>>() {
      pool.insert(entry, wildcard);
    }
    drop(pools);

    let bus = Rc::downgrade(&self.inner);
    settler.on_settle(move || {
      if let Some(bus) = bus.upgrade() {
        bus.evict_scan::<T>(key, id);
      }
    });
    ScanFuture::new(source, settler, id, true)
  }

  fn scan_unpooled<T: Clone + 'static>(
    &self,
    evaluator: Evaluator<T, M>,
    trigger: Listenable<Key<M>>,
    eager: bool,
  ) -> ScanFuture<T> {
    let scanner = Scanner::new(evaluator, eager);
    scanner.scan(self, trigger);
    let (id, settler) = (scanner.id(), scanner.settler());
    ScanFuture::new(scanner.boxed_local().shared(), settler, id, false)
  }
}

impl<M: EventMap> BusInner<M> {
  fn pooled_scan<T: 'static>(
    &self,
    key: PoolKey,
    events: Option<&HashSet<Key<M>>>,
  ) -> Option<ScanFuture<T>> {
    let pools = self.scan_pools.borrow();
    let entry = pools
      .get(&key)?
      .downcast_ref::<ScanPool<T, Key<M>>>()?
      .find(events)?;
    Some(ScanFuture::new(entry.source.clone(), entry.scanner.clone(), entry.id, true))
  }

  fn evict_scan<T: 'static>(&self, key: PoolKey, id: usize) {
    let evicted = {
      let mut pools = self.scan_pools.borrow_mut();
      let Some(pool) = pools
        .get_mut(&key)
        .and_then(|pool| pool.downcast_mut::<ScanPool<T, Key<M>>>())
      else {
        return;
      };
      let entry = pool.remove(id);
      let emptied = if pool.is_empty() { pools.remove(&key) } else { None };
      (entry, emptied)
    };
    drop(evicted);
  }

  #[cfg(test)]
  fn scan_pool_count(&self) -> usize { self.scan_pools.borrow().len() }
}
