//! Platform sleep backing scan timeouts.
use std::{future::Future, pin::Pin, time::Duration};

pub(crate) type Sleep = Pin<Box<dyn Future<Output = ()>>>;

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn sleep(duration: Duration) -> Sleep {
  use futures::FutureExt;
  Box::pin(futures_time::task::sleep(duration.into()).map(drop))
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn sleep(duration: Duration) -> Sleep {
  let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
  Box::pin(gloo_timers::future::TimeoutFuture::new(millis))
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
  use super::*;
  use std::time::Instant;

  #[tokio::test]
  async fn sleeps_at_least_the_duration() {
    let start = Instant::now();
    sleep(Duration::from_millis(10)).await;
    assert!(start.elapsed() >= Duration::from_millis(10));
  }
}
