use std::rc::Rc;
use thiserror::Error;

/// Reason a scanner is cancelled once every source it watched is destroyed.
pub const ALL_SCANNABLES_DESTROYED: &str = "All Scannables have been destroyed.";

/// Errors returned from [`Bus::emit`](crate::bus::Bus::emit).
#[derive(Error, Debug)]
pub enum BusError {
  #[error("{bus} received unexpected message type '{event}' with contents:\n{payload}")]
  UnhandledEvent {
    bus: String,
    event: &'static str,
    payload: String,
  },
  #[error("Do not emit \"{0}\" manually. Reserved for internal use.")]
  ReservedEvent(&'static str),
}

/// Why a future returned by a handler or hook could not be run. Raised
/// through the bus's `error` lifecycle event.
#[derive(Error, Debug)]
pub enum HandlerSpawnError {
  #[error("{0} has no spawner for a suspended handler future")]
  NoSpawner(String),
  #[error("{bus} failed to spawn a handler future: {source}")]
  Spawn {
    bus: String,
    source: futures::task::SpawnError,
  },
}

/// The error side of every future this crate hands out.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
  #[error("{0}")]
  Canceled(String),
  #[error("{0}")]
  Rejected(Rc<dyn std::error::Error>),
  #[error("Rejected with event ({0})")]
  RejectedWithEvent(&'static str),
  #[error("scan timed out after {0}ms")]
  Timeout(u64),
}

impl ScanError {
  #[inline]
  pub fn is_canceled(&self) -> bool { matches!(self, ScanError::Canceled(_)) }

  #[inline]
  pub fn is_timeout(&self) -> bool { matches!(self, ScanError::Timeout(_)) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages() {
    let unhandled = BusError::UnhandledEvent {
      bus: "Anonymous Bus".into(),
      event: "foo",
      payload: "42".into(),
    };
    assert_eq!(
      unhandled.to_string(),
      "Anonymous Bus received unexpected message type 'foo' with contents:\n42"
    );
    assert_eq!(
      BusError::ReservedEvent("*").to_string(),
      "Do not emit \"*\" manually. Reserved for internal use."
    );
    assert_eq!(ScanError::RejectedWithEvent("bar").to_string(), "Rejected with event (bar)");
    assert!(ScanError::Canceled("x".into()).is_canceled());
    assert!(ScanError::Timeout(5).is_timeout());
  }
}
