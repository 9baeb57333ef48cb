//! Inter-request pacing (C5 contract: "inter-call pacing >= 30ms").
//!
//! The embedding provider itself is not responsible for spacing out its own
//! calls — the engine is, since pacing is a property of the caller's request
//! rate against the provider's advertised budget, not of any one request.
//! `Pacer` is a minimal last-call-timestamp gate the engine's loop awaits
//! between successive calls of any kind (embed batches, inter-file sleeps).

use std::{
  sync::Mutex,
  time::{Duration, Instant},
};

pub struct Pacer {
  last_call: Mutex<Option<Instant>>,
}

impl Pacer {
  pub fn new() -> Self {
    Self { last_call: Mutex::new(None) }
  }

  /// Sleep, if necessary, so that at least `min_interval` has elapsed since
  /// the previous call to `wait` on this pacer.
  pub async fn wait(&self, min_interval: Duration) {
    let sleep_for = {
      let mut last_call = self.last_call.lock().unwrap();
      let now = Instant::now();
      let sleep_for = last_call
        .map(|last| min_interval.saturating_sub(now.duration_since(last)))
        .unwrap_or_default();
      *last_call = Some(now + sleep_for);
      sleep_for
    };

    if !sleep_for.is_zero() {
      tokio::time::sleep(sleep_for).await;
    }
  }
}

impl Default for Pacer {
  fn default() -> Self {
    Self::new()
  }
}
