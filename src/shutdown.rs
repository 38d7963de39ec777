//! Stop signal shared by every long-running loop.
//!
//! One `watch` channel: the sender flips it to `true` once, every loop holds
//! a receiver. Dropping the sender also counts as stop.

use tokio::sync::watch;

pub type StopSender = watch::Sender<bool>;
pub type StopSignal = watch::Receiver<bool>;

pub fn channel() -> (StopSender, StopSignal) {
    watch::channel(false)
}

/// Resolves once stop has been requested. Cancel safe, so it can sit in a
/// `tokio::select!` inside a loop.
pub async fn stopped(stop: &mut StopSignal) {
    // Err means the sender is gone, which is a stop as well
    let _ = stop.wait_for(|stopped| *stopped).await;
}

pub fn is_stopped(stop: &StopSignal) -> bool {
    *stop.borrow()
}
